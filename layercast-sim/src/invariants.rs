//! Invariants checked after every simulation step.

use std::fmt;

use layercast_core::receiver::Receiver;
use layercast_core::scheduler::Scheduler;
use layercast_core::stream::{Frame, LayerQueue};
use serde::Serialize;

/// Tolerance for comparing a queue's byte load with its frames.
const LOAD_EPSILON: f64 = 1e-6;

/// Violation of a simulation invariant.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvariantViolation {
    /// Name of the violated invariant
    pub invariant: String,
    /// Detailed description of the violation
    pub description: String,
    /// Step during which the violation was detected
    pub step: u64,
    /// Virtual time of the step
    pub time: f64,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invariant '{}' violated at step {} ({:.3}s): {}",
            self.invariant, self.step, self.time, self.description
        )
    }
}

/// Read-only view of the simulation after a decision.
#[derive(Debug)]
pub struct StepSnapshot<'a> {
    pub step: u64,
    pub time: f64,
    pub scheduler: &'a Scheduler,
    pub receiver: &'a Receiver,
    /// Frames transmitted during this step
    pub transmitted: &'a [Frame],
}

impl StepSnapshot<'_> {
    fn violation(&self, invariant: &str, description: String) -> InvariantViolation {
        InvariantViolation {
            invariant: invariant.to_string(),
            description,
            step: self.step,
            time: self.time,
        }
    }
}

/// Trait for checking simulation invariants.
pub trait Invariant: Send {
    /// Checks if invariant holds for the current step.
    ///
    /// # Errors
    ///
    /// Returns `InvariantViolation` if the invariant condition is not met.
    fn check(&mut self, snapshot: &StepSnapshot<'_>) -> Result<(), InvariantViolation>;

    /// Returns name of this invariant.
    fn name(&self) -> &str;
}

fn check_queue(queue: &LayerQueue) -> Option<String> {
    let resident: f64 = queue.iter().map(Frame::size).sum();
    if (queue.load() - resident).abs() > LOAD_EPSILON {
        return Some(format!(
            "queue '{}' reports load {} but holds {} bytes",
            queue.name(),
            queue.load(),
            resident
        ));
    }
    if queue.load() > queue.capacity() {
        return Some(format!(
            "queue '{}' load {} exceeds capacity {}",
            queue.name(),
            queue.load(),
            queue.capacity()
        ));
    }
    None
}

/// Ensures every queue's load matches its frames and stays within capacity.
#[derive(Debug, Default)]
pub struct QueueLoadInvariant;

impl Invariant for QueueLoadInvariant {
    fn check(&mut self, snapshot: &StepSnapshot<'_>) -> Result<(), InvariantViolation> {
        let layers = snapshot
            .scheduler
            .streamers()
            .iter()
            .flat_map(|streamer| streamer.layers());
        let buffers = snapshot
            .receiver
            .origins()
            .filter_map(|origin| snapshot.receiver.buffer(origin));

        for queue in layers.chain(buffers) {
            if let Some(description) = check_queue(queue) {
                return Err(snapshot.violation(self.name(), description));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "QueueLoad"
    }
}

/// Ensures the layers of each streamer hold the same number of frames.
#[derive(Debug, Default)]
pub struct LayerSyncInvariant;

impl Invariant for LayerSyncInvariant {
    fn check(&mut self, snapshot: &StepSnapshot<'_>) -> Result<(), InvariantViolation> {
        for streamer in snapshot.scheduler.streamers() {
            let lengths: Vec<usize> = streamer.layers().iter().map(LayerQueue::len).collect();
            if lengths.windows(2).any(|pair| pair[0] != pair[1]) {
                return Err(snapshot.violation(
                    self.name(),
                    format!("streamer '{}' layer lengths {:?}", streamer.name(), lengths),
                ));
            }
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "LayerSync"
    }
}

/// Ensures transmitted orders strictly increase across the whole run.
#[derive(Debug, Default)]
pub struct MonotonicOrderInvariant {
    last: Option<u64>,
}

impl Invariant for MonotonicOrderInvariant {
    fn check(&mut self, snapshot: &StepSnapshot<'_>) -> Result<(), InvariantViolation> {
        for frame in snapshot.transmitted {
            if let Some(last) = self.last {
                if frame.order() <= last {
                    let description =
                        format!("order {} transmitted after order {}", frame.order(), last);
                    self.last = Some(frame.order().max(last));
                    return Err(snapshot.violation(self.name(), description));
                }
            }
            self.last = Some(frame.order());
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MonotonicOrder"
    }
}
