//! Frame scheduling: arrival generation and pluggable transmission policies.
//!
//! The [`Scheduler`] owns every [`Streamer`] and the simulation-wide arrival
//! counter. Which buffered frames leave next is delegated to a
//! [`SchedulingPolicy`]; arrivals are generated the same way for all policies.

mod fifo;
mod priority;
mod random;

use std::fmt;

use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use fifo::FifoPolicy;
pub use priority::PriorityPolicy;
pub use random::RandomPolicy;

use crate::clock::DeterministicRng;
use crate::stream::{Arrival, Frame, StreamError, Streamer};

/// Errors raised while generating arrivals or taking decisions.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SchedulerError {
    /// Streamer or queue operation failed
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    /// Update window is empty or reversed
    #[error("Elapsed time must be positive: update window [{start}, {stop})")]
    NonPositiveElapsed {
        /// Window start
        start: f64,
        /// Window end
        stop: f64,
    },

    /// Poisson rate rejected by the sampler
    #[error("Invalid arrival rate for streamer '{streamer}': lambda {lambda} ({reason})")]
    InvalidArrivalRate {
        /// Streamer name
        streamer: String,
        /// Expected number of arrivals
        lambda: f64,
        /// Sampler error
        reason: String,
    },

    /// FIFO search found no frame carrying the expected order
    #[error("FIFO search stalled waiting for order {expected} after {rounds} rounds")]
    FifoStalled {
        /// Order the cursor was waiting for
        expected: u64,
        /// Fruitless scans performed
        rounds: usize,
    },

    /// Scheduler construction rejected
    #[error("Invalid scheduler configuration: {reason}")]
    InvalidConfig {
        /// Why the configuration was rejected
        reason: String,
    },
}

/// Available decision policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Uniform streamer, layer and batch size
    #[default]
    Random,
    /// Global arrival order across streamers
    Fifo,
    /// Streamer weighted by priority
    Priority,
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyKind::Random => write!(f, "random"),
            PolicyKind::Fifo => write!(f, "fifo"),
            PolicyKind::Priority => write!(f, "priority"),
        }
    }
}

/// What the FIFO policy does when the expected order cannot be found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FifoStallPolicy {
    /// Jump the cursor to the oldest resident frame
    #[default]
    Skip,
    /// Stop the decision; fail if nothing was collected
    Block,
}

/// Tuning of the FIFO search loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FifoSettings {
    /// Consecutive fruitless scans before the stall policy applies
    pub max_search_rounds: usize,
    /// Reaction to a stalled search
    pub stall_policy: FifoStallPolicy,
}

impl Default for FifoSettings {
    fn default() -> Self {
        Self {
            max_search_rounds: 1,
            stall_policy: FifoStallPolicy::Skip,
        }
    }
}

/// Decides which buffered frames to transmit next.
pub trait SchedulingPolicy: fmt::Debug + Send {
    /// Pops the frames to transmit now from `streamers`.
    ///
    /// Returns `Ok(None)` when there is nothing to decide. At most
    /// `max_frames` frames are returned.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError` if the policy cannot complete a decision.
    fn decide(
        &mut self,
        streamers: &mut [Streamer],
        max_frames: usize,
        rng: &mut DeterministicRng,
    ) -> Result<Option<Vec<Frame>>, SchedulerError>;

    /// Returns name of this policy.
    fn name(&self) -> &str;
}

impl PolicyKind {
    /// Creates the policy implementation for this kind.
    pub fn build(self, fifo: FifoSettings) -> Box<dyn SchedulingPolicy> {
        match self {
            PolicyKind::Random => Box::new(RandomPolicy::new()),
            PolicyKind::Fifo => Box::new(FifoPolicy::new(fifo)),
            PolicyKind::Priority => Box::new(PriorityPolicy::new()),
        }
    }
}

/// Owner of all streamers; generates arrivals and delegates decisions.
#[derive(Debug)]
pub struct Scheduler {
    streamers: Vec<Streamer>,
    policy: Box<dyn SchedulingPolicy>,
    max_frames_per_step: usize,
    arrivals: u64,
}

impl Scheduler {
    /// Creates a scheduler over `streamers` using `policy`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` - If there are no streamers, names
    ///   collide, or `max_frames_per_step` is zero
    pub fn new(
        streamers: Vec<Streamer>,
        policy: Box<dyn SchedulingPolicy>,
        max_frames_per_step: usize,
    ) -> Result<Self, SchedulerError> {
        if streamers.is_empty() {
            return Err(SchedulerError::InvalidConfig {
                reason: "at least one streamer is required".to_string(),
            });
        }
        if max_frames_per_step == 0 {
            return Err(SchedulerError::InvalidConfig {
                reason: "max_frames_per_step must be at least 1".to_string(),
            });
        }
        for (index, streamer) in streamers.iter().enumerate() {
            if streamers[..index]
                .iter()
                .any(|other| other.name() == streamer.name())
            {
                return Err(SchedulerError::InvalidConfig {
                    reason: format!("duplicate streamer name '{}'", streamer.name()),
                });
            }
        }

        Ok(Self {
            streamers,
            policy,
            max_frames_per_step,
            arrivals: 0,
        })
    }

    /// Creates a scheduler with a built-in policy.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` - See [`Scheduler::new`]
    pub fn with_policy(
        streamers: Vec<Streamer>,
        kind: PolicyKind,
        max_frames_per_step: usize,
        fifo: FifoSettings,
    ) -> Result<Self, SchedulerError> {
        Self::new(streamers, kind.build(fifo), max_frames_per_step)
    }

    pub fn streamers(&self) -> &[Streamer] {
        &self.streamers
    }

    pub fn streamers_mut(&mut self) -> &mut [Streamer] {
        &mut self.streamers
    }

    pub fn streamer(&self, name: &str) -> Option<&Streamer> {
        self.streamers.iter().find(|s| s.name() == name)
    }

    pub fn policy_name(&self) -> &str {
        self.policy.name()
    }

    pub fn max_frames_per_step(&self) -> usize {
        self.max_frames_per_step
    }

    /// Total arrivals generated so far; the next arrival gets this order.
    pub fn arrival_count(&self) -> u64 {
        self.arrivals
    }

    /// Returns true if every streamer is empty.
    pub fn is_idle(&self) -> bool {
        self.streamers.iter().all(Streamer::is_empty)
    }

    /// Asks the policy which frames to transmit now.
    ///
    /// # Errors
    ///
    /// Returns the policy's `SchedulerError`.
    pub fn decide(
        &mut self,
        rng: &mut DeterministicRng,
    ) -> Result<Option<Vec<Frame>>, SchedulerError> {
        let decided = self
            .policy
            .decide(&mut self.streamers, self.max_frames_per_step, rng)?;
        if let Some(frames) = &decided {
            debug!(
                "Scheduler ({}) decided {} frames",
                self.policy.name(),
                frames.len()
            );
        }
        Ok(decided)
    }

    /// Generates the arrivals of the window `[t_start, t_stop)`.
    ///
    /// Each streamer draws a Poisson arrival count with rate
    /// `arrival_rate * elapsed / top_mean_frame_size`. The resulting
    /// timestamps are ranked globally, shuffled across streamers and handed
    /// out so no streamer systematically wins ties. Returns the new
    /// top-layer frames.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::NonPositiveElapsed` - If `t_stop <= t_start`
    /// - `SchedulerError::InvalidArrivalRate` - If a Poisson rate is invalid
    /// - `SchedulerError::Stream` - If a layer queue is full; no frame of
    ///   the window is queued and the arrival counter is unchanged
    pub fn update(
        &mut self,
        t_start: f64,
        t_stop: f64,
        rng: &mut DeterministicRng,
    ) -> Result<Vec<Frame>, SchedulerError> {
        let elapsed = t_stop - t_start;
        if elapsed.is_nan() || elapsed <= 0.0 {
            return Err(SchedulerError::NonPositiveElapsed {
                start: t_start,
                stop: t_stop,
            });
        }

        let mut counts = Vec::with_capacity(self.streamers.len());
        for streamer in &self.streamers {
            let lambda = streamer.arrival_rate() * elapsed / streamer.top_mean_frame_size();
            counts.push(sample_arrival_count(streamer.name(), lambda, rng)?);
        }
        let total: usize = counts.iter().sum();

        let mut stamps: Vec<f64> = (0..total)
            .map(|_| t_start + rng.uniform_f64() * elapsed)
            .collect();
        stamps.sort_by(f64::total_cmp);
        let mut pool: Vec<Arrival> = stamps
            .into_iter()
            .enumerate()
            .map(|(rank, timestamp)| Arrival {
                sequence: rank as u64,
                timestamp,
            })
            .collect();
        rng.shuffle(&mut pool);

        let order_base = self.arrivals;
        let mut staged = Vec::with_capacity(self.streamers.len());
        let mut offset = 0;
        for (streamer, &count) in self.streamers.iter().zip(&counts) {
            let share = &mut pool[offset..offset + count];
            share.sort_by_key(|arrival| arrival.sequence);
            staged.push(streamer.stage(share, order_base, rng)?);
            offset += count;
        }

        // All or nothing, so layers stay in sync and orders stay dense
        for (streamer, batch) in self.streamers.iter().zip(&staged) {
            streamer.check_room(batch)?;
        }
        let mut new_frames = Vec::new();
        for (streamer, batch) in self.streamers.iter_mut().zip(staged) {
            new_frames.extend(streamer.commit(batch)?);
        }
        self.arrivals += total as u64;

        debug!(
            "Generated {} arrivals in [{:.4}, {:.4}), counter now {}",
            total, t_start, t_stop, self.arrivals
        );
        Ok(new_frames)
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Scheduler Description ({}):", self.policy.name())?;
        for streamer in &self.streamers {
            write!(f, "\n{streamer}\n")?;
        }
        Ok(())
    }
}

fn sample_arrival_count(
    streamer: &str,
    lambda: f64,
    rng: &mut DeterministicRng,
) -> Result<usize, SchedulerError> {
    if lambda == 0.0 {
        return Ok(0);
    }
    let poisson = Poisson::new(lambda).map_err(|e| SchedulerError::InvalidArrivalRate {
        streamer: streamer.to_string(),
        lambda,
        reason: e.to_string(),
    })?;
    let count: f64 = poisson.sample(rng);
    Ok(count as usize)
}

/// Pops a uniformly sized batch from a uniformly chosen layer of `streamer`.
///
/// The batch size is uniform in `[1, min(layer length, max_frames)]`; the
/// same count leaves every other layer.
fn dequeue_random_batch(
    streamer: &mut Streamer,
    max_frames: usize,
    rng: &mut DeterministicRng,
) -> Result<Vec<Frame>, SchedulerError> {
    let layer = rng.index(streamer.layer_count());
    let available = streamer.layer(layer).map_or(0, |queue| queue.len());
    let count = rng.inclusive(1, available.min(max_frames));
    Ok(streamer.dequeue(layer, count)?)
}
