//! Trace-driven channel with residual-bytes accounting.
//!
//! Bandwidth follows a [`BandwidthTrace`]. Every frame still in transit is
//! kept in a ledger with the bytes already pushed through. When the trace
//! crosses into a new sample, each in-transit frame is credited with the
//! bytes carried at the old bandwidth and its availability is recomputed
//! from the residual at the new one. A zero sample stalls transfers until
//! bandwidth comes back.

use std::collections::BTreeMap;

use tracing::{debug, trace};

use super::{AvailabilityUpdate, BandwidthTrace, Channel, ChannelError, check_delay};
use crate::stream::Frame;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FrameKey {
    origin: String,
    order: u64,
}

#[derive(Debug, Clone)]
struct Transfer {
    size: f64,
    bytes_sent: f64,
    last_update: f64,
    sent_at: Option<f64>,
    availability: Option<f64>,
}

/// Channel whose bandwidth replays a recorded trace.
#[derive(Debug, Clone)]
pub struct TraceChannel {
    trace: BandwidthTrace,
    sending_delay: f64,
    start: f64,
    sample_index: usize,
    bandwidth: f64,
    now: f64,
    ledger: BTreeMap<FrameKey, Transfer>,
}

impl TraceChannel {
    /// Creates a channel whose first sample starts at time zero.
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidParameter` - If `sending_delay` is negative
    pub fn new(trace: BandwidthTrace, sending_delay: f64) -> Result<Self, ChannelError> {
        Self::starting_at(trace, sending_delay, 0.0)
    }

    /// Creates a channel whose first sample starts at `start`.
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidParameter` - If `sending_delay` is negative
    pub fn starting_at(
        trace: BandwidthTrace,
        sending_delay: f64,
        start: f64,
    ) -> Result<Self, ChannelError> {
        let sending_delay = check_delay(sending_delay)?;
        let bandwidth = trace.sample(0);
        Ok(Self {
            trace,
            sending_delay,
            start,
            sample_index: 0,
            bandwidth,
            now: start,
            ledger: BTreeMap::new(),
        })
    }

    pub fn trace(&self) -> &BandwidthTrace {
        &self.trace
    }

    pub fn sending_delay(&self) -> f64 {
        self.sending_delay
    }

    /// Absolute index of the sample in effect; grows past the trace length.
    pub fn sample_index(&self) -> usize {
        self.sample_index
    }

    /// Bytes of a frame already carried, as of its last recomputation.
    pub fn bytes_sent(&self, origin: &str, order: u64) -> Option<f64> {
        self.ledger
            .get(&FrameKey {
                origin: origin.to_string(),
                order,
            })
            .map(|transfer| transfer.bytes_sent)
    }

    fn next_boundary(&self) -> f64 {
        self.start + (self.sample_index + 1) as f64 * self.trace.sample_interval()
    }

    /// Drops frames that are fully available at `time`.
    fn retire(&mut self, time: f64) {
        self.ledger
            .retain(|_, transfer| !matches!(transfer.availability, Some(at) if at <= time));
    }

    /// Recomputes every in-transit frame after a bandwidth change at `time`.
    fn reschedule(&mut self, time: f64, previous: f64, updates: &mut Vec<AvailabilityUpdate>) {
        for (key, transfer) in &mut self.ledger {
            let finished = transfer
                .availability
                .is_some_and(|at| at - self.sending_delay <= time);
            if finished {
                // Last byte already left, only the delay is left.
                continue;
            }

            let elapsed = (time - transfer.last_update).max(0.0);

            transfer.bytes_sent = (transfer.bytes_sent + elapsed * previous).min(transfer.size);
            transfer.last_update = time;
            transfer.availability = if self.bandwidth > 0.0 {
                transfer.sent_at.get_or_insert(time);
                let residual = transfer.size - transfer.bytes_sent;
                Some(time + residual / self.bandwidth + self.sending_delay)
            } else {
                None
            };

            trace!(
                "Rescheduled {}#{}: {:.1}/{:.1} bytes sent, available at {:?}",
                key.origin, key.order, transfer.bytes_sent, transfer.size, transfer.availability
            );
            updates.push(AvailabilityUpdate {
                origin: key.origin.clone(),
                order: key.order,
                sent_at: transfer.sent_at,
                availability: transfer.availability,
            });
        }
    }
}

impl Channel for TraceChannel {
    fn send(
        &mut self,
        frames: &mut [Frame],
        now: f64,
    ) -> Result<Vec<AvailabilityUpdate>, ChannelError> {
        if now < self.now {
            return Err(ChannelError::TimeWentBackwards {
                last: self.now,
                now,
            });
        }

        let mut updates = Vec::new();
        loop {
            let boundary = self.next_boundary();
            if boundary > now {
                break;
            }
            self.retire(boundary);

            let previous = self.bandwidth;
            self.sample_index += 1;
            self.bandwidth = self.trace.sample(self.sample_index);
            if self.bandwidth != previous {
                debug!(
                    "Bandwidth {} -> {} bytes/sec at {:.3} ({} in flight)",
                    previous,
                    self.bandwidth,
                    boundary,
                    self.ledger.len()
                );
                self.reschedule(boundary, previous, &mut updates);
            }
        }
        self.retire(now);
        self.now = now;

        for frame in frames.iter_mut() {
            let (sent_at, availability) = if self.bandwidth > 0.0 {
                let at = now + frame.size() / self.bandwidth + self.sending_delay;
                frame.mark_sent(now);
                (Some(now), Some(at))
            } else {
                (None, None)
            };
            frame.set_availability(availability);

            self.ledger.insert(
                FrameKey {
                    origin: frame.origin().to_string(),
                    order: frame.order(),
                },
                Transfer {
                    size: frame.size(),
                    bytes_sent: 0.0,
                    last_update: now,
                    sent_at,
                    availability,
                },
            );
        }

        Ok(updates)
    }

    fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    fn in_flight(&self) -> usize {
        self.ledger.len()
    }

    fn name(&self) -> &str {
        "trace"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::FrameKind;

    fn frame(size: f64, order: u64) -> Frame {
        Frame::new(size, order, FrameKind::P, "alice", 100.0, 0.0).unwrap()
    }

    fn channel(samples: &[u64], delay: f64) -> TraceChannel {
        let trace = BandwidthTrace::from_samples(samples.to_vec(), 1.0).unwrap();
        TraceChannel::new(trace, delay).unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_residual_bytes_carry_over() {
        let mut channel = channel(&[1000, 500], 0.0);
        let mut frames = vec![frame(1500.0, 0)];

        assert!(channel.send(&mut frames, 0.25).unwrap().is_empty());
        assert_eq!(frames[0].sent_at(), Some(0.25));
        assert!(close(frames[0].availability().unwrap(), 1.75));

        let updates = channel.send(&mut [], 1.5).unwrap();
        assert_eq!(updates.len(), 1);
        assert!(close(channel.bytes_sent("alice", 0).unwrap(), 750.0));
        assert!(close(updates[0].availability.unwrap(), 1.0 + 750.0 / 500.0));
        assert_eq!(updates[0].sent_at, Some(0.25));

        // Trace wraps back to 1000 at t = 2.0
        let updates = channel.send(&mut [], 2.0).unwrap();
        assert!(close(channel.bytes_sent("alice", 0).unwrap(), 1250.0));
        assert!(close(updates[0].availability.unwrap(), 2.25));
        assert_eq!(channel.sample_index(), 2);
    }

    #[test]
    fn test_outage_stalls_and_resumes() {
        let mut channel = channel(&[1000, 0, 2000], 0.0);
        let mut first = vec![frame(1500.0, 0)];
        channel.send(&mut first, 0.5).unwrap();

        let updates = channel.send(&mut [], 1.0).unwrap();
        assert_eq!(updates[0].availability, None);
        assert_eq!(channel.bandwidth(), 0.0);

        let mut second = vec![frame(400.0, 1)];
        channel.send(&mut second, 1.5).unwrap();
        assert_eq!(second[0].sent_at(), None);
        assert_eq!(second[0].availability(), None);
        assert_eq!(channel.in_flight(), 2);

        let updates = channel.send(&mut [], 2.0).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].order, 0);
        assert!(close(updates[0].availability.unwrap(), 2.5));
        assert_eq!(updates[1].order, 1);
        assert_eq!(updates[1].sent_at, Some(2.0));
        assert!(close(updates[1].availability.unwrap(), 2.2));
    }

    #[test]
    fn test_single_send_crosses_several_transitions() {
        let samples = [1000, 200, 0, 500];
        let mut jumped = channel(&samples, 0.0);
        let mut frames = vec![frame(3000.0, 0)];
        jumped.send(&mut frames, 0.5).unwrap();

        let updates = jumped.send(&mut [], 3.5).unwrap();
        let availabilities: Vec<Option<f64>> =
            updates.iter().map(|update| update.availability).collect();
        assert_eq!(availabilities.len(), 3);
        assert!(close(availabilities[0].unwrap(), 13.5));
        assert_eq!(availabilities[1], None);
        // 500 B at 1000 B/s, 200 B at 200 B/s, nothing during the outage
        assert!(close(availabilities[2].unwrap(), 3.0 + 2300.0 / 500.0));
        assert!(close(jumped.bytes_sent("alice", 0).unwrap(), 700.0));
        assert_eq!(updates[2].sent_at, Some(0.5));
        assert_eq!(jumped.sample_index(), 3);

        let mut stepped = channel(&samples, 0.0);
        let mut frames = vec![frame(3000.0, 0)];
        stepped.send(&mut frames, 0.5).unwrap();
        let mut last = None;
        for now in [1.0, 2.0, 3.0, 3.5] {
            if let Some(update) = stepped.send(&mut [], now).unwrap().pop() {
                last = update.availability;
            }
        }
        assert_eq!(last, availabilities[2]);
        assert_eq!(stepped.bytes_sent("alice", 0), jumped.bytes_sent("alice", 0));
    }

    #[test]
    fn test_completed_transfer_keeps_availability() {
        let mut channel = channel(&[1000, 100], 0.5);
        let mut frames = vec![frame(500.0, 0)];
        channel.send(&mut frames, 0.25).unwrap();
        assert!(close(frames[0].availability().unwrap(), 1.25));

        // Bytes were through at 0.75, so only the delay remains
        let updates = channel.send(&mut [], 1.1).unwrap();
        assert!(updates.is_empty());
        assert_eq!(channel.in_flight(), 1);

        channel.send(&mut [], 1.25).unwrap();
        assert_eq!(channel.in_flight(), 0);
    }

    #[test]
    fn test_unchanged_sample_emits_nothing() {
        let mut channel = channel(&[800, 800, 400], 0.0);
        let mut frames = vec![frame(2000.0, 0)];
        channel.send(&mut frames, 0.0).unwrap();

        assert!(channel.send(&mut [], 1.5).unwrap().is_empty());
        let updates = channel.send(&mut [], 2.0).unwrap();
        assert_eq!(updates.len(), 1);
        assert!(close(channel.bytes_sent("alice", 0).unwrap(), 1600.0));
        assert!(close(updates[0].availability.unwrap(), 3.0));
    }

    #[test]
    fn test_delivered_frames_leave_ledger() {
        let mut channel = channel(&[1000], 0.0);
        let mut frames = vec![frame(100.0, 0), frame(900.0, 1)];
        channel.send(&mut frames, 0.0).unwrap();
        assert_eq!(channel.in_flight(), 2);

        channel.send(&mut [], 0.5).unwrap();
        assert_eq!(channel.in_flight(), 1);
        assert_eq!(channel.bytes_sent("alice", 0), None);
    }

    #[test]
    fn test_time_cannot_go_backwards() {
        let mut channel = channel(&[1000], 0.0);
        channel.send(&mut [], 3.0).unwrap();
        assert!(matches!(
            channel.send(&mut [], 2.0),
            Err(ChannelError::TimeWentBackwards { .. })
        ));
    }
}
