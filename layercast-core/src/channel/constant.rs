//! Constant-bandwidth channel without transport modeling.

use super::{AvailabilityUpdate, Channel, ChannelError, check_delay};
use crate::stream::Frame;

/// Channel with a fixed bandwidth: `availability = now + size/bw + delay`.
#[derive(Debug, Clone)]
pub struct ConstantChannel {
    bandwidth: f64,
    sending_delay: f64,
    last_send: f64,
}

impl ConstantChannel {
    /// Creates a channel with `bandwidth` bytes/sec and a fixed sending delay.
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidBandwidth` - If `bandwidth` is not positive
    /// - `ChannelError::InvalidParameter` - If `sending_delay` is negative
    pub fn new(bandwidth: f64, sending_delay: f64) -> Result<Self, ChannelError> {
        let mut channel = Self {
            bandwidth: 0.0,
            sending_delay: check_delay(sending_delay)?,
            last_send: f64::NEG_INFINITY,
        };
        channel.set_bandwidth(bandwidth)?;
        Ok(channel)
    }

    pub fn sending_delay(&self) -> f64 {
        self.sending_delay
    }

    /// Changes the bandwidth for subsequent sends.
    ///
    /// # Errors
    ///
    /// - `ChannelError::InvalidBandwidth` - If `bandwidth` is not positive
    pub fn set_bandwidth(&mut self, bandwidth: f64) -> Result<(), ChannelError> {
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(ChannelError::InvalidBandwidth { bandwidth });
        }
        self.bandwidth = bandwidth;
        Ok(())
    }
}

impl Channel for ConstantChannel {
    fn send(
        &mut self,
        frames: &mut [Frame],
        now: f64,
    ) -> Result<Vec<AvailabilityUpdate>, ChannelError> {
        if now < self.last_send {
            return Err(ChannelError::TimeWentBackwards {
                last: self.last_send,
                now,
            });
        }
        self.last_send = now;

        for frame in frames.iter_mut() {
            let availability = now + frame.size() / self.bandwidth + self.sending_delay;
            frame.mark_sent(now);
            frame.set_availability(Some(availability));
        }
        Ok(Vec::new())
    }

    fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    fn name(&self) -> &str {
        "constant"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::FrameKind;

    fn frame(size: f64, order: u64) -> Frame {
        Frame::new(size, order, FrameKind::P, "alice", 100.0, 0.0).unwrap()
    }

    #[test]
    fn test_availability_includes_transfer_and_delay() {
        let mut channel = ConstantChannel::new(1000.0, 0.25).unwrap();
        let mut frames = vec![frame(500.0, 0), frame(100.0, 1)];

        let updates = channel.send(&mut frames, 10.0).unwrap();

        assert!(updates.is_empty());
        assert_eq!(frames[0].sent_at(), Some(10.0));
        assert_eq!(frames[0].availability(), Some(10.75));
        assert_eq!(frames[1].availability(), Some(10.35));
    }

    #[test]
    fn test_bandwidth_change_applies_to_later_sends() {
        let mut channel = ConstantChannel::new(1000.0, 0.0).unwrap();
        channel.set_bandwidth(250.0).unwrap();

        let mut frames = vec![frame(500.0, 0)];
        channel.send(&mut frames, 1.0).unwrap();
        assert_eq!(frames[0].availability(), Some(3.0));
        assert!(channel.set_bandwidth(0.0).is_err());
        assert_eq!(channel.bandwidth(), 250.0);
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(matches!(
            ConstantChannel::new(0.0, 0.0),
            Err(ChannelError::InvalidBandwidth { .. })
        ));
        assert!(matches!(
            ConstantChannel::new(10.0, -1.0),
            Err(ChannelError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_time_cannot_go_backwards() {
        let mut channel = ConstantChannel::new(10.0, 0.0).unwrap();
        channel.send(&mut [], 5.0).unwrap();
        assert!(matches!(
            channel.send(&mut [], 4.0),
            Err(ChannelError::TimeWentBackwards { .. })
        ));
    }
}
