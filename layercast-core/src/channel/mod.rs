//! Channel models turning transmission decisions into availability times.
//!
//! A channel is an availability-time oracle: it never drops or reorders
//! frames, it only decides when each frame is fully available at the
//! receiver. Models that revise earlier answers report the revisions as
//! [`AvailabilityUpdate`]s.

mod constant;
mod trace;
mod trace_driven;

use std::fmt;
use std::path::PathBuf;

pub use constant::ConstantChannel;
pub use trace::BandwidthTrace;
pub use trace_driven::TraceChannel;

use crate::stream::Frame;

/// Errors raised by channel models and trace loading.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Bandwidth is not a positive finite number
    #[error("Invalid bandwidth: {bandwidth}")]
    InvalidBandwidth {
        /// Rejected bandwidth in bytes/sec
        bandwidth: f64,
    },

    /// Sending delay or sample interval is negative or non-finite
    #[error("Invalid channel parameter {name}: {value}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Rejected value
        value: f64,
    },

    /// `send` was called with a time earlier than the previous call
    #[error("Channel time went backwards from {last} to {now}")]
    TimeWentBackwards {
        /// Time of the previous call
        last: f64,
        /// Time of the rejected call
        now: f64,
    },

    /// Trace file could not be read
    #[error("Failed to read bandwidth trace {path}: {source}")]
    TraceIo {
        /// Trace file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Trace line made of digits that does not fit a sample
    #[error("Bandwidth trace sample on line {line} is out of range")]
    TraceSampleOutOfRange {
        /// One-based line number
        line: usize,
    },

    /// Trace contains no samples
    #[error("Bandwidth trace contains no samples")]
    EmptyTrace,
}

/// Revised availability of a frame already handed to the receiver.
#[derive(Debug, Clone, PartialEq)]
pub struct AvailabilityUpdate {
    /// Streamer that produced the frame
    pub origin: String,
    /// Arrival order of the frame
    pub order: u64,
    /// Time the transfer started, once known
    pub sent_at: Option<f64>,
    /// New availability; `None` while the transfer is stalled
    pub availability: Option<f64>,
}

/// Transmission model shared by every channel variant.
pub trait Channel: fmt::Debug + Send {
    /// Submits `frames` at virtual time `now`.
    ///
    /// Sets `sent_at` and `availability` on the submitted frames and returns
    /// revisions for frames submitted earlier. Calling with no frames only
    /// advances the channel's notion of time.
    ///
    /// # Errors
    ///
    /// - `ChannelError::TimeWentBackwards` - If `now` precedes the previous call
    fn send(
        &mut self,
        frames: &mut [Frame],
        now: f64,
    ) -> Result<Vec<AvailabilityUpdate>, ChannelError>;

    /// Current bandwidth in bytes/sec.
    fn bandwidth(&self) -> f64;

    /// Frames whose availability may still change.
    fn in_flight(&self) -> usize {
        0
    }

    /// Returns name of this channel model.
    fn name(&self) -> &str;
}

pub(crate) fn check_delay(sending_delay: f64) -> Result<f64, ChannelError> {
    if sending_delay.is_finite() && sending_delay >= 0.0 {
        Ok(sending_delay)
    } else {
        Err(ChannelError::InvalidParameter {
            name: "sending_delay",
            value: sending_delay,
        })
    }
}
