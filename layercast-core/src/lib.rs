//! Layercast Core - Layered live-streaming delivery model
//!
//! Building blocks for simulating delivery of multi-layer streams from
//! several sources to one receiver: frame generation and layer queues,
//! scheduling policies, channel models and QoE accounting at playback.

pub mod channel;
pub mod clock;
pub mod config;
pub mod receiver;
pub mod scheduler;
pub mod stream;
pub mod tracing_setup;

// Re-export main types for convenient access
pub use channel::{AvailabilityUpdate, BandwidthTrace, Channel, ChannelError};
pub use clock::{ClockError, DeterministicRng, VirtualClock};
pub use config::{ConfigError, ExperimentConfig, ExperimentParts};
pub use receiver::{PlaybackOptions, PlaybackOutcome, QoeMetrics, Receiver, ReceiverError};
pub use scheduler::{PolicyKind, Scheduler, SchedulerError, SchedulingPolicy};
pub use stream::{Frame, FrameKind, LayerQueue, StreamError, Streamer};

/// Errors that can bubble up from any Layercast component.
#[derive(Debug, thiserror::Error)]
pub enum LayercastError {
    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),
}

pub type Result<T> = std::result::Result<T, LayercastError>;
