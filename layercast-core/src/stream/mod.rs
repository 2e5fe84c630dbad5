//! Frame data model: frames, bounded layer queues and the streamers that
//! generate frames into them.

mod frame;
mod queue;
mod streamer;

pub use frame::{Frame, FrameKind};
pub use queue::{DEFAULT_QUEUE_CAPACITY, LayerQueue};
pub use streamer::{Arrival, Streamer, StreamerBuilder};

/// Errors raised by frames, layer queues and streamers.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum StreamError {
    /// Frame size is not a positive finite number
    #[error("Invalid frame size {size} for frame #{order}")]
    InvalidFrameSize {
        /// Arrival order of the rejected frame
        order: u64,
        /// Rejected size in bytes
        size: f64,
    },

    /// Inserting the frame would exceed the queue capacity
    #[error("Queue '{queue}' is full: load {load} + frame {size} > capacity {capacity}")]
    QueueFull {
        /// Queue name
        queue: String,
        /// Current byte load
        load: f64,
        /// Size of the rejected frame
        size: f64,
        /// Queue capacity in bytes
        capacity: f64,
    },

    /// More frames requested than currently resident
    #[error("Queue '{queue}' holds {available} frames, {requested} requested")]
    InsufficientFrames {
        /// Queue name
        queue: String,
        /// Number of frames requested
        requested: usize,
        /// Number of frames resident
        available: usize,
    },

    /// Layer index outside the streamer's layer range
    #[error("Streamer '{streamer}' has no layer {layer}")]
    UnknownLayer {
        /// Streamer name
        streamer: String,
        /// Requested layer index
        layer: usize,
    },

    /// Streamer configuration rejected at construction time
    #[error("Invalid configuration for streamer '{streamer}': {reason}")]
    InvalidConfig {
        /// Streamer name
        streamer: String,
        /// Why the configuration was rejected
        reason: String,
    },
}
