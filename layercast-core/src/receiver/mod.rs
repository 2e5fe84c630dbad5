//! Receiver side: per-origin playout buffers and QoE accounting.
//!
//! Delivered frames are buffered per origin and replayed offline against a
//! fixed frame-rate clock. `last_play` marks the end of the most recently
//! played frame; a frame whose availability lies past it stalls playback.

mod qoe;

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

pub use qoe::{PlaybackOptions, PlaybackOutcome, QoeMetrics};

use crate::channel::AvailabilityUpdate;
use crate::stream::{Frame, LayerQueue, StreamError};

/// Default per-origin buffer size in bytes.
pub const DEFAULT_BUFFER_CAPACITY: f64 = 1_000_000_000.0;

/// Errors raised by the receiver.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ReceiverError {
    #[error(transparent)]
    Stream(#[from] StreamError),

    /// Frame rate is not a positive finite number
    #[error("Invalid frame rate: {fps}")]
    InvalidFps {
        /// Rejected frames per second
        fps: f64,
    },

    /// Frame slot override is not a positive finite number
    #[error("Invalid frame slot: {slot}")]
    InvalidFrameSlot {
        /// Rejected slot in seconds
        slot: f64,
    },

    /// Two buffers would share the same origin
    #[error("Duplicate origin '{origin}'")]
    DuplicateOrigin {
        /// Repeated origin name
        origin: String,
    },

    /// No origin was configured
    #[error("Receiver needs at least one origin")]
    NoOrigins,
}

#[derive(Debug, Clone)]
struct Playout {
    last_play: f64,
    buffer: LayerQueue,
}

struct Walk {
    metrics: QoeMetrics,
    last_play: f64,
}

impl Playout {
    fn walk(&self, slot: f64, bound: Option<usize>) -> Walk {
        let mut last_play = self.last_play;
        let mut metrics = QoeMetrics::default();
        let mut bitrate_sum = 0.0;

        for frame in self.buffer.iter().take(bound.unwrap_or(usize::MAX)) {
            let Some(availability) = frame.availability() else {
                break;
            };

            let rebuffering = availability - last_play;
            if rebuffering > 0.0 {
                last_play = availability;
                metrics.rebuffering_time += rebuffering;
                metrics.rebuffering_events += 1;
            }

            metrics.total_delay += last_play - frame.timestamp();
            bitrate_sum += frame.bitrate();
            metrics.frames_played += 1;
            last_play += slot;
        }

        if metrics.frames_played > 0 {
            metrics.average_bitrate = bitrate_sum / metrics.frames_played as f64;
        }
        Walk { metrics, last_play }
    }
}

/// Consumer of every streamer's transmitted frames.
#[derive(Debug, Clone)]
pub struct Receiver {
    fps: f64,
    started_at: Option<f64>,
    playouts: BTreeMap<String, Playout>,
}

impl Receiver {
    /// Creates a receiver with one buffer per origin.
    ///
    /// # Errors
    ///
    /// - `ReceiverError::InvalidFps` - If `fps` is not positive
    /// - `ReceiverError::DuplicateOrigin` - If an origin is listed twice
    /// - `ReceiverError::NoOrigins` - If `origins` is empty
    pub fn new<I, S>(origins: I, fps: f64) -> Result<Self, ReceiverError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_capacity(origins, fps, DEFAULT_BUFFER_CAPACITY)
    }

    /// Creates a receiver whose buffers hold at most `capacity` bytes each.
    ///
    /// # Errors
    ///
    /// Same as [`Receiver::new`].
    pub fn with_capacity<I, S>(origins: I, fps: f64, capacity: f64) -> Result<Self, ReceiverError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !(fps.is_finite() && fps > 0.0) {
            return Err(ReceiverError::InvalidFps { fps });
        }

        let mut playouts = BTreeMap::new();
        for origin in origins {
            let origin = origin.into();
            let playout = Playout {
                last_play: 0.0,
                buffer: LayerQueue::with_capacity(origin.clone(), capacity),
            };
            if playouts.insert(origin.clone(), playout).is_some() {
                return Err(ReceiverError::DuplicateOrigin { origin });
            }
        }
        if playouts.is_empty() {
            return Err(ReceiverError::NoOrigins);
        }

        Ok(Self {
            fps,
            started_at: None,
            playouts,
        })
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn frame_slot(&self) -> f64 {
        1.0 / self.fps
    }

    /// Time playback started, once [`Receiver::start`] was called.
    pub fn started_at(&self) -> Option<f64> {
        self.started_at
    }

    pub fn origins(&self) -> impl Iterator<Item = &str> {
        self.playouts.keys().map(String::as_str)
    }

    pub fn buffer(&self, origin: &str) -> Option<&LayerQueue> {
        self.playouts.get(origin).map(|playout| &playout.buffer)
    }

    pub fn last_play(&self, origin: &str) -> Option<f64> {
        self.playouts.get(origin).map(|playout| playout.last_play)
    }

    /// Frames buffered across all origins.
    pub fn buffered(&self) -> usize {
        self.playouts.values().map(|p| p.buffer.len()).sum()
    }

    /// Starts playback of every origin `waiting` seconds after `now`.
    pub fn start(&mut self, now: f64, waiting: f64) {
        let first_play = now + waiting;
        for playout in self.playouts.values_mut() {
            playout.last_play = first_play;
        }
        self.started_at = Some(first_play);
        debug!("Receiver playback starts at {:.3}", first_play);
    }

    /// Buffers delivered frames by origin and returns how many were kept.
    ///
    /// Frames from unknown origins are dropped. Capacity is checked for the
    /// whole batch first, so a full buffer leaves every buffer untouched.
    ///
    /// # Errors
    ///
    /// - `ReceiverError::Stream` - If an origin's buffer cannot take its frames
    pub fn receive(&mut self, frames: Vec<Frame>) -> Result<usize, ReceiverError> {
        let mut incoming: BTreeMap<&str, f64> = BTreeMap::new();
        for frame in &frames {
            if self.playouts.contains_key(frame.origin()) {
                *incoming.entry(frame.origin()).or_default() += frame.size();
            }
        }
        for (origin, bytes) in &incoming {
            if let Some(playout) = self.playouts.get(*origin) {
                playout.buffer.check_room(*bytes)?;
            }
        }

        let mut accepted = 0;
        for frame in frames {
            match self.playouts.get_mut(frame.origin()) {
                Some(playout) => {
                    playout.buffer.push(frame)?;
                    accepted += 1;
                }
                None => warn!("Dropping frame {} from unknown origin", frame),
            }
        }
        Ok(accepted)
    }

    /// Applies channel revisions to buffered frames, returning how many matched.
    pub fn apply_updates(&mut self, updates: &[AvailabilityUpdate]) -> usize {
        let mut applied = 0;
        for update in updates {
            let Some(frame) = self
                .playouts
                .get_mut(&update.origin)
                .and_then(|playout| playout.buffer.find_mut(update.order))
            else {
                continue;
            };
            if let Some(sent_at) = update.sent_at {
                frame.mark_sent(sent_at);
            }
            frame.set_availability(update.availability);
            applied += 1;
        }
        applied
    }

    /// Replays every origin's buffer and reports QoE per origin.
    ///
    /// Walks frames in order until the bound, the end of the buffer, or a
    /// frame whose availability is still unresolved. Unless `options.info`
    /// is set, `last_play` is committed and the played frames are drained.
    ///
    /// # Errors
    ///
    /// - `ReceiverError::InvalidFrameSlot` - If the slot override is not positive
    pub fn playback(
        &mut self,
        options: PlaybackOptions,
    ) -> Result<BTreeMap<String, PlaybackOutcome>, ReceiverError> {
        let slot = match options.frame_slot {
            Some(slot) if !(slot.is_finite() && slot > 0.0) => {
                return Err(ReceiverError::InvalidFrameSlot { slot });
            }
            Some(slot) => slot,
            None => self.frame_slot(),
        };

        let mut results = BTreeMap::new();
        for (origin, playout) in &mut self.playouts {
            let walk = playout.walk(slot, options.bound);
            let played = walk.metrics.frames_played;
            if played == 0 {
                results.insert(origin.clone(), PlaybackOutcome::Empty);
                continue;
            }

            if !options.info {
                playout.last_play = walk.last_play;
                playout.buffer.pop_front(played)?;
            }
            debug!("Played {} frames of {}: {}", played, origin, walk.metrics);
            results.insert(origin.clone(), PlaybackOutcome::Played(walk.metrics));
        }
        Ok(results)
    }
}

impl fmt::Display for Receiver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Receiver: fps = {}, slot = {:.3}, start = ",
            self.fps,
            self.frame_slot()
        )?;
        match self.started_at {
            Some(at) => write!(f, "{at:.3}")?,
            None => write!(f, "not started")?,
        }
        for playout in self.playouts.values() {
            write!(f, "\n{}", playout.buffer)?;
        }
        Ok(())
    }
}
