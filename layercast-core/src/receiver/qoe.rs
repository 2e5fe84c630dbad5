//! Quality-of-experience metrics produced by playback.

use std::fmt;

use serde::Serialize;

/// Playback statistics for one origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QoeMetrics {
    /// Number of stalls where the next frame was not yet available
    pub rebuffering_events: u64,
    /// Total stall duration in seconds
    pub rebuffering_time: f64,
    /// Sum over played frames of `play start - generation timestamp`
    pub total_delay: f64,
    /// Mean bitrate of the played frames
    pub average_bitrate: f64,
    /// Number of frames played
    pub frames_played: usize,
}

impl QoeMetrics {
    /// Mean delay per played frame.
    pub fn mean_delay(&self) -> f64 {
        if self.frames_played == 0 {
            0.0
        } else {
            self.total_delay / self.frames_played as f64
        }
    }
}

impl fmt::Display for QoeMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "frames={} rebuffering={} ({:.3}s) delay={:.3}s bitrate={:.1}",
            self.frames_played,
            self.rebuffering_events,
            self.rebuffering_time,
            self.total_delay,
            self.average_bitrate
        )
    }
}

/// Result of playing one origin's buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "metrics", rename_all = "lowercase")]
pub enum PlaybackOutcome {
    /// No frame could be played
    Empty,
    /// At least one frame was played
    Played(QoeMetrics),
}

impl PlaybackOutcome {
    pub fn metrics(&self) -> Option<&QoeMetrics> {
        match self {
            Self::Empty => None,
            Self::Played(metrics) => Some(metrics),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl fmt::Display for PlaybackOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Played(metrics) => write!(f, "{metrics}"),
        }
    }
}

/// How a playback pass walks the buffers.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackOptions {
    /// Maximum frames played per origin; `None` plays everything deliverable
    pub bound: Option<usize>,
    /// Compute metrics without touching receiver state
    pub info: bool,
    /// Playback duration of one frame; defaults to `1 / fps`
    pub frame_slot: Option<f64>,
}

impl PlaybackOptions {
    /// Plays and drains everything deliverable.
    pub fn commit() -> Self {
        Self::default()
    }

    /// Read-only pass used for mid-run metrics.
    pub fn preview() -> Self {
        Self {
            info: true,
            ..Self::default()
        }
    }

    pub fn bounded(mut self, frames: usize) -> Self {
        self.bound = Some(frames);
        self
    }

    pub fn with_frame_slot(mut self, slot: f64) -> Self {
        self.frame_slot = Some(slot);
        self
    }
}
