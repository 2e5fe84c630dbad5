//! Single video frame as it travels from streamer to receiver.

use std::fmt;

use super::StreamError;

/// Independently decodable or predicted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Intra-coded frame, larger than predicted frames
    I,
    /// Predicted frame
    P,
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameKind::I => write!(f, "Iframe"),
            FrameKind::P => write!(f, "Pframe"),
        }
    }
}

/// A frame of one quality layer of one streamer.
///
/// All layers generated for the same arrival share `order`. The channel
/// writes `sent_at` and then `availability`; a frame whose availability is
/// `None` has not been resolved by the channel yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    size: f64,
    order: u64,
    kind: FrameKind,
    origin: String,
    bitrate: f64,
    timestamp: f64,
    sent_at: Option<f64>,
    availability: Option<f64>,
}

impl Frame {
    /// Creates a frame generated at `timestamp`.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidFrameSize` - If `size` is not positive and finite
    pub fn new(
        size: f64,
        order: u64,
        kind: FrameKind,
        origin: impl Into<String>,
        bitrate: f64,
        timestamp: f64,
    ) -> Result<Self, StreamError> {
        if !(size.is_finite() && size > 0.0) {
            return Err(StreamError::InvalidFrameSize { order, size });
        }
        Ok(Self {
            size,
            order,
            kind,
            origin: origin.into(),
            bitrate,
            timestamp,
            sent_at: None,
            availability: None,
        })
    }

    /// Sets a known availability, for frames built outside the channel.
    pub fn with_availability(mut self, availability: f64) -> Self {
        self.availability = Some(availability);
        self
    }

    pub fn size(&self) -> f64 {
        self.size
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn is_iframe(&self) -> bool {
        self.kind == FrameKind::I
    }

    /// Name of the streamer that produced the frame.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn bitrate(&self) -> f64 {
        self.bitrate
    }

    /// Generation time in virtual seconds.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn sent_at(&self) -> Option<f64> {
        self.sent_at
    }

    /// Time at which the frame is fully available at the receiver.
    pub fn availability(&self) -> Option<f64> {
        self.availability
    }

    pub(crate) fn mark_sent(&mut self, at: f64) {
        self.sent_at = Some(at);
    }

    pub(crate) fn set_availability(&mut self, availability: Option<f64>) {
        self.availability = availability;
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} #{}: {:.2}B from {}, stamp={:.4}",
            self.kind, self.order, self.size, self.origin, self.timestamp
        )?;
        match self.availability {
            Some(avail) => write!(f, " avail={avail:.4}")?,
            None => write!(f, " avail=pending")?,
        }
        write!(f, " br={:.1}", self.bitrate)
    }
}
