//! Bounded FIFO of frames for one quality layer.

use std::collections::VecDeque;
use std::fmt;

use super::{Frame, StreamError};

/// Default layer queue capacity in bytes (500 MB).
pub const DEFAULT_QUEUE_CAPACITY: f64 = 500_000_000.0;

/// Bounded FIFO buffer of frames.
///
/// Tracks its byte load and frame count on every mutation. Inserting past
/// capacity fails instead of truncating, and dequeuing more frames than
/// resident fails without touching the queue.
#[derive(Debug, Clone)]
pub struct LayerQueue {
    name: String,
    frames: VecDeque<Frame>,
    load: f64,
    capacity: f64,
}

impl LayerQueue {
    /// Creates an empty queue with the default capacity.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_capacity(name, DEFAULT_QUEUE_CAPACITY)
    }

    /// Creates an empty queue holding at most `capacity` bytes.
    pub fn with_capacity(name: impl Into<String>, capacity: f64) -> Self {
        Self {
            name: name.into(),
            frames: VecDeque::new(),
            load: 0.0,
            capacity,
        }
    }

    /// Creates a queue pre-filled with `frames`.
    ///
    /// # Errors
    ///
    /// - `StreamError::QueueFull` - If the frames do not fit in `capacity`
    pub fn with_frames(
        name: impl Into<String>,
        capacity: f64,
        frames: impl IntoIterator<Item = Frame>,
    ) -> Result<Self, StreamError> {
        let mut queue = Self::with_capacity(name, capacity);
        for frame in frames {
            queue.push(frame)?;
        }
        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sum of resident frame sizes in bytes.
    pub fn load(&self) -> f64 {
        self.load
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Appends a frame at the back of the queue.
    ///
    /// # Errors
    ///
    /// - `StreamError::QueueFull` - If the frame would push the load past capacity
    pub fn push(&mut self, frame: Frame) -> Result<(), StreamError> {
        self.check_room(frame.size())?;
        self.load += frame.size();
        self.frames.push_back(frame);
        Ok(())
    }

    /// Checks that `bytes` more would fit without pushing anything.
    ///
    /// # Errors
    ///
    /// - `StreamError::QueueFull` - If the load would pass capacity
    pub fn check_room(&self, bytes: f64) -> Result<(), StreamError> {
        if self.load + bytes > self.capacity {
            return Err(StreamError::QueueFull {
                queue: self.name.clone(),
                load: self.load,
                size: bytes,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Removes and returns the first `count` frames.
    ///
    /// # Errors
    ///
    /// - `StreamError::InsufficientFrames` - If fewer than `count` frames are resident
    pub fn pop_front(&mut self, count: usize) -> Result<Vec<Frame>, StreamError> {
        if count > self.frames.len() {
            return Err(StreamError::InsufficientFrames {
                queue: self.name.clone(),
                requested: count,
                available: self.frames.len(),
            });
        }

        let popped: Vec<Frame> = self.frames.drain(..count).collect();
        let removed: f64 = popped.iter().map(Frame::size).sum();
        self.load = if self.frames.is_empty() {
            0.0
        } else {
            (self.load - removed).max(0.0)
        };
        Ok(popped)
    }

    /// Returns the oldest frame without removing it.
    pub fn peek_front(&self) -> Option<&Frame> {
        self.frames.front()
    }

    /// Returns the first `min(count, len)` frames without removing them.
    pub fn front_frames(&self, count: usize) -> impl Iterator<Item = &Frame> {
        self.frames.iter().take(count)
    }

    /// Iterates over resident frames from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Finds a resident frame by arrival order.
    pub fn find_mut(&mut self, order: u64) -> Option<&mut Frame> {
        self.frames.iter_mut().find(|frame| frame.order() == order)
    }

    /// Drops every resident frame.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.load = 0.0;
    }
}

impl fmt::Display for LayerQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : ", self.name)?;
        if self.frames.is_empty() {
            return write!(f, "Empty");
        }
        let described: Vec<String> = self.frames.iter().map(ToString::to_string).collect();
        write!(f, "{}", described.join(" | "))
    }
}
