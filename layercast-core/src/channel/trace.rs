//! Recorded bandwidth traces.
//!
//! A trace file holds one sample per line in bytes/sec. Lines that are not
//! purely decimal digits after trimming (headers, comments, blank lines) are
//! skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use tracing::debug;

use super::ChannelError;

/// Ordered bandwidth samples taken at a fixed interval.
///
/// Sample `k` is in effect during `[k * interval, (k + 1) * interval)`.
/// Past the last sample the trace wraps around to the first.
#[derive(Debug, Clone, PartialEq)]
pub struct BandwidthTrace {
    samples: Vec<u64>,
    sample_interval: f64,
}

impl BandwidthTrace {
    /// Default spacing between samples in seconds.
    pub const DEFAULT_SAMPLE_INTERVAL: f64 = 1.0;

    /// Builds a trace from in-memory samples.
    ///
    /// # Errors
    ///
    /// - `ChannelError::EmptyTrace` - If `samples` is empty
    /// - `ChannelError::InvalidParameter` - If `sample_interval` is not positive
    pub fn from_samples(samples: Vec<u64>, sample_interval: f64) -> Result<Self, ChannelError> {
        if !(sample_interval.is_finite() && sample_interval > 0.0) {
            return Err(ChannelError::InvalidParameter {
                name: "sample_interval",
                value: sample_interval,
            });
        }
        if samples.is_empty() {
            return Err(ChannelError::EmptyTrace);
        }
        Ok(Self {
            samples,
            sample_interval,
        })
    }

    /// Parses a trace from any line-oriented reader.
    ///
    /// # Errors
    ///
    /// - `ChannelError::TraceIo` - If reading fails
    /// - `ChannelError::TraceSampleOutOfRange` - If a digit-only line overflows
    /// - `ChannelError::EmptyTrace` - If no line holds a sample
    pub fn from_reader<R: BufRead>(reader: R, sample_interval: f64) -> Result<Self, ChannelError> {
        let mut samples = Vec::new();
        let mut skipped = 0usize;

        for (index, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ChannelError::TraceIo {
                path: "<reader>".into(),
                source,
            })?;
            let line = line.trim();
            if line.is_empty() || !line.bytes().all(|b| b.is_ascii_digit()) {
                skipped += 1;
                continue;
            }
            let sample = line
                .parse::<u64>()
                .map_err(|_| ChannelError::TraceSampleOutOfRange { line: index + 1 })?;
            samples.push(sample);
        }

        debug!(
            "Parsed bandwidth trace: {} samples, {} lines skipped",
            samples.len(),
            skipped
        );
        Self::from_samples(samples, sample_interval)
    }

    /// Loads a trace file.
    ///
    /// # Errors
    ///
    /// - `ChannelError::TraceIo` - If the file cannot be opened or read
    /// - `ChannelError::TraceSampleOutOfRange` - If a digit-only line overflows
    /// - `ChannelError::EmptyTrace` - If the file holds no samples
    pub fn from_path(path: impl AsRef<Path>, sample_interval: f64) -> Result<Self, ChannelError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| ChannelError::TraceIo {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(BufReader::new(file), sample_interval).map_err(|err| match err {
            ChannelError::TraceIo { source, .. } => ChannelError::TraceIo {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn samples(&self) -> &[u64] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn sample_interval(&self) -> f64 {
        self.sample_interval
    }

    /// Bandwidth of the `index`-th interval, wrapping past the end.
    pub fn sample(&self, index: usize) -> f64 {
        self.samples[index % self.samples.len()] as f64
    }

    /// Length of one pass over the trace in seconds.
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 * self.sample_interval
    }

    /// Mean bandwidth over one pass.
    pub fn mean(&self) -> f64 {
        self.samples.iter().map(|&s| s as f64).sum::<f64>() / self.samples.len() as f64
    }

    /// Number of intervals with zero bandwidth.
    pub fn outages(&self) -> usize {
        self.samples.iter().filter(|&&s| s == 0).count()
    }
}
