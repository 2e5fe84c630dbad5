//! Layered source that generates frames into its quality-layer queues.

use std::fmt;

use rand_distr::{Distribution, Normal};
use tracing::trace;

use super::{DEFAULT_QUEUE_CAPACITY, Frame, FrameKind, LayerQueue, StreamError};
use crate::clock::DeterministicRng;

/// Redraws allowed for a non-positive Gaussian size before using the mean.
const MAX_SIZE_DRAWS: usize = 8;

/// One arrival instant handed to a streamer by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Arrival {
    /// Rank of the arrival within the scheduler update that produced it
    pub sequence: u64,
    /// Virtual time of the arrival
    pub timestamp: f64,
}

/// Frames drawn for one batch of arrivals, grouped by layer.
#[derive(Debug, Clone)]
pub(crate) struct StagedFrames {
    layers: Vec<Vec<Frame>>,
}

/// Gaussian size models of one layer, for P-frames and I-frames.
#[derive(Debug, Clone)]
struct LayerSizeModel {
    p_frames: Normal<f64>,
    i_frames: Normal<f64>,
    mean: f64,
    iframe_mean: f64,
}

/// A live source producing one frame per layer for each arrival.
///
/// Layers are ordered by ascending quality; the last layer is the highest
/// quality and drives the arrival process.
#[derive(Debug, Clone)]
pub struct Streamer {
    name: String,
    priority: u32,
    arrival_rate: f64,
    iframe_arrival_ratio: f64,
    iframe_size_ratio: f64,
    mean_frame_size: Vec<f64>,
    variance_frame_size: Vec<f64>,
    layer_rates: Vec<f64>,
    size_models: Vec<LayerSizeModel>,
    layers: Vec<LayerQueue>,
}

impl Streamer {
    /// Starts building a streamer named `name`.
    pub fn builder(name: impl Into<String>) -> StreamerBuilder {
        StreamerBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Base arrival rate in bytes/sec at the highest layer.
    pub fn arrival_rate(&self) -> f64 {
        self.arrival_rate
    }

    pub fn iframe_arrival_ratio(&self) -> f64 {
        self.iframe_arrival_ratio
    }

    pub fn iframe_size_ratio(&self) -> f64 {
        self.iframe_size_ratio
    }

    pub fn mean_frame_sizes(&self) -> &[f64] {
        &self.mean_frame_size
    }

    pub fn variance_frame_sizes(&self) -> &[f64] {
        &self.variance_frame_size
    }

    /// Mean frame size of the highest layer.
    pub fn top_mean_frame_size(&self) -> f64 {
        self.mean_frame_size.last().copied().unwrap_or(0.0)
    }

    /// Per-layer arrival rates: `base_rate * mean[layer] / max(mean)`.
    pub fn layer_rates(&self) -> &[f64] {
        &self.layer_rates
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[LayerQueue] {
        &self.layers
    }

    pub fn layer(&self, index: usize) -> Option<&LayerQueue> {
        self.layers.get(index)
    }

    pub fn layer_mut(&mut self, index: usize) -> Option<&mut LayerQueue> {
        self.layers.get_mut(index)
    }

    /// Highest-quality layer queue.
    pub fn top_layer(&self) -> Option<&LayerQueue> {
        self.layers.last()
    }

    /// Returns true if every layer queue is empty.
    pub fn is_empty(&self) -> bool {
        self.layers.iter().all(LayerQueue::is_empty)
    }

    /// Changes the base arrival rate and rederives per-layer rates.
    pub fn set_arrival_rate(&mut self, rate: f64) {
        self.arrival_rate = rate;
        self.layer_rates = derive_layer_rates(rate, &self.mean_frame_size);
    }

    /// Generates frames for the given arrival instants.
    ///
    /// Every arrival is an I-frame with probability `iframe_arrival_ratio`
    /// and gets one frame per layer with order `order_base + sequence`.
    /// Returns the frames appended to the highest layer. The batch is
    /// queued whole or not at all.
    ///
    /// # Errors
    ///
    /// - `StreamError::QueueFull` - If a layer queue cannot take the batch
    pub fn update(
        &mut self,
        arrivals: &[Arrival],
        order_base: u64,
        rng: &mut DeterministicRng,
    ) -> Result<Vec<Frame>, StreamError> {
        let staged = self.stage(arrivals, order_base, rng)?;
        self.check_room(&staged)?;
        self.commit(staged)
    }

    /// Draws the frames of `arrivals` without queueing them.
    pub(crate) fn stage(
        &self,
        arrivals: &[Arrival],
        order_base: u64,
        rng: &mut DeterministicRng,
    ) -> Result<StagedFrames, StreamError> {
        let mut layers: Vec<Vec<Frame>> = self
            .layers
            .iter()
            .map(|_| Vec::with_capacity(arrivals.len()))
            .collect();

        for arrival in arrivals {
            let kind = if rng.chance(self.iframe_arrival_ratio) {
                FrameKind::I
            } else {
                FrameKind::P
            };
            let order = order_base + arrival.sequence;

            for (index, staged) in layers.iter_mut().enumerate() {
                let size = draw_frame_size(&self.size_models[index], kind, rng);
                staged.push(Frame::new(
                    size,
                    order,
                    kind,
                    self.name.as_str(),
                    self.layer_rates[index],
                    arrival.timestamp,
                )?);
            }
        }
        Ok(StagedFrames { layers })
    }

    /// Checks that every layer can take its share of `staged`.
    pub(crate) fn check_room(&self, staged: &StagedFrames) -> Result<(), StreamError> {
        for (queue, frames) in self.layers.iter().zip(&staged.layers) {
            queue.check_room(frames.iter().map(Frame::size).sum())?;
        }
        Ok(())
    }

    /// Queues frames from [`Streamer::stage`], returning the top-layer ones.
    pub(crate) fn commit(&mut self, staged: StagedFrames) -> Result<Vec<Frame>, StreamError> {
        let count = staged.layers.last().map_or(0, Vec::len);
        let mut top = Vec::new();
        let last = self.layers.len().saturating_sub(1);

        for (index, (queue, frames)) in self.layers.iter_mut().zip(staged.layers).enumerate() {
            if index == last {
                top = frames.clone();
            }
            for frame in frames {
                queue.push(frame)?;
            }
        }

        trace!("Streamer {} queued {} arrivals", self.name, count);
        Ok(top)
    }

    /// Dequeues `count` frames from every layer and returns those of `layer`.
    ///
    /// Keeps layers synchronized in length. Nothing is removed if any layer
    /// holds fewer than `count` frames.
    ///
    /// # Errors
    ///
    /// - `StreamError::UnknownLayer` - If `layer` is out of range
    /// - `StreamError::InsufficientFrames` - If a layer holds fewer than `count` frames
    pub fn dequeue(&mut self, layer: usize, count: usize) -> Result<Vec<Frame>, StreamError> {
        if layer >= self.layers.len() {
            return Err(StreamError::UnknownLayer {
                streamer: self.name.clone(),
                layer,
            });
        }
        if let Some(short) = self.layers.iter().find(|queue| queue.len() < count) {
            return Err(StreamError::InsufficientFrames {
                queue: short.name().to_string(),
                requested: count,
                available: short.len(),
            });
        }

        let mut chosen = Vec::new();
        for (index, queue) in self.layers.iter_mut().enumerate() {
            let frames = queue.pop_front(count)?;
            if index == layer {
                chosen = frames;
            }
        }
        Ok(chosen)
    }
}

impl fmt::Display for Streamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Streamer {}:\n priority = {}\n arrival rate = {}\nQueue(s): ",
            self.name, self.priority, self.arrival_rate
        )?;
        for queue in &self.layers {
            write!(f, "\n{queue}")?;
        }
        Ok(())
    }
}

fn derive_layer_rates(rate: f64, means: &[f64]) -> Vec<f64> {
    let max_mean = means.iter().copied().fold(f64::MIN, f64::max);
    means.iter().map(|mean| rate * mean / max_mean).collect()
}

fn draw_frame_size(model: &LayerSizeModel, kind: FrameKind, rng: &mut DeterministicRng) -> f64 {
    let (distribution, mean) = match kind {
        FrameKind::I => (&model.i_frames, model.iframe_mean),
        FrameKind::P => (&model.p_frames, model.mean),
    };
    for _ in 0..MAX_SIZE_DRAWS {
        let size = (distribution.sample(rng) * 100.0).round() / 100.0;
        if size > 0.0 {
            return size;
        }
    }
    mean
}

/// Builder validating a streamer configuration before construction.
#[derive(Debug, Clone)]
pub struct StreamerBuilder {
    name: String,
    layer_names: Vec<String>,
    priority: u32,
    arrival_rate: f64,
    iframe_arrival_ratio: f64,
    iframe_size_ratio: f64,
    mean_frame_size: Vec<f64>,
    variance_frame_size: Vec<f64>,
    queue_capacity: f64,
}

impl StreamerBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            layer_names: Vec::new(),
            priority: 1,
            arrival_rate: 0.0,
            iframe_arrival_ratio: 0.0,
            iframe_size_ratio: 1.0,
            mean_frame_size: Vec::new(),
            variance_frame_size: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Names of the quality layers, lowest quality first.
    pub fn layers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.layer_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn priority(mut self, priority: u32) -> Self {
        self.priority = priority;
        self
    }

    /// Base arrival rate in bytes/sec at the highest layer.
    pub fn arrival_rate(mut self, rate: f64) -> Self {
        self.arrival_rate = rate;
        self
    }

    /// I-frame arrival probability and I/P size ratio.
    pub fn iframe_ratios(mut self, arrival_ratio: f64, size_ratio: f64) -> Self {
        self.iframe_arrival_ratio = arrival_ratio;
        self.iframe_size_ratio = size_ratio;
        self
    }

    /// Per-layer mean frame sizes and their Gaussian spread.
    pub fn frame_sizes(
        mut self,
        mean: impl IntoIterator<Item = f64>,
        variance: impl IntoIterator<Item = f64>,
    ) -> Self {
        self.mean_frame_size = mean.into_iter().collect();
        self.variance_frame_size = variance.into_iter().collect();
        self
    }

    /// Byte capacity of each layer queue.
    pub fn queue_capacity(mut self, capacity: f64) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validates the configuration and builds the streamer.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidConfig` - If ratios, layer counts or size
    ///   parameters are inconsistent, or sizes are likely to go negative
    pub fn build(self) -> Result<Streamer, StreamError> {
        let invalid = |reason: String| StreamError::InvalidConfig {
            streamer: self.name.clone(),
            reason,
        };

        if self.layer_names.is_empty() {
            return Err(invalid("at least one layer is required".to_string()));
        }
        if self.layer_names.len() != self.mean_frame_size.len()
            || self.mean_frame_size.len() != self.variance_frame_size.len()
        {
            return Err(invalid(format!(
                "{} layers but {} means and {} variances",
                self.layer_names.len(),
                self.mean_frame_size.len(),
                self.variance_frame_size.len()
            )));
        }
        if !(0.0..=1.0).contains(&self.iframe_arrival_ratio) {
            return Err(invalid(format!(
                "I-frame arrival ratio {} outside [0, 1]",
                self.iframe_arrival_ratio
            )));
        }
        if !(self.iframe_size_ratio.is_finite() && self.iframe_size_ratio > 0.0) {
            return Err(invalid(format!(
                "I-frame size ratio {} must be positive",
                self.iframe_size_ratio
            )));
        }
        if !(self.arrival_rate.is_finite() && self.arrival_rate >= 0.0) {
            return Err(invalid(format!(
                "arrival rate {} must be non-negative",
                self.arrival_rate
            )));
        }
        if self.queue_capacity.is_nan() || self.queue_capacity <= 0.0 {
            return Err(invalid(format!(
                "queue capacity {} must be positive",
                self.queue_capacity
            )));
        }

        let ratio = self.iframe_arrival_ratio;
        let normalizer = ratio * self.iframe_size_ratio + (1.0 - ratio);
        let mut size_models = Vec::with_capacity(self.mean_frame_size.len());
        for (layer, (&mean, &variance)) in self
            .mean_frame_size
            .iter()
            .zip(&self.variance_frame_size)
            .enumerate()
        {
            if !(mean.is_finite() && mean > 0.0 && variance.is_finite() && variance >= 0.0) {
                return Err(invalid(format!(
                    "layer {layer}: mean {mean} and variance {variance} must be finite, mean positive"
                )));
            }
            let p_mean = mean / normalizer;
            if p_mean - 1.5 * variance <= 0.0 {
                return Err(invalid(format!(
                    "layer {layer}: mean {p_mean:.3} - 1.5 * variance {variance} <= 0, \
                     frame sizes would likely go negative"
                )));
            }
            let iframe_mean = p_mean * self.iframe_size_ratio;
            let p_frames =
                Normal::new(p_mean, variance).map_err(|e| invalid(format!("layer {layer}: {e}")))?;
            let i_frames = Normal::new(iframe_mean, variance)
                .map_err(|e| invalid(format!("layer {layer}: {e}")))?;
            size_models.push(LayerSizeModel {
                p_frames,
                i_frames,
                mean: p_mean,
                iframe_mean,
            });
        }

        let layers = self
            .layer_names
            .iter()
            .map(|layer| LayerQueue::with_capacity(layer.as_str(), self.queue_capacity))
            .collect();
        let layer_rates = derive_layer_rates(self.arrival_rate, &self.mean_frame_size);

        Ok(Streamer {
            name: self.name,
            priority: self.priority,
            arrival_rate: self.arrival_rate,
            iframe_arrival_ratio: self.iframe_arrival_ratio,
            iframe_size_ratio: self.iframe_size_ratio,
            mean_frame_size: self.mean_frame_size,
            variance_frame_size: self.variance_frame_size,
            layer_rates,
            size_models,
            layers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Streamer {
        Streamer::builder("Alice")
            .layers(["Base", "Enhanced"])
            .priority(2)
            .arrival_rate(1500.0)
            .iframe_ratios(0.2, 5.0)
            .frame_sizes([8.0, 10.0], [0.0, 0.0])
            .build()
            .unwrap()
    }

    fn arrivals(count: u64) -> Vec<Arrival> {
        (0..count)
            .map(|sequence| Arrival {
                sequence,
                timestamp: sequence as f64 * 0.1,
            })
            .collect()
    }

    #[test]
    fn test_layer_rates_scale_with_mean_size() {
        let streamer = alice();
        assert_eq!(streamer.layer_rates(), &[1200.0, 1500.0]);
        assert_eq!(streamer.top_mean_frame_size(), 10.0);
    }

    #[test]
    fn test_set_arrival_rate_rederives_layers() {
        let mut streamer = alice();
        streamer.set_arrival_rate(3000.0);
        assert_eq!(streamer.layer_rates(), &[2400.0, 3000.0]);
    }

    #[test]
    fn test_update_fills_every_layer() {
        let mut streamer = alice();
        let mut rng = DeterministicRng::from_seed(1);

        let top = streamer.update(&arrivals(5), 10, &mut rng).unwrap();

        assert_eq!(top.len(), 5);
        assert!(streamer.layers().iter().all(|layer| layer.len() == 5));
        let orders: Vec<u64> = top.iter().map(Frame::order).collect();
        assert_eq!(orders, vec![10, 11, 12, 13, 14]);
        assert!(top.iter().all(|frame| frame.bitrate() == 1500.0));
    }

    #[test]
    fn test_zero_variance_sizes_follow_normalized_mean() {
        let mut streamer = alice();
        let mut rng = DeterministicRng::from_seed(3);
        streamer.update(&arrivals(50), 0, &mut rng).unwrap();

        // normalizer = 0.2 * 5 + 0.8 = 1.8
        let base_p = 8.0 / 1.8;
        for frame in streamer.layer(0).unwrap().iter() {
            let expected = if frame.is_iframe() {
                base_p * 5.0
            } else {
                base_p
            };
            assert!((frame.size() - expected).abs() < 0.01);
        }
    }

    #[test]
    fn test_dequeue_keeps_layers_in_sync() {
        let mut streamer = alice();
        let mut rng = DeterministicRng::from_seed(9);
        streamer.update(&arrivals(4), 0, &mut rng).unwrap();

        let frames = streamer.dequeue(0, 3).unwrap();
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| f.size() < 10.0 || f.is_iframe()));
        assert!(streamer.layers().iter().all(|layer| layer.len() == 1));

        assert!(matches!(
            streamer.dequeue(1, 2),
            Err(StreamError::InsufficientFrames { .. })
        ));
        assert!(matches!(
            streamer.dequeue(5, 1),
            Err(StreamError::UnknownLayer { .. })
        ));
        assert_eq!(streamer.layer(1).unwrap().len(), 1);
    }

    #[test]
    fn test_full_queue_propagates() {
        let mut streamer = Streamer::builder("Tiny")
            .layers(["Base"])
            .arrival_rate(100.0)
            .frame_sizes([10.0], [0.0])
            .queue_capacity(25.0)
            .build()
            .unwrap();
        let mut rng = DeterministicRng::from_seed(0);

        let err = streamer.update(&arrivals(3), 0, &mut rng).unwrap_err();
        assert!(matches!(err, StreamError::QueueFull { .. }));
        assert!(streamer.is_empty());

        streamer.update(&arrivals(2), 0, &mut rng).unwrap();
        assert_eq!(streamer.layer(0).unwrap().len(), 2);
    }

    #[test]
    fn test_rejected_batch_keeps_layers_in_sync() {
        let mut streamer = Streamer::builder("Carol")
            .layers(["Base", "Enhanced"])
            .arrival_rate(1000.0)
            .frame_sizes([10.0, 100.0], [0.0, 0.0])
            .queue_capacity(250.0)
            .build()
            .unwrap();
        let mut rng = DeterministicRng::from_seed(5);
        streamer.update(&arrivals(2), 0, &mut rng).unwrap();

        // Base could take a third frame, Enhanced cannot
        let err = streamer.update(&arrivals(1), 2, &mut rng).unwrap_err();
        assert!(matches!(err, StreamError::QueueFull { queue, .. } if queue == "Enhanced"));

        let lengths: Vec<usize> = streamer.layers().iter().map(LayerQueue::len).collect();
        assert_eq!(lengths, vec![2, 2]);
        assert_eq!(streamer.layer(0).unwrap().load(), 20.0);
        assert_eq!(streamer.dequeue(1, 2).unwrap().len(), 2);
        assert!(streamer.is_empty());
    }

    #[test]
    fn test_construction_validation() {
        let mismatched = Streamer::builder("Bob")
            .layers(["Base", "Enhanced"])
            .frame_sizes([5.0], [0.0])
            .build();
        assert!(matches!(mismatched, Err(StreamError::InvalidConfig { .. })));

        let bad_ratio = Streamer::builder("Bob")
            .layers(["Base"])
            .iframe_ratios(1.5, 2.0)
            .frame_sizes([5.0], [0.0])
            .build();
        assert!(matches!(bad_ratio, Err(StreamError::InvalidConfig { .. })));

        // 5 / 1 - 1.5 * 4 = -1
        let negative_sizes = Streamer::builder("Bob")
            .layers(["Base"])
            .frame_sizes([5.0], [4.0])
            .build();
        assert!(matches!(
            negative_sizes,
            Err(StreamError::InvalidConfig { .. })
        ));

        let no_layers = Streamer::builder("Bob").build();
        assert!(no_layers.is_err());
    }
}
