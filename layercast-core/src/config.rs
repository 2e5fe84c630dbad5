//! Experiment configuration.
//!
//! Every tunable of a run is grouped here by component. Configurations
//! deserialize from JSON; any omitted section or field takes its default.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::channel::{BandwidthTrace, Channel, ChannelError, ConstantChannel, TraceChannel};
use crate::receiver::{DEFAULT_BUFFER_CAPACITY, Receiver, ReceiverError};
use crate::scheduler::{FifoSettings, PolicyKind, Scheduler, SchedulerError};
use crate::stream::{DEFAULT_QUEUE_CAPACITY, StreamError, Streamer};

/// Errors raised while loading or validating a configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read config {path}: {source}")]
    Io {
        /// Config file path
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Configuration is not valid JSON for this schema
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    /// A field holds an unusable value
    #[error("Invalid config field {field}: {reason}")]
    Invalid {
        /// Dotted path of the field
        field: String,
        /// Why the value was rejected
        reason: String,
    },

    #[error(transparent)]
    Stream(#[from] StreamError),
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.into(),
    }
}

/// Components of an experiment, built and ready to be driven.
#[derive(Debug)]
pub struct ExperimentParts {
    pub scheduler: Scheduler,
    pub channel: Box<dyn Channel>,
    /// Receiver already started at the build time plus `start_delay`
    pub receiver: Receiver,
}

/// Complete description of one experiment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    pub simulation: SimulationConfig,
    pub scheduler: SchedulerConfig,
    pub channel: ChannelConfig,
    pub receiver: ReceiverConfig,
    pub streamers: Vec<StreamerConfig>,
}

/// Run length, pacing and reproducibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seed of the run's random stream
    pub seed: u64,
    /// Virtual seconds per real second
    pub time_scale: f64,
    /// Real seconds between two steps
    pub step_interval: f64,
    /// Hard limit on steps
    pub max_steps: u64,
    /// Stop once this many frames were transmitted
    pub stop_after_frames: Option<u64>,
    /// Stop once this much virtual time has elapsed
    pub stop_after_secs: Option<f64>,
    /// Take a read-only QoE preview every N steps
    pub preview_interval_steps: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            time_scale: 1.0,
            step_interval: 0.04, // 25 steps/sec
            max_steps: 1_000_000,
            stop_after_frames: None,
            stop_after_secs: Some(60.0),
            preview_interval_steps: None,
        }
    }
}

impl SimulationConfig {
    /// Short fixed-seed run for tests.
    pub fn deterministic_testing() -> Self {
        Self {
            seed: 42,
            time_scale: 1.0,
            step_interval: 0.05,
            max_steps: 2_000,
            stop_after_frames: None,
            stop_after_secs: Some(10.0),
            preview_interval_steps: None,
        }
    }

    /// Checks pacing and stop conditions.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - If a field holds an unusable value
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.time_scale.is_finite() && self.time_scale > 0.0) {
            return Err(invalid("simulation.time_scale", "must be positive"));
        }
        if !(self.step_interval.is_finite() && self.step_interval > 0.0) {
            return Err(invalid("simulation.step_interval", "must be positive"));
        }
        if self.max_steps == 0 {
            return Err(invalid("simulation.max_steps", "must be at least 1"));
        }
        if let Some(secs) = self.stop_after_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(invalid("simulation.stop_after_secs", "must be positive"));
            }
        }
        if self.preview_interval_steps == Some(0) {
            return Err(invalid("simulation.preview_interval_steps", "must be at least 1"));
        }
        Ok(())
    }
}

/// Decision policy and per-step limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub policy: PolicyKind,
    /// Upper bound on frames transmitted per decision
    pub max_frames_per_step: usize,
    /// FIFO search tuning, ignored by other policies
    pub fifo: FifoSettings,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Random,
            max_frames_per_step: 5,
            fifo: FifoSettings::default(),
        }
    }
}

impl SchedulerConfig {
    /// Builds the scheduler owning `streamers`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` - If the limits or streamers are rejected
    pub fn build(&self, streamers: Vec<Streamer>) -> Result<Scheduler, SchedulerError> {
        Scheduler::with_policy(streamers, self.policy, self.max_frames_per_step, self.fifo)
    }
}

/// Channel model selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ChannelConfig {
    /// Fixed bandwidth in bytes/sec
    Constant {
        bandwidth: f64,
        #[serde(default)]
        sending_delay: f64,
    },
    /// Bandwidth replayed from a trace file
    Trace {
        path: PathBuf,
        #[serde(default = "default_sample_interval")]
        sample_interval: f64,
        #[serde(default)]
        sending_delay: f64,
    },
}

fn default_sample_interval() -> f64 {
    BandwidthTrace::DEFAULT_SAMPLE_INTERVAL
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig::Constant {
            bandwidth: 1_000_000.0, // 1 MB/s
            sending_delay: 0.0,
        }
    }
}

impl ChannelConfig {
    /// Builds the channel; trace sampling starts at `start`.
    ///
    /// # Errors
    ///
    /// - `ChannelError` - If parameters are invalid or the trace cannot be loaded
    pub fn build(&self, start: f64) -> Result<Box<dyn Channel>, ChannelError> {
        match self {
            ChannelConfig::Constant {
                bandwidth,
                sending_delay,
            } => Ok(Box::new(ConstantChannel::new(*bandwidth, *sending_delay)?)),
            ChannelConfig::Trace {
                path,
                sample_interval,
                sending_delay,
            } => {
                let trace = BandwidthTrace::from_path(path, *sample_interval)?;
                Ok(Box::new(TraceChannel::starting_at(trace, *sending_delay, start)?))
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (bandwidth, sending_delay, sample_interval) = match self {
            ChannelConfig::Constant {
                bandwidth,
                sending_delay,
            } => (Some(*bandwidth), *sending_delay, None),
            ChannelConfig::Trace {
                sample_interval,
                sending_delay,
                ..
            } => (None, *sending_delay, Some(*sample_interval)),
        };

        if let Some(bandwidth) = bandwidth {
            if !(bandwidth.is_finite() && bandwidth > 0.0) {
                return Err(invalid("channel.bandwidth", "must be positive"));
            }
        }
        if let Some(interval) = sample_interval {
            if !(interval.is_finite() && interval > 0.0) {
                return Err(invalid("channel.sample_interval", "must be positive"));
            }
        }
        if !(sending_delay.is_finite() && sending_delay >= 0.0) {
            return Err(invalid("channel.sending_delay", "must not be negative"));
        }
        Ok(())
    }

    fn resolve_relative_to(&mut self, base: &Path) {
        if let ChannelConfig::Trace { path, .. } = self {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Playback clock and buffering at the receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub fps: f64,
    /// Seconds between the start of the run and the first playback
    pub start_delay: f64,
    /// Per-origin buffer size in bytes
    pub buffer_capacity: f64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            fps: 30.0,
            start_delay: 0.0,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}

impl ReceiverConfig {
    /// Builds a receiver with one buffer per origin.
    ///
    /// # Errors
    ///
    /// - `ReceiverError` - If the frame rate or origins are rejected
    pub fn build<I, S>(&self, origins: I) -> Result<Receiver, ReceiverError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Receiver::with_capacity(origins, self.fps, self.buffer_capacity)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.fps.is_finite() && self.fps > 0.0) {
            return Err(invalid("receiver.fps", "must be positive"));
        }
        if !(self.start_delay.is_finite() && self.start_delay >= 0.0) {
            return Err(invalid("receiver.start_delay", "must not be negative"));
        }
        if self.buffer_capacity.is_nan() || self.buffer_capacity <= 0.0 {
            return Err(invalid("receiver.buffer_capacity", "must be positive"));
        }
        Ok(())
    }
}

/// One streamer as written in a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamerConfig {
    pub name: String,
    /// Layer names in ascending quality
    pub layers: Vec<String>,
    #[serde(default = "default_priority")]
    pub priority: u32,
    /// Bytes/sec at the highest layer
    pub arrival_rate: f64,
    #[serde(default)]
    pub iframe_arrival_ratio: f64,
    #[serde(default = "default_size_ratio")]
    pub iframe_size_ratio: f64,
    pub mean_frame_size: Vec<f64>,
    pub variance_frame_size: Vec<f64>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: f64,
}

fn default_priority() -> u32 {
    1
}

fn default_size_ratio() -> f64 {
    1.0
}

fn default_queue_capacity() -> f64 {
    DEFAULT_QUEUE_CAPACITY
}

impl StreamerConfig {
    /// Builds the streamer with construction-time validation.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidConfig` - If the streamer parameters are inconsistent
    pub fn build(&self) -> Result<Streamer, StreamError> {
        Streamer::builder(self.name.clone())
            .layers(self.layers.iter().cloned())
            .priority(self.priority)
            .arrival_rate(self.arrival_rate)
            .iframe_ratios(self.iframe_arrival_ratio, self.iframe_size_ratio)
            .frame_sizes(
                self.mean_frame_size.iter().copied(),
                self.variance_frame_size.iter().copied(),
            )
            .queue_capacity(self.queue_capacity)
            .build()
    }
}

impl ExperimentConfig {
    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Parse` - If `json` does not match the schema
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a JSON configuration file.
    ///
    /// A relative trace path is resolved against the file's directory.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Io` - If the file cannot be read
    /// - `ConfigError::Parse` - If its content does not match the schema
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_json_str(&json)?;
        if let Some(base) = path.parent() {
            config.channel.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Two-layer, two-streamer experiment over a constant channel.
    pub fn sample() -> Self {
        let streamer = |name: &str, rate: f64, priority: u32| StreamerConfig {
            name: name.to_string(),
            layers: vec!["Base".to_string(), "Enhanced".to_string()],
            priority,
            arrival_rate: rate,
            iframe_arrival_ratio: 0.1,
            iframe_size_ratio: 2.0,
            mean_frame_size: vec![1_200.0, 3_000.0],
            variance_frame_size: vec![100.0, 300.0],
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        };
        Self {
            streamers: vec![streamer("alice", 90_000.0, 2), streamer("bob", 60_000.0, 1)],
            ..Self::default()
        }
    }

    /// Creates a configuration for deterministic tests.
    pub fn for_testing() -> Self {
        Self {
            simulation: SimulationConfig::deterministic_testing(),
            ..Self::sample()
        }
    }

    /// Overrides seed and time scale from `LAYERCAST_SEED` and
    /// `LAYERCAST_TIME_SCALE` when set and parsable.
    pub fn apply_env_overrides(&mut self) {
        if let Some(seed) = std::env::var("LAYERCAST_SEED")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.simulation.seed = seed;
        }
        if let Some(scale) = std::env::var("LAYERCAST_TIME_SCALE")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            self.simulation.time_scale = scale;
        }
    }

    /// Checks every section without loading external files.
    ///
    /// # Errors
    ///
    /// - `ConfigError::Invalid` - If a field holds an unusable value
    /// - `ConfigError::Stream` - If a streamer fails construction-time validation
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.simulation.validate()?;
        self.channel.validate()?;
        self.receiver.validate()?;

        if self.scheduler.max_frames_per_step == 0 {
            return Err(invalid("scheduler.max_frames_per_step", "must be at least 1"));
        }
        if self.scheduler.fifo.max_search_rounds == 0 {
            return Err(invalid("scheduler.fifo.max_search_rounds", "must be at least 1"));
        }

        if self.streamers.is_empty() {
            return Err(invalid("streamers", "at least one streamer is required"));
        }
        let mut names = HashSet::new();
        for streamer in &self.streamers {
            if !names.insert(streamer.name.as_str()) {
                return Err(invalid(
                    "streamers",
                    format!("duplicate streamer name '{}'", streamer.name),
                ));
            }
            streamer.build()?;
        }
        Ok(())
    }

    /// Validates the experiment and builds every component, with the
    /// channel's trace and the receiver's playout anchored at `start`.
    ///
    /// # Errors
    ///
    /// - `LayercastError::Config` - If validation fails
    /// - `LayercastError::Channel` - If the channel or its trace cannot be built
    /// - `LayercastError::Scheduler` / `LayercastError::Receiver` - If a
    ///   component rejects its parameters
    pub fn build(&self, start: f64) -> crate::Result<ExperimentParts> {
        self.validate()?;

        let scheduler = self.scheduler.build(self.build_streamers()?)?;
        let channel = self.channel.build(start)?;
        let mut receiver = self
            .receiver
            .build(self.streamers.iter().map(|s| s.name.clone()))?;
        receiver.start(start, self.receiver.start_delay);

        Ok(ExperimentParts {
            scheduler,
            channel,
            receiver,
        })
    }

    /// Builds all streamers in declaration order.
    ///
    /// # Errors
    ///
    /// - `StreamError::InvalidConfig` - If any streamer is rejected
    pub fn build_streamers(&self) -> Result<Vec<Streamer>, StreamError> {
        self.streamers.iter().map(StreamerConfig::build).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_values() {
        let config = ExperimentConfig::default();

        assert_eq!(config.simulation.seed, 42);
        assert_eq!(config.simulation.time_scale, 1.0);
        assert_eq!(config.scheduler.policy, PolicyKind::Random);
        assert_eq!(config.scheduler.max_frames_per_step, 5);
        assert_eq!(config.receiver.fps, 30.0);
        assert!(matches!(config.channel, ChannelConfig::Constant { .. }));
        assert!(config.streamers.is_empty());
    }

    #[test]
    fn test_presets_validate() {
        ExperimentConfig::sample().validate().unwrap();
        let testing = ExperimentConfig::for_testing();
        testing.validate().unwrap();
        assert_eq!(testing.simulation.stop_after_secs, Some(10.0));
        assert!(ExperimentConfig::default().validate().is_err());
    }

    #[test]
    fn test_parse_json() {
        let json = r#"{
            "simulation": { "seed": 7, "stop_after_frames": 500 },
            "scheduler": {
                "policy": "fifo",
                "max_frames_per_step": 3,
                "fifo": { "max_search_rounds": 4, "stall_policy": "block" }
            },
            "channel": { "kind": "trace", "path": "traces/lte.txt", "sending_delay": 0.01 },
            "receiver": { "fps": 25, "start_delay": 0.5 },
            "streamers": [{
                "name": "alice",
                "layers": ["Base", "Enhanced"],
                "arrival_rate": 2700,
                "mean_frame_size": [1200, 1500],
                "variance_frame_size": [10, 20]
            }]
        }"#;

        let config = ExperimentConfig::from_json_str(json).unwrap();

        assert_eq!(config.simulation.seed, 7);
        assert_eq!(config.simulation.stop_after_frames, Some(500));
        assert_eq!(config.simulation.time_scale, 1.0);
        assert_eq!(config.scheduler.policy, PolicyKind::Fifo);
        assert_eq!(config.scheduler.fifo.max_search_rounds, 4);
        assert_eq!(
            config.channel,
            ChannelConfig::Trace {
                path: PathBuf::from("traces/lte.txt"),
                sample_interval: 1.0,
                sending_delay: 0.01,
            }
        );
        assert_eq!(config.receiver.fps, 25.0);
        assert_eq!(config.receiver.buffer_capacity, DEFAULT_BUFFER_CAPACITY);

        let alice = &config.streamers[0];
        assert_eq!(alice.priority, 1);
        assert_eq!(alice.iframe_size_ratio, 1.0);
        let streamer = alice.build().unwrap();
        assert_eq!(streamer.layer_rates(), &[2160.0, 2700.0]);
        config.validate().unwrap();
    }

    #[test]
    fn test_validation_errors() {
        let mut config = ExperimentConfig::sample();
        config.simulation.step_interval = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field, .. }) if field == "simulation.step_interval"
        ));

        let mut config = ExperimentConfig::sample();
        config.streamers[1].name = "alice".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));

        let mut config = ExperimentConfig::sample();
        config.streamers[0].iframe_arrival_ratio = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Stream(_))));

        let mut config = ExperimentConfig::sample();
        config.channel = ChannelConfig::Constant {
            bandwidth: -1.0,
            sending_delay: 0.0,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_path_resolves_trace_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let trace_path = dir.path().join("trace.txt");
        std::fs::write(&trace_path, "1000\n2000\n").unwrap();

        let config_path = dir.path().join("experiment.json");
        let mut file = std::fs::File::create(&config_path).unwrap();
        write!(
            file,
            r#"{{ "channel": {{ "kind": "trace", "path": "trace.txt", "sample_interval": 0.5 }} }}"#
        )
        .unwrap();

        let config = ExperimentConfig::from_path(&config_path).unwrap();
        let ChannelConfig::Trace { path, .. } = &config.channel else {
            panic!("expected trace channel");
        };
        assert_eq!(path, &trace_path);

        let channel = config.channel.build(0.0).unwrap();
        assert_eq!(channel.name(), "trace");
        assert_eq!(channel.bandwidth(), 1000.0);
    }

    #[test]
    fn test_build_assembles_components() {
        let mut config = ExperimentConfig::sample();
        config.scheduler.policy = PolicyKind::Priority;
        config.receiver.start_delay = 0.5;

        let parts = config.build(2.0).unwrap();

        assert_eq!(parts.scheduler.policy_name(), "priority");
        assert_eq!(parts.scheduler.streamers().len(), 2);
        assert_eq!(parts.channel.name(), "constant");
        assert_eq!(parts.receiver.started_at(), Some(2.5));
        assert_eq!(parts.receiver.origins().collect::<Vec<_>>(), ["alice", "bob"]);
    }

    #[test]
    fn test_build_reports_failing_component() {
        let mut config = ExperimentConfig::sample();
        config.streamers.clear();
        assert!(matches!(
            config.build(0.0),
            Err(crate::LayercastError::Config(ConfigError::Invalid { .. }))
        ));

        let mut config = ExperimentConfig::sample();
        config.channel = ChannelConfig::Trace {
            path: PathBuf::from("/nonexistent/trace.txt"),
            sample_interval: 1.0,
            sending_delay: 0.0,
        };
        assert!(matches!(
            config.build(0.0),
            Err(crate::LayercastError::Channel(ChannelError::TraceIo { .. }))
        ));
    }

    #[test]
    fn test_missing_file_and_bad_json() {
        assert!(matches!(
            ExperimentConfig::from_path("/nonexistent/experiment.json"),
            Err(ConfigError::Io { .. })
        ));
        assert!(matches!(
            ExperimentConfig::from_json_str("{ not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("LAYERCAST_SEED", "12345");
            std::env::set_var("LAYERCAST_TIME_SCALE", "4.0");
        }

        let mut config = ExperimentConfig::sample();
        config.apply_env_overrides();

        assert_eq!(config.simulation.seed, 12345);
        assert_eq!(config.simulation.time_scale, 4.0);

        unsafe {
            std::env::remove_var("LAYERCAST_SEED");
            std::env::remove_var("LAYERCAST_TIME_SCALE");
        }
    }
}
