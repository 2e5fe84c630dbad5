//! Step-driven simulation engine.
//!
//! One step runs `decide -> send -> apply updates -> receive -> advance
//! clock -> update`. Phases never interleave, so each layer queue has a
//! single writer at any time: arrivals append, decisions pop, playback
//! drains.

use std::collections::BTreeMap;

use layercast_core::LayercastError;
use layercast_core::channel::{Channel, ChannelError};
use layercast_core::clock::{ClockError, DeterministicRng, VirtualClock};
use layercast_core::config::{ConfigError, ExperimentConfig, ExperimentParts, SimulationConfig};
use layercast_core::receiver::{PlaybackOptions, PlaybackOutcome, Receiver, ReceiverError};
use layercast_core::scheduler::{PolicyKind, Scheduler, SchedulerError};
use layercast_core::stream::{Frame, StreamError};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::invariants::{
    Invariant, InvariantViolation, LayerSyncInvariant, MonotonicOrderInvariant,
    QueueLoadInvariant, StepSnapshot,
};
use crate::report::{Preview, SimulationReport};

/// Maximum number of invariant violations before stopping simulation.
pub const MAX_INVARIANT_VIOLATIONS: usize = 10;

/// Errors that can occur during simulation.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),

    /// Receiver origins do not match the scheduler's streamers
    #[error("Receiver has no buffer for streamer '{streamer}'")]
    MissingOrigin {
        /// Streamer without a receiver buffer
        streamer: String,
    },

    /// Too many invariant violations occurred
    #[error("Too many invariant violations: {count}")]
    TooManyInvariantViolations {
        /// Number of violations that occurred
        count: usize,
    },
}

impl From<LayercastError> for SimulationError {
    fn from(err: LayercastError) -> Self {
        match err {
            LayercastError::Stream(e) => SimulationError::Stream(e),
            LayercastError::Scheduler(e) => SimulationError::Scheduler(e),
            LayercastError::Channel(e) => SimulationError::Channel(e),
            LayercastError::Receiver(e) => SimulationError::Receiver(e),
            LayercastError::Config(e) => SimulationError::Config(e),
            LayercastError::Clock(e) => SimulationError::Clock(e),
        }
    }
}

/// What happened during one step.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepOutcome {
    /// Frames handed to the channel
    pub transmitted: usize,
    /// Availability revisions applied at the receiver
    pub updates: usize,
    /// New top-layer arrivals
    pub arrivals: usize,
}

/// Deterministic delivery simulation over one scheduler, channel and receiver.
pub struct Simulation {
    config: SimulationConfig,
    clock: VirtualClock,
    rng: DeterministicRng,
    scheduler: Scheduler,
    channel: Box<dyn Channel>,
    receiver: Receiver,
    invariants: Vec<Box<dyn Invariant>>,
    violations: Vec<InvariantViolation>,
    previews: Vec<Preview>,
    steps: u64,
    frames_delivered: u64,
}

impl Simulation {
    /// Builds every component described by `config`.
    ///
    /// Queue and layer invariants are always checked; transmission order is
    /// also checked under the FIFO policy.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Config` - If the configuration is invalid
    /// - `SimulationError::Channel` - If the channel or its trace cannot be built
    pub fn new(config: ExperimentConfig) -> Result<Self, SimulationError> {
        config.simulation.validate()?;

        let clock = VirtualClock::new(config.simulation.time_scale)?;
        let ExperimentParts {
            scheduler,
            channel,
            receiver,
        } = config.build(clock.now())?;

        let mut simulation =
            Self::with_clock(config.simulation, clock, scheduler, channel, receiver)?;
        simulation.add_invariant(Box::new(QueueLoadInvariant));
        simulation.add_invariant(Box::new(LayerSyncInvariant));
        if config.scheduler.policy == PolicyKind::Fifo {
            simulation.add_invariant(Box::new(MonotonicOrderInvariant::default()));
        }
        Ok(simulation)
    }

    /// Assembles a simulation from prebuilt components.
    ///
    /// The receiver is started at time zero unless already started. No
    /// invariants are registered.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Config` - If the run settings are invalid
    /// - `SimulationError::MissingOrigin` - If a streamer has no receiver buffer
    pub fn from_parts(
        config: SimulationConfig,
        scheduler: Scheduler,
        channel: Box<dyn Channel>,
        mut receiver: Receiver,
    ) -> Result<Self, SimulationError> {
        let clock = VirtualClock::new(config.time_scale)?;
        if receiver.started_at().is_none() {
            receiver.start(clock.now(), 0.0);
        }
        Self::with_clock(config, clock, scheduler, channel, receiver)
    }

    fn with_clock(
        config: SimulationConfig,
        clock: VirtualClock,
        scheduler: Scheduler,
        channel: Box<dyn Channel>,
        receiver: Receiver,
    ) -> Result<Self, SimulationError> {
        config.validate()?;
        if let Some(streamer) = scheduler
            .streamers()
            .iter()
            .find(|s| receiver.buffer(s.name()).is_none())
        {
            return Err(SimulationError::MissingOrigin {
                streamer: streamer.name().to_string(),
            });
        }

        Ok(Self {
            rng: DeterministicRng::from_seed(config.seed),
            config,
            clock,
            scheduler,
            channel,
            receiver,
            invariants: Vec::new(),
            violations: Vec::new(),
            previews: Vec::new(),
            steps: 0,
            frames_delivered: 0,
        })
    }

    /// Adds an invariant to check after every step.
    pub fn add_invariant(&mut self, invariant: Box<dyn Invariant>) {
        self.invariants.push(invariant);
    }

    pub fn seed(&self) -> u64 {
        self.rng.seed()
    }

    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn receiver(&self) -> &Receiver {
        &self.receiver
    }

    pub fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    pub fn violations(&self) -> &[InvariantViolation] {
        &self.violations
    }

    /// Returns true once any configured stop condition is reached.
    pub fn is_finished(&self) -> bool {
        self.steps >= self.config.max_steps
            || self
                .config
                .stop_after_frames
                .is_some_and(|frames| self.frames_delivered >= frames)
            || self
                .config
                .stop_after_secs
                .is_some_and(|secs| self.clock.elapsed() >= secs)
    }

    /// Executes one step.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Scheduler` - If a decision or arrival generation fails
    /// - `SimulationError::Channel` - If the channel rejects the send
    /// - `SimulationError::Receiver` - If a receiver buffer is full
    /// - `SimulationError::TooManyInvariantViolations` - Too many invariant violations
    pub fn step(&mut self) -> Result<StepOutcome, SimulationError> {
        let t_start = self.clock.now();

        let mut frames = self.scheduler.decide(&mut self.rng)?.unwrap_or_default();
        let updates = self.channel.send(&mut frames, t_start)?;
        let updated = self.receiver.apply_updates(&updates);
        self.check_invariants(&frames)?;

        let transmitted = frames.len();
        self.receiver.receive(frames)?;

        self.clock.advance(self.config.step_interval)?;
        let arrivals = self
            .scheduler
            .update(t_start, self.clock.now(), &mut self.rng)?
            .len();

        self.steps += 1;
        self.frames_delivered += transmitted as u64;
        if self
            .config
            .preview_interval_steps
            .is_some_and(|every| self.steps % every == 0)
        {
            let preview = self.preview()?;
            self.previews.push(preview);
        }

        trace!(
            "Step {} at {:.3}: sent {}, revised {}, {} arrivals",
            self.steps, t_start, transmitted, updated, arrivals
        );
        Ok(StepOutcome {
            transmitted,
            updates: updated,
            arrivals,
        })
    }

    /// Plays every buffer without draining it.
    ///
    /// # Errors
    ///
    /// - `SimulationError::Receiver` - If playback fails
    pub fn preview(&mut self) -> Result<Preview, SimulationError> {
        let outcomes = self.receiver.playback(PlaybackOptions::preview())?;
        debug!("Preview at step {}: {} origins", self.steps, outcomes.len());
        Ok(Preview {
            step: self.steps,
            time: self.clock.now(),
            outcomes,
        })
    }

    /// Runs until a stop condition is reached, then plays back everything
    /// deliverable.
    ///
    /// # Errors
    ///
    /// Any error returned by [`Simulation::step`] or the final playback.
    pub fn run(&mut self) -> Result<SimulationReport, SimulationError> {
        info!(
            "Starting simulation: seed {}, policy {}, channel {}, {} streamers",
            self.seed(),
            self.scheduler.policy_name(),
            self.channel.name(),
            self.scheduler.streamers().len()
        );

        while !self.is_finished() {
            self.step()?;
        }

        let final_metrics = self.receiver.playback(PlaybackOptions::commit())?;
        info!(
            "Simulation finished after {} steps ({:.3}s): {} frames sent, {} arrivals",
            self.steps,
            self.clock.elapsed(),
            self.frames_delivered,
            self.scheduler.arrival_count()
        );
        Ok(self.report(final_metrics))
    }

    fn check_invariants(&mut self, transmitted: &[Frame]) -> Result<(), SimulationError> {
        let snapshot = StepSnapshot {
            step: self.steps,
            time: self.clock.now(),
            scheduler: &self.scheduler,
            receiver: &self.receiver,
            transmitted,
        };

        for invariant in &mut self.invariants {
            if let Err(violation) = invariant.check(&snapshot) {
                warn!("{violation}");
                self.violations.push(violation);

                if self.violations.len() >= MAX_INVARIANT_VIOLATIONS {
                    return Err(SimulationError::TooManyInvariantViolations {
                        count: self.violations.len(),
                    });
                }
            }
        }
        Ok(())
    }

    fn report(&self, final_metrics: BTreeMap<String, PlaybackOutcome>) -> SimulationReport {
        SimulationReport {
            seed: self.seed(),
            policy: self.scheduler.policy_name().to_string(),
            channel: self.channel.name().to_string(),
            steps: self.steps,
            simulated_time: self.clock.elapsed(),
            frames_delivered: self.frames_delivered,
            arrivals: self.scheduler.arrival_count(),
            frames_buffered: self.receiver.buffered(),
            final_metrics,
            previews: self.previews.clone(),
            violations: self.violations.clone(),
        }
    }
}
