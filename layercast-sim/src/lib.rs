//! Layercast Sim - Deterministic experiment runner
//!
//! Drives a scheduler, a channel and a receiver from `layercast-core`
//! through fixed steps of virtual time, checks invariants along the way
//! and reports QoE per origin.

mod invariants;
mod report;
mod simulation;

pub use invariants::{
    Invariant, InvariantViolation, LayerSyncInvariant, MonotonicOrderInvariant,
    QueueLoadInvariant, StepSnapshot,
};
pub use report::{Preview, SimulationReport};
pub use simulation::{MAX_INVARIANT_VIOLATIONS, Simulation, SimulationError, StepOutcome};
