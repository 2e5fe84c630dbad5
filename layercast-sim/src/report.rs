//! Results of a simulation run.

use std::collections::BTreeMap;
use std::fmt::Write;

use layercast_core::receiver::PlaybackOutcome;
use serde::Serialize;

use crate::invariants::InvariantViolation;

/// Read-only QoE snapshot taken during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    pub step: u64,
    pub time: f64,
    pub outcomes: BTreeMap<String, PlaybackOutcome>,
}

/// Result of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationReport {
    /// Seed used for reproduction
    pub seed: u64,
    /// Scheduling policy name
    pub policy: String,
    /// Channel model name
    pub channel: String,
    /// Steps executed
    pub steps: u64,
    /// Virtual seconds elapsed
    pub simulated_time: f64,
    /// Frames handed to the channel
    pub frames_delivered: u64,
    /// Frames generated per layer across all streamers
    pub arrivals: u64,
    /// Frames left in receiver buffers after the final playback
    pub frames_buffered: usize,
    /// Playback of everything deliverable at the end of the run
    pub final_metrics: BTreeMap<String, PlaybackOutcome>,
    pub previews: Vec<Preview>,
    pub violations: Vec<InvariantViolation>,
}

impl SimulationReport {
    /// Whether the run finished without invariant violations.
    pub fn success(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generates human-readable summary.
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        let _ = writeln!(summary, "Simulation Report (seed: {})", self.seed);
        let _ = writeln!(summary, "Policy: {}, channel: {}", self.policy, self.channel);
        let _ = writeln!(
            summary,
            "Steps: {}, simulated time: {:.3}s",
            self.steps, self.simulated_time
        );
        let _ = writeln!(
            summary,
            "Arrivals: {}, frames sent: {}, still buffered: {}",
            self.arrivals, self.frames_delivered, self.frames_buffered
        );

        summary.push_str("\nPlayback:\n");
        for (origin, outcome) in &self.final_metrics {
            let _ = writeln!(summary, "  {origin}: {outcome}");
        }

        if !self.previews.is_empty() {
            let _ = writeln!(summary, "\nPreviews taken: {}", self.previews.len());
        }

        if !self.violations.is_empty() {
            summary.push_str("\nInvariant violations:\n");
            for violation in &self.violations {
                let _ = writeln!(summary, "  - {violation}");
            }
        }

        summary
    }

    /// Serializes the full report, previews included, as pretty JSON.
    ///
    /// # Errors
    ///
    /// - `serde_json::Error` - If serialization fails
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercast_core::receiver::QoeMetrics;

    fn report() -> SimulationReport {
        let mut final_metrics = BTreeMap::new();
        final_metrics.insert(
            "alice".to_string(),
            PlaybackOutcome::Played(QoeMetrics {
                rebuffering_events: 2,
                rebuffering_time: 0.25,
                total_delay: 12.0,
                average_bitrate: 800.0,
                frames_played: 40,
            }),
        );
        final_metrics.insert("bob".to_string(), PlaybackOutcome::Empty);

        SimulationReport {
            seed: 9,
            policy: "fifo".to_string(),
            channel: "constant".to_string(),
            steps: 100,
            simulated_time: 5.0,
            frames_delivered: 40,
            arrivals: 55,
            frames_buffered: 0,
            final_metrics,
            previews: Vec::new(),
            violations: Vec::new(),
        }
    }

    #[test]
    fn test_summary_lists_origins() {
        let summary = report().summary();
        assert!(summary.contains("seed: 9"));
        assert!(summary.contains("alice: frames=40 rebuffering=2"));
        assert!(summary.contains("bob: empty"));
        assert!(!summary.contains("violations"));
    }

    #[test]
    fn test_report_serializes() {
        let json = serde_json::to_value(report()).unwrap();
        assert_eq!(json["seed"], 9);
        assert_eq!(json["final_metrics"]["bob"]["outcome"], "empty");
        assert_eq!(json["final_metrics"]["alice"]["metrics"]["frames_played"], 40);
    }
}
