//! Priority-weighted scheduling.

use super::{SchedulerError, SchedulingPolicy, dequeue_random_batch};
use crate::clock::DeterministicRng;
use crate::stream::{Frame, Streamer};

/// Picks a non-empty streamer with probability proportional to its priority.
///
/// Layer and batch size are drawn as in [`RandomPolicy`](super::RandomPolicy).
/// When every candidate has priority zero the choice is uniform.
#[derive(Debug, Default)]
pub struct PriorityPolicy;

impl PriorityPolicy {
    pub fn new() -> Self {
        Self
    }
}

fn pick_weighted(candidates: &[(usize, u32)], rng: &mut DeterministicRng) -> Option<usize> {
    let total: u64 = candidates.iter().map(|&(_, weight)| u64::from(weight)).sum();
    if total == 0 {
        return rng.choose(candidates).map(|&(index, _)| index);
    }

    let mut target = (rng.uniform_f64() * total as f64) as u64;
    for &(index, weight) in candidates {
        let weight = u64::from(weight);
        if target < weight {
            return Some(index);
        }
        target -= weight;
    }
    candidates.last().map(|&(index, _)| index)
}

impl SchedulingPolicy for PriorityPolicy {
    fn decide(
        &mut self,
        streamers: &mut [Streamer],
        max_frames: usize,
        rng: &mut DeterministicRng,
    ) -> Result<Option<Vec<Frame>>, SchedulerError> {
        let candidates: Vec<(usize, u32)> = streamers
            .iter()
            .enumerate()
            .filter(|(_, streamer)| !streamer.is_empty())
            .map(|(index, streamer)| (index, streamer.priority()))
            .collect();

        let Some(chosen) = pick_weighted(&candidates, rng) else {
            return Ok(None);
        };
        let frames = dequeue_random_batch(&mut streamers[chosen], max_frames, rng)?;
        Ok(Some(frames))
    }

    fn name(&self) -> &str {
        "priority"
    }
}
