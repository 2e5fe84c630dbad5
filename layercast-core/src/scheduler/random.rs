//! Uniformly random scheduling.

use super::{SchedulerError, SchedulingPolicy, dequeue_random_batch};
use crate::clock::DeterministicRng;
use crate::stream::{Frame, Streamer};

/// Picks a random non-empty streamer, a random layer and a random batch size.
#[derive(Debug, Default)]
pub struct RandomPolicy;

impl RandomPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl SchedulingPolicy for RandomPolicy {
    fn decide(
        &mut self,
        streamers: &mut [Streamer],
        max_frames: usize,
        rng: &mut DeterministicRng,
    ) -> Result<Option<Vec<Frame>>, SchedulerError> {
        let non_empty: Vec<usize> = streamers
            .iter()
            .enumerate()
            .filter(|(_, streamer)| !streamer.is_empty())
            .map(|(index, _)| index)
            .collect();

        let Some(&chosen) = rng.choose(&non_empty) else {
            return Ok(None);
        };
        let frames = dequeue_random_batch(&mut streamers[chosen], max_frames, rng)?;
        Ok(Some(frames))
    }

    fn name(&self) -> &str {
        "random"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::tests::streamer;
    use crate::scheduler::{FifoSettings, PolicyKind, Scheduler};

    #[test]
    fn test_no_decision_when_empty() {
        let mut sched = Scheduler::with_policy(
            vec![streamer("Alice", 20.0, [30.0, 50.0])],
            PolicyKind::Random,
            3,
            FifoSettings::default(),
        )
        .unwrap();
        let mut rng = DeterministicRng::from_seed(5);

        assert_eq!(sched.decide(&mut rng).unwrap(), None);
        assert_eq!(sched.decide(&mut rng).unwrap(), None);
    }

    #[test]
    fn test_batch_bounded_by_layer_length_and_max() {
        let mut sched = Scheduler::with_policy(
            vec![
                streamer("Alice", 400.0, [30.0, 50.0]),
                streamer("Bob", 600.0, [30.0, 40.0]),
            ],
            PolicyKind::Random,
            3,
            FifoSettings::default(),
        )
        .unwrap();
        let mut rng = DeterministicRng::from_seed(6);
        sched.update(0.0, 5.0, &mut rng).unwrap();

        let mut decided = 0;
        loop {
            let lengths: Vec<usize> = sched
                .streamers()
                .iter()
                .map(|s| s.top_layer().unwrap().len())
                .collect();
            let Some(frames) = sched.decide(&mut rng).unwrap() else {
                break;
            };
            assert!(!frames.is_empty());
            assert!(frames.len() <= 3);

            let origin = frames[0].origin().to_string();
            let index = sched
                .streamers()
                .iter()
                .position(|s| s.name() == origin)
                .unwrap();
            assert!(frames.len() <= lengths[index]);
            assert!(frames.iter().all(|f| f.origin() == origin));
            decided += frames.len();

            let layer_lengths: Vec<usize> = sched.streamers()[index]
                .layers()
                .iter()
                .map(|layer| layer.len())
                .collect();
            assert!(layer_lengths.windows(2).all(|w| w[0] == w[1]));
        }

        assert!(sched.is_idle());
        assert_eq!(decided as u64, sched.arrival_count());
    }
}
