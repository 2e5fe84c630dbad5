//! First-in-first-out scheduling across streamers.

use std::collections::BTreeMap;

use tracing::{trace, warn};

use super::{FifoSettings, FifoStallPolicy, SchedulerError, SchedulingPolicy};
use crate::clock::DeterministicRng;
use crate::stream::{Frame, Streamer};

/// Returns frames strictly in global arrival order.
///
/// A cursor holds the next expected order. Frames peeked at the head of a
/// streamer's top layer but not yet due are remembered in a waiting room
/// (order -> streamer index) so the owner is found without rescanning.
/// Each transmitted frame comes from a random layer of its streamer.
#[derive(Debug)]
pub struct FifoPolicy {
    cursor: u64,
    waiting_room: BTreeMap<u64, usize>,
    settings: FifoSettings,
}

impl FifoPolicy {
    pub fn new(settings: FifoSettings) -> Self {
        Self {
            cursor: 0,
            waiting_room: BTreeMap::new(),
            settings,
        }
    }

    /// Next order the policy will transmit.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of peeked frames waiting for their turn.
    pub fn waiting(&self) -> usize {
        self.waiting_room.len()
    }

    /// Finds the streamer whose oldest frame carries the cursor's order,
    /// recording every other head frame in the waiting room.
    fn scan(&mut self, streamers: &[Streamer]) -> Option<usize> {
        for (index, streamer) in streamers.iter().enumerate() {
            let Some(order) = head_order(streamer) else {
                continue;
            };
            if order == self.cursor {
                return Some(index);
            }
            self.waiting_room.insert(order, index);
        }
        None
    }

    /// Applies the stall policy. Returns false if the decision must end.
    fn recover_from_stall(
        &mut self,
        streamers: &[Streamer],
        collected: usize,
        rounds: usize,
    ) -> Result<bool, SchedulerError> {
        match self.settings.stall_policy {
            FifoStallPolicy::Skip => {
                let Some(oldest) = streamers.iter().filter_map(head_order).min() else {
                    return Ok(false);
                };
                warn!(
                    "FIFO order {} never arrived, skipping to order {}",
                    self.cursor, oldest
                );
                self.cursor = oldest;
                self.waiting_room = self.waiting_room.split_off(&oldest);
                Ok(true)
            }
            FifoStallPolicy::Block if collected == 0 => Err(SchedulerError::FifoStalled {
                expected: self.cursor,
                rounds,
            }),
            FifoStallPolicy::Block => Ok(false),
        }
    }
}

fn head_order(streamer: &Streamer) -> Option<u64> {
    streamer
        .top_layer()
        .and_then(|layer| layer.peek_front())
        .map(Frame::order)
}

fn pop_one(streamer: &mut Streamer, rng: &mut DeterministicRng) -> Result<Vec<Frame>, SchedulerError> {
    let layer = rng.index(streamer.layer_count());
    Ok(streamer.dequeue(layer, 1)?)
}

impl SchedulingPolicy for FifoPolicy {
    fn decide(
        &mut self,
        streamers: &mut [Streamer],
        max_frames: usize,
        rng: &mut DeterministicRng,
    ) -> Result<Option<Vec<Frame>>, SchedulerError> {
        let resident: usize = streamers
            .iter()
            .filter_map(Streamer::top_layer)
            .map(|layer| layer.len())
            .sum();
        if resident == 0 {
            return Ok(None);
        }

        let wanted = rng.inclusive(1, resident.min(max_frames));
        let mut frames = Vec::with_capacity(wanted);
        let mut rounds = 0;

        while frames.len() < wanted {
            let owner = match self.waiting_room.remove(&self.cursor) {
                Some(index) if head_order(&streamers[index]) == Some(self.cursor) => Some(index),
                _ => self.scan(streamers),
            };

            match owner {
                Some(index) => {
                    frames.extend(pop_one(&mut streamers[index], rng)?);
                    trace!("FIFO sent order {} from {}", self.cursor, streamers[index].name());
                    self.cursor += 1;
                    rounds = 0;
                }
                None => {
                    rounds += 1;
                    if rounds < self.settings.max_search_rounds {
                        continue;
                    }
                    if !self.recover_from_stall(streamers, frames.len(), rounds)? {
                        break;
                    }
                    rounds = 0;
                }
            }
        }

        Ok(Some(frames))
    }

    fn name(&self) -> &str {
        "fifo"
    }
}
