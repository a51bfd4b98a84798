//! Partitioning of a bot list into bounded, shuffled batches.

use rand::seq::SliceRandom;

use crate::config::HARD_BATCH_CEILING;
use crate::core::{Batch, BatchId, BotIdentity, ConnectionParams, JoinRequest};

/// Requests smaller than this get one bot per batch.
const SMALL_REQUEST: usize = 4;
/// Requests at or above this size use the batch ceiling directly.
const LARGE_REQUEST: usize = 50;

/// Pick a batch size for `total` bots.
///
/// Small requests run one bot per runner, large ones use `ceiling`. In between
/// a divisor search balances batch count against batch size, preferring sizes
/// that divide `total` evenly, and never picks a size that would need more
/// batches than `host_slots` can run at once unless the ceiling forces it.
#[must_use]
pub fn adaptive_batch_size(total: usize, ceiling: usize, host_slots: usize) -> usize {
    let ceiling = ceiling.clamp(1, HARD_BATCH_CEILING);
    if total < SMALL_REQUEST {
        return 1;
    }
    if total >= LARGE_REQUEST {
        return ceiling;
    }
    let lower = total.div_ceil(host_slots.max(1)).max(2).min(ceiling);
    (lower..=ceiling)
        .min_by_key(|&size| {
            let batches = total.div_ceil(size);
            (batches.abs_diff(size), usize::from(total % size != 0), size)
        })
        .unwrap_or(ceiling)
}

/// Shuffle `bots` uniformly and slice them into groups of at most `max_per_batch`.
///
/// Every bot appears exactly once across the returned groups.
#[must_use]
pub fn split(mut bots: Vec<BotIdentity>, max_per_batch: usize) -> Vec<Vec<BotIdentity>> {
    let size = max_per_batch.clamp(1, HARD_BATCH_CEILING);
    bots.shuffle(&mut rand::rng());
    bots.chunks(size).map(<[BotIdentity]>::to_vec).collect()
}

/// Registry key for a batch: engine tag, run discriminator and sorted bot ids.
#[must_use]
pub fn batch_id(engine_tag: &str, run_id: &str, bots: &[BotIdentity]) -> BatchId {
    let mut ids: Vec<u64> = bots.iter().map(|b| b.id).collect();
    ids.sort_unstable();
    let ids = ids
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join("-");
    format!("{engine_tag}-{run_id}-{ids}")
}

/// Builds batches for a request.
#[derive(Debug, Clone)]
pub struct Batcher {
    engine_tag: String,
    ceiling: usize,
}

impl Batcher {
    /// Create a batcher tagging ids with `engine_tag`, never exceeding `ceiling` bots per batch.
    pub fn new(engine_tag: impl Into<String>, ceiling: usize) -> Self {
        Self {
            engine_tag: engine_tag.into(),
            ceiling: ceiling.clamp(1, HARD_BATCH_CEILING),
        }
    }

    /// Batch size ceiling.
    #[must_use]
    pub const fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Adaptive size for `total` bots on a host that can run `host_slots` batches.
    #[must_use]
    pub fn batch_size_for(&self, total: usize, host_slots: usize) -> usize {
        adaptive_batch_size(total, self.ceiling, host_slots)
    }

    /// Split the request's bots and attach the shared meeting fields.
    #[must_use]
    pub fn build(
        &self,
        request: &JoinRequest,
        run_id: &str,
        signature: &str,
        max_per_batch: usize,
    ) -> Vec<Batch> {
        split(request.bots.clone(), max_per_batch.min(self.ceiling))
            .into_iter()
            .map(|bots| Batch {
                id: batch_id(&self.engine_tag, run_id, &bots),
                bots,
                meeting_id: request.meeting_id.clone(),
                credential: request.credential.clone(),
                connection: ConnectionParams::optimized(signature.to_owned()),
                duration_minutes: request.duration_minutes,
            })
            .collect()
    }
}
