//! Winner selection
//!
//! Bonus weighting: an entrant's extra weight is the maximum of
//! {0, each non-cumulative bonus, the sum of cumulative bonuses}, and it
//! appears `1 + extra` times in the draw pool.
//!
//! The draw picks occurrences uniformly without replacement. Validity is
//! checked when an entrant is drawn, not when the pool is built, and every
//! drawn entrant (valid or not) has all of its occurrences removed.

use super::types::EntrantId;
use rand::Rng;
use std::future::Future;

/// Cap on a single entrant's extra weight, bounds pool memory
pub const MAX_EXTRA_WEIGHT: u32 = 10_000;

/// Combine one entrant's bonus values into its extra weight
///
/// Each item is `(amount, cumulative)`.
pub fn extra_weight<I>(bonuses: I) -> u32
where
    I: IntoIterator<Item = (u32, bool)>,
{
    let mut cumulative_sum: u32 = 0;
    let mut best: u32 = 0;
    for (amount, cumulative) in bonuses {
        if cumulative {
            cumulative_sum = cumulative_sum.saturating_add(amount);
        } else {
            best = best.max(amount);
        }
    }
    best.max(cumulative_sum).min(MAX_EXTRA_WEIGHT)
}

/// Occurrences an entrant gets in the draw pool
pub fn multiplicity<I>(bonuses: I) -> u32
where
    I: IntoIterator<Item = (u32, bool)>,
{
    1 + extra_weight(bonuses)
}

/// Weighted pool with O(1) swap-remove per occurrence
///
/// `slots` holds one entrant index per occurrence; `positions[e]` lists the
/// slots currently owned by entrant `e`.
#[derive(Debug, Clone)]
pub struct WeightedPool {
    entrants: Vec<EntrantId>,
    slots: Vec<usize>,
    positions: Vec<Vec<usize>>,
}

impl WeightedPool {
    /// Build from `(entrant, multiplicity)` pairs; zero multiplicity is skipped
    pub fn new(candidates: &[(EntrantId, u32)]) -> Self {
        let total: usize = candidates.iter().map(|(_, m)| *m as usize).sum();
        let mut entrants = Vec::with_capacity(candidates.len());
        let mut slots = Vec::with_capacity(total);
        let mut positions = Vec::with_capacity(candidates.len());

        for (entrant, count) in candidates {
            if *count == 0 {
                continue;
            }
            let idx = entrants.len();
            entrants.push(*entrant);
            let start = slots.len();
            slots.extend(std::iter::repeat(idx).take(*count as usize));
            positions.push((start..slots.len()).collect());
        }

        Self {
            entrants,
            slots,
            positions,
        }
    }

    /// Remaining occurrences
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Remaining occurrences of one entrant
    pub fn occurrences(&self, entrant: EntrantId) -> usize {
        self.entrants
            .iter()
            .position(|e| *e == entrant)
            .map(|idx| self.positions[idx].len())
            .unwrap_or(0)
    }

    fn pick<R: Rng>(&self, rng: &mut R) -> usize {
        self.slots[rng.gen_range(0..self.slots.len())]
    }

    /// Remove every occurrence of entrant `idx`
    fn remove_entrant(&mut self, idx: usize) {
        let mut owned = std::mem::take(&mut self.positions[idx]);
        // Descending order: the tail slot swapped in never belongs to `idx`
        owned.sort_unstable_by(|a, b| b.cmp(a));

        for slot in owned {
            let last = self.slots.len() - 1;
            self.slots.swap_remove(slot);
            if slot != last {
                let moved = self.slots[slot];
                if let Some(pos) = self.positions[moved].iter_mut().find(|p| **p == last) {
                    *pos = slot;
                }
            }
        }
    }
}

/// Draw up to `winner_count` distinct valid entrants, in draw order
///
/// Returns fewer winners (possibly none) when the pool runs out of valid
/// entrants; that is a normal outcome, not an error.
pub async fn draw<R, F, Fut>(
    mut pool: WeightedPool,
    winner_count: usize,
    rng: &mut R,
    mut is_valid: F,
) -> Vec<EntrantId>
where
    R: Rng,
    F: FnMut(EntrantId) -> Fut,
    Fut: Future<Output = bool>,
{
    let mut winners: Vec<EntrantId> = Vec::with_capacity(winner_count.min(pool.entrants.len()));
    let mut chosen = vec![false; pool.entrants.len()];

    while winners.len() < winner_count && !pool.is_empty() {
        let idx = pool.pick(rng);
        if chosen[idx] {
            pool.remove_entrant(idx);
            continue;
        }

        let entrant = pool.entrants[idx];
        if is_valid(entrant).await {
            chosen[idx] = true;
            winners.push(entrant);
        } else {
            log::debug!("Entrant {} rejected at draw time", entrant);
        }
        pool.remove_entrant(idx);
    }

    winners
}
