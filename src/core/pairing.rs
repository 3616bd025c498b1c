use std::cmp::Ordering;
use std::collections::HashSet;

use crate::core::error::ArenaError;
use crate::models::{Cat, UnorderedPair};

/// Order cats by exposure: fewest matches first, then lowest rating, then id
pub fn sort_by_exposure(cats: &[Cat]) -> Vec<&Cat> {
    let mut sorted: Vec<&Cat> = cats.iter().collect();
    sorted.sort_by(|a, b| exposure_order(a, b));
    sorted
}

#[inline]
fn exposure_order(a: &Cat, b: &Cat) -> Ordering {
    a.match_count
        .cmp(&b.match_count)
        .then_with(|| a.rating.cmp(&b.rating))
        .then_with(|| a.id.cmp(&b.id))
}

/// Select the fairest pair from the whole pool
///
/// # Algorithm
/// 1. `first` is the least-exposed cat (lowest match count, then rating, then id)
/// 2. `second` is the other cat at that same match count whose rating is
///    closest to `first`'s; equidistant candidates resolve to the lowest id
/// 3. If `first` is alone at its match count, `second` is the next cat in
///    exposure order
///
/// Fails with [`ArenaError::InsufficientItems`] for pools of fewer than two cats.
pub fn select_pair(cats: &[Cat]) -> Result<(&Cat, &Cat), ArenaError> {
    if cats.len() < 2 {
        return Err(ArenaError::InsufficientItems { available: cats.len() });
    }

    let sorted = sort_by_exposure(cats);
    let first = sorted[0];

    let closest = sorted[1..]
        .iter()
        .copied()
        .take_while(|cat| cat.match_count == first.match_count)
        .min_by(|a, b| {
            a.rating
                .abs_diff(first.rating)
                .cmp(&b.rating.abs_diff(first.rating))
                .then_with(|| a.id.cmp(&b.id))
        });

    let second = closest.unwrap_or(sorted[1]);

    tracing::debug!(
        "Selected pair {} ({}, {} matches) vs {} ({}, {} matches)",
        first.id,
        first.rating,
        first.match_count,
        second.id,
        second.rating,
        second.match_count
    );

    Ok((first, second))
}

/// Select a pair the voter has not resolved yet
///
/// The fairest pair from [`select_pair`] wins when it is unseen. Otherwise all
/// unordered pairs are enumerated in exposure order and the first unseen one is
/// returned. `Ok(None)` means the voter has resolved every pair in the pool.
pub fn select_unseen_pair<'a>(
    cats: &'a [Cat],
    resolved: &HashSet<UnorderedPair>,
) -> Result<Option<(&'a Cat, &'a Cat)>, ArenaError> {
    let (first, second) = select_pair(cats)?;
    if !resolved.contains(&UnorderedPair::new(&first.id, &second.id)) {
        return Ok(Some((first, second)));
    }

    let sorted = sort_by_exposure(cats);
    for (i, a) in sorted.iter().enumerate() {
        for b in &sorted[i + 1..] {
            if !resolved.contains(&UnorderedPair::new(&a.id, &b.id)) {
                return Ok(Some((*a, *b)));
            }
        }
    }

    Ok(None)
}
