//! Set algebra over id lists
//!
//! Inputs are treated as sets. Outputs never repeat an id and keep the order in which
//! ids were first seen across the inputs, left to right.

use std::collections::HashSet;

use crate::error::{Error, Result};

/// `universe \ subset`. The universe must be non-empty and contain every id of `subset`.
pub fn invert(universe: &[u64], subset: &[u64]) -> Result<Vec<u64>> {
    if universe.is_empty() {
        return Err(Error::invalid("cannot invert against an empty universe"));
    }
    let members: HashSet<u64> = universe.iter().copied().collect();
    if let Some(stray) = subset.iter().find(|id| !members.contains(id)) {
        return Err(Error::invalid(format!("id {stray} is not part of the universe")));
    }

    let excluded: HashSet<u64> = subset.iter().copied().collect();
    Ok(distinct(universe.iter().copied().filter(|id| !excluded.contains(id))))
}

pub fn or(a: &[u64], b: &[u64]) -> Vec<u64> {
    distinct(a.iter().chain(b).copied())
}

/// Union of every set; no sets gives an empty result.
pub fn or_all<S: AsRef<[u64]>>(sets: &[S]) -> Vec<u64> {
    distinct(sets.iter().flat_map(|s| s.as_ref().iter().copied()))
}

pub fn and(a: &[u64], b: &[u64]) -> Vec<u64> {
    let other: HashSet<u64> = b.iter().copied().collect();
    distinct(a.iter().copied().filter(|id| other.contains(id)))
}

/// Ids present in every set; no sets gives an empty result.
pub fn and_all<S: AsRef<[u64]>>(sets: &[S]) -> Vec<u64> {
    let Some((first, rest)) = sets.split_first() else {
        return Vec::new();
    };
    let rest: Vec<HashSet<u64>> = rest
        .iter()
        .map(|s| s.as_ref().iter().copied().collect())
        .collect();
    distinct(
        first
            .as_ref()
            .iter()
            .copied()
            .filter(|id| rest.iter().all(|set| set.contains(id))),
    )
}

/// Symmetric difference.
pub fn exor(a: &[u64], b: &[u64]) -> Vec<u64> {
    let left: HashSet<u64> = a.iter().copied().collect();
    let right: HashSet<u64> = b.iter().copied().collect();
    distinct(
        a.iter()
            .copied()
            .filter(|id| !right.contains(id))
            .chain(b.iter().copied().filter(|id| !left.contains(id))),
    )
}

/// True iff every id of `b` is in `a`.
pub fn is_superset(a: &[u64], b: &[u64]) -> bool {
    let members: HashSet<u64> = a.iter().copied().collect();
    b.iter().all(|id| members.contains(id))
}

/// True iff `item` is in every set. Vacuously true for no sets.
pub fn all_contain<S: AsRef<[u64]>>(sets: &[S], item: u64) -> bool {
    sets.iter().all(|s| s.as_ref().contains(&item))
}

fn distinct(ids: impl Iterator<Item = u64>) -> Vec<u64> {
    let mut seen = HashSet::new();
    ids.filter(|id| seen.insert(*id)).collect()
}
