// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Weighted-random splitting.
//!
//! Each fragment is drawn uniformly from `[target / 2, target * 3 / 2]`
//! where `target = total / count`. A draw that would reach the remainder is
//! replaced by the remainder, and the last fragment always takes whatever
//! is left, so fragments sum to the total exactly.

use rand::Rng;

use super::{ensure_sum, SplitError};
use crate::ledger::{push_output, Amount, Outputs};

/// Split `total` into at most `count` random fragments.
pub fn split_amount<R: Rng + ?Sized>(
    rng: &mut R,
    total: Amount,
    count: usize,
) -> Result<Vec<Amount>, SplitError> {
    if total.is_zero() {
        return Err(SplitError::ZeroAmount);
    }
    if count == 0 {
        return Err(SplitError::NoFragments);
    }

    let units = total.units();
    let count = (count as u64).min(units);
    let target = units / count;
    let low = (target / 2).max(1);
    let high = (target + target / 2).max(low);

    let mut fragments = Vec::with_capacity(count as usize);
    let mut remaining = units;
    for _ in 1..count {
        let draw = rng.gen_range(low..=high);
        if draw >= remaining {
            break;
        }
        fragments.push(Amount::from_units(draw));
        remaining -= draw;
    }
    fragments.push(Amount::from_units(remaining));

    ensure_sum(&fragments, total)?;
    Ok(fragments)
}

/// Split `total` into a random number of fragments in `min..=max`.
pub fn split_random_count<R: Rng + ?Sized>(
    rng: &mut R,
    total: Amount,
    min: usize,
    max: usize,
) -> Result<Vec<Amount>, SplitError> {
    if min == 0 || min > max {
        return Err(SplitError::InvalidRange { min, max });
    }
    let count = rng.gen_range(min..=max);
    split_amount(rng, total, count)
}

/// Split `total` across a fixed set of addresses, one fragment each.
///
/// When an early draw takes the remainder, the trailing addresses receive
/// nothing.
pub fn split_across<R: Rng + ?Sized>(
    rng: &mut R,
    total: Amount,
    addresses: &[String],
) -> Result<Outputs, SplitError> {
    let fragments = split_amount(rng, total, addresses.len())?;
    let mut outputs = Outputs::new();
    for (address, amount) in addresses.iter().zip(fragments) {
        push_output(&mut outputs, address, amount);
    }
    Ok(outputs)
}

/// Pick `count` distinct addresses at random, giving up after
/// `max_attempts` draws.
pub fn pick_addresses<R: Rng + ?Sized>(
    rng: &mut R,
    addresses: &[String],
    count: usize,
    max_attempts: usize,
) -> Result<Vec<String>, SplitError> {
    let mut picked: Vec<String> = Vec::with_capacity(count);
    if !addresses.is_empty() {
        for _ in 0..max_attempts {
            if picked.len() == count {
                break;
            }
            let candidate = &addresses[rng.gen_range(0..addresses.len())];
            if !picked.contains(candidate) {
                picked.push(candidate.clone());
            }
        }
    }

    if picked.len() < count {
        return Err(SplitError::NotEnoughAddresses {
            wanted: count,
            found: picked.len(),
        });
    }
    Ok(picked)
}
