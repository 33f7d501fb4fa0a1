// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Digit-decomposition flattening.
//!
//! `1126.65` becomes `[1000, 100, 10, 10, 1, 1, 1, 1, 1, 1.65]`: each digit
//! of the whole part emits that many units of its place value, and the
//! fractional remainder rides on the last fragment.

use super::{ensure_sum, SplitError};
use crate::ledger::{Amount, UNITS_PER_COIN};

/// Number of fragments a single-fragment decomposition is spread across.
const EVEN_SPLIT: u64 = 10;

/// Flatten `amount` after deducting `fee_percent` percent of it.
pub fn flatten(amount: Amount, fee_percent: f64) -> Result<Vec<Amount>, SplitError> {
    let net = deduct_fee(amount, fee_percent)?;
    if net.is_zero() {
        return Err(SplitError::ZeroAmount);
    }

    let mut fragments = decompose(net);
    if fragments.len() <= 1 {
        fragments = split_evenly(net)?;
    }

    ensure_sum(&fragments, net)?;
    Ok(fragments)
}

/// `amount * (100 - fee) / 100`, rounded to the nearest unit.
pub fn deduct_fee(amount: Amount, fee_percent: f64) -> Result<Amount, SplitError> {
    if !fee_percent.is_finite() || !(0.0..100.0).contains(&fee_percent) {
        return Err(SplitError::InvalidFee(fee_percent.to_string()));
    }
    if fee_percent == 0.0 {
        return Ok(amount);
    }
    let net = amount.units() as f64 * (100.0 - fee_percent) / 100.0;
    Ok(Amount::from_units(net.round() as u64))
}

fn decompose(amount: Amount) -> Vec<Amount> {
    let whole = amount.whole().to_string();
    let len = whole.len();
    let mut fragments = Vec::new();

    if amount.whole() > 0 {
        for (i, digit) in whole.bytes().enumerate() {
            let place = 10u64.pow((len - i - 1) as u32) * UNITS_PER_COIN;
            for _ in 0..(digit - b'0') {
                fragments.push(Amount::from_units(place));
            }
        }
    }

    match fragments.last_mut() {
        Some(last) => *last += Amount::from_units(amount.fraction()),
        None => fragments.push(Amount::from_units(amount.fraction())),
    }
    fragments
}

fn split_evenly(amount: Amount) -> Result<Vec<Amount>, SplitError> {
    let units = amount.units();
    if units < EVEN_SPLIT {
        return Err(SplitError::AmountTooSmall(amount));
    }

    let share = units / EVEN_SPLIT;
    let mut fragments = vec![Amount::from_units(share); EVEN_SPLIT as usize];
    if let Some(last) = fragments.last_mut() {
        *last += Amount::from_units(units % EVEN_SPLIT);
    }
    Ok(fragments)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coins(values: &[f64]) -> Vec<Amount> {
        values.iter().copied().map(Amount::from_coins).collect()
    }

    #[test]
    fn deposit_flattens_into_denominations() {
        let fragments = flatten(Amount::from_coins(1126.65), 0.0).unwrap();
        assert_eq!(
            fragments,
            coins(&[1000.0, 100.0, 10.0, 10.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.65])
        );
    }

    #[test]
    fn sums_are_preserved() {
        for value in [10.0, 100.99999999, 9999.99999999, 333.33333333] {
            let amount = Amount::from_coins(value);
            let fragments = flatten(amount, 0.0).unwrap();
            assert_eq!(fragments.iter().sum::<Amount>(), amount, "{value}");
        }
    }

    #[test]
    fn nines_produce_one_fragment_per_unit_of_each_digit() {
        let fragments = flatten(Amount::from_coins(9999.99999999), 0.0).unwrap();
        assert_eq!(fragments.len(), 36);
        assert_eq!(fragments[0], Amount::from_coins(1000.0));
        assert_eq!(fragments[35], Amount::from_coins(1.99999999));
    }

    #[test]
    fn single_fragment_is_split_ten_ways() {
        let fragments = flatten(Amount::from_coins(10.0), 0.0).unwrap();
        assert_eq!(fragments, vec![Amount::from_coins(1.0); 10]);

        let fragments = flatten(Amount::from_units(1_003), 0.0).unwrap();
        assert_eq!(fragments.len(), 10);
        assert_eq!(fragments[0], Amount::from_units(100));
        assert_eq!(fragments[9], Amount::from_units(103));
    }

    #[test]
    fn repeated_digit_stays_in_denominations() {
        let fragments = flatten(Amount::from_coins(20.0), 0.0).unwrap();
        assert_eq!(fragments, coins(&[10.0, 10.0]));
    }

    #[test]
    fn fractional_only_amounts_are_split_ten_ways() {
        let fragments = flatten(Amount::from_coins(0.5), 0.0).unwrap();
        assert_eq!(fragments, vec![Amount::from_coins(0.05); 10]);
    }

    #[test]
    fn fee_is_deducted_before_flattening() {
        let fragments = flatten(Amount::from_coins(200.0), 0.5).unwrap();
        assert_eq!(fragments.iter().sum::<Amount>(), Amount::from_coins(199.0));
        assert_eq!(fragments[0], Amount::from_coins(100.0));
    }

    #[test]
    fn tiny_and_zero_amounts_are_rejected() {
        assert_eq!(flatten(Amount::ZERO, 0.0), Err(SplitError::ZeroAmount));
        assert_eq!(
            flatten(Amount::from_units(9), 0.0),
            Err(SplitError::AmountTooSmall(Amount::from_units(9)))
        );
        assert!(matches!(
            flatten(Amount::from_coins(1.0), 100.0),
            Err(SplitError::InvalidFee(_))
        ));
    }
}
