// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Amount splitting.
//!
//! Two strategies break the link between what was deposited and what moves
//! on the other side:
//!
//! - [`flatten`]: digit decomposition into denominations (1000, 100, 10, 1)
//!   so every deposit looks like every other deposit
//! - [`randomize`]: weighted-random fragments spread across addresses
//!
//! All arithmetic is done in minimum units.

pub mod flatten;
pub mod randomize;

use crate::ledger::Amount;

pub use flatten::flatten;
pub use randomize::{pick_addresses, split_across, split_amount, split_random_count};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("cannot split a zero amount")]
    ZeroAmount,

    #[error("amount {0} is too small to split")]
    AmountTooSmall(Amount),

    #[error("fragments sum to {actual}, expected {expected}")]
    SumMismatch { expected: Amount, actual: Amount },

    #[error("fragment count must be at least 1")]
    NoFragments,

    #[error("invalid fragment range {min}..={max}")]
    InvalidRange { min: usize, max: usize },

    #[error("picked {found} of {wanted} addresses before giving up")]
    NotEnoughAddresses { wanted: usize, found: usize },

    #[error("fee percent {0} is out of range")]
    InvalidFee(String),
}

impl SplitError {
    pub fn code(&self) -> &'static str {
        match self {
            SplitError::ZeroAmount => "SPLIT_ZERO",
            SplitError::AmountTooSmall(_) => "SPLIT_TOO_SMALL",
            SplitError::SumMismatch { .. } => "SPLIT_SUM_MISMATCH",
            SplitError::NoFragments => "SPLIT_NO_FRAGMENTS",
            SplitError::InvalidRange { .. } => "SPLIT_RANGE",
            SplitError::NotEnoughAddresses { .. } => "SPLIT_ADDRESSES",
            SplitError::InvalidFee(_) => "SPLIT_FEE",
        }
    }
}

/// Check that `fragments` add up to `expected`.
fn ensure_sum(fragments: &[Amount], expected: Amount) -> Result<(), SplitError> {
    let actual: Amount = fragments.iter().sum();
    if actual == expected {
        Ok(())
    } else {
        Err(SplitError::SumMismatch { expected, actual })
    }
}
