//! Amount arithmetic and fee policy.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An amount of the ledger's base unit. Balances can never go negative.
pub type Amount = u64;

/// Basis points in one whole.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Pot of a matched round: both stakes.
pub fn pot_for(stake: Amount) -> Option<Amount> {
    stake.checked_mul(2)
}

/// Sum amounts, failing on overflow.
pub fn checked_sum<I>(amounts: I) -> Option<Amount>
where
    I: IntoIterator<Item = Amount>,
{
    amounts
        .into_iter()
        .try_fold(0u64, |acc, amount| acc.checked_add(amount))
}

/// Protocol fee taken from the pot at settlement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FeePolicy {
    /// No fee.
    #[default]
    None,
    /// Fixed amount per settled round.
    Flat(Amount),
    /// Fraction of the pot, in basis points (rounded down).
    BasisPoints(u16),
}

impl FeePolicy {
    /// Fee owed on the given pot, or `None` if it would exceed the pot.
    pub fn fee_for(&self, pot: Amount) -> Option<Amount> {
        let fee = match *self {
            FeePolicy::None => 0,
            FeePolicy::Flat(amount) => amount,
            FeePolicy::BasisPoints(bps) => {
                // u128 keeps pot * bps from overflowing for large pots.
                ((pot as u128 * bps as u128) / BPS_DENOMINATOR as u128) as u64
            }
        };
        (fee <= pot).then_some(fee)
    }

    /// Whether this policy can ever charge a fee.
    pub fn charges_fee(&self) -> bool {
        match *self {
            FeePolicy::None => false,
            FeePolicy::Flat(amount) => amount > 0,
            FeePolicy::BasisPoints(bps) => bps > 0,
        }
    }

    /// Check the policy is well formed.
    pub fn validate(&self) -> Result<(), String> {
        if let FeePolicy::BasisPoints(bps) = *self {
            if bps as u64 > BPS_DENOMINATOR {
                return Err(format!(
                    "Fee of {} bps exceeds {} bps",
                    bps, BPS_DENOMINATOR
                ));
            }
        }
        Ok(())
    }
}

impl fmt::Display for FeePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeePolicy::None => write!(f, "none"),
            FeePolicy::Flat(amount) => write!(f, "flat {}", amount),
            FeePolicy::BasisPoints(bps) => write!(f, "{} bps", bps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_pot_for() {
        assert_eq!(pot_for(10_000), Some(20_000));
        assert_eq!(pot_for(u64::MAX), None);
    }

    #[test]
    fn test_checked_sum() {
        assert_eq!(checked_sum([1, 2, 3]), Some(6));
        assert_eq!(checked_sum([u64::MAX, 1]), None);
        assert_eq!(checked_sum(Vec::new()), Some(0));
    }

    #[test]
    fn test_fee_policies() {
        assert_eq!(FeePolicy::default(), FeePolicy::None);
        assert_eq!(FeePolicy::None.fee_for(20_000), Some(0));
        assert_eq!(FeePolicy::Flat(500).fee_for(20_000), Some(500));
        assert_eq!(FeePolicy::Flat(20_001).fee_for(20_000), None);
        assert_eq!(FeePolicy::BasisPoints(250).fee_for(20_000), Some(500));
        assert_eq!(FeePolicy::BasisPoints(10_000).fee_for(20_000), Some(20_000));
    }

    #[test]
    fn test_fee_policy_validation() {
        assert!(FeePolicy::BasisPoints(10_000).validate().is_ok());
        assert!(FeePolicy::BasisPoints(10_001).validate().is_err());
        assert!(!FeePolicy::Flat(0).charges_fee());
        assert!(FeePolicy::BasisPoints(1).charges_fee());
    }

    proptest! {
        #[test]
        fn bps_fee_never_exceeds_pot(pot in any::<u64>(), bps in 0u16..=10_000) {
            let fee = FeePolicy::BasisPoints(bps).fee_for(pot);
            prop_assert!(fee.is_some());
            prop_assert!(fee.unwrap() <= pot);
        }
    }
}
