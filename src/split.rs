//! Share computation for multi-person expenses
//!
//! Pure arithmetic only. The policy of who counts as a participant (the
//! payer divides the bill but never gets their own record) belongs to the
//! caller; this module just splits an amount.

use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SplitError {
    #[error("split total must be positive, got {0}")]
    NonPositiveTotal(Decimal),
    #[error("split needs at least one participant")]
    NoParticipants,
}

/// Split `total` into `participants` shares that sum exactly to `total`.
///
/// Shares are computed at whole-rupee granularity: integer-divide, then hand
/// the residual out one rupee at a time to the earliest participants, so no
/// share differs from another by more than one rupee. A sub-rupee fraction
/// of the total (rare; amounts are normalized to whole rupees upstream)
/// rides on the first share to keep the sum exact.
pub fn split_shares(total: Decimal, participants: usize) -> Result<Vec<Decimal>, SplitError> {
    if total <= Decimal::ZERO {
        return Err(SplitError::NonPositiveTotal(total));
    }
    if participants == 0 {
        return Err(SplitError::NoParticipants);
    }

    let count = Decimal::from(participants as u64);
    let whole = total.trunc();
    let fraction = total - whole;

    let base = (whole / count).floor();
    let mut residual = whole - base * count;

    let mut shares = vec![base; participants];
    for share in &mut shares {
        if residual <= Decimal::ZERO {
            break;
        }
        *share += Decimal::ONE;
        residual -= Decimal::ONE;
    }
    shares[0] += fraction;

    Ok(shares)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn dinner_for_three() {
        let shares = split_shares(Decimal::from(3200), 3).unwrap();
        assert_eq!(
            shares,
            vec![Decimal::from(1067), Decimal::from(1067), Decimal::from(1066)]
        );
    }

    #[test]
    fn even_split_has_equal_shares() {
        let shares = split_shares(Decimal::from(3000), 3).unwrap();
        assert!(shares.iter().all(|s| *s == Decimal::from(1000)));
    }

    #[test]
    fn single_participant_takes_everything() {
        let shares = split_shares(Decimal::from(7000), 1).unwrap();
        assert_eq!(shares, vec![Decimal::from(7000)]);
    }

    #[test]
    fn rejects_non_positive_total() {
        assert_eq!(
            split_shares(Decimal::ZERO, 2),
            Err(SplitError::NonPositiveTotal(Decimal::ZERO))
        );
        assert!(split_shares(Decimal::from(-5), 2).is_err());
    }

    #[test]
    fn rejects_zero_participants() {
        assert_eq!(
            split_shares(Decimal::from(100), 0),
            Err(SplitError::NoParticipants)
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        // Shares always sum exactly to the total.
        #[test]
        fn prop_shares_sum_to_total(total in 1u64..10_000_000, n in 1usize..50) {
            let total = Decimal::from(total);
            let shares = split_shares(total, n).unwrap();
            prop_assert_eq!(shares.len(), n);
            let sum: Decimal = shares.iter().copied().sum();
            prop_assert_eq!(sum, total);
        }

        // For whole-rupee totals, no participant is short-changed by more
        // than one rupee.
        #[test]
        fn prop_spread_at_most_one_unit(total in 1u64..10_000_000, n in 1usize..50) {
            let shares = split_shares(Decimal::from(total), n).unwrap();
            let max = shares.iter().copied().max().unwrap();
            let min = shares.iter().copied().min().unwrap();
            prop_assert!(max - min <= Decimal::ONE);
        }

        // Residual rupees go to the earliest participants.
        #[test]
        fn prop_shares_never_increase(total in 1u64..1_000_000, n in 1usize..20) {
            let shares = split_shares(Decimal::from(total), n).unwrap();
            for pair in shares.windows(2) {
                prop_assert!(pair[0] >= pair[1]);
            }
        }
    }
}
