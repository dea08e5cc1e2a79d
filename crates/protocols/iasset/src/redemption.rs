//! Redemption Calculator
//!
//! How much of an asset can be redeemed against one position. Redeeming `x`
//! units at price `p` removes `x * p` lovelace of collateral and burns `x`
//! units of debt, minus a reimbursement fee the position keeps. The
//! uncapped amount restores the position to the redemption ratio; the
//! capped amount additionally keeps the minimum collateral in place.

use bastion_core::{
    ceil_div, fee_from_percentage, floor_div, saturate_i64, AssetAmount, FixedPoint, Lovelace,
    ONE_HUNDRED_PERCENT_RAW, UNIT,
};

/// Redeemable amounts for one position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedemptionCap {
    /// Amount that brings the position back to the redemption ratio
    pub uncapped: AssetAmount,
    /// Amount that may actually be redeemed
    pub capped: AssetAmount,
}

impl RedemptionCap {
    pub const NONE: Self = Self {
        uncapped: 0,
        capped: 0,
    };
}

/// Units to redeem so the post-redemption collateral ratio equals
/// `redemption_ratio`.
///
/// With `r = redemption_ratio / 100%`:
///   (C - x*p) / ((M - x) * p) = r  =>  x = (r*M - C/p) / (r - 1)
///
/// Rounded up, then clamped to `[0, minted_amt]`. A position already at or
/// above the ratio yields 0.
pub fn calculate_uncapped_redemption(
    collateral: Lovelace,
    minted_amt: AssetAmount,
    price: FixedPoint,
    redemption_ratio: FixedPoint,
) -> AssetAmount {
    let hundred = ONE_HUNDRED_PERCENT_RAW as i128;
    if minted_amt <= 0 || !price.is_positive() || (redemption_ratio.raw() as i128) <= hundred {
        return 0;
    }

    let rmr = redemption_ratio.raw() as i128;
    let p = price.raw() as i128;

    // Both sides scaled by 100% * p to stay in integers
    let numerator = rmr * minted_amt as i128 * p - collateral as i128 * UNIT as i128 * hundred;
    let denominator = p * (rmr - hundred);

    saturate_i64(ceil_div(numerator, denominator).clamp(0, minted_amt as i128))
}

/// Collateral left after redeeming `redeemed` units
pub fn collateral_after_redemption(
    collateral: Lovelace,
    redeemed: AssetAmount,
    price: FixedPoint,
    reimbursement_percentage: FixedPoint,
) -> Lovelace {
    let redeemed_value = price.mul_int(redeemed);
    collateral - redeemed_value + fee_from_percentage(reimbursement_percentage, redeemed_value)
}

/// Uncapped and min-collateral-capped redemption amounts.
///
/// `capped <= uncapped` always holds, and redeeming `capped` never leaves
/// less than `min_collateral` behind.
pub fn calculate_redemption_cap(
    collateral: Lovelace,
    minted_amt: AssetAmount,
    price: FixedPoint,
    redemption_ratio: FixedPoint,
    reimbursement_percentage: FixedPoint,
    min_collateral: Lovelace,
) -> RedemptionCap {
    let uncapped = calculate_uncapped_redemption(collateral, minted_amt, price, redemption_ratio);
    if uncapped <= 0 {
        return RedemptionCap::NONE;
    }

    // Already at (or below) the floor: nothing can leave
    if collateral <= min_collateral {
        return RedemptionCap {
            uncapped,
            capped: 0,
        };
    }

    let leaves_enough = |x: AssetAmount| {
        collateral_after_redemption(collateral, x, price, reimbursement_percentage)
            >= min_collateral
    };

    if leaves_enough(uncapped) {
        return RedemptionCap {
            uncapped,
            capped: uncapped,
        };
    }

    // Largest x with C - x*p*(1 - g) = min_collateral, as an upper bound
    let hundred = ONE_HUNDRED_PERCENT_RAW as i128;
    let g = (reimbursement_percentage.raw() as i128).clamp(0, hundred);
    let estimate = if g >= hundred {
        uncapped as i128
    } else {
        floor_div(
            (collateral - min_collateral) as i128 * UNIT as i128 * hundred,
            price.raw() as i128 * (hundred - g),
        )
    };
    let upper = saturate_i64(estimate.clamp(0, uncapped as i128));

    // Fee rounding can push the estimate a few units over the floor.
    // Binary search for the largest amount that still leaves enough.
    let mut lower = 0;
    let mut upper = upper;
    if !leaves_enough(upper) {
        while upper - lower > 1 {
            let mid = lower + (upper - lower) / 2;
            if leaves_enough(mid) {
                lower = mid;
            } else {
                upper = mid;
            }
        }
        upper = lower;
    }

    RedemptionCap {
        uncapped,
        capped: upper,
    }
}
