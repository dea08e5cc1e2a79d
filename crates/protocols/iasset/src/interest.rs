//! Interest Accrual
//!
//! Pure functions over the interest oracle. Every position of one asset shares
//! a monotonically increasing "unitary interest" accumulator (interest per
//! unit of debt at 10^18 precision). A position remembers the accumulator
//! value at its last settlement; the difference times its debt is what it owes.
//!
//! Divisions are chained in a fixed order so the results match the
//! validator bit for bit.

use bastion_core::constants::SECONDS_PER_YEAR;
use bastion_core::{
    fee_from_percentage, floor_div, saturate_i64, AssetAmount, FixedPoint, Lovelace, PosixTime,
    UNIT,
};

use crate::constants::UNITARY_INTEREST_PRECISION;
use crate::state::InterestOracleSnapshot;

/// Accumulator growth over `elapsed` seconds at `rate`.
///
/// `elapsed * rate * 10^18 / SECONDS_PER_YEAR / UNIT`
pub fn unitary_interest_delta(elapsed: PosixTime, rate: FixedPoint) -> i128 {
    if elapsed <= 0 {
        return 0;
    }
    let scaled = elapsed as i128 * rate.raw() as i128 * UNITARY_INTEREST_PRECISION;
    floor_div(
        floor_div(scaled, SECONDS_PER_YEAR as i128),
        UNIT as i128,
    )
}

/// Accumulator value at `now`, extrapolated from the oracle's last update
pub fn unitary_interest_at(oracle: &InterestOracleSnapshot, now: PosixTime) -> i128 {
    oracle.unitary_interest + unitary_interest_delta(now - oracle.last_updated, oracle.interest_rate)
}

/// Interest on `minted_amt` accrued between two instants at a fixed rate
fn interest_at_rate(elapsed: PosixTime, rate: FixedPoint, minted_amt: AssetAmount) -> i128 {
    if elapsed <= 0 {
        return 0;
    }
    let scaled = elapsed as i128 * rate.raw() as i128 * minted_amt as i128;
    floor_div(
        floor_div(scaled, SECONDS_PER_YEAR as i128),
        UNIT as i128,
    )
}

/// Interest owed by a position, in asset units.
///
/// When the oracle's accumulator has caught up with the position's snapshot,
/// interest is what the accumulator gained since the snapshot plus what the
/// current rate adds after the oracle's last update. Otherwise the position's
/// snapshot leads the oracle (it was taken by extrapolation, or inherited
/// through a merge) and interest runs at the current rate from
/// `last_settled`.
pub fn accrued_interest(
    now: PosixTime,
    unitary_interest_snapshot: i128,
    minted_amt: AssetAmount,
    last_settled: PosixTime,
    oracle: &InterestOracleSnapshot,
) -> AssetAmount {
    if minted_amt <= 0 {
        return 0;
    }

    let interest = if oracle.unitary_interest >= unitary_interest_snapshot {
        let from_previous_rates = floor_div(
            (oracle.unitary_interest - unitary_interest_snapshot) * minted_amt as i128,
            UNITARY_INTEREST_PRECISION,
        );
        let from_current_rate =
            interest_at_rate(now - oracle.last_updated, oracle.interest_rate, minted_amt);
        from_previous_rates + from_current_rate
    } else {
        interest_at_rate(now - last_settled, oracle.interest_rate, minted_amt)
    };

    saturate_i64(interest.max(0))
}

/// Interest in lovelace split between the fee collector and the treasury
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterestSplit {
    pub total: Lovelace,
    pub collector: Lovelace,
    pub treasury: Lovelace,
}

/// Split `interest_lovelace`: the collector takes its percentage, the
/// treasury the remainder.
pub fn split_interest(interest_lovelace: Lovelace, collector_portion: FixedPoint) -> InterestSplit {
    let total = interest_lovelace.max(0);
    let collector = fee_from_percentage(collector_portion, total);
    InterestSplit {
        total,
        collector,
        treasury: total - collector,
    }
}
