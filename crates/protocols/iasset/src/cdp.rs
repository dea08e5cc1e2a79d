//! CDP State Machine
//!
//! Transitions of a single collateralized debt position:
//!
//! ```text
//! open -> Active --adjust/redeem--> Active
//!                --close---------> (closed)
//!                --freeze--------> Frozen --liquidate--> Frozen remainder | (liquidated)
//!                                  Frozen* --merge-----> Frozen
//! ```
//!
//! Every transition is a pure function from the current position and the
//! ledger snapshots in [`CdpContext`] to an [`CdpOutcome`]: the successor
//! position (if any), the change in minted supply, and the lovelace each
//! party receives.
//!
//! Interest settled on adjust is paid by the owner alongside the
//! transaction. On close, redeem and freeze it comes out of the collateral.

use bastion_core::{
    fee_from_percentage, floor_div, saturate_i64, Address, AssetAmount, FixedPoint, Lovelace,
    OwnerId, PosixTime, ProtocolError, ProtocolParams, ONE_HUNDRED_PERCENT_RAW, UNIT,
};

use crate::interest::{accrued_interest, split_interest, unitary_interest_at, InterestSplit};
use crate::redemption::{calculate_redemption_cap, RedemptionCap};
use crate::stability_pool::{absorb_liquidation, PoolLiquidation};
use crate::state::{
    push_movement, CdpPosition, CdpRecord, Destination, EpochToScaleToSum, FeeState,
    IAssetConfig, InterestOracleSnapshot, PriceSnapshot, StabilityPoolSnapshot, ValueMovement,
};

/// Ledger snapshots a transition is computed against
#[derive(Debug, Clone, Copy)]
pub struct CdpContext<'a> {
    pub asset: &'a IAssetConfig,
    pub price: &'a PriceSnapshot,
    pub oracle: &'a InterestOracleSnapshot,
    pub params: &'a ProtocolParams,
    pub now: PosixTime,
}

/// Result of a CDP transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdpOutcome {
    /// Successor position, `None` when the position is consumed
    pub position: Option<CdpPosition>,
    /// Asset units minted (positive) or burned (negative)
    pub minted_delta: AssetAmount,
    /// The position's identity token is burned
    pub burns_identity_token: bool,
    pub movements: Vec<ValueMovement>,
}

/// Collateral ratio as a percentage (`150%` == `FixedPoint::percent(150)`).
///
/// `None` without debt or without a usable price.
pub fn collateral_ratio(
    collateral: Lovelace,
    minted_amt: AssetAmount,
    price: FixedPoint,
) -> Option<FixedPoint> {
    if minted_amt <= 0 || !price.is_positive() {
        return None;
    }
    let numerator = collateral as i128 * ONE_HUNDRED_PERCENT_RAW as i128 * UNIT as i128;
    let denominator = minted_amt as i128 * price.raw() as i128;
    Some(FixedPoint::from_raw(saturate_i64(floor_div(
        numerator,
        denominator,
    ))))
}

impl CdpContext<'_> {
    fn fresh_price(&self) -> Result<FixedPoint, ProtocolError> {
        self.price.price_at(self.now)
    }

    fn ensure_asset(&self, record: &CdpRecord) -> Result<(), ProtocolError> {
        if record.asset != self.asset.asset {
            return Err(ProtocolError::AssetMismatch {
                expected: self.asset.asset.to_string(),
                actual: record.asset.to_string(),
            });
        }
        Ok(())
    }

    /// Interest tracking anchored at `now`
    fn fresh_fee_state(&self) -> FeeState {
        FeeState::ActiveInterestTracking {
            last_settled: self.now,
            unitary_interest_snapshot: unitary_interest_at(self.oracle, self.now),
        }
    }

    /// Interest owed by an active record, valued in lovelace
    fn accrued_interest_lovelace(
        &self,
        record: &CdpRecord,
        price: FixedPoint,
    ) -> Result<Lovelace, ProtocolError> {
        let (last_settled, snapshot) = record.interest_tracking()?;
        let interest = accrued_interest(
            self.now,
            snapshot,
            record.minted_amt,
            last_settled,
            self.oracle,
        );
        Ok(price.mul_int(interest))
    }

    fn split(&self, interest_lovelace: Lovelace) -> InterestSplit {
        split_interest(
            interest_lovelace,
            self.asset.interest_collector_portion_percentage,
        )
    }

    /// Minimum collateral, then maintenance ratio when there is debt
    fn check_health(
        &self,
        collateral: Lovelace,
        minted_amt: AssetAmount,
        price: FixedPoint,
    ) -> Result<(), ProtocolError> {
        if collateral < self.asset.min_collateral_lovelace {
            return Err(ProtocolError::InsufficientCollateral {
                required: self.asset.min_collateral_lovelace,
                available: collateral,
            });
        }
        if let Some(ratio) = collateral_ratio(collateral, minted_amt, price) {
            if ratio < self.asset.maintenance_ratio {
                return Err(ProtocolError::CollateralRatioTooLow {
                    ratio_pct: ratio.to_string(),
                    required_pct: self.asset.maintenance_ratio.to_string(),
                });
            }
        }
        Ok(())
    }

    fn minting_fee(&self, minted: AssetAmount, price: FixedPoint) -> Lovelace {
        fee_from_percentage(
            self.asset.debt_minting_fee_percentage,
            price.mul_int(minted),
        )
    }
}

/// Open a new position
pub fn open_cdp(
    ctx: &CdpContext<'_>,
    owner: OwnerId,
    address: Address,
    collateral: Lovelace,
    minted_amt: AssetAmount,
) -> Result<CdpOutcome, ProtocolError> {
    ctx.asset.ensure_listed()?;
    let price = ctx.fresh_price()?;

    if collateral <= 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "collateral must be positive, got {}",
            collateral
        )));
    }
    if minted_amt < 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "minted amount cannot be negative, got {}",
            minted_amt
        )));
    }
    ctx.check_health(collateral, minted_amt, price)?;

    let mint_fee = ctx.minting_fee(minted_amt, price);
    let mut movements = Vec::new();
    push_movement(&mut movements, Destination::Collector, mint_fee);

    tracing::debug!(
        asset = %ctx.asset.asset,
        collateral,
        minted = minted_amt,
        mint_fee,
        "Opening CDP"
    );

    Ok(CdpOutcome {
        position: Some(CdpPosition {
            address,
            collateral,
            record: CdpRecord {
                owner: Some(owner),
                asset: ctx.asset.asset.clone(),
                minted_amt,
                fee_state: ctx.fresh_fee_state(),
            },
        }),
        minted_delta: minted_amt,
        burns_identity_token: false,
        movements,
    })
}

/// Deposit or withdraw collateral and mint or burn debt.
///
/// Settles interest, charges the minting fee on new debt and the collateral
/// fee on withdrawn collateral, and re-anchors interest tracking.
pub fn adjust_cdp(
    ctx: &CdpContext<'_>,
    position: &CdpPosition,
    collateral_delta: Lovelace,
    minted_delta: AssetAmount,
) -> Result<CdpOutcome, ProtocolError> {
    ctx.asset.ensure_listed()?;
    ctx.ensure_asset(&position.record)?;
    let price = ctx.fresh_price()?;

    let interest = ctx.accrued_interest_lovelace(&position.record, price)?;
    let split = ctx.split(interest);

    let new_minted = position.record.minted_amt + minted_delta;
    if new_minted < 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "cannot burn {} of {} outstanding",
            -minted_delta, position.record.minted_amt
        )));
    }
    let new_collateral = position.collateral + collateral_delta;
    if new_collateral < 0 {
        return Err(ProtocolError::InsufficientCollateral {
            required: -collateral_delta,
            available: position.collateral,
        });
    }

    if minted_delta > 0 || collateral_delta < 0 {
        ctx.check_health(new_collateral, new_minted, price)?;
    }

    let mint_fee = if minted_delta > 0 {
        ctx.minting_fee(minted_delta, price)
    } else {
        0
    };
    let (withdrawn, withdrawal_fee) = if collateral_delta < 0 {
        let fee = fee_from_percentage(ctx.params.collateral_fee_percentage, -collateral_delta);
        (-collateral_delta - fee, fee)
    } else {
        (0, 0)
    };

    let mut movements = Vec::new();
    push_movement(
        &mut movements,
        Destination::Collector,
        split.collector + mint_fee + withdrawal_fee,
    );
    push_movement(&mut movements, Destination::Treasury, split.treasury);
    push_movement(&mut movements, Destination::Owner, withdrawn);

    tracing::debug!(
        asset = %ctx.asset.asset,
        collateral_delta,
        minted_delta,
        interest,
        "Adjusting CDP"
    );

    Ok(CdpOutcome {
        position: Some(CdpPosition {
            address: position.address.clone(),
            collateral: new_collateral,
            record: CdpRecord {
                minted_amt: new_minted,
                fee_state: ctx.fresh_fee_state(),
                ..position.record.clone()
            },
        }),
        minted_delta,
        burns_identity_token: false,
        movements,
    })
}

/// Repay all debt and release the collateral.
///
/// Interest comes out of the collateral; the collateral fee applies to what
/// is left.
pub fn close_cdp(
    ctx: &CdpContext<'_>,
    position: &CdpPosition,
) -> Result<CdpOutcome, ProtocolError> {
    ctx.ensure_asset(&position.record)?;
    let price = ctx.fresh_price()?;

    let interest = ctx
        .accrued_interest_lovelace(&position.record, price)?
        .min(position.collateral);
    let split = ctx.split(interest);

    let remaining = position.collateral - split.total;
    let withdrawal_fee = fee_from_percentage(ctx.params.collateral_fee_percentage, remaining);

    let mut movements = Vec::new();
    push_movement(
        &mut movements,
        Destination::Collector,
        split.collector + withdrawal_fee,
    );
    push_movement(&mut movements, Destination::Treasury, split.treasury);
    push_movement(&mut movements, Destination::Owner, remaining - withdrawal_fee);

    tracing::debug!(
        asset = %ctx.asset.asset,
        burned = position.record.minted_amt,
        interest,
        "Closing CDP"
    );

    Ok(CdpOutcome {
        position: None,
        minted_delta: -position.record.minted_amt,
        burns_identity_token: true,
        movements,
    })
}

/// A redemption against one position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub outcome: CdpOutcome,
    /// Asset units actually redeemed
    pub redeemed: AssetAmount,
    pub cap: RedemptionCap,
}

/// Redeem up to `requested` units of debt for collateral at oracle price.
///
/// The redeemer receives the value of the redeemed units less the
/// reimbursement the position keeps, and pays the processing fee plus the
/// partial-redemption surcharge when stopping short of the full amount.
pub fn redeem_cdp(
    ctx: &CdpContext<'_>,
    position: &CdpPosition,
    requested: AssetAmount,
) -> Result<Redemption, ProtocolError> {
    ctx.ensure_asset(&position.record)?;
    let price = ctx.fresh_price()?;

    if requested <= 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "redemption must be positive, got {}",
            requested
        )));
    }

    let interest = ctx
        .accrued_interest_lovelace(&position.record, price)?
        .min(position.collateral);
    let split = ctx.split(interest);
    let collateral_after_interest = position.collateral - split.total;

    let cap = calculate_redemption_cap(
        collateral_after_interest,
        position.record.minted_amt,
        price,
        ctx.asset.redemption_ratio,
        ctx.asset.redemption_reimbursement_percentage,
        ctx.asset.min_collateral_lovelace,
    );
    if cap.capped <= 0 {
        return Err(ProtocolError::RedemptionExhausted);
    }

    let redeemed = requested.min(cap.capped);
    let redeemed_value = price.mul_int(redeemed);
    let reimbursement =
        fee_from_percentage(ctx.asset.redemption_reimbursement_percentage, redeemed_value);
    let processing_fee =
        fee_from_percentage(ctx.asset.redemption_processing_fee_percentage, redeemed_value);
    let partial_fee = if redeemed < cap.uncapped {
        ctx.params.partial_redemption_extra_fee_lovelace
    } else {
        0
    };

    let mut movements = Vec::new();
    push_movement(&mut movements, Destination::Redeemer, redeemed_value - reimbursement);
    push_movement(
        &mut movements,
        Destination::Collector,
        processing_fee + partial_fee + split.collector,
    );
    push_movement(&mut movements, Destination::Treasury, split.treasury);
    push_movement(&mut movements, Destination::Position, reimbursement);

    tracing::debug!(
        asset = %ctx.asset.asset,
        requested,
        redeemed,
        uncapped = cap.uncapped,
        capped = cap.capped,
        "Redeeming against CDP"
    );

    let outcome = CdpOutcome {
        position: Some(CdpPosition {
            address: position.address.clone(),
            collateral: collateral_after_interest - redeemed_value + reimbursement,
            record: CdpRecord {
                minted_amt: position.record.minted_amt - redeemed,
                fee_state: ctx.fresh_fee_state(),
                ..position.record.clone()
            },
        }),
        minted_delta: -redeemed,
        burns_identity_token: false,
        movements,
    };

    Ok(Redemption {
        outcome,
        redeemed,
        cap,
    })
}

/// Freeze an undercollateralized position ahead of liquidation.
///
/// Interest is capped at what brings the position to exactly 100%; the
/// liquidation processing fee is the smaller of its percentage of the
/// post-interest collateral and of the debt value. Fees stay in the position
/// until it is liquidated.
pub fn freeze_cdp(
    ctx: &CdpContext<'_>,
    position: &CdpPosition,
) -> Result<CdpOutcome, ProtocolError> {
    ctx.ensure_asset(&position.record)?;
    let price = ctx.fresh_price()?;
    let record = &position.record;

    let interest = ctx.accrued_interest_lovelace(record, price)?;
    let debt_value = price.mul_int(record.minted_amt);
    let interest = interest.min((position.collateral - debt_value).max(0));
    let collateral_after_interest = position.collateral - interest;

    let threshold = ctx.asset.liquidation_ratio;
    match collateral_ratio(collateral_after_interest, record.minted_amt, price) {
        Some(ratio) if ratio < threshold => {}
        ratio => {
            return Err(ProtocolError::NotLiquidatable {
                ratio_pct: ratio.map_or_else(|| "inf".to_string(), |r| r.to_string()),
                threshold_pct: threshold.to_string(),
            })
        }
    }

    let split = ctx.split(interest);
    let processing_pct = ctx.asset.liquidation_processing_fee_percentage;
    let liquidation_fee = fee_from_percentage(processing_pct, collateral_after_interest)
        .min(fee_from_percentage(processing_pct, debt_value));

    let fee_state = FeeState::FrozenAccumulatedFees {
        lovelaces_treasury: split.treasury + liquidation_fee,
        lovelaces_stakers: split.collector,
    };

    tracing::debug!(
        asset = %ctx.asset.asset,
        interest,
        liquidation_fee,
        "Freezing CDP"
    );

    Ok(CdpOutcome {
        position: Some(CdpPosition {
            address: position.address.clone(),
            collateral: position.collateral,
            record: CdpRecord {
                owner: None,
                asset: record.asset.clone(),
                minted_amt: record.minted_amt,
                fee_state,
            },
        }),
        minted_delta: 0,
        burns_identity_token: false,
        movements: Vec::new(),
    })
}

/// A liquidation of a frozen position into the stability pool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liquidation {
    pub outcome: CdpOutcome,
    pub pool: PoolLiquidation,
}

/// Burn a frozen position's debt against the stability pool.
///
/// The pool burns as much debt as it holds and receives the collateral left
/// after fees in proportion. A partially covered position is re-emitted
/// with the rest of its debt and collateral and empty fee buckets.
pub fn liquidate_cdp(
    position: &CdpPosition,
    pool: &StabilityPoolSnapshot,
    history: &EpochToScaleToSum,
) -> Result<Liquidation, ProtocolError> {
    let record = &position.record;
    let (treasury_fee, stakers_fee) = record.accumulated_fees()?;

    let pool_balance = pool.asset_balance();
    if pool_balance <= 0 {
        return Err(ProtocolError::EmptyStabilityPool);
    }
    if record.minted_amt <= 0 {
        return Err(ProtocolError::invalid_amount(
            "frozen position has no debt to liquidate",
        ));
    }

    let treasury_paid = treasury_fee.clamp(0, position.collateral);
    let stakers_paid = stakers_fee.clamp(0, position.collateral - treasury_paid);
    let available = position.collateral - treasury_paid - stakers_paid;

    let burn_amt = record.minted_amt.min(pool_balance);
    let absorbed =
        (available as i128 * burn_amt as i128 / record.minted_amt as i128) as Lovelace;

    let pool_result = absorb_liquidation(pool, history, burn_amt, absorbed)?;

    let partial = burn_amt < record.minted_amt;
    let remainder = partial.then(|| CdpPosition {
        address: position.address.clone(),
        collateral: available - absorbed,
        record: CdpRecord {
            owner: None,
            asset: record.asset.clone(),
            minted_amt: record.minted_amt - burn_amt,
            fee_state: FeeState::FrozenAccumulatedFees {
                lovelaces_treasury: 0,
                lovelaces_stakers: 0,
            },
        },
    });

    let mut movements = Vec::new();
    push_movement(&mut movements, Destination::Treasury, treasury_paid);
    push_movement(&mut movements, Destination::Collector, stakers_paid);
    push_movement(&mut movements, Destination::StabilityPool, absorbed);

    tracing::debug!(
        asset = %record.asset,
        burned = burn_amt,
        absorbed,
        partial,
        "Liquidating CDP"
    );

    Ok(Liquidation {
        outcome: CdpOutcome {
            position: remainder,
            minted_delta: -burn_amt,
            burns_identity_token: !partial,
            movements,
        },
        pool: pool_result,
    })
}

/// Combine frozen positions of one asset into a single frozen position.
///
/// The output sits at the first input's address.
pub fn merge_cdps(positions: &[CdpPosition]) -> Result<CdpOutcome, ProtocolError> {
    let (main, rest) = match positions {
        [main, rest @ ..] if !rest.is_empty() => (main, rest),
        _ => {
            return Err(ProtocolError::MergeArity {
                count: positions.len(),
            })
        }
    };

    if let Some(other) = rest.iter().find(|p| p.record.asset != main.record.asset) {
        return Err(ProtocolError::AssetMismatch {
            expected: main.record.asset.to_string(),
            actual: other.record.asset.to_string(),
        });
    }

    let mut collateral: Lovelace = 0;
    let mut minted_amt: AssetAmount = 0;
    let mut lovelaces_treasury: Lovelace = 0;
    let mut lovelaces_stakers: Lovelace = 0;

    for position in positions {
        collateral = merge_sum(collateral, position.collateral, "collateral")?;
        minted_amt = merge_sum(minted_amt, position.record.minted_amt, "minted amount")?;
        match position.record.fee_state {
            FeeState::FrozenAccumulatedFees {
                lovelaces_treasury: treasury,
                lovelaces_stakers: stakers,
            } => {
                lovelaces_treasury = merge_sum(lovelaces_treasury, treasury, "treasury fees")?;
                lovelaces_stakers = merge_sum(lovelaces_stakers, stakers, "staker fees")?;
            }
            FeeState::ActiveInterestTracking { .. } => {
                tracing::warn!(
                    address = %position.address,
                    "Merging a position that is not frozen, its fees are ignored"
                );
            }
        }
    }

    tracing::debug!(
        inputs = positions.len(),
        collateral,
        minted = minted_amt,
        "Merging CDPs"
    );

    Ok(CdpOutcome {
        position: Some(CdpPosition {
            address: main.address.clone(),
            collateral,
            record: CdpRecord {
                owner: None,
                asset: main.record.asset.clone(),
                minted_amt,
                fee_state: FeeState::FrozenAccumulatedFees {
                    lovelaces_treasury,
                    lovelaces_stakers,
                },
            },
        }),
        minted_delta: 0,
        burns_identity_token: false,
        movements: Vec::new(),
    })
}

fn merge_sum(total: i64, amount: i64, what: &str) -> Result<i64, ProtocolError> {
    total
        .checked_add(amount)
        .ok_or_else(|| ProtocolError::invalid_amount(format!("merged {} overflows", what)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stability_pool::create_account;
    use crate::state::total_to;
    use bastion_core::constants::SECONDS_PER_YEAR;
    use bastion_core::AssetId;

    const POLICY: &str = "f66d78b4a3cb3d37afa0ec36461e51ecbde00f26c8f0a68f94b69880";

    fn sample_asset() -> IAssetConfig {
        IAssetConfig {
            asset: AssetId::new(POLICY, "iUSD"),
            redemption_ratio: FixedPoint::percent(150),
            maintenance_ratio: FixedPoint::percent(120),
            liquidation_ratio: FixedPoint::percent(110),
            debt_minting_fee_percentage: FixedPoint::percent(1),
            liquidation_processing_fee_percentage: FixedPoint::percent(2),
            stability_pool_withdrawal_fee_percentage: FixedPoint::ZERO,
            redemption_reimbursement_percentage: FixedPoint::percent(1),
            redemption_processing_fee_percentage: FixedPoint::percent(1),
            interest_collector_portion_percentage: FixedPoint::percent(40),
            min_collateral_lovelace: 10_000_000,
            delisted: false,
        }
    }

    fn sample_price(price: FixedPoint) -> PriceSnapshot {
        PriceSnapshot {
            price,
            expiration: PosixTime::MAX,
        }
    }

    fn sample_oracle() -> InterestOracleSnapshot {
        InterestOracleSnapshot {
            unitary_interest: 0,
            interest_rate: FixedPoint::from_raw(100_000),
            last_updated: 0,
        }
    }

    struct Fixture {
        asset: IAssetConfig,
        price: PriceSnapshot,
        oracle: InterestOracleSnapshot,
        params: ProtocolParams,
    }

    impl Fixture {
        fn new(price: FixedPoint) -> Self {
            Self {
                asset: sample_asset(),
                price: sample_price(price),
                oracle: sample_oracle(),
                params: ProtocolParams::default(),
            }
        }

        fn ctx(&self, now: PosixTime) -> CdpContext<'_> {
            CdpContext {
                asset: &self.asset,
                price: &self.price,
                oracle: &self.oracle,
                params: &self.params,
                now,
            }
        }
    }

    /// 300 ADA against 100 units, opened at t=0
    fn sample_position() -> CdpPosition {
        let fixture = Fixture::new(FixedPoint::from_int(2));
        open_cdp(
            &fixture.ctx(0),
            OwnerId::new("owner-pkh"),
            Address::new("addr1qxcdp"),
            300_000_000,
            100_000_000,
        )
        .unwrap()
        .position
        .unwrap()
    }

    fn frozen(collateral: Lovelace, minted: AssetAmount, treasury: Lovelace, stakers: Lovelace) -> CdpPosition {
        CdpPosition {
            address: Address::new("addr1qxfrozen"),
            collateral,
            record: CdpRecord {
                owner: None,
                asset: AssetId::new(POLICY, "iUSD"),
                minted_amt: minted,
                fee_state: FeeState::FrozenAccumulatedFees {
                    lovelaces_treasury: treasury,
                    lovelaces_stakers: stakers,
                },
            },
        }
    }

    #[test]
    fn test_collateral_ratio() {
        assert_eq!(
            collateral_ratio(300_000_000, 100_000_000, FixedPoint::from_int(2)),
            Some(FixedPoint::percent(150))
        );
        assert_eq!(collateral_ratio(300_000_000, 0, FixedPoint::ONE), None);
    }

    #[test]
    fn test_open_charges_minting_fee() {
        let fixture = Fixture::new(FixedPoint::from_int(2));
        let outcome = open_cdp(
            &fixture.ctx(0),
            OwnerId::new("owner-pkh"),
            Address::new("addr1qxcdp"),
            300_000_000,
            100_000_000,
        )
        .unwrap();

        assert_eq!(outcome.minted_delta, 100_000_000);
        assert_eq!(total_to(&outcome.movements, Destination::Collector), 2_000_000);
        let position = outcome.position.unwrap();
        assert_eq!(position.record.owner, Some(OwnerId::new("owner-pkh")));
        assert_eq!(
            position.record.fee_state,
            FeeState::ActiveInterestTracking {
                last_settled: 0,
                unitary_interest_snapshot: 0,
            }
        );
    }

    #[test]
    fn test_open_validations() {
        let mut fixture = Fixture::new(FixedPoint::from_int(2));
        let open = |f: &Fixture, collateral, minted| {
            open_cdp(
                &f.ctx(100),
                OwnerId::new("owner-pkh"),
                Address::new("addr1qxcdp"),
                collateral,
                minted,
            )
        };

        // 115% < 120%
        assert!(matches!(
            open(&fixture, 230_000_000, 100_000_000),
            Err(ProtocolError::CollateralRatioTooLow { .. })
        ));
        assert_eq!(
            open(&fixture, 5_000_000, 0),
            Err(ProtocolError::InsufficientCollateral {
                required: 10_000_000,
                available: 5_000_000,
            })
        );

        fixture.price.expiration = 99;
        assert_eq!(
            open(&fixture, 300_000_000, 100_000_000),
            Err(ProtocolError::StalePrice { expiration: 99, now: 100 })
        );

        fixture.price.expiration = PosixTime::MAX;
        fixture.asset.delisted = true;
        assert!(matches!(
            open(&fixture, 300_000_000, 100_000_000),
            Err(ProtocolError::DelistedAsset { .. })
        ));
    }

    #[test]
    fn test_adjust_settles_interest_and_mints() {
        let fixture = Fixture::new(FixedPoint::from_int(2));
        let position = sample_position();

        let outcome = adjust_cdp(&fixture.ctx(SECONDS_PER_YEAR), &position, 0, 10_000_000).unwrap();

        // 10M units of interest at price 2, 40% to the collector
        assert_eq!(
            total_to(&outcome.movements, Destination::Collector),
            8_000_000 + 200_000
        );
        assert_eq!(total_to(&outcome.movements, Destination::Treasury), 12_000_000);
        assert_eq!(outcome.minted_delta, 10_000_000);

        let adjusted = outcome.position.unwrap();
        assert_eq!(adjusted.record.minted_amt, 110_000_000);
        assert_eq!(adjusted.collateral, 300_000_000);
        assert_eq!(
            adjusted.record.fee_state,
            FeeState::ActiveInterestTracking {
                last_settled: SECONDS_PER_YEAR,
                unitary_interest_snapshot: 100_000_000_000_000_000,
            }
        );
    }

    #[test]
    fn test_adjust_withdrawal_fee() {
        let fixture = Fixture::new(FixedPoint::from_int(2));
        let position = sample_position();

        let outcome = adjust_cdp(&fixture.ctx(0), &position, -20_000_000, 0).unwrap();
        assert_eq!(total_to(&outcome.movements, Destination::Collector), 100_000);
        assert_eq!(total_to(&outcome.movements, Destination::Owner), 19_900_000);
        assert_eq!(outcome.position.unwrap().collateral, 280_000_000);

        assert!(matches!(
            adjust_cdp(&fixture.ctx(0), &position, -70_000_000, 0),
            Err(ProtocolError::CollateralRatioTooLow { .. })
        ));
        assert!(matches!(
            adjust_cdp(&fixture.ctx(0), &position, 0, -100_000_001),
            Err(ProtocolError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_adjust_rejects_delisted_asset() {
        let mut fixture = Fixture::new(FixedPoint::from_int(2));
        let position = sample_position();
        fixture.asset.delisted = true;

        assert!(matches!(
            adjust_cdp(&fixture.ctx(0), &position, 10_000_000, 0),
            Err(ProtocolError::DelistedAsset { .. })
        ));
        // closing stays possible
        assert!(close_cdp(&fixture.ctx(0), &position).is_ok());
    }

    #[test]
    fn test_adjust_rejects_frozen_position() {
        let fixture = Fixture::new(FixedPoint::from_int(2));
        let position = frozen(300_000_000, 100_000_000, 0, 0);
        assert_eq!(
            adjust_cdp(&fixture.ctx(0), &position, 1, 0),
            Err(ProtocolError::InconsistentFeeState {
                expected: FeeState::ACTIVE,
                found: FeeState::FROZEN,
            })
        );
    }

    #[test]
    fn test_close_returns_collateral_net_of_fees() {
        let fixture = Fixture::new(FixedPoint::from_int(2));
        let position = sample_position();

        let outcome = close_cdp(&fixture.ctx(SECONDS_PER_YEAR), &position).unwrap();
        assert!(outcome.position.is_none());
        assert!(outcome.burns_identity_token);
        assert_eq!(outcome.minted_delta, -100_000_000);

        // 20M interest, then 0.5% of the remaining 280M
        assert_eq!(total_to(&outcome.movements, Destination::Owner), 278_600_000);
        assert_eq!(total_to(&outcome.movements, Destination::Collector), 9_400_000);
        assert_eq!(total_to(&outcome.movements, Destination::Treasury), 12_000_000);
        let paid: Lovelace = outcome.movements.iter().map(|m| m.amount).sum();
        assert_eq!(paid, position.collateral);
    }

    #[test]
    fn test_partial_redemption() {
        // price up 25%: ratio drops to 120%
        let fixture = Fixture::new(FixedPoint::from_raw(2_500_000));
        let position = sample_position();

        let redemption = redeem_cdp(&fixture.ctx(0), &position, 20_000_000).unwrap();
        assert_eq!(redemption.cap.uncapped, 60_000_000);
        assert_eq!(redemption.redeemed, 20_000_000);

        let movements = &redemption.outcome.movements;
        assert_eq!(total_to(movements, Destination::Redeemer), 49_500_000);
        assert_eq!(total_to(movements, Destination::Collector), 500_000 + 10_000_000);
        assert_eq!(total_to(movements, Destination::Position), 500_000);

        let redeemed = redemption.outcome.position.unwrap();
        assert_eq!(redeemed.collateral, 250_500_000);
        assert_eq!(redeemed.record.minted_amt, 80_000_000);
        assert_eq!(redemption.outcome.minted_delta, -20_000_000);
    }

    #[test]
    fn test_full_redemption_restores_ratio() {
        let fixture = Fixture::new(FixedPoint::from_raw(2_500_000));
        let position = sample_position();

        let redemption = redeem_cdp(&fixture.ctx(0), &position, 100_000_000).unwrap();
        assert_eq!(redemption.redeemed, 60_000_000);
        // no surcharge when redeeming the full amount
        assert_eq!(total_to(&redemption.outcome.movements, Destination::Collector), 1_500_000);

        let redeemed = redemption.outcome.position.unwrap();
        assert_eq!(redeemed.collateral, 151_500_000);
        assert_eq!(redeemed.record.minted_amt, 40_000_000);
        let ratio = collateral_ratio(redeemed.collateral, redeemed.record.minted_amt, fixture.price.price).unwrap();
        assert!(ratio >= FixedPoint::percent(150));
    }

    #[test]
    fn test_redemption_settles_interest_first() {
        let fixture = Fixture::new(FixedPoint::from_raw(2_500_000));
        let position = sample_position();

        // 10M units of interest at 2.5 come out of the collateral first,
        // leaving 275M at 110% instead of 300M at 120%
        let redemption = redeem_cdp(&fixture.ctx(SECONDS_PER_YEAR), &position, 100_000_000).unwrap();
        assert_eq!(redemption.cap.uncapped, 80_000_000);
        assert_eq!(redemption.redeemed, 80_000_000);

        let movements = &redemption.outcome.movements;
        assert_eq!(total_to(movements, Destination::Redeemer), 198_000_000);
        assert_eq!(total_to(movements, Destination::Collector), 2_000_000 + 10_000_000);
        assert_eq!(total_to(movements, Destination::Treasury), 15_000_000);
        assert_eq!(total_to(movements, Destination::Position), 2_000_000);

        let redeemed = redemption.outcome.position.unwrap();
        assert_eq!(redeemed.collateral, 77_000_000);
        assert_eq!(redeemed.record.minted_amt, 20_000_000);
        assert_eq!(
            redeemed.record.fee_state,
            FeeState::ActiveInterestTracking {
                last_settled: SECONDS_PER_YEAR,
                unitary_interest_snapshot: 100_000_000_000_000_000,
            }
        );

        let interest = 25_000_000;
        assert_eq!(
            redeemed.collateral + total_to(movements, Destination::Redeemer) + interest,
            position.collateral
        );
    }

    #[test]
    fn test_healthy_position_not_redeemable() {
        let fixture = Fixture::new(FixedPoint::from_int(2));
        assert_eq!(
            redeem_cdp(&fixture.ctx(0), &sample_position(), 1_000),
            Err(ProtocolError::RedemptionExhausted)
        );
    }

    #[test]
    fn test_freeze_records_fee_buckets() {
        // ratio 107% < 110%
        let fixture = Fixture::new(FixedPoint::from_raw(2_800_000));
        let position = sample_position();

        let outcome = freeze_cdp(&fixture.ctx(0), &position).unwrap();
        let frozen = outcome.position.unwrap();
        assert_eq!(frozen.record.owner, None);
        assert_eq!(frozen.collateral, 300_000_000);
        // min(2% of 300M, 2% of 280M)
        assert_eq!(
            frozen.record.fee_state,
            FeeState::FrozenAccumulatedFees {
                lovelaces_treasury: 5_600_000,
                lovelaces_stakers: 0,
            }
        );
    }

    #[test]
    fn test_freeze_caps_interest_at_full_collateralization() {
        let fixture = Fixture::new(FixedPoint::from_raw(2_800_000));
        let position = sample_position();

        // 28M interest owed, only 20M above the 280M debt value
        let outcome = freeze_cdp(&fixture.ctx(SECONDS_PER_YEAR), &position).unwrap();
        assert_eq!(
            outcome.position.unwrap().record.fee_state,
            FeeState::FrozenAccumulatedFees {
                lovelaces_treasury: 12_000_000 + 5_600_000,
                lovelaces_stakers: 8_000_000,
            }
        );
    }

    #[test]
    fn test_healthy_position_cannot_be_frozen() {
        let fixture = Fixture::new(FixedPoint::from_int(2));
        assert!(matches!(
            freeze_cdp(&fixture.ctx(0), &sample_position()),
            Err(ProtocolError::NotLiquidatable { .. })
        ));
    }

    #[test]
    fn test_partial_liquidation_conserves_collateral() {
        let position = frozen(300_000_000, 100_000_000, 17_600_000, 8_000_000);
        let pool = create_account(&StabilityPoolSnapshot::initial(0), 40_000_000).unwrap().pool;

        let liquidation = liquidate_cdp(&position, &pool, &EpochToScaleToSum::new()).unwrap();
        let outcome = &liquidation.outcome;
        assert_eq!(outcome.minted_delta, -40_000_000);
        assert!(!outcome.burns_identity_token);
        assert_eq!(total_to(&outcome.movements, Destination::StabilityPool), 109_760_000);
        assert_eq!(total_to(&outcome.movements, Destination::Treasury), 17_600_000);
        assert_eq!(total_to(&outcome.movements, Destination::Collector), 8_000_000);

        let remainder = outcome.position.as_ref().unwrap();
        assert_eq!(remainder.record.minted_amt, 60_000_000);
        assert_eq!(remainder.collateral, 164_640_000);
        assert_eq!(remainder.record.accumulated_fees(), Ok((0, 0)));

        let paid: Lovelace = outcome.movements.iter().map(|m| m.amount).sum();
        assert_eq!(paid + remainder.collateral, position.collateral);

        // the pool's whole stake was burned
        assert!(liquidation.pool.epoch_increased);
    }

    #[test]
    fn test_full_liquidation_burns_identity() {
        let position = frozen(300_000_000, 100_000_000, 17_600_000, 8_000_000);
        let pool = create_account(&StabilityPoolSnapshot::initial(0), 150_000_000).unwrap().pool;

        let liquidation = liquidate_cdp(&position, &pool, &EpochToScaleToSum::new()).unwrap();
        assert!(liquidation.outcome.position.is_none());
        assert!(liquidation.outcome.burns_identity_token);
        assert_eq!(
            total_to(&liquidation.outcome.movements, Destination::StabilityPool),
            274_400_000
        );
        assert_eq!(liquidation.pool.snapshot.asset_balance(), 50_000_000);
    }

    #[test]
    fn test_liquidation_requirements() {
        let position = frozen(300_000_000, 100_000_000, 0, 0);
        assert_eq!(
            liquidate_cdp(&position, &StabilityPoolSnapshot::initial(0), &EpochToScaleToSum::new()),
            Err(ProtocolError::EmptyStabilityPool)
        );

        let pool = create_account(&StabilityPoolSnapshot::initial(0), 1_000).unwrap().pool;
        assert!(matches!(
            liquidate_cdp(&sample_position(), &pool, &EpochToScaleToSum::new()),
            Err(ProtocolError::InconsistentFeeState { .. })
        ));
    }

    #[test]
    fn test_merge_sums_inputs() {
        let merged = merge_cdps(&[
            frozen(100_000_000, 30_000_000, 1_000_000, 2_000_000),
            frozen(50_000_000, 20_000_000, 3_000_000, 4_000_000),
        ])
        .unwrap()
        .position
        .unwrap();

        assert_eq!(merged.collateral, 150_000_000);
        assert_eq!(merged.record.minted_amt, 50_000_000);
        assert_eq!(merged.record.accumulated_fees(), Ok((4_000_000, 6_000_000)));
        assert_eq!(merged.address, Address::new("addr1qxfrozen"));
    }

    #[test]
    fn test_merge_ignores_fees_of_active_input() {
        let merged = merge_cdps(&[
            frozen(100_000_000, 30_000_000, 1_000_000, 2_000_000),
            sample_position(),
        ])
        .unwrap()
        .position
        .unwrap();
        assert_eq!(merged.record.minted_amt, 130_000_000);
        assert_eq!(merged.record.accumulated_fees(), Ok((1_000_000, 2_000_000)));
    }

    #[test]
    fn test_merge_validations() {
        assert_eq!(
            merge_cdps(&[frozen(1, 1, 0, 0)]),
            Err(ProtocolError::MergeArity { count: 1 })
        );
        assert_eq!(merge_cdps(&[]), Err(ProtocolError::MergeArity { count: 0 }));

        let mut other = frozen(1, 1, 0, 0);
        other.record.asset = AssetId::new(POLICY, "iBTC");
        assert!(matches!(
            merge_cdps(&[frozen(1, 1, 0, 0), other]),
            Err(ProtocolError::AssetMismatch { .. })
        ));
    }

    #[test]
    fn test_merge_rejects_overflowing_totals() {
        assert!(matches!(
            merge_cdps(&[frozen(i64::MAX, 1, 0, 0), frozen(1, 1, 0, 0)]),
            Err(ProtocolError::InvalidAmount { .. })
        ));
        assert!(matches!(
            merge_cdps(&[frozen(1, 1, i64::MAX, 0), frozen(1, 1, 1, 0)]),
            Err(ProtocolError::InvalidAmount { .. })
        ));
    }
}
