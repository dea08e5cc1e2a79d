//! Leverage Sizing
//!
//! Opening a leveraged position mints debt and immediately sells it to
//! liquidity providers for more collateral:
//!
//!   final_collateral = floor(base * L)
//!   minted           = floor(final_collateral / (price * ratio))
//!   needed           = final_collateral + mint_fee - base
//!   inflated         = needed + reimbursement(needed)
//!
//! `inflated` lovelace is drawn from liquidity records, each paid in the
//! minted asset at oracle price. All arithmetic stays in [`FixedPoint`].

use bastion_core::{
    fee_from_percentage, floor_div, saturate_i64, Address, AssetAmount, AssetId, FixedPoint,
    LeverageConfig, Lovelace, OwnerId, ProtocolError, ONE_HUNDRED_PERCENT_RAW, UNIT,
};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::cdp::{open_cdp, CdpContext, CdpOutcome};
use crate::state::{IAssetConfig, LiquidityRecord};

/// Amounts for one leverage target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeverageSizing {
    pub final_collateral: Lovelace,
    pub minted_amt: AssetAmount,
    pub mint_fee: Lovelace,
    /// Lovelace the position needs on top of the base collateral and fee
    pub lovelaces_needed: Lovelace,
    /// `lovelaces_needed` plus the providers' reimbursement
    pub lovelaces_with_reimbursement: Lovelace,
}

/// Size a position at `leverage` times `base_collateral`.
///
/// `collateral_ratio` is a percentage (`FixedPoint::percent(180)`).
pub fn size_leverage(
    asset: &IAssetConfig,
    price: FixedPoint,
    leverage: FixedPoint,
    base_collateral: Lovelace,
    collateral_ratio: FixedPoint,
) -> Result<LeverageSizing, ProtocolError> {
    if leverage < FixedPoint::ONE {
        return Err(ProtocolError::invalid_amount(format!(
            "leverage must be at least 1, got {}",
            leverage
        )));
    }
    if base_collateral <= 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "base collateral must be positive, got {}",
            base_collateral
        )));
    }
    if collateral_ratio <= FixedPoint::ONE_HUNDRED_PERCENT || !price.is_positive() {
        return Err(ProtocolError::invalid_amount(
            "collateral ratio must exceed 100% and price must be positive",
        ));
    }

    let final_collateral = Lovelace::try_from(floor_div(
        base_collateral as i128 * leverage.raw() as i128,
        UNIT as i128,
    ))
    .map_err(|_| sizing_overflow(leverage))?;
    let minted_amt = saturate_i64(floor_div(
        final_collateral as i128 * UNIT as i128 * ONE_HUNDRED_PERCENT_RAW as i128,
        price.raw() as i128 * collateral_ratio.raw() as i128,
    ));
    let mint_fee = fee_from_percentage(
        asset.debt_minting_fee_percentage,
        price.mul_int(minted_amt),
    );
    let lovelaces_needed = final_collateral
        .checked_add(mint_fee)
        .and_then(|total| total.checked_sub(base_collateral))
        .ok_or_else(|| sizing_overflow(leverage))?
        .max(0);
    let lovelaces_with_reimbursement = lovelaces_needed
        .checked_add(fee_from_percentage(
            asset.redemption_reimbursement_percentage,
            lovelaces_needed,
        ))
        .ok_or_else(|| sizing_overflow(leverage))?;

    Ok(LeverageSizing {
        final_collateral,
        minted_amt,
        mint_fee,
        lovelaces_needed,
        lovelaces_with_reimbursement,
    })
}

fn sizing_overflow(leverage: FixedPoint) -> ProtocolError {
    ProtocolError::invalid_amount(format!("leverage {} overflows the lovelace range", leverage))
}

/// Total lovelace on offer, saturating at `Lovelace::MAX`
fn total_on_offer(records: &[&LiquidityRecord]) -> Lovelace {
    records
        .iter()
        .fold(0, |total: Lovelace, r| total.saturating_add(r.lovelaces_to_spend.max(0)))
}

/// Liquidity records usable at `price`, largest first
pub fn eligible_liquidity<'a>(
    records: &'a [LiquidityRecord],
    asset: &AssetId,
    price: FixedPoint,
    min_lovelace: Lovelace,
) -> Vec<&'a LiquidityRecord> {
    let mut eligible: Vec<&LiquidityRecord> = records
        .iter()
        .filter(|r| &r.asset == asset && r.max_price >= price && r.lovelaces_to_spend >= min_lovelace)
        .collect();
    eligible.sort_by(|a, b| b.lovelaces_to_spend.cmp(&a.lovelaces_to_spend));
    eligible
}

/// Amount drawn from one liquidity record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidityDebit {
    pub record: LiquidityRecord,
    pub lovelaces: Lovelace,
    /// Asset units the provider receives
    pub iasset_amount: AssetAmount,
    /// Part of `lovelaces` the provider keeps
    pub reimbursement: Lovelace,
}

/// Greedily draw `required` lovelace from `candidates` in order
pub fn select_liquidity(
    candidates: &[&LiquidityRecord],
    required: Lovelace,
    price: FixedPoint,
    reimbursement_percentage: FixedPoint,
) -> Result<Vec<LiquidityDebit>, ProtocolError> {
    let mut debits = Vec::new();
    let mut remaining = required;

    for record in candidates {
        if remaining <= 0 {
            break;
        }
        if record.lovelaces_to_spend <= 0 {
            continue;
        }
        let lovelaces = remaining.min(record.lovelaces_to_spend);
        debits.push(LiquidityDebit {
            record: (*record).clone(),
            lovelaces,
            iasset_amount: price.div_int(lovelaces).unwrap_or(0),
            reimbursement: fee_from_percentage(reimbursement_percentage, lovelaces),
        });
        remaining -= lovelaces;
    }

    if remaining > 0 {
        return Err(ProtocolError::InsufficientLiquidity {
            required,
            available: total_on_offer(candidates),
        });
    }
    Ok(debits)
}

/// A leveraged opening: the new position and the liquidity funding it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeveragePlan {
    pub sizing: LeverageSizing,
    pub debits: Vec<LiquidityDebit>,
    pub cdp: CdpOutcome,
}

/// Plan a leveraged opening at `leverage` and `collateral_ratio`.
///
/// Records are drained largest first, or in random order when the config
/// asks for it so the same providers are not always hit.
#[allow(clippy::too_many_arguments)]
pub fn plan_leverage<R: Rng + ?Sized>(
    ctx: &CdpContext<'_>,
    config: &LeverageConfig,
    records: &[LiquidityRecord],
    owner: OwnerId,
    address: Address,
    leverage: FixedPoint,
    base_collateral: Lovelace,
    collateral_ratio: FixedPoint,
    rng: &mut R,
) -> Result<LeveragePlan, ProtocolError> {
    ctx.asset.ensure_listed()?;
    let price = ctx.price.price_at(ctx.now)?;

    let sizing = size_leverage(ctx.asset, price, leverage, base_collateral, collateral_ratio)?;
    let minted_value = price.mul_int(sizing.minted_amt);
    if sizing.lovelaces_with_reimbursement > minted_value {
        return Err(ProtocolError::invalid_amount(format!(
            "leverage {} needs {} lovelace but the minted debt is worth {}",
            leverage, sizing.lovelaces_with_reimbursement, minted_value
        )));
    }

    let mut candidates = eligible_liquidity(
        records,
        &ctx.asset.asset,
        price,
        ctx.params.min_liquidity_redemption_lovelace,
    );
    if config.randomize_liquidity_selection {
        candidates.shuffle(rng);
    }

    let debits = select_liquidity(
        &candidates,
        sizing.lovelaces_with_reimbursement,
        price,
        ctx.asset.redemption_reimbursement_percentage,
    )?;

    let cdp = open_cdp(
        ctx,
        owner,
        address,
        sizing.final_collateral,
        sizing.minted_amt,
    )?;

    tracing::debug!(
        asset = %ctx.asset.asset,
        leverage = %leverage,
        minted = sizing.minted_amt,
        records = debits.len(),
        "Planned leveraged CDP"
    );

    Ok(LeveragePlan {
        sizing,
        debits,
        cdp,
    })
}

/// Collateral ratio at which the minted debt exactly funds `leverage`.
///
/// `L * (1 - f * (1 + g)) / ((L - 1) * (1 + g))` as a percentage, with `f`
/// the minting fee and `g` the reimbursement. `None` for `L <= 1`.
pub fn collateral_ratio_from_leverage(
    leverage: FixedPoint,
    mint_fee_percentage: FixedPoint,
    reimbursement_percentage: FixedPoint,
) -> Option<FixedPoint> {
    if leverage <= FixedPoint::ONE {
        return None;
    }
    let f = mint_fee_percentage.percent_to_fraction();
    let one_plus_g = FixedPoint::ONE + reimbursement_percentage.percent_to_fraction();

    let numerator = leverage.checked_mul(FixedPoint::ONE - f.checked_mul(one_plus_g)?)?;
    let denominator = (leverage - FixedPoint::ONE).checked_mul(one_plus_g)?;
    let ratio = numerator.checked_div(denominator)?;
    Some(FixedPoint::from_raw(ratio.raw().checked_mul(100)?))
}

/// Highest leverage reachable at `collateral_ratio` with the liquidity on
/// offer. Returns `FixedPoint::ONE` when no leverage is possible.
///
/// Starts from the fee-free bound `1 + 1 / (r - 1)` and searches down for
/// the largest value whose sizing fits both the minted debt and the
/// available liquidity.
pub fn calculate_max_leverage(
    ctx: &CdpContext<'_>,
    records: &[LiquidityRecord],
    base_collateral: Lovelace,
    collateral_ratio: FixedPoint,
) -> Result<FixedPoint, ProtocolError> {
    let price = ctx.price.price_at(ctx.now)?;
    let ratio = collateral_ratio.percent_to_fraction();
    if ratio <= FixedPoint::ONE {
        return Err(ProtocolError::invalid_amount(format!(
            "collateral ratio must exceed 100%, got {}",
            collateral_ratio
        )));
    }

    let available = total_on_offer(&eligible_liquidity(
        records,
        &ctx.asset.asset,
        price,
        ctx.params.min_liquidity_redemption_lovelace,
    ));

    let partial = FixedPoint::ONE
        .checked_div(ratio - FixedPoint::ONE)
        .ok_or_else(|| ProtocolError::invalid_amount("collateral ratio too close to 100%"))?;
    let upper_bound = FixedPoint::ONE + partial;

    // A sizing that overflows above 1x cannot fit either bound
    let fits = |leverage: FixedPoint| -> Result<bool, ProtocolError> {
        match size_leverage(ctx.asset, price, leverage, base_collateral, collateral_ratio) {
            Ok(sizing) => Ok(sizing.lovelaces_with_reimbursement <= available
                && sizing.lovelaces_with_reimbursement <= price.mul_int(sizing.minted_amt)),
            Err(ProtocolError::InvalidAmount { .. }) if leverage > FixedPoint::ONE => Ok(false),
            Err(e) => Err(e),
        }
    };

    if !fits(FixedPoint::ONE)? {
        return Ok(FixedPoint::ONE);
    }
    if fits(upper_bound)? {
        return Ok(upper_bound);
    }

    // fits(lower) holds, fits(upper) does not
    let mut lower = FixedPoint::ONE.raw();
    let mut upper = upper_bound.raw();
    while upper - lower > 1 {
        let mid = lower + (upper - lower) / 2;
        if fits(FixedPoint::from_raw(mid))? {
            lower = mid;
        } else {
            upper = mid;
        }
    }

    Ok(FixedPoint::from_raw(lower))
}
