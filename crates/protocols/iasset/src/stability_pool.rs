//! Stability Pool Calculator
//!
//! Distributes liquidated debt and seized collateral across depositors in
//! O(1) per liquidation using a running product and a running sum:
//!
//! - `P` (product): what one unit deposited at pool start is worth now.
//!   Each liquidation multiplies it by `1 - burn / deposits`.
//! - `S` (sum): collateral earned per unit deposited at pool start.
//!   Each liquidation adds `reward * P / deposits`.
//!
//! A depositor stores `(P, S, epoch, scale)` when it last touched the pool
//! and reconstructs its fund and reward lazily from the current values.
//!
//! When `P` would fall below [`SCALE_THRESHOLD`] it is multiplied by
//! [`SCALE_MULT`] and `scale` advances; sums recorded in the next scale are
//! in units `SCALE_MULT` times larger. When the pool is wiped out entirely,
//! `epoch` advances and the aggregates reset.
//!
//! All values are 18-decimal [`SpInteger`]s.

use bastion_core::{fee_from_percentage, AssetAmount, FixedPoint, Lovelace, ProtocolError};

use crate::constants::stability_pool::{DUST_DIVISOR, SCALE_MULT, SCALE_THRESHOLD};
use crate::sp_integer::SpInteger;
use crate::state::{
    push_movement, AccountSnapshot, Destination, EpochScaleKey, EpochToScaleToSum,
    StabilityPoolSnapshot, ValueMovement,
};

/// Result of absorbing one liquidation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolLiquidation {
    pub snapshot: StabilityPoolSnapshot,
    /// Input history with this liquidation's entries written
    pub history: EpochToScaleToSum,
    pub scale_increased: bool,
    pub epoch_increased: bool,
}

/// Absorb `burn_amt` units of debt in exchange for `reward` lovelace.
pub fn absorb_liquidation(
    pool: &StabilityPoolSnapshot,
    history: &EpochToScaleToSum,
    burn_amt: AssetAmount,
    reward: Lovelace,
) -> Result<PoolLiquidation, ProtocolError> {
    if burn_amt <= 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "liquidation burn must be positive, got {}",
            burn_amt
        )));
    }
    if reward < 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "liquidation reward cannot be negative, got {}",
            reward
        )));
    }
    if !pool.deposit_val.is_positive() {
        return Err(ProtocolError::EmptyStabilityPool);
    }

    let burn = SpInteger::from_int(burn_amt);
    if burn > pool.deposit_val {
        return Err(ProtocolError::invalid_amount(format!(
            "cannot burn {} from a pool holding {}",
            burn_amt,
            pool.asset_balance()
        )));
    }

    let deposits = pool.deposit_val;
    let product = pool.product_val;

    let loss_per_unit = burn
        .checked_div(deposits)
        .ok_or(ProtocolError::EmptyStabilityPool)?;
    let product_factor = SpInteger::ONE - loss_per_unit;

    let unscaled_product = product.mul(product_factor);
    let scale_increased = unscaled_product.raw() < SCALE_THRESHOLD;
    let new_product = if scale_increased {
        product.mul_scalar(SCALE_MULT).mul(product_factor)
    } else {
        unscaled_product
    };

    let reward_per_unit = SpInteger::from_int(reward)
        .mul(product)
        .checked_div(deposits)
        .ok_or(ProtocolError::EmptyStabilityPool)?;
    let new_sum = pool.sum_val + reward_per_unit;

    let epoch_increased = new_product.raw() <= 0;

    let mut new_history = history.clone();
    new_history.insert(pool.key(), new_sum);

    let snapshot = if epoch_increased {
        let next_epoch = pool.epoch + 1;
        new_history.insert(EpochScaleKey::new(next_epoch, 0), SpInteger::ZERO);
        tracing::info!(
            epoch = next_epoch,
            burned = burn_amt,
            "Stability pool wiped out, starting new epoch"
        );
        StabilityPoolSnapshot::initial(next_epoch)
    } else {
        let next_scale = if scale_increased {
            new_history.insert(EpochScaleKey::new(pool.epoch, pool.scale + 1), new_sum);
            tracing::info!(
                epoch = pool.epoch,
                scale = pool.scale + 1,
                "Stability pool product rescaled"
            );
            pool.scale + 1
        } else {
            pool.scale
        };
        StabilityPoolSnapshot {
            product_val: new_product,
            deposit_val: deposits - burn,
            sum_val: new_sum,
            epoch: pool.epoch,
            scale: next_scale,
        }
    };

    tracing::debug!(
        burned = burn_amt,
        reward,
        product = %snapshot.product_val,
        sum = %new_sum,
        "Stability pool absorbed liquidation"
    );

    Ok(PoolLiquidation {
        snapshot,
        history: new_history,
        scale_increased: scale_increased && !epoch_increased,
        epoch_increased,
    })
}

/// Sum recorded at `key`, falling back to the pool's own sum for its
/// current key (no liquidation has written it yet).
fn sum_at(
    pool: &StabilityPoolSnapshot,
    history: &EpochToScaleToSum,
    key: EpochScaleKey,
) -> Option<SpInteger> {
    history
        .get(key)
        .or_else(|| (key == pool.key()).then_some(pool.sum_val))
}

fn ensure_not_ahead(
    pool: &StabilityPoolSnapshot,
    account: &AccountSnapshot,
) -> Result<(), ProtocolError> {
    if account.key() > pool.key() {
        return Err(ProtocolError::invalid_amount(format!(
            "account snapshot ({}, {}) is ahead of the pool ({}, {})",
            account.epoch, account.scale, pool.epoch, pool.scale
        )));
    }
    if !account.product_val.is_positive() {
        return Err(ProtocolError::invalid_amount(
            "account product must be positive",
        ));
    }
    Ok(())
}

/// Depositor's remaining deposit, 18-decimal
pub fn account_fund(
    pool: &StabilityPoolSnapshot,
    account: &AccountSnapshot,
) -> Result<SpInteger, ProtocolError> {
    ensure_not_ahead(pool, account)?;

    if pool.epoch > account.epoch || pool.scale - account.scale > 1 {
        return Ok(SpInteger::ZERO);
    }

    let compounded = account
        .deposit_val
        .mul(pool.product_val)
        .checked_div(account.product_val)
        .unwrap_or(SpInteger::ZERO);

    let fund = if pool.scale > account.scale {
        compounded.div_scalar(SCALE_MULT).unwrap_or(SpInteger::ZERO)
    } else {
        compounded
    };

    let dust = account
        .deposit_val
        .div_scalar(DUST_DIVISOR)
        .unwrap_or(SpInteger::ZERO);
    if fund < dust {
        return Ok(SpInteger::ZERO);
    }
    Ok(fund)
}

/// Depositor's unclaimed collateral reward, 18-decimal.
///
/// Needs the sums at the account's `(epoch, scale)` and, when present, at
/// `(epoch, scale + 1)`. Gains further out are worthless after rescaling.
pub fn account_reward(
    pool: &StabilityPoolSnapshot,
    history: &EpochToScaleToSum,
    account: &AccountSnapshot,
) -> Result<SpInteger, ProtocolError> {
    ensure_not_ahead(pool, account)?;

    let key = account.key();
    let s1 = sum_at(pool, history, key).ok_or(ProtocolError::MissingHistoricalSnapshot {
        epoch: key.epoch,
        scale: key.scale,
    })?;
    let s2 = sum_at(pool, history, EpochScaleKey::new(key.epoch, key.scale + 1)).unwrap_or(s1);

    let first_portion = s1 - account.sum_val;
    let second_portion = (s2 - s1)
        .div_scalar(SCALE_MULT)
        .unwrap_or(SpInteger::ZERO);

    let reward = (first_portion + second_portion)
        .mul(account.deposit_val)
        .checked_div(account.product_val)
        .unwrap_or(SpInteger::ZERO);

    Ok(if reward.is_positive() {
        reward
    } else {
        SpInteger::ZERO
    })
}

/// Reconciled depositor balance in whole units
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountBalance {
    /// Asset units still deposited
    pub fund: AssetAmount,
    /// Collateral owed to the depositor
    pub reward: Lovelace,
}

pub fn reconcile_account(
    pool: &StabilityPoolSnapshot,
    history: &EpochToScaleToSum,
    account: &AccountSnapshot,
) -> Result<AccountBalance, ProtocolError> {
    let fund = account_fund(pool, account)?;
    let reward = account_reward(pool, history, account)?;
    Ok(AccountBalance {
        fund: fund.to_int(),
        reward: reward.to_int(),
    })
}

/// New account and pool state after a deposit or withdrawal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountUpdate {
    /// `None` once the account holds nothing
    pub account: Option<AccountSnapshot>,
    pub pool: StabilityPoolSnapshot,
    /// Asset units paid out to the owner
    pub withdrawn: AssetAmount,
    /// Asset units kept by the collector on withdrawal
    pub withdrawal_fee: AssetAmount,
    /// Lovelace rewards paid out
    pub movements: Vec<ValueMovement>,
}

fn snapshot_for(pool: &StabilityPoolSnapshot, fund: AssetAmount) -> AccountSnapshot {
    AccountSnapshot {
        product_val: pool.product_val,
        deposit_val: SpInteger::from_int(fund),
        sum_val: pool.sum_val,
        epoch: pool.epoch,
        scale: pool.scale,
    }
}

/// Open an account with a first deposit
pub fn create_account(
    pool: &StabilityPoolSnapshot,
    amount: AssetAmount,
) -> Result<AccountUpdate, ProtocolError> {
    if amount <= 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "deposit must be positive, got {}",
            amount
        )));
    }

    let mut new_pool = pool.clone();
    new_pool.deposit_val = pool.deposit_val + SpInteger::from_int(amount);

    tracing::debug!(amount, epoch = pool.epoch, scale = pool.scale, "Stability pool account created");

    Ok(AccountUpdate {
        account: Some(snapshot_for(pool, amount)),
        pool: new_pool,
        withdrawn: 0,
        withdrawal_fee: 0,
        movements: Vec::new(),
    })
}

/// Deposit (`delta > 0`) into or withdraw (`delta < 0`) from an account.
///
/// Pays out the pending reward and re-snapshots the account at the pool's
/// current aggregates. A zero `delta` only claims the reward.
pub fn adjust_account(
    pool: &StabilityPoolSnapshot,
    history: &EpochToScaleToSum,
    account: &AccountSnapshot,
    delta: AssetAmount,
    withdrawal_fee_percentage: FixedPoint,
) -> Result<AccountUpdate, ProtocolError> {
    let balance = reconcile_account(pool, history, account)?;

    let new_fund = balance.fund + delta;
    if new_fund < 0 {
        return Err(ProtocolError::invalid_amount(format!(
            "cannot withdraw {} from a fund of {}",
            -delta, balance.fund
        )));
    }

    let (withdrawn, withdrawal_fee) = if delta < 0 {
        let fee = fee_from_percentage(withdrawal_fee_percentage, -delta);
        (-delta - fee, fee)
    } else {
        (0, 0)
    };

    let mut new_pool = pool.clone();
    let moved = pool.deposit_val + SpInteger::from_int(delta);
    new_pool.deposit_val = if moved.is_positive() {
        moved
    } else {
        SpInteger::ZERO
    };

    let mut movements = Vec::new();
    push_movement(&mut movements, Destination::Owner, balance.reward);

    tracing::debug!(
        fund = balance.fund,
        reward = balance.reward,
        delta,
        "Stability pool account adjusted"
    );

    Ok(AccountUpdate {
        account: (new_fund > 0).then(|| snapshot_for(pool, new_fund)),
        pool: new_pool,
        withdrawn,
        withdrawal_fee,
        movements,
    })
}

/// Withdraw everything and claim the reward
pub fn close_account(
    pool: &StabilityPoolSnapshot,
    history: &EpochToScaleToSum,
    account: &AccountSnapshot,
    withdrawal_fee_percentage: FixedPoint,
) -> Result<AccountUpdate, ProtocolError> {
    let balance = reconcile_account(pool, history, account)?;
    adjust_account(
        pool,
        history,
        account,
        -balance.fund,
        withdrawal_fee_percentage,
    )
}
