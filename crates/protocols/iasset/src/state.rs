//! iAsset State Types
//!
//! Ledger snapshots consumed by the engine and the records it produces.

use std::collections::BTreeMap;

use bastion_core::{
    Address, AssetAmount, AssetId, FixedPoint, Lovelace, OwnerId, PosixTime, ProtocolError,
};
use serde::{Deserialize, Serialize};

use crate::sp_integer::SpInteger;

/// Oracle price of one asset unit in lovelace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceSnapshot {
    pub price: FixedPoint,
    /// Last instant the price may be used
    pub expiration: PosixTime,
}

impl PriceSnapshot {
    /// Price, provided `now` is inside the validity window
    pub fn price_at(&self, now: PosixTime) -> Result<FixedPoint, ProtocolError> {
        if now > self.expiration {
            return Err(ProtocolError::StalePrice {
                expiration: self.expiration,
                now,
            });
        }
        if !self.price.is_positive() {
            return Err(ProtocolError::invalid_amount(format!(
                "oracle price must be positive, got {}",
                self.price
            )));
        }
        Ok(self.price)
    }
}

/// Per-asset interest oracle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterestOracleSnapshot {
    /// Accumulated interest per unit of debt, 10^18 precision. Never decreases.
    pub unitary_interest: i128,
    /// Annual rate as a fraction (100_000 == 10%)
    pub interest_rate: FixedPoint,
    pub last_updated: PosixTime,
}

/// Static parameters of one synthetic asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IAssetConfig {
    pub asset: AssetId,
    /// Ratio a redemption restores a position to
    pub redemption_ratio: FixedPoint,
    /// Ratio required after opening, minting more or withdrawing
    pub maintenance_ratio: FixedPoint,
    /// Ratio below which a position may be frozen
    pub liquidation_ratio: FixedPoint,
    pub debt_minting_fee_percentage: FixedPoint,
    pub liquidation_processing_fee_percentage: FixedPoint,
    pub stability_pool_withdrawal_fee_percentage: FixedPoint,
    pub redemption_reimbursement_percentage: FixedPoint,
    pub redemption_processing_fee_percentage: FixedPoint,
    pub interest_collector_portion_percentage: FixedPoint,
    /// Collateral floor every live position keeps
    pub min_collateral_lovelace: Lovelace,
    #[serde(default)]
    pub delisted: bool,
}

impl IAssetConfig {
    /// Check the asset id and that ratios and percentages are usable
    pub fn validate(&self) -> Result<(), ProtocolError> {
        self.asset
            .validate()
            .map_err(ProtocolError::invalid_amount)?;

        let hundred = FixedPoint::ONE_HUNDRED_PERCENT;
        if self.liquidation_ratio <= hundred {
            return Err(ProtocolError::invalid_amount(format!(
                "liquidation ratio must exceed 100%, got {}",
                self.liquidation_ratio
            )));
        }
        if self.maintenance_ratio < self.liquidation_ratio {
            return Err(ProtocolError::invalid_amount(format!(
                "maintenance ratio {} below liquidation ratio {}",
                self.maintenance_ratio, self.liquidation_ratio
            )));
        }
        if self.redemption_ratio <= hundred {
            return Err(ProtocolError::invalid_amount(format!(
                "redemption ratio must exceed 100%, got {}",
                self.redemption_ratio
            )));
        }

        let percentages = [
            ("debtMintingFeePercentage", self.debt_minting_fee_percentage),
            ("liquidationProcessingFeePercentage", self.liquidation_processing_fee_percentage),
            ("stabilityPoolWithdrawalFeePercentage", self.stability_pool_withdrawal_fee_percentage),
            ("redemptionReimbursementPercentage", self.redemption_reimbursement_percentage),
            ("redemptionProcessingFeePercentage", self.redemption_processing_fee_percentage),
            ("interestCollectorPortionPercentage", self.interest_collector_portion_percentage),
        ];
        for (name, pct) in percentages {
            if pct < FixedPoint::ZERO || pct > hundred {
                return Err(ProtocolError::invalid_amount(format!(
                    "{} out of range: {}",
                    name, pct
                )));
            }
        }

        if self.min_collateral_lovelace < 0 {
            return Err(ProtocolError::invalid_amount(
                "minimum collateral cannot be negative",
            ));
        }
        Ok(())
    }

    pub fn ensure_listed(&self) -> Result<(), ProtocolError> {
        if self.delisted {
            return Err(ProtocolError::DelistedAsset {
                asset: self.asset.to_string(),
            });
        }
        Ok(())
    }
}

/// How a position's fees are tracked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum FeeState {
    /// Live position accruing interest since `last_settled`
    #[serde(rename_all = "camelCase")]
    ActiveInterestTracking {
        last_settled: PosixTime,
        unitary_interest_snapshot: i128,
    },
    /// Frozen position carrying fees owed out of its collateral
    #[serde(rename_all = "camelCase")]
    FrozenAccumulatedFees {
        lovelaces_treasury: Lovelace,
        lovelaces_stakers: Lovelace,
    },
}

impl FeeState {
    pub const ACTIVE: &'static str = "ActiveInterestTracking";
    pub const FROZEN: &'static str = "FrozenAccumulatedFees";

    pub fn name(&self) -> &'static str {
        match self {
            Self::ActiveInterestTracking { .. } => Self::ACTIVE,
            Self::FrozenAccumulatedFees { .. } => Self::FROZEN,
        }
    }
}

/// On-ledger datum of a position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpRecord {
    /// Absent once frozen
    pub owner: Option<OwnerId>,
    pub asset: AssetId,
    pub minted_amt: AssetAmount,
    pub fee_state: FeeState,
}

impl CdpRecord {
    pub fn is_frozen(&self) -> bool {
        matches!(self.fee_state, FeeState::FrozenAccumulatedFees { .. })
    }

    /// `(last_settled, unitary_interest_snapshot)` of an active record
    pub fn interest_tracking(&self) -> Result<(PosixTime, i128), ProtocolError> {
        match self.fee_state {
            FeeState::ActiveInterestTracking {
                last_settled,
                unitary_interest_snapshot,
            } => Ok((last_settled, unitary_interest_snapshot)),
            FeeState::FrozenAccumulatedFees { .. } => Err(ProtocolError::InconsistentFeeState {
                expected: FeeState::ACTIVE,
                found: self.fee_state.name(),
            }),
        }
    }

    /// `(lovelaces_treasury, lovelaces_stakers)` of a frozen record
    pub fn accumulated_fees(&self) -> Result<(Lovelace, Lovelace), ProtocolError> {
        match self.fee_state {
            FeeState::FrozenAccumulatedFees {
                lovelaces_treasury,
                lovelaces_stakers,
            } => Ok((lovelaces_treasury, lovelaces_stakers)),
            FeeState::ActiveInterestTracking { .. } => Err(ProtocolError::InconsistentFeeState {
                expected: FeeState::FROZEN,
                found: self.fee_state.name(),
            }),
        }
    }
}

/// A position record together with the value it holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpPosition {
    pub address: Address,
    pub collateral: Lovelace,
    pub record: CdpRecord,
}

/// Who receives a lovelace movement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Destination {
    /// Fee collector (stakers)
    Collector,
    Treasury,
    StabilityPool,
    /// Position or account owner
    Owner,
    Redeemer,
    /// Value that stays locked in the position itself
    Position,
}

/// Lovelace owed to one destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueMovement {
    pub destination: Destination,
    pub amount: Lovelace,
}

/// Append `amount` to `destination`, merging repeats and skipping zeros
pub fn push_movement(movements: &mut Vec<ValueMovement>, destination: Destination, amount: Lovelace) {
    if amount == 0 {
        return;
    }
    if let Some(existing) = movements.iter_mut().find(|m| m.destination == destination) {
        existing.amount += amount;
    } else {
        movements.push(ValueMovement {
            destination,
            amount,
        });
    }
}

/// Total paid to `destination`
pub fn total_to(movements: &[ValueMovement], destination: Destination) -> Lovelace {
    movements
        .iter()
        .filter(|m| m.destination == destination)
        .map(|m| m.amount)
        .sum()
}

/// Standing offer to buy an asset with lovelace, used to fund leverage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiquidityRecord {
    pub owner: OwnerId,
    pub asset: AssetId,
    /// Highest price the provider accepts
    pub max_price: FixedPoint,
    pub lovelaces_to_spend: Lovelace,
}

// =============================================================================
// Stability pool
// =============================================================================

/// Composite `(epoch, scale)` key, compared by value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EpochScaleKey {
    pub epoch: u64,
    pub scale: u64,
}

impl EpochScaleKey {
    pub const fn new(epoch: u64, scale: u64) -> Self {
        Self { epoch, scale }
    }
}

/// Pool-wide aggregates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StabilityPoolSnapshot {
    pub product_val: SpInteger,
    pub deposit_val: SpInteger,
    pub sum_val: SpInteger,
    pub epoch: u64,
    pub scale: u64,
}

impl StabilityPoolSnapshot {
    /// Fresh pool at `epoch`: unit product, nothing deposited
    pub fn initial(epoch: u64) -> Self {
        Self {
            product_val: SpInteger::ONE,
            deposit_val: SpInteger::ZERO,
            sum_val: SpInteger::ZERO,
            epoch,
            scale: 0,
        }
    }

    pub fn key(&self) -> EpochScaleKey {
        EpochScaleKey::new(self.epoch, self.scale)
    }

    /// Whole asset units held for depositors
    pub fn asset_balance(&self) -> AssetAmount {
        self.deposit_val.to_int().max(0)
    }
}

/// Depositor's copy of the pool aggregates at its last interaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    pub product_val: SpInteger,
    pub deposit_val: SpInteger,
    pub sum_val: SpInteger,
    pub epoch: u64,
    pub scale: u64,
}

impl AccountSnapshot {
    pub fn key(&self) -> EpochScaleKey {
        EpochScaleKey::new(self.epoch, self.scale)
    }
}

/// Serialized form of one [`EpochToScaleToSum`] entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SumEntry {
    pub epoch: u64,
    pub scale: u64,
    pub sum: SpInteger,
}

/// Historical `(epoch, scale) -> sum` entries.
///
/// Serialized as a list of entries since JSON object keys must be strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<SumEntry>", into = "Vec<SumEntry>")]
pub struct EpochToScaleToSum(BTreeMap<EpochScaleKey, SpInteger>);

impl EpochToScaleToSum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: EpochScaleKey) -> Option<SpInteger> {
        self.0.get(&key).copied()
    }

    pub fn insert(&mut self, key: EpochScaleKey, sum: SpInteger) {
        self.0.insert(key, sum);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EpochScaleKey, &SpInteger)> {
        self.0.iter()
    }
}

impl FromIterator<(EpochScaleKey, SpInteger)> for EpochToScaleToSum {
    fn from_iter<I: IntoIterator<Item = (EpochScaleKey, SpInteger)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl From<Vec<SumEntry>> for EpochToScaleToSum {
    fn from(entries: Vec<SumEntry>) -> Self {
        entries
            .into_iter()
            .map(|e| (EpochScaleKey::new(e.epoch, e.scale), e.sum))
            .collect()
    }
}

impl From<EpochToScaleToSum> for Vec<SumEntry> {
    fn from(map: EpochToScaleToSum) -> Self {
        map.0
            .into_iter()
            .map(|(k, sum)| SumEntry {
                epoch: k.epoch,
                scale: k.scale,
                sum,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(fee_state: FeeState) -> CdpRecord {
        CdpRecord {
            owner: Some(OwnerId::new("aa")),
            asset: AssetId::new("ab".repeat(28), "iUSD"),
            minted_amt: 1_000,
            fee_state,
        }
    }

    fn sample_config() -> IAssetConfig {
        IAssetConfig {
            asset: AssetId::new("ab".repeat(28), "iUSD"),
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

    #[test]
    fn test_config_validation() {
        assert!(sample_config().validate().is_ok());

        let mut bad_asset = sample_config();
        bad_asset.asset = AssetId::new("not-hex", "iUSD");
        assert!(bad_asset.validate().is_err());

        let mut inverted = sample_config();
        inverted.maintenance_ratio = FixedPoint::percent(105);
        assert!(inverted.validate().is_err());

        let mut over_hundred = sample_config();
        over_hundred.interest_collector_portion_percentage = FixedPoint::percent(101);
        assert!(over_hundred.validate().is_err());
    }

    #[test]
    fn test_delisted_asset_rejected() {
        let mut config = sample_config();
        assert_eq!(config.ensure_listed(), Ok(()));
        config.delisted = true;
        assert_eq!(
            config.ensure_listed(),
            Err(ProtocolError::DelistedAsset {
                asset: "abababab.iUSD".to_string()
            })
        );
    }

    #[test]
    fn test_stale_price_rejected() {
        let price = PriceSnapshot {
            price: FixedPoint::ONE,
            expiration: 100,
        };
        assert_eq!(price.price_at(100), Ok(FixedPoint::ONE));
        assert_eq!(
            price.price_at(101),
            Err(ProtocolError::StalePrice {
                expiration: 100,
                now: 101
            })
        );
    }

    #[test]
    fn test_fee_state_accessors() {
        let active = sample_record(FeeState::ActiveInterestTracking {
            last_settled: 5,
            unitary_interest_snapshot: 7,
        });
        assert_eq!(active.interest_tracking(), Ok((5, 7)));
        assert_eq!(
            active.accumulated_fees(),
            Err(ProtocolError::InconsistentFeeState {
                expected: FeeState::FROZEN,
                found: FeeState::ACTIVE,
            })
        );

        let frozen = sample_record(FeeState::FrozenAccumulatedFees {
            lovelaces_treasury: 3,
            lovelaces_stakers: 4,
        });
        assert!(frozen.is_frozen());
        assert_eq!(frozen.accumulated_fees(), Ok((3, 4)));
        assert_eq!(
            frozen.interest_tracking(),
            Err(ProtocolError::InconsistentFeeState {
                expected: FeeState::ACTIVE,
                found: FeeState::FROZEN,
            })
        );
    }

    #[test]
    fn test_fee_state_serialization_is_tagged() {
        let state = FeeState::FrozenAccumulatedFees {
            lovelaces_treasury: 1,
            lovelaces_stakers: 2,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "frozenAccumulatedFees");
        assert_eq!(json["lovelacesStakers"], 2);
        let parsed: FeeState = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, state);
    }

    #[test]
    fn test_epoch_scale_map_is_value_keyed() {
        let mut map = EpochToScaleToSum::new();
        map.insert(EpochScaleKey::new(1, 2), SpInteger::from_int(5));
        // a separately constructed, equal key finds the entry
        assert_eq!(map.get(EpochScaleKey::new(1, 2)), Some(SpInteger::from_int(5)));
        assert_eq!(map.get(EpochScaleKey::new(2, 1)), None);

        let json = serde_json::to_string(&map).unwrap();
        let parsed: EpochToScaleToSum = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, map);
    }

    #[test]
    fn test_push_movement_merges() {
        let mut movements = Vec::new();
        push_movement(&mut movements, Destination::Collector, 5);
        push_movement(&mut movements, Destination::Treasury, 0);
        push_movement(&mut movements, Destination::Collector, 7);
        assert_eq!(movements.len(), 1);
        assert_eq!(total_to(&movements, Destination::Collector), 12);
        assert_eq!(total_to(&movements, Destination::Treasury), 0);
    }
}
