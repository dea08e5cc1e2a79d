//! Configuration types for Bastion

use serde::{Deserialize, Serialize};

use crate::constants::LOVELACE_PER_ADA;
use crate::{Error, FixedPoint, Lovelace, Network, Result};

/// Protocol-wide parameters shared by every synthetic asset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolParams {
    /// Fee charged on collateral leaving a position (percentage)
    #[serde(default = "default_collateral_fee_percentage")]
    pub collateral_fee_percentage: FixedPoint,

    /// Flat surcharge on a redemption that stops short of the full amount
    #[serde(default = "default_partial_redemption_extra_fee")]
    pub partial_redemption_extra_fee_lovelace: Lovelace,

    /// Smallest amount a single liquidity record may contribute
    #[serde(default = "default_min_liquidity_redemption")]
    pub min_liquidity_redemption_lovelace: Lovelace,
}

fn default_collateral_fee_percentage() -> FixedPoint {
    // 0.5%
    FixedPoint::from_raw(500_000)
}

fn default_partial_redemption_extra_fee() -> Lovelace {
    10 * LOVELACE_PER_ADA
}

fn default_min_liquidity_redemption() -> Lovelace {
    10 * LOVELACE_PER_ADA
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            collateral_fee_percentage: default_collateral_fee_percentage(),
            partial_redemption_extra_fee_lovelace: default_partial_redemption_extra_fee(),
            min_liquidity_redemption_lovelace: default_min_liquidity_redemption(),
        }
    }
}

/// Leverage sizing options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeverageConfig {
    /// Shuffle liquidity records instead of draining the largest first
    #[serde(default)]
    pub randomize_liquidity_selection: bool,
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Network the parameters belong to
    pub network: Network,

    #[serde(default)]
    pub protocol: ProtocolParams,

    #[serde(default)]
    pub leverage: LeverageConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            network: Network::Mainnet,
            protocol: ProtocolParams::default(),
            leverage: LeverageConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject parameters no validator would accept
    pub fn validate(&self) -> Result<()> {
        let p = &self.protocol;
        if p.collateral_fee_percentage < FixedPoint::ZERO
            || p.collateral_fee_percentage > FixedPoint::ONE_HUNDRED_PERCENT
        {
            return Err(Error::Config(format!(
                "collateralFeePercentage out of range: {}",
                p.collateral_fee_percentage
            )));
        }
        if p.partial_redemption_extra_fee_lovelace < 0 {
            return Err(Error::Config(
                "partialRedemptionExtraFeeLovelace cannot be negative".to_string(),
            ));
        }
        if p.min_liquidity_redemption_lovelace < 0 {
            return Err(Error::Config(
                "minLiquidityRedemptionLovelace cannot be negative".to_string(),
            ));
        }
        Ok(())
    }
}
