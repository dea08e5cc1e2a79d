//! Error types for Bastion

use thiserror::Error;

/// Core errors that can occur in Bastion
#[derive(Debug, Error)]
pub enum Error {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Accounting engine errors.
///
/// All of these are value-level failures: an operation that returns one has
/// not produced any partial output.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Asset {asset} is delisted")]
    DelistedAsset { asset: String },

    #[error("Inconsistent fee state: expected {expected}, found {found}")]
    InconsistentFeeState {
        expected: &'static str,
        found: &'static str,
    },

    #[error("Missing sum snapshot for epoch {epoch}, scale {scale}")]
    MissingHistoricalSnapshot { epoch: u64, scale: u64 },

    #[error("Nothing available to redeem")]
    RedemptionExhausted,

    #[error("Insufficient liquidity: need {required} lovelace, have {available}")]
    InsufficientLiquidity { required: i64, available: i64 },

    #[error("Merge needs at least 2 positions, got {count}")]
    MergeArity { count: usize },

    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    #[error("Price expired at {expiration}, now {now}")]
    StalePrice { expiration: i64, now: i64 },

    #[error("Collateral ratio {ratio_pct}% below required {required_pct}%")]
    CollateralRatioTooLow { ratio_pct: String, required_pct: String },

    #[error("Position is not liquidatable: ratio {ratio_pct}% >= {threshold_pct}%")]
    NotLiquidatable {
        ratio_pct: String,
        threshold_pct: String,
    },

    #[error("Stability pool holds no deposits")]
    EmptyStabilityPool,

    #[error("Asset mismatch: expected {expected}, got {actual}")]
    AssetMismatch { expected: String, actual: String },

    #[error("Insufficient collateral: need {required} lovelace, have {available}")]
    InsufficientCollateral { required: i64, available: i64 },
}

/// Result type alias for Bastion operations
pub type Result<T> = std::result::Result<T, Error>;

impl ProtocolError {
    /// Stable identifier for the transaction layer
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DelistedAsset { .. } => "delisted_asset",
            Self::InconsistentFeeState { .. } => "inconsistent_fee_state",
            Self::MissingHistoricalSnapshot { .. } => "missing_historical_snapshot",
            Self::RedemptionExhausted => "redemption_exhausted",
            Self::InsufficientLiquidity { .. } => "insufficient_liquidity",
            Self::MergeArity { .. } => "merge_arity",
            Self::InvalidAmount { .. } => "invalid_amount",
            Self::StalePrice { .. } => "stale_price",
            Self::CollateralRatioTooLow { .. } => "collateral_ratio_too_low",
            Self::NotLiquidatable { .. } => "not_liquidatable",
            Self::EmptyStabilityPool => "empty_stability_pool",
            Self::AssetMismatch { .. } => "asset_mismatch",
            Self::InsufficientCollateral { .. } => "insufficient_collateral",
        }
    }

    /// Whether the caller can succeed by re-fetching ledger state and retrying.
    ///
    /// Only a missing epoch/scale sum qualifies: fetching more pool history
    /// fills the gap. Everything else is either a caller bug or a user-facing
    /// condition.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::MissingHistoricalSnapshot { .. })
    }

    /// Shorthand for [`ProtocolError::InvalidAmount`]
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        Self::InvalidAmount {
            message: message.into(),
        }
    }
}
