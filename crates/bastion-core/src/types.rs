//! Core type definitions for Bastion

use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of a minting policy id in hex characters (28 bytes)
pub const POLICY_ID_HEX_LEN: usize = 56;

/// Ledger address (bech32 text)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if this is a mainnet address
    pub fn is_mainnet(&self) -> bool {
        self.0.starts_with("addr1")
    }

    /// Check if this is a testnet address
    pub fn is_testnet(&self) -> bool {
        self.0.starts_with("addr_test1")
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a position owner (payment key hash, hex-encoded)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Native asset identifier: minting policy plus asset name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetId {
    /// Minting policy id (hex)
    pub policy_id: String,
    /// Human-readable asset name (e.g. "iUSD")
    pub name: String,
}

impl AssetId {
    pub fn new(policy_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            name: name.into(),
        }
    }

    /// Check the policy id is 28 bytes of valid hex and the name is non-empty
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("Asset name cannot be empty".to_string());
        }
        if self.policy_id.len() != POLICY_ID_HEX_LEN {
            return Err(format!(
                "Policy id must be {} hex characters, got {}",
                POLICY_ID_HEX_LEN,
                self.policy_id.len()
            ));
        }
        hex::decode(&self.policy_id).map_err(|e| format!("Invalid policy id hex: {}", e))?;
        Ok(())
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.policy_id.get(..8).unwrap_or(&self.policy_id);
        write!(f, "{}.{}", short, self.name)
    }
}

/// Network type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Preprod,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Preprod => "preprod",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Ledger time in POSIX seconds
pub type PosixTime = i64;

/// Lovelace amount (1 ADA = 1_000_000 lovelace)
pub type Lovelace = i64;

/// Amount of a synthetic asset in its smallest unit
pub type AssetAmount = i64;

/// Constants
pub mod constants {
    use super::{Lovelace, PosixTime};

    /// 1 ADA in lovelace
    pub const LOVELACE_PER_ADA: Lovelace = 1_000_000;

    /// Length of a (non-leap) year in ledger time units
    pub const SECONDS_PER_YEAR: PosixTime = 31_536_000;
}
