//! iAsset Protocol Accounting Engine
//!
//! Numeric core of a collateralized-debt synthetic asset protocol on a UTXO
//! ledger. Every operation is a pure function from ledger snapshots to new
//! snapshots plus the lovelace each party receives; fetching records and
//! building transactions is left to the caller.
//!
//! # Components
//!
//! - Interest accrual through a shared unitary interest accumulator
//! - CDP state machine: open, adjust, close, redeem, freeze, liquidate, merge
//! - Stability pool with scaled product/sum loss and reward distribution
//! - Redemption caps that respect the minimum collateral floor
//! - Leverage sizing funded by liquidity provider records
//!
//! # Example
//!
//! ```ignore
//! use iasset::{open_cdp, CdpContext};
//!
//! let ctx = CdpContext { asset: &config, price: &price, oracle: &oracle, params: &params, now };
//! let outcome = open_cdp(&ctx, owner, address, 300_000_000, 100_000_000)?;
//! println!("Minting fee: {}", outcome.movements[0].amount);
//! ```

pub mod cdp;
pub mod constants;
pub mod interest;
pub mod leverage;
pub mod redemption;
pub mod sp_integer;
pub mod stability_pool;
pub mod state;

pub use bastion_core::{FixedPoint, ProtocolError};
pub use cdp::*;
pub use constants::UNITARY_INTEREST_PRECISION;
pub use interest::*;
pub use leverage::*;
pub use redemption::*;
pub use sp_integer::SpInteger;
pub use stability_pool::*;
pub use state::*;
