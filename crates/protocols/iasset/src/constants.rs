//! iAsset Protocol Constants
//!
//! Precision scales shared by the interest oracle and the stability pool.

/// Precision of the unitary interest accumulator (1.0 == 10^18)
pub const UNITARY_INTEREST_PRECISION: i128 = 1_000_000_000_000_000_000;

/// Stability pool parameters
pub mod stability_pool {
    /// Precision of pool product, deposit and sum values (1.0 == 10^18)
    pub const SP_PRECISION: i128 = 1_000_000_000_000_000_000;

    /// Below this the running product is rescaled
    pub const SCALE_THRESHOLD: i128 = 1_000_000_000;

    /// Factor applied to the product on each scale increase
    pub const SCALE_MULT: i128 = 1_000_000_000;

    /// A fund below `deposit / DUST_DIVISOR` is zeroed
    pub const DUST_DIVISOR: i128 = 1_000_000_000;
}
