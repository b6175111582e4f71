//! Milestone commitment hashing
//!
//! Derives a deterministic content hash for a milestone definition so the
//! on-chain commitment can be verified against off-chain metadata without
//! storing the metadata on-chain. The same scheme derives both the creation
//! commitment and the release proof hash; an independent release hash would
//! never match the stored commitment and every release would revert.
//!
//! # Preimage Format
//!
//! ```text
//! | Field           | Size | Description                          |
//! |-----------------|------|--------------------------------------|
//! | Magic           | 4    | "MCM1" = [0x4D, 0x43, 0x4D, 0x31]    |
//! | Version         | 1    | Scheme version (currently 1)         |
//! | Title len       | 4    | u32 BE byte length                   |
//! | Title           | var  | UTF-8 bytes                          |
//! | Description len | 4    | u32 BE byte length                   |
//! | Description     | var  | UTF-8 bytes                          |
//! | Amount          | 32   | Base units, big-endian (u128 padded) |
//! | Completion date | 8    | Unix seconds, u64 BE                 |
//! ```
//!
//! Hash = keccak-256 of the preimage. No salt; two independent computations
//! of the same logical milestone always agree.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::{EscrowError, EscrowResult};
use crate::types::Digest32;

/// Commitment preimage magic bytes ("MCM1")
pub const COMMITMENT_MAGIC: [u8; 4] = [0x4D, 0x43, 0x4D, 0x31];

/// Current commitment scheme version
pub const COMMITMENT_VERSION: u8 = 1;

/// Decimal places of the ledger's native escrow amounts (18-decimal fixed point)
pub const NATIVE_DECIMALS: u32 = 18;

/// A milestone definition as supplied by the caller, amounts in human units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MilestoneDef {
    pub title: String,
    pub description: String,
    /// Human-unit amount, converted to base units at the hashing boundary
    pub amount: Decimal,
    /// Target completion date, unix seconds
    pub completion_date: u64,
}

impl MilestoneDef {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        amount: Decimal,
        completion_date: u64,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            amount,
            completion_date,
        }
    }

    /// Reject invalid definitions before any hashing or network call
    pub fn validate(&self, decimals: u32) -> EscrowResult<()> {
        if self.title.trim().is_empty() {
            return Err(EscrowError::Validation(
                "milestone title must not be empty".to_string(),
            ));
        }
        if self.completion_date == 0 {
            return Err(EscrowError::Validation(format!(
                "milestone '{}' has no completion date",
                self.title
            )));
        }
        if self.amount <= Decimal::ZERO {
            return Err(EscrowError::Validation(format!(
                "milestone '{}' amount must be positive, got {}",
                self.title, self.amount
            )));
        }
        // Surfaces precision/overflow problems early.
        amount_to_base_units(self.amount, decimals)?;
        Ok(())
    }

    /// Amount in base units for the given token precision
    pub fn amount_base(&self, decimals: u32) -> EscrowResult<u128> {
        amount_to_base_units(self.amount, decimals)
    }
}

/// Convert a human-unit amount to base units.
///
/// Fails on negative amounts, fractional digits beyond the token's precision
/// and overflow. Never coerces silently and never touches floats.
pub fn amount_to_base_units(amount: Decimal, decimals: u32) -> EscrowResult<u128> {
    if amount.is_sign_negative() {
        return Err(EscrowError::Validation(format!(
            "amount must not be negative: {}",
            amount
        )));
    }
    if decimals > 28 {
        return Err(EscrowError::Validation(format!(
            "unsupported token precision: {} decimals",
            decimals
        )));
    }
    let factor = Decimal::from_i128_with_scale(10i128.pow(decimals), 0);
    let scaled = amount.checked_mul(factor).ok_or_else(|| {
        EscrowError::Validation(format!("amount {} overflows at {} decimals", amount, decimals))
    })?;
    if !scaled.fract().is_zero() {
        return Err(EscrowError::Validation(format!(
            "amount {} has more than {} fractional digits",
            amount, decimals
        )));
    }
    scaled.trunc().to_u128().ok_or_else(|| {
        EscrowError::Validation(format!("amount {} does not fit in base units", amount))
    })
}

/// Convert base units back to a human-unit amount
pub fn base_units_to_amount(units: u128, decimals: u32) -> EscrowResult<Decimal> {
    if decimals > 28 {
        return Err(EscrowError::Validation(format!(
            "unsupported token precision: {} decimals",
            decimals
        )));
    }
    let signed = i128::try_from(units).map_err(|_| {
        EscrowError::Validation(format!("base amount {} exceeds representable range", units))
    })?;
    // Values beyond Decimal's 96-bit mantissa must error, not panic; a token
    // balance is external input.
    let amount = Decimal::try_from_i128_with_scale(signed, decimals).map_err(|_| {
        EscrowError::Validation(format!("base amount {} exceeds representable range", units))
    })?;
    Ok(amount.normalize())
}

/// Canonical commitment preimage from already-converted parts
pub fn commitment_preimage(
    title: &str,
    description: &str,
    amount_base: u128,
    completion_date: u64,
) -> Vec<u8> {
    let title_bytes = title.as_bytes();
    let desc_bytes = description.as_bytes();
    let mut buf = Vec::with_capacity(4 + 1 + 4 + title_bytes.len() + 4 + desc_bytes.len() + 32 + 8);
    buf.extend_from_slice(&COMMITMENT_MAGIC);
    buf.push(COMMITMENT_VERSION);
    buf.extend_from_slice(&(title_bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(title_bytes);
    buf.extend_from_slice(&(desc_bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(desc_bytes);
    // 32-byte big-endian amount, zero-padded above the u128 range
    buf.extend_from_slice(&[0u8; 16]);
    buf.extend_from_slice(&amount_base.to_be_bytes());
    buf.extend_from_slice(&completion_date.to_be_bytes());
    buf
}

/// Keccak-256 over the canonical preimage
pub fn commitment_hash_parts(
    title: &str,
    description: &str,
    amount_base: u128,
    completion_date: u64,
) -> Digest32 {
    let preimage = commitment_preimage(title, description, amount_base, completion_date);
    let mut hasher = Keccak256::new();
    hasher.update(&preimage);
    let out = hasher.finalize();
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&out);
    digest
}

/// Validate a definition and derive its commitment hash
pub fn commitment_hash(def: &MilestoneDef, decimals: u32) -> EscrowResult<Digest32> {
    def.validate(decimals)?;
    let amount_base = def.amount_base(decimals)?;
    Ok(commitment_hash_parts(
        &def.title,
        &def.description,
        amount_base,
        def.completion_date,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_def() -> MilestoneDef {
        MilestoneDef::new(
            "Foundation poured",
            "Concrete foundation complete and inspected",
            Decimal::from(400u32),
            1_735_689_600,
        )
    }

    #[test]
    fn test_hash_determinism() {
        let def = sample_def();
        let a = commitment_hash(&def, NATIVE_DECIMALS).unwrap();
        let b = commitment_hash(&def, NATIVE_DECIMALS).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_sensitivity() {
        let base = sample_def();
        let reference = commitment_hash(&base, NATIVE_DECIMALS).unwrap();

        let mut changed = base.clone();
        changed.title = "Foundation poured!".to_string();
        assert_ne!(commitment_hash(&changed, NATIVE_DECIMALS).unwrap(), reference);

        let mut changed = base.clone();
        changed.description = "Amended scope".to_string();
        assert_ne!(commitment_hash(&changed, NATIVE_DECIMALS).unwrap(), reference);

        let mut changed = base.clone();
        changed.amount = Decimal::from(401u32);
        assert_ne!(commitment_hash(&changed, NATIVE_DECIMALS).unwrap(), reference);

        let mut changed = base;
        changed.completion_date += 86_400;
        assert_ne!(commitment_hash(&changed, NATIVE_DECIMALS).unwrap(), reference);
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        // Length prefixes must prevent ("ab", "c") colliding with ("a", "bc").
        let h1 = commitment_hash_parts("ab", "c", 1, 1);
        let h2 = commitment_hash_parts("a", "bc", 1, 1);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_preimage_layout() {
        let preimage = commitment_preimage("t", "d", 5, 9);
        assert_eq!(&preimage[0..4], &COMMITMENT_MAGIC);
        assert_eq!(preimage[4], COMMITMENT_VERSION);
        assert_eq!(&preimage[5..9], &1u32.to_be_bytes());
        assert_eq!(&preimage[9..10], b"t");
        assert_eq!(preimage.len(), 4 + 1 + 4 + 1 + 4 + 1 + 32 + 8);
        // Amount occupies the last 40..8 bytes before the date.
        let amount_field = &preimage[preimage.len() - 40..preimage.len() - 8];
        assert_eq!(amount_field[31], 5);
        assert_eq!(&preimage[preimage.len() - 8..], &9u64.to_be_bytes());
    }

    #[test]
    fn test_rejects_invalid_definitions() {
        let mut def = sample_def();
        def.title = "  ".to_string();
        assert!(def.validate(NATIVE_DECIMALS).is_err());

        let mut def = sample_def();
        def.amount = Decimal::ZERO;
        assert!(def.validate(NATIVE_DECIMALS).is_err());

        let mut def = sample_def();
        def.completion_date = 0;
        assert!(def.validate(NATIVE_DECIMALS).is_err());
    }

    #[test]
    fn test_amount_conversion() {
        let units = amount_to_base_units("1.5".parse().unwrap(), 6).unwrap();
        assert_eq!(units, 1_500_000);

        let back = base_units_to_amount(1_500_000, 6).unwrap();
        assert_eq!(back, "1.5".parse::<Decimal>().unwrap());

        let whole = amount_to_base_units(Decimal::from(1000u32), 18).unwrap();
        assert_eq!(whole, 1_000_000_000_000_000_000_000);
    }

    #[test]
    fn test_base_units_conversion_rejects_oversized_values() {
        // Exceeds Decimal's mantissa but fits in i128.
        let res = base_units_to_amount(100_000_000_000_000_000_000_000_000_000, 18);
        assert!(matches!(res, Err(EscrowError::Validation(_))));

        // Exceeds i128 entirely.
        let res = base_units_to_amount(u128::MAX, 0);
        assert!(matches!(res, Err(EscrowError::Validation(_))));
    }

    #[test]
    fn test_amount_conversion_rejects_excess_precision() {
        // 6-decimal token cannot represent 7 fractional digits.
        let res = amount_to_base_units("0.1234567".parse().unwrap(), 6);
        assert!(matches!(res, Err(EscrowError::Validation(_))));
    }

    #[test]
    fn test_amount_conversion_rejects_negative() {
        let res = amount_to_base_units("-1".parse().unwrap(), 6);
        assert!(matches!(res, Err(EscrowError::Validation(_))));
    }
}
