//! Shared type definitions
//!
//! Base types shared across the ledger adapter, the mirror store and the
//! orchestrator.

pub mod milestone;
pub mod transfer;

pub use milestone::{MilestoneRecord, MilestoneStatus};
pub use transfer::{TransferKind, TransferRecord, TransferStatus};

/// 32-byte digest type (commitment hashes, idempotency key digests)
pub type Digest32 = [u8; 32];

/// Ledger-assigned escrow identifier
pub type EscrowId = u64;

/// Zero-based milestone position within an escrow
pub type MilestoneIndex = u32;

/// Render a digest as a 0x-prefixed hex string
pub fn digest_to_hex(digest: &Digest32) -> String {
    format!("0x{}", hex::encode(digest))
}

/// Parse a digest from a hex string (with or without 0x prefix)
pub fn digest_from_hex(hex_str: &str) -> Result<Digest32, hex::FromHexError> {
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(stripped)?;
    if bytes.len() != 32 {
        return Err(hex::FromHexError::InvalidStringLength);
    }
    let mut digest = [0u8; 32];
    digest.copy_from_slice(&bytes);
    Ok(digest)
}

/// Serde helper for u128 amounts.
///
/// Base-unit amounts exceed u64 range for 18-decimal tokens, so they travel
/// as decimal strings on every serialized boundary.
pub mod u128_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse::<u128>()
            .map_err(|e| D::Error::custom(format!("invalid u128 amount '{}': {}", s, e)))
    }
}
