//! Actor Identity Mapping
//!
//! Deterministic, one-way mapping from an opaque provider-issued identity
//! string to a fixed-width ledger address. The mapping is unsalted and
//! reproducible by anyone who knows the identity: it provides consistent
//! pseudonymous labeling, never authentication.

use crate::error::CustodyError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const ADDRESS_BYTES: usize = 20;

/// A derived ledger address: `0x` followed by 40 hex chars with checksum
/// casing. Equality ignores the casing (checksum is presentation only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerAddress(String);

impl LedgerAddress {
    /// Parse an address that came back from the ledger or a client.
    pub fn parse(s: &str) -> Result<Self, CustodyError> {
        let hex_part = s
            .strip_prefix("0x")
            .ok_or_else(|| CustodyError::InvalidInput(format!("Address missing 0x prefix: {}", s)))?;
        if hex_part.len() != ADDRESS_BYTES * 2 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CustodyError::InvalidInput(format!(
                "Address must be 0x + 40 hex chars: {}",
                s
            )));
        }
        Ok(Self(checksum_format(&hex_part.to_ascii_lowercase())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercased form used for storage keys and ledger query parameters.
    pub fn canonical(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl PartialEq for LedgerAddress {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for LedgerAddress {}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the ledger address for an external identity.
///
/// SHA-256 of the identity string, truncated to the first 20 bytes and
/// rendered under the ledger's checksum convention. Deterministic and
/// non-invertible; collision probability is that of the underlying hash.
pub fn derive_address(external_identity: &str) -> Result<LedgerAddress, CustodyError> {
    if external_identity.trim().is_empty() {
        return Err(CustodyError::InvalidIdentity(
            "identity must not be empty".to_string(),
        ));
    }
    if external_identity.chars().any(|c| c.is_control()) {
        return Err(CustodyError::InvalidIdentity(
            "identity must not contain control characters".to_string(),
        ));
    }

    let digest = Sha256::digest(external_identity.as_bytes());
    let hex_lower = hex::encode(&digest[..ADDRESS_BYTES]);
    Ok(LedgerAddress(checksum_format(&hex_lower)))
}

/// Mixed-case checksum over the lowercase hex payload: a nibble of the
/// address hash decides the case of each alphabetic hex digit.
fn checksum_format(hex_lower: &str) -> String {
    let check = Sha256::digest(hex_lower.as_bytes());
    let mut out = String::with_capacity(2 + hex_lower.len());
    out.push_str("0x");
    for (i, c) in hex_lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            check[i / 2] >> 4
        } else {
            check[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
