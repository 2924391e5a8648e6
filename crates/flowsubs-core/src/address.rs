//! Account address validation.
//!
//! Addresses are `0x` followed by 16 hex digits (8-byte Flow account
//! addresses). Placeholder values that show up in templates and demo configs
//! are refused so a half-configured deployment cannot route real payments to
//! them.

use crate::error::{FlowSubsError, Result};

const ADDRESS_HEX_LEN: usize = 16;

/// Well-known template addresses that are not all-same-digit.
const PLACEHOLDERS: &[&str] = &[
    "0x1234567890abcdef",
    "0xfedcba0987654321",
    "0x9876543210fedcba",
    "0xabcdef1234567890",
    "0x0123456789abcdef",
    "0xdeadbeefdeadbeef",
    "0xcafebabe12345678",
];

/// Validate `address` and return its canonical (lowercase) form.
pub fn normalize_address(address: &str) -> Result<String> {
    let invalid = |reason: &str| FlowSubsError::InvalidAddress {
        address: address.to_string(),
        reason: reason.to_string(),
    };

    let hex = address
        .strip_prefix("0x")
        .ok_or_else(|| invalid("missing 0x prefix"))?;
    if hex.len() != ADDRESS_HEX_LEN {
        return Err(invalid("expected 16 hex digits"));
    }
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("not a hex string"));
    }

    let canonical = format!("0x{}", hex.to_ascii_lowercase());
    if is_placeholder(&canonical) {
        return Err(invalid("placeholder address"));
    }
    Ok(canonical)
}

/// `true` when `address` passes [`normalize_address`].
pub fn is_valid_address(address: &str) -> bool {
    normalize_address(address).is_ok()
}

fn is_placeholder(canonical: &str) -> bool {
    let hex = &canonical[2..];
    let first = hex.as_bytes()[0];
    if hex.bytes().all(|b| b == first) {
        return true;
    }
    // 0x0000000000000001 ..= 0x000000000000000f
    if hex[..ADDRESS_HEX_LEN - 1].bytes().all(|b| b == b'0') {
        return true;
    }
    PLACEHOLDERS.contains(&canonical)
}
