//! # License Validation
//!
//! A pure predicate over a license token and the module's own id. No
//! network, no clock: the runtime only checks shape, the commercial backend
//! that issues tokens is out of scope.
//!
//! ## Token Format
//! ```text
//! POS-<MODULE-ID-UPPERCASE>-<YYYYMM>-<HASH6>
//!
//! POS-INVENTORY-202608-A1B2C3
//!     └────┬───┘ └─┬──┘ └─┬──┘
//!      module    period  6 uppercase alphanumerics
//! ```
//!
//! The core module is always valid: the terminal cannot sell without it,
//! so it is never license-gated.

/// The module id that is always considered licensed.
pub const CORE_MODULE_ID: &str = "pos-core";

/// Validates a license token for a module.
pub fn validate(module_id: &str, token: &str) -> bool {
    if module_id == CORE_MODULE_ID {
        return true;
    }

    let prefix = format!("POS-{}-", module_id.to_uppercase());
    let Some(rest) = token.strip_prefix(prefix.as_str()) else {
        return false;
    };

    let mut parts = rest.split('-');
    let (Some(period), Some(hash), None) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };

    period.len() == 6
        && period.chars().all(|c| c.is_ascii_digit())
        && hash.len() == 6
        && hash
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_module_always_valid() {
        assert!(validate(CORE_MODULE_ID, ""));
        assert!(validate(CORE_MODULE_ID, "garbage"));
    }

    #[test]
    fn test_well_formed_token() {
        assert!(validate("inventory", "POS-INVENTORY-202608-A1B2C3"));
        assert!(validate("customers", "POS-CUSTOMERS-202512-ZZ9900"));
    }

    #[test]
    fn test_malformed_tokens_rejected() {
        assert!(!validate("inventory", ""));
        assert!(!validate("inventory", "POS-INVENTORY-202608")); // missing hash
        assert!(!validate("inventory", "POS-INVENTORY-2026-A1B2C3")); // short period
        assert!(!validate("inventory", "POS-INVENTORY-2026AB-A1B2C3")); // non-digit period
        assert!(!validate("inventory", "POS-INVENTORY-202608-a1b2c3")); // lowercase hash
        assert!(!validate("inventory", "POS-CUSTOMERS-202608-A1B2C3")); // wrong module
        assert!(!validate("inventory", "POS-INVENTORY-202608-A1B2C3-EXTRA"));
    }
}
