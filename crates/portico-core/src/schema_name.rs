//! Safe SQL schema identifiers derived from tenant domains
//!
//! Schema names are interpolated into DDL that cannot be parameterized, so
//! every call site interpolating a schema name must pass [`is_valid_identifier`]
//! first. [`generate_schema_name`] is the only producer of new names.

use crate::error::{Error, Result};

/// Prefix applied to every generated schema name. Guarantees the identifier
/// starts with a letter even when the domain starts with a digit.
pub const SCHEMA_PREFIX: &str = "t_";

/// PostgreSQL truncates identifiers beyond 63 bytes; we reject instead.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Derive a schema name from a tenant-supplied domain.
///
/// Lowercases the domain, collapses every run of characters outside
/// `[a-z0-9]` into a single `_`, prepends [`SCHEMA_PREFIX`], and truncates to
/// [`MAX_IDENTIFIER_LEN`] bytes. The derivation is deterministic: the same
/// domain always yields the same name.
pub fn generate_schema_name(domain: &str) -> Result<String> {
    let mut cleaned = String::with_capacity(domain.len());
    let mut pending_separator = false;

    for ch in domain.chars().flat_map(|c| c.to_lowercase()) {
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
            if pending_separator && !cleaned.is_empty() {
                cleaned.push('_');
            }
            cleaned.push(ch);
            pending_separator = false;
        } else {
            pending_separator = true;
        }
    }

    if cleaned.is_empty() {
        return Err(Error::InvalidDomain(format!(
            "domain '{}' contains no usable characters",
            domain
        )));
    }

    let mut name = format!("{}{}", SCHEMA_PREFIX, cleaned);
    name.truncate(MAX_IDENTIFIER_LEN);

    debug_assert!(is_valid_identifier(&name));
    Ok(name)
}

/// Accepts only `^[a-zA-Z][a-zA-Z0-9_]*$` with length <= 63 bytes.
///
/// This is the sole SQL-injection defense for schema DDL.
pub fn is_valid_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return false;
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
