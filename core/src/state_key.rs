//! Canonical identity strings for an ingredient + unit pair.
//!
//! The same key is used to group rows during aggregation and to find the
//! durable check state of a line across regenerations, so it has to be
//! insensitive to casing, surrounding whitespace, and a trailing period on
//! the unit ("Tbsp." and "tbsp" are the same thing).

pub const KEY_SEPARATOR: &str = "::";

/// Lowercase, trim, and drop trailing periods from a unit.
#[must_use]
pub fn normalize_unit(unit: &str) -> String {
    unit.trim().trim_end_matches('.').trim().to_lowercase()
}

#[must_use]
pub fn create_key(name: &str, unit: &str) -> String {
    format!(
        "{}{KEY_SEPARATOR}{}",
        name.trim().to_lowercase(),
        normalize_unit(unit)
    )
}

/// Normalize an already-built key. Idempotent.
#[must_use]
pub fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase()
}
