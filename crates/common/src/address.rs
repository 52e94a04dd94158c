//! Recipient address normalization.
//!
//! Residents type their phone numbers in every imaginable shape
//! (`0812-345-678`, `+62 812 345 678`, `(0812) 345678`). The channel only
//! accepts the canonical international digit string, so every address is
//! normalized before it reaches the outbox.

/// Country calling code that replaces a national trunk prefix `0`.
pub const COUNTRY_PREFIX: &str = "62";

/// Reduce a raw phone number to its canonical digit string.
///
/// Non-digit characters are dropped, and a leading `0` is replaced by
/// [`COUNTRY_PREFIX`]. Input without any digits yields an empty string, which
/// callers treat as "not deliverable".
#[must_use]
pub fn normalize_address(raw: &str) -> String {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    match digits.strip_prefix('0') {
        Some(rest) => format!("{COUNTRY_PREFIX}{rest}"),
        None => digits,
    }
}

/// Whether `addr` is already in canonical form.
#[must_use]
pub fn is_canonical(addr: &str) -> bool {
    !addr.is_empty() && addr.bytes().all(|b| b.is_ascii_digit()) && !addr.starts_with('0')
}
