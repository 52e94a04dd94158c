//! Shared types, error definitions, and utilities used across all rukun crates.

pub mod address;
pub mod error;
pub mod time;

pub use {
    address::{COUNTRY_PREFIX, is_canonical, normalize_address},
    error::{Error, FromMessage, Result},
    time::now_ms,
};
