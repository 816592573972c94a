//! Column name constants for SQL row extraction.
//!
//! These constants are used with `sqlx::Row::try_get()` to extract values
//! from query results, so that a typo fails to compile instead of failing at
//! runtime.

/// The `blocks.key` column: the derived storage key.
pub(crate) const COL_KEY: &str = "key";

/// The `blocks.data` column: the stored value.
pub(crate) const COL_DATA: &str = "data";
