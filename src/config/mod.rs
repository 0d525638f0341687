//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `INTERACT_WORK_DIR` and `INTERACT_LOG_LEVEL` env overrides.
//!
//! # Module layout
//!
//! - **types**: resolved configuration structs (`Config`,
//!   `ComponentIdsConfig`, `RateLimitConfig`, ...).
//! - **raw**: TOML deserialization types with serde defaults; private.
//! - **load**: `merge_toml`, base-chain loading, validation, `load`,
//!   `load_from`, `expand_home`.

mod load;
mod raw;
mod types;

pub use load::{expand_home, load, load_from};
pub use types::*;

#[cfg(test)]
impl Config {
    /// Built-in defaults rooted at `work_dir`. Nothing is read from disk.
    pub fn test_default(work_dir: &std::path::Path) -> Self {
        let work_dir = work_dir.to_string_lossy();
        load::resolve(raw::RawConfig::default(), Some(&work_dir), None).unwrap()
    }
}
