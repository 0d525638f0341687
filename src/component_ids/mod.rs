//! Component IDs: restart-safe identifiers for buttons and selection menus.
//!
//! A handler mints an ID while building a reply; the chat platform echoes it
//! back when the user interacts with the control, possibly long after a
//! restart. The wire token is an opaque surrogate key (a hyphenated UUID)
//! and the `(handler_prefix, args, lifespan)` triple lives in a
//! [`PayloadStore`](store::PayloadStore).
//!
//! ```text
//! mint ──► store.put ──► key ──► codec::encode_token ──► "4f1c…-…"
//! "4f1c…-…" ──► codec::decode_token ──► store.get (touch) ──► ComponentId
//! ```
//!
//! `Regular` entries expire after a configurable period without use;
//! `Permanent` entries stay until purged.

pub mod codec;
pub mod generator;
pub mod store;
pub mod sweeper;

pub use generator::{ComponentIdGenerator, ComponentIds, GeneratorConfig};
pub use store::{MemoryStore, PayloadStore, SqliteStore};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Eviction policy of a component ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Lifespan {
    /// Evicted after the regular TTL passes without the ID being resolved.
    Regular,
    /// Never evicted by sweeps; removed only by an explicit purge.
    Permanent,
}

impl Lifespan {
    pub fn as_str(self) -> &'static str {
        match self {
            Lifespan::Regular => "REGULAR",
            Lifespan::Permanent => "PERMANENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "REGULAR" => Some(Lifespan::Regular),
            "PERMANENT" => Some(Lifespan::Permanent),
            _ => None,
        }
    }
}

/// The logical content behind a wire token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ComponentId {
    /// Registry key of the handler that owns the control.
    pub handler_prefix: String,
    /// Caller-supplied arguments, immutable once minted.
    pub args: Vec<String>,
    pub lifespan: Lifespan,
}

impl ComponentId {
    pub fn new(handler_prefix: impl Into<String>, args: Vec<String>, lifespan: Lifespan) -> Self {
        Self {
            handler_prefix: handler_prefix.into(),
            args,
            lifespan,
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComponentIdError {
    /// The token is not something this bot ever minted.
    #[error("malformed component id: {0}")]
    Malformed(String),

    /// The token decoded, but its entry is gone (evicted or purged).
    #[error("component id has expired")]
    Expired,

    #[error("handler prefix must not be empty")]
    EmptyPrefix,

    #[error("encoded arguments are {len} bytes, limit is {max}")]
    ArgsTooLong { len: usize, max: usize },

    #[error("wire tokens need {required} characters but the limit is {max}")]
    TokenWidth { required: usize, max: usize },

    #[error("payload store unavailable: {0}")]
    StorageUnavailable(String),
}
