//! [`ComponentIdGenerator`]: mints wire tokens and resolves them back.
//!
//! One generator is built at startup and shared as `Arc` with every handler
//! (through [`ComponentIds`]), the dispatcher and the sweeper.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::clock::Clock;

use super::codec::{self, TOKEN_LEN};
use super::store::PayloadStore;
use super::{ComponentId, ComponentIdError, Lifespan};

/// Callback invoked with each component ID removed by a sweep.
pub type EvictionListener = Box<dyn Fn(&ComponentId) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Upper bound on wire token length imposed by the chat platform.
    pub wire_token_max_length: usize,
    /// Upper bound on the encoded size of a minted argument list.
    pub max_args_length: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            wire_token_max_length: 100,
            max_args_length: 4000,
        }
    }
}

pub struct ComponentIdGenerator {
    store: Arc<dyn PayloadStore>,
    clock: Arc<dyn Clock>,
    config: GeneratorConfig,
    listeners: RwLock<Vec<EvictionListener>>,
}

impl std::fmt::Debug for ComponentIdGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentIdGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ComponentIdGenerator {
    /// Fails if surrogate tokens cannot fit `config.wire_token_max_length`.
    pub fn new(
        store: Arc<dyn PayloadStore>,
        clock: Arc<dyn Clock>,
        config: GeneratorConfig,
    ) -> Result<Self, ComponentIdError> {
        if config.wire_token_max_length < TOKEN_LEN {
            return Err(ComponentIdError::TokenWidth {
                required: TOKEN_LEN,
                max: config.wire_token_max_length,
            });
        }
        Ok(Self {
            store,
            clock,
            config,
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn config(&self) -> GeneratorConfig {
        self.config
    }

    /// Mint a wire token for `(handler_prefix, args, lifespan)`.
    ///
    /// The token is only returned once the store has accepted the payload.
    pub fn mint(
        &self,
        handler_prefix: &str,
        args: Vec<String>,
        lifespan: Lifespan,
    ) -> Result<String, ComponentIdError> {
        if handler_prefix.is_empty() {
            return Err(ComponentIdError::EmptyPrefix);
        }
        let len = codec::encoded_args_len(&args);
        if len > self.config.max_args_length {
            return Err(ComponentIdError::ArgsTooLong {
                len,
                max: self.config.max_args_length,
            });
        }

        let id = ComponentId::new(handler_prefix, args, lifespan);
        let key = self.store.put(&id, self.clock.now())?;
        Ok(codec::encode_token(&key))
    }

    /// Resolve a wire token, marking its entry as used.
    ///
    /// `Malformed` means the token was never ours; `Expired` means it was,
    /// but the entry has since been evicted or purged.
    pub fn resolve(&self, token: &str) -> Result<ComponentId, ComponentIdError> {
        let key = codec::decode_token(token)?;
        match self.store.get(&key, self.clock.now())? {
            Some(id) => Ok(id),
            None => {
                debug!(%key, "component id not found in store");
                Err(ComponentIdError::Expired)
            }
        }
    }

    /// Remove a token's entry regardless of lifespan.
    pub fn purge(&self, token: &str) -> Result<bool, ComponentIdError> {
        let key = codec::decode_token(token)?;
        self.store.purge(&key)
    }

    /// Evict stale `Regular` entries and notify eviction listeners.
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> Result<usize, ComponentIdError> {
        let evicted = self.store.sweep(self.clock.now())?;
        if evicted.is_empty() {
            return Ok(0);
        }

        info!(count = evicted.len(), "evicted expired component ids");
        let listeners = self.listeners.read().unwrap_or_else(PoisonError::into_inner);
        for (key, id) in &evicted {
            debug!(%key, prefix = %id.handler_prefix, "component id evicted");
            for listener in listeners.iter() {
                listener(id);
            }
        }
        Ok(evicted.len())
    }

    /// Register a callback for component IDs removed by [`sweep`](Self::sweep).
    pub fn on_evicted(&self, listener: EvictionListener) {
        match self.listeners.write() {
            Ok(mut listeners) => listeners.push(listener),
            Err(poisoned) => {
                warn!("eviction listener list poisoned; registering anyway");
                poisoned.into_inner().push(listener);
            }
        }
    }

    pub fn stored_count(&self) -> Result<usize, ComponentIdError> {
        self.store.len()
    }
}

/// Per-handler view of the generator, bound to the handler's prefix.
///
/// Handlers receive this at construction and use it to mint IDs for the
/// controls they attach to replies.
#[derive(Debug, Clone)]
pub struct ComponentIds {
    prefix: String,
    generator: Arc<ComponentIdGenerator>,
}

impl ComponentIds {
    pub fn new(generator: Arc<ComponentIdGenerator>, prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            generator,
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Mint a `Regular` ID carrying `args`.
    pub fn mint(&self, args: &[&str]) -> Result<String, ComponentIdError> {
        self.mint_with(Lifespan::Regular, args)
    }

    pub fn mint_with(&self, lifespan: Lifespan, args: &[&str]) -> Result<String, ComponentIdError> {
        let args = args.iter().map(|a| a.to_string()).collect();
        self.generator.mint(&self.prefix, args, lifespan)
    }
}
