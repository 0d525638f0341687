//! Prefix → handler table. Filled once at startup, read-only afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::handler::InteractionHandler;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate handler prefix '{0}'")]
    DuplicatePrefix(String),

    #[error("handler prefix must not be empty")]
    EmptyPrefix,
}

#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn InteractionHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("prefixes", &self.prefixes())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `prefix`.
    ///
    /// Registering the same handler object twice is a no-op; a different
    /// handler under a taken prefix is an error.
    pub fn register(
        &mut self,
        prefix: &str,
        handler: Arc<dyn InteractionHandler>,
    ) -> Result<(), RegistryError> {
        if prefix.is_empty() {
            return Err(RegistryError::EmptyPrefix);
        }
        if let Some(existing) = self.handlers.get(prefix) {
            if std::ptr::addr_eq(Arc::as_ptr(existing), Arc::as_ptr(&handler)) {
                return Ok(());
            }
            return Err(RegistryError::DuplicatePrefix(prefix.to_string()));
        }
        debug!(%prefix, "handler registered");
        self.handlers.insert(prefix.to_string(), handler);
        Ok(())
    }

    /// Register under the prefix derived from the handler's [`CommandSpec`](super::CommandSpec).
    pub fn register_handler(
        &mut self,
        handler: Arc<dyn InteractionHandler>,
    ) -> Result<(), RegistryError> {
        let prefix = handler.spec().prefix();
        self.register(&prefix, handler)
    }

    pub fn lookup(&self, prefix: &str) -> Option<&Arc<dyn InteractionHandler>> {
        self.handlers.get(prefix)
    }

    pub fn prefixes(&self) -> Vec<&str> {
        let mut prefixes: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        prefixes.sort_unstable();
        prefixes
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::CommandSpec;

    struct Named(CommandSpec);

    impl InteractionHandler for Named {
        fn spec(&self) -> &CommandSpec {
            &self.0
        }
    }

    fn handler(name: &str) -> Arc<dyn InteractionHandler> {
        Arc::new(Named(CommandSpec::slash(name, "")))
    }

    #[test]
    fn duplicate_prefix_with_other_handler_fails() {
        let mut registry = HandlerRegistry::new();
        registry.register("h", handler("a")).unwrap();
        assert_eq!(
            registry.register("h", handler("b")),
            Err(RegistryError::DuplicatePrefix("h".into()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn re_registering_same_handler_is_idempotent() {
        let mut registry = HandlerRegistry::new();
        let h = handler("a");
        registry.register("h", h.clone()).unwrap();
        registry.register("h", h).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn register_handler_uses_spec_prefix() {
        let mut registry = HandlerRegistry::new();
        registry.register_handler(handler("eval")).unwrap();
        registry.register_handler(handler("ping")).unwrap();
        assert!(registry.lookup("s-eval").is_some());
        assert!(registry.lookup("eval").is_none());
        assert_eq!(registry.prefixes(), vec!["s-eval", "s-ping"]);
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let mut registry = HandlerRegistry::new();
        assert_eq!(registry.register("", handler("a")), Err(RegistryError::EmptyPrefix));
        assert!(registry.is_empty());
    }
}
