use crate::{
    backend::{BackendType, StreamHandler},
    types::HashMap,
};
use std::sync::Arc;
use thiserror::Error;

/// Error returned when registering stream handlers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    /// A handler is already registered for the backend.
    #[error("stream handlers for backend {0} are already registered")]
    AlreadyRegistered(BackendType),
}

/// Process-wide table of stream handlers keyed by backend.
///
/// The host application builds the registry once at startup, registering each
/// backend it uses, and passes it by reference to every plan construction.
/// Registering the same backend twice is rejected, so handlers are never
/// replaced behind the back of plans already built.
#[derive(Debug, Default)]
pub struct StreamHandlerRegistry {
    handlers: HashMap<BackendType, Arc<dyn StreamHandler>>,
}

impl StreamHandlerRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler of `backend`.
    ///
    /// # Errors
    /// If `backend` already has a handler.
    pub fn register(
        &mut self,
        backend: BackendType,
        handler: Arc<dyn StreamHandler>,
    ) -> Result<(), RegistryError> {
        if self.handlers.contains_key(&backend) {
            return Err(RegistryError::AlreadyRegistered(backend));
        }
        tracing::debug!(%backend, "registered stream handlers");
        self.handlers.insert(backend, handler);
        Ok(())
    }

    /// Handler registered for `backend`, if any.
    #[must_use]
    pub fn handler(&self, backend: BackendType) -> Option<&Arc<dyn StreamHandler>> {
        self.handlers.get(&backend)
    }

    /// Whether `backend` has a handler.
    #[must_use]
    pub fn is_registered(&self, backend: BackendType) -> bool {
        self.handlers.contains_key(&backend)
    }

    /// Registered backends, in no particular order.
    pub fn backends(&self) -> impl Iterator<Item = BackendType> + '_ {
        self.handlers.keys().copied()
    }
}
