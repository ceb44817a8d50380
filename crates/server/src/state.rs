//! Application state

use std::sync::Arc;

use crate::auth::{FingerprintPolicy, SessionValidator};
use crate::notify::Notifier;
use crate::presence::PresenceEngine;
use crate::registry::ConnectionRegistry;
use crate::store::SharedStore;

/// Shared handles passed to every handler and session loop
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub presence: Arc<PresenceEngine>,
    pub notifier: Notifier,
    pub validator: Arc<SessionValidator>,
    pub store: SharedStore,
}

impl AppState {
    pub fn new(store: SharedStore, policy: FingerprintPolicy) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            presence: Arc::new(PresenceEngine::new(registry.clone(), store.clone())),
            notifier: Notifier::new(registry.clone(), store.clone()),
            validator: Arc::new(SessionValidator::new(store.clone(), policy)),
            registry,
            store,
        }
    }
}
