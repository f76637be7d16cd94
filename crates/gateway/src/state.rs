use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::{
    origin::OriginPolicy,
    readiness::{Readiness, ReadinessState},
    realtime::RealtimeRegistry,
    store::Store,
};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across async tasks.
///
/// Holds only the read side of readiness; the write side stays with the
/// bootstrap sequencer.
pub struct GatewayState {
    /// Server version string.
    pub version: String,
    /// Hostname reported by the health endpoint.
    pub hostname: String,
    /// Configured listen port (may be 0 for ephemeral binds).
    pub port: u16,
    pub origin: Arc<OriginPolicy>,
    pub readiness: Readiness,
    pub realtime: RealtimeRegistry,
    /// Store handle, installed once by the sequencer before the store is
    /// marked connected.
    store: OnceCell<Arc<dyn Store>>,
}

impl GatewayState {
    pub fn new(origin: OriginPolicy, readiness: Readiness, port: u16) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".into());

        Arc::new(Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            hostname,
            port,
            origin: Arc::new(origin),
            readiness,
            realtime: RealtimeRegistry::new(),
            store: OnceCell::new(),
        })
    }

    pub fn readiness(&self) -> ReadinessState {
        self.readiness.snapshot()
    }

    /// The connected store, if any. Gated routes can rely on `Some`.
    pub fn store(&self) -> Option<Arc<dyn Store>> {
        self.store.get().map(Arc::clone)
    }

    /// Returns `false` if a store was already installed.
    pub(crate) fn install_store(&self, store: Arc<dyn Store>) -> bool {
        self.store.set(store).is_ok()
    }
}
