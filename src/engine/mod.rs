//! TLS engine contract and lifecycle
//!
//! This module handles:
//! * The thin contract the transport needs from the underlying TLS library
//! * The rustls-backed engine used by [`crate::TlsSocket`]
//! * The process-wide lifecycle manager shared by all TLS sockets

mod lifecycle;
mod locks;

pub use lifecycle::{LifecycleLease, LifecycleSnapshot, TlsLifecycle};
pub use locks::{current_thread_id, LockMode, LockSlots, SlotGuard};

use crate::{Error, Result};
use parking_lot::RwLock;
use rustls::crypto::CryptoProvider;
use rustls::{ClientConfig, RootCertStore};
use std::sync::{Arc, OnceLock};

/// Callbacks installed into the engine while at least one TLS socket is live
#[derive(Debug, Clone, Copy)]
pub struct EngineCallbacks {
    /// Thread identification
    pub thread_id: fn() -> u64,
    /// Lock slots driven by [`EngineCallbacks::lock`]
    pub locks: &'static LockSlots,
}

impl EngineCallbacks {
    /// Locking callback: lock or unlock `slot`
    pub fn lock(&self, mode: LockMode, slot: usize) {
        self.locks.apply(mode, slot)
    }
}

/// What the transport needs from a TLS library
pub trait TlsEngine: Send + Sync {
    /// Number of lock slots the engine wants; queried once
    fn lock_count(&self) -> usize;

    /// One-time library bootstrap
    fn bootstrap(&self) -> Result<()>;

    /// Install thread-id and locking callbacks
    fn install_callbacks(&self, callbacks: EngineCallbacks);

    /// Remove previously installed callbacks
    fn remove_callbacks(&self);
}

/// Slot guarding the cached system root store
pub const SLOT_ROOT_STORE: usize = 0;

const RUSTLS_LOCK_SLOTS: usize = 1;

/// rustls-backed engine
///
/// Bootstrap installs the process default crypto provider unless the host
/// already did. Loading the system root store scans the filesystem, so it is
/// done once and cached; concurrent cache misses are serialized on
/// [`SLOT_ROOT_STORE`] while callbacks are installed.
#[derive(Debug, Default)]
pub struct RustlsEngine {
    callbacks: RwLock<Option<EngineCallbacks>>,
    system_roots: RwLock<Option<Arc<RootCertStore>>>,
}

impl RustlsEngine {
    /// Create an engine with no callbacks installed
    pub fn new() -> Self {
        Self::default()
    }

    /// Crypto provider for new TLS contexts.
    ///
    /// The process default when one is installed, otherwise aws-lc-rs.
    pub fn provider(&self) -> Arc<CryptoProvider> {
        CryptoProvider::get_default()
            .cloned()
            .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
    }

    /// System trust roots, loaded on first use
    pub fn system_roots(&self) -> Arc<RootCertStore> {
        if let Some(roots) = self.system_roots.read().as_ref() {
            return roots.clone();
        }

        let _slot = self.lock_slot(SLOT_ROOT_STORE);
        if let Some(roots) = self.system_roots.read().as_ref() {
            return roots.clone();
        }

        let roots = Arc::new(load_system_roots());
        *self.system_roots.write() = Some(roots.clone());
        roots
    }

    /// Whether callbacks are currently installed
    pub fn callbacks_installed(&self) -> bool {
        self.callbacks.read().is_some()
    }

    fn lock_slot(&self, slot: usize) -> Option<SlotGuard<'static>> {
        let callbacks = (*self.callbacks.read())?;
        tracing::trace!(slot, thread = (callbacks.thread_id)(), "locking engine slot");
        Some(callbacks.locks.guard(slot))
    }
}

impl TlsEngine for RustlsEngine {
    fn lock_count(&self) -> usize {
        RUSTLS_LOCK_SLOTS
    }

    fn bootstrap(&self) -> Result<()> {
        if CryptoProvider::get_default().is_none() {
            // Losing the race to another installer is fine: a default exists either way.
            if rustls::crypto::aws_lc_rs::default_provider()
                .install_default()
                .is_err()
            {
                tracing::debug!("crypto provider installed concurrently");
            }
        } else {
            tracing::debug!("using crypto provider installed by host");
        }

        let _ = ClientConfig::builder_with_provider(self.provider())
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Engine(format!("crypto provider unusable: {}", e)))?;
        Ok(())
    }

    fn install_callbacks(&self, callbacks: EngineCallbacks) {
        *self.callbacks.write() = Some(callbacks);
    }

    fn remove_callbacks(&self) {
        *self.callbacks.write() = None;
    }
}

/// Native roots, falling back to the bundled Mozilla roots when the
/// platform store yields nothing usable
fn load_system_roots() -> RootCertStore {
    let result = rustls_native_certs::load_native_certs();
    for error in &result.errors {
        tracing::warn!(%error, "error loading native root certificate");
    }

    let mut store = RootCertStore::empty();
    let (added, ignored) = store.add_parsable_certificates(result.certs);
    tracing::debug!(added, ignored, "loaded native root certificates");

    if store.is_empty() {
        tracing::warn!("no usable native root certificates, using bundled roots");
        store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }
    store
}

static LIFECYCLE: OnceLock<TlsLifecycle<RustlsEngine>> = OnceLock::new();

/// The process-wide TLS engine lifecycle
pub fn lifecycle() -> &'static TlsLifecycle<RustlsEngine> {
    LIFECYCLE.get_or_init(|| TlsLifecycle::new(RustlsEngine::new()))
}

/// Choose whether this crate initializes the TLS engine.
///
/// Pass `false` when the host process sets up rustls itself. Must be called
/// before the first [`crate::TlsSocket`] is created; later calls are ignored.
pub fn set_initialize_tls_engine(should_initialize: bool) {
    lifecycle().set_should_initialize(should_initialize)
}
