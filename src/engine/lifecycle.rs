//! Process-wide, reference-counted TLS engine lifecycle
//!
//! Every TLS socket holds one [`LifecycleLease`]. The first lease installs the
//! engine callbacks and bootstraps the engine; dropping the last one removes
//! the callbacks again. Bootstrap itself runs once per process.
//!
//! The lock-slot array is allocated on first use and leaked on purpose: the
//! engine may still be unwinding a slot lock when the callbacks are removed,
//! and a later acquisition reuses the same array. This is only a problem for
//! hosts that repeatedly load and unload this code.

use super::locks::{current_thread_id, LockSlots};
use super::{EngineCallbacks, TlsEngine};
use crate::metrics;
use crate::Result;
use parking_lot::Mutex;

/// Lifecycle manager for one TLS engine
pub struct TlsLifecycle<E> {
    engine: E,
    state: Mutex<LifecycleState>,
}

#[derive(Debug)]
struct LifecycleState {
    open: usize,
    initialized: bool,
    should_initialize: bool,
    acquired: bool,
    callbacks_installed: bool,
    slots: Option<&'static LockSlots>,
}

/// Point-in-time copy of the lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    /// Live leases
    pub open: usize,
    /// Engine bootstrap has run
    pub initialized: bool,
    /// This component initializes the engine
    pub should_initialize: bool,
    /// Thread-id and locking callbacks are installed
    pub callbacks_installed: bool,
    /// Size of the lock-slot array, once allocated
    pub lock_slots: Option<usize>,
}

impl<E: TlsEngine> TlsLifecycle<E> {
    /// Create a manager in the uninitialized state
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            state: Mutex::new(LifecycleState {
                open: 0,
                initialized: false,
                should_initialize: true,
                acquired: false,
                callbacks_installed: false,
                slots: None,
            }),
        }
    }

    /// The managed engine
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Choose whether this component initializes the engine.
    ///
    /// Only effective before the first acquisition; afterwards the call is
    /// accepted and ignored.
    pub fn set_should_initialize(&self, should_initialize: bool) {
        let mut state = self.state.lock();
        if state.acquired {
            tracing::debug!(
                should_initialize,
                "tls engine already acquired, ignoring initialization setting"
            );
            return;
        }
        state.should_initialize = should_initialize;
    }

    /// Take one reference on the engine.
    ///
    /// Unless the host owns engine initialization, this allocates the lock
    /// slots on first use, installs the callbacks on the 0 → 1 transition and
    /// bootstraps the engine the first time. On error the count is unchanged.
    pub fn acquire(&self) -> Result<LifecycleLease<'_, E>> {
        let mut state = self.state.lock();

        if state.should_initialize {
            let slots = match state.slots {
                Some(slots) => slots,
                None => {
                    let slots: &'static LockSlots =
                        Box::leak(Box::new(LockSlots::new(self.engine.lock_count())?));
                    tracing::debug!(slots = slots.len(), "allocated tls engine lock slots");
                    state.slots = Some(slots);
                    slots
                }
            };

            let installed_now = state.open == 0 && !state.callbacks_installed;
            if installed_now {
                self.engine.install_callbacks(EngineCallbacks {
                    thread_id: current_thread_id,
                    locks: slots,
                });
                state.callbacks_installed = true;
            }

            if !state.initialized {
                if let Err(e) = self.engine.bootstrap() {
                    if installed_now {
                        self.engine.remove_callbacks();
                        state.callbacks_installed = false;
                    }
                    tracing::warn!(error = %e, "tls engine bootstrap failed");
                    return Err(e);
                }
                state.initialized = true;
                tracing::info!("tls engine initialized");
            }
        }

        state.acquired = true;
        state.open += 1;
        tracing::trace!(open = state.open, "tls engine reference acquired");
        metrics::gauges::engine_references(state.open);

        Ok(LifecycleLease { manager: self })
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.open = state.open.saturating_sub(1);
        tracing::trace!(open = state.open, "tls engine reference released");
        metrics::gauges::engine_references(state.open);

        if state.open == 0 && state.callbacks_installed {
            // The slot array stays allocated for a later acquisition.
            self.engine.remove_callbacks();
            state.callbacks_installed = false;
            tracing::debug!("tls engine callbacks removed");
        }
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> LifecycleSnapshot {
        let state = self.state.lock();
        LifecycleSnapshot {
            open: state.open,
            initialized: state.initialized,
            should_initialize: state.should_initialize,
            callbacks_installed: state.callbacks_installed,
            lock_slots: state.slots.map(LockSlots::len),
        }
    }
}

impl<E> std::fmt::Debug for TlsLifecycle<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsLifecycle")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

/// One reference on a [`TlsLifecycle`], released on drop
#[must_use = "dropping the lease releases the engine reference"]
pub struct LifecycleLease<'a, E: TlsEngine> {
    manager: &'a TlsLifecycle<E>,
}

impl<'a, E: TlsEngine> LifecycleLease<'a, E> {
    /// The engine this lease keeps alive
    pub fn engine(&self) -> &'a E {
        &self.manager.engine
    }

    /// Release the reference now
    pub fn release(self) {
        drop(self)
    }
}

impl<E: TlsEngine> Drop for LifecycleLease<'_, E> {
    fn drop(&mut self) {
        self.manager.release();
    }
}

impl<E: TlsEngine> std::fmt::Debug for LifecycleLease<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("LifecycleLease")
    }
}
