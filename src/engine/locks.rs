//! Lock slots handed to the TLS engine
//!
//! The engine asks for a fixed number of independent mutual-exclusion units
//! and drives them through a lock/unlock callback, so each slot is a raw
//! mutex rather than a guard-based one: the lock and the matching unlock
//! arrive as two separate calls.

use crate::Result;
use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock or unlock request for a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Acquire the slot
    Lock,
    /// Release the slot
    Unlock,
}

/// Fixed array of raw mutexes, one per engine lock slot
pub struct LockSlots {
    slots: Box<[RawMutex]>,
}

impl std::fmt::Debug for LockSlots {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSlots")
            .field("len", &self.slots.len())
            .finish()
    }
}

impl LockSlots {
    /// Allocate `count` unlocked slots
    pub fn new(count: usize) -> Result<Self> {
        let mut slots = Vec::new();
        slots.try_reserve_exact(count)?;
        slots.extend((0..count).map(|_| RawMutex::INIT));
        Ok(Self {
            slots: slots.into_boxed_slice(),
        })
    }

    /// Number of slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots at all
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether `slot` is currently held by someone
    pub fn is_locked(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(|m| m.is_locked())
    }

    /// The locking callback.
    ///
    /// An out-of-range slot, or an unlock of a slot nobody holds, means the
    /// engine's shared state can no longer be trusted: the process aborts.
    pub fn apply(&self, mode: LockMode, slot: usize) {
        let Some(mutex) = self.slots.get(slot) else {
            fatal(mode, slot, "slot out of range");
        };
        match mode {
            LockMode::Lock => mutex.lock(),
            LockMode::Unlock => {
                if !mutex.is_locked() {
                    fatal(mode, slot, "slot is not locked");
                }
                // SAFETY: the engine only unlocks slots it locked through this
                // callback, and we just checked the slot is held.
                unsafe { mutex.unlock() }
            }
        }
    }

    /// Lock `slot` for the lifetime of the returned guard
    pub fn guard(&self, slot: usize) -> SlotGuard<'_> {
        self.apply(LockMode::Lock, slot);
        SlotGuard { slots: self, slot }
    }
}

/// Holds one slot locked until dropped
#[derive(Debug)]
pub struct SlotGuard<'a> {
    slots: &'a LockSlots,
    slot: usize,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.slots.apply(LockMode::Unlock, self.slot);
    }
}

fn fatal(mode: LockMode, slot: usize, reason: &str) -> ! {
    tracing::error!(?mode, slot, reason, "tls engine lock slot failure, aborting");
    std::process::abort()
}

/// Thread identification callback: a small, stable id per OS thread
pub fn current_thread_id() -> u64 {
    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static THREAD_ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    THREAD_ID.with(|id| *id)
}
