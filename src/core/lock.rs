//! Interruptible sleeping locks.
//!
//! [`Gate`] is a reader/writer lock whose waits can be aborted: raising the
//! [`Interrupt`] it was created with wakes every waiter, which then gives up
//! with [`Interrupted`]. Holders are not affected; a guard that was already
//! handed out stays valid until it is dropped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// A lock wait was aborted by [`Interrupt::raise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("interrupted while waiting for the {0} lock")]
pub struct Interrupted(pub &'static str);

// ---------------------------------------------------------------------------
// Interrupt token
// ---------------------------------------------------------------------------

#[derive(Default)]
struct InterruptInner {
    raised: AtomicBool,
    gates: Mutex<Vec<Weak<GateState>>>,
}

/// Shared cancellation token for lock waits.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_raised(&self) -> bool {
        self.inner.raised.load(Ordering::SeqCst)
    }

    /// Abort all current and future lock waits.
    pub fn raise(&self) {
        self.inner.raised.store(true, Ordering::SeqCst);

        let mut gates = self.inner.gates.lock();
        gates.retain(|gate| match gate.upgrade() {
            Some(gate) => {
                // Taking the state lock orders the flag store before any
                // waiter's re-check.
                let _holders = gate.holders.lock();
                gate.cond.notify_all();
                true
            }
            None => false,
        });
    }

    fn register(&self, gate: &Arc<GateState>) {
        self.inner.gates.lock().push(Arc::downgrade(gate));
    }
}

impl std::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Holders {
    writer: bool,
    readers: usize,
    waiting_writers: usize,
}

#[derive(Default)]
struct GateState {
    holders: Mutex<Holders>,
    cond: Condvar,
}

/// Sleeping reader/writer lock with interruptible waits.
///
/// Writers are preferred: once a writer is queued, new readers wait behind
/// it.
pub struct Gate {
    name: &'static str,
    state: Arc<GateState>,
    interrupt: Interrupt,
}

impl Gate {
    pub fn new(name: &'static str, interrupt: &Interrupt) -> Self {
        let state = Arc::new(GateState::default());
        interrupt.register(&state);

        Self {
            name,
            state,
            interrupt: interrupt.clone(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Exclusive acquisition.
    pub fn lock(&self) -> Result<GateGuard<'_>, Interrupted> {
        let mut holders = self.state.holders.lock();
        holders.waiting_writers += 1;

        loop {
            if self.interrupt.is_raised() {
                holders.waiting_writers -= 1;
                // a reader may have been held back only by us
                self.state.cond.notify_all();
                return Err(Interrupted(self.name));
            }
            if !holders.writer && holders.readers == 0 {
                break;
            }
            self.state.cond.wait(&mut holders);
        }

        holders.waiting_writers -= 1;
        holders.writer = true;

        Ok(GateGuard {
            state: &self.state,
            shared: false,
        })
    }

    /// Shared acquisition; any number of shared holders may coexist.
    pub fn lock_shared(&self) -> Result<GateGuard<'_>, Interrupted> {
        let mut holders = self.state.holders.lock();

        loop {
            if self.interrupt.is_raised() {
                return Err(Interrupted(self.name));
            }
            if !holders.writer && holders.waiting_writers == 0 {
                break;
            }
            self.state.cond.wait(&mut holders);
        }

        holders.readers += 1;

        Ok(GateGuard {
            state: &self.state,
            shared: true,
        })
    }
}

impl std::fmt::Debug for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate").field("name", &self.name).finish()
    }
}

/// Releases the [`Gate`] on drop.
pub struct GateGuard<'a> {
    state: &'a GateState,
    shared: bool,
}

impl GateGuard<'_> {
    pub fn is_shared(&self) -> bool {
        self.shared
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut holders = self.state.holders.lock();
        if self.shared {
            holders.readers -= 1;
        } else {
            holders.writer = false;
        }
        self.state.cond.notify_all();
    }
}
