//! Cooperative shutdown signal
//!
//! Shared by async tasks (fan loop, MQTT worker) and dedicated threads
//! (camera capture, serial reader). Once triggered it stays triggered.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    flag: AtomicBool,
    notify: Notify,
    lock: Mutex<()>,
    cvar: Condvar,
}

/// Cloneable handle; all clones observe the same signal
#[derive(Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown and wake every waiter
    pub fn trigger(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
        // Holding the lock closes the gap between a blocking waiter's flag check and its wait.
        let _guard = self.inner.lock.lock();
        self.inner.cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        let notified = self.inner.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_triggered() {
            return;
        }
        notified.await;
    }

    /// Sleep for `dur` unless shutdown arrives first. Returns true on shutdown.
    pub async fn sleep(&self, dur: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(dur) => self.is_triggered(),
            _ = self.wait() => true,
        }
    }

    /// Blocking variant for dedicated threads. Returns true on shutdown.
    pub fn sleep_blocking(&self, dur: Duration) -> bool {
        let mut guard = self.inner.lock.lock();
        if self.is_triggered() {
            return true;
        }
        self.inner.cvar.wait_for(&mut guard, dur);
        self.is_triggered()
    }
}

impl std::fmt::Debug for Shutdown {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shutdown")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
