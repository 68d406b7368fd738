//! Cooperative cancellation for blocking outbox operations.
//!
//! A `CancelToken` is a cloneable flag that blocking calls poll at their
//! safe points (before a store transaction commits, before a retry attempt
//! starts). Background workers can also sleep on a token, waking early as
//! soon as it is cancelled.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn new(cancelled: bool) -> Self {
        Self {
            cancelled: Mutex::new(cancelled),
            cond: Condvar::new(),
            children: Mutex::new(Vec::new()),
        }
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        // A poisoned flag is still a valid bool.
        self.cancelled.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn cancel(&self) {
        {
            let mut flag = self.flag();
            if *flag {
                return;
            }
            *flag = true;
        }
        self.cond.notify_all();

        let children = {
            let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *children)
        };
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel();
        }
    }
}

/// Cloneable cancellation signal. All clones observe the same state.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner::new(false)),
        }
    }

    /// A token nobody else holds, for callers that never cancel.
    pub fn none() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.inner.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.flag()
    }

    /// Create a token that is cancelled whenever `self` is.
    ///
    /// Cancelling the child does not affect the parent.
    pub fn child(&self) -> CancelToken {
        let mut children = self.inner.children.lock().unwrap_or_else(|e| e.into_inner());
        let child = Arc::new(Inner::new(self.is_cancelled()));
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child));
        CancelToken { inner: child }
    }

    /// Block for up to `timeout`, returning early if the token is cancelled.
    ///
    /// Returns `true` when the token is cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.inner.flag();
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            flag = match self.inner.cond.wait_timeout(flag, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }
}
