//! Named exclusive leases.
//!
//! A lease keeps two runs from working on the same resource at once, for
//! example two NRTM v4 server runs writing into the same directory. Leases
//! are non-blocking: a caller that cannot get one skips its work.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

/// Registry handing out at most one [`Lease`] per name.
#[derive(Debug, Default)]
pub struct LeaseRegistry {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

/// Exclusive hold on a name, released on drop.
#[derive(Debug)]
pub struct Lease {
    name: String,
    _guard: OwnedMutexGuard<()>,
}

impl Lease {
    /// Name the lease was acquired for.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LeaseRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `name` if nobody holds it.
    #[must_use]
    pub fn try_acquire(&self, name: &str) -> Option<Lease> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(name.to_owned()).or_default())
        };
        match lock.try_lock_owned() {
            Ok(guard) => Some(Lease {
                name: name.to_owned(),
                _guard: guard,
            }),
            Err(_) => {
                debug!(lease = name, "lease already held");
                None
            }
        }
    }
}
