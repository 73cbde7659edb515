//! Host port accounting for one worker process.
//!
//! The pool covers an inclusive port range. Units are either free or in use;
//! `acquire` and `release` adjust the in-use set incrementally, and
//! [`PortPool::update_used_ports`] replaces it with what the container runtime
//! actually holds. All operations run under one lock.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("insufficient ports: requested {requested}, {available} free")]
    Insufficient { requested: usize, available: usize },
    #[error("empty port range {min}-{max}")]
    EmptyRange { min: u16, max: u16 },
}

#[derive(Debug)]
pub struct PortPool {
    min: u16,
    max: u16,
    used: Mutex<BTreeSet<u16>>,
}

impl PortPool {
    /// Pool over `min..=max`.
    pub fn new(min: u16, max: u16) -> Result<Self, PoolError> {
        if min > max {
            return Err(PoolError::EmptyRange { min, max });
        }
        Ok(Self {
            min,
            max,
            used: Mutex::new(BTreeSet::new()),
        })
    }

    pub fn capacity(&self) -> usize {
        usize::from(self.max - self.min) + 1
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.min..=self.max).contains(&port)
    }

    pub fn free_count(&self) -> usize {
        self.capacity() - self.lock().len()
    }

    pub fn used_ports(&self) -> Vec<u16> {
        self.lock().iter().copied().collect()
    }

    /// Claim `n` free ports, lowest first. Claims nothing on failure.
    pub fn acquire(&self, n: usize) -> Result<Vec<u16>, PoolError> {
        let mut used = self.lock();
        let available = self.capacity() - used.len();
        if n > available {
            return Err(PoolError::Insufficient {
                requested: n,
                available,
            });
        }

        let ports: Vec<u16> = (self.min..=self.max)
            .filter(|port| !used.contains(port))
            .take(n)
            .collect();
        used.extend(ports.iter().copied());

        debug!(?ports, free = available - n, "Acquired ports");
        Ok(ports)
    }

    /// Return ports to the pool. Free or out-of-range ports are ignored.
    pub fn release(&self, ports: &[u16]) {
        let mut used = self.lock();
        for port in ports {
            used.remove(port);
        }
        debug!(?ports, free = self.capacity() - used.len(), "Released ports");
    }

    /// Replace the in-use view with the ports the runtime reports as bound.
    /// Ports outside the pool's range are not ours to track and are skipped.
    pub fn update_used_ports(&self, ports: impl IntoIterator<Item = u16>) {
        let resynced: BTreeSet<u16> = ports.into_iter().filter(|p| self.contains(*p)).collect();
        let mut used = self.lock();
        if *used != resynced {
            debug!(before = used.len(), after = resynced.len(), "Port pool resynced");
        }
        *used = resynced;
    }

    pub fn enough_left(&self, n: usize) -> bool {
        self.free_count() >= n
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<u16>> {
        self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
