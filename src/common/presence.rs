use std::collections::BTreeSet;
use std::sync::Mutex;

use super::Host;

/// Registry of currently-known peer hostnames.
///
/// Read once per broadcast to seed the default expected-host set. Later
/// registry changes do not affect conversations already in flight.
pub trait Presence: Send + Sync {
    /// Snapshot of the currently-known hostnames.
    fn hosts(&self) -> Vec<Host>;
}

/// In-memory [`Presence`] registry backed by a sorted set.
#[derive(Debug, Default)]
pub struct MemoryPresence {
    hosts: Mutex<BTreeSet<Host>>,
}

impl MemoryPresence {
    /// Creates a registry pre-populated with the given hostnames.
    pub fn new<I, H>(hosts: I) -> Self
    where
        I: IntoIterator<Item = H>,
        H: Into<Host>,
    {
        Self {
            hosts: Mutex::new(hosts.into_iter().map(Into::into).collect()),
        }
    }

    /// Registers a hostname.
    pub fn add(&self, host: impl Into<Host>) {
        self.lock().insert(host.into());
    }

    /// Removes a hostname, doing nothing if it was never registered.
    pub fn remove(&self, host: &str) {
        self.lock().remove(host);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeSet<Host>> {
        self.hosts.lock().unwrap_or_else(|x| x.into_inner())
    }
}

impl Presence for MemoryPresence {
    fn hosts(&self) -> Vec<Host> {
        self.lock().iter().cloned().collect()
    }
}
