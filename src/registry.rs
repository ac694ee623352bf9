//! Name -> supervisor map with single-flight creation
// (c) 2025 the llrpd contributors

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tracing::debug;

use crate::client::ReaderEvent;
use crate::reader::{ManagedReader, ReaderOptions};
use crate::util::{read_lock, write_lock};

/// Owns every [`ManagedReader`] the service knows about.
///
/// Supervisors are created on first reference and live until removed
/// or the service stops; their clients come and go underneath them.
#[derive(Debug)]
pub struct Registry {
    devices: RwLock<HashMap<String, Arc<ManagedReader>>>,
    events: mpsc::Sender<ReaderEvent>,
    opts: ReaderOptions,
}

impl Registry {
    /// Creates an empty registry. `events` receives every unsolicited
    /// reader message from every device.
    #[must_use]
    pub fn new(events: mpsc::Sender<ReaderEvent>, opts: ReaderOptions) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            events,
            opts,
        }
    }

    /// Looks a supervisor up, creating (and starting) it on first
    /// reference.
    ///
    /// Single-flight per name: concurrent callers all receive the same
    /// supervisor and exactly one reconnect loop is spawned.
    pub fn get_or_create(&self, name: &str, addr: SocketAddr) -> Arc<ManagedReader> {
        if let Some(existing) = read_lock(&self.devices).get(name) {
            return existing.clone();
        }
        let mut devices = write_lock(&self.devices);
        // Re-check: another caller may have raced us to the write
        // lock.
        devices
            .entry(name.to_owned())
            .or_insert_with(|| {
                debug!(device = name, %addr, "registering");
                ManagedReader::start(name, addr, self.events.clone(), self.opts.clone())
            })
            .clone()
    }

    /// Looks a supervisor up without creating it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ManagedReader>> {
        read_lock(&self.devices).get(name).cloned()
    }

    /// Names of every registered device with the address each dials.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, SocketAddr)> {
        read_lock(&self.devices)
            .iter()
            .map(|(name, d)| (name.clone(), d.addr()))
            .collect()
    }

    /// Detaches a supervisor. Its shutdown runs in the background so
    /// the caller need not wait for socket closure. Returns whether
    /// the name was known.
    pub fn remove(&self, name: &str, grace: Duration) -> bool {
        let detached = write_lock(&self.devices).remove(name);
        match detached {
            Some(device) => {
                debug!(device = name, "removing");
                drop(tokio::spawn(async move { device.stop(grace).await }));
                true
            }
            None => false,
        }
    }

    /// Stops every supervisor and clears the map. Unless `force`, the
    /// collective shutdown is bounded by `grace`.
    pub async fn stop_all(&self, force: bool, grace: Duration) {
        let devices: Vec<Arc<ManagedReader>> =
            write_lock(&self.devices).drain().map(|(_, d)| d).collect();
        if devices.is_empty() {
            return;
        }
        debug!(count = devices.len(), force, "stopping all devices");
        let per_device = if force { Duration::ZERO } else { grace };
        let stops = join_all(devices.iter().map(|d| d.stop(per_device)));
        if force {
            let _ = tokio::time::timeout(Duration::from_millis(50), stops).await;
        } else {
            let _ = tokio::time::timeout(grace, stops).await;
        }
    }
}
