//! Connectivity probe consulted before refetching.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;
}

/// Assumes the network is always reachable.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysOnline;

impl NetworkMonitor for AlwaysOnline {
    fn is_online(&self) -> bool {
        true
    }
}

/// Connectivity flag flipped by the host (e.g. from OS reachability callbacks).
#[derive(Debug)]
pub struct ToggleNetwork {
    online: AtomicBool,
}

impl ToggleNetwork {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
        }
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            info!(online, "Network status changed");
        }
    }
}

impl Default for ToggleNetwork {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NetworkMonitor for ToggleNetwork {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}
