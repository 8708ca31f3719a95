//! Network availability
//!
//! The controller only ever asks "is connectivity available right now?",
//! and only on the error path. Implementations must answer without blocking.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Non-blocking connectivity check
pub trait NetworkMonitor: Send + Sync {
    fn is_available(&self) -> bool;
}

/// Connectivity flag flipped by whoever owns the real OS monitor
#[derive(Debug, Clone)]
pub struct StaticNetwork {
    online: Arc<AtomicBool>,
}

impl StaticNetwork {
    pub fn new(online: bool) -> Self {
        Self {
            online: Arc::new(AtomicBool::new(online)),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    pub fn set_available(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self::online()
    }
}

impl NetworkMonitor for StaticNetwork {
    fn is_available(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let net = StaticNetwork::online();
        let observer = net.clone();
        assert!(observer.is_available());
        net.set_available(false);
        assert!(!observer.is_available());
    }
}
