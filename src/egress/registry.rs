//! Campaign-wide registry of observed egress identities
//!
//! Tracks every public IP handed to a worker so later acquisitions can avoid
//! reusing an exit another session already burned. The registry lives for the
//! whole campaign and is never pruned; later rounds also skip IPs used in
//! earlier rounds.

use std::collections::HashSet;
use parking_lot::RwLock;
use tracing::warn;

/// Append-only set of public IPs already assigned to a worker.
///
/// Membership is advisory, not a mutual-exclusion lock: two workers can probe
/// the same fresh exit concurrently and both see it as unused, because the
/// probe await sits between `has` and `add`. That rare duplicate is an
/// accepted weak-consistency property of acquisition; do not close the
/// window by holding a lock across the probe.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    seen: RwLock<HashSet<String>>,
}

impl IdentityRegistry {
    /// Create an empty registry (one per campaign)
    pub fn new() -> Self {
        Self::default()
    }

    /// Check whether an IP was already assigned to some worker
    pub fn has(&self, ip: &str) -> bool {
        self.seen.read().contains(ip)
    }

    /// Record an IP as assigned. Returns false if it was already present.
    pub fn add(&self, ip: &str) -> bool {
        let is_new = self.seen.write().insert(ip.to_string());
        if !is_new {
            warn!("Duplicate egress IP registered: {} (already assigned to another worker)", ip);
        }
        is_new
    }

    /// Number of distinct IPs assigned so far
    pub fn len(&self) -> usize {
        self.seen.read().len()
    }

    /// True if no IP has been assigned yet
    pub fn is_empty(&self) -> bool {
        self.seen.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_then_has() {
        let registry = IdentityRegistry::new();
        assert!(!registry.has("203.0.113.7"));
        assert!(registry.add("203.0.113.7"));
        assert!(registry.has("203.0.113.7"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_add_is_flagged_but_kept() {
        let registry = IdentityRegistry::new();
        assert!(registry.add("203.0.113.7"));
        assert!(!registry.add("203.0.113.7"));
        // Set semantics: still a single entry, never shrinks
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn size_is_monotonic() {
        let registry = IdentityRegistry::new();
        let mut last = 0;
        for ip in ["10.0.0.1", "10.0.0.2", "10.0.0.2", "10.0.0.3"] {
            registry.add(ip);
            assert!(registry.len() >= last);
            last = registry.len();
        }
        assert_eq!(registry.len(), 3);
    }
}
