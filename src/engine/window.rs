//! Sliding correlation windows
//!
//! A window is a bounded, time-ordered buffer of recent events for one
//! correlation key. Rules evaluate against windows; eviction keeps every
//! window inside the configured horizon after each push.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::{CloudProvider, SecurityEvent};

/// Key under which events are correlated
///
/// Identities are global across providers (the same principal moving between
/// clouds is exactly the signal the engine looks for); resources are scoped
/// to their provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Identity(String),
    Resource { provider: CloudProvider, id: String },
}

impl CorrelationKey {
    pub fn identity_of(event: &SecurityEvent) -> Self {
        CorrelationKey::Identity(event.identity.clone())
    }

    pub fn resource_of(event: &SecurityEvent) -> Self {
        CorrelationKey::Resource {
            provider: event.provider,
            id: event.resource.clone(),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, CorrelationKey::Identity(_))
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationKey::Identity(id) => write!(f, "identity:{}", id),
            CorrelationKey::Resource { provider, id } => {
                write!(f, "resource:{}/{}", provider, id)
            }
        }
    }
}

/// Window sizing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Sliding horizon in seconds; older events are evicted
    pub horizon_secs: i64,
    /// Hard cap on buffered events per window, applied after horizon eviction
    pub max_events: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            horizon_secs: 1800,
            max_events: 512,
        }
    }
}

/// Ordering violation detected inside a window
///
/// This only arises from an internal bug, not from out-of-order arrival
/// (late events are inserted in order). The engine treats it as fatal for
/// the affected key.
#[derive(Debug, Clone)]
pub struct OrderingViolation {
    pub key: String,
}

/// Bounded, time-ordered buffer of recent events for one key
#[derive(Debug)]
pub struct CorrelationWindow {
    key: CorrelationKey,
    events: VecDeque<Arc<SecurityEvent>>,
}

impl CorrelationWindow {
    pub fn new(key: CorrelationKey) -> Self {
        CorrelationWindow {
            key,
            events: VecDeque::new(),
        }
    }

    pub fn key(&self) -> &CorrelationKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SecurityEvent>> {
        self.events.iter()
    }

    pub fn newest(&self) -> Option<&Arc<SecurityEvent>> {
        self.events.back()
    }

    pub fn oldest(&self) -> Option<&Arc<SecurityEvent>> {
        self.events.front()
    }

    /// Insert an event preserving timestamp order, then evict everything
    /// outside the horizon and beyond the capacity bound
    ///
    /// Late events are walked backwards into position, so arrival order does
    /// not disturb the ordering invariant.
    pub fn push(
        &mut self,
        event: Arc<SecurityEvent>,
        config: &WindowConfig,
    ) -> Result<(), OrderingViolation> {
        let mut insert_at = self.events.len();
        while insert_at > 0 && self.events[insert_at - 1].timestamp > event.timestamp {
            insert_at -= 1;
        }
        self.events.insert(insert_at, event);

        self.verify_ordering()?;
        self.evict(config);
        Ok(())
    }

    /// Evict events older than the horizon relative to the newest entry,
    /// then enforce the capacity bound from the oldest side
    fn evict(&mut self, config: &WindowConfig) {
        if let Some(newest_ts) = self.events.back().map(|e| e.timestamp) {
            let cutoff = newest_ts - config.horizon_secs;
            while self
                .events
                .front()
                .map(|e| e.timestamp < cutoff)
                .unwrap_or(false)
            {
                self.events.pop_front();
            }
        }
        while self.events.len() > config.max_events {
            self.events.pop_front();
        }
    }

    /// Check the strict-ordering invariant over the whole buffer
    pub fn verify_ordering(&self) -> Result<(), OrderingViolation> {
        for pair in self.events.iter().zip(self.events.iter().skip(1)) {
            if pair.0.timestamp > pair.1.timestamp {
                return Err(OrderingViolation {
                    key: self.key.to_string(),
                });
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn corrupt_for_test(&mut self) {
        // Force an ordering violation so quarantine paths can be exercised
        if let Some(front) = self.events.front_mut() {
            let mut cloned = (**front).clone();
            cloned.timestamp = i64::MAX;
            *front = Arc::new(cloned);
        }
    }
}

/// All windows owned by one engine shard
#[derive(Debug, Default)]
pub struct WindowStore {
    windows: HashMap<CorrelationKey, CorrelationWindow>,
}

impl WindowStore {
    pub fn new() -> Self {
        WindowStore {
            windows: HashMap::new(),
        }
    }

    /// Append an event to the window for `key`, creating it on first use
    pub fn append(
        &mut self,
        key: CorrelationKey,
        event: Arc<SecurityEvent>,
        config: &WindowConfig,
    ) -> Result<&CorrelationWindow, OrderingViolation> {
        let window = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| CorrelationWindow::new(key));
        window.push(event, config)?;
        Ok(&*window)
    }

    pub fn get(&self, key: &CorrelationKey) -> Option<&CorrelationWindow> {
        self.windows.get(key)
    }

    pub fn get_mut(&mut self, key: &CorrelationKey) -> Option<&mut CorrelationWindow> {
        self.windows.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Drop windows whose newest event is older than the horizon
    pub fn prune_stale(&mut self, now: i64, config: &WindowConfig) {
        self.windows.retain(|_, w| {
            w.newest()
                .map(|e| e.timestamp >= now - config.horizon_secs)
                .unwrap_or(false)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EventClass, SecurityEvent};
    use std::collections::BTreeMap;

    fn create_event(id: &str, timestamp: i64) -> Arc<SecurityEvent> {
        Arc::new(SecurityEvent {
            id: id.to_string(),
            timestamp,
            provider: CloudProvider::Aws,
            class: EventClass::Network,
            event_type: "PORT_PROBE".to_string(),
            identity: "mallory".to_string(),
            resource: "vpc-1".to_string(),
            source_ip: None,
            attributes: BTreeMap::new(),
        })
    }

    fn test_config() -> WindowConfig {
        WindowConfig {
            horizon_secs: 300,
            max_events: 10,
        }
    }

    #[test]
    fn test_ordered_append() {
        let config = test_config();
        let mut window = CorrelationWindow::new(CorrelationKey::Identity("mallory".into()));

        for i in 0..5 {
            window.push(create_event(&format!("e{}", i), 1000 + i), &config).unwrap();
        }
        assert_eq!(window.len(), 5);
        assert_eq!(window.oldest().unwrap().id, "e0");
        assert_eq!(window.newest().unwrap().id, "e4");
    }

    #[test]
    fn test_late_event_inserted_in_order() {
        let config = test_config();
        let mut window = CorrelationWindow::new(CorrelationKey::Identity("mallory".into()));

        window.push(create_event("e0", 1000), &config).unwrap();
        window.push(create_event("e2", 1100), &config).unwrap();
        window.push(create_event("e1", 1050), &config).unwrap();

        let ids: Vec<&str> = window.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["e0", "e1", "e2"]);
        assert!(window.verify_ordering().is_ok());
    }

    #[test]
    fn test_horizon_eviction() {
        let config = test_config();
        let mut window = CorrelationWindow::new(CorrelationKey::Identity("mallory".into()));

        window.push(create_event("old", 1000), &config).unwrap();
        window.push(create_event("new", 1000 + config.horizon_secs + 1), &config).unwrap();

        assert_eq!(window.len(), 1);
        assert_eq!(window.newest().unwrap().id, "new");
    }

    #[test]
    fn test_no_event_older_than_horizon_after_push() {
        let config = test_config();
        let mut window = CorrelationWindow::new(CorrelationKey::Identity("mallory".into()));

        for i in 0..50 {
            window.push(create_event(&format!("e{}", i), 1000 + i * 47), &config).unwrap();
            let newest = window.newest().unwrap().timestamp;
            assert!(window
                .iter()
                .all(|e| e.timestamp >= newest - config.horizon_secs));
        }
    }

    #[test]
    fn test_capacity_bound() {
        let config = WindowConfig {
            horizon_secs: 100_000,
            max_events: 3,
        };
        let mut window = CorrelationWindow::new(CorrelationKey::Identity("mallory".into()));

        for i in 0..10 {
            window.push(create_event(&format!("e{}", i), 1000 + i), &config).unwrap();
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.oldest().unwrap().id, "e7");
    }

    #[test]
    fn test_corruption_detected() {
        let config = test_config();
        let mut window = CorrelationWindow::new(CorrelationKey::Identity("mallory".into()));
        window.push(create_event("e0", 1000), &config).unwrap();
        window.push(create_event("e1", 1001), &config).unwrap();

        window.corrupt_for_test();
        assert!(window.verify_ordering().is_err());
    }

    #[test]
    fn test_store_prune_stale() {
        let config = test_config();
        let mut store = WindowStore::new();

        store.append(CorrelationKey::Identity("a".into()), create_event("e0", 1000), &config).unwrap();
        store.append(CorrelationKey::Identity("b".into()), create_event("e1", 2000), &config).unwrap();

        store.prune_stale(2100, &config);
        assert_eq!(store.len(), 1);
        assert!(store.get(&CorrelationKey::Identity("b".into())).is_some());
    }

    #[test]
    fn test_key_labels() {
        assert_eq!(CorrelationKey::Identity("alice".into()).to_string(), "identity:alice");
        let key = CorrelationKey::Resource {
            provider: CloudProvider::Gcp,
            id: "bucket-7".into(),
        };
        assert_eq!(key.to_string(), "resource:gcp/bucket-7");
    }
}
