//! Topic subscription registry
//!
//! Source of truth for what the session should be subscribed to. The
//! registry survives disconnects; the connection layer replays it after
//! every successful (re)connect.

use rumqttc::v5::mqttbytes::QoS;

/// A tracked subscription: topic filter plus requested QoS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSubscription {
    pub filter: String,
    pub qos: QoS,
}

/// Ordered filter -> QoS mapping with last-write-wins semantics.
///
/// No internal locking; callers serialize access (the session keeps it
/// behind a mutex shared with the network loop).
#[derive(Debug, Default)]
pub struct TopicRegistry {
    entries: Vec<TopicSubscription>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for a filter. Overwriting keeps the
    /// original position so replay order stays stable.
    pub fn upsert(&mut self, filter: impl Into<String>, qos: QoS) {
        let filter = filter.into();
        match self.entries.iter_mut().find(|e| e.filter == filter) {
            Some(entry) => entry.qos = qos,
            None => self.entries.push(TopicSubscription { filter, qos }),
        }
    }

    /// Remove the entry for a filter, returning it if it was tracked.
    pub fn remove(&mut self, filter: &str) -> Option<TopicSubscription> {
        let index = self.entries.iter().position(|e| e.filter == filter)?;
        Some(self.entries.remove(index))
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, filter: &str) -> bool {
        self.entries.iter().any(|e| e.filter == filter)
    }

    /// Ordered snapshot of every tracked subscription.
    pub fn all(&self) -> Vec<TopicSubscription> {
        self.entries.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upsert_and_snapshot_order() {
        let mut registry = TopicRegistry::new();
        registry.upsert("a/b", QoS::AtMostOnce);
        registry.upsert("c/d", QoS::AtLeastOnce);
        registry.upsert("e/#", QoS::ExactlyOnce);

        let snapshot = registry.all();
        let filters: Vec<&str> = snapshot.iter().map(|e| e.filter.as_str()).collect();
        assert_eq!(filters, vec!["a/b", "c/d", "e/#"]);
    }

    #[test]
    fn test_upsert_last_write_wins() {
        let mut registry = TopicRegistry::new();
        registry.upsert("a/b", QoS::AtMostOnce);
        registry.upsert("c/d", QoS::AtMostOnce);
        registry.upsert("a/b", QoS::ExactlyOnce);

        assert_eq!(registry.len(), 2);
        let snapshot = registry.all();
        // Position preserved, qos replaced
        assert_eq!(snapshot[0].filter, "a/b");
        assert_eq!(snapshot[0].qos, QoS::ExactlyOnce);
    }

    #[test]
    fn test_remove() {
        let mut registry = TopicRegistry::new();
        registry.upsert("a/b", QoS::AtMostOnce);

        let removed = registry.remove("a/b");
        assert_eq!(removed.map(|e| e.filter), Some("a/b".to_string()));
        assert!(registry.is_empty());
        assert!(registry.remove("a/b").is_none());
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut registry = TopicRegistry::new();
        registry.upsert("a", QoS::AtMostOnce);
        registry.upsert("b", QoS::AtMostOnce);
        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.contains("a"));
    }
}
