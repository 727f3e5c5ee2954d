//! Status display contract
//!
//! The visual rendering of a status display lives outside this crate; what
//! is owned here is the update contract the scheduler and run loop drive,
//! plus the explicit mapping from named display triggers to domain
//! callbacks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::HandlerError;

/// Receiver of connection-state changes and high-frequency refresh ticks.
///
/// `init` runs once before the run loop starts; a failure there drops the
/// sink rather than the process. `refresh` is called from the scheduler's
/// dedicated tick and must not block.
pub trait StatusSink: Send + Sync {
    fn init(&self) -> Result<(), HandlerError>;
    fn refresh(&self);
    fn connection_changed(&self, connected: bool);
}

/// Callback bound to a named display trigger (a button press, for example).
pub type TriggerCallback = Arc<dyn Fn() + Send + Sync>;

/// Explicit mapping from trigger name to callback.
///
/// Firing an unregistered name invokes the documented fallback: a warning
/// log, nothing else. There is no implicit handler creation.
#[derive(Clone, Default)]
pub struct TriggerMap {
    triggers: HashMap<String, TriggerCallback>,
}

impl TriggerMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a callback to a trigger name. Registering a name again replaces
    /// the earlier callback.
    pub fn register(&mut self, name: impl Into<String>, callback: TriggerCallback) {
        self.triggers.insert(name.into(), callback);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.triggers.contains_key(name)
    }

    /// Invoke the callback for a trigger name, or log that none exists.
    pub fn fire(&self, name: &str) {
        match self.triggers.get(name) {
            Some(callback) => callback(),
            None => warn!(trigger = %name, "trigger has no registered handler"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_registered_trigger() {
        let hits = Arc::new(AtomicUsize::new(0));
        let hits_in_callback = hits.clone();

        let mut triggers = TriggerMap::new();
        triggers.register("btn_reset", Arc::new(move || {
            hits_in_callback.fetch_add(1, Ordering::SeqCst);
        }));

        triggers.fire("btn_reset");
        triggers.fire("btn_reset");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fire_unknown_trigger_is_logged_noop() {
        let triggers = TriggerMap::new();
        triggers.fire("btn_not_wired");
        assert!(!triggers.contains("btn_not_wired"));
    }

    #[test]
    fn test_register_replaces_callback() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let first_in_callback = first.clone();
        let second_in_callback = second.clone();

        let mut triggers = TriggerMap::new();
        triggers.register("btn", Arc::new(move || {
            first_in_callback.fetch_add(1, Ordering::SeqCst);
        }));
        triggers.register("btn", Arc::new(move || {
            second_in_callback.fetch_add(1, Ordering::SeqCst);
        }));

        triggers.fire("btn");
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
