//! Inbound message dispatch
//!
//! Maps topic filters to handlers with one optional fallback for unmatched
//! topics. Resolution order: exact filter match, then pattern match in
//! registration order, then fallback. Exactly one handler runs per inbound
//! message; handler failures are logged here and never propagate.

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error};

use crate::error::{HandlerError, HandlerFuture};

/// An inbound message as delivered to handlers.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Handler invoked for messages matching a registered filter.
pub type MessageHandler = Arc<dyn Fn(InboundMessage) -> HandlerFuture + Send + Sync>;

/// Topic filter validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("topic filter cannot be empty")]
    Empty,
    #[error("multi-level wildcard '#' only allowed as the final segment")]
    MultiLevelNotLast,
    #[error("wildcard must occupy an entire segment: '{0}'")]
    PartialWildcard(String),
}

/// Validate a topic filter's wildcard placement.
pub fn validate_filter(filter: &str) -> Result<(), FilterError> {
    if filter.is_empty() {
        return Err(FilterError::Empty);
    }

    let segments: Vec<&str> = filter.split('/').collect();
    let last = segments.len() - 1;
    for (position, segment) in segments.iter().enumerate() {
        if segment.contains('#') {
            if *segment != "#" {
                return Err(FilterError::PartialWildcard(segment.to_string()));
            }
            if position != last {
                return Err(FilterError::MultiLevelNotLast);
            }
        } else if segment.contains('+') && *segment != "+" {
            return Err(FilterError::PartialWildcard(segment.to_string()));
        }
    }
    Ok(())
}

/// Whether a concrete topic matches a (possibly wildcarded) filter.
///
/// `+` matches exactly one level, `#` matches the remainder of the topic
/// including the parent level (`a/#` matches `a`). Wildcards never match
/// `$`-prefixed system topics.
pub fn topic_matches_filter(topic: &str, filter: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut topic_segments = topic.split('/');
    let mut filter_segments = filter.split('/');
    loop {
        match (filter_segments.next(), topic_segments.next()) {
            (None, None) => return true,
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(expected), Some(actual)) if expected == actual => continue,
            _ => return false,
        }
    }
}

/// Filter -> handler table consulted for every inbound message.
#[derive(Default)]
pub struct DispatchTable {
    handlers: Vec<(String, MessageHandler)>,
    fallback: Option<MessageHandler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a topic filter. Registering the same filter
    /// again replaces the handler.
    pub fn register(
        &mut self,
        filter: impl Into<String>,
        handler: MessageHandler,
    ) -> Result<(), FilterError> {
        let filter = filter.into();
        validate_filter(&filter)?;
        match self.handlers.iter_mut().find(|(f, _)| *f == filter) {
            Some((_, existing)) => *existing = handler,
            None => self.handlers.push((filter, handler)),
        }
        Ok(())
    }

    /// Remove the handler for a filter. Returns whether one was registered.
    pub fn remove(&mut self, filter: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(f, _)| f != filter);
        before != self.handlers.len()
    }

    /// Handler for messages no registered filter matches.
    pub fn set_fallback(&mut self, handler: MessageHandler) {
        self.fallback = Some(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolve the handler for a topic: exact match first, then pattern
    /// match in registration order, then the fallback.
    pub fn resolve(&self, topic: &str) -> Option<&MessageHandler> {
        if let Some((_, handler)) = self.handlers.iter().find(|(f, _)| f == topic) {
            return Some(handler);
        }
        if let Some((_, handler)) = self
            .handlers
            .iter()
            .find(|(f, _)| topic_matches_filter(topic, f))
        {
            return Some(handler);
        }
        self.fallback.as_ref()
    }

    /// Invoke the resolved handler for a message. Exactly one handler runs;
    /// a message nothing matches is dropped with a debug notice.
    pub async fn dispatch(&self, message: InboundMessage) {
        let topic = message.topic.clone();
        match self.resolve(&topic) {
            Some(handler) => {
                if let Err(HandlerError(detail)) = handler(message).await {
                    error!(topic = %topic, "message handler failed: {detail}");
                }
            }
            None => {
                debug!(topic = %topic, "no handler registered, dropping message");
            }
        }
    }
}
