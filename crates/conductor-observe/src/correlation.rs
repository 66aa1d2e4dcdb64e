//! Correlation contexts and protocol side-table
//!
//! Protocol messages are never modified. A message is tied to a correlation
//! id through a side-table keyed by the message's own JSON-RPC id, so a
//! response can be joined to the request that caused it.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::id::CorrelationId;
use crate::protocol::{MessageKey, ProtocolMessage};
use crate::redact::{redact_text, redact_value};
use crate::task::BackgroundTask;

/// Longest foreign id kept by [`CorrelationTracer::link`]
const MAX_FOREIGN_ID: usize = 128;
/// Guard against parent cycles when walking lineage
const MAX_LINEAGE: usize = 64;

/// System a correlation context originated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemTag {
    Local,
    ProtocolInbound,
    ProtocolOutbound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationContext {
    pub id: CorrelationId,
    pub parent: Option<CorrelationId>,
    pub system: SystemTag,
    pub created_at: DateTime<Utc>,
    /// Id of the same operation in another system
    pub linked: Option<String>,
}

struct Entry {
    context: CorrelationContext,
    created: Instant,
}

pub struct CorrelationTracer {
    contexts: DashMap<CorrelationId, Entry>,
    messages: DashMap<(Direction, MessageKey), CorrelationId>,
    retention: Duration,
}

impl CorrelationTracer {
    pub fn new(retention: Duration) -> Self {
        Self {
            contexts: DashMap::new(),
            messages: DashMap::new(),
            retention,
        }
    }

    /// Mint a new correlation id, optionally under a parent
    pub fn create(&self, parent: Option<&CorrelationId>, system: SystemTag) -> CorrelationId {
        let id = CorrelationId::generate();
        let context = CorrelationContext {
            id: id.clone(),
            parent: parent.cloned(),
            system,
            created_at: Utc::now(),
            linked: None,
        };
        self.contexts.insert(
            id.clone(),
            Entry {
                context,
                created: Instant::now(),
            },
        );
        id
    }

    /// Record that `id` is known as `foreign_id` in another system
    pub fn link(&self, id: &CorrelationId, foreign_id: &str) -> bool {
        let Some(mut entry) = self.contexts.get_mut(id) else {
            return false;
        };
        let foreign: String = redact_text(foreign_id)
            .chars()
            .take(MAX_FOREIGN_ID)
            .collect();
        entry.context.linked = Some(foreign);
        true
    }

    pub fn get(&self, id: &CorrelationId) -> Option<CorrelationContext> {
        self.contexts.get(id).map(|e| e.context.clone())
    }

    /// `id` followed by its ancestors, nearest first
    pub fn lineage(&self, id: &CorrelationId) -> Vec<CorrelationId> {
        let mut chain = Vec::new();
        let mut next = Some(id.clone());
        while let Some(current) = next.take() {
            if chain.len() >= MAX_LINEAGE || chain.contains(&current) {
                break;
            }
            next = self
                .contexts
                .get(&current)
                .and_then(|e| e.context.parent.clone());
            chain.push(current);
        }
        chain
    }

    /// Correlate an inbound message; repeated ids map to the same context
    pub fn wrap_inbound(&self, message: &ProtocolMessage) -> CorrelationId {
        let Some(key) = message.key() else {
            return self.create(None, SystemTag::ProtocolInbound);
        };
        if let Some(existing) = self.lookup(Direction::Inbound, &key) {
            return existing;
        }
        let id = self.create(None, SystemTag::ProtocolInbound);
        self.messages
            .insert((Direction::Inbound, key), id.clone());
        id
    }

    /// Correlate an outbound message
    ///
    /// A response shares the correlation of the inbound request with the
    /// same id. Anything else gets a new context under `parent`.
    pub fn wrap_outbound(
        &self,
        message: &ProtocolMessage,
        parent: Option<&CorrelationId>,
    ) -> CorrelationId {
        let key = message.key();
        let joined = match (&key, message.is_response()) {
            (Some(key), true) => self.lookup(Direction::Inbound, key),
            _ => None,
        };
        let id = joined.unwrap_or_else(|| self.create(parent, SystemTag::ProtocolOutbound));
        if let Some(key) = key {
            self.messages.insert((Direction::Outbound, key), id.clone());
        }
        id
    }

    pub fn lookup(&self, direction: Direction, key: &MessageKey) -> Option<CorrelationId> {
        self.messages
            .get(&(direction, key.clone()))
            .map(|id| id.value().clone())
    }

    /// Redacted metadata safe to hand to another system
    pub fn export(&self, id: &CorrelationId) -> Option<Value> {
        let context = self.get(id)?;
        let value = serde_json::json!({
            "id": context.id,
            "parent": context.parent,
            "system": context.system,
            "created_at": context.created_at,
            "linked": context.linked,
            "lineage": self.lineage(id),
        });
        Some(redact_value(&value))
    }

    /// Drop contexts older than the retention window
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Sweep as if the current time were `now`
    pub fn sweep_at(&self, now: Instant) -> usize {
        let before = self.contexts.len();
        self.contexts
            .retain(|_, entry| now.saturating_duration_since(entry.created) < self.retention);
        let removed = before.saturating_sub(self.contexts.len());
        if removed > 0 {
            self.messages
                .retain(|_, id| self.contexts.contains_key(&*id));
            debug!(removed, remaining = self.contexts.len(), "swept correlation contexts");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> BackgroundTask {
        let tracer = Arc::clone(self);
        BackgroundTask::spawn_periodic("correlation-sweeper", period, move || {
            tracer.sweep();
            std::future::ready(())
        })
    }
}

impl std::fmt::Debug for CorrelationTracer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationTracer")
            .field("contexts", &self.contexts.len())
            .field("messages", &self.messages.len())
            .field("retention", &self.retention)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tracer() -> CorrelationTracer {
        CorrelationTracer::new(Duration::from_secs(3600))
    }

    #[test]
    fn test_create_with_parent() {
        let tracer = tracer();
        let root = tracer.create(None, SystemTag::Local);
        let child = tracer.create(Some(&root), SystemTag::Local);
        let grandchild = tracer.create(Some(&child), SystemTag::Local);

        assert_eq!(tracer.get(&child).unwrap().parent, Some(root.clone()));
        assert_eq!(tracer.lineage(&grandchild), vec![grandchild, child, root]);
    }

    #[test]
    fn test_link_redacts_foreign_id() {
        let tracer = tracer();
        let id = tracer.create(None, SystemTag::Local);
        assert!(tracer.link(&id, "req-42"));
        assert_eq!(tracer.get(&id).unwrap().linked.as_deref(), Some("req-42"));

        assert!(tracer.link(&id, "Bearer abc.def.ghi"));
        assert_eq!(
            tracer.get(&id).unwrap().linked.as_deref(),
            Some("Bearer [REDACTED]")
        );

        let unknown = CorrelationId::generate();
        assert!(!tracer.link(&unknown, "x"));
    }

    #[test]
    fn test_response_joins_request() {
        let tracer = tracer();
        let request = ProtocolMessage::request(7, "echo", Some(json!({"text": "hi"})));
        let inbound = tracer.wrap_inbound(&request);
        assert_eq!(tracer.wrap_inbound(&request), inbound);

        let response = ProtocolMessage::response(json!(7), json!("hi"));
        let outbound = tracer.wrap_outbound(&response, None);
        assert_eq!(outbound, inbound);
        assert_eq!(
            tracer.lookup(Direction::Outbound, &response.key().unwrap()),
            Some(inbound)
        );
    }

    #[test]
    fn test_wrapping_does_not_touch_message() {
        let tracer = tracer();
        let request = ProtocolMessage::request("a", "ping", None);
        let before = serde_json::to_string(&request).unwrap();
        tracer.wrap_inbound(&request);
        tracer.wrap_outbound(&ProtocolMessage::response(json!("a"), json!(null)), None);
        assert_eq!(serde_json::to_string(&request).unwrap(), before);
    }

    #[test]
    fn test_notifications_get_fresh_ids() {
        let tracer = tracer();
        let note = ProtocolMessage::notification("progress", None);
        assert_ne!(tracer.wrap_inbound(&note), tracer.wrap_inbound(&note));
    }

    #[test]
    fn test_sweep_expires_contexts_and_side_table() {
        let tracer = CorrelationTracer::new(Duration::from_secs(60));
        let request = ProtocolMessage::request(1, "ping", None);
        let id = tracer.wrap_inbound(&request);
        tracer.create(None, SystemTag::Local);
        assert_eq!(tracer.len(), 2);

        assert_eq!(tracer.sweep_at(Instant::now()), 0);
        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(tracer.sweep_at(later), 2);
        assert!(tracer.is_empty());
        assert!(tracer.get(&id).is_none());
        assert!(tracer
            .lookup(Direction::Inbound, &request.key().unwrap())
            .is_none());
    }

    #[test]
    fn test_export_is_redacted() {
        let tracer = tracer();
        let parent = tracer.create(None, SystemTag::Local);
        let id = tracer.create(Some(&parent), SystemTag::ProtocolOutbound);
        tracer.link(&id, "token=supersecret");

        let exported = tracer.export(&id).unwrap();
        assert_eq!(exported["system"], "protocol_outbound");
        assert_eq!(exported["linked"], "token=[REDACTED]");
        assert_eq!(exported["lineage"].as_array().unwrap().len(), 2);
    }
}
