//! Best-effort fan-out of pipeline lifecycle events to live subscribers.
//!
//! [`EventBus`] hands each subscriber an unbounded receiver and clones every
//! broadcast event into all registered senders. Delivery is explicitly
//! best-effort: a subscriber whose receiver has been dropped is pruned during
//! the broadcast, and sending never blocks or fails the producer. The bus is
//! the only component mutated concurrently by connect/disconnect, so the
//! subscriber map lives behind `Arc<Mutex<..>>`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::agent::{AgentStatus, LogLevel};
use crate::orchestration::types::PipelineResult;

/// Identifies one live subscriber for later `unsubscribe`.
pub type SubscriberId = u64;

/// A lifecycle event, tagged for self-describing wire delivery.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    PipelineStart {
        pipeline_id: String,
        session_id: String,
        agents: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    AgentStatus {
        pipeline_id: String,
        agent: String,
        status: AgentStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        elapsed_secs: Option<f64>,
        timestamp: DateTime<Utc>,
    },
    AgentLog {
        pipeline_id: String,
        agent: String,
        message: String,
        level: LogLevel,
        timestamp: DateTime<Utc>,
    },
    PipelineComplete {
        pipeline_id: String,
        result: PipelineResult,
        timestamp: DateTime<Utc>,
    },
}

/// Fan-out hub for [`PipelineEvent`]s.
///
/// Cheap to clone; all clones share the same subscriber set.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<SubscriberId, UnboundedSender<PipelineEvent>>>>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Events broadcast after this call are
    /// delivered to the returned receiver until it is dropped or
    /// [`EventBus::unsubscribe`] is called.
    pub fn subscribe(&self) -> (SubscriberId, UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.lock().unwrap().remove(&id);
    }

    /// Deliver an event to every live subscriber. Subscribers whose channel
    /// is closed are dropped from the set; the producer is never blocked.
    pub fn broadcast(&self, event: &PipelineEvent) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}
