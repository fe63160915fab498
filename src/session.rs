//! Session store: explicit registry of live pipelines, injected into the
//! embedding host instead of living as process-global state.
//!
//! Entries are created when a pipeline is constructed and evicted once
//! completed and older than the TTL. The store never evicts a running
//! pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::orchestration::PipelineOrchestrator;

struct SessionEntry {
    orchestrator: Arc<PipelineOrchestrator>,
    completed_at: Option<Instant>,
}

/// Concurrency-safe map of session id to orchestrator. Cheap to clone; all
/// clones share the same entries.
#[derive(Clone)]
pub struct SessionStore {
    entries: Arc<Mutex<HashMap<String, SessionEntry>>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Register a pipeline under its session id, replacing any previous
    /// pipeline for the same session.
    pub fn insert(&self, orchestrator: Arc<PipelineOrchestrator>) {
        let session_id = orchestrator.session_id().to_string();
        self.entries.lock().unwrap().insert(
            session_id,
            SessionEntry {
                orchestrator,
                completed_at: None,
            },
        );
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<PipelineOrchestrator>> {
        self.entries
            .lock()
            .unwrap()
            .get(session_id)
            .map(|e| e.orchestrator.clone())
    }

    /// Stamp a session as completed; the TTL clock starts here.
    pub fn mark_completed(&self, session_id: &str) {
        if let Some(entry) = self.entries.lock().unwrap().get_mut(session_id) {
            entry.completed_at = Some(Instant::now());
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        self.entries.lock().unwrap().remove(session_id).is_some()
    }

    /// Drop every completed entry older than the TTL. Returns the number of
    /// evicted sessions.
    pub fn evict_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        entries.retain(|_, e| match e.completed_at {
            Some(at) => at.elapsed() < ttl,
            None => true,
        });
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
