use std::collections::{HashSet, VecDeque};

use chrono::Utc;

use crate::model::{
    AccountSnapshot, ConnectionStatus, DetailState, RateLimitSnapshot, ServerEvent, Snapshot,
    Thread,
};
use crate::persona::{PersonaBook, PersonaNamer};

/// Append-only diagnostic trail, oldest entries trimmed first.
#[derive(Debug, Clone)]
pub struct EventLog {
    entries: VecDeque<ServerEvent>,
    limit: usize,
}

impl EventLog {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(limit.min(256)),
            limit: limit.max(1),
        }
    }

    pub fn push(&mut self, method: impl Into<String>, summary: impl Into<String>) {
        self.entries.push_back(ServerEvent {
            at: Utc::now(),
            method: method.into(),
            summary: summary.into(),
        });
        while self.entries.len() > self.limit {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&ServerEvent> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ServerEvent> {
        self.entries.iter()
    }
}

/// The projector aggregate. Owned by exactly one [`crate::engine::PilotCore`].
#[derive(Debug)]
pub struct PilotState {
    pub status: ConnectionStatus,
    pub last_error: Option<String>,
    pub threads: Vec<Thread>,
    pub detail: DetailState,
    pub personas: PersonaBook,
    pub events: EventLog,
    pub rate_limits: Option<RateLimitSnapshot>,
    pub account: Option<AccountSnapshot>,
    /// Threads known to be archived, including ones archived locally before
    /// the server confirmed.
    pub archived: HashSet<String>,
    /// Local archives whose `thread/archive` is still in flight. A thread list
    /// requested earlier must not bring these back.
    pub pending_archive: HashSet<String>,
    pub summoning: bool,
}

impl PilotState {
    pub fn new(namer: Box<dyn PersonaNamer>, preview_limit: usize, event_log_limit: usize) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            last_error: None,
            threads: Vec::new(),
            detail: DetailState::default(),
            personas: PersonaBook::new(namer, preview_limit),
            events: EventLog::new(event_log_limit),
            rate_limits: None,
            account: None,
            archived: HashSet::new(),
            pending_archive: HashSet::new(),
            summoning: false,
        }
    }

    pub fn thread(&self, thread_id: &str) -> Option<&Thread> {
        self.threads.iter().find(|thread| thread.id == thread_id)
    }

    pub fn thread_mut(&mut self, thread_id: &str) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|thread| thread.id == thread_id)
    }

    pub fn is_archived(&self, thread_id: &str) -> bool {
        self.archived.contains(thread_id)
    }

    /// Display name for a thread, known or not.
    pub fn thread_name(&self, thread_id: &str) -> String {
        self.thread(thread_id)
            .map(|thread| thread.display_name().to_string())
            .unwrap_or_else(|| crate::model::DEFAULT_THREAD_NAME.to_string())
    }

    /// Insert at the front if unknown; returns whether it was inserted.
    pub fn insert_thread(&mut self, thread: Thread) -> bool {
        if self.thread(&thread.id).is_some() {
            return false;
        }
        if thread.archived {
            self.archived.insert(thread.id.clone());
        }
        self.threads.insert(0, thread);
        true
    }

    /// Wholesale replacement from a thread list. Client-side turn and
    /// loaded flags survive for threads that were already known.
    pub fn replace_threads(&mut self, mut threads: Vec<Thread>) {
        for thread in &mut threads {
            if let Some(previous) = self.thread(&thread.id) {
                thread.has_active_turn = previous.has_active_turn;
                thread.active_turn_id.clone_from(&previous.active_turn_id);
                thread.loaded = previous.loaded;
                if thread.token_count.is_none() {
                    thread.token_count = previous.token_count;
                }
            }
            if self.pending_archive.contains(&thread.id) {
                thread.archived = true;
            }
            if thread.archived {
                self.archived.insert(thread.id.clone());
            } else {
                self.archived.remove(&thread.id);
            }
        }
        self.personas.sync_threads(&threads, Utc::now());
        self.threads = threads;
    }

    /// Drop everything that only makes sense while connected. Personas
    /// survive so presence does not flicker across a reconnect.
    pub fn clear_session(&mut self) {
        self.threads.clear();
        self.pending_archive.clear();
        self.detail = DetailState::default();
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            status: self.status,
            last_error: self.last_error.clone(),
            threads: self.threads.clone(),
            detail: self.detail.clone(),
            personas: self.personas.iter().cloned().collect(),
            events: self.events.iter().cloned().collect(),
            rate_limits: self.rate_limits.clone(),
            account: self.account.clone(),
            summoning: self.summoning,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persona::HashNamer;
    use pretty_assertions::assert_eq;

    #[test]
    fn event_log_trims_oldest_first() {
        let mut log = EventLog::new(3);
        for index in 0..5 {
            log.push("thread/started", format!("event {index}"));
        }
        let summaries: Vec<&str> = log.iter().map(|event| event.summary.as_str()).collect();
        assert_eq!(summaries, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn replacing_threads_keeps_turn_flags() {
        let mut state = PilotState::new(Box::new(HashNamer), 64, 16);
        let mut running = Thread::new("t1");
        running.has_active_turn = true;
        running.active_turn_id = Some("turn-9".to_string());
        state.insert_thread(running);

        state.replace_threads(vec![Thread::new("t1"), Thread::new("t2")]);

        let t1 = state.thread("t1").expect("t1");
        assert!(t1.has_active_turn);
        assert_eq!(t1.active_turn_id.as_deref(), Some("turn-9"));
        assert_eq!(state.personas.len(), 2);
    }

    #[test]
    fn clear_session_keeps_personas() {
        let mut state = PilotState::new(Box::new(HashNamer), 64, 16);
        state.replace_threads(vec![Thread::new("t1")]);
        state.detail.thread_id = Some("t1".to_string());

        state.clear_session();

        assert!(state.threads.is_empty());
        assert_eq!(state.detail, DetailState::default());
        assert!(state.personas.contains("t1"));
    }
}
