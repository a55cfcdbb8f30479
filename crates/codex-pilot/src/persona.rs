//! Per-thread persona book.
//!
//! A persona is the presence view of one thread: a mood driven by status,
//! turn and delta signals, a bounded trailing preview of streamed output, and
//! a generation stamp that lets a delayed `done -> idle` decay detect that
//! something else has happened since it was scheduled.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};

use crate::model::{Persona, PersonaIdentity, PersonaMood, Thread};

/// Maps a thread id to a stable display identity. Implementations must be
/// pure: the same id always yields the same identity.
pub trait PersonaNamer: Send + Sync {
    fn identity(&self, thread_id: &str) -> PersonaIdentity;
}

const NAMES: &[&str] = &[
    "Bramble", "Clover", "Ember", "Fern", "Hazel", "Juniper", "Linden", "Maple", "Nettle",
    "Pippin", "Quill", "Rowan", "Sorrel", "Thistle", "Willow", "Yarrow",
];
const ICONS: &[&str] = &["sparkles", "leaf", "moon", "star", "flame", "droplet", "feather", "bolt"];
const COLORS: &[&str] = &[
    "#e57373", "#f06292", "#ba68c8", "#7986cb", "#4fc3f7", "#4db6ac", "#aed581", "#ffb74d",
];

/// FNV-1a over the thread id, indexed into fixed tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct HashNamer;

impl HashNamer {
    fn hash(thread_id: &str) -> u64 {
        thread_id.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
            (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
        })
    }
}

impl PersonaNamer for HashNamer {
    fn identity(&self, thread_id: &str) -> PersonaIdentity {
        let hash = Self::hash(thread_id);
        let pick = |table: &[&str], shift: u32| {
            let index = ((hash >> shift) % table.len() as u64) as usize;
            table[index].to_string()
        };
        PersonaIdentity {
            name: pick(NAMES, 0),
            icon: pick(ICONS, 16),
            color: pick(COLORS, 32),
        }
    }
}

/// Server status tag to mood. Unknown tags read as idle.
pub fn mood_for_status(status: &str) -> PersonaMood {
    match status {
        "thinking" => PersonaMood::Thinking,
        "working" | "running" | "active" => PersonaMood::Working,
        "waiting" => PersonaMood::Waiting,
        "error" | "systemError" => PersonaMood::Error,
        "notLoaded" => PersonaMood::Sleeping,
        _ => PersonaMood::Idle,
    }
}

/// Append `delta` and keep only the last `limit` characters.
pub fn push_trailing(text: &mut String, delta: &str, limit: usize) {
    text.push_str(delta);
    let count = text.chars().count();
    if count <= limit {
        return;
    }
    let start = text
        .char_indices()
        .nth(count - limit)
        .map(|(index, _)| index)
        .unwrap_or(text.len());
    text.drain(..start);
}

pub struct PersonaBook {
    personas: BTreeMap<String, Persona>,
    namer: Box<dyn PersonaNamer>,
    preview_limit: usize,
    next_generation: u64,
}

impl std::fmt::Debug for PersonaBook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersonaBook")
            .field("personas", &self.personas.len())
            .field("preview_limit", &self.preview_limit)
            .finish()
    }
}

impl PersonaBook {
    pub fn new(namer: Box<dyn PersonaNamer>, preview_limit: usize) -> Self {
        Self {
            personas: BTreeMap::new(),
            namer,
            preview_limit,
            next_generation: 0,
        }
    }

    pub fn identity(&self, thread_id: &str) -> PersonaIdentity {
        self.namer.identity(thread_id)
    }

    pub fn get(&self, thread_id: &str) -> Option<&Persona> {
        self.personas.get(thread_id)
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.personas.contains_key(thread_id)
    }

    pub fn len(&self) -> usize {
        self.personas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.personas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Persona> {
        self.personas.values()
    }

    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Existing persona, or a fresh idle one.
    pub fn ensure(
        &mut self,
        thread_id: &str,
        thread_name: &str,
        now: DateTime<Utc>,
    ) -> &mut Persona {
        let namer = &self.namer;
        let next_generation = &mut self.next_generation;
        self.personas
            .entry(thread_id.to_string())
            .or_insert_with(|| {
                *next_generation += 1;
                Persona {
                    thread_id: thread_id.to_string(),
                    identity: namer.identity(thread_id),
                    thread_name: thread_name.to_string(),
                    mood: PersonaMood::Idle,
                    preview: String::new(),
                    last_activity: now,
                    token_count: None,
                    summoned: false,
                    model: None,
                    generation: *next_generation,
                }
            })
    }

    /// Set the mood and stamp a new generation. Returns the stamp, or `None`
    /// when there is no persona for the thread.
    pub fn set_mood(
        &mut self,
        thread_id: &str,
        mood: PersonaMood,
        now: DateTime<Utc>,
    ) -> Option<u64> {
        if !self.personas.contains_key(thread_id) {
            return None;
        }
        let generation = self.bump();
        let persona = self.personas.get_mut(thread_id)?;
        persona.mood = mood;
        persona.last_activity = now;
        persona.generation = generation;
        Some(generation)
    }

    pub fn update<F>(&mut self, thread_id: &str, apply: F) -> bool
    where
        F: FnOnce(&mut Persona),
    {
        match self.personas.get_mut(thread_id) {
            Some(persona) => {
                apply(persona);
                true
            }
            None => false,
        }
    }

    pub fn append_preview(&mut self, thread_id: &str, delta: &str, now: DateTime<Utc>) {
        let limit = self.preview_limit;
        if let Some(persona) = self.personas.get_mut(thread_id) {
            push_trailing(&mut persona.preview, delta, limit);
            persona.last_activity = now;
        }
    }

    /// Insert a persona built elsewhere (the summon path), replacing any existing one.
    pub fn insert(&mut self, mut persona: Persona) -> u64 {
        let generation = self.bump();
        persona.generation = generation;
        self.personas.insert(persona.thread_id.clone(), persona);
        generation
    }

    pub fn remove(&mut self, thread_id: &str) -> Option<Persona> {
        self.personas.remove(thread_id)
    }

    pub fn clear(&mut self) {
        self.personas.clear();
    }

    /// `done -> idle`, only if nothing has touched the persona since `generation`.
    pub fn decay(&mut self, thread_id: &str, generation: u64) -> bool {
        let Some(persona) = self.personas.get_mut(thread_id) else {
            return false;
        };
        if persona.generation != generation || persona.mood != PersonaMood::Done {
            return false;
        }
        persona.mood = PersonaMood::Idle;
        true
    }

    /// Reconcile against a full thread list. Existing personas only get their
    /// name, token count and model synced; new ones start idle at the thread's
    /// creation time; personas of archived or vanished threads are dropped.
    pub fn sync_threads(&mut self, threads: &[Thread], now: DateTime<Utc>) {
        let live: HashSet<&str> = threads
            .iter()
            .filter(|thread| !thread.archived)
            .map(|thread| thread.id.as_str())
            .collect();
        self.personas
            .retain(|thread_id, _| live.contains(thread_id.as_str()));

        for thread in threads.iter().filter(|thread| !thread.archived) {
            let persona = self.ensure(
                &thread.id,
                thread.display_name(),
                thread.created_at.unwrap_or(now),
            );
            persona.thread_name = thread.display_name().to_string();
            if thread.token_count.is_some() {
                persona.token_count = thread.token_count;
            }
            if thread.model.is_some() {
                persona.model.clone_from(&thread.model);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn book() -> PersonaBook {
        PersonaBook::new(Box::new(HashNamer), 8)
    }

    fn thread(id: &str, name: &str) -> Thread {
        let mut thread = Thread::new(id);
        thread.name = Some(name.to_string());
        thread
    }

    #[test]
    fn namer_is_deterministic() {
        assert_eq!(HashNamer.identity("thread-1"), HashNamer.identity("thread-1"));
        let identity = HashNamer.identity("thread-1");
        assert!(NAMES.contains(&identity.name.as_str()));
        assert!(COLORS.contains(&identity.color.as_str()));
    }

    #[test]
    fn status_tags_map_to_moods() {
        assert_eq!(mood_for_status("thinking"), PersonaMood::Thinking);
        assert_eq!(mood_for_status("running"), PersonaMood::Working);
        assert_eq!(mood_for_status("active"), PersonaMood::Working);
        assert_eq!(mood_for_status("waiting"), PersonaMood::Waiting);
        assert_eq!(mood_for_status("systemError"), PersonaMood::Error);
        assert_eq!(mood_for_status("stopped"), PersonaMood::Idle);
        assert_eq!(mood_for_status("notLoaded"), PersonaMood::Sleeping);
        assert_eq!(mood_for_status("somethingElse"), PersonaMood::Idle);
    }

    #[test]
    fn preview_keeps_trailing_window_on_char_boundaries() {
        let mut text = String::new();
        push_trailing(&mut text, "héllo ", 8);
        push_trailing(&mut text, "wörld", 8);
        assert_eq!(text, "lo wörld");
        assert_eq!(text.chars().count(), 8);
    }

    #[test]
    fn decay_only_applies_to_matching_done_generation() {
        let mut book = book();
        let now = Utc::now();
        book.ensure("t1", "one", now);

        let done = book.set_mood("t1", PersonaMood::Done, now).expect("persona");
        assert!(book.decay("t1", done));
        assert_eq!(book.get("t1").map(|p| p.mood), Some(PersonaMood::Idle));

        let stale = book.set_mood("t1", PersonaMood::Done, now).expect("persona");
        book.set_mood("t1", PersonaMood::Working, now);
        assert!(!book.decay("t1", stale));
        assert_eq!(book.get("t1").map(|p| p.mood), Some(PersonaMood::Working));
    }

    #[test]
    fn sync_is_idempotent_and_keeps_active_moods() {
        let mut book = book();
        let now = Utc::now();
        let mut archived = thread("t3", "old");
        archived.archived = true;
        let threads = vec![thread("t1", "one"), thread("t2", "two"), archived];

        book.sync_threads(&threads, now);
        book.set_mood("t1", PersonaMood::Working, now);
        book.sync_threads(&threads, now);

        assert_eq!(book.len(), 2);
        assert!(!book.contains("t3"));
        assert_eq!(book.get("t1").map(|p| p.mood), Some(PersonaMood::Working));
        assert_eq!(book.get("t2").map(|p| p.mood), Some(PersonaMood::Idle));

        book.sync_threads(&threads[1..], now);
        assert!(!book.contains("t1"));
    }
}
