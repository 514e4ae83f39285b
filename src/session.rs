//! Session registry for "load more" deduplication.
//!
//! A session remembers every normalized word already sent to the client,
//! so follow-up requests carrying the same `session_id` never repeat one.
//!
//! # Concurrency
//!
//! The registry map sits behind one mutex; each session's word set sits
//! behind its own. Acceptance ([`SessionHandle::accept`]) checks and
//! inserts under the session lock in one step, so two requests streaming
//! into the same session can never both emit the same word. No lock is
//! held across an `.await`.
//!
//! # Memory bounds
//!
//! Sessions expire after an idle period (default 30 minutes), swept by
//! [`spawn_sweeper`] and checked again on lookup. The registry also caps
//! the number of live sessions and evicts the least recently touched one
//! when a new session would exceed the cap.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use brainstormer_core::event::Suggestion;
use brainstormer_core::filter::SuggestionFilter;
use brainstormer_core::phrase::MatchMode;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SessionsConfig;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

struct Slot {
    words: Arc<Mutex<HashSet<String>>>,
    created_at: DateTime<Utc>,
    last_touched_at: DateTime<Utc>,
}

/// Shared handle to one session's emitted-word set.
///
/// Stays usable after the session is evicted; later requests for the same
/// id then start fresh.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    continued: bool,
    words: Arc<Mutex<HashSet<String>>>,
}

impl SessionHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `true` when the caller's id matched a live session.
    pub fn is_continuation(&self) -> bool {
        self.continued
    }

    /// Filter `candidate` against this session, recording it on acceptance.
    pub fn accept(
        &self,
        filter: &SuggestionFilter,
        candidate: &str,
        match_type: MatchMode,
    ) -> Option<Suggestion> {
        filter.accept(candidate, &mut lock(&self.words), match_type)
    }

    /// Number of distinct words emitted in this session so far.
    pub fn word_count(&self) -> usize {
        lock(&self.words).len()
    }

    pub fn contains(&self, word: &str) -> bool {
        lock(&self.words).contains(&brainstormer_core::filter::normalize(word))
    }
}

/// Longest idle expiry a store will honor (seven days).
pub const MAX_IDLE_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

/// Process-wide session registry.
pub struct SessionStore {
    slots: Mutex<HashMap<String, Slot>>,
    idle_expiry: chrono::Duration,
    capacity: usize,
}

impl SessionStore {
    /// `idle_expiry` is capped at [`MAX_IDLE_EXPIRY_SECS`].
    pub fn new(idle_expiry: Duration, capacity: usize) -> Self {
        let idle_expiry = idle_expiry.min(Duration::from_secs(MAX_IDLE_EXPIRY_SECS));
        Self {
            slots: Mutex::new(HashMap::new()),
            idle_expiry: chrono::Duration::milliseconds(idle_expiry.as_millis() as i64),
            capacity: capacity.max(1),
        }
    }

    pub fn from_config(config: &SessionsConfig) -> Self {
        Self::new(
            Duration::from_secs(config.idle_expiry_secs),
            config.capacity,
        )
    }

    /// Resolve the session for a request.
    ///
    /// A supplied id that names a live session continues it. An unknown or
    /// expired id, or no id at all, starts a fresh session under a newly
    /// minted id.
    pub fn get_or_create(&self, session_id: Option<&str>) -> SessionHandle {
        self.get_or_create_at(session_id, Utc::now())
    }

    pub fn get_or_create_at(&self, session_id: Option<&str>, now: DateTime<Utc>) -> SessionHandle {
        let mut slots = lock(&self.slots);

        if let Some(id) = session_id {
            if let Some(slot) = slots.get_mut(id) {
                if !self.is_expired(slot, now) {
                    slot.last_touched_at = now;
                    return SessionHandle {
                        id: id.to_string(),
                        continued: true,
                        words: slot.words.clone(),
                    };
                }
                slots.remove(id);
            }
        }

        while slots.len() >= self.capacity {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.last_touched_at)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    tracing::debug!(session_id = %id, "evicting least recently used session");
                    slots.remove(&id);
                }
                None => break,
            }
        }

        let id = Uuid::new_v4().to_string();
        let words = Arc::new(Mutex::new(HashSet::new()));
        slots.insert(
            id.clone(),
            Slot {
                words: words.clone(),
                created_at: now,
                last_touched_at: now,
            },
        );

        SessionHandle {
            id,
            continued: false,
            words,
        }
    }

    /// Mark a session as used now. Unknown ids are ignored.
    pub fn touch(&self, session_id: &str) {
        self.touch_at(session_id, Utc::now());
    }

    pub fn touch_at(&self, session_id: &str, now: DateTime<Utc>) {
        if let Some(slot) = lock(&self.slots).get_mut(session_id) {
            slot.last_touched_at = now;
        }
    }

    /// Remove sessions idle for longer than the expiry. Returns how many.
    pub fn evict_expired(&self, now: DateTime<Utc>) -> usize {
        let mut slots = lock(&self.slots);
        let before = slots.len();
        slots.retain(|_, slot| !self.is_expired(slot, now));
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// When the session was created, if it is still live.
    pub fn created_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        lock(&self.slots).get(session_id).map(|s| s.created_at)
    }

    fn is_expired(&self, slot: &Slot, now: DateTime<Utc>) -> bool {
        now - slot.last_touched_at > self.idle_expiry
    }
}

/// Periodically evict expired sessions until the task is aborted.
pub fn spawn_sweeper(store: Arc<SessionStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let evicted = store.evict_expired(Utc::now());
            if evicted > 0 {
                tracing::debug!(evicted, live = store.len(), "session sweep");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Duration::from_secs(30 * 60), 100)
    }

    #[test]
    fn test_new_session_when_no_id() {
        let s = store();
        let h = s.get_or_create(None);
        assert!(!h.is_continuation());
        assert_eq!(h.word_count(), 0);
        assert_eq!(s.len(), 1);
        assert!(s.created_at(h.id()).is_some());
    }

    #[test]
    fn test_known_id_continues_with_same_words() {
        let s = store();
        let filter = SuggestionFilter::default();
        let first = s.get_or_create(None);
        assert!(first.accept(&filter, "alpha", MatchMode::Or).is_some());

        let again = s.get_or_create(Some(first.id()));
        assert!(again.is_continuation());
        assert_eq!(again.id(), first.id());
        assert!(again.contains("ALPHA"));
        assert!(again.accept(&filter, "Alpha", MatchMode::Or).is_none());
    }

    #[test]
    fn test_unknown_id_gets_fresh_session() {
        let s = store();
        let h = s.get_or_create(Some("not-a-session"));
        assert!(!h.is_continuation());
        assert_ne!(h.id(), "not-a-session");
    }

    #[test]
    fn test_evict_expired() {
        let s = store();
        let t0 = Utc::now();
        let old = s.get_or_create_at(None, t0);
        let fresh = s.get_or_create_at(None, t0 + chrono::Duration::minutes(20));

        let evicted = s.evict_expired(t0 + chrono::Duration::minutes(31));
        assert_eq!(evicted, 1);
        assert!(s.created_at(old.id()).is_none());
        assert!(s.created_at(fresh.id()).is_some());
    }

    #[test]
    fn test_touch_extends_lifetime() {
        let s = store();
        let t0 = Utc::now();
        let h = s.get_or_create_at(None, t0);
        s.touch_at(h.id(), t0 + chrono::Duration::minutes(25));
        assert_eq!(s.evict_expired(t0 + chrono::Duration::minutes(40)), 0);
        assert_eq!(s.evict_expired(t0 + chrono::Duration::minutes(56)), 1);
    }

    #[test]
    fn test_expired_id_is_not_continued() {
        let s = store();
        let t0 = Utc::now();
        let h = s.get_or_create_at(None, t0);
        let later = s.get_or_create_at(Some(h.id()), t0 + chrono::Duration::hours(1));
        assert!(!later.is_continuation());
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn test_capacity_evicts_least_recently_touched() {
        let s = SessionStore::new(Duration::from_secs(1800), 2);
        let t0 = Utc::now();
        let a = s.get_or_create_at(None, t0);
        let b = s.get_or_create_at(None, t0 + chrono::Duration::seconds(1));
        s.touch_at(a.id(), t0 + chrono::Duration::seconds(2));

        let c = s.get_or_create_at(None, t0 + chrono::Duration::seconds(3));
        assert_eq!(s.len(), 2);
        assert!(s.created_at(a.id()).is_some());
        assert!(s.created_at(b.id()).is_none());
        assert!(s.created_at(c.id()).is_some());
    }

    #[test]
    fn test_concurrent_acceptance_is_exclusive() {
        let s = Arc::new(store());
        let id = s.get_or_create(None).id().to_string();
        let filter = SuggestionFilter::default();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let s = s.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    let h = s.get_or_create(Some(&id));
                    (0..50)
                        .filter(|i| h.accept(&filter, &format!("word {}", i), MatchMode::Or).is_some())
                        .count()
                })
            })
            .collect();

        let accepted: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(accepted, 50);
        assert_eq!(s.get_or_create(Some(&id)).word_count(), 50);
    }

    #[tokio::test]
    async fn test_sweeper_evicts() {
        let s = Arc::new(SessionStore::new(Duration::from_millis(1), 10));
        s.get_or_create_at(None, Utc::now() - chrono::Duration::seconds(5));
        let handle = spawn_sweeper(s.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(s.is_empty());
        handle.abort();
    }

    #[test]
    fn test_idle_expiry_is_capped() {
        let s = SessionStore::new(Duration::MAX, 10);
        let now = Utc::now();
        let recent = s.get_or_create_at(None, now - chrono::Duration::days(6));
        let stale = s.get_or_create_at(None, now - chrono::Duration::days(8));

        assert_eq!(s.evict_expired(now), 1);
        assert!(s.created_at(recent.id()).is_some());
        assert!(s.created_at(stale.id()).is_none());
    }
}
