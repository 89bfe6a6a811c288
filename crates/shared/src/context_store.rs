use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info};
use uuid::Uuid;

/// Decides when an accumulated context is too old to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ContextExpiryPolicy {
    /// Age is measured from creation, no matter how active the session is.
    #[default]
    AbsoluteAge,
    /// Age is measured from the last read or append.
    SlidingIdle,
}

impl ContextExpiryPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "absolute" | "absolute_age" => Some(Self::AbsoluteAge),
            "sliding" | "sliding_idle" => Some(Self::SlidingIdle),
            _ => None,
        }
    }

    pub fn is_expired(self, context: &SessionContext, now: DateTime<Utc>, ttl: Duration) -> bool {
        let reference = match self {
            Self::AbsoluteAge => context.created_at,
            Self::SlidingIdle => context.last_accessed_at,
        };
        let age = now.signed_duration_since(reference);
        match age.to_std() {
            Ok(age) => age > ttl,
            Err(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("unknown or expired session context {0}")]
    UnknownSession(String),
}

/// In-memory running transcripts, keyed by session id. Cloning shares the
/// underlying map.
#[derive(Debug, Clone)]
pub struct SessionContextStore {
    entries: Arc<Mutex<HashMap<String, SessionContext>>>,
    ttl: Duration,
    policy: ContextExpiryPolicy,
}

impl SessionContextStore {
    pub fn new(ttl: Duration, policy: ContextExpiryPolicy) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            policy,
        }
    }

    pub fn create_context(&self, initial_text: &str) -> String {
        self.create_context_at(initial_text, Utc::now())
    }

    pub fn create_context_at(&self, initial_text: &str, now: DateTime<Utc>) -> String {
        let session_id = Uuid::new_v4().to_string();
        self.lock_entries().insert(
            session_id.clone(),
            SessionContext {
                text: initial_text.to_string(),
                created_at: now,
                last_accessed_at: now,
            },
        );
        session_id
    }

    pub fn get_context(&self, session_id: &str) -> Option<String> {
        self.get_context_at(session_id, Utc::now())
    }

    pub fn get_context_at(&self, session_id: &str, now: DateTime<Utc>) -> Option<String> {
        let mut entries = self.lock_entries();
        let context = entries.get_mut(session_id)?;
        if self.policy.is_expired(context, now, self.ttl) {
            entries.remove(session_id);
            return None;
        }

        context.last_accessed_at = now;
        Some(context.text.clone())
    }

    /// Appends a turn and returns the whole accumulated text. Unknown ids are
    /// rejected rather than created.
    pub fn update_context(&self, session_id: &str, turn: &str) -> Result<String, ContextError> {
        self.update_context_at(session_id, turn, Utc::now())
    }

    pub fn update_context_at(
        &self,
        session_id: &str,
        turn: &str,
        now: DateTime<Utc>,
    ) -> Result<String, ContextError> {
        let mut entries = self.lock_entries();
        let unknown = || ContextError::UnknownSession(session_id.to_string());

        let expired = match entries.get(session_id) {
            Some(context) => self.policy.is_expired(context, now, self.ttl),
            None => return Err(unknown()),
        };
        if expired {
            entries.remove(session_id);
            return Err(unknown());
        }

        let context = entries.get_mut(session_id).ok_or_else(unknown)?;
        if !context.text.is_empty() {
            context.text.push('\n');
        }
        context.text.push_str(turn);
        context.last_accessed_at = now;
        Ok(context.text.clone())
    }

    pub fn delete_context(&self, session_id: &str) -> bool {
        self.lock_entries().remove(session_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every context the expiry policy rejects at `now`.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.lock_entries();
        let before = entries.len();
        entries.retain(|_, context| !self.policy.is_expired(context, now, self.ttl));
        before - entries.len()
    }

    pub fn spawn_sweeper(
        &self,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; nothing can be stale yet.
            ticker.tick().await;

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            debug!("context sweeper stopping");
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let removed = store.sweep_expired(Utc::now());
                        if removed > 0 {
                            info!(removed, remaining = store.len(), "expired session contexts swept");
                        } else {
                            debug!(remaining = store.len(), "context sweep found nothing to remove");
                        }
                    }
                }
            }
        })
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<String, SessionContext>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
