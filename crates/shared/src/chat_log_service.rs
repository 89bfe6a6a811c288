use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

use crate::context_store::SessionContextStore;
use crate::models::{ChatLog, Location, TURN_SEPARATOR, is_placeholder_address};
use crate::repos::{ChatLogStore, NewChatLog, StoreError, TurnAppend};
use crate::risk::{RiskAssessment, RiskTable};
use crate::scoring::{HeuristicError, HeuristicEvaluator};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unknown or expired session {0}")]
    UnknownSession(String),
    #[error("risk evaluation failed: {0}")]
    Dependency(#[from] HeuristicError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone)]
pub struct StartSession {
    pub source_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppendTurn {
    pub session_id: String,
    pub text: String,
    pub location: Option<Location>,
    pub source_address: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SubmittedTurn {
    pub chat_log: ChatLog,
    /// Context text including the turn, or `None` when the context was
    /// removed once the turn was already saved.
    pub context: Option<String>,
}

/// Per-key async locks. Entries nobody holds are dropped on the next insert.
#[derive(Debug, Default)]
struct SessionLocks {
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut entries = match self.entries.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !entries.contains_key(session_id) {
                entries.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(
                entries
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        lock.lock_owned().await
    }
}

/// Request-path writes: session start and per-turn persistence with an
/// immediate heuristic score.
pub struct ChatLogService {
    store: Arc<dyn ChatLogStore>,
    evaluator: Arc<dyn HeuristicEvaluator>,
    contexts: SessionContextStore,
    locks: SessionLocks,
}

impl ChatLogService {
    pub fn new(
        store: Arc<dyn ChatLogStore>,
        evaluator: Arc<dyn HeuristicEvaluator>,
        contexts: SessionContextStore,
    ) -> Self {
        Self {
            store,
            evaluator,
            contexts,
            locks: SessionLocks::default(),
        }
    }

    pub fn contexts(&self) -> &SessionContextStore {
        &self.contexts
    }

    pub fn store(&self) -> &Arc<dyn ChatLogStore> {
        &self.store
    }

    /// Opens a context with empty text and an empty durable record carrying
    /// the caller's location.
    pub async fn start_session(&self, request: StartSession) -> Result<String, PipelineError> {
        let (Some(latitude), Some(longitude)) = (request.latitude, request.longitude) else {
            return Err(PipelineError::Validation(
                "latitude, longitude and city are required".to_string(),
            ));
        };
        let city = request
            .city
            .as_deref()
            .map(str::trim)
            .filter(|city| !city.is_empty())
            .ok_or_else(|| {
                PipelineError::Validation("latitude, longitude and city are required".to_string())
            })?;
        if !latitude.is_finite() || !longitude.is_finite() {
            return Err(PipelineError::Validation(
                "latitude and longitude must be finite numbers".to_string(),
            ));
        }

        let now = Utc::now();
        let session_id = self.contexts.create_context_at("", now);
        let new_log = NewChatLog {
            session_id: session_id.clone(),
            source_address: usable_source_address(request.source_address.as_deref()),
            location: Some(Location {
                latitude,
                longitude,
                city: city.to_string(),
            }),
            created_at: now,
        };

        if let Err(err) = self.store.create_chat_log(&new_log).await {
            self.contexts.delete_context(&session_id);
            return Err(err.into());
        }

        info!(session_id = %session_id, city = %city, "session started");
        Ok(session_id)
    }

    /// Persists one turn and re-scores the whole conversation with the
    /// heuristic evaluator. Nothing is written when the evaluator fails.
    pub async fn append_turn(&self, request: AppendTurn) -> Result<ChatLog, PipelineError> {
        let session_id = validated_session_id(&request)?.to_string();
        let _guard = self.locks.acquire(&session_id).await;

        self.append_turn_locked(&session_id, request).await
    }

    /// Request-path entry for a user turn. The context check, the durable
    /// append and the context update run under the session lock, so context
    /// text follows the stored turn order.
    pub async fn submit_turn(&self, request: AppendTurn) -> Result<SubmittedTurn, PipelineError> {
        let session_id = validated_session_id(&request)?.to_string();
        let _guard = self.locks.acquire(&session_id).await;

        if self.contexts.get_context(&session_id).is_none() {
            return Err(PipelineError::UnknownSession(session_id));
        }

        let text = request.text.clone();
        let chat_log = self.append_turn_locked(&session_id, request).await?;

        // The turn is committed; a vanished context is not an error here.
        let context = match self.contexts.update_context(&session_id, &text) {
            Ok(context) => Some(context),
            Err(err) => {
                warn!(session_id = %session_id, "turn saved but context is gone: {err}");
                None
            }
        };

        Ok(SubmittedTurn { chat_log, context })
    }

    async fn append_turn_locked(
        &self,
        session_id: &str,
        request: AppendTurn,
    ) -> Result<ChatLog, PipelineError> {
        let existing = self.store.find_chat_log(session_id).await?;
        let mut turns = existing
            .map(|chat_log| chat_log.turns)
            .unwrap_or_default();
        turns.push(request.text.clone());
        let full_text = turns.join(TURN_SEPARATOR);

        let score = self.evaluator.evaluate(&full_text).await.map_err(|err| {
            warn!(session_id = %session_id, "heuristic risk evaluation failed: {err}");
            PipelineError::Dependency(err)
        })?;
        let assessment = RiskAssessment::from_score(score, RiskTable::Heuristic);

        let append = TurnAppend {
            session_id: session_id.to_string(),
            turn: request.text,
            location: request.location,
            source_address: usable_source_address(request.source_address.as_deref()),
            assessment,
            appended_at: Utc::now(),
        };
        let chat_log = self.store.append_turn(&append).await?;

        debug!(
            session_id = %session_id,
            turn_count = chat_log.turns.len(),
            risk_score = assessment.score,
            risk_level = assessment.level.as_str(),
            "turn persisted"
        );

        Ok(chat_log)
    }
}

fn validated_session_id(request: &AppendTurn) -> Result<&str, PipelineError> {
    let session_id = request.session_id.trim();
    if session_id.is_empty() {
        return Err(PipelineError::Validation("session id is required".to_string()));
    }
    if request.text.trim().is_empty() {
        return Err(PipelineError::Validation("turn text is required".to_string()));
    }

    Ok(session_id)
}

fn usable_source_address(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|address| !is_placeholder_address(address))
        .map(str::to_string)
}
