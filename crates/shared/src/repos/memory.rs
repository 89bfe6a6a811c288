use std::collections::HashMap;
use std::future::ready;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::models::{ChatLog, PredictionRecord};
use crate::risk::RiskAssessment;

use super::{
    ChatLogFilter, ChatLogStore, NewChatLog, NewPrediction, RunLease, StoreError, StoreFuture,
    TurnAppend,
};

#[derive(Debug, Default)]
struct MemoryState {
    chat_logs: HashMap<String, ChatLog>,
    predictions: Vec<PredictionRecord>,
}

/// Process-local store with the same semantics as the PostgreSQL store. Used
/// by tests and for running the api-server without a database.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    evaluation_run: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prediction_count(&self) -> usize {
        self.lock_state().predictions.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn claim_evaluation_run(&self) -> Result<Option<RunLease>, StoreError> {
        let claimed = self
            .evaluation_run
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        Ok(claimed.then(|| RunLease::memory(Arc::clone(&self.evaluation_run))))
    }

    fn find(&self, session_id: &str) -> Result<Option<ChatLog>, StoreError> {
        Ok(self.lock_state().chat_logs.get(session_id).cloned())
    }

    fn list(&self, filter: &ChatLogFilter) -> Result<Vec<ChatLog>, StoreError> {
        let mut items = self
            .lock_state()
            .chat_logs
            .values()
            .filter(|chat_log| filter.matches(chat_log))
            .cloned()
            .collect::<Vec<_>>();
        items.sort_by(|left, right| {
            right
                .last_updated_at
                .cmp(&left.last_updated_at)
                .then_with(|| left.session_id.cmp(&right.session_id))
        });
        Ok(items)
    }

    fn create(&self, new_log: &NewChatLog) -> Result<ChatLog, StoreError> {
        let initial = RiskAssessment::initial();
        let mut state = self.lock_state();
        let chat_log = state
            .chat_logs
            .entry(new_log.session_id.clone())
            .or_insert_with(|| ChatLog {
                session_id: new_log.session_id.clone(),
                turns: Vec::new(),
                source_address: new_log.source_address.clone(),
                location: new_log.location.clone(),
                risk_score: initial.score,
                risk_level: initial.level,
                created_at: new_log.created_at,
                last_updated_at: new_log.created_at,
            });
        Ok(chat_log.clone())
    }

    fn append(&self, append: &TurnAppend) -> Result<ChatLog, StoreError> {
        let mut state = self.lock_state();
        let chat_log = state
            .chat_logs
            .entry(append.session_id.clone())
            .or_insert_with(|| ChatLog {
                session_id: append.session_id.clone(),
                turns: Vec::new(),
                source_address: None,
                location: None,
                risk_score: append.assessment.score,
                risk_level: append.assessment.level,
                created_at: append.appended_at,
                last_updated_at: append.appended_at,
            });

        chat_log.turns.push(append.turn.clone());
        if chat_log.source_address.is_none() {
            chat_log.source_address = append.source_address.clone();
        }
        if let Some(location) = append.location.as_ref() {
            chat_log.location = Some(location.clone());
        }
        chat_log.risk_score = append.assessment.score;
        chat_log.risk_level = append.assessment.level;
        chat_log.last_updated_at = chat_log.last_updated_at.max(append.appended_at);

        Ok(chat_log.clone())
    }

    fn set_risk(&self, session_id: &str, assessment: RiskAssessment) -> Result<bool, StoreError> {
        let mut state = self.lock_state();
        match state.chat_logs.get_mut(session_id) {
            Some(chat_log) => {
                chat_log.risk_score = assessment.score;
                chat_log.risk_level = assessment.level;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn latest(&self, session_id: &str) -> Result<Option<PredictionRecord>, StoreError> {
        let state = self.lock_state();
        let latest = state
            .predictions
            .iter()
            .filter(|prediction| prediction.session_id == session_id)
            .max_by(|left, right| {
                left.last_processed_at
                    .cmp(&right.last_processed_at)
                    .then_with(|| left.processed_at.cmp(&right.processed_at))
            })
            .cloned();
        Ok(latest)
    }

    fn insert(&self, prediction: &NewPrediction) -> Result<PredictionRecord, StoreError> {
        let record = PredictionRecord {
            id: Uuid::new_v4(),
            session_id: prediction.session_id.clone(),
            source_address: prediction.source_address.clone(),
            last_processed_at: prediction.last_processed_at,
            risk_score: prediction.assessment.score,
            risk_level: prediction.assessment.level,
            model_variant: prediction.model_variant,
            processed_at: prediction.processed_at,
        };
        self.lock_state().predictions.push(record.clone());
        Ok(record)
    }

    fn predictions_for(&self, session_id: &str) -> Result<Vec<PredictionRecord>, StoreError> {
        let state = self.lock_state();
        let mut items = state
            .predictions
            .iter()
            .filter(|prediction| prediction.session_id == session_id)
            .cloned()
            .collect::<Vec<_>>();
        items.sort_by(|left, right| right.processed_at.cmp(&left.processed_at));
        Ok(items)
    }
}

impl ChatLogStore for MemoryStore {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(ready(Ok::<(), StoreError>(())))
    }

    fn try_begin_evaluation_run(&self) -> StoreFuture<'_, Option<RunLease>> {
        Box::pin(ready(self.claim_evaluation_run()))
    }

    fn find_chat_log<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<ChatLog>> {
        Box::pin(ready(self.find(session_id)))
    }

    fn list_chat_logs<'a>(&'a self, filter: &'a ChatLogFilter) -> StoreFuture<'a, Vec<ChatLog>> {
        Box::pin(ready(self.list(filter)))
    }

    fn create_chat_log<'a>(&'a self, new_log: &'a NewChatLog) -> StoreFuture<'a, ChatLog> {
        Box::pin(ready(self.create(new_log)))
    }

    fn append_turn<'a>(&'a self, append: &'a TurnAppend) -> StoreFuture<'a, ChatLog> {
        Box::pin(ready(self.append(append)))
    }

    fn update_risk<'a>(
        &'a self,
        session_id: &'a str,
        assessment: RiskAssessment,
    ) -> StoreFuture<'a, bool> {
        Box::pin(ready(self.set_risk(session_id, assessment)))
    }

    fn latest_prediction<'a>(
        &'a self,
        session_id: &'a str,
    ) -> StoreFuture<'a, Option<PredictionRecord>> {
        Box::pin(ready(self.latest(session_id)))
    }

    fn insert_prediction<'a>(
        &'a self,
        prediction: &'a NewPrediction,
    ) -> StoreFuture<'a, PredictionRecord> {
        Box::pin(ready(self.insert(prediction)))
    }

    fn list_predictions<'a>(
        &'a self,
        session_id: &'a str,
    ) -> StoreFuture<'a, Vec<PredictionRecord>> {
        Box::pin(ready(self.predictions_for(session_id)))
    }
}
