use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};
use thiserror::Error;

use crate::models::{ChatLog, Location, ModelVariant, PredictionRecord, RiskLevel};
use crate::risk::RiskAssessment;

mod chat_logs;
mod memory;
mod predictions;

pub use memory::MemoryStore;

/// Advisory lock key shared by every process that runs evaluations against
/// the same database.
const EVALUATION_RUN_LOCK_KEY: i64 = 0x5249_534b_5255_4e31;

pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid persisted data: {0}")]
    InvalidData(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Fields written when a session starts, before any turn arrives.
#[derive(Debug, Clone)]
pub struct NewChatLog {
    pub session_id: String,
    pub source_address: Option<String>,
    pub location: Option<Location>,
    pub created_at: DateTime<Utc>,
}

/// One turn appended to a conversation together with the score computed over
/// the conversation including that turn.
#[derive(Debug, Clone)]
pub struct TurnAppend {
    pub session_id: String,
    pub turn: String,
    pub location: Option<Location>,
    pub source_address: Option<String>,
    pub assessment: RiskAssessment,
    pub appended_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPrediction {
    pub session_id: String,
    pub source_address: Option<String>,
    pub last_processed_at: DateTime<Utc>,
    pub assessment: RiskAssessment,
    pub model_variant: ModelVariant,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct ChatLogFilter {
    pub risk_level: Option<RiskLevel>,
    /// Case-insensitive substring match on the location's city.
    pub city: Option<String>,
}

impl ChatLogFilter {
    pub fn matches(&self, chat_log: &ChatLog) -> bool {
        if let Some(level) = self.risk_level
            && chat_log.risk_level != level
        {
            return false;
        }

        match self.city.as_deref() {
            Some(city) => chat_log.location.as_ref().is_some_and(|location| {
                location
                    .city
                    .to_lowercase()
                    .contains(&city.to_lowercase())
            }),
            None => true,
        }
    }
}

/// Exclusive claim on the evaluation run across every process sharing the
/// store. Call [`RunLease::release`] when the run ends; dropping the lease
/// also frees it.
pub struct RunLease {
    holder: LeaseHolder,
}

enum LeaseHolder {
    Postgres(Option<PoolConnection<Postgres>>),
    Memory(Arc<AtomicBool>),
}

impl RunLease {
    fn postgres(connection: PoolConnection<Postgres>) -> Self {
        Self {
            holder: LeaseHolder::Postgres(Some(connection)),
        }
    }

    pub(crate) fn memory(flag: Arc<AtomicBool>) -> Self {
        Self {
            holder: LeaseHolder::Memory(flag),
        }
    }

    pub async fn release(mut self) -> Result<(), StoreError> {
        if let LeaseHolder::Postgres(slot) = &mut self.holder
            && let Some(mut connection) = slot.take()
        {
            let unlocked = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
                .bind(EVALUATION_RUN_LOCK_KEY)
                .fetch_one(&mut *connection)
                .await;
            if unlocked.is_err() {
                drop(connection.detach());
            }
            unlocked?;
        }

        Ok(())
    }
}

impl Drop for RunLease {
    fn drop(&mut self) {
        match &mut self.holder {
            // Closing the session releases its advisory locks.
            LeaseHolder::Postgres(slot) => {
                if let Some(connection) = slot.take() {
                    drop(connection.detach());
                }
            }
            LeaseHolder::Memory(flag) => flag.store(false, Ordering::Release),
        }
    }
}

/// Document-style persistence for conversation records and their
/// prediction audit trail.
///
/// `append_turn` must append atomically at the storage layer: a writer that
/// read the record earlier must never replace turns written since.
/// `update_risk` touches only the score and level.
pub trait ChatLogStore: Send + Sync {
    fn ping(&self) -> StoreFuture<'_, ()>;

    /// Returns `None` while another holder, in this process or another one,
    /// owns the evaluation run.
    fn try_begin_evaluation_run(&self) -> StoreFuture<'_, Option<RunLease>>;

    fn find_chat_log<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<ChatLog>>;

    /// Most recently updated first.
    fn list_chat_logs<'a>(&'a self, filter: &'a ChatLogFilter) -> StoreFuture<'a, Vec<ChatLog>>;

    /// Creates the record if absent and returns the stored record.
    fn create_chat_log<'a>(&'a self, new_log: &'a NewChatLog) -> StoreFuture<'a, ChatLog>;

    fn append_turn<'a>(&'a self, append: &'a TurnAppend) -> StoreFuture<'a, ChatLog>;

    /// Returns `false` when no record exists for the session.
    fn update_risk<'a>(
        &'a self,
        session_id: &'a str,
        assessment: RiskAssessment,
    ) -> StoreFuture<'a, bool>;

    fn latest_prediction<'a>(
        &'a self,
        session_id: &'a str,
    ) -> StoreFuture<'a, Option<PredictionRecord>>;

    fn insert_prediction<'a>(
        &'a self,
        prediction: &'a NewPrediction,
    ) -> StoreFuture<'a, PredictionRecord>;

    /// Newest first.
    fn list_predictions<'a>(
        &'a self,
        session_id: &'a str,
    ) -> StoreFuture<'a, Vec<PredictionRecord>>;
}

/// PostgreSQL-backed store.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn ping(&self) -> Result<(), StoreError> {
        let _: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    async fn try_lock_evaluation_run(&self) -> Result<Option<RunLease>, StoreError> {
        let mut connection = self.pool.acquire().await?;
        let acquired: bool = sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
            .bind(EVALUATION_RUN_LOCK_KEY)
            .fetch_one(&mut *connection)
            .await?;

        Ok(acquired.then(|| RunLease::postgres(connection)))
    }
}

impl ChatLogStore for Store {
    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(Store::ping(self))
    }

    fn try_begin_evaluation_run(&self) -> StoreFuture<'_, Option<RunLease>> {
        Box::pin(self.try_lock_evaluation_run())
    }

    fn find_chat_log<'a>(&'a self, session_id: &'a str) -> StoreFuture<'a, Option<ChatLog>> {
        Box::pin(self.find_chat_log_row(session_id))
    }

    fn list_chat_logs<'a>(&'a self, filter: &'a ChatLogFilter) -> StoreFuture<'a, Vec<ChatLog>> {
        Box::pin(self.list_chat_log_rows(filter))
    }

    fn create_chat_log<'a>(&'a self, new_log: &'a NewChatLog) -> StoreFuture<'a, ChatLog> {
        Box::pin(self.insert_chat_log_row(new_log))
    }

    fn append_turn<'a>(&'a self, append: &'a TurnAppend) -> StoreFuture<'a, ChatLog> {
        Box::pin(self.upsert_turn_row(append))
    }

    fn update_risk<'a>(
        &'a self,
        session_id: &'a str,
        assessment: RiskAssessment,
    ) -> StoreFuture<'a, bool> {
        Box::pin(self.update_risk_row(session_id, assessment))
    }

    fn latest_prediction<'a>(
        &'a self,
        session_id: &'a str,
    ) -> StoreFuture<'a, Option<PredictionRecord>> {
        Box::pin(self.latest_prediction_row(session_id))
    }

    fn insert_prediction<'a>(
        &'a self,
        prediction: &'a NewPrediction,
    ) -> StoreFuture<'a, PredictionRecord> {
        Box::pin(self.insert_prediction_row(prediction))
    }

    fn list_predictions<'a>(
        &'a self,
        session_id: &'a str,
    ) -> StoreFuture<'a, Vec<PredictionRecord>> {
        Box::pin(self.list_prediction_rows(session_id))
    }
}

pub(crate) fn risk_level_from_db(value: &str) -> Result<RiskLevel, StoreError> {
    RiskLevel::parse(value)
        .ok_or_else(|| StoreError::InvalidData(format!("unknown risk level persisted: {value}")))
}

pub(crate) fn model_variant_from_db(value: &str) -> Result<ModelVariant, StoreError> {
    ModelVariant::parse(value).ok_or_else(|| {
        StoreError::InvalidData(format!("unknown model variant persisted: {value}"))
    })
}
