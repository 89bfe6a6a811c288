use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use crate::models::ChatLog;
use crate::repos::{ChatLogFilter, ChatLogStore, NewPrediction, StoreError};
use crate::risk::select_model_variant;
use crate::scoring::RiskScorer;

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("an evaluation run is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Counters for one pass over the stored conversations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRunReport {
    pub visited: usize,
    pub scored: usize,
    pub skipped_up_to_date: usize,
    pub skipped_empty: usize,
    pub failed: usize,
    pub cancelled: bool,
}

enum ItemOutcome {
    Scored,
    UpToDate,
    Empty,
    Failed,
}

struct RunGuard<'a> {
    running: &'a AtomicBool,
    idle: &'a Notify,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.idle.notify_waiters();
    }
}

/// Re-scores stored conversations with the authoritative classifier and keeps
/// an audit record per scoring.
///
/// Runs are exclusive through a lease taken from the store, so a worker timer
/// and an api-server admin trigger never overlap even in separate processes.
/// Clones share the local running flag.
#[derive(Clone)]
pub struct RiskEvaluationScheduler {
    store: Arc<dyn ChatLogStore>,
    scorer: Arc<dyn RiskScorer>,
    running: Arc<AtomicBool>,
    idle: Arc<Notify>,
}

impl RiskEvaluationScheduler {
    pub fn new(store: Arc<dyn ChatLogStore>, scorer: Arc<dyn RiskScorer>) -> Self {
        Self {
            store,
            scorer,
            running: Arc::new(AtomicBool::new(false)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Whether a run started through this scheduler (or a clone) is active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Resolves once no run started through this scheduler is active.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_running() {
                return;
            }
            notified.await;
        }
    }

    pub async fn run_scheduled_evaluation(&self) -> Result<EvaluationRunReport, EvaluationError> {
        let (_sender, shutdown) = watch::channel(false);
        self.run_with_shutdown(&shutdown).await
    }

    /// Visits every conversation once, most recently updated first. The
    /// shutdown flag is checked between conversations only.
    pub async fn run_with_shutdown(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<EvaluationRunReport, EvaluationError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EvaluationError::AlreadyRunning);
        }
        let _guard = RunGuard {
            running: &self.running,
            idle: &self.idle,
        };

        let Some(lease) = self.store.try_begin_evaluation_run().await? else {
            debug!("evaluation run lease held elsewhere");
            return Err(EvaluationError::AlreadyRunning);
        };

        let result = self.visit_all(shutdown).await;
        if let Err(err) = lease.release().await {
            warn!("failed to release evaluation run lease: {err}");
        }

        result
    }

    async fn visit_all(
        &self,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<EvaluationRunReport, EvaluationError> {
        let started = Instant::now();
        let chat_logs = self
            .store
            .list_chat_logs(&ChatLogFilter::default())
            .await?;
        let mut report = EvaluationRunReport::default();

        for chat_log in &chat_logs {
            if *shutdown.borrow() {
                report.cancelled = true;
                info!(
                    remaining = chat_logs.len() - report.visited,
                    "evaluation run stopping on shutdown"
                );
                break;
            }

            report.visited += 1;
            match self.evaluate_one(chat_log).await? {
                ItemOutcome::Scored => report.scored += 1,
                ItemOutcome::UpToDate => report.skipped_up_to_date += 1,
                ItemOutcome::Empty => report.skipped_empty += 1,
                ItemOutcome::Failed => report.failed += 1,
            }
        }

        info!(
            conversations = chat_logs.len(),
            visited = report.visited,
            scored = report.scored,
            skipped_up_to_date = report.skipped_up_to_date,
            skipped_empty = report.skipped_empty,
            failed = report.failed,
            cancelled = report.cancelled,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "evaluation run metrics"
        );

        Ok(report)
    }

    async fn evaluate_one(&self, chat_log: &ChatLog) -> Result<ItemOutcome, StoreError> {
        let session_id = chat_log.session_id.as_str();

        if chat_log.turns.is_empty() {
            return Ok(ItemOutcome::Empty);
        }

        if let Some(latest) = self.store.latest_prediction(session_id).await?
            && latest.last_processed_at >= chat_log.last_updated_at
        {
            debug!(session_id = %session_id, "conversation unchanged since last scoring");
            return Ok(ItemOutcome::UpToDate);
        }

        let full_text = chat_log.full_text();
        let model_variant = select_model_variant(&full_text);

        let verdict = match self.scorer.score(&full_text, model_variant).await {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    session_id = %session_id,
                    model_variant = model_variant.as_str(),
                    "risk scoring failed: {err}"
                );
                return Ok(ItemOutcome::Failed);
            }
        };
        let assessment = verdict.assessment();

        if !self.store.update_risk(session_id, assessment).await? {
            warn!(session_id = %session_id, "conversation disappeared before risk update");
            return Ok(ItemOutcome::Failed);
        }

        self.store
            .insert_prediction(&NewPrediction {
                session_id: chat_log.session_id.clone(),
                source_address: chat_log.source_address.clone(),
                last_processed_at: chat_log.last_updated_at,
                assessment,
                model_variant,
                processed_at: Utc::now(),
            })
            .await?;

        info!(
            session_id = %session_id,
            model_variant = model_variant.as_str(),
            label = verdict.label.as_str(),
            confidence_percent = verdict.confidence_percent,
            risk_score = assessment.score,
            risk_level = assessment.level.as_str(),
            "conversation scored"
        );

        Ok(ItemOutcome::Scored)
    }
}
