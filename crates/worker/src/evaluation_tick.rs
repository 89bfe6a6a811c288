use chrono::Utc;
use shared::evaluation::{EvaluationError, EvaluationRunReport, RiskEvaluationScheduler};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// One scheduled pass. Errors are logged here; the next tick retries.
pub(crate) async fn run_evaluation_tick(
    scheduler: &RiskEvaluationScheduler,
    shutdown: &watch::Receiver<bool>,
) -> Option<EvaluationRunReport> {
    let started_at = Utc::now();
    info!("evaluation tick at {}", started_at.to_rfc3339());

    match scheduler.run_with_shutdown(shutdown).await {
        Ok(report) => {
            if report.failed > 0 {
                warn!(
                    failed = report.failed,
                    "evaluation run finished with per-conversation failures"
                );
            }
            Some(report)
        }
        Err(EvaluationError::AlreadyRunning) => {
            warn!("previous evaluation run still active, skipping tick");
            None
        }
        Err(EvaluationError::Store(err)) => {
            error!("evaluation run aborted by store failure: {err}");
            None
        }
    }
}
