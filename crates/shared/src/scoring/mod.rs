pub mod heuristic;
pub mod subprocess;

use std::future::Future;
use std::pin::Pin;

use thiserror::Error;

use crate::models::ModelVariant;
use crate::risk::ScorerVerdict;

pub use heuristic::{
    HeuristicError, HeuristicEvaluator, HeuristicFuture, HttpHeuristicEvaluator,
    KeywordHeuristicEvaluator,
};
pub use subprocess::{SubprocessScorer, parse_scorer_output};

pub type ScorerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ScorerVerdict, ScorerError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ScorerError {
    #[error("failed to start scorer process: {0}")]
    Spawn(String),
    #[error("scorer process io failed: {0}")]
    Io(String),
    #[error("scorer timed out after {0} seconds")]
    Timeout(u64),
    #[error("scorer exited with status {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },
    #[error("scorer returned malformed output: {0}")]
    MalformedOutput(String),
}

/// Authoritative classifier used by the batch evaluation.
pub trait RiskScorer: Send + Sync {
    fn score<'a>(&'a self, text: &'a str, variant: ModelVariant) -> ScorerFuture<'a>;
}
