use std::future::{Future, ready};
use std::pin::Pin;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type HeuristicFuture<'a> = Pin<Box<dyn Future<Output = Result<f64, HeuristicError>> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum HeuristicError {
    #[error("risk evaluator request timed out")]
    Timeout,
    #[error("risk evaluator request failed: {0}")]
    RequestFailed(String),
    #[error("risk evaluator returned an invalid payload: {0}")]
    InvalidPayload(String),
    #[error("risk evaluator returned out-of-range score {0}")]
    InvalidScore(f64),
    #[error("failed to build risk evaluator http client: {0}")]
    HttpClient(String),
}

/// Fast per-turn scorer. Returns a risk score in `0..=100` for a conversation
/// text; callers await it inline, so it may be a network round trip.
pub trait HeuristicEvaluator: Send + Sync {
    fn evaluate<'a>(&'a self, text: &'a str) -> HeuristicFuture<'a>;
}

pub fn validate_score(score: f64) -> Result<f64, HeuristicError> {
    if score.is_finite() && (0.0..=100.0).contains(&score) {
        Ok(score)
    } else {
        Err(HeuristicError::InvalidScore(score))
    }
}

#[derive(Debug, Serialize)]
struct EvaluateRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EvaluateResponse {
    risk_percent: f64,
}

/// Posts `{"text": ...}` to an evaluation service and reads
/// `{"risk_percent": <0-100>}` back.
#[derive(Clone)]
pub struct HttpHeuristicEvaluator {
    client: reqwest::Client,
    url: String,
}

impl HttpHeuristicEvaluator {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, HeuristicError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| HeuristicError::HttpClient(err.to_string()))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn send(&self, text: &str) -> Result<f64, HeuristicError> {
        let response = self
            .client
            .post(&self.url)
            .json(&EvaluateRequest { text })
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    HeuristicError::Timeout
                } else {
                    HeuristicError::RequestFailed("request_unavailable".to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HeuristicError::RequestFailed(format!(
                "status={}",
                status.as_u16()
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|_| HeuristicError::InvalidPayload("response_body_read_failed".to_string()))?;
        let parsed: EvaluateResponse = serde_json::from_str(&body)
            .map_err(|_| HeuristicError::InvalidPayload("response_json_parse_failed".to_string()))?;

        validate_score(parsed.risk_percent)
    }
}

impl HeuristicEvaluator for HttpHeuristicEvaluator {
    fn evaluate<'a>(&'a self, text: &'a str) -> HeuristicFuture<'a> {
        Box::pin(self.send(text))
    }
}

const SEVERE_PHRASES: &[&str] = &[
    "kill myself",
    "end my life",
    "suicide",
    "suicidal",
    "want to die",
    "better off dead",
    "no reason to live",
    "take my own life",
];

const CONCERNING_PHRASES: &[&str] = &[
    "hopeless",
    "worthless",
    "can't go on",
    "cannot go on",
    "hurt myself",
    "self harm",
    "self-harm",
    "give up",
    "no way out",
    "burden",
];

const SEVERE_WEIGHT: f64 = 45.0;
const CONCERNING_WEIGHT: f64 = 20.0;

/// Local phrase-matching scorer used when no evaluation service is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordHeuristicEvaluator;

impl KeywordHeuristicEvaluator {
    pub fn score(text: &str) -> f64 {
        let lower = text.to_lowercase();
        let severe = SEVERE_PHRASES
            .iter()
            .filter(|phrase| lower.contains(*phrase))
            .count();
        let concerning = CONCERNING_PHRASES
            .iter()
            .filter(|phrase| lower.contains(*phrase))
            .count();

        let raw = severe as f64 * SEVERE_WEIGHT + concerning as f64 * CONCERNING_WEIGHT;
        raw.min(100.0)
    }
}

impl HeuristicEvaluator for KeywordHeuristicEvaluator {
    fn evaluate<'a>(&'a self, text: &'a str) -> HeuristicFuture<'a> {
        Box::pin(ready(Ok::<f64, HeuristicError>(Self::score(text))))
    }
}

#[cfg(test)]
mod tests {
    use super::{HeuristicError, KeywordHeuristicEvaluator, validate_score};

    #[test]
    fn keyword_score_is_deterministic_and_capped() {
        assert_eq!(KeywordHeuristicEvaluator::score("had a nice walk today"), 0.0);
        assert_eq!(KeywordHeuristicEvaluator::score("I feel hopeless"), 20.0);
        assert_eq!(
            KeywordHeuristicEvaluator::score("I feel HOPELESS and want to die"),
            65.0
        );
        assert_eq!(
            KeywordHeuristicEvaluator::score(
                "suicidal, want to die, better off dead, hopeless, worthless"
            ),
            100.0
        );
    }

    #[test]
    fn scores_outside_range_are_rejected() {
        assert_eq!(validate_score(42.5).expect("in range"), 42.5);
        assert!(matches!(
            validate_score(101.0),
            Err(HeuristicError::InvalidScore(_))
        ));
        assert!(matches!(
            validate_score(-1.0),
            Err(HeuristicError::InvalidScore(_))
        ));
        assert!(validate_score(f64::NAN).is_err());
    }
}
