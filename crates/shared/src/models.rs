use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::evaluation::EvaluationRunReport;

/// Separator used when a conversation's turns are flattened into one text.
pub const TURN_SEPARATOR: &str = " ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Normal,
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Some(Self::Normal),
            "low" => Some(Self::Low),
            "moderate" => Some(Self::Moderate),
            "high" => Some(Self::High),
            _ => None,
        }
    }
}

/// Which classification script scored a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelVariant {
    DefaultScript,
    RegionalScript,
}

impl ModelVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DefaultScript => "default_script",
            Self::RegionalScript => "regional_script",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default_script" => Some(Self::DefaultScript),
            "regional_script" => Some(Self::RegionalScript),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
}

/// Durable record of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatLog {
    pub session_id: String,
    pub turns: Vec<String>,
    pub source_address: Option<String>,
    pub location: Option<Location>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl ChatLog {
    pub fn full_text(&self) -> String {
        self.turns.join(TURN_SEPARATOR)
    }
}

/// Immutable audit entry written for every authoritative scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    pub id: Uuid,
    pub session_id: String,
    pub source_address: Option<String>,
    pub last_processed_at: DateTime<Utc>,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub model_variant: ModelVariant,
    pub processed_at: DateTime<Utc>,
}

/// Loopback addresses reported by local proxies carry no information about
/// the caller and are never stored.
pub fn is_placeholder_address(value: &str) -> bool {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("localhost") {
        return true;
    }

    let candidate = trimmed.strip_prefix("::ffff:").unwrap_or(trimmed);
    match candidate.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionRequest {
    #[serde(default)]
    pub source_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendTurnRequest {
    pub text: String,
    #[serde(default)]
    pub location: Option<Location>,
    #[serde(default)]
    pub source_address: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendTurnResponse {
    pub chat_log: ChatLog,
    /// `None` when the context was deleted or expired after the turn was saved.
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionContextResponse {
    pub session_id: String,
    pub context: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatLogSearchRequest {
    #[serde(default)]
    pub risk_level: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListChatLogsResponse {
    pub count: usize,
    pub items: Vec<ChatLog>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPredictionsResponse {
    pub count: usize,
    pub items: Vec<PredictionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRunResponse {
    pub report: EvaluationRunReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ok: bool,
    pub active_contexts: usize,
    /// Whether this process is currently running an evaluation pass.
    pub evaluation_running: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::{RiskLevel, is_placeholder_address};

    #[test]
    fn loopback_and_empty_addresses_are_placeholders() {
        for value in ["", "  ", "localhost", "127.0.0.1", "::1", "::ffff:127.0.0.1", "0.0.0.0"] {
            assert!(is_placeholder_address(value), "{value:?} should be a placeholder");
        }
    }

    #[test]
    fn routable_addresses_are_not_placeholders() {
        for value in ["203.0.113.7", "2001:db8::1", "::ffff:198.51.100.4", "client.example"] {
            assert!(!is_placeholder_address(value), "{value:?} should be kept");
        }
    }

    #[test]
    fn risk_levels_order_by_severity() {
        assert!(RiskLevel::Normal < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Moderate);
        assert!(RiskLevel::Moderate < RiskLevel::High);
        assert_eq!(RiskLevel::parse(" High "), Some(RiskLevel::High));
        assert_eq!(RiskLevel::parse("critical"), None);
    }
}
