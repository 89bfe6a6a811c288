use serde::{Deserialize, Serialize};

use crate::models::{ModelVariant, RiskLevel};

const DEVANAGARI_FIRST: char = '\u{0900}';
const DEVANAGARI_LAST: char = '\u{097F}';

/// Score spaces that map a 0-100 score onto a [`RiskLevel`].
///
/// The per-turn heuristic and the batch classifier produce scores with
/// different calibration, so each keeps its own cut-offs. A record's level
/// always comes from the table of whichever path wrote its score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskTable {
    /// `>=80` high, `>=65` moderate, `>=50` low, otherwise normal.
    Heuristic,
    /// `>=70` high, `>=40` moderate, otherwise low.
    Authoritative,
}

impl RiskTable {
    pub fn level_for(self, score: f64) -> RiskLevel {
        match self {
            Self::Heuristic => {
                if score >= 80.0 {
                    RiskLevel::High
                } else if score >= 65.0 {
                    RiskLevel::Moderate
                } else if score >= 50.0 {
                    RiskLevel::Low
                } else {
                    RiskLevel::Normal
                }
            }
            Self::Authoritative => {
                if score >= 70.0 {
                    RiskLevel::High
                } else if score >= 40.0 {
                    RiskLevel::Moderate
                } else {
                    RiskLevel::Low
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub level: RiskLevel,
}

impl RiskAssessment {
    pub fn from_score(score: f64, table: RiskTable) -> Self {
        Self {
            score,
            level: table.level_for(score),
        }
    }

    pub fn initial() -> Self {
        Self::from_score(0.0, RiskTable::Heuristic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PredictionLabel {
    Suicide,
    NonSuicide,
}

impl PredictionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Suicide => "suicide",
            Self::NonSuicide => "non-suicide",
        }
    }
}

/// Raw classifier output: a label and how confident the model is in it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScorerVerdict {
    pub label: PredictionLabel,
    pub confidence_percent: f64,
}

impl ScorerVerdict {
    /// Confidence in the safe direction is inverted into risk space, so a
    /// weak `non-suicide` call lands near 50.
    pub fn risk_score(&self) -> f64 {
        match self.label {
            PredictionLabel::Suicide => self.confidence_percent,
            PredictionLabel::NonSuicide => 100.0 - self.confidence_percent,
        }
    }

    pub fn assessment(&self) -> RiskAssessment {
        RiskAssessment::from_score(self.risk_score(), RiskTable::Authoritative)
    }
}

/// Picks the classifier for a text. Any Devanagari code point routes the whole
/// text to the regional model; this is a script check, not language detection.
pub fn select_model_variant(text: &str) -> ModelVariant {
    if text
        .chars()
        .any(|ch| (DEVANAGARI_FIRST..=DEVANAGARI_LAST).contains(&ch))
    {
        ModelVariant::RegionalScript
    } else {
        ModelVariant::DefaultScript
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heuristic_table_boundaries() {
        let table = RiskTable::Heuristic;
        assert_eq!(table.level_for(85.0), RiskLevel::High);
        assert_eq!(table.level_for(80.0), RiskLevel::High);
        assert_eq!(table.level_for(79.99), RiskLevel::Moderate);
        assert_eq!(table.level_for(65.0), RiskLevel::Moderate);
        assert_eq!(table.level_for(64.9), RiskLevel::Low);
        assert_eq!(table.level_for(50.0), RiskLevel::Low);
        assert_eq!(table.level_for(49.9), RiskLevel::Normal);
        assert_eq!(table.level_for(0.0), RiskLevel::Normal);
    }

    #[test]
    fn authoritative_table_has_no_normal_tier() {
        let table = RiskTable::Authoritative;
        assert_eq!(table.level_for(100.0), RiskLevel::High);
        assert_eq!(table.level_for(70.0), RiskLevel::High);
        assert_eq!(table.level_for(69.9), RiskLevel::Moderate);
        assert_eq!(table.level_for(40.0), RiskLevel::Moderate);
        assert_eq!(table.level_for(39.9), RiskLevel::Low);
        assert_eq!(table.level_for(0.0), RiskLevel::Low);
    }

    #[test]
    fn level_is_a_pure_function_of_score() {
        for table in [RiskTable::Heuristic, RiskTable::Authoritative] {
            let mut previous = table.level_for(0.0);
            for step in 0..=1000 {
                let score = f64::from(step) / 10.0;
                let level = table.level_for(score);
                assert_eq!(level, table.level_for(score));
                assert!(level >= previous, "level must not drop as score rises");
                previous = level;
            }
        }
    }

    #[test]
    fn non_suicide_confidence_is_inverted() {
        let verdict = ScorerVerdict {
            label: PredictionLabel::NonSuicide,
            confidence_percent: 90.0,
        };
        let assessment = verdict.assessment();
        assert_eq!(assessment.score, 10.0);
        assert_eq!(assessment.level, RiskLevel::Low);
    }

    #[test]
    fn suicide_confidence_is_used_directly() {
        let verdict = ScorerVerdict {
            label: PredictionLabel::Suicide,
            confidence_percent: 72.5,
        };
        assert_eq!(verdict.risk_score(), 72.5);
        assert_eq!(verdict.assessment().level, RiskLevel::High);
    }

    #[test]
    fn single_devanagari_char_selects_regional_variant() {
        assert_eq!(
            select_model_variant("I have been feeling low lately \u{0915} and tired"),
            ModelVariant::RegionalScript
        );
        assert_eq!(
            select_model_variant("मला खूप एकटं वाटतं"),
            ModelVariant::RegionalScript
        );
    }

    #[test]
    fn latin_text_selects_default_variant() {
        assert_eq!(
            select_model_variant("nothing but ascii here"),
            ModelVariant::DefaultScript
        );
        assert_eq!(select_model_variant(""), ModelVariant::DefaultScript);
        // Bengali sits right after the Devanagari block.
        assert_eq!(
            select_model_variant("\u{0980}\u{0995}"),
            ModelVariant::DefaultScript
        );
    }
}
