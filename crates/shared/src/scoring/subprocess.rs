use std::path::PathBuf;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::{RiskScorer, ScorerError, ScorerFuture};
use crate::config::RiskScorerConfig;
use crate::models::ModelVariant;
use crate::risk::{PredictionLabel, ScorerVerdict};

const INPUT_TERMINATOR: &str = "END";
const MAX_STDERR_CHARS: usize = 512;

static PREDICTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Prediction:\s*(non-suicide|suicide)").expect("prediction pattern is valid")
});
static CONFIDENCE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Confidence:\s*(\d+(?:\.\d+)?)\s*%").expect("confidence pattern is valid")
});

/// Runs one classification script per call. The conversation text goes to
/// stdin followed by an `END` line; the verdict is read from stdout.
#[derive(Debug, Clone)]
pub struct SubprocessScorer {
    program: String,
    default_script: PathBuf,
    regional_script: PathBuf,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl SubprocessScorer {
    pub fn new(config: &RiskScorerConfig) -> Self {
        Self {
            program: config.program.clone(),
            default_script: config.default_script.clone(),
            regional_script: config.regional_script.clone(),
            working_dir: config.working_dir.clone(),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    fn script_for(&self, variant: ModelVariant) -> &PathBuf {
        match variant {
            ModelVariant::DefaultScript => &self.default_script,
            ModelVariant::RegionalScript => &self.regional_script,
        }
    }

    async fn run(&self, text: &str, variant: ModelVariant) -> Result<ScorerVerdict, ScorerError> {
        let script = self.script_for(variant);
        let mut command = Command::new(&self.program);
        command
            .arg(script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(working_dir) = self.working_dir.as_ref() {
            command.current_dir(working_dir);
        }

        debug!(
            model_variant = variant.as_str(),
            script = %script.display(),
            text_chars = text.chars().count(),
            "starting scorer process"
        );

        let mut child = command
            .spawn()
            .map_err(|err| ScorerError::Spawn(err.to_string()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ScorerError::Io("stdin was not captured".to_string()))?;
        let payload = format!("{text}\n{INPUT_TERMINATOR}\n\n");

        let exchange = async move {
            stdin
                .write_all(payload.as_bytes())
                .await
                .map_err(|err| ScorerError::Io(err.to_string()))?;
            drop(stdin);
            child
                .wait_with_output()
                .await
                .map_err(|err| ScorerError::Io(err.to_string()))
        };

        let output = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| ScorerError::Timeout(self.timeout.as_secs()))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ScorerError::ExitStatus {
                status: output.status.to_string(),
                stderr: truncate_chars(stderr.trim(), MAX_STDERR_CHARS),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_scorer_output(&stdout)
    }
}

impl RiskScorer for SubprocessScorer {
    fn score<'a>(&'a self, text: &'a str, variant: ModelVariant) -> ScorerFuture<'a> {
        Box::pin(self.run(text, variant))
    }
}

/// Extracts `Prediction: <label>` and `Confidence: <n>%` from script output.
pub fn parse_scorer_output(output: &str) -> Result<ScorerVerdict, ScorerError> {
    let label = PREDICTION_PATTERN
        .captures(output)
        .and_then(|captures| captures.get(1))
        .map(|matched| {
            if matched.as_str().eq_ignore_ascii_case("suicide") {
                PredictionLabel::Suicide
            } else {
                PredictionLabel::NonSuicide
            }
        })
        .ok_or_else(|| ScorerError::MalformedOutput("missing prediction label".to_string()))?;

    let confidence_percent = CONFIDENCE_PATTERN
        .captures(output)
        .and_then(|captures| captures.get(1))
        .ok_or_else(|| ScorerError::MalformedOutput("missing confidence".to_string()))?
        .as_str()
        .parse::<f64>()
        .map_err(|err| ScorerError::MalformedOutput(format!("confidence is not a number: {err}")))?;

    if !(0.0..=100.0).contains(&confidence_percent) {
        return Err(ScorerError::MalformedOutput(format!(
            "confidence {confidence_percent} is outside 0-100"
        )));
    }

    Ok(ScorerVerdict {
        label,
        confidence_percent,
    })
}

fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_scorer_output, truncate_chars};
    use crate::risk::PredictionLabel;
    use crate::scoring::ScorerError;

    const SCRIPT_OUTPUT: &str = "Model loaded successfully from .keras format!\n\
Suicide Risk Detection Model\n\
Enter text to analyze:\n\
\n\
Prediction: non-suicide\n\
Confidence: 87.25%\n\
Raw probability: 0.1275\n";

    #[test]
    fn parses_label_and_confidence_from_script_output() {
        let verdict = parse_scorer_output(SCRIPT_OUTPUT).expect("output should parse");
        assert_eq!(verdict.label, PredictionLabel::NonSuicide);
        assert_eq!(verdict.confidence_percent, 87.25);
    }

    #[test]
    fn banner_mention_does_not_count_as_a_label() {
        let verdict =
            parse_scorer_output("Suicide Risk Detection Model\nPrediction: SUICIDE\nConfidence: 91%")
                .expect("output should parse");
        assert_eq!(verdict.label, PredictionLabel::Suicide);
        assert_eq!(verdict.confidence_percent, 91.0);
    }

    #[test]
    fn missing_fields_are_malformed() {
        assert!(matches!(
            parse_scorer_output("Confidence: 50.00%"),
            Err(ScorerError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_scorer_output("Prediction: suicide"),
            Err(ScorerError::MalformedOutput(_))
        ));
        assert!(matches!(
            parse_scorer_output("Prediction: suicide\nConfidence: 150.00%"),
            Err(ScorerError::MalformedOutput(_))
        ));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("नमस्ते", 2), "नम...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
