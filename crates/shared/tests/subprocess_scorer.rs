#![cfg(unix)]

use std::path::PathBuf;

use shared::config::RiskScorerConfig;
use shared::models::ModelVariant;
use shared::risk::PredictionLabel;
use shared::scoring::{RiskScorer, ScorerError, SubprocessScorer};
use uuid::Uuid;

const DEFAULT_SCRIPT: &str = r#"input=$(cat)
case "$input" in
  *hopeless*) echo "Prediction: suicide"; echo "Confidence: 91.50%" ;;
  *) echo "Prediction: non-suicide"; echo "Confidence: 80.00%" ;;
esac
"#;

const REGIONAL_SCRIPT: &str = r#"cat > /dev/null
echo "regional model"
echo "Prediction: non-suicide"
echo "Confidence: 60%"
"#;

struct ScriptDir {
    path: PathBuf,
}

impl ScriptDir {
    fn new() -> Self {
        let path = std::env::temp_dir().join(format!("risk-scorer-test-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path).expect("script dir should be created");
        Self { path }
    }

    fn write(&self, name: &str, body: &str) -> PathBuf {
        let script = self.path.join(name);
        std::fs::write(&script, body).expect("script should be written");
        script
    }
}

impl Drop for ScriptDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

fn scorer(dir: &ScriptDir, default_body: &str, regional_body: &str, timeout_seconds: u64) -> SubprocessScorer {
    SubprocessScorer::new(&RiskScorerConfig {
        program: "sh".to_string(),
        default_script: dir.write("default.sh", default_body),
        regional_script: dir.write("regional.sh", regional_body),
        working_dir: Some(dir.path.clone()),
        timeout_seconds,
    })
}

#[tokio::test]
async fn reads_verdict_from_script_stdout() {
    let dir = ScriptDir::new();
    let scorer = scorer(&dir, DEFAULT_SCRIPT, REGIONAL_SCRIPT, 10);

    let risky = scorer
        .score("I feel hopeless", ModelVariant::DefaultScript)
        .await
        .expect("scoring should succeed");
    assert_eq!(risky.label, PredictionLabel::Suicide);
    assert_eq!(risky.confidence_percent, 91.5);
    assert_eq!(risky.risk_score(), 91.5);

    let calm = scorer
        .score("nice walk", ModelVariant::DefaultScript)
        .await
        .expect("scoring should succeed");
    assert_eq!(calm.label, PredictionLabel::NonSuicide);
    assert_eq!(calm.risk_score(), 20.0);
}

#[tokio::test]
async fn variant_selects_the_script() {
    let dir = ScriptDir::new();
    let scorer = scorer(&dir, DEFAULT_SCRIPT, REGIONAL_SCRIPT, 10);

    let verdict = scorer
        .score("मैं ठीक हूँ", ModelVariant::RegionalScript)
        .await
        .expect("scoring should succeed");
    assert_eq!(verdict.label, PredictionLabel::NonSuicide);
    assert_eq!(verdict.confidence_percent, 60.0);
}

#[tokio::test]
async fn failing_script_reports_exit_status_and_stderr() {
    let dir = ScriptDir::new();
    let scorer = scorer(&dir, "cat > /dev/null\necho boom >&2\nexit 3\n", REGIONAL_SCRIPT, 10);

    let err = scorer
        .score("hello", ModelVariant::DefaultScript)
        .await
        .expect_err("non-zero exit should fail");
    match err {
        ScorerError::ExitStatus { stderr, .. } => assert_eq!(stderr, "boom"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_output_is_malformed() {
    let dir = ScriptDir::new();
    let scorer = scorer(&dir, "cat > /dev/null\necho 'model warming up'\n", REGIONAL_SCRIPT, 10);

    let err = scorer
        .score("hello", ModelVariant::DefaultScript)
        .await
        .expect_err("missing verdict should fail");
    assert!(matches!(err, ScorerError::MalformedOutput(_)));
}

#[tokio::test]
async fn hung_script_times_out() {
    let dir = ScriptDir::new();
    let scorer = scorer(&dir, "cat > /dev/null\nsleep 5\n", REGIONAL_SCRIPT, 1);

    let err = scorer
        .score("hello", ModelVariant::DefaultScript)
        .await
        .expect_err("hung script should time out");
    assert!(matches!(err, ScorerError::Timeout(1)));
}

#[tokio::test]
async fn missing_program_is_a_spawn_error() {
    let scorer = SubprocessScorer::new(&RiskScorerConfig {
        program: format!("no-such-program-{}", Uuid::new_v4()),
        default_script: PathBuf::from("default.sh"),
        regional_script: PathBuf::from("regional.sh"),
        working_dir: None,
        timeout_seconds: 5,
    });

    let err = scorer
        .score("hello", ModelVariant::DefaultScript)
        .await
        .expect_err("missing program should fail");
    assert!(matches!(err, ScorerError::Spawn(_)));
}
