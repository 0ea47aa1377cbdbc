//! Judge validation.
//!
//! A judge reads a transcript and predicts whether the consultation
//! succeeded. Before its verdicts are trusted they are compared against
//! labelled transcripts: Cohen's kappa, error rates by class, and how well
//! the judge's stated confidence matches its accuracy.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

use crate::agent::{AgentError, AgentResult, Generator};
use crate::safety::strip_reasoning;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// Predicted success
    pub predicted: bool,
    /// Confidence in `predicted`, 0.0 - 1.0
    pub confidence: f64,
}

#[async_trait]
pub trait Judge: Send + Sync {
    fn name(&self) -> &str;
    async fn judge(&self, transcript: &str) -> AgentResult<JudgeVerdict>;
}

/// A transcript with a ground-truth success label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelledTranscript {
    pub id: String,
    pub transcript: String,
    pub label: bool,
}

impl LabelledTranscript {
    /// Load a YAML list of labelled transcripts.
    pub async fn load_yaml(path: impl AsRef<Path>) -> AgentResult<Vec<LabelledTranscript>> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AgentError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        serde_yaml::from_str(&raw).map_err(|e| AgentError::Config(format!("invalid labelled set {}: {}", path.display(), e)))
    }
}

/// Judge backed by an LLM
pub struct LlmJudge {
    name: String,
    generator: Generator,
}

impl LlmJudge {
    pub fn new(name: impl Into<String>, generator: Generator) -> Self {
        Self { name: name.into(), generator }
    }
}

/// Parse `VERDICT:` and `CONFIDENCE:` lines.
pub fn parse_verdict(response: &str) -> Option<JudgeVerdict> {
    let mut predicted = None;
    let mut confidence = None;

    for line in response.lines() {
        let line = line.trim();
        let upper = line.to_uppercase();
        if let Some(rest) = upper.strip_prefix("VERDICT:") {
            let rest = rest.trim().trim_matches(|c| c == '[' || c == ']');
            if rest.starts_with("SUCCESS") || rest.starts_with("YES") {
                predicted = Some(true);
            } else if rest.starts_with("FAIL") || rest.starts_with("NO") {
                predicted = Some(false);
            }
        } else if let Some(rest) = upper.strip_prefix("CONFIDENCE:") {
            confidence = rest
                .split(|c: char| !(c.is_ascii_digit() || c == '.'))
                .find(|t| !t.is_empty())
                .and_then(|t| t.parse::<f64>().ok())
                .map(|c| if c > 1.0 { c / 100.0 } else { c });
        }
    }

    Some(JudgeVerdict {
        predicted: predicted?,
        confidence: confidence?.clamp(0.0, 1.0),
    })
}

#[async_trait]
impl Judge for LlmJudge {
    fn name(&self) -> &str {
        &self.name
    }

    async fn judge(&self, transcript: &str) -> AgentResult<JudgeVerdict> {
        let prompt = format!(
            r#"You are reviewing a financial advice consultation.
Decide whether it was successful: the customer's need was met, they accepted
the advice, and the advisor stayed compliant.

TRANSCRIPT:
{}

Format your response as:
VERDICT: [success/failure]
CONFIDENCE: [0.0-1.0]
"#,
            transcript
        );

        let raw = self.generator.generate("judge", prompt, None).await?;
        let response = strip_reasoning(&raw);
        parse_verdict(&response).ok_or_else(|| AgentError::malformed("judge", response))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBucket {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_confidence: f64,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JudgeReliability {
    pub samples: usize,
    /// Transcripts the judge failed to score
    pub skipped: usize,
    pub accuracy: f64,
    pub kappa: f64,
    /// Missed successes: FN / (TP + FN)
    pub false_negative_rate: f64,
    /// Invented successes: FP / (FP + TN)
    pub false_positive_rate: f64,
    pub calibration: Vec<CalibrationBucket>,
    pub expected_calibration_error: f64,
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

/// Agreement statistics of `verdicts` against `labels`, paired by position.
pub fn judge_agreement(verdicts: &[JudgeVerdict], labels: &[bool], bins: usize) -> JudgeReliability {
    let bins = bins.max(1);
    let (mut tp, mut tn, mut fp, mut fn_) = (0usize, 0usize, 0usize, 0usize);
    let mut buckets: Vec<(usize, f64, usize)> = vec![(0, 0.0, 0); bins];

    for (v, &label) in verdicts.iter().zip(labels) {
        match (v.predicted, label) {
            (true, true) => tp += 1,
            (false, false) => tn += 1,
            (true, false) => fp += 1,
            (false, true) => fn_ += 1,
        }
        let confidence = v.confidence.clamp(0.0, 1.0);
        let idx = ((confidence * bins as f64) as usize).min(bins - 1);
        let bucket = &mut buckets[idx];
        bucket.0 += 1;
        bucket.1 += confidence;
        if v.predicted == label {
            bucket.2 += 1;
        }
    }

    let n = tp + tn + fp + fn_;
    let mut report = JudgeReliability {
        samples: n,
        accuracy: ratio(tp + tn, n),
        false_negative_rate: ratio(fn_, tp + fn_),
        false_positive_rate: ratio(fp, fp + tn),
        ..Default::default()
    };
    if n == 0 {
        return report;
    }

    let total = n as f64;
    let observed = report.accuracy;
    let expected = ((tp + fp) as f64 * (tp + fn_) as f64 + (fn_ + tn) as f64 * (fp + tn) as f64) / (total * total);
    report.kappa = if (1.0 - expected).abs() < f64::EPSILON {
        if (observed - 1.0).abs() < f64::EPSILON { 1.0 } else { 0.0 }
    } else {
        (observed - expected) / (1.0 - expected)
    };

    let width = 1.0 / bins as f64;
    for (i, (count, conf_sum, correct)) in buckets.into_iter().enumerate() {
        if count == 0 {
            continue;
        }
        let mean_confidence = conf_sum / count as f64;
        let accuracy = ratio(correct, count);
        report.expected_calibration_error += (count as f64 / total) * (accuracy - mean_confidence).abs();
        report.calibration.push(CalibrationBucket {
            lower: i as f64 * width,
            upper: (i + 1) as f64 * width,
            count,
            mean_confidence,
            accuracy,
        });
    }

    report
}

/// Score every labelled transcript with `judge` and measure agreement.
pub async fn validate_llm_judges(judge: &dyn Judge, labelled: &[LabelledTranscript], bins: usize) -> JudgeReliability {
    let mut verdicts = Vec::with_capacity(labelled.len());
    let mut labels = Vec::with_capacity(labelled.len());
    let mut skipped = 0;

    for item in labelled {
        match judge.judge(&item.transcript).await {
            Ok(v) => {
                verdicts.push(v);
                labels.push(item.label);
            }
            Err(e) => {
                warn!("Judge {} skipped {}: {}", judge.name(), item.id, e);
                skipped += 1;
            }
        }
    }

    let mut report = judge_agreement(&verdicts, &labels, bins);
    report.skipped = skipped;
    info!(
        "Judge {}: kappa {:.3}, accuracy {:.3} over {} samples ({} skipped)",
        judge.name(),
        report.kappa,
        report.accuracy,
        report.samples,
        skipped
    );
    report
}
