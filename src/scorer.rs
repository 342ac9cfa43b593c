//! Multiple-choice scoring.
//!
//! The model's scores for the digit tokens are renormalised into a
//! distribution over exactly the valid answers (a conditional softmax), and
//! the most likely digit is the predicted choice.

use crate::dataset::{AnnotationRecord, LoadedRecord, RejectedRecord};
use crate::error::{ErrorKind, EvalError, Result};
use crate::model::{CandidateScores, ChoiceModel};
use crate::prompt::{build_prompt, candidate_tokens};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Outcome of scoring one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScoreStatus {
    Scored,
    Errored { kind: ErrorKind, message: String },
}

/// Result for one annotation record. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    /// Skill the record was evaluated under.
    pub skill: String,
    /// Task (source file) the record came from.
    pub task: String,
    /// 1-based line in the source file.
    pub line: usize,
    /// Image filenames in agent order.
    pub images: Vec<String>,
    pub question: String,
    /// Model label that produced the result.
    pub method: String,
    /// Zero-based index of the correct choice, when the record was readable.
    pub ground_truth: Option<usize>,
    /// Conditional probability per choice; empty when errored.
    pub probabilities: Vec<f64>,
    /// Argmax of `probabilities`.
    pub predicted_index: Option<usize>,
    pub is_correct: bool,
    pub status: ScoreStatus,
}

impl ScoreResult {
    /// Whether this result counts towards accuracy.
    pub fn is_scored(&self) -> bool {
        matches!(self.status, ScoreStatus::Scored)
    }

    /// Result for a line that never became a record.
    pub fn rejected(rejected: &RejectedRecord, skill: &str, task: &str, method: &str) -> Self {
        Self {
            skill: skill.to_string(),
            task: task.to_string(),
            line: rejected.line,
            images: Vec::new(),
            question: String::new(),
            method: method.to_string(),
            ground_truth: None,
            probabilities: Vec::new(),
            predicted_index: None,
            is_correct: false,
            status: ScoreStatus::Errored {
                kind: ErrorKind::MalformedRecord,
                message: rejected.reason.clone(),
            },
        }
    }

    fn errored(loaded: &LoadedRecord, skill: &str, task: &str, method: &str, err: &EvalError) -> Self {
        let mut result = Self::pending(loaded, skill, task, method);
        result.status = ScoreStatus::Errored {
            kind: err.kind(),
            message: err.to_string(),
        };
        result
    }

    fn pending(loaded: &LoadedRecord, skill: &str, task: &str, method: &str) -> Self {
        let record = &loaded.record;
        Self {
            skill: skill.to_string(),
            task: task.to_string(),
            line: loaded.line,
            images: record.images().to_vec(),
            question: record.question().to_string(),
            method: method.to_string(),
            ground_truth: Some(record.ground_truth()),
            probabilities: Vec::new(),
            predicted_index: None,
            is_correct: false,
            status: ScoreStatus::Scored,
        }
    }
}

/// Renormalise candidate scores into probabilities summing to one.
///
/// Probabilities are divided by their total; log-probabilities and logits go
/// through a max-shifted softmax, which gives the same distribution.
pub fn normalize(scores: &CandidateScores) -> Result<Vec<f64>> {
    let values = scores.values();
    if values.is_empty() {
        return Err(EvalError::Inference("model returned no scores".to_string()));
    }
    if values.iter().any(|v| v.is_nan()) {
        return Err(EvalError::Inference("model returned NaN scores".to_string()));
    }

    match scores {
        CandidateScores::Probabilities(probs) => {
            if probs.iter().any(|p| *p < 0.0 || p.is_infinite()) {
                return Err(EvalError::Inference(format!(
                    "invalid probabilities {:?}",
                    probs
                )));
            }
            let total: f64 = probs.iter().sum();
            if total <= 0.0 {
                return Err(EvalError::Inference(
                    "candidate probabilities sum to zero".to_string(),
                ));
            }
            Ok(probs.iter().map(|p| p / total).collect())
        }
        CandidateScores::LogProbabilities(logits) | CandidateScores::Logits(logits) => {
            softmax(logits)
        }
    }
}

/// Numerically stable softmax. `-inf` entries get probability zero.
pub fn softmax(logits: &[f64]) -> Result<Vec<f64>> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return Err(EvalError::Inference(
            "every candidate has zero probability".to_string(),
        ));
    }
    if max == f64::INFINITY {
        return Err(EvalError::Inference("infinite logit".to_string()));
    }

    let exps: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    Ok(exps.into_iter().map(|e| e / total).collect())
}

/// Index of the largest value; exact ties go to the lowest index.
pub fn argmax_lowest(values: &[f64]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Scores records one at a time against a shared model handle.
pub struct ChoiceScorer<'a> {
    model: &'a dyn ChoiceModel,
    image_dir: PathBuf,
}

impl<'a> ChoiceScorer<'a> {
    pub fn new(model: &'a dyn ChoiceModel, image_dir: impl Into<PathBuf>) -> Self {
        Self {
            model,
            image_dir: image_dir.into(),
        }
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn method(&self) -> &str {
        self.model.name()
    }

    /// Ask the model about one record and pick the answer.
    ///
    /// Never fails: missing images and model errors come back as
    /// [`ScoreStatus::Errored`] so a sweep can carry on.
    pub async fn score(&self, loaded: &LoadedRecord, skill: &str, task: &str) -> ScoreResult {
        let method = self.model.name();
        match self.try_score(&loaded.record).await {
            Ok(probabilities) => {
                let mut result = ScoreResult::pending(loaded, skill, task, method);
                result.predicted_index = argmax_lowest(&probabilities);
                result.is_correct = result.predicted_index == Some(loaded.record.ground_truth());
                result.probabilities = probabilities;
                debug!(
                    skill,
                    task,
                    line = loaded.line,
                    predicted = ?result.predicted_index,
                    correct = result.is_correct,
                    "scored record"
                );
                result
            }
            Err(e) => {
                warn!(skill, task, line = loaded.line, error = %e, "record errored");
                ScoreResult::errored(loaded, skill, task, method, &e)
            }
        }
    }

    async fn try_score(&self, record: &AnnotationRecord) -> Result<Vec<f64>> {
        let images = record.resolve_images(&self.image_dir)?;
        let prompt = build_prompt(record);
        let candidates = candidate_tokens(record.choices().len());

        let scores = self
            .model
            .score_candidates(&prompt, &images, &candidates)
            .await?;

        if scores.len() != candidates.len() {
            return Err(EvalError::Inference(format!(
                "model returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }

        normalize(&scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Protocol;
    use crate::model::ScriptedModel;
    use tempfile::TempDir;

    fn loaded(ground_truth: usize) -> LoadedRecord {
        LoadedRecord {
            line: 1,
            record: AnnotationRecord::new(
                "relative_agents",
                vec!["196.png".into(), "197.png".into()],
                vec!["a".into(), "b".into(), "c".into(), "d".into()],
                ground_truth,
                "Which agent sees the cone?",
                &Protocol::default(),
            )
            .unwrap(),
        }
    }

    fn image_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("196.png"), b"").unwrap();
        std::fs::write(dir.path().join("197.png"), b"").unwrap();
        dir
    }

    fn assert_sums_to_one(probs: &[f64]) {
        let total: f64 = probs.iter().sum();
        assert!((total - 1.0).abs() < 1e-9, "sum was {total}");
    }

    #[test]
    fn test_normalize_probabilities() {
        let probs = normalize(&CandidateScores::Probabilities(vec![0.2, 0.2, 0.0, 0.1])).unwrap();
        assert_eq!(probs.len(), 4);
        assert_sums_to_one(&probs);
        assert!((probs[0] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_logits_is_softmax() {
        let probs = normalize(&CandidateScores::Logits(vec![1.0, 2.0, 3.0, 4.0])).unwrap();
        assert_sums_to_one(&probs);
        let denom: f64 = [1.0f64, 2.0, 3.0, 4.0].iter().map(|x| x.exp()).sum();
        assert!((probs[3] - 4.0f64.exp() / denom).abs() < 1e-12);
    }

    #[test]
    fn test_logprobs_and_probabilities_agree() {
        let p = vec![0.5, 0.1, 0.05, 0.05];
        let from_p = normalize(&CandidateScores::Probabilities(p.clone())).unwrap();
        let from_lp =
            normalize(&CandidateScores::LogProbabilities(p.iter().map(|x| x.ln()).collect()))
                .unwrap();
        for (a, b) in from_p.iter().zip(&from_lp) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_normalize_rejects_degenerate_scores() {
        assert!(normalize(&CandidateScores::Probabilities(vec![0.0; 4])).is_err());
        assert!(normalize(&CandidateScores::Probabilities(vec![-0.1, 0.5, 0.3, 0.3])).is_err());
        assert!(normalize(&CandidateScores::Logits(vec![f64::NAN, 0.0, 0.0, 0.0])).is_err());
        assert!(
            normalize(&CandidateScores::LogProbabilities(vec![f64::NEG_INFINITY; 4])).is_err()
        );
        assert!(normalize(&CandidateScores::Logits(Vec::new())).is_err());
    }

    #[test]
    fn test_softmax_handles_neg_infinity() {
        let probs = softmax(&[f64::NEG_INFINITY, -0.1, f64::NEG_INFINITY, -2.0]).unwrap();
        assert_eq!(probs[0], 0.0);
        assert_eq!(probs[2], 0.0);
        assert_sums_to_one(&probs);
    }

    #[test]
    fn test_argmax_lowest() {
        assert_eq!(argmax_lowest(&[0.1, 0.7, 0.1, 0.1]), Some(1));
        assert_eq!(argmax_lowest(&[0.25, 0.25, 0.25, 0.25]), Some(0));
        assert_eq!(argmax_lowest(&[0.1, 0.4, 0.1, 0.4]), Some(1));
        assert_eq!(argmax_lowest(&[]), None);
    }

    #[tokio::test]
    async fn test_confident_correct_answer() {
        let dir = image_dir();
        let model = ScriptedModel::fixed(CandidateScores::Probabilities(vec![0.0, 0.0, 0.0, 1.0]));
        let scorer = ChoiceScorer::new(&model, dir.path());

        let result = scorer.score(&loaded(3), "relative agents", "relative agents").await;
        assert!(result.is_scored());
        assert_eq!(result.predicted_index, Some(3));
        assert!(result.is_correct);
        assert_eq!(result.probabilities, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_uniform_ties_pick_first_choice() {
        let dir = image_dir();
        let model = ScriptedModel::uniform(4);
        let scorer = ChoiceScorer::new(&model, dir.path());

        let result = scorer.score(&loaded(3), "s", "t").await;
        assert_eq!(result.predicted_index, Some(0));
        assert!(!result.is_correct);
        assert_sums_to_one(&result.probabilities);
    }

    #[tokio::test]
    async fn test_missing_image_is_recorded() {
        let dir = TempDir::new().unwrap();
        let model = ScriptedModel::uniform(4);
        let scorer = ChoiceScorer::new(&model, dir.path());

        let result = scorer.score(&loaded(0), "s", "t").await;
        assert!(!result.is_scored());
        assert!(!result.is_correct);
        assert!(matches!(
            result.status,
            ScoreStatus::Errored { kind: ErrorKind::MissingImage, .. }
        ));
        assert!(result.probabilities.is_empty());
        assert_eq!(result.ground_truth, Some(0));
    }

    #[tokio::test]
    async fn test_inference_failure_is_recorded() {
        let dir = image_dir();
        let model = ScriptedModel::failing("CUDA out of memory");
        let scorer = ChoiceScorer::new(&model, dir.path());

        let result = scorer.score(&loaded(0), "s", "t").await;
        match result.status {
            ScoreStatus::Errored { kind, message } => {
                assert_eq!(kind, ErrorKind::Inference);
                assert!(message.contains("CUDA out of memory"));
            }
            ScoreStatus::Scored => panic!("expected an error"),
        }
    }
}
