//! Deterministic model that replays canned scores.

use super::{CandidateScores, ChoiceModel};
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;

/// A model that answers from a script instead of running inference.
///
/// Responses are consumed in order; once the script is exhausted the last
/// response repeats, so a one-entry script behaves like a fixed model.
pub struct ScriptedModel {
    name: String,
    responses: Vec<std::result::Result<CandidateScores, String>>,
    current: Mutex<usize>,
}

impl ScriptedModel {
    /// Replay `responses` in order. `Err` entries become inference failures.
    pub fn new(
        name: impl Into<String>,
        responses: Vec<std::result::Result<CandidateScores, String>>,
    ) -> Self {
        Self {
            name: name.into(),
            responses,
            current: Mutex::new(0),
        }
    }

    /// Always return the same scores.
    pub fn fixed(scores: CandidateScores) -> Self {
        Self::new("scripted", vec![Ok(scores)])
    }

    /// Equal probability for each of `n` candidates.
    pub fn uniform(n: usize) -> Self {
        Self::fixed(CandidateScores::Probabilities(vec![1.0 / n as f64; n]))
    }

    /// Always fail with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::new("scripted", vec![Err(message.into())])
    }

    fn next_response(&self) -> Result<std::result::Result<CandidateScores, String>> {
        let mut current = self
            .current
            .lock()
            .map_err(|_| EvalError::Inference("scripted model state poisoned".to_string()))?;
        let last = self
            .responses
            .len()
            .checked_sub(1)
            .ok_or_else(|| EvalError::Inference("no scripted responses".to_string()))?;
        let idx = (*current).min(last);
        *current += 1;
        Ok(self.responses[idx].clone())
    }
}

#[async_trait]
impl ChoiceModel for ScriptedModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score_candidates(
        &self,
        _prompt: &str,
        _images: &[PathBuf],
        candidates: &[String],
    ) -> Result<CandidateScores> {
        let scores = self
            .next_response()?
            .map_err(EvalError::Inference)?;

        if scores.len() != candidates.len() {
            return Err(EvalError::Inference(format!(
                "scripted response has {} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }

        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::candidate_tokens;

    #[test]
    fn test_script_replays_then_repeats_last() {
        let model = ScriptedModel::new(
            "seq",
            vec![
                Ok(CandidateScores::Logits(vec![1.0, 0.0])),
                Err("backend down".to_string()),
            ],
        );
        let candidates = candidate_tokens(2);

        let first = tokio_test::block_on(model.score_candidates("p", &[], &candidates)).unwrap();
        assert_eq!(first, CandidateScores::Logits(vec![1.0, 0.0]));

        for _ in 0..2 {
            let err = tokio_test::block_on(model.score_candidates("p", &[], &candidates))
                .unwrap_err();
            assert!(matches!(err, EvalError::Inference(ref m) if m == "backend down"));
        }
    }

    #[test]
    fn test_length_mismatch_is_an_error() {
        let model = ScriptedModel::uniform(3);
        let err = tokio_test::block_on(model.score_candidates("p", &[], &candidate_tokens(4)))
            .unwrap_err();
        assert!(matches!(err, EvalError::Inference(_)));
    }

    #[test]
    fn test_empty_script() {
        let model = ScriptedModel::new("empty", Vec::new());
        let err = tokio_test::block_on(model.score_candidates("p", &[], &candidate_tokens(4)))
            .unwrap_err();
        assert!(matches!(err, EvalError::Inference(_)));
    }

    #[test]
    fn test_poisoned_state_is_reported() {
        let model = std::sync::Arc::new(ScriptedModel::uniform(4));
        let poisoner = std::sync::Arc::clone(&model);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.current.lock().unwrap();
            panic!("poison the script counter");
        })
        .join();

        let err = tokio_test::block_on(model.score_candidates("p", &[], &candidate_tokens(4)))
            .unwrap_err();
        assert!(matches!(err, EvalError::Inference(ref m) if m.contains("poisoned")));
    }
}
