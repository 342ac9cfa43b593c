//! Vision-language model integration.
//!
//! The evaluator only needs one thing from a model: a score for each
//! candidate answer token as the next generated token, given a prompt and an
//! ordered set of images. [`ChoiceModel`] is that seam; [`OpenAiVisionModel`]
//! talks to an OpenAI-compatible server and [`ScriptedModel`] replays fixed
//! scores for tests and dry runs.

mod client;
mod scripted;

pub use client::OpenAiVisionModel;
pub use scripted::ScriptedModel;

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

/// Per-candidate scores for the next token, in candidate order.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateScores {
    /// Probabilities (not necessarily summing to one over the candidates).
    Probabilities(Vec<f64>),
    /// Natural-log probabilities; `-inf` for candidates the model never offered.
    LogProbabilities(Vec<f64>),
    /// Raw logits.
    Logits(Vec<f64>),
}

impl CandidateScores {
    /// Number of candidate entries.
    pub fn len(&self) -> usize {
        self.values().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values().is_empty()
    }

    pub fn values(&self) -> &[f64] {
        match self {
            CandidateScores::Probabilities(v)
            | CandidateScores::LogProbabilities(v)
            | CandidateScores::Logits(v) => v,
        }
    }
}

/// A model that can score single-token answers over images.
#[async_trait]
pub trait ChoiceModel: Send + Sync {
    /// Label used in logs and score files.
    fn name(&self) -> &str;

    /// Score each of `candidates` as the next token after `prompt`.
    ///
    /// `images` are passed in agent order. Implementations return exactly one
    /// entry per candidate.
    async fn score_candidates(
        &self,
        prompt: &str,
        images: &[PathBuf],
        candidates: &[String],
    ) -> Result<CandidateScores>;
}
