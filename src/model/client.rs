//! OpenAI-compatible vision client.
//!
//! Works with any server that implements `/v1/chat/completions` with image
//! inputs and `logprobs` (vLLM, SGLang, hosted APIs). Images are sent inline
//! as base64 data URLs, followed by the prompt text. Only one token is
//! generated; the candidates are looked up in that token's `top_logprobs`.

use super::{CandidateScores, ChoiceModel};
use crate::config::ModelConfig;
use crate::error::{EvalError, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Request body for chat completion.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Value>,
    max_tokens: u32,
    temperature: f32,
    logprobs: bool,
    top_logprobs: u8,
}

/// Response from chat completion.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    #[serde(default)]
    logprobs: Option<ChoiceLogprobs>,
}

#[derive(Debug, Deserialize)]
struct ChoiceLogprobs {
    #[serde(default)]
    content: Option<Vec<TokenLogprob>>,
}

#[derive(Debug, Deserialize)]
struct TokenLogprob {
    token: String,
    logprob: f64,
    #[serde(default)]
    top_logprobs: Vec<TopLogprob>,
}

#[derive(Debug, Deserialize)]
struct TopLogprob {
    token: String,
    logprob: f64,
}

/// OpenAI API error response.
#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// Client for an OpenAI-compatible multimodal endpoint.
#[derive(Clone)]
pub struct OpenAiVisionModel {
    client: Client,
    config: ModelConfig,
    name: String,
}

impl OpenAiVisionModel {
    /// Create a new client with the given configuration.
    pub fn new(config: ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        let name = config.method_name();
        Ok(Self {
            client,
            config,
            name,
        })
    }

    /// Get the API endpoint URL.
    fn endpoint(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{}/v1/chat/completions", base)
    }

    /// Build the single user message: images first, then the prompt.
    fn build_messages(prompt: &str, images: &[PathBuf]) -> Result<Vec<Value>> {
        let mut content = Vec::with_capacity(images.len() + 1);
        for path in images {
            let bytes = std::fs::read(path).map_err(|e| EvalError::io(path, e))?;
            let b64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
            content.push(json!({
                "type": "image_url",
                "image_url": {
                    "url": format!("data:{};base64,{}", guess_mime(path), b64),
                }
            }));
        }
        content.push(json!({"type": "text", "text": prompt}));

        Ok(vec![json!({"role": "user", "content": content})])
    }

    /// Test connectivity to the API with a text-only prompt.
    pub async fn test_connection(&self) -> Result<()> {
        let candidates = crate::prompt::candidate_tokens(2);
        let prompt = crate::prompt::render(
            "Is one smaller than two?",
            &["yes".to_string(), "no".to_string()],
        );
        self.score_candidates(&prompt, &[], &candidates).await?;
        Ok(())
    }
}

#[async_trait]
impl ChoiceModel for OpenAiVisionModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score_candidates(
        &self,
        prompt: &str,
        images: &[PathBuf],
        candidates: &[String],
    ) -> Result<CandidateScores> {
        let request = ChatCompletionRequest {
            model: self.config.served_model().to_string(),
            messages: Self::build_messages(prompt, images)?,
            max_tokens: 1,
            temperature: 0.0,
            logprobs: true,
            top_logprobs: self.config.top_logprobs,
        };

        let mut builder = self
            .client
            .post(self.endpoint())
            .header("Content-Type", "application/json")
            .json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            if let Ok(api_error) = serde_json::from_str::<ApiError>(&body) {
                return Err(EvalError::Inference(format!(
                    "API error ({}): {}",
                    status, api_error.error.message
                )));
            }
            return Err(EvalError::Inference(format!(
                "Request failed ({}): {}",
                status, body
            )));
        }

        parse_candidate_logprobs(&body, candidates)
    }
}

/// MIME type for an image path, by extension.
fn guess_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// Pull candidate log-probabilities out of a completion body.
///
/// Tokens are compared after trimming whitespace, so `"4"` and `" 4"` both
/// count towards candidate `"4"`; their probabilities are summed. Candidates
/// missing from the reported alternatives get `-inf`.
fn parse_candidate_logprobs(body: &str, candidates: &[String]) -> Result<CandidateScores> {
    let completion: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| EvalError::Inference(format!("unparseable response: {}", e)))?;

    let first = completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.logprobs)
        .and_then(|l| l.content)
        .and_then(|c| c.into_iter().next())
        .ok_or_else(|| EvalError::Inference("response carries no logprobs".to_string()))?;

    debug!(token = %first.token, logprob = first.logprob, "generated token");

    let alternatives: Vec<(String, f64)> = if first.top_logprobs.is_empty() {
        vec![(first.token, first.logprob)]
    } else {
        first
            .top_logprobs
            .into_iter()
            .map(|t| (t.token, t.logprob))
            .collect()
    };

    let values: Vec<f64> = candidates
        .iter()
        .map(|cand| {
            let mass: f64 = alternatives
                .iter()
                .filter(|(tok, _)| tok.trim() == cand.as_str())
                .map(|(_, lp)| lp.exp())
                .sum();
            if mass > 0.0 { mass.ln() } else { f64::NEG_INFINITY }
        })
        .collect();

    if values.iter().all(|v| *v == f64::NEG_INFINITY) {
        return Err(EvalError::Inference(format!(
            "none of the candidates {:?} appear among the top logprobs",
            candidates
        )));
    }

    Ok(CandidateScores::LogProbabilities(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::candidate_tokens;
    use tempfile::TempDir;

    #[test]
    fn test_endpoint_construction() {
        let config = ModelConfig {
            api_base: "https://api.example.com/".to_string(),
            model: "llava".to_string(),
            ..Default::default()
        };
        let client = OpenAiVisionModel::new(config).unwrap();
        assert_eq!(client.endpoint(), "https://api.example.com/v1/chat/completions");
        assert_eq!(client.name(), "llava");
    }

    #[test]
    fn test_build_messages_puts_images_first() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("0.png");
        let b = dir.path().join("1.jpg");
        std::fs::write(&a, b"png").unwrap();
        std::fs::write(&b, b"jpg").unwrap();

        let messages = OpenAiVisionModel::build_messages("question", &[a, b]).unwrap();
        let content = messages[0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 3);
        assert!(content[0]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert!(content[1]["image_url"]["url"]
            .as_str()
            .unwrap()
            .starts_with("data:image/jpeg;base64,"));
        assert_eq!(content[2]["text"], "question");
    }

    #[test]
    fn test_build_messages_missing_image() {
        let err = OpenAiVisionModel::build_messages("q", &[PathBuf::from("/nonexistent/0.png")])
            .unwrap_err();
        assert!(matches!(err, EvalError::Io { .. }));
    }

    #[test]
    fn test_parse_candidate_logprobs() {
        let body = r#"{
            "choices": [{
                "message": {"role": "assistant", "content": "4"},
                "logprobs": {"content": [{
                    "token": "4",
                    "logprob": -0.5,
                    "top_logprobs": [
                        {"token": "4", "logprob": -0.5},
                        {"token": " 4", "logprob": -2.0},
                        {"token": "1", "logprob": -1.5},
                        {"token": "The", "logprob": -3.0}
                    ]
                }]}
            }]
        }"#;

        let scores = parse_candidate_logprobs(body, &candidate_tokens(4)).unwrap();
        let CandidateScores::LogProbabilities(values) = scores else {
            panic!("expected log-probabilities");
        };
        assert!((values[0] - -1.5).abs() < 1e-12);
        assert_eq!(values[1], f64::NEG_INFINITY);
        assert_eq!(values[2], f64::NEG_INFINITY);
        let expected = ((-0.5f64).exp() + (-2.0f64).exp()).ln();
        assert!((values[3] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_parse_without_candidates_fails() {
        let body = r#"{"choices": [{"logprobs": {"content": [{"token": "The", "logprob": -0.1, "top_logprobs": []}]}}]}"#;
        let err = parse_candidate_logprobs(body, &candidate_tokens(4)).unwrap_err();
        assert!(matches!(err, EvalError::Inference(_)));
    }

    #[test]
    fn test_parse_without_logprobs_fails() {
        let body = r#"{"choices": [{"message": {"content": "4"}}]}"#;
        assert!(parse_candidate_logprobs(body, &candidate_tokens(4)).is_err());
    }
}
