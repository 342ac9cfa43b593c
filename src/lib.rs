//! Pairwise VQA Eval - multiple-choice evaluation of vision-language models.
//!
//! Questions are asked over an ordered pair of images (agent1's view and
//! agent2's view) with a fixed set of answer choices. The model is told to
//! answer with a single digit, so its next-token distribution restricted to
//! `"1".."N"` gives a probability for every choice without scoring
//! multi-token answers.
//!
//! # Quick Start
//!
//! ```no_run
//! use pairwise_vqa_eval::{
//!     config::Config,
//!     dataset::load_data_by_skill,
//!     model::OpenAiVisionModel,
//!     runner::{EvalConfig, Evaluator},
//!     aggregate::aggregate_dir,
//! };
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     config.validate()?;
//!
//!     let skills = load_data_by_skill(Path::new("data/annotations"), None, &config.protocol)?;
//!     let model = OpenAiVisionModel::new(config.model.clone())?;
//!
//!     let evaluator = Evaluator::new(EvalConfig {
//!         model_name: config.model.model.clone(),
//!         ..Default::default()
//!     });
//!     let summary = evaluator.run(&skills, &model).await?;
//!     summary.print_summary();
//!
//!     aggregate_dir(Path::new("scores"))?.print_summary();
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! - **dataset**: validated annotation records loaded per skill and task
//! - **prompt**: the single-digit answer instruction and numbered choices
//! - **model**: the `ChoiceModel` seam and its backends
//! - **scorer**: conditional softmax, argmax and per-record results
//! - **runner**: the sequential sweep writing score files
//! - **aggregate**: per-skill and overall accuracy
//! - **annotations**: appending new questions to annotation files

pub mod aggregate;
pub mod annotations;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod persistence;
pub mod prompt;
pub mod runner;
pub mod scorer;
pub mod telemetry;

// Re-export commonly used types
pub use config::Config;
pub use dataset::{AnnotationRecord, Protocol, load_data_by_skill};
pub use error::{ErrorKind, EvalError, Result};
pub use model::{CandidateScores, ChoiceModel, OpenAiVisionModel, ScriptedModel};
pub use runner::{EvalConfig, Evaluator};
pub use scorer::{ChoiceScorer, ScoreResult, ScoreStatus};
