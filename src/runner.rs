//! Evaluation sweep.
//!
//! Walks loaded skills, scores every record in order, and appends each
//! result to disk as soon as it exists. Per-record failures are recorded in
//! the score file; only I/O problems with the output stop the run.

use crate::dataset::{Skill, Task};
use crate::error::Result;
use crate::model::ChoiceModel;
use crate::persistence::{
    ResultWriter, RunMetadata, metadata_path, output_stem, results_path, save_metadata,
};
use crate::scorer::{ChoiceScorer, ScoreResult};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

/// Label for how scores were obtained.
pub const METHOD_TYPE: &str = "single_token_choice";

/// Configuration for a sweep.
#[derive(Debug, Clone)]
pub struct EvalConfig {
    /// Model identifier as given on the command line.
    pub model_name: String,
    /// Optional checkpoint identifier.
    pub checkpoint: Option<String>,
    /// Directory image filenames are resolved against.
    pub image_dir: PathBuf,
    /// Directory score files are written to.
    pub output_dir: PathBuf,
    /// One score file per skill instead of per task.
    pub combine_tasks: bool,
    /// Cap on records scored per score file.
    pub max_items: Option<usize>,
    /// Print progress per record.
    pub verbose: bool,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            model_name: String::new(),
            checkpoint: None,
            image_dir: PathBuf::from("data/images"),
            output_dir: PathBuf::from("scores"),
            combine_tasks: false,
            max_items: None,
            verbose: false,
        }
    }
}

/// Counts for one score file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSummary {
    pub skill: String,
    pub task_names: Vec<String>,
    pub path: PathBuf,
    pub scored: usize,
    pub errored: usize,
    pub correct: usize,
}

/// Result of a whole sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub method: String,
    pub outputs: Vec<OutputSummary>,
    pub total_time_secs: f64,
}

impl RunSummary {
    /// Records that produced a prediction.
    pub fn scored(&self) -> usize {
        self.outputs.iter().map(|o| o.scored).sum()
    }

    pub fn errored(&self) -> usize {
        self.outputs.iter().map(|o| o.errored).sum()
    }

    pub fn correct(&self) -> usize {
        self.outputs.iter().map(|o| o.correct).sum()
    }

    /// Print summary to stdout.
    pub fn print_summary(&self) {
        println!("\n========== Evaluation Run ==========");
        println!("Method: {}", self.method);
        for output in &self.outputs {
            println!(
                "{:<28} scored {:>5}  errored {:>4}  correct {:>5}  -> {}",
                output.skill,
                output.scored,
                output.errored,
                output.correct,
                output.path.display()
            );
        }
        println!("------------------------------------");
        let scored = self.scored();
        println!(
            "Scored: {}  Errored: {}  Accuracy: {:.1}%",
            scored,
            self.errored(),
            if scored > 0 {
                self.correct() as f64 / scored as f64 * 100.0
            } else {
                0.0
            }
        );
        println!("Total time: {:.1}s", self.total_time_secs);
        println!("====================================\n");
    }
}

/// Sequential evaluator.
pub struct Evaluator {
    config: EvalConfig,
}

impl Evaluator {
    pub fn new(config: EvalConfig) -> Self {
        Self { config }
    }

    /// Score every record of `skills` with `model`.
    pub async fn run(&self, skills: &[Skill], model: &dyn ChoiceModel) -> Result<RunSummary> {
        let start = Instant::now();
        let scorer = ChoiceScorer::new(model, &self.config.image_dir);
        let mut outputs = Vec::new();

        for skill in skills {
            info!(skill = %skill.name, records = skill.len(), "processing skill");

            if self.config.combine_tasks {
                let tasks: Vec<&Task> = skill.tasks.iter().collect();
                if let Some(summary) = self.run_output(&scorer, &skill.name, &tasks, None).await? {
                    outputs.push(summary);
                }
            } else {
                for task in &skill.tasks {
                    if let Some(summary) = self
                        .run_output(&scorer, &skill.name, &[task], Some(&task.name))
                        .await?
                    {
                        outputs.push(summary);
                    }
                }
            }
        }

        Ok(RunSummary {
            method: model.name().to_string(),
            outputs,
            total_time_secs: start.elapsed().as_secs_f64(),
        })
    }

    /// Score `tasks` into a single score file. Returns `None` when there is nothing to write.
    async fn run_output(
        &self,
        scorer: &ChoiceScorer<'_>,
        skill: &str,
        tasks: &[&Task],
        task_label: Option<&str>,
    ) -> Result<Option<OutputSummary>> {
        let lines: usize = tasks.iter().map(|t| t.len() + t.rejected.len()).sum();
        if lines == 0 {
            info!(skill, task = ?task_label, "no samples, skipping");
            return Ok(None);
        }

        let stem = output_stem(
            &self.config.model_name,
            self.config.checkpoint.as_deref(),
            skill,
            task_label,
        );
        let task_names: Vec<String> = tasks.iter().map(|t| t.name.clone()).collect();

        let metadata = RunMetadata {
            model_name: self.config.model_name.clone(),
            checkpoint: self.config.checkpoint.clone(),
            method: scorer.method().to_string(),
            skill_name: skill.to_string(),
            task_names: task_names.clone(),
            combined_tasks: task_label.is_none(),
            image_dir: scorer.image_dir().to_path_buf(),
            generation_timestamp: Utc::now(),
            method_type: METHOD_TYPE.to_string(),
        };
        save_metadata(&metadata, &metadata_path(&self.config.output_dir, &stem))?;

        let path = results_path(&self.config.output_dir, &stem);
        let mut writer = ResultWriter::create(&path)?;
        let mut summary = OutputSummary {
            skill: skill.to_string(),
            task_names,
            path: path.clone(),
            scored: 0,
            errored: 0,
            correct: 0,
        };

        let mut budget = self.config.max_items.unwrap_or(usize::MAX);
        for task in tasks {
            for rejected in &task.rejected {
                let result = ScoreResult::rejected(rejected, skill, &task.name, scorer.method());
                writer.write(&result)?;
                summary.errored += 1;
            }

            let take = budget.min(task.records.len());
            budget -= take;
            for (idx, loaded) in task.records.iter().take(take).enumerate() {
                if self.config.verbose {
                    println!("[{}/{}] {} line {}", idx + 1, take, task.name, loaded.line);
                }

                let result = scorer.score(loaded, skill, &task.name).await;
                writer.write(&result)?;

                if result.is_scored() {
                    summary.scored += 1;
                    if result.is_correct {
                        summary.correct += 1;
                    }
                } else {
                    summary.errored += 1;
                }
            }
        }

        info!(
            path = %path.display(),
            scored = summary.scored,
            errored = summary.errored,
            "score file written"
        );

        Ok(Some(summary))
    }
}
