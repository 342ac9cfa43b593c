//! Accuracy aggregation over score files.
//!
//! Walks an output directory, reads every results file, and reports accuracy
//! per skill and overall for each model found. Errored records are counted
//! but excluded from accuracy.
//!
//! A record scored more than once for the same model (per-task and combined
//! files side by side, or a rerun) is counted once: the result from the most
//! recent run, by its metadata sidecar, wins.

use crate::error::{EvalError, Result};
use crate::persistence::{METADATA_SUFFIX, RESULTS_EXTENSION, load_metadata, read_results};
use crate::scorer::ScoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Counts for one group of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Accuracy {
    /// All results, errored included.
    pub total: usize,
    /// Results that produced a prediction.
    pub scored: usize,
    pub errored: usize,
    pub correct: usize,
    /// `correct / scored`, or 0 when nothing was scored.
    pub accuracy: f64,
}

impl Accuracy {
    fn add(&mut self, result: &ScoreResult) {
        self.total += 1;
        if result.is_scored() {
            self.scored += 1;
            if result.is_correct {
                self.correct += 1;
            }
        } else {
            self.errored += 1;
        }
    }

    fn finish(&mut self) {
        self.accuracy = if self.scored > 0 {
            self.correct as f64 / self.scored as f64
        } else {
            0.0
        };
    }
}

/// Accuracy for one skill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillAccuracy {
    pub skill: String,
    #[serde(flatten)]
    pub accuracy: Accuracy,
}

/// Per-skill and overall accuracy of one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodReport {
    pub method: String,
    pub skills: Vec<SkillAccuracy>,
    pub overall: Accuracy,
}

/// Everything found under an output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyReport {
    /// Results files that were read.
    pub files: Vec<PathBuf>,
    /// Results superseded by a newer result for the same record.
    #[serde(default)]
    pub duplicates: usize,
    pub methods: Vec<MethodReport>,
}

impl AccuracyReport {
    /// Report for `method`, if present.
    pub fn method(&self, method: &str) -> Option<&MethodReport> {
        self.methods.iter().find(|m| m.method == method)
    }

    /// Print a table per model to stdout.
    pub fn print_summary(&self) {
        println!("\n========== Accuracy ==========");
        println!("Score files: {}", self.files.len());
        if self.duplicates > 0 {
            println!("Duplicate results ignored: {}", self.duplicates);
        }
        for report in &self.methods {
            println!("------------------------------");
            println!("Method: {}", report.method);
            println!(
                "{:<28} {:>7} {:>7} {:>7} {:>9}",
                "skill", "scored", "errors", "correct", "accuracy"
            );
            for skill in &report.skills {
                print_row(&skill.skill, &skill.accuracy);
            }
            print_row("OVERALL", &report.overall);
        }
        println!("==============================\n");
    }
}

fn print_row(label: &str, acc: &Accuracy) {
    println!(
        "{:<28} {:>7} {:>7} {:>7} {:>8.1}%",
        label,
        acc.scored,
        acc.errored,
        acc.correct,
        acc.accuracy * 100.0
    );
}

/// Aggregate an in-memory set of results.
pub fn aggregate_results<'a>(results: impl IntoIterator<Item = &'a ScoreResult>) -> Vec<MethodReport> {
    let mut by_method: BTreeMap<&str, (BTreeMap<&str, Accuracy>, Accuracy)> = BTreeMap::new();

    for result in results {
        let (skills, overall) = by_method.entry(result.method.as_str()).or_default();
        skills.entry(result.skill.as_str()).or_default().add(result);
        overall.add(result);
    }

    by_method
        .into_iter()
        .map(|(method, (skills, mut overall))| {
            overall.finish();
            MethodReport {
                method: method.to_string(),
                skills: skills
                    .into_iter()
                    .map(|(skill, mut accuracy)| {
                        accuracy.finish();
                        SkillAccuracy {
                            skill: skill.to_string(),
                            accuracy,
                        }
                    })
                    .collect(),
                overall,
            }
        })
        .collect()
}

/// Find results files under `path` (or `path` itself when it is a file).
pub fn find_result_files(path: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(RESULTS_EXTENSION))
        .collect();
    files.sort();
    files
}

/// When the run behind a results file was generated, from its sidecar.
fn run_timestamp(results_file: &Path) -> Option<DateTime<Utc>> {
    let name = results_file.file_name()?.to_str()?;
    let stem = name.strip_suffix(&format!(".{}", RESULTS_EXTENSION))?;
    let sidecar = results_file.with_file_name(format!("{}{}", stem, METADATA_SUFFIX));
    match load_metadata(&sidecar) {
        Ok(metadata) => Some(metadata.generation_timestamp),
        Err(e) => {
            debug!(path = %sidecar.display(), error = %e, "no usable metadata");
            None
        }
    }
}

/// Aggregate every results file under `path`.
pub fn aggregate_dir(path: &Path) -> Result<AccuracyReport> {
    let files = find_result_files(path);
    if files.is_empty() {
        return Err(EvalError::ScoresNotFound(path.to_path_buf()));
    }

    // Oldest runs first so newer results replace them; files without a
    // sidecar sort before everything else.
    let mut ordered: Vec<(Option<DateTime<Utc>>, &PathBuf)> =
        files.iter().map(|f| (run_timestamp(f), f)).collect();
    ordered.sort();

    let mut latest: HashMap<(String, String, String, usize), ScoreResult> = HashMap::new();
    let mut duplicates = 0;
    for (_, file) in ordered {
        let loaded = read_results(file)?;
        info!(path = %file.display(), results = loaded.len(), "read score file");
        for result in loaded {
            let key = (
                result.method.clone(),
                result.skill.clone(),
                result.task.clone(),
                result.line,
            );
            if latest.insert(key, result).is_some() {
                duplicates += 1;
            }
        }
    }

    if duplicates > 0 {
        warn!(duplicates, "records scored more than once, keeping the newest");
    }

    Ok(AccuracyReport {
        methods: aggregate_results(latest.values()),
        files,
        duplicates,
    })
}
