//! Persistence layer for score files.
//!
//! Each evaluated skill (or skill/task pair) gets two files in the output
//! directory:
//!
//! - `<stem>.jsonl` with one [`ScoreResult`] per line, appended and flushed
//!   as soon as the record is scored;
//! - `<stem>.meta.json` with the [`RunMetadata`] of the run that wrote it.

use crate::error::{EvalError, Result};
use crate::scorer::ScoreResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Prefix of every score file name.
pub const SCORE_FILE_PREFIX: &str = "choice_scores";

/// Extension of result files.
pub const RESULTS_EXTENSION: &str = "jsonl";

/// Suffix of metadata sidecars.
pub const METADATA_SUFFIX: &str = ".meta.json";

/// Describes the run that produced a score file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub model_name: String,
    pub checkpoint: Option<String>,
    pub method: String,
    pub skill_name: String,
    pub task_names: Vec<String>,
    pub combined_tasks: bool,
    pub image_dir: PathBuf,
    pub generation_timestamp: DateTime<Utc>,
    pub method_type: String,
}

/// Replace characters that are unsafe in file names.
fn clean(part: &str) -> String {
    part.replace(['/', '\\', ':', ' '], "_")
}

/// File stem for a score file, without extension.
///
/// `choice_scores_<model>[_<checkpoint>]_<skill>[_<task>]`
pub fn output_stem(
    model: &str,
    checkpoint: Option<&str>,
    skill: &str,
    task: Option<&str>,
) -> String {
    let mut parts = vec![SCORE_FILE_PREFIX.to_string(), clean(model)];
    if let Some(ckpt) = checkpoint {
        parts.push(clean(ckpt));
    }
    parts.push(clean(skill));
    if let Some(task) = task {
        parts.push(clean(task));
    }
    parts.join("_")
}

/// Path of the results file for `stem` inside `dir`.
pub fn results_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}.{}", stem, RESULTS_EXTENSION))
}

/// Path of the metadata sidecar for `stem` inside `dir`.
pub fn metadata_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}{}", stem, METADATA_SUFFIX))
}

/// Save run metadata as pretty JSON.
pub fn save_metadata(metadata: &RunMetadata, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let data = serde_json::to_string_pretty(metadata)
        .map_err(|e| EvalError::Serialization(e.to_string()))?;
    fs::write(path, data).map_err(|e| EvalError::io(path, e))
}

/// Load run metadata.
pub fn load_metadata(path: &Path) -> Result<RunMetadata> {
    let data = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
    serde_json::from_str(&data).map_err(|e| EvalError::Serialization(e.to_string()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
        }
    }
    Ok(())
}

/// Appends results to a JSONL file, one flushed line per record.
pub struct ResultWriter {
    path: PathBuf,
    file: File,
    written: usize,
}

impl ResultWriter {
    /// Create (or truncate) the results file at `path`.
    pub fn create(path: &Path) -> Result<Self> {
        ensure_parent(path)?;
        let file = File::create(path).map_err(|e| EvalError::io(path, e))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            written: 0,
        })
    }

    /// Write one result and flush it to disk.
    pub fn write(&mut self, result: &ScoreResult) -> Result<()> {
        let line = serde_json::to_string(result)
            .map_err(|e| EvalError::Serialization(e.to_string()))?;
        writeln!(self.file, "{}", line).map_err(|e| EvalError::io(&self.path, e))?;
        self.file.flush().map_err(|e| EvalError::io(&self.path, e))?;
        self.written += 1;
        Ok(())
    }

    /// Results written through this writer.
    pub fn written(&self) -> usize {
        self.written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read every result from a JSONL results file. Blank lines are skipped.
pub fn read_results(path: &Path) -> Result<Vec<ScoreResult>> {
    let file = File::open(path).map_err(|e| EvalError::io(path, e))?;
    let mut results = Vec::new();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| EvalError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let result: ScoreResult = serde_json::from_str(&line).map_err(|e| {
            EvalError::Serialization(format!("{}:{}: {}", path.display(), idx + 1, e))
        })?;
        results.push(result);
    }

    Ok(results)
}
