//! Writing annotation files.
//!
//! Annotators pair images named `X.ext` and `X+1.ext` (X even) and write one
//! question per line into `<root>/<skill>/<skill>.jsonl`, the same layout
//! [`crate::dataset`] reads.

use crate::dataset::{AnnotationRecord, Protocol, has_image_extension, skill_dir_name};
use crate::error::{EvalError, Result};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

/// Skills offered to annotators.
pub const SKILL_OPTIONS: &[&str] = &[
    "occlusion_visibility",
    "distance_awareness",
    "navigation",
    "relative_agents",
    "egocentric_motion",
];

/// Two images shown to the model side by side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    /// The even index X.
    pub index: u64,
    /// `X.ext`, seen by agent1.
    pub first: String,
    /// `X+1.ext`, seen by agent2.
    pub second: String,
}

/// List image pairs in `dir`, ordered by index.
///
/// Files whose stem is not a number, or whose partner is missing, are skipped.
pub fn list_image_pairs(dir: &Path) -> Result<Vec<ImagePair>> {
    let mut by_index: BTreeMap<u64, String> = BTreeMap::new();

    for entry in fs::read_dir(dir).map_err(|e| EvalError::io(dir, e))? {
        let path = entry.map_err(|e| EvalError::io(dir, e))?.path();
        if !path.is_file() || !has_image_extension(&path) {
            continue;
        }
        let index = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok());
        let name = path.file_name().and_then(|s| s.to_str()).map(str::to_string);
        if let (Some(index), Some(name)) = (index, name) {
            by_index.entry(index).or_insert(name);
        }
    }

    Ok(by_index
        .iter()
        .filter(|(index, _)| *index % 2 == 0)
        .filter_map(|(index, first)| {
            by_index.get(&(index + 1)).map(|second| ImagePair {
                index: *index,
                first: first.clone(),
                second: second.clone(),
            })
        })
        .collect())
}

/// Path of the annotation file for `skill` under `root`.
pub fn skill_file(root: &Path, skill: &str) -> PathBuf {
    let dir = skill_dir_name(skill);
    root.join(&dir).join(format!("{}.jsonl", dir))
}

/// A question as typed by an annotator, before it becomes a record.
#[derive(Debug, Clone)]
pub struct Draft {
    pub skill: String,
    pub images: Vec<String>,
    pub choices: Vec<String>,
    pub ground_truth: usize,
    pub question: String,
}

impl Draft {
    /// Check the draft and turn it into a record.
    pub fn validate(self, protocol: &Protocol) -> Result<AnnotationRecord> {
        let question = self.question.trim().to_string();
        if question.is_empty() {
            return Err(EvalError::MalformedRecord(
                "question must not be empty".to_string(),
            ));
        }

        let choices: Vec<String> = self.choices.iter().map(|c| c.trim().to_string()).collect();
        if choices.iter().any(String::is_empty) {
            return Err(EvalError::MalformedRecord(
                "choices must not be empty".to_string(),
            ));
        }

        AnnotationRecord::new(
            self.skill,
            self.images,
            choices,
            self.ground_truth,
            question,
            protocol,
        )
    }
}

/// Validate `draft` and append it to its skill file under `root`.
pub fn append_record(root: &Path, draft: Draft, protocol: &Protocol) -> Result<PathBuf> {
    let record = draft.validate(protocol)?;
    let path = skill_file(root, record.skill());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| EvalError::io(parent, e))?;
    }

    let line = serde_json::to_string(&record)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| EvalError::io(&path, e))?;
    writeln!(file, "{}", line).map_err(|e| EvalError::io(&path, e))?;

    info!(path = %path.display(), skill = record.skill(), "appended annotation");
    Ok(path)
}
