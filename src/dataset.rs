//! Annotation loading.
//!
//! Annotations live in a directory tree with one subdirectory per skill:
//!
//! ```text
//! <root>/<skill_name>/<skill_name>.jsonl
//! ```
//!
//! Every `*.jsonl` file in a skill directory is a task. Each line holds one
//! multiple-choice question over an ordered set of images. Lines that fail
//! validation are kept aside as [`RejectedRecord`]s so the rest of the file
//! still loads.

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Image extensions a record may reference.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Expected shape of every record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    /// Number of answer choices per question.
    pub num_choices: usize,
    /// Number of images (agents) per question.
    pub num_images: usize,
}

impl Default for Protocol {
    fn default() -> Self {
        Self {
            num_choices: 4,
            num_images: 2,
        }
    }
}

/// On-disk shape of a record, before validation.
#[derive(Debug, Deserialize)]
struct RawRecord {
    #[serde(default)]
    skill: Option<String>,
    images: Vec<String>,
    choices: Vec<String>,
    ground_truth: i64,
    question: String,
}

/// A validated multiple-choice question over an image set.
///
/// Fields are only reachable through accessors so every instance has passed
/// [`AnnotationRecord::new`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationRecord {
    skill: String,
    images: Vec<String>,
    choices: Vec<String>,
    ground_truth: usize,
    question: String,
}

impl AnnotationRecord {
    /// Build a record, checking it against the protocol.
    pub fn new(
        skill: impl Into<String>,
        images: Vec<String>,
        choices: Vec<String>,
        ground_truth: usize,
        question: impl Into<String>,
        protocol: &Protocol,
    ) -> Result<Self> {
        if choices.len() != protocol.num_choices {
            return Err(EvalError::MalformedRecord(format!(
                "expected {} choices, found {}",
                protocol.num_choices,
                choices.len()
            )));
        }

        if ground_truth >= choices.len() {
            return Err(EvalError::MalformedRecord(format!(
                "ground_truth {} is out of range for {} choices",
                ground_truth,
                choices.len()
            )));
        }

        if images.len() != protocol.num_images {
            return Err(EvalError::MalformedRecord(format!(
                "expected {} images, found {}",
                protocol.num_images,
                images.len()
            )));
        }

        Ok(Self {
            skill: skill.into(),
            images,
            choices,
            ground_truth,
            question: question.into(),
        })
    }

    /// Parse and validate one JSONL line.
    ///
    /// `default_skill` is used when the line carries no `skill` field.
    pub fn from_json_line(line: &str, default_skill: &str, protocol: &Protocol) -> Result<Self> {
        let raw: RawRecord = serde_json::from_str(line)
            .map_err(|e| EvalError::MalformedRecord(format!("invalid JSON: {}", e)))?;

        let ground_truth = usize::try_from(raw.ground_truth).map_err(|_| {
            EvalError::MalformedRecord(format!(
                "ground_truth {} is out of range for {} choices",
                raw.ground_truth,
                raw.choices.len()
            ))
        })?;

        Self::new(
            raw.skill.unwrap_or_else(|| default_skill.to_string()),
            raw.images,
            raw.choices,
            ground_truth,
            raw.question,
            protocol,
        )
    }

    pub fn skill(&self) -> &str {
        &self.skill
    }

    /// Image filenames in agent order.
    pub fn images(&self) -> &[String] {
        &self.images
    }

    /// Answer choices in presentation order.
    pub fn choices(&self) -> &[String] {
        &self.choices
    }

    /// Zero-based index of the correct choice.
    pub fn ground_truth(&self) -> usize {
        self.ground_truth
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    /// Resolve image filenames against `image_dir`.
    ///
    /// Fails with [`EvalError::MalformedRecord`] on an unsupported extension
    /// and with [`EvalError::MissingImage`] when a file is absent.
    pub fn resolve_images(&self, image_dir: &Path) -> Result<Vec<PathBuf>> {
        self.images
            .iter()
            .map(|name| {
                if !has_image_extension(Path::new(name)) {
                    return Err(EvalError::MalformedRecord(format!(
                        "unsupported image extension for '{}'",
                        name
                    )));
                }
                let path = image_dir.join(name);
                if !path.is_file() {
                    return Err(EvalError::MissingImage(path));
                }
                Ok(path)
            })
            .collect()
    }
}

/// Whether a path ends in one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

/// A record together with the line it came from.
#[derive(Debug, Clone)]
pub struct LoadedRecord {
    /// 1-based line number in the source file.
    pub line: usize,
    pub record: AnnotationRecord,
}

/// A line that failed to parse or validate.
#[derive(Debug, Clone)]
pub struct RejectedRecord {
    /// 1-based line number in the source file.
    pub line: usize,
    /// Why the line was rejected.
    pub reason: String,
}

/// All records of one annotation file.
#[derive(Debug, Clone)]
pub struct Task {
    /// Task name (file stem with underscores as spaces).
    pub name: String,
    /// File the task was read from.
    pub source: PathBuf,
    pub records: Vec<LoadedRecord>,
    pub rejected: Vec<RejectedRecord>,
}

impl Task {
    /// Number of valid records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// All tasks of one skill.
#[derive(Debug, Clone)]
pub struct Skill {
    /// Skill name (directory name with underscores as spaces).
    pub name: String,
    pub tasks: Vec<Task>,
}

impl Skill {
    /// Number of valid records across tasks.
    pub fn len(&self) -> usize {
        self.tasks.iter().map(Task::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of rejected lines across tasks.
    pub fn rejected_count(&self) -> usize {
        self.tasks.iter().map(|t| t.rejected.len()).sum()
    }
}

/// Directory name used on disk for a skill name.
pub fn skill_dir_name(skill: &str) -> String {
    skill.replace([' ', '/'], "_")
}

/// Display name for a skill directory: `distance_awareness` -> `distance awareness`.
fn skill_label(dir: &Path) -> String {
    dir.file_name()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .replace('_', " ")
}

/// Load one annotation file.
///
/// Only I/O failures are fatal; bad lines end up in [`Task::rejected`].
pub fn load_task_file(path: &Path, default_skill: &str, protocol: &Protocol) -> Result<Task> {
    let bytes = fs::read(path).map_err(|e| EvalError::io(path, e))?;

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .replace('_', " ");

    let mut task = Task {
        name,
        source: path.to_path_buf(),
        records: Vec::new(),
        rejected: Vec::new(),
    };

    for (idx, raw) in bytes.split(|b| *b == b'\n').enumerate() {
        let line_num = idx + 1;
        let parsed = std::str::from_utf8(raw)
            .map_err(|e| EvalError::MalformedRecord(format!("invalid UTF-8: {}", e)))
            .map(str::trim);
        if matches!(parsed, Ok("")) {
            continue;
        }

        match parsed.and_then(|line| AnnotationRecord::from_json_line(line, default_skill, protocol)) {
            Ok(record) => task.records.push(LoadedRecord {
                line: line_num,
                record,
            }),
            Err(e) => {
                warn!(path = %path.display(), line = line_num, error = %e, "skipping record");
                task.rejected.push(RejectedRecord {
                    line: line_num,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(task)
}

/// Load every task in a skill directory, sorted by task name.
pub fn load_skill_dir(dir: &Path, skill_name: &str, protocol: &Protocol) -> Result<Skill> {
    let default_skill = dir
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(skill_name)
        .to_string();

    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| EvalError::io(dir, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("jsonl"))
        .collect();
    files.sort();

    let mut tasks = Vec::with_capacity(files.len());
    for file in files {
        let task = load_task_file(&file, &default_skill, protocol)?;
        info!(
            skill = skill_name,
            task = %task.name,
            records = task.len(),
            rejected = task.rejected.len(),
            "loaded task"
        );
        tasks.push(task);
    }

    Ok(Skill {
        name: skill_name.to_string(),
        tasks,
    })
}

/// Load annotations grouped by skill.
///
/// With `specific_skill`, only that skill's directory is read; a missing
/// directory is logged and yields no skills.
pub fn load_data_by_skill(
    root: &Path,
    specific_skill: Option<&str>,
    protocol: &Protocol,
) -> Result<Vec<Skill>> {
    if !root.is_dir() {
        return Err(EvalError::InvalidDataDir(root.to_path_buf()));
    }

    if let Some(skill) = specific_skill {
        let dir = root.join(skill_dir_name(skill));
        if !dir.is_dir() {
            warn!(path = %dir.display(), "skill directory not found");
            return Ok(Vec::new());
        }
        return Ok(vec![load_skill_dir(&dir, &skill_label(&dir), protocol)?]);
    }

    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .map_err(|e| EvalError::io(root, e))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();

    let mut skills = Vec::with_capacity(dirs.len());
    for dir in dirs {
        let name = skill_label(&dir);
        skills.push(load_skill_dir(&dir, &name, protocol)?);
    }

    Ok(skills)
}
