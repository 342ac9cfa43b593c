//! Pairwise VQA Eval CLI
//!
//! Scores vision-language models on multiple-choice questions over image
//! pairs and aggregates the results into accuracy tables.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pairwise_vqa_eval::{
    aggregate::aggregate_dir,
    annotations::{Draft, SKILL_OPTIONS, append_record, list_image_pairs},
    config::Config,
    dataset::load_data_by_skill,
    model::{ChoiceModel, OpenAiVisionModel, ScriptedModel},
    runner::{EvalConfig, Evaluator},
    telemetry::init_tracing,
};
use std::path::PathBuf;
use tracing::Level;

/// Pairwise VQA Eval - multiple-choice VQA scoring for vision-language models
#[derive(Parser)]
#[command(name = "pairwise-vqa-eval")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output (debug logs and per-record progress)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// OpenAI-compatible server with logprobs
    Openai,
    /// Uniform stub model, for dry runs of the pipeline
    Scripted,
}

#[derive(Subcommand)]
enum Commands {
    /// Score every annotation record with a model
    Score {
        /// Model name (e.g., llava-onevision-qwen2-7b-ov)
        #[arg(long)]
        model: Option<String>,

        /// Checkpoint name served for the model
        #[arg(long)]
        checkpoint: Option<String>,

        /// Directory containing one subdirectory per skill
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Directory containing the images
        #[arg(long, default_value = "data/images")]
        image_dir: PathBuf,

        /// Directory to save score files
        #[arg(long, default_value = "scores")]
        output_dir: PathBuf,

        /// Only evaluate this skill
        #[arg(long)]
        skill: Option<String>,

        /// Write one score file per skill instead of per task
        #[arg(long)]
        combine_tasks: bool,

        /// Maximum records to score per score file
        #[arg(long)]
        max_items: Option<usize>,

        /// Inference backend
        #[arg(long, value_enum, default_value = "openai")]
        backend: Backend,
    },

    /// Compute per-skill and overall accuracy from score files
    Aggregate {
        /// Directory (or single file) with score files
        #[arg(default_value = "scores")]
        scores: PathBuf,

        /// Save the report as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check annotation records and image references without a model
    Validate {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        #[arg(long, default_value = "data/images")]
        image_dir: PathBuf,

        #[arg(long)]
        skill: Option<String>,
    },

    /// Append a question to a skill's annotation file
    Annotate {
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,

        /// Skill category
        #[arg(long, value_parser = clap::builder::PossibleValuesParser::new(SKILL_OPTIONS.iter().copied()))]
        skill: String,

        /// Image filenames in agent order
        #[arg(long, num_args = 1..)]
        images: Vec<String>,

        /// Answer choice (repeat once per choice, in order)
        #[arg(long = "choice")]
        choices: Vec<String>,

        /// Zero-based index of the correct choice
        #[arg(long)]
        ground_truth: usize,

        #[arg(long)]
        question: String,
    },

    /// List image pairs available for annotation
    Pairs {
        #[arg(default_value = "data/images")]
        image_dir: PathBuf,
    },

    /// Test the model API connection
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json_logs, level);

    match cli.command {
        Commands::Score {
            model,
            checkpoint,
            data_dir,
            image_dir,
            output_dir,
            skill,
            combine_tasks,
            max_items,
            backend,
        } => {
            let mut config = Config::load().context("Failed to load configuration")?;
            if let Some(model) = model {
                config.model.model = model;
            }
            if checkpoint.is_some() {
                config.model.checkpoint = checkpoint;
            }
            let eval_config = EvalConfig {
                model_name: config.model.model.clone(),
                checkpoint: config.model.checkpoint.clone(),
                image_dir,
                output_dir,
                combine_tasks,
                max_items,
                verbose: cli.verbose,
            };
            cmd_score(config, eval_config, data_dir, skill, backend).await
        }
        Commands::Aggregate { scores, output } => cmd_aggregate(scores, output),
        Commands::Validate {
            data_dir,
            image_dir,
            skill,
        } => cmd_validate(data_dir, image_dir, skill),
        Commands::Annotate {
            data_dir,
            skill,
            images,
            choices,
            ground_truth,
            question,
        } => cmd_annotate(
            data_dir,
            Draft {
                skill,
                images,
                choices,
                ground_truth,
                question,
            },
        ),
        Commands::Pairs { image_dir } => cmd_pairs(image_dir),
        Commands::Test => cmd_test().await,
    }
}

async fn cmd_score(
    config: Config,
    mut eval_config: EvalConfig,
    data_dir: PathBuf,
    skill: Option<String>,
    backend: Backend,
) -> Result<()> {
    let model: Box<dyn ChoiceModel> = match backend {
        Backend::Openai => {
            config.validate().context("Invalid configuration")?;
            let client =
                OpenAiVisionModel::new(config.model.clone()).context("Failed to create client")?;
            Box::new(client)
        }
        Backend::Scripted => {
            config.validate_protocol().context("Invalid configuration")?;
            if eval_config.model_name.is_empty() {
                eval_config.model_name = "scripted".to_string();
            }
            Box::new(ScriptedModel::uniform(config.protocol.num_choices))
        }
    };

    println!("Initializing model: {}", model.name());

    let skills = load_data_by_skill(&data_dir, skill.as_deref(), &config.protocol)
        .context("Failed to load annotations")?;
    if skills.iter().all(|s| s.is_empty() && s.rejected_count() == 0) {
        anyhow::bail!("No data loaded from '{}'", data_dir.display());
    }

    for s in &skills {
        println!(
            "  {}: {} records ({} rejected) in {} task(s)",
            s.name,
            s.len(),
            s.rejected_count(),
            s.tasks.len()
        );
    }

    let evaluator = Evaluator::new(eval_config);
    let summary = evaluator
        .run(&skills, model.as_ref())
        .await
        .context("Evaluation failed")?;

    summary.print_summary();
    Ok(())
}

fn cmd_aggregate(scores: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let report = aggregate_dir(&scores).context("Failed to aggregate scores")?;
    report.print_summary();

    if let Some(output_path) = output {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&output_path, json)
            .with_context(|| format!("Failed to write {}", output_path.display()))?;
        println!("Report saved to {}", output_path.display());
    }

    Ok(())
}

fn cmd_validate(data_dir: PathBuf, image_dir: PathBuf, skill: Option<String>) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    config.validate_protocol().context("Invalid configuration")?;

    let skills = load_data_by_skill(&data_dir, skill.as_deref(), &config.protocol)
        .context("Failed to load annotations")?;

    let mut problems = 0;
    let mut checked = 0;
    for skill in &skills {
        for task in &skill.tasks {
            for rejected in &task.rejected {
                problems += 1;
                println!(
                    "{}:{}: {}",
                    task.source.display(),
                    rejected.line,
                    rejected.reason
                );
            }
            for loaded in &task.records {
                checked += 1;
                if let Err(e) = loaded.record.resolve_images(&image_dir) {
                    problems += 1;
                    println!("{}:{}: {}", task.source.display(), loaded.line, e);
                }
            }
        }
    }

    println!("Checked {} records, {} problem(s)", checked, problems);
    if problems > 0 {
        anyhow::bail!("{} annotation problem(s) found", problems);
    }
    Ok(())
}

fn cmd_annotate(data_dir: PathBuf, draft: Draft) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let path = append_record(&data_dir, draft, &config.protocol)
        .context("Failed to save annotation")?;
    println!("Saved to {}", path.display());
    Ok(())
}

fn cmd_pairs(image_dir: PathBuf) -> Result<()> {
    let pairs = list_image_pairs(&image_dir).context("Failed to list images")?;
    if pairs.is_empty() {
        println!(
            "No image pairs found. Name files like '0.png', '1.png' (X and X+1, X even)."
        );
        return Ok(());
    }
    for pair in &pairs {
        println!("{:>6}  {}  {}", pair.index, pair.first, pair.second);
    }
    println!("{} pair(s)", pairs.len());
    Ok(())
}

async fn cmd_test() -> Result<()> {
    println!("Testing model API connection...\n");

    let config = Config::load().context("Failed to load configuration")?;

    println!("Configuration:");
    println!("  API Base:  {}", config.model.api_base);
    println!("  Model:     {}", config.model.served_model());
    println!();

    if let Err(e) = config.validate() {
        println!("Configuration error: {}", e);
        return Ok(());
    }

    let client = OpenAiVisionModel::new(config.model).context("Failed to create client")?;

    println!("Sending test request...");
    match client.test_connection().await {
        Ok(()) => println!("Connection successful, logprobs available."),
        Err(e) => println!("Connection failed: {}", e),
    }

    Ok(())
}
