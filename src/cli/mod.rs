//! Command-line interface for podscribe.
//!
//! Provides commands for submitting audio, checking job status, listing a
//! user's jobs, injecting collaborator notifications, running the article
//! worker and re-driving stalled jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use crate::config;
use crate::core::DEFAULT_LIST_LIMIT;
use crate::domain::{
    ArticleNotification, ArticleOutcome, ArticleResult, Job, JobStatus, Notification, Owner,
    TranscriptionNotification, TranscriptionOutcome,
};
use crate::runtime::{handle_notification, Runtime};

/// Upper bound for `reconcile --stale-after-secs` (ten years)
const MAX_STALE_AFTER_SECS: i64 = 10 * 365 * 24 * 3600;

/// podscribe - turn recorded audio into written articles
#[derive(Parser, Debug)]
#[command(name = "podscribe")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Upload an audio file and start its job
    Submit {
        /// Audio file to submit
        file: PathBuf,

        /// Submitting user
        #[arg(long, env = "PODSCRIBE_USER_ID")]
        user_id: String,

        /// Contact address recorded on the job
        #[arg(long, env = "PODSCRIBE_USER_EMAIL", default_value = "")]
        user_email: String,

        /// Keep running until the article is done
        #[arg(short, long)]
        follow: bool,
    },

    /// Show a job
    Status {
        /// Job ID (UUID)
        job_id: String,
    },

    /// List a user's recent jobs
    Jobs {
        #[arg(long, env = "PODSCRIBE_USER_ID")]
        user_id: String,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value_t = DEFAULT_LIST_LIMIT)]
        limit: usize,
    },

    /// Show the recorded transitions of a job
    History {
        /// Job ID (UUID)
        job_id: String,
    },

    /// Deliver a collaborator outcome by hand
    Notify {
        #[command(subcommand)]
        command: NotifyCommands,
    },

    /// Run the article worker
    Work {
        /// Drain the queue once and exit
        #[arg(long)]
        once: bool,
    },

    /// Re-drive jobs stuck after transcription and report other stale jobs
    Reconcile {
        /// Jobs untouched for this long are considered stale
        #[arg(
            long,
            default_value = "900",
            value_parser = clap::value_parser!(i64).range(0..=MAX_STALE_AFTER_SECS)
        )]
        stale_after_secs: i64,
    },

    /// Show resolved configuration (debug)
    Config,
}

#[derive(Subcommand, Debug)]
pub enum NotifyCommands {
    /// Report the end of a transcription task
    Transcription {
        /// Engine task name
        #[arg(long)]
        task: String,

        #[arg(long, value_enum)]
        outcome: Outcome,

        /// Transcript key (defaults to the job's transcript location)
        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        reason: Option<String>,
    },

    /// Report the end of article generation
    Article {
        /// Job ID (UUID)
        #[arg(long)]
        job: String,

        #[arg(long, value_enum)]
        outcome: Outcome,

        /// JSON file with titre/introduction/article/conclusion
        #[arg(long, required_if_eq("outcome", "completed"))]
        result_file: Option<PathBuf>,

        #[arg(long)]
        reason: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Outcome {
    Completed,
    Failed,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Submit {
                file,
                user_id,
                user_email,
                follow,
            } => submit(file, user_id, user_email, follow).await,
            Commands::Status { job_id } => show_status(&job_id).await,
            Commands::Jobs { user_id, limit } => list_jobs(&user_id, limit).await,
            Commands::History { job_id } => show_history(&job_id).await,
            Commands::Notify { command } => notify(command).await,
            Commands::Work { once } => work(once).await,
            Commands::Reconcile { stale_after_secs } => reconcile(stale_after_secs).await,
            Commands::Config => show_config(),
        }
    }
}

fn open_runtime() -> Result<Runtime> {
    let cfg = config::config()?;
    Runtime::open(cfg.clone())
}

fn parse_job_id(job_id: &str) -> Result<Uuid> {
    Uuid::parse_str(job_id).with_context(|| format!("Invalid job ID: {}", job_id))
}

/// Upload, then stay up while the in-process collaborators work
async fn submit(file: PathBuf, user_id: String, user_email: String, follow: bool) -> Result<()> {
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .with_context(|| format!("Not a file: {}", file.display()))?;
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let runtime = open_runtime()?;
    let _pump = runtime.spawn_pump();

    let receipt = runtime
        .submissions
        .submit(&bytes, &file_name, Owner { user_id, user_email })
        .await?;

    println!("Job ID:      {}", receipt.job_id);
    println!("File:        {} ({} bytes)", receipt.file_name, receipt.file_size);
    println!("Status:      {}", receipt.status);

    let poll = runtime.config.client.poll_interval();

    // Whisper runs inside this process; wait for it before exiting
    let job = runtime
        .wait_for(receipt.job_id, poll, |status| status != JobStatus::Transcribing)
        .await?;

    let job = if follow && !job.status.is_terminal() {
        let worker = Arc::new(runtime.article_worker());
        let interval = runtime.config.article.worker_interval();
        let _worker = tokio::spawn(async move { worker.run(interval).await });

        runtime
            .wait_for(receipt.job_id, poll, |status| status.is_terminal())
            .await?
    } else {
        job
    };

    println!();
    print_job(&job);

    if job.status.is_failure() {
        std::process::exit(1);
    }
    Ok(())
}

async fn show_status(job_id: &str) -> Result<()> {
    let job_id = parse_job_id(job_id)?;
    let runtime = open_runtime()?;
    let job = runtime.status.get(job_id).await?;

    print_job(&job);
    Ok(())
}

fn print_job(job: &Job) {
    println!("Job ID:      {}", job.job_id);
    println!("User:        {} <{}>", job.user_id, job.user_email);
    println!("File:        {} ({} bytes)", job.file_name, job.file_size);
    println!("Status:      {}", job.status);
    println!("Task:        {}", job.transcription_task);
    println!("Created:     {}", job.created_at);
    println!("Updated:     {}", job.updated_at);
    if let Some(transcribed) = job.transcribed_at {
        println!("Transcribed: {}", transcribed);
    }
    if let Some(completed) = job.completed_at {
        println!("Completed:   {}", completed);
    }
    if let Some(error) = &job.error_message {
        println!("Error:       {}", error);
    }

    if !job.artifact_refs.is_empty() {
        println!("\nArtifacts:");
        for artifact in &job.artifact_refs {
            println!(
                "  {:<11} {} ({} bytes, sha256 {})",
                format!("{:?}", artifact.kind).to_lowercase(),
                artifact.key,
                artifact.size_bytes,
                &artifact.sha256[..artifact.sha256.len().min(12)]
            );
        }
    }

    if let Some(result) = &job.result {
        println!("\n{}", result.titre);
        println!("\n{}", result.introduction);
        println!("\n{}", result.article);
        println!("\n{}", result.conclusion);
    }
}

async fn list_jobs(user_id: &str, limit: usize) -> Result<()> {
    let runtime = open_runtime()?;
    let jobs = runtime.status.list_recent(user_id, limit).await?;

    if jobs.is_empty() {
        println!("No jobs found");
        return Ok(());
    }

    println!(
        "{:<38} {:<22} {:<30} {:<20}",
        "JOB ID", "STATUS", "FILE", "CREATED"
    );
    println!("{}", "-".repeat(110));

    for job in jobs {
        println!(
            "{:<38} {:<22} {:<30} {:<20}",
            job.job_id,
            job.status,
            truncate(&job.file_name, 30),
            job.created_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let mut out: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

async fn show_history(job_id: &str) -> Result<()> {
    let job_id = parse_job_id(job_id)?;
    let runtime = open_runtime()?;
    let events = runtime.journal.history(job_id).await?;

    if events.is_empty() {
        println!("No transitions recorded for {}", job_id);
        return Ok(());
    }

    for event in events {
        let from = event
            .from
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<22} -> {:<22} {}",
            event.timestamp.format("%Y-%m-%d %H:%M:%S"),
            from,
            event.to,
            event.summary
        );
        if let Some(error) = event.error {
            println!("{:>21}error: {}", "", error);
        }
    }

    Ok(())
}

async fn notify(command: NotifyCommands) -> Result<()> {
    let notification = match command {
        NotifyCommands::Transcription {
            task,
            outcome,
            location,
            reason,
        } => Notification::Transcription(TranscriptionNotification {
            task_name: task,
            outcome: match outcome {
                Outcome::Completed => TranscriptionOutcome::Completed { location },
                Outcome::Failed => TranscriptionOutcome::Failed { reason },
            },
        }),
        NotifyCommands::Article {
            job,
            outcome,
            result_file,
            reason,
        } => {
            let job_id = parse_job_id(&job)?;
            let outcome = match (outcome, result_file) {
                (Outcome::Completed, Some(path)) => ArticleOutcome::Completed {
                    result: read_result(&path).await?,
                    article: None,
                },
                (Outcome::Completed, None) => anyhow::bail!("--result-file is required"),
                (Outcome::Failed, _) => ArticleOutcome::Failed { reason },
            };
            Notification::Article(ArticleNotification { job_id, outcome })
        }
    };

    let runtime = open_runtime()?;
    match handle_notification(&runtime.controller, &notification).await? {
        Some(outcome) if outcome.is_applied() => println!("Applied: job is now {}", outcome.status()),
        Some(outcome) => println!("Not applied: job is {}", outcome.status()),
        None => println!("No matching job; notification dropped"),
    }

    Ok(())
}

async fn read_result(path: &Path) -> Result<ArticleResult> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse article result {}", path.display()))
}

async fn work(once: bool) -> Result<()> {
    let runtime = open_runtime()?;
    let worker = runtime.article_worker();
    worker.check_backend().await?;

    if once {
        let report = worker.drain().await?;
        println!(
            "Processed {} message(s): {} completed, {} failed, {} undelivered",
            report.processed(),
            report.completed,
            report.failed,
            report.undelivered
        );
        return Ok(());
    }

    let interval = runtime.config.article.worker_interval();
    eprintln!("Article worker running (every {:?}); Ctrl-C to stop", interval);
    tokio::select! {
        _ = worker.run(interval) => {}
        _ = tokio::signal::ctrl_c() => eprintln!("Stopping"),
    }
    Ok(())
}

async fn reconcile(stale_after_secs: i64) -> Result<()> {
    let runtime = open_runtime()?;
    let report = runtime
        .reconcile(chrono::Duration::seconds(stale_after_secs))
        .await?;

    for job_id in &report.redriven {
        println!("re-driven   {}", job_id);
    }
    for job_id in &report.stalled {
        println!("stalled     {}", job_id);
    }
    for job in &report.waiting {
        println!(
            "waiting     {} {} (since {})",
            job.job_id,
            job.status,
            job.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }
    if report.redriven.is_empty() && report.stalled.is_empty() && report.waiting.is_empty() {
        println!("No stale jobs");
    }

    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("podscribe configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home (engine state): {}", cfg.home.display());
    println!("  Storage (artifacts): {}", cfg.storage.display());
    println!("  Job database:        {}", cfg.database_path().display());
    println!("  Journal:             {}", cfg.journal_path().display());
    println!("  Article queue:       {}", cfg.queue_path().display());
    println!();
    println!("Upload:");
    println!("  Max size:         {} MB", cfg.upload.max_file_size_mb);
    println!("  Allowed patterns: {}", cfg.upload.allowed_patterns.join(", "));
    println!();
    println!("Transcription:");
    println!("  Task prefix: {}", cfg.transcription.task_prefix);
    println!("  Language:    {}", cfg.transcription.language);
    println!("  Whisper:     {} (model {})", cfg.transcription.whisper_path, cfg.transcription.model);
    println!();
    println!("Article:");
    println!("  Adapter:       {:?}", cfg.article.adapter);
    println!("  Action:        {}", cfg.article.action());
    println!("  Max tokens:    {}", cfg.article.max_tokens);
    println!("  Prompt chars:  {}", cfg.article.transcript_char_limit);
    println!("  Max attempts:  {}", cfg.article.retry.max_attempts);

    Ok(())
}
