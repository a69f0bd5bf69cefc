//! ChatRAG CLI
//!
//! Load chat exports into a vector store and ask questions about them.

mod markdown;

use anyhow::{Context, Result};
use chatrag_agents::{EmbeddingClient, OllamaClient, Pipeline, RagConfig};
use chatrag_core::{questions_from_lines, QueryOutcome, QuestionSet};
use chatrag_db::{init_memory, init_persistent, Repository};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

/// ChatRAG - ask questions about your chat history
#[derive(Parser)]
#[command(name = "chatrag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Database path (defaults to ~/.chatrag/data)
    #[arg(short, long, global = true)]
    db_path: Option<PathBuf>,

    /// Use in-memory database (for testing)
    #[arg(long, global = true)]
    memory: bool,

    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Collection name
    #[arg(short, long, global = true)]
    collection: Option<String>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, env = "CHATRAG_LOG_FILE")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a chat export into a collection
    Load {
        /// Path to the JSON export (Telegram `result.json` or a message list)
        path: PathBuf,

        /// Messages per embedding batch
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Append to the collection instead of replacing it
        #[arg(long)]
        no_reset: bool,

        /// Batches embedded in parallel
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// Answer one question
    Query {
        /// Question to answer
        question: String,

        #[command(flatten)]
        options: QueryOptions,

        /// Save the answer as Markdown instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Answer every question in a file (one per line)
    Batch {
        /// Questions file
        questions_file: PathBuf,

        #[command(flatten)]
        options: QueryOptions,

        /// Markdown report to append to
        #[arg(short, long, default_value = "chat_analysis_results.md")]
        output: PathBuf,
    },

    /// Run a predefined question set from the queries directory
    Ask {
        /// Question set name (file stem); prompts for one when omitted
        #[arg(short, long)]
        set: Option<String>,

        /// Directory holding question set TOML files
        #[arg(long, default_value = "queries")]
        queries_dir: PathBuf,

        /// Directory for the results file
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,

        #[command(flatten)]
        options: QueryOptions,
    },

    /// Show collection status
    Check {
        /// Print the status as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show a stored message by id
    Show {
        /// Message id from the export
        id: String,
    },
}

#[derive(clap::Args)]
struct QueryOptions {
    /// Ollama model name
    #[arg(short, long)]
    model: Option<String>,

    /// Messages retrieved as context
    #[arg(short = 'k', long)]
    top_k: Option<usize>,

    /// Neighbouring messages added around each hit
    #[arg(long)]
    context_window: Option<usize>,
}

impl QueryOptions {
    fn apply(&self, config: &mut RagConfig) {
        if let Some(model) = &self.model {
            config.generation.model = model.clone();
        }
        if let Some(top_k) = self.top_k {
            config.top_k = top_k;
        }
        if let Some(window) = self.context_window {
            config.context_window = window;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = init_logging(cli.verbose, cli.log_file.as_deref())?;

    let mut config = RagConfig::from_env().context("Invalid environment configuration")?;
    if let Some(path) = &cli.config {
        config = config.merge_file(path)?;
    }
    if let Some(path) = &cli.db_path {
        config.db_path = path.clone();
    }
    if let Some(collection) = &cli.collection {
        config.collection = collection.clone();
    }
    match &cli.command {
        Commands::Load {
            batch_size,
            concurrency,
            ..
        } => {
            if let Some(size) = batch_size {
                config.batch_size = *size;
            }
            if let Some(n) = concurrency {
                config.index_concurrency = *n;
            }
        }
        Commands::Query { options, .. }
        | Commands::Batch { options, .. }
        | Commands::Ask { options, .. } => options.apply(&mut config),
        Commands::Check { .. } | Commands::Show { .. } => {}
    }

    let db = if cli.memory {
        info!("Using in-memory database");
        init_memory().await?
    } else {
        std::fs::create_dir_all(&config.db_path).with_context(|| {
            format!("Failed to create database directory {}", config.db_path.display())
        })?;
        info!("Using database at: {}", config.db_path.display());
        init_persistent(&config.db_path).await?
    };

    let store = Arc::new(Repository::new(db));
    let embedder = Arc::new(EmbeddingClient::new(config.embedding.clone()));
    let model = Arc::new(OllamaClient::new(config.generation.clone()));

    // Check inference services only when needed
    let needs_embedder = !matches!(
        cli.command,
        Commands::Check { .. } | Commands::Show { .. }
    );
    let needs_model = matches!(
        cli.command,
        Commands::Query { .. } | Commands::Batch { .. } | Commands::Ask { .. }
    );

    if needs_embedder && !embedder.health().await.unwrap_or(false) {
        eprintln!("Error: embeddings service is not reachable.");
        eprintln!("  Embeddings: {}", embedder.base_url());
        anyhow::bail!("Embeddings service unavailable");
    }
    if needs_model && !model.health().await.unwrap_or(false) {
        eprintln!("Error: generation service is not reachable.");
        eprintln!("  Ollama: {}", model.base_url());
        anyhow::bail!("Generation service unavailable");
    }

    let pipeline = Pipeline::new(&config, embedder, store, model);
    let cancel = cancel_on_ctrl_c();

    // Execute command
    match cli.command {
        Commands::Load { path, no_reset, .. } => {
            cmd_load(&pipeline, &config, path, !no_reset, &cancel).await?;
        }
        Commands::Query {
            question, output, ..
        } => {
            cmd_query(&pipeline, &config, question, output).await?;
        }
        Commands::Batch {
            questions_file,
            output,
            ..
        } => {
            cmd_batch(&pipeline, &config, questions_file, output, &cancel).await?;
        }
        Commands::Ask {
            set,
            queries_dir,
            output_dir,
            ..
        } => {
            cmd_ask(&pipeline, &config, set, queries_dir, output_dir, &cancel).await?;
        }
        Commands::Check { json } => {
            cmd_check(&pipeline, &config, json).await?;
        }
        Commands::Show { id } => {
            cmd_show(&pipeline, &config, id).await?;
        }
    }

    Ok(())
}

/// Console logging on stderr, plus an optional plain-text log file
fn init_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Invalid log file path: {}", path.display()))?;
            std::fs::create_dir_all(directory)?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}

/// Ctrl-C stops batch work at the next batch or question boundary
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; finishing in-flight work");
            token.cancel();
        }
    });
    cancel
}

async fn cmd_load(
    pipeline: &Pipeline,
    config: &RagConfig,
    path: PathBuf,
    reset: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    let report = pipeline
        .load(&path, &config.collection, config.batch_size, reset, cancel)
        .await
        .with_context(|| format!("Failed to load {}", path.display()))?;

    println!(
        "✓ Loaded {}/{} messages into {} ({} batches, {} failed)",
        report.total_loaded,
        report.total_input,
        config.collection,
        report.batches_attempted,
        report.batches_failed
    );
    for failure in &report.failures {
        println!("  • {}: {}", failure.range, failure.error);
    }

    if report.cancelled {
        anyhow::bail!("Load cancelled; the collection is partially loaded");
    }
    if report.batches_failed > 0 {
        anyhow::bail!(
            "{} of {} batches failed",
            report.batches_failed,
            report.batches_attempted
        );
    }
    Ok(())
}

async fn cmd_query(
    pipeline: &Pipeline,
    config: &RagConfig,
    question: String,
    output: Option<PathBuf>,
) -> Result<()> {
    let result = pipeline
        .query(&question, &config.collection, config.top_k)
        .await
        .with_context(|| format!("Failed to answer: {}", question))?;

    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, markdown::answer_document(&result))
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("✓ Answer saved to {}", path.display());
        }
        None => {
            let rule = "=".repeat(80);
            println!("\n{}", rule);
            println!("Question: {}", result.question);
            println!("{}", rule);
            println!("Answer: {}", result.answer);
            println!("{}", rule);
            println!("Processing time: {:.2} seconds", result.elapsed_seconds);
            println!("Relevant messages: {}", result.relevant_count);
            println!("{}\n", rule);
        }
    }
    Ok(())
}

async fn cmd_batch(
    pipeline: &Pipeline,
    config: &RagConfig,
    questions_file: PathBuf,
    output: PathBuf,
    cancel: &CancellationToken,
) -> Result<()> {
    let content = std::fs::read_to_string(&questions_file)
        .with_context(|| format!("Failed to read file: {}", questions_file.display()))?;
    let questions = questions_from_lines(&content);
    if questions.is_empty() {
        anyhow::bail!("No questions in {}", questions_file.display());
    }
    info!("Loaded {} questions from {}", questions.len(), questions_file.display());

    let outcomes = run_questions(pipeline, config, &questions, cancel).await;
    markdown::append_batch_report(&output, &outcomes)?;
    println!("✓ Results saved to {}", output.display());
    Ok(())
}

async fn cmd_ask(
    pipeline: &Pipeline,
    config: &RagConfig,
    set: Option<String>,
    queries_dir: PathBuf,
    output_dir: PathBuf,
    cancel: &CancellationToken,
) -> Result<()> {
    let sets = load_question_sets(&queries_dir)?;
    if sets.is_empty() {
        anyhow::bail!("No question sets found in {}", queries_dir.display());
    }

    let (name, question_set) = match set {
        Some(name) => sets
            .into_iter()
            .find(|(stem, _)| *stem == name)
            .with_context(|| format!("Question set not found: {}", name))?,
        None => match choose_question_set(sets)? {
            Some(selected) => selected,
            None => return Ok(()),
        },
    };

    let outcomes = run_questions(pipeline, config, &question_set.questions, cancel).await;

    let date = chrono::Local::now().format("%Y-%m-%d").to_string();
    std::fs::create_dir_all(&output_dir)?;
    let path = output_dir.join(format!("{}_results_{}.md", name, date));
    std::fs::write(
        &path,
        markdown::question_set_document(&question_set, &date, &outcomes),
    )
    .with_context(|| format!("Failed to write {}", path.display()))?;

    let answered = outcomes.iter().filter(|o| o.is_answered()).count();
    println!(
        "✓ Answered {}/{} questions. Results saved to {}",
        answered,
        question_set.questions.len(),
        path.display()
    );
    Ok(())
}

async fn run_questions(
    pipeline: &Pipeline,
    config: &RagConfig,
    questions: &[String],
    cancel: &CancellationToken,
) -> Vec<QueryOutcome> {
    let outcomes = pipeline
        .batch_query(questions, &config.collection, config.top_k, cancel)
        .await;

    for (i, outcome) in outcomes.iter().enumerate() {
        let preview: String = outcome.question().chars().take(50).collect();
        match outcome {
            QueryOutcome::Answered(result) => println!(
                "Processed {}/{}: '{}' ({:.2}s)",
                i + 1,
                questions.len(),
                preview,
                result.elapsed_seconds
            ),
            QueryOutcome::Failed(failure) => println!(
                "Failed {}/{}: '{}' ({})",
                i + 1,
                questions.len(),
                preview,
                failure.error
            ),
        }
    }
    outcomes
}

/// Question sets in `dir`, sorted by file stem
fn load_question_sets(dir: &Path) -> Result<Vec<(String, QuestionSet)>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Queries folder not found: {}", dir.display()))?;

    let mut sets = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match QuestionSet::from_toml(&source) {
            Ok(set) => sets.push((stem.to_string(), set)),
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }

    sets.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(sets)
}

fn choose_question_set(
    sets: Vec<(String, QuestionSet)>,
) -> Result<Option<(String, QuestionSet)>> {
    println!("\nAvailable question sets:");
    for (i, (name, set)) in sets.iter().enumerate() {
        println!("{}. {} ({})", i + 1, set.title, name);
        if !set.description.is_empty() {
            println!("   {}", set.description);
        }
        println!();
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        print!("Select a question set (number) or 'q' to quit: ");
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(None); // EOF
        }
        let choice = line.trim();
        if choice.eq_ignore_ascii_case("q") {
            return Ok(None);
        }

        match choice.parse::<usize>() {
            Ok(n) if (1..=sets.len()).contains(&n) => {
                return Ok(sets.into_iter().nth(n - 1));
            }
            Ok(_) => println!("Please enter a number between 1 and {}", sets.len()),
            Err(_) => println!("Please enter a valid number"),
        }
    }
}

async fn cmd_check(pipeline: &Pipeline, config: &RagConfig, json: bool) -> Result<()> {
    let status = pipeline.check(&config.collection).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    println!("Collection: {}", status.name);
    println!("State: {}", status.state);
    println!("Chunks: {}", status.count());
    if let Some(info) = &status.info {
        match info.dimension {
            Some(dimension) => println!("Dimension: {}", dimension),
            None => println!("Dimension: (not set)"),
        }
        println!("Embedding model: {}", info.embedding_model);
        println!("Created: {}", info.created_at);
    }
    Ok(())
}

async fn cmd_show(pipeline: &Pipeline, config: &RagConfig, id: String) -> Result<()> {
    let chunk = pipeline
        .show(&config.collection, &id)
        .await?
        .with_context(|| format!("Message {} not found in {}", id, config.collection))?;

    println!("# Message {}", chunk.id);
    println!("From: {}", chunk.metadata.sender);
    println!("Date: {}", chunk.metadata.timestamp);
    if let Some(reply_to) = &chunk.metadata.reply_to {
        println!("Reply to: {}", reply_to);
    }
    println!("\n{}", chunk.document);
    Ok(())
}
