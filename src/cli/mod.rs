//! Command-line interface for postflow.
//!
//! Provides commands for running the content pipeline against a URL,
//! inspecting the step topology, checking payloads against step schemas,
//! and showing the resolved configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::adapters::{FirecrawlScraper, GeminiGenerator, PromptLibrary};
use crate::config::Config;
use crate::core::{validate, EventBus, EventRecord, ShutdownOutcome, StepRegistry};
use crate::domain::payloads::SCRAPE_ARTICLE;
use crate::domain::{InvocationOutcome, ScrapeArticle};
use crate::steps::{pipeline_registry, Collaborators};

/// postflow - Event-driven article to social post pipeline
#[derive(Parser, Debug)]
#[command(name = "postflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scrape a URL and generate posts for every platform
    Run {
        /// Article URL
        url: String,

        /// Correlation id for the run (random if not provided)
        #[arg(long)]
        request_id: Option<String>,

        /// Maximum time to wait for the run to settle
        #[arg(short, long, default_value = "300")]
        wait_seconds: u64,
    },

    /// Show registered steps, their topics and topology warnings
    Topics,

    /// Check a JSON payload against every subscriber of a topic
    Validate {
        /// Topic the payload would be emitted on
        topic: String,

        /// JSON file holding the payload
        file: PathBuf,
    },

    /// Show resolved configuration (debug)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Run {
                url,
                request_id,
                wait_seconds,
            } => run_pipeline(&url, request_id, Duration::from_secs(wait_seconds)).await,
            Commands::Topics => show_topics(),
            Commands::Validate { topic, file } => validate_payload(&topic, &file),
            Commands::Config => show_config(),
        }
    }
}

/// Build the pipeline registry from configuration
fn build_registry(config: &Config) -> Result<StepRegistry> {
    let prompts = PromptLibrary::load_dir(&config.prompts_dir)?;
    let collaborators = Collaborators {
        scraper: Arc::new(FirecrawlScraper::from_config(&config.scraper)?),
        generator: Arc::new(GeminiGenerator::from_config(&config.generator)?),
    };
    pipeline_registry(&collaborators, &prompts)
}

/// Run the pipeline for one URL
async fn run_pipeline(url: &str, request_id: Option<String>, wait: Duration) -> Result<()> {
    let config = Config::load()?;
    config.require_credentials()?;

    let registry = build_registry(&config)?;
    registry.consistency_report().log();

    let bus = EventBus::start(registry, &config.bus);
    let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let payload = serde_json::to_value(ScrapeArticle {
        request_id: request_id.clone(),
        url: url.to_string(),
        timestamp: Utc::now().timestamp_millis(),
    })?;
    bus.emit(SCRAPE_ARTICLE, payload)?;

    eprintln!("Run {} started for {}", request_id, url);

    if tokio::time::timeout(wait, bus.wait_idle()).await.is_err() {
        warn!(
            request_id = %request_id,
            pending = bus.pending(),
            "Run did not settle in time"
        );
    }

    if bus.shutdown(config.bus.shutdown_grace()).await == ShutdownOutcome::Cancelled {
        eprintln!("Some invocations were cancelled during shutdown");
    }

    let records = bus.journal().for_correlation(&request_id);
    let terminal: Vec<&EventRecord> = records
        .iter()
        .filter(|r| bus.registry().subscribers_of(r.event.topic.as_str()).is_empty())
        .collect();

    for record in &terminal {
        println!("=== {} ===", record.event.topic);
        println!("{}", serde_json::to_string_pretty(&record.event.payload)?);
    }

    let mut failed = 0;
    for record in &records {
        for invocation in record.failures() {
            if let InvocationOutcome::Failed(reason) = &invocation.outcome {
                eprintln!(
                    "[{}] {} on '{}' failed: {}",
                    request_id, invocation.step, record.event.topic, reason
                );
            }
            failed += 1;
        }
    }

    if failed > 0 || terminal.is_empty() {
        eprintln!(
            "\n[Run {} finished with {} failure(s), {} post(s) generated]",
            request_id,
            failed,
            terminal.len()
        );
        std::process::exit(1);
    }

    eprintln!(
        "\n[Run {} completed: {} post(s) generated]",
        request_id,
        terminal.len()
    );
    Ok(())
}

/// Print the step topology
fn show_topics() -> Result<()> {
    let config = Config::load()?;
    let registry = build_registry(&config)?;

    println!("{:<20} {:<20} {:<40}", "STEP", "SCHEMA", "TOPICS");
    println!("{}", "-".repeat(80));
    for step in registry.steps() {
        let subscribes = join_topics(step.subscribes.iter().map(|t| t.as_str()));
        let emits = join_topics(step.emits.iter().map(|t| t.as_str()));
        println!(
            "{:<20} {:<20} {} -> {}",
            step.name, step.input_schema.name, subscribes, emits
        );
    }

    let report = registry.consistency_report();
    println!();
    for (step, topic) in &report.entry_points {
        println!("Entry point: {} (consumed by {})", topic, step);
    }
    for (step, topic) in &report.unconsumed {
        println!("Terminal:    {} (emitted by {})", topic, step);
    }
    for cycle in &report.cycles {
        println!(
            "Cycle:       {}",
            join_topics(cycle.iter().map(|t| t.as_str()))
        );
    }

    Ok(())
}

fn join_topics<'a>(topics: impl Iterator<Item = &'a str>) -> String {
    let joined = topics.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "-".to_string()
    } else {
        joined
    }
}

/// Validate a payload file against each subscriber's schema
fn validate_payload(topic: &str, file: &Path) -> Result<()> {
    let config = Config::load()?;
    let registry = build_registry(&config)?;

    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read payload file: {}", file.display()))?;
    let payload: Value = serde_json::from_str(&content)
        .with_context(|| format!("Payload is not valid JSON: {}", file.display()))?;

    let subscribers = registry.subscribers_of(topic);
    if subscribers.is_empty() {
        println!("No step subscribes to '{}'", topic);
        return Ok(());
    }

    let mut rejected = 0;
    for step in subscribers {
        match validate(&step.input_schema, &payload) {
            Ok(_) => println!("{:<20} ok ({})", step.name, step.input_schema.name),
            Err(e) => {
                rejected += 1;
                println!("{:<20} rejected ({})", step.name, e.schema);
                for violation in &e.violations {
                    println!("  - {}", violation);
                }
            }
        }
    }

    if rejected > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let config = Config::load()?;

    let status = |key: &Option<String>| if key.is_some() { "set" } else { "missing" };

    println!(
        "Config file: {}",
        config
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Credentials:");
    println!("  Firecrawl: {}", status(&config.scraper.api_key));
    println!("  Gemini:    {}", status(&config.generator.api_key));
    println!();
    print!("{}", serde_yaml::to_string(&config)?);

    Ok(())
}
