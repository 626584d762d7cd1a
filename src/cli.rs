//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::SourceMode;
use crate::models::RoutineId;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// BizPulse - business health assessments for SaaS leadership
///
/// Pulls CRM, product-analytics and support data, scores overall business
/// health, and writes a narrative report with recommendations using a local
/// Ollama model.
///
/// Examples:
///   bizpulse "what are our growth opportunities?"
///   bizpulse --routine operations --format json --output weekly.json
///   bizpulse --snapshot --routine growth
///   bizpulse "prepare the board update" --source-mode live
///   bizpulse "weekly kpi report" --dry-run
///   bizpulse --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Free-text request, routed to a routine by keyword
    #[arg(value_name = "REQUEST")]
    pub request: Vec<String>,

    /// Run this routine instead of routing the request
    #[arg(long, value_name = "ROUTINE", value_parser = parse_routine)]
    pub routine: Option<RoutineId>,

    /// Output format (markdown, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Write the report to this file instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .bizpulse.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Where metric data comes from
    #[arg(long, value_name = "MODE", env = "BIZPULSE_SOURCE_MODE")]
    pub source_mode: Option<SourceMode>,

    /// Directory of fixture JSON files (crm.json, analytics.json, support.json)
    #[arg(long, value_name = "DIR")]
    pub fixtures: Option<PathBuf>,

    /// Ollama model used for the narrative
    #[arg(short, long, env = "BIZPULSE_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Narrative request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Timeout for each metric source fetch, in seconds
    #[arg(long, value_name = "SECS")]
    pub source_timeout: Option<u64>,

    /// Gather and score only; skip the narrative
    #[arg(long)]
    pub snapshot: bool,

    /// Dry run: classify the request and show the plan without fetching
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 when the report carries warnings
    ///
    /// Useful for scheduled runs that should alert on degraded data.
    #[arg(long)]
    pub strict: bool,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .bizpulse.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

fn parse_routine(s: &str) -> Result<RoutineId, String> {
    s.parse().map_err(|e: crate::error::EngineError| e.to_string())
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// The request text, words joined with spaces.
    pub fn request_text(&self) -> String {
        self.request.join(" ").trim().to_string()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.request_text().is_empty() && !self.snapshot && self.routine.is_none() {
            return Err("A request is required unless --snapshot or --routine is given".to_string());
        }

        // Validate Ollama URL format
        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        // Validate timeouts if provided
        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }
        if let Some(timeout) = self.source_timeout {
            if timeout == 0 {
                return Err("Source timeout must be at least 1 second".to_string());
            }
        }

        // Validate fixture directory if provided
        if let Some(ref dir) = self.fixtures {
            if !dir.is_dir() {
                return Err(format!("Fixture directory does not exist: {}", dir.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
