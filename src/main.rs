//! BizPulse - business health assessments from CRM, analytics and support data
//!
//! Routes a free-text request to an analysis routine, gathers metrics from
//! every source the routine needs in parallel, scores overall business
//! health, and writes a narrative report generated with a local Ollama model.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime or configuration error
//!   2 - Report carries warnings and --strict was given

mod analysis;
mod cli;
mod config;
mod engine;
mod error;
mod models;
mod narrative;
mod report;
mod router;
mod routines;
mod sources;

use analysis::{Aggregator, HealthScorer};
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{Args, OutputFormat};
use config::Config;
use engine::RoutineEngine;
use indicatif::{ProgressBar, ProgressStyle};
use models::Warning;
use narrative::OllamaNarrator;
use report::generator::{generate_snapshot_markdown, write_report};
use report::{generate_json_report, generate_markdown_report, ReportMetadata};
use routines::RoutineCatalog;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration before logging so `[general] verbose` applies
    let config = match load_config(&args) {
        Ok(mut config) => {
            config.merge_with_args(&args);
            config
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(config.log_level(&args));

    info!("BizPulse v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .bizpulse.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(config::CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            config::CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", config::CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", config::CONFIG_FILE);
    println!("   Edit it to customize sources, scoring targets, routing rules, and more.");
    Ok(())
}

/// Initialize logging at the given level.
///
/// Logs go to stderr so a report written to stdout stays clean.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete workflow. Returns the process exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    config.validate()?;

    let catalog = RoutineCatalog::standard().context("Built-in routine catalog is invalid")?;
    let router = config.router();
    let request = args.request_text();

    // Handle --dry-run: show the plan and exit
    if args.dry_run {
        return handle_dry_run(&config, &catalog, &router, &args);
    }

    let sources = config.build_sources()?;
    let aggregator = Aggregator::new(sources, config.gather_settings());
    let scorer = HealthScorer::new(config.scoring.clone())?;
    let narrator = Arc::new(OllamaNarrator::new(config.narrator_config())?);

    let engine = RoutineEngine::new(
        catalog,
        router,
        aggregator,
        scorer,
        narrator,
        config.engine_settings(),
    )?;

    if !args.snapshot {
        eprintln!("📊 Model: {}", engine.narrator_model());
        eprintln!("   Ollama: {}", config.narrative.ollama_url);
    }

    let spinner = start_spinner(&args, "Gathering metrics...");

    let (content, warnings) = if args.snapshot {
        let routine = args
            .routine
            .unwrap_or_else(|| engine.classify(&request));
        let snapshot = engine.snapshot(routine).await?;
        spinner.finish_and_clear();

        let title = engine.catalog().get(snapshot.routine)?.title;
        eprintln!("📊 {} ({})", title, snapshot.routine);

        let metadata = report_metadata(title, "none", start_time);
        let content = match config.general.default_format {
            OutputFormat::Json => generate_json_report(&snapshot)?,
            OutputFormat::Markdown => generate_snapshot_markdown(&snapshot, &metadata),
        };
        (content, snapshot.warnings)
    } else {
        let envelope = match args.routine {
            Some(routine) => engine.run(routine, &request).await?,
            None => engine.handle_request(&request).await?,
        };
        spinner.finish_and_clear();

        let title = engine.catalog().get(envelope.routine)?.title;
        eprintln!("📊 {} ({})", title, envelope.routine);

        let metadata = report_metadata(title, engine.narrator_model(), start_time);
        let content = match config.general.default_format {
            OutputFormat::Json => generate_json_report(&envelope)?,
            OutputFormat::Markdown => generate_markdown_report(&envelope, &metadata),
        };
        (content, envelope.warnings)
    };

    // Write the report
    match config.general.output {
        Some(ref path) => {
            let path = std::path::Path::new(path);
            write_report(&content, path)?;
            eprintln!("\n✅ Report saved to: {}", path.display());
        }
        None => println!("{}", content),
    }

    print_warning_summary(&warnings);
    eprintln!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());

    if args.strict && !warnings.is_empty() {
        eprintln!(
            "\n⛔ Report has {} warning(s). Failing (exit code 2).",
            warnings.len()
        );
        return Ok(2);
    }

    Ok(0)
}

fn report_metadata(title: &str, model: &str, start_time: Instant) -> ReportMetadata {
    ReportMetadata {
        title: title.to_string(),
        generated_at: Utc::now(),
        model_used: model.to_string(),
        duration_seconds: start_time.elapsed().as_secs_f64(),
    }
}

/// Spinner on stderr while the routine runs. Hidden in quiet mode.
fn start_spinner(args: &Args, message: &str) -> ProgressBar {
    if args.quiet {
        return ProgressBar::hidden();
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn print_warning_summary(warnings: &[Warning]) {
    if warnings.is_empty() {
        eprintln!("\n🟢 All sources reported normally.");
        return;
    }

    eprintln!("\n⚠️  {} warning(s):", warnings.len());
    for warning in warnings {
        eprintln!("   - {} ({}): {}", warning.reason, warning.source, warning.detail);
    }
}

/// Handle --dry-run: classify, print the plan, exit.
fn handle_dry_run(
    config: &Config,
    catalog: &RoutineCatalog,
    router: &router::Router,
    args: &Args,
) -> Result<i32> {
    println!("\n🔍 Dry run: no sources or models will be called\n");

    let routine = match args.routine {
        Some(routine) => {
            println!("   Routine: {} (from --routine)", routine);
            routine
        }
        None => {
            let classification = router.explain(&args.request_text());
            match classification.matched {
                Some(ref keyword) => println!(
                    "   Routine: {} (matched '{}')",
                    classification.routine, keyword
                ),
                None => println!("   Routine: {} (default)", classification.routine),
            }
            classification.routine
        }
    };

    let spec = catalog.get(routine)?;
    let params =
        sources::FetchParams::window(Utc::now().date_naive(), spec.window_days, config.sources.limit);

    println!("   Title: {}", spec.title);
    println!(
        "   Window: {} to {} ({} days, limit {})",
        params.from_iso(),
        params.to_iso(),
        spec.window_days,
        params.limit
    );
    println!("   Source mode: {:?}", config.sources.mode);

    let gather = config.gather_settings();
    println!("\n   Sources:");
    for source in &spec.required_sources {
        let fields: Vec<String> = spec
            .required_fields
            .iter()
            .filter(|f| sources::source_of(f.name) == Some(*source))
            .map(|f| {
                if f.optional {
                    format!("{}?", f.name)
                } else {
                    f.name.to_string()
                }
            })
            .collect();
        println!(
            "     📡 {} ({}s): {}",
            source,
            gather.timeout_for(*source).as_secs(),
            fields.join(", ")
        );
    }

    if !spec.scoring_dimensions.is_empty() {
        println!("\n   Scoring:");
        for dimension in &spec.scoring_dimensions {
            let cfg = config.scoring.dimension(*dimension);
            println!(
                "     📐 {} (weight {}, target {})",
                dimension, cfg.weight, cfg.target
            );
        }
    }

    println!("\n✅ Dry run complete. No data was fetched.");
    Ok(0)
}

/// Load configuration from file or use defaults.
///
/// Runs before logging is installed, so problems go straight to stderr.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load config: {:#}. Using defaults.", e);
            Ok(Config::default())
        }
    }
}
