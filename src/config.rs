//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.bizpulse.toml` files, and turns the merged configuration into the
//! runtime pieces the engine is built from.

use crate::analysis::{GatherSettings, ScoringConfig};
use crate::cli::{Args, OutputFormat};
use crate::engine::EngineSettings;
use crate::models::{RoutineId, SourceId};
use crate::narrative::{NarratorConfig, DEFAULT_FALLBACK};
use crate::router::{default_rules, Router, RoutingRule};
use crate::sources::analytics::AnalyticsSettings;
use crate::sources::crm::CrmSettings;
use crate::sources::{AnalyticsSource, CrmSource, FixtureSource, SourceSet, SupportExportSource};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".bizpulse.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Narrative service settings.
    #[serde(default)]
    pub narrative: NarrativeConfig,

    /// Metric source settings.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Health score weights and targets.
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Request routing rules.
    #[serde(default)]
    pub routing: RoutingConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Report file path. Stdout when unset.
    #[serde(default)]
    pub output: Option<String>,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Report format when `--format` is not given.
    #[serde(default)]
    pub default_format: OutputFormat,
}

/// Narrative service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeConfig {
    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Overrides every routine's temperature when set.
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Request timeout in seconds.
    #[serde(default = "default_narrative_timeout")]
    pub timeout_seconds: u64,

    /// Text used when the narrative cannot be generated.
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            ollama_url: default_ollama_url(),
            model: default_model(),
            temperature: None,
            timeout_seconds: default_narrative_timeout(),
            fallback: default_fallback(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_narrative_timeout() -> u64 {
    120
}

fn default_fallback() -> String {
    DEFAULT_FALLBACK.to_string()
}

/// Where metric data comes from.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Bundled or file-based sample data
    #[default]
    Fixture,
    /// Live CRM, analytics and support-export sources
    Live,
}

/// Metric source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default)]
    pub mode: SourceMode,

    /// Directory of `<source>.json` fixtures. Built-in samples when unset.
    #[serde(default)]
    pub fixture_dir: Option<String>,

    /// Maximum rows per list call.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Mark snapshots older than this as stale.
    #[serde(default)]
    pub stale_after_hours: Option<u64>,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub crm: CrmConfig,

    #[serde(default)]
    pub analytics: AnalyticsConfig,

    #[serde(default)]
    pub support: SupportConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::default(),
            fixture_dir: None,
            limit: default_limit(),
            stale_after_hours: None,
            timeouts: TimeoutsConfig::default(),
            crm: CrmConfig::default(),
            analytics: AnalyticsConfig::default(),
            support: SupportConfig::default(),
        }
    }
}

fn default_limit() -> u32 {
    100
}

/// Per-source fetch timeouts in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_source_timeout")]
    pub crm: u64,
    #[serde(default = "default_source_timeout")]
    pub analytics: u64,
    #[serde(default = "default_source_timeout")]
    pub support: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            crm: default_source_timeout(),
            analytics: default_source_timeout(),
            support: default_source_timeout(),
        }
    }
}

impl TimeoutsConfig {
    fn set_all(&mut self, seconds: u64) {
        self.crm = seconds;
        self.analytics = seconds;
        self.support = seconds;
    }
}

fn default_source_timeout() -> u64 {
    10
}

fn stale_after(hours: u64) -> Option<chrono::Duration> {
    i64::try_from(hours).ok().and_then(chrono::Duration::try_hours)
}

/// CRM API settings. The key itself is read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    #[serde(default = "default_crm_url")]
    pub base_url: String,
    #[serde(default = "default_crm_key_env")]
    pub api_key_env: String,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: default_crm_url(),
            api_key_env: default_crm_key_env(),
        }
    }
}

fn default_crm_url() -> String {
    "https://api.hubapi.com".to_string()
}

fn default_crm_key_env() -> String {
    "HUBSPOT_API_KEY".to_string()
}

/// Analytics API settings. The secret itself is read from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    #[serde(default = "default_analytics_url")]
    pub base_url: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_analytics_secret_env")]
    pub api_secret_env: String,
    #[serde(default = "default_active_event")]
    pub active_event: String,
    #[serde(default = "default_retention_event")]
    pub retention_event: String,
    #[serde(default)]
    pub funnel_id: Option<u64>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            base_url: default_analytics_url(),
            project_id: String::new(),
            api_secret_env: default_analytics_secret_env(),
            active_event: default_active_event(),
            retention_event: default_retention_event(),
            funnel_id: None,
        }
    }
}

fn default_analytics_url() -> String {
    "https://mixpanel.com/api/2.0".to_string()
}

fn default_analytics_secret_env() -> String {
    "MIXPANEL_API_SECRET".to_string()
}

fn default_active_event() -> String {
    "user_login".to_string()
}

fn default_retention_event() -> String {
    "trial_started".to_string()
}

/// Support export settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportConfig {
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
}

impl Default for SupportConfig {
    fn default() -> Self {
        Self {
            export_dir: default_export_dir(),
        }
    }
}

fn default_export_dir() -> String {
    "exports/support".to_string()
}

/// Routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Routine used when no rule matches.
    #[serde(default = "default_routine")]
    pub default: RoutineId,

    /// Rules in priority order.
    #[serde(default = "default_rules")]
    pub rules: Vec<RoutingRule>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            default: default_routine(),
            rules: default_rules(),
        }
    }
}

fn default_routine() -> RoutineId {
    RoutineId::Growth
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were actually given.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref model) = args.model {
            self.narrative.model = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.narrative.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.narrative.timeout_seconds = timeout;
        }

        if let Some(mode) = args.source_mode {
            self.sources.mode = mode;
        }
        if let Some(ref dir) = args.fixtures {
            self.sources.fixture_dir = Some(dir.display().to_string());
        }
        if let Some(timeout) = args.source_timeout {
            self.sources.timeouts.set_all(timeout);
        }

        if let Some(format) = args.format {
            self.general.default_format = format;
        }
        if let Some(ref output) = args.output {
            self.general.output = Some(output.display().to_string());
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.scoring
            .validate()
            .context("Invalid [scoring] section")?;

        if self.sources.limit == 0 {
            bail!("sources.limit must be at least 1");
        }
        if self.narrative.timeout_seconds == 0 {
            bail!("narrative.timeout_seconds must be at least 1");
        }
        for (id, seconds) in self.source_timeouts() {
            if seconds == 0 {
                bail!("sources.timeouts.{} must be at least 1", id);
            }
        }
        if let Some(hours) = self.sources.stale_after_hours {
            if stale_after(hours).is_none() {
                bail!("sources.stale_after_hours is out of range: {}", hours);
            }
        }

        Ok(())
    }

    fn source_timeouts(&self) -> [(SourceId, u64); 3] {
        [
            (SourceId::Crm, self.sources.timeouts.crm),
            (SourceId::Analytics, self.sources.timeouts.analytics),
            (SourceId::Support, self.sources.timeouts.support),
        ]
    }

    /// Aggregator settings from the `[sources]` section.
    pub fn gather_settings(&self) -> GatherSettings {
        let timeouts: BTreeMap<SourceId, Duration> = self
            .source_timeouts()
            .into_iter()
            .map(|(id, secs)| (id, Duration::from_secs(secs)))
            .collect();

        GatherSettings {
            timeouts,
            default_timeout: Duration::from_secs(default_source_timeout()),
            stale_after: self.sources.stale_after_hours.and_then(stale_after),
        }
    }

    pub fn narrator_config(&self) -> NarratorConfig {
        NarratorConfig {
            ollama_url: self.narrative.ollama_url.clone(),
            model_name: self.narrative.model.clone(),
            temperature: self.narrative.temperature,
            timeout_seconds: self.narrative.timeout_seconds,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            // Outer bound stays above the HTTP client timeout.
            narrative_timeout: Duration::from_secs(self.narrative.timeout_seconds + 5),
            fallback: self.narrative.fallback.clone(),
            limit: self.sources.limit,
            filter: None,
        }
    }

    /// Log level for this run. `--quiet` wins over a verbose config file.
    pub fn log_level(&self, args: &Args) -> tracing::Level {
        if self.general.verbose && !args.quiet {
            tracing::Level::DEBUG
        } else {
            args.log_level()
        }
    }

    pub fn router(&self) -> Router {
        Router::new(&self.routing.rules, self.routing.default)
    }

    /// Build the source set for the configured mode.
    ///
    /// In live mode a source whose credentials are missing is skipped with a
    /// warning; its fields then surface as unavailable.
    pub fn build_sources(&self) -> Result<SourceSet> {
        let mut sources = SourceSet::new();

        match self.sources.mode {
            SourceMode::Fixture => {
                let dir = self.sources.fixture_dir.as_deref().map(PathBuf::from);
                for id in SourceId::METRIC_SOURCES {
                    let fixture = match dir {
                        Some(ref dir) => FixtureSource::load(dir, id)?,
                        None => FixtureSource::sample(id),
                    };
                    if let Some(fixture) = fixture {
                        sources.register(Arc::new(fixture))?;
                    }
                }
                info!("Using fixture sources");
            }
            SourceMode::Live => {
                let gather = self.gather_settings();

                match std::env::var(&self.sources.crm.api_key_env) {
                    Ok(api_key) if !api_key.is_empty() => {
                        sources.register(Arc::new(CrmSource::new(CrmSettings {
                            base_url: self.sources.crm.base_url.clone(),
                            api_key,
                            timeout: gather.timeout_for(SourceId::Crm),
                        })?))?;
                    }
                    _ => warn!(
                        "{} is not set; CRM metrics will be unavailable",
                        self.sources.crm.api_key_env
                    ),
                }

                let analytics = &self.sources.analytics;
                match std::env::var(&analytics.api_secret_env) {
                    Ok(api_secret) if !api_secret.is_empty() && !analytics.project_id.is_empty() => {
                        sources.register(Arc::new(AnalyticsSource::new(AnalyticsSettings {
                            base_url: analytics.base_url.clone(),
                            project_id: analytics.project_id.clone(),
                            api_secret,
                            active_event: analytics.active_event.clone(),
                            retention_event: analytics.retention_event.clone(),
                            funnel_id: analytics.funnel_id,
                            timeout: gather.timeout_for(SourceId::Analytics),
                        })?))?;
                    }
                    _ => warn!(
                        "Analytics project or {} is not set; analytics metrics will be unavailable",
                        analytics.api_secret_env
                    ),
                }

                sources.register(Arc::new(SupportExportSource::new(PathBuf::from(
                    &self.sources.support.export_dir,
                ))))?;
                info!("Using live sources: {:?}", sources.ids());
            }
        }

        Ok(sources)
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
