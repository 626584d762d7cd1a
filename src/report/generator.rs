//! Markdown and JSON report generation.
//!
//! Renders a [`ResponseEnvelope`] (or a [`HealthSnapshot`]) as a readable
//! Markdown report, or serializes it as JSON.

use crate::models::{
    FieldStatus, HealthScore, HealthSnapshot, MetricsBundle, ResponseEnvelope, Warning,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::Write;
use std::path::Path;

/// Context shown in the report header.
#[derive(Debug, Clone, Serialize)]
pub struct ReportMetadata {
    pub title: String,
    pub generated_at: DateTime<Utc>,
    pub model_used: String,
    pub duration_seconds: f64,
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(envelope: &ResponseEnvelope, metadata: &ReportMetadata) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {}\n\n", metadata.title));
    output.push_str(&generate_metadata_section(metadata, &envelope.routine.to_string()));
    output.push_str(&generate_score_section(envelope.score.as_ref()));
    output.push_str(&generate_metrics_section(&envelope.metrics));

    output.push_str("## Analysis\n\n");
    output.push_str(envelope.narrative.trim());
    output.push_str("\n\n");

    output.push_str(&generate_list_section("Recommendations", &envelope.recommendations));
    output.push_str(&generate_list_section("Next Actions", &envelope.next_actions));
    output.push_str(&generate_warnings_section(&envelope.warnings));
    output.push_str(&generate_footer());

    output
}

/// Generate a Markdown report for a snapshot (no narrative).
pub fn generate_snapshot_markdown(snapshot: &HealthSnapshot, metadata: &ReportMetadata) -> String {
    let mut output = String::new();

    output.push_str(&format!("# {} (Snapshot)\n\n", metadata.title));
    output.push_str(&generate_metadata_section(metadata, &snapshot.routine.to_string()));
    output.push_str(&generate_score_section(snapshot.score.as_ref()));
    output.push_str(&generate_metrics_section(&snapshot.metrics));
    output.push_str(&generate_warnings_section(&snapshot.warnings));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &ReportMetadata, routine: &str) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Routine:** {}\n", routine));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Model Used:** `{}`\n", metadata.model_used));
    section.push_str(&format!("- **Duration:** {:.1}s\n", metadata.duration_seconds));
    section.push('\n');

    section
}

fn score_badge(score: f64) -> &'static str {
    if score >= 75.0 {
        "🟢"
    } else if score >= 50.0 {
        "🟡"
    } else {
        "🔴"
    }
}

/// Generate the health score section.
fn generate_score_section(score: Option<&HealthScore>) -> String {
    let Some(score) = score else {
        return String::new();
    };

    let mut section = String::new();
    section.push_str("## Health Score\n\n");

    match score.composite {
        Some(composite) => section.push_str(&format!(
            "**Composite:** {} {:.1} / 100\n\n",
            score_badge(composite),
            composite
        )),
        None => {
            section.push_str("**Composite:** ⚪ Indeterminate (no dimension could be scored)\n\n");
            return section;
        }
    }

    section.push_str("| Dimension | Score |\n");
    section.push_str("|:---|:---:|\n");
    for (dimension, value) in &score.dimensions {
        section.push_str(&format!(
            "| {} | {} {:.1} |\n",
            dimension,
            score_badge(*value),
            value
        ));
    }
    section.push('\n');

    section
}

/// Generate the metrics table.
fn generate_metrics_section(metrics: &MetricsBundle) -> String {
    let mut section = String::new();

    section.push_str("## Metrics\n\n");

    if metrics.is_empty() {
        section.push_str("No metrics were requested.\n\n");
        return section;
    }

    section.push_str("| Metric | Value | Status | Source |\n");
    section.push_str("|:---|---:|:---:|:---|\n");

    for field in metrics.iter() {
        let value = field
            .value
            .as_ref()
            .map(|v| v.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        let status = match field.status {
            FieldStatus::Ok => "✅ ok",
            FieldStatus::Stale => "⏳ stale",
            FieldStatus::Unavailable => "❌ unavailable",
        };
        section.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            field.name, value, status, field.source
        ));
    }
    section.push('\n');

    section
}

/// Generate a numbered list section. Empty lists are rendered explicitly.
fn generate_list_section(title: &str, items: &[String]) -> String {
    let mut section = format!("## {}\n\n", title);

    if items.is_empty() {
        section.push_str("_None._\n\n");
        return section;
    }

    for (i, item) in items.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, item));
    }
    section.push('\n');

    section
}

/// Generate the warnings section.
fn generate_warnings_section(warnings: &[Warning]) -> String {
    if warnings.is_empty() {
        return String::new();
    }

    let mut section = String::new();
    section.push_str("## Warnings\n\n");

    for warning in warnings {
        section.push_str(&format!(
            "- ⚠️ **{}** ({}): {}\n",
            warning.reason, warning.source, warning.detail
        ));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str("*Report generated by BizPulse*\n");

    footer
}

/// Serialize any report payload as pretty JSON.
pub fn generate_json_report<T: Serialize>(payload: &T) -> Result<String> {
    serde_json::to_string_pretty(payload).map_err(Into::into)
}

/// Write report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create report file: {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write report: {}", path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DimensionId, MetricField, RoutineId, SourceId, WarningReason};
    use std::collections::{BTreeMap, BTreeSet};
    use tempfile::TempDir;

    fn metadata() -> ReportMetadata {
        ReportMetadata {
            title: "Weekly Operational Report".to_string(),
            generated_at: Utc::now(),
            model_used: "test-model".to_string(),
            duration_seconds: 1.5,
        }
    }

    fn envelope() -> ResponseEnvelope {
        ResponseEnvelope {
            routine: RoutineId::Operations,
            narrative: "Pipeline looks healthy.".to_string(),
            metrics: MetricsBundle::new(vec![
                MetricField::fetched("open_deals", SourceId::Crm, Some(3.0.into()), Utc::now(), false),
                MetricField::unavailable("conversations", SourceId::Support),
            ]),
            score: Some(HealthScore {
                composite: Some(62.5),
                dimensions: BTreeMap::from([(DimensionId::Pipeline, 62.5)]),
                inputs_used: BTreeSet::from(["pipeline_value".to_string()]),
            }),
            recommendations: vec![],
            next_actions: vec!["Review stalled deals".to_string()],
            warnings: vec![Warning::new(
                SourceId::Support,
                WarningReason::SourceUnavailable,
                "export directory not found",
            )],
        }
    }

    #[test]
    fn test_generate_markdown_report() {
        let markdown = generate_markdown_report(&envelope(), &metadata());

        assert!(markdown.contains("# Weekly Operational Report"));
        assert!(markdown.contains("- **Routine:** operations"));
        assert!(markdown.contains("🟡 62.5 / 100"));
        assert!(markdown.contains("| open_deals | 3 | ✅ ok | crm |"));
        assert!(markdown.contains("| conversations | n/a | ❌ unavailable | support |"));
        assert!(markdown.contains("## Recommendations\n\n_None._"));
        assert!(markdown.contains("1. Review stalled deals"));
        assert!(markdown.contains("**Source unavailable** (support)"));
    }

    #[test]
    fn test_indeterminate_score() {
        let section = generate_score_section(Some(&HealthScore::indeterminate()));
        assert!(section.contains("Indeterminate"));
        assert!(!section.contains("| Dimension |"));
        assert!(generate_score_section(None).is_empty());
    }

    #[test]
    fn test_generate_json_report() {
        let json = generate_json_report(&envelope()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["routine"], "operations");
        assert_eq!(value["metrics"][1]["status"], "unavailable");
        assert!(value["metrics"][1]["value"].is_null());
        assert_eq!(value["warnings"][0]["reason"], "source_unavailable");
        assert_eq!(value["recommendations"], serde_json::json!([]));
    }

    #[test]
    fn test_snapshot_markdown_has_no_analysis() {
        let snapshot = HealthSnapshot {
            routine: RoutineId::Growth,
            metrics: MetricsBundle::default(),
            score: None,
            warnings: vec![],
        };
        let markdown = generate_snapshot_markdown(&snapshot, &metadata());
        assert!(markdown.contains("(Snapshot)"));
        assert!(!markdown.contains("## Analysis"));
    }

    #[test]
    fn test_write_report() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.md");
        write_report("# Report\n", &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# Report\n");
    }
}
