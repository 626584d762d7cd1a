//! Response assembly.
//!
//! Packages narrative, metrics, score and warnings into a [`ResponseEnvelope`]
//! and derives recommendations and next actions from the routine's
//! [`ExtractionRule`].

use crate::models::{HealthScore, MetricsBundle, ResponseEnvelope, Warning};
use crate::routines::{ExtractionRule, RoutineSpec, RuleTarget};
use std::collections::HashSet;

/// Maximum entries in each derived list.
pub const MAX_ITEMS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Recommendations,
    Actions,
    Other,
}

/// Build the envelope for a completed routine run.
pub fn assemble(
    spec: &RoutineSpec,
    narrative: String,
    metrics: MetricsBundle,
    score: Option<HealthScore>,
    warnings: Vec<Warning>,
) -> ResponseEnvelope {
    let (mut recommendations, mut next_actions) = extract_sections(&narrative, &spec.extraction);

    for rule in spec.extraction.metric_rules {
        let Some(value) = metrics.number(rule.field) else {
            continue;
        };
        if !rule.fires(value) {
            continue;
        }
        match rule.target {
            RuleTarget::Recommendation => recommendations.push(rule.render(value)),
            RuleTarget::NextAction => next_actions.push(rule.render(value)),
        }
    }

    if recommendations.is_empty() {
        recommendations = to_owned(spec.extraction.default_recommendations);
    }
    if next_actions.is_empty() {
        next_actions = to_owned(spec.extraction.default_actions);
    }

    ResponseEnvelope {
        routine: spec.id,
        narrative,
        metrics,
        score,
        recommendations: dedup_capped(recommendations),
        next_actions: dedup_capped(next_actions),
        warnings,
    }
}

/// Build the envelope for a run that lacked required data.
///
/// Recommendations and next actions are always empty.
pub fn degraded(
    spec: &RoutineSpec,
    narrative: String,
    metrics: MetricsBundle,
    score: Option<HealthScore>,
    warnings: Vec<Warning>,
) -> ResponseEnvelope {
    ResponseEnvelope {
        routine: spec.id,
        narrative,
        metrics,
        score,
        recommendations: Vec::new(),
        next_actions: Vec::new(),
        warnings,
    }
}

/// Pull list items out of the narrative's recommendation and action sections.
pub fn extract_sections(narrative: &str, rule: &ExtractionRule) -> (Vec<String>, Vec<String>) {
    let mut recommendations = Vec::new();
    let mut actions = Vec::new();
    let mut section = Section::Other;

    for line in narrative.lines() {
        if let Some(heading) = heading_text(line) {
            section = classify_heading(&heading, rule);
            continue;
        }

        let Some(item) = list_item(line) else {
            continue;
        };

        match section {
            Section::Recommendations => recommendations.push(item),
            Section::Actions => actions.push(item),
            Section::Other => {}
        }
    }

    (recommendations, actions)
}

fn classify_heading(heading: &str, rule: &ExtractionRule) -> Section {
    let heading = heading.to_lowercase();

    if rule.action_markers.iter().any(|m| heading.contains(m)) {
        Section::Actions
    } else if rule.recommendation_markers.iter().any(|m| heading.contains(m)) {
        Section::Recommendations
    } else {
        Section::Other
    }
}

/// Text of a heading line, if the line is one.
fn heading_text(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('#') {
        return Some(trimmed.trim_start_matches('#').trim().to_string());
    }

    let unbolded = trimmed.trim_end_matches(':');
    if unbolded.len() > 4
        && unbolded.starts_with("**")
        && unbolded.ends_with("**")
        && !unbolded[2..unbolded.len() - 2].contains("**")
    {
        return Some(unbolded.trim_matches('*').trim().trim_end_matches(':').to_string());
    }

    if let Some(rest) = strip_number(trimmed) {
        let has_letters = rest.chars().any(|c| c.is_alphabetic());
        if has_letters && !rest.chars().any(|c| c.is_lowercase()) {
            return Some(rest.trim_end_matches(':').trim().to_string());
        }
        return None;
    }

    if strip_bullet(trimmed).is_none() && trimmed.ends_with(':') {
        return Some(trimmed.trim_end_matches(':').replace("**", "").trim().to_string());
    }

    None
}

/// Text of a bullet or numbered item, markers stripped.
fn list_item(line: &str) -> Option<String> {
    let trimmed = line.trim();
    let rest = strip_bullet(trimmed).or_else(|| strip_number(trimmed))?;

    let item = rest.replace("**", "").trim().to_string();
    if item.is_empty() {
        None
    } else {
        Some(item)
    }
}

fn strip_bullet(line: &str) -> Option<&str> {
    ["- ", "* ", "• ", "+ "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
}

fn strip_number(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }

    let rest = &line[digits..];
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Drop case-insensitive duplicates, keep first-seen order, cap the length.
fn dedup_capped(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.to_lowercase()))
        .take(MAX_ITEMS)
        .collect()
}
