//! Narrative generation.
//!
//! The narrative service turns a structured context (metrics, score, warnings
//! and routine metadata) into prose. It is an external collaborator: the
//! engine treats every failure the same way and substitutes a fallback text.

pub mod ollama;

use crate::error::NarrativeError;
use crate::models::{HealthScore, MetricsBundle, RoutineId, Warning};
use crate::routines::RoutineSpec;
use crate::sources::FetchParams;
use async_trait::async_trait;
use serde::Serialize;

pub use ollama::{NarratorConfig, OllamaNarrator};

/// Narrative used when the service fails or times out.
pub const DEFAULT_FALLBACK: &str = "Narrative generation is currently unavailable. \
The metrics, score and warnings in this report are complete and can be reviewed directly.";

/// Reporting period of a context, as ISO-8601 dates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Period {
    pub from: String,
    pub to: String,
}

/// Structured input to the narrative service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NarrativeContext {
    pub routine: RoutineId,
    pub title: String,
    pub request: String,
    pub period: Period,
    pub metrics: MetricsBundle,
    pub score: Option<HealthScore>,
    pub warnings: Vec<Warning>,
    #[serde(skip)]
    pub system_prompt: String,
    #[serde(skip)]
    pub temperature: f32,
}

impl NarrativeContext {
    pub fn new(
        spec: &RoutineSpec,
        request: &str,
        params: &FetchParams,
        metrics: &MetricsBundle,
        score: Option<&HealthScore>,
        warnings: &[Warning],
    ) -> Self {
        Self {
            routine: spec.id,
            title: spec.title.to_string(),
            request: request.to_string(),
            period: Period {
                from: params.from_iso(),
                to: params.to_iso(),
            },
            metrics: metrics.clone(),
            score: score.cloned(),
            warnings: warnings.to_vec(),
            system_prompt: spec.system_prompt.to_string(),
            temperature: spec.temperature,
        }
    }

    /// Context payload as pretty JSON.
    pub fn payload(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// The user message sent to the model.
    pub fn user_prompt(&self) -> String {
        let request = if self.request.trim().is_empty() {
            self.title.as_str()
        } else {
            self.request.trim()
        };

        format!(
            "Request: {}\n\nBusiness data for {} to {} (JSON):\n```json\n{}\n```\n",
            request,
            self.period.from,
            self.period.to,
            self.payload()
        )
    }
}

/// An opaque text-generation service.
#[async_trait]
pub trait NarrativeService: Send + Sync {
    async fn generate(&self, context: &NarrativeContext) -> Result<String, NarrativeError>;

    /// Model or backend name, for report metadata.
    fn model(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routines::RoutineCatalog;
    use chrono::NaiveDate;

    #[test]
    fn test_context_payload_shape() {
        let catalog = RoutineCatalog::standard().unwrap();
        let spec = catalog.get(RoutineId::Operations).unwrap();
        let params = FetchParams::window(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(), 7, 100);

        let context = NarrativeContext::new(
            spec,
            "weekly report",
            &params,
            &MetricsBundle::default(),
            None,
            &[],
        );
        let payload: serde_json::Value = serde_json::from_str(&context.payload()).unwrap();

        assert_eq!(payload["routine"], "operations");
        assert_eq!(payload["period"]["from"], "2025-06-23");
        assert!(payload["score"].is_null());
        assert!(payload.get("system_prompt").is_none());
        assert!(context.user_prompt().starts_with("Request: weekly report"));
    }
}
