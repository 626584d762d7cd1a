//! Live product-analytics source backed by the Mixpanel query API.

use super::{AnalyticsSnapshot, EventCount, FetchParams, FunnelStep, MetricSource, SourceRecord};
use crate::error::SourceError;
use crate::models::SourceId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Connection settings for the analytics API.
#[derive(Debug, Clone)]
pub struct AnalyticsSettings {
    pub base_url: String,
    pub project_id: String,
    pub api_secret: String,
    /// Event counted for active users.
    pub active_event: String,
    /// Cohort event for retention.
    pub retention_event: String,
    /// Saved funnel for trial conversion, if any.
    pub funnel_id: Option<u64>,
    pub timeout: Duration,
}

/// Mixpanel-backed analytics source.
pub struct AnalyticsSource {
    settings: AnalyticsSettings,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TopEventsResponse {
    #[serde(default)]
    events: Vec<TopEvent>,
}

#[derive(Debug, Deserialize)]
struct TopEvent {
    event: String,
    amount: u64,
}

#[derive(Debug, Deserialize)]
struct EventsResponse {
    data: EventsData,
}

#[derive(Debug, Deserialize)]
struct EventsData {
    #[serde(default)]
    values: BTreeMap<String, BTreeMap<String, u64>>,
}

#[derive(Debug, Deserialize)]
struct RetentionCohort {
    #[serde(default)]
    counts: Vec<u64>,
    first: u64,
}

#[derive(Debug, Deserialize)]
struct FunnelResponse {
    #[serde(default)]
    data: BTreeMap<String, FunnelDay>,
}

#[derive(Debug, Deserialize)]
struct FunnelDay {
    #[serde(default)]
    steps: Vec<FunnelDayStep>,
}

#[derive(Debug, Deserialize)]
struct FunnelDayStep {
    #[serde(default)]
    event: String,
    count: u64,
}

impl AnalyticsSource {
    pub fn new(settings: AnalyticsSettings) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            settings,
            http_client,
        })
    }

    /// "Top behavioral events" for the current day.
    pub async fn top_events(&self, limit: u32) -> Result<Vec<EventCount>, SourceError> {
        let response: TopEventsResponse = self
            .get(
                "events/top",
                &[("type", "general".to_string()), ("limit", limit.to_string())],
            )
            .await?;

        Ok(response
            .events
            .into_iter()
            .map(|e| EventCount {
                event: e.event,
                count: e.amount,
            })
            .collect())
    }

    /// Mean unique users of the active event per `unit` bucket.
    pub async fn active_users(
        &self,
        params: &FetchParams,
        unit: &str,
    ) -> Result<Option<u64>, SourceError> {
        let response: EventsResponse = self
            .get(
                "events",
                &[
                    ("event", format!("[\"{}\"]", self.settings.active_event)),
                    ("type", "unique".to_string()),
                    ("unit", unit.to_string()),
                    ("from_date", params.from_iso()),
                    ("to_date", params.to_iso()),
                ],
            )
            .await?;

        let Some(series) = response.data.values.get(&self.settings.active_event) else {
            return Ok(None);
        };
        if series.is_empty() {
            return Ok(None);
        }

        let total: u64 = series.values().sum();
        Ok(Some(total / series.len() as u64))
    }

    /// Day-N retention ratios (7 and 30) across daily cohorts.
    pub async fn retention(
        &self,
        params: &FetchParams,
    ) -> Result<(Option<f64>, Option<f64>), SourceError> {
        let cohorts: BTreeMap<String, RetentionCohort> = self
            .get(
                "retention",
                &[
                    ("born_event", self.settings.retention_event.clone()),
                    ("unit", "day".to_string()),
                    ("from_date", params.from_iso()),
                    ("to_date", params.to_iso()),
                ],
            )
            .await?;

        Ok((day_n_retention(&cohorts, 7), day_n_retention(&cohorts, 30)))
    }

    /// Conversion funnel steps aggregated over the window.
    pub async fn funnel(&self, params: &FetchParams) -> Result<Vec<FunnelStep>, SourceError> {
        let Some(funnel_id) = self.settings.funnel_id else {
            return Ok(Vec::new());
        };

        let response: FunnelResponse = self
            .get(
                "funnels",
                &[
                    ("funnel_id", funnel_id.to_string()),
                    ("from_date", params.from_iso()),
                    ("to_date", params.to_iso()),
                ],
            )
            .await?;

        Ok(aggregate_funnel(response.data.values()))
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!(
            "{}/{}",
            self.settings.base_url.trim_end_matches('/'),
            endpoint
        );
        debug!("Analytics query: {}", url);

        let response = self
            .http_client
            .get(&url)
            .basic_auth(&self.settings.api_secret, None::<&str>)
            .query(&[("project_id", self.settings.project_id.as_str())])
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Unavailable(format!(
                "analytics API error {}: {}",
                status, body
            )));
        }

        Ok(response.json().await?)
    }
}

fn day_n_retention(cohorts: &BTreeMap<String, RetentionCohort>, day: usize) -> Option<f64> {
    let (retained, born) = cohorts
        .values()
        .filter(|c| c.counts.len() > day && c.first > 0)
        .fold((0u64, 0u64), |(r, b), c| (r + c.counts[day], b + c.first));

    if born == 0 {
        None
    } else {
        Some(retained as f64 / born as f64)
    }
}

fn aggregate_funnel<'a>(days: impl Iterator<Item = &'a FunnelDay>) -> Vec<FunnelStep> {
    let mut totals: Vec<(String, u64)> = Vec::new();

    for day in days {
        for (i, step) in day.steps.iter().enumerate() {
            match totals.get_mut(i) {
                Some(total) => total.1 += step.count,
                None => totals.push((step.event.clone(), step.count)),
            }
        }
    }

    let first = totals.first().map(|(_, c)| *c).unwrap_or(0);
    totals
        .into_iter()
        .map(|(step, count)| FunnelStep {
            step,
            count,
            conversion: if first == 0 {
                0.0
            } else {
                count as f64 / first as f64
            },
        })
        .collect()
}

#[async_trait]
impl MetricSource for AnalyticsSource {
    fn id(&self) -> SourceId {
        SourceId::Analytics
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceRecord, SourceError> {
        let (top_events, dau, wau, mau, (retention_d7, retention_d30), funnel) = futures::try_join!(
            self.top_events(params.limit),
            self.active_users(params, "day"),
            self.active_users(params, "week"),
            self.active_users(params, "month"),
            self.retention(params),
            self.funnel(params),
        )?;

        let snapshot = AnalyticsSnapshot {
            daily_active_users: dau,
            weekly_active_users: wau,
            monthly_active_users: mau,
            retention_d7,
            retention_d30,
            overall_conversion: funnel.last().map(|s| s.conversion),
            funnel,
            top_events,
            as_of: Some(Utc::now()),
        };

        if snapshot.is_empty() {
            return Err(SourceError::Empty);
        }

        Ok(SourceRecord::Analytics(snapshot))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_day_n_retention() {
        let cohorts: BTreeMap<String, RetentionCohort> = serde_json::from_str(
            r#"{
                "2025-06-01": {"counts": [100, 80, 70, 60, 55, 52, 50, 45], "first": 100},
                "2025-06-02": {"counts": [50, 40, 30, 28, 27, 26, 25, 25], "first": 50},
                "2025-06-20": {"counts": [30, 20], "first": 30}
            }"#,
        )
        .unwrap();

        // Only the first two cohorts are old enough for day 7.
        assert_eq!(day_n_retention(&cohorts, 7), Some(70.0 / 150.0));
        assert_eq!(day_n_retention(&cohorts, 30), None);
    }

    #[test]
    fn test_aggregate_funnel() {
        let response: FunnelResponse = serde_json::from_str(
            r#"{"data": {
                "2025-06-01": {"steps": [{"event": "trial_started", "count": 100}, {"event": "subscribed", "count": 20}]},
                "2025-06-02": {"steps": [{"event": "trial_started", "count": 80}, {"event": "subscribed", "count": 20}]}
            }}"#,
        )
        .unwrap();

        let steps = aggregate_funnel(response.data.values());
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].count, 180);
        assert_eq!(steps[1].count, 40);
        assert!((steps[1].conversion - 40.0 / 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_events_shape() {
        let parsed: TopEventsResponse = serde_json::from_str(
            r#"{"events": [{"amount": 1250, "event": "invoice_created", "percent_change": 0.1}], "type": "general"}"#,
        )
        .unwrap();
        assert_eq!(parsed.events[0].event, "invoice_created");
        assert_eq!(parsed.events[0].amount, 1250);
    }
}
