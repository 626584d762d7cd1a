//! Fixture-backed metric source.
//!
//! Serves a fixed snapshot (built in or loaded from a JSON file) and applies
//! the same parameter handling as the live sources. Latency and failures can be
//! injected for tests and demos.

use super::{
    AnalyticsSnapshot, Conversation, CrmSnapshot, Deal, EventCount, FetchParams, FunnelStep,
    MetricSource, SourceRecord, SupportSnapshot,
};
use crate::error::SourceError;
use crate::models::SourceId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// A source that replays a prepared outcome.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    id: SourceId,
    outcome: Result<SourceRecord, SourceError>,
    delay: Duration,
}

impl FixtureSource {
    /// Serve the given record.
    pub fn new(record: SourceRecord) -> Self {
        Self {
            id: record.source(),
            outcome: Ok(record),
            delay: Duration::ZERO,
        }
    }

    /// Always fail with the given error.
    pub fn failing(id: SourceId, error: SourceError) -> Self {
        Self {
            id,
            outcome: Err(error),
            delay: Duration::ZERO,
        }
    }

    /// Wait this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Built-in sample data for a source.
    pub fn sample(id: SourceId) -> Option<Self> {
        let record = match id {
            SourceId::Crm => SourceRecord::Crm(sample_crm()),
            SourceId::Analytics => SourceRecord::Analytics(sample_analytics()),
            SourceId::Support => SourceRecord::Support(sample_support()),
            SourceId::Narrative => return None,
        };
        Some(Self::new(record))
    }

    /// Load `<dir>/<id>.json`, falling back to built-in sample data when the
    /// file does not exist.
    pub fn load(dir: &Path, id: SourceId) -> Result<Option<Self>> {
        let path = dir.join(format!("{}.json", id.as_str()));

        if !path.exists() {
            debug!("No fixture at {}, using sample data", path.display());
            return Ok(Self::sample(id));
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read fixture: {}", path.display()))?;

        let record = match id {
            SourceId::Crm => SourceRecord::Crm(parse_fixture(&content, &path)?),
            SourceId::Analytics => SourceRecord::Analytics(parse_fixture(&content, &path)?),
            SourceId::Support => SourceRecord::Support(parse_fixture(&content, &path)?),
            SourceId::Narrative => return Ok(None),
        };

        Ok(Some(Self::new(record)))
    }
}

fn parse_fixture<T: serde::de::DeserializeOwned>(content: &str, path: &Path) -> Result<T> {
    serde_json::from_str(content)
        .with_context(|| format!("Failed to parse fixture: {}", path.display()))
}

#[async_trait]
impl MetricSource for FixtureSource {
    fn id(&self) -> SourceId {
        self.id
    }

    async fn fetch(&self, params: &FetchParams) -> Result<SourceRecord, SourceError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let record = self.outcome.clone()?;
        let record = apply_params(record, params);

        if is_empty(&record) {
            return Err(SourceError::Empty);
        }

        Ok(record)
    }
}

/// Apply date window, filter and limit to list-shaped data.
fn apply_params(record: SourceRecord, params: &FetchParams) -> SourceRecord {
    let in_window = |date: Option<chrono::NaiveDate>| {
        date.map_or(true, |d| d >= params.from && d <= params.to)
    };
    let limit = params.limit as usize;

    match record {
        SourceRecord::Crm(mut s) => {
            s.deals.retain(|d| {
                in_window(d.created_at)
                    && params
                        .filter
                        .as_ref()
                        .map_or(true, |f| f.matches_stage(&d.stage))
            });
            s.deals.truncate(limit);
            SourceRecord::Crm(s)
        }
        SourceRecord::Analytics(mut s) => {
            s.top_events.sort_by(|a, b| b.count.cmp(&a.count));
            s.top_events.truncate(limit);
            SourceRecord::Analytics(s)
        }
        SourceRecord::Support(mut s) => {
            s.conversations.retain(|c| in_window(c.created_at));
            s.conversations.truncate(limit);
            SourceRecord::Support(s)
        }
    }
}

fn is_empty(record: &SourceRecord) -> bool {
    match record {
        SourceRecord::Crm(s) => s.is_empty(),
        SourceRecord::Analytics(s) => s.is_empty(),
        SourceRecord::Support(s) => s.conversations.is_empty(),
    }
}

fn sample_crm() -> CrmSnapshot {
    let deal = |name: &str, amount: f64, stage: &str| Deal {
        name: name.to_string(),
        amount: Some(amount),
        stage: stage.to_string(),
        created_at: None,
    };

    CrmSnapshot {
        total_contacts: Some(1250),
        new_contacts: Some(85),
        qualified_leads: Some(320),
        customers: Some(180),
        deals: vec![
            deal("93281 - Zentor", 122_500.0, "presentationscheduled"),
            deal("93302 - Aldea Sur", 48_000.0, "qualifiedtobuy"),
            deal("93317 - Calden", 65_000.0, "contractsent"),
            deal("93325 - Norte Agro", 39_900.0, "closedwon"),
            deal("93340 - Pampa Logistica", 27_300.0, "closedlost"),
        ],
        as_of: None,
    }
}

fn sample_analytics() -> AnalyticsSnapshot {
    let step = |step: &str, count: u64, conversion: f64| FunnelStep {
        step: step.to_string(),
        count,
        conversion,
    };
    let event = |event: &str, count: u64| EventCount {
        event: event.to_string(),
        count,
    };

    AnalyticsSnapshot {
        daily_active_users: Some(425),
        weekly_active_users: Some(1150),
        monthly_active_users: Some(3200),
        retention_d7: Some(0.68),
        retention_d30: Some(0.42),
        funnel: vec![
            step("Trial Registration", 180, 1.0),
            step("First Invoice Created", 126, 0.70),
            step("Payment Method Added", 72, 0.40),
            step("Subscription Activated", 40, 0.22),
        ],
        overall_conversion: Some(0.22),
        top_events: vec![
            event("invoice_created", 1250),
            event("user_login", 890),
            event("report_generated", 445),
            event("payment_processed", 320),
            event("trial_started", 180),
        ],
        as_of: None,
    }
}

fn sample_support() -> SupportSnapshot {
    let conv = |id: &str, status: &str, satisfaction: f64, hours: f64| Conversation {
        id: id.to_string(),
        created_at: None,
        status: Some(status.to_string()),
        satisfaction: Some(satisfaction),
        resolution_hours: Some(hours),
    };

    SupportSnapshot {
        conversations: vec![
            conv("conv_1", "closed", 5.0, 2.5),
            conv("conv_2", "open", 4.0, 8.0),
            conv("conv_3", "closed", 5.0, 1.5),
        ],
        as_of: None,
    }
}
