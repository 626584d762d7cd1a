//! Metric sources.
//!
//! Every provider implements [`MetricSource`]. The aggregator depends only on
//! this trait; whether a source is fixture-backed or live is invisible to it.

pub mod analytics;
pub mod crm;
pub mod fixture;
pub mod support;

use crate::error::{EngineError, SourceError};
use crate::models::{MetricValue, SourceId};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use analytics::AnalyticsSource;
pub use crm::CrmSource;
pub use fixture::FixtureSource;
pub use support::SupportExportSource;

/// Static catalog of every known metric field and the source that backs it.
pub const FIELD_CATALOG: &[(&str, SourceId)] = &[
    ("total_contacts", SourceId::Crm),
    ("new_contacts", SourceId::Crm),
    ("qualified_leads", SourceId::Crm),
    ("customers", SourceId::Crm),
    ("open_deals", SourceId::Crm),
    ("pipeline_value", SourceId::Crm),
    ("daily_active_users", SourceId::Analytics),
    ("weekly_active_users", SourceId::Analytics),
    ("monthly_active_users", SourceId::Analytics),
    ("retention_d7", SourceId::Analytics),
    ("retention_d30", SourceId::Analytics),
    ("trial_conversion", SourceId::Analytics),
    ("top_event", SourceId::Analytics),
    ("conversations", SourceId::Support),
    ("avg_resolution_hours", SourceId::Support),
    ("avg_satisfaction", SourceId::Support),
];

/// Look up the source responsible for a field.
pub fn source_of(field: &str) -> Option<SourceId> {
    FIELD_CATALOG
        .iter()
        .find(|(name, _)| *name == field)
        .map(|(_, source)| *source)
}

/// Structured record filter passed to sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordFilter {
    /// Keep deals whose stage is one of these.
    DealStageIn(Vec<String>),
    /// Drop deals whose stage is one of these.
    DealStageNotIn(Vec<String>),
}

impl RecordFilter {
    pub fn matches_stage(&self, stage: &str) -> bool {
        let stage = stage.to_lowercase();
        match self {
            RecordFilter::DealStageIn(stages) => stages.iter().any(|s| s.to_lowercase() == stage),
            RecordFilter::DealStageNotIn(stages) => {
                !stages.iter().any(|s| s.to_lowercase() == stage)
            }
        }
    }
}

/// Explicit parameters for one fetch. Sources read no other state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchParams {
    /// Inclusive start date.
    pub from: NaiveDate,
    /// Inclusive end date.
    pub to: NaiveDate,
    /// Maximum rows per list call. Always at least 1.
    pub limit: u32,
    pub filter: Option<RecordFilter>,
}

impl FetchParams {
    /// Parameters covering `window_days` ending at `to`.
    pub fn window(to: NaiveDate, window_days: u32, limit: u32) -> Self {
        Self {
            from: to - chrono::Duration::days(i64::from(window_days)),
            to,
            limit: limit.max(1),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: RecordFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// ISO-8601 start date.
    pub fn from_iso(&self) -> String {
        self.from.format("%Y-%m-%d").to_string()
    }

    /// ISO-8601 end date.
    pub fn to_iso(&self) -> String {
        self.to.format("%Y-%m-%d").to_string()
    }
}

/// A CRM deal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    pub name: String,
    #[serde(default)]
    pub amount: Option<f64>,
    pub stage: String,
    #[serde(default)]
    pub created_at: Option<NaiveDate>,
}

impl Deal {
    pub fn is_open(&self) -> bool {
        !self.stage.to_lowercase().starts_with("closed")
    }
}

/// Result of the CRM "contact metrics" and "list pipeline records" calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrmSnapshot {
    pub total_contacts: Option<u64>,
    pub new_contacts: Option<u64>,
    pub qualified_leads: Option<u64>,
    pub customers: Option<u64>,
    pub deals: Vec<Deal>,
    pub as_of: Option<DateTime<Utc>>,
}

impl CrmSnapshot {
    pub fn is_empty(&self) -> bool {
        self.total_contacts.is_none()
            && self.new_contacts.is_none()
            && self.qualified_leads.is_none()
            && self.customers.is_none()
            && self.deals.is_empty()
    }

    pub fn open_deals(&self) -> u64 {
        self.deals.iter().filter(|d| d.is_open()).count() as u64
    }

    /// Total amount across open deals.
    pub fn pipeline_value(&self) -> f64 {
        self.deals
            .iter()
            .filter(|d| d.is_open())
            .filter_map(|d| d.amount)
            .sum()
    }
}

/// A behavioral event and its count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventCount {
    pub event: String,
    pub count: u64,
}

/// One step of a conversion funnel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelStep {
    pub step: String,
    pub count: u64,
    pub conversion: f64,
}

/// Result of the analytics "user engagement", "conversion funnel" and
/// "top behavioral events" calls.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSnapshot {
    pub daily_active_users: Option<u64>,
    pub weekly_active_users: Option<u64>,
    pub monthly_active_users: Option<u64>,
    pub retention_d7: Option<f64>,
    pub retention_d30: Option<f64>,
    pub funnel: Vec<FunnelStep>,
    pub overall_conversion: Option<f64>,
    pub top_events: Vec<EventCount>,
    pub as_of: Option<DateTime<Utc>>,
}

impl AnalyticsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.daily_active_users.is_none()
            && self.weekly_active_users.is_none()
            && self.monthly_active_users.is_none()
            && self.retention_d7.is_none()
            && self.retention_d30.is_none()
            && self.funnel.is_empty()
            && self.overall_conversion.is_none()
            && self.top_events.is_empty()
    }

    /// Trial-to-paid conversion: the reported overall rate, or the last
    /// funnel step's conversion.
    pub fn trial_conversion(&self) -> Option<f64> {
        self.overall_conversion
            .or_else(|| self.funnel.last().map(|s| s.conversion))
    }

    pub fn top_event(&self) -> Option<&EventCount> {
        self.top_events.iter().max_by_key(|e| e.count)
    }
}

/// A support conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    #[serde(alias = "conversation_id")]
    pub id: String,
    #[serde(default)]
    pub created_at: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default, alias = "customer_satisfaction")]
    pub satisfaction: Option<f64>,
    #[serde(default, alias = "resolution_time_hours")]
    pub resolution_hours: Option<f64>,
}

/// Result of the "support-conversation summary" call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupportSnapshot {
    pub conversations: Vec<Conversation>,
    pub as_of: Option<DateTime<Utc>>,
}

impl SupportSnapshot {
    pub fn avg_resolution_hours(&self) -> Option<f64> {
        mean(self.conversations.iter().filter_map(|c| c.resolution_hours))
    }

    pub fn avg_satisfaction(&self) -> Option<f64> {
        mean(self.conversations.iter().filter_map(|c| c.satisfaction))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Typed record returned by a successful fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceRecord {
    Crm(CrmSnapshot),
    Analytics(AnalyticsSnapshot),
    Support(SupportSnapshot),
}

impl SourceRecord {
    pub fn source(&self) -> SourceId {
        match self {
            SourceRecord::Crm(_) => SourceId::Crm,
            SourceRecord::Analytics(_) => SourceId::Analytics,
            SourceRecord::Support(_) => SourceId::Support,
        }
    }

    /// When the upstream data was last refreshed, if the source reports it.
    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        match self {
            SourceRecord::Crm(s) => s.as_of,
            SourceRecord::Analytics(s) => s.as_of,
            SourceRecord::Support(s) => s.as_of,
        }
    }

    /// Map a catalog field name to its value in this record.
    pub fn value(&self, field: &str) -> Option<MetricValue> {
        match self {
            SourceRecord::Crm(s) => match field {
                "total_contacts" => s.total_contacts.map(MetricValue::from),
                "new_contacts" => s.new_contacts.map(MetricValue::from),
                "qualified_leads" => s.qualified_leads.map(MetricValue::from),
                "customers" => s.customers.map(MetricValue::from),
                "open_deals" => Some(s.open_deals().into()),
                "pipeline_value" => Some(s.pipeline_value().into()),
                _ => None,
            },
            SourceRecord::Analytics(s) => match field {
                "daily_active_users" => s.daily_active_users.map(MetricValue::from),
                "weekly_active_users" => s.weekly_active_users.map(MetricValue::from),
                "monthly_active_users" => s.monthly_active_users.map(MetricValue::from),
                "retention_d7" => s.retention_d7.map(MetricValue::from),
                "retention_d30" => s.retention_d30.map(MetricValue::from),
                "trial_conversion" => s.trial_conversion().map(MetricValue::from),
                "top_event" => s.top_event().map(|e| MetricValue::Text(e.event.clone())),
                _ => None,
            },
            SourceRecord::Support(s) => match field {
                "conversations" => Some((s.conversations.len() as u64).into()),
                "avg_resolution_hours" => s.avg_resolution_hours().map(MetricValue::from),
                "avg_satisfaction" => s.avg_satisfaction().map(MetricValue::from),
                _ => None,
            },
        }
    }
}

/// A data provider.
///
/// Implementations must be safe to call concurrently: no per-call mutable
/// state may be shared between fetches.
#[async_trait]
pub trait MetricSource: Send + Sync {
    fn id(&self) -> SourceId;

    /// Fetch a snapshot for the given parameters.
    ///
    /// Returns `SourceError::Empty` when the call succeeded with zero rows.
    async fn fetch(&self, params: &FetchParams) -> Result<SourceRecord, SourceError>;
}

/// The registered sources, keyed by id. Shared read-only across requests.
#[derive(Clone, Default)]
pub struct SourceSet {
    sources: BTreeMap<SourceId, Arc<dyn MetricSource>>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, source: Arc<dyn MetricSource>) -> Result<(), EngineError> {
        let id = source.id();
        if self.sources.contains_key(&id) {
            return Err(EngineError::DuplicateSource(id));
        }
        self.sources.insert(id, source);
        Ok(())
    }

    pub fn with(mut self, source: Arc<dyn MetricSource>) -> Result<Self, EngineError> {
        self.register(source)?;
        Ok(self)
    }

    pub fn get(&self, id: SourceId) -> Option<Arc<dyn MetricSource>> {
        self.sources.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<SourceId> {
        self.sources.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_catalog_field_maps_to_metric_source() {
        for (name, source) in FIELD_CATALOG {
            assert_ne!(*source, SourceId::Narrative, "{} has no metric source", name);
        }
        assert_eq!(source_of("pipeline_value"), Some(SourceId::Crm));
        assert_eq!(source_of("nonexistent"), None);
    }

    #[test]
    fn test_fetch_params_window() {
        let to = NaiveDate::from_ymd_opt(2025, 6, 30).unwrap();
        let params = FetchParams::window(to, 7, 0);
        assert_eq!(params.from_iso(), "2025-06-23");
        assert_eq!(params.to_iso(), "2025-06-30");
        assert_eq!(params.limit, 1);
    }

    #[test]
    fn test_crm_pipeline_counts_open_deals_only() {
        let snapshot = CrmSnapshot {
            deals: vec![
                Deal {
                    name: "A".into(),
                    amount: Some(1000.0),
                    stage: "presentationscheduled".into(),
                    created_at: None,
                },
                Deal {
                    name: "B".into(),
                    amount: Some(500.0),
                    stage: "closedwon".into(),
                    created_at: None,
                },
                Deal {
                    name: "C".into(),
                    amount: None,
                    stage: "qualifiedtobuy".into(),
                    created_at: None,
                },
            ],
            ..Default::default()
        };

        assert_eq!(snapshot.open_deals(), 2);
        assert_eq!(snapshot.pipeline_value(), 1000.0);
    }

    #[test]
    fn test_analytics_conversion_falls_back_to_funnel() {
        let snapshot = AnalyticsSnapshot {
            funnel: vec![
                FunnelStep {
                    step: "Trial".into(),
                    count: 180,
                    conversion: 1.0,
                },
                FunnelStep {
                    step: "Subscribed".into(),
                    count: 40,
                    conversion: 0.22,
                },
            ],
            ..Default::default()
        };
        assert_eq!(snapshot.trial_conversion(), Some(0.22));
    }

    #[test]
    fn test_support_record_values() {
        let record = SourceRecord::Support(SupportSnapshot {
            conversations: vec![
                Conversation {
                    id: "1".into(),
                    created_at: None,
                    status: None,
                    satisfaction: Some(5.0),
                    resolution_hours: Some(2.0),
                },
                Conversation {
                    id: "2".into(),
                    created_at: None,
                    status: None,
                    satisfaction: Some(4.0),
                    resolution_hours: None,
                },
            ],
            as_of: None,
        });

        assert_eq!(record.value("conversations"), Some(MetricValue::Number(2.0)));
        assert_eq!(record.value("avg_satisfaction"), Some(MetricValue::Number(4.5)));
        assert_eq!(record.value("avg_resolution_hours"), Some(MetricValue::Number(2.0)));
        assert_eq!(record.value("new_contacts"), None);
    }

    #[test]
    fn test_record_filter() {
        let filter = RecordFilter::DealStageNotIn(vec!["ClosedLost".into()]);
        assert!(!filter.matches_stage("closedlost"));
        assert!(filter.matches_stage("closedwon"));
    }
}
