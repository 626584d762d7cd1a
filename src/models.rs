//! Data models for business health assessments.
//!
//! This module contains the request-scoped records that flow through the
//! pipeline: metric fields and bundles, health scores, warnings, and the
//! response envelope returned to callers.

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Identifier of a data provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    /// CRM records (contacts, deals)
    Crm,
    /// Product analytics events
    Analytics,
    /// Support conversation exports
    Support,
    /// The narrative generation service. Only appears on warnings.
    Narrative,
}

impl SourceId {
    /// Sources that supply metric fields.
    pub const METRIC_SOURCES: [SourceId; 3] = [SourceId::Crm, SourceId::Analytics, SourceId::Support];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Crm => "crm",
            SourceId::Analytics => "analytics",
            SourceId::Support => "support",
            SourceId::Narrative => "narrative",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier of an analysis routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutineId {
    /// Strategic growth analysis
    Growth,
    /// Weekly operational report
    Operations,
    /// Board and stakeholder communication prep
    Communication,
}

impl RoutineId {
    pub const ALL: [RoutineId; 3] = [
        RoutineId::Growth,
        RoutineId::Operations,
        RoutineId::Communication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutineId::Growth => "growth",
            RoutineId::Operations => "operations",
            RoutineId::Communication => "communication",
        }
    }
}

impl fmt::Display for RoutineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutineId {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "growth" => Ok(RoutineId::Growth),
            "operations" => Ok(RoutineId::Operations),
            "communication" => Ok(RoutineId::Communication),
            other => Err(EngineError::UnknownRoutine(other.to_string())),
        }
    }
}

/// Scoring dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionId {
    Growth,
    Engagement,
    Support,
    Conversion,
    Pipeline,
    Resolution,
}

impl fmt::Display for DimensionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DimensionId::Growth => "Growth",
            DimensionId::Engagement => "Engagement",
            DimensionId::Support => "Support",
            DimensionId::Conversion => "Conversion",
            DimensionId::Pipeline => "Pipeline",
            DimensionId::Resolution => "Resolution",
        };
        f.write_str(name)
    }
}

/// A metric value: either numeric or textual.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Number(f64),
    Text(String),
}

impl MetricValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Number(n) => Some(*n),
            MetricValue::Text(_) => None,
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            MetricValue::Number(n) => write!(f, "{:.2}", n),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for MetricValue {
    fn from(n: f64) -> Self {
        MetricValue::Number(n)
    }
}

impl From<u64> for MetricValue {
    fn from(n: u64) -> Self {
        MetricValue::Number(n as f64)
    }
}

impl From<String> for MetricValue {
    fn from(s: String) -> Self {
        MetricValue::Text(s)
    }
}

/// Provenance status of a metric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldStatus {
    Ok,
    Unavailable,
    Stale,
}

impl fmt::Display for FieldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldStatus::Ok => write!(f, "ok"),
            FieldStatus::Unavailable => write!(f, "unavailable"),
            FieldStatus::Stale => write!(f, "stale"),
        }
    }
}

/// A single named metric with provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricField {
    pub name: String,
    pub value: Option<MetricValue>,
    pub source: SourceId,
    pub fetched_at: Option<DateTime<Utc>>,
    pub status: FieldStatus,
}

impl MetricField {
    /// A field whose source could not be reached. Never carries a value.
    pub fn unavailable(name: &str, source: SourceId) -> Self {
        Self {
            name: name.to_string(),
            value: None,
            source,
            fetched_at: None,
            status: FieldStatus::Unavailable,
        }
    }

    /// A field fetched successfully (possibly with no value).
    pub fn fetched(
        name: &str,
        source: SourceId,
        value: Option<MetricValue>,
        fetched_at: DateTime<Utc>,
        stale: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            value,
            source,
            fetched_at: Some(fetched_at),
            status: if stale {
                FieldStatus::Stale
            } else {
                FieldStatus::Ok
            },
        }
    }

    /// Numeric value, if the field is usable and numeric.
    pub fn number(&self) -> Option<f64> {
        if self.status == FieldStatus::Unavailable {
            return None;
        }
        self.value.as_ref().and_then(MetricValue::as_f64)
    }
}

/// Ordered, per-request snapshot of fetched metric fields.
///
/// The bundle is built once by the aggregator and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricsBundle {
    fields: Vec<MetricField>,
}

impl MetricsBundle {
    pub fn new(fields: Vec<MetricField>) -> Self {
        Self { fields }
    }

    pub fn get(&self, name: &str) -> Option<&MetricField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricField> {
        self.fields.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Numeric value of a usable field.
    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(MetricField::number)
    }

    /// Number of fields that could not be fetched.
    pub fn unavailable_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| f.status == FieldStatus::Unavailable)
            .count()
    }
}

/// Composite business health score.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    /// Weighted composite in [0, 100]. `None` means indeterminate, not zero.
    pub composite: Option<f64>,
    /// Per-dimension sub-scores in [0, 100].
    pub dimensions: BTreeMap<DimensionId, f64>,
    /// Field names that contributed to an included dimension.
    pub inputs_used: BTreeSet<String>,
}

impl HealthScore {
    /// Score with no includable dimensions.
    pub fn indeterminate() -> Self {
        Self::default()
    }

    pub fn is_indeterminate(&self) -> bool {
        self.composite.is_none()
    }
}

/// Why a warning was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningReason {
    SourceUnavailable,
    SourceMalformed,
    PartialData,
    StaleData,
    ServiceUnavailable,
    Timeout,
}

impl fmt::Display for WarningReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            WarningReason::SourceUnavailable => "Source unavailable",
            WarningReason::SourceMalformed => "Malformed data",
            WarningReason::PartialData => "Partial data",
            WarningReason::StaleData => "Stale data",
            WarningReason::ServiceUnavailable => "Service unavailable",
            WarningReason::Timeout => "Timeout",
        };
        f.write_str(label)
    }
}

/// A degraded-data notice attached to an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    pub source: SourceId,
    pub reason: WarningReason,
    pub detail: String,
}

impl Warning {
    pub fn new(source: SourceId, reason: WarningReason, detail: impl Into<String>) -> Self {
        Self {
            source,
            reason,
            detail: detail.into(),
        }
    }
}

/// The uniform result returned for every routine.
///
/// Every field is always present; degraded data is signaled through
/// `warnings`, never by omitting fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub routine: RoutineId,
    pub narrative: String,
    pub metrics: MetricsBundle,
    pub score: Option<HealthScore>,
    pub recommendations: Vec<String>,
    pub next_actions: Vec<String>,
    pub warnings: Vec<Warning>,
}

impl ResponseEnvelope {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Metrics and score without a narrative, for dashboard-style views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub routine: RoutineId,
    pub metrics: MetricsBundle,
    pub score: Option<HealthScore>,
    pub warnings: Vec<Warning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routine_id_from_str() {
        assert_eq!("growth".parse::<RoutineId>(), Ok(RoutineId::Growth));
        assert_eq!(" Operations ".parse::<RoutineId>(), Ok(RoutineId::Operations));
        assert_eq!(
            "forecast".parse::<RoutineId>(),
            Err(EngineError::UnknownRoutine("forecast".to_string()))
        );
    }

    #[test]
    fn test_unavailable_field_has_no_value() {
        let field = MetricField::unavailable("new_contacts", SourceId::Crm);
        assert_eq!(field.status, FieldStatus::Unavailable);
        assert!(field.value.is_none());
        assert!(field.fetched_at.is_none());
        assert_eq!(field.number(), None);
    }

    #[test]
    fn test_metric_value_display() {
        assert_eq!(MetricValue::Number(425.0).to_string(), "425");
        assert_eq!(MetricValue::Number(0.681).to_string(), "0.68");
        assert_eq!(MetricValue::Text("invoice_created".into()).to_string(), "invoice_created");
    }

    #[test]
    fn test_bundle_lookup_preserves_order() {
        let now = Utc::now();
        let bundle = MetricsBundle::new(vec![
            MetricField::fetched("b", SourceId::Crm, Some(2.0.into()), now, false),
            MetricField::fetched("a", SourceId::Crm, Some(1.0.into()), now, true),
            MetricField::unavailable("c", SourceId::Support),
        ]);

        assert_eq!(bundle.names(), vec!["b", "a", "c"]);
        assert_eq!(bundle.number("a"), Some(1.0));
        assert_eq!(bundle.number("c"), None);
        assert_eq!(bundle.unavailable_count(), 1);
    }

    #[test]
    fn test_bundle_serializes_as_sequence() {
        let bundle = MetricsBundle::new(vec![MetricField::unavailable("x", SourceId::Analytics)]);
        let json = serde_json::to_value(&bundle).unwrap();
        assert!(json.is_array());
        assert_eq!(json[0]["status"], "unavailable");
        assert_eq!(json[0]["source"], "analytics");
    }
}
