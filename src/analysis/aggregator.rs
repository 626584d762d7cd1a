//! Metric aggregation.
//!
//! Fans out one fetch per required source, bounds each with its own timeout,
//! and merges the results into a bundle whose field order follows the
//! routine's declaration order regardless of completion order.

use crate::error::{GatherError, SourceError};
use crate::models::{MetricField, MetricsBundle, SourceId, Warning, WarningReason};
use crate::routines::RoutineSpec;
use crate::sources::{source_of, FetchParams, SourceRecord, SourceSet};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-source fetch limits and freshness policy.
#[derive(Debug, Clone)]
pub struct GatherSettings {
    pub timeouts: BTreeMap<SourceId, Duration>,
    pub default_timeout: Duration,
    /// Snapshots older than this are marked stale. `None` disables the check.
    pub stale_after: Option<chrono::Duration>,
}

impl Default for GatherSettings {
    fn default() -> Self {
        Self {
            timeouts: BTreeMap::new(),
            default_timeout: Duration::from_secs(10),
            stale_after: None,
        }
    }
}

impl GatherSettings {
    pub fn timeout_for(&self, source: SourceId) -> Duration {
        self.timeouts
            .get(&source)
            .copied()
            .unwrap_or(self.default_timeout)
    }
}

/// Outcome of one source fetch, stamped at completion.
struct Fetched {
    result: Result<SourceRecord, SourceError>,
    completed_at: DateTime<Utc>,
}

/// Gathers bundles from a shared set of sources.
#[derive(Clone)]
pub struct Aggregator {
    sources: SourceSet,
    settings: GatherSettings,
}

impl Aggregator {
    pub fn new(sources: SourceSet, settings: GatherSettings) -> Self {
        Self { sources, settings }
    }

    pub fn sources(&self) -> &SourceSet {
        &self.sources
    }

    /// Fetch everything the routine needs and merge it into one bundle.
    ///
    /// Source failures become `Unavailable` fields plus warnings. Fails only
    /// when a non-optional field has no successful source.
    pub async fn gather(
        &self,
        spec: &RoutineSpec,
        params: &FetchParams,
    ) -> Result<(MetricsBundle, Vec<Warning>), GatherError> {
        let fetches = spec
            .required_sources
            .iter()
            .map(|&id| async move { (id, self.fetch_one(id, params).await) });

        let outcomes: BTreeMap<SourceId, Fetched> = join_all(fetches).await.into_iter().collect();

        let mut fields = Vec::with_capacity(spec.required_fields.len());
        let mut missing = Vec::new();
        let mut partial: BTreeMap<SourceId, Vec<&str>> = BTreeMap::new();

        for requirement in &spec.required_fields {
            let Some(source) = source_of(requirement.name) else {
                continue;
            };
            let Some(fetched) = outcomes.get(&source) else {
                continue;
            };

            let field = match &fetched.result {
                Ok(record) => {
                    let value = record.value(requirement.name);
                    if value.is_none() {
                        partial.entry(source).or_default().push(requirement.name);
                    }
                    MetricField::fetched(
                        requirement.name,
                        source,
                        value,
                        fetched.completed_at,
                        self.is_stale(record, fetched.completed_at),
                    )
                }
                Err(SourceError::Empty) => MetricField::fetched(
                    requirement.name,
                    source,
                    None,
                    fetched.completed_at,
                    false,
                ),
                Err(_) => {
                    if !requirement.optional {
                        missing.push(requirement.name.to_string());
                    }
                    MetricField::unavailable(requirement.name, source)
                }
            };

            fields.push(field);
        }

        let mut warnings = Vec::new();
        for (source, fetched) in &outcomes {
            match &fetched.result {
                Ok(record) => {
                    if self.is_stale(record, fetched.completed_at) {
                        if let Some(as_of) = record.as_of() {
                            warnings.push(Warning::new(
                                *source,
                                WarningReason::StaleData,
                                format!("data last refreshed {}", as_of.format("%Y-%m-%d %H:%M UTC")),
                            ));
                        }
                    }
                    if let Some(names) = partial.get(source) {
                        warnings.push(Warning::new(
                            *source,
                            WarningReason::PartialData,
                            format!("no value for {}", names.join(", ")),
                        ));
                    }
                }
                Err(SourceError::Empty) => {}
                Err(SourceError::Malformed(detail)) => {
                    warnings.push(Warning::new(
                        *source,
                        WarningReason::SourceMalformed,
                        detail.clone(),
                    ));
                }
                Err(SourceError::Unavailable(detail)) => {
                    warnings.push(Warning::new(
                        *source,
                        WarningReason::SourceUnavailable,
                        detail.clone(),
                    ));
                }
            }
        }

        let bundle = MetricsBundle::new(fields);

        if !missing.is_empty() {
            warn!("Insufficient data for {}: missing {}", spec.id, missing.join(", "));
            return Err(GatherError::InsufficientData {
                missing,
                bundle,
                warnings,
            });
        }

        Ok((bundle, warnings))
    }

    async fn fetch_one(&self, id: SourceId, params: &FetchParams) -> Fetched {
        let Some(source) = self.sources.get(id) else {
            warn!("No source configured for {}", id);
            return Fetched {
                result: Err(SourceError::Unavailable("no source configured".to_string())),
                completed_at: Utc::now(),
            };
        };

        let limit = self.settings.timeout_for(id);
        let started = Instant::now();

        let result = match tokio::time::timeout(limit, source.fetch(params)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Unavailable(format!(
                "timed out after {}s",
                limit.as_secs_f64()
            ))),
        };

        match &result {
            Ok(_) => debug!("Fetched {} in {:?}", id, started.elapsed()),
            Err(SourceError::Empty) => debug!("{} returned no rows", id),
            Err(e) => warn!("Fetch from {} failed: {}", id, e),
        }

        Fetched {
            result,
            completed_at: Utc::now(),
        }
    }

    fn is_stale(&self, record: &SourceRecord, now: DateTime<Utc>) -> bool {
        match (self.settings.stale_after, record.as_of()) {
            (Some(max_age), Some(as_of)) => now - as_of > max_age,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FieldStatus, MetricValue, RoutineId};
    use crate::routines::{optional, required, RoutineCatalog};
    use crate::sources::{AnalyticsSnapshot, CrmSnapshot, FixtureSource};
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn params() -> FetchParams {
        FetchParams::window(NaiveDate::from_ymd_opt(2025, 6, 30).unwrap(), 30, 100)
    }

    fn sample(id: SourceId) -> Arc<FixtureSource> {
        Arc::new(FixtureSource::sample(id).unwrap())
    }

    fn all_samples() -> SourceSet {
        SourceSet::new()
            .with(sample(SourceId::Crm))
            .unwrap()
            .with(sample(SourceId::Analytics))
            .unwrap()
            .with(sample(SourceId::Support))
            .unwrap()
    }

    fn growth() -> RoutineSpec {
        RoutineCatalog::standard()
            .unwrap()
            .get(RoutineId::Growth)
            .unwrap()
            .clone()
    }

    #[tokio::test]
    async fn test_gather_all_sources_ok() {
        let aggregator = Aggregator::new(all_samples(), GatherSettings::default());
        let spec = growth();

        let (bundle, warnings) = aggregator.gather(&spec, &params()).await.unwrap();

        assert_eq!(bundle.names(), spec.field_names());
        assert!(warnings.is_empty());
        assert_eq!(bundle.number("new_contacts"), Some(85.0));
        assert_eq!(
            bundle.get("top_event").unwrap().value,
            Some(MetricValue::Text("invoice_created".into()))
        );
        assert!(bundle.iter().all(|f| f.status == FieldStatus::Ok));
    }

    #[tokio::test(start_paused = true)]
    async fn test_field_order_ignores_completion_order() {
        let catalog = RoutineCatalog::standard().unwrap();

        for (routine, delays) in RoutineId::ALL
            .iter()
            .flat_map(|r| [[300, 10, 100], [5, 500, 50], [80, 80, 1]].map(|d| (*r, d)))
        {
            let spec = catalog.get(routine).unwrap();
            let sources = SourceSet::new()
                .with(Arc::new(
                    FixtureSource::sample(SourceId::Crm)
                        .unwrap()
                        .with_delay(Duration::from_millis(delays[0])),
                ))
                .unwrap()
                .with(Arc::new(
                    FixtureSource::sample(SourceId::Analytics)
                        .unwrap()
                        .with_delay(Duration::from_millis(delays[1])),
                ))
                .unwrap()
                .with(Arc::new(
                    FixtureSource::sample(SourceId::Support)
                        .unwrap()
                        .with_delay(Duration::from_millis(delays[2])),
                ))
                .unwrap();

            let aggregator = Aggregator::new(sources, GatherSettings::default());
            let (bundle, _) = aggregator.gather(spec, &params()).await.unwrap();
            assert_eq!(bundle.names(), spec.field_names(), "{} {:?}", routine, delays);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_run_concurrently() {
        let sources = SourceSet::new()
            .with(Arc::new(
                FixtureSource::sample(SourceId::Crm)
                    .unwrap()
                    .with_delay(Duration::from_secs(3)),
            ))
            .unwrap()
            .with(Arc::new(
                FixtureSource::sample(SourceId::Analytics)
                    .unwrap()
                    .with_delay(Duration::from_secs(3)),
            ))
            .unwrap()
            .with(Arc::new(
                FixtureSource::sample(SourceId::Support)
                    .unwrap()
                    .with_delay(Duration::from_secs(3)),
            ))
            .unwrap();

        let started = Instant::now();
        let aggregator = Aggregator::new(sources, GatherSettings::default());
        aggregator.gather(&growth(), &params()).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_source_times_out_as_unavailable() {
        let sources = SourceSet::new()
            .with(sample(SourceId::Crm))
            .unwrap()
            .with(sample(SourceId::Analytics))
            .unwrap()
            .with(Arc::new(
                FixtureSource::sample(SourceId::Support)
                    .unwrap()
                    .with_delay(Duration::from_secs(60)),
            ))
            .unwrap();

        let mut settings = GatherSettings::default();
        settings.timeouts.insert(SourceId::Support, Duration::from_secs(2));

        let aggregator = Aggregator::new(sources, settings);
        let (bundle, warnings) = aggregator.gather(&growth(), &params()).await.unwrap();

        let field = bundle.get("avg_satisfaction").unwrap();
        assert_eq!(field.status, FieldStatus::Unavailable);
        assert!(field.value.is_none());
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].source, SourceId::Support);
        assert_eq!(warnings[0].reason, WarningReason::SourceUnavailable);
        assert!(warnings[0].detail.contains("timed out"));
    }

    #[tokio::test]
    async fn test_required_source_failure_is_insufficient_data() {
        let sources = SourceSet::new()
            .with(Arc::new(FixtureSource::failing(
                SourceId::Crm,
                SourceError::Unavailable("401 Unauthorized".into()),
            )))
            .unwrap()
            .with(sample(SourceId::Analytics))
            .unwrap()
            .with(sample(SourceId::Support))
            .unwrap();

        let aggregator = Aggregator::new(sources, GatherSettings::default());
        let err = aggregator.gather(&growth(), &params()).await.unwrap_err();

        let GatherError::InsufficientData {
            missing,
            bundle,
            warnings,
        } = err;
        assert_eq!(missing, vec!["new_contacts".to_string()]);
        assert_eq!(bundle.len(), growth().required_fields.len());
        assert_eq!(
            bundle.get("pipeline_value").unwrap().status,
            FieldStatus::Unavailable
        );
        assert!(warnings
            .iter()
            .any(|w| w.source == SourceId::Crm && w.reason == WarningReason::SourceUnavailable));
    }

    #[tokio::test]
    async fn test_optional_only_failure_does_not_fail() {
        let spec = RoutineSpec::new(
            RoutineId::Operations,
            vec![required("daily_active_users"), optional("avg_satisfaction")],
            vec![],
        );
        let sources = SourceSet::new()
            .with(sample(SourceId::Analytics))
            .unwrap()
            .with(Arc::new(FixtureSource::failing(
                SourceId::Support,
                SourceError::Malformed("expected array".into()),
            )))
            .unwrap();

        let aggregator = Aggregator::new(sources, GatherSettings::default());
        let (bundle, warnings) = aggregator.gather(&spec, &params()).await.unwrap();

        assert_eq!(bundle.unavailable_count(), 1);
        assert_eq!(warnings[0].reason, WarningReason::SourceMalformed);
    }

    #[tokio::test]
    async fn test_empty_source_gives_null_fields_without_warning() {
        let sources = SourceSet::new()
            .with(sample(SourceId::Crm))
            .unwrap()
            .with(Arc::new(FixtureSource::new(SourceRecord::Analytics(
                AnalyticsSnapshot::default(),
            ))))
            .unwrap()
            .with(sample(SourceId::Support))
            .unwrap();

        let aggregator = Aggregator::new(sources, GatherSettings::default());
        let (bundle, warnings) = aggregator.gather(&growth(), &params()).await.unwrap();

        let dau = bundle.get("daily_active_users").unwrap();
        assert_eq!(dau.status, FieldStatus::Ok);
        assert!(dau.value.is_none());
        assert!(warnings.is_empty());
    }

    #[tokio::test]
    async fn test_missing_values_raise_partial_data() {
        let crm = CrmSnapshot {
            new_contacts: Some(12),
            ..Default::default()
        };
        let sources = SourceSet::new()
            .with(Arc::new(FixtureSource::new(SourceRecord::Crm(crm))))
            .unwrap();
        let spec = RoutineSpec::new(
            RoutineId::Growth,
            vec![required("new_contacts"), optional("customers")],
            vec![],
        );

        let aggregator = Aggregator::new(sources, GatherSettings::default());
        let (bundle, warnings) = aggregator.gather(&spec, &params()).await.unwrap();

        assert_eq!(bundle.number("new_contacts"), Some(12.0));
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].reason, WarningReason::PartialData);
        assert_eq!(warnings[0].detail, "no value for customers");
    }

    #[tokio::test]
    async fn test_old_snapshot_is_stale() {
        let crm = CrmSnapshot {
            new_contacts: Some(12),
            as_of: Some(Utc::now() - chrono::Duration::days(3)),
            ..Default::default()
        };
        let sources = SourceSet::new()
            .with(Arc::new(FixtureSource::new(SourceRecord::Crm(crm))))
            .unwrap();
        let spec = RoutineSpec::new(RoutineId::Growth, vec![required("new_contacts")], vec![]);

        let settings = GatherSettings {
            stale_after: Some(chrono::Duration::hours(24)),
            ..Default::default()
        };
        let aggregator = Aggregator::new(sources, settings);
        let (bundle, warnings) = aggregator.gather(&spec, &params()).await.unwrap();

        let field = bundle.get("new_contacts").unwrap();
        assert_eq!(field.status, FieldStatus::Stale);
        assert_eq!(field.number(), Some(12.0));
        assert_eq!(warnings[0].reason, WarningReason::StaleData);
    }

    #[tokio::test]
    async fn test_unregistered_source_is_unavailable() {
        let sources = SourceSet::new().with(sample(SourceId::Crm)).unwrap();
        let spec = RoutineSpec::new(
            RoutineId::Communication,
            vec![optional("new_contacts"), optional("avg_satisfaction")],
            vec![],
        );

        let aggregator = Aggregator::new(sources, GatherSettings::default());
        let (bundle, warnings) = aggregator.gather(&spec, &params()).await.unwrap();

        assert_eq!(
            bundle.get("avg_satisfaction").unwrap().status,
            FieldStatus::Unavailable
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].detail, "no source configured");
    }
}
