//! Routine engine.
//!
//! Runs one routine end to end: gather, score, narrate, assemble. Data
//! problems never fail a request; they are reported as warnings on the
//! envelope. The only error that escapes is an unknown routine.

use crate::analysis::{Aggregator, HealthScorer};
use crate::error::{EngineError, GatherError, NarrativeError};
use crate::models::{
    HealthScore, HealthSnapshot, MetricsBundle, ResponseEnvelope, RoutineId, SourceId, Warning,
    WarningReason,
};
use crate::narrative::{NarrativeContext, NarrativeService, DEFAULT_FALLBACK};
use crate::report::assembler;
use crate::routines::{RoutineCatalog, RoutineSpec};
use crate::router::Router;
use crate::sources::{FetchParams, RecordFilter};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Request-independent engine settings.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on the narrative call.
    pub narrative_timeout: Duration,
    /// Narrative used when generation fails.
    pub fallback: String,
    /// Row limit passed to sources.
    pub limit: u32,
    pub filter: Option<RecordFilter>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            narrative_timeout: Duration::from_secs(120),
            fallback: DEFAULT_FALLBACK.to_string(),
            limit: 100,
            filter: None,
        }
    }
}

/// Orchestrates routines over shared sources and services.
pub struct RoutineEngine {
    catalog: RoutineCatalog,
    router: Router,
    aggregator: Aggregator,
    scorer: HealthScorer,
    narrator: Arc<dyn NarrativeService>,
    settings: EngineSettings,
}

impl RoutineEngine {
    /// Build an engine. Fails if the router can select a routine the catalog
    /// does not define.
    pub fn new(
        catalog: RoutineCatalog,
        router: Router,
        aggregator: Aggregator,
        scorer: HealthScorer,
        narrator: Arc<dyn NarrativeService>,
        settings: EngineSettings,
    ) -> Result<Self, EngineError> {
        if !catalog.contains(router.default_routine()) {
            return Err(EngineError::UnknownRoutine(
                router.default_routine().to_string(),
            ));
        }

        Ok(Self {
            catalog,
            router,
            aggregator,
            scorer,
            narrator,
            settings,
        })
    }

    pub fn catalog(&self) -> &RoutineCatalog {
        &self.catalog
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn narrator_model(&self) -> &str {
        self.narrator.model()
    }

    pub fn classify(&self, request: &str) -> RoutineId {
        self.router.classify(request)
    }

    /// Classify a free-text request and run the selected routine.
    pub async fn handle_request(&self, request: &str) -> Result<ResponseEnvelope, EngineError> {
        let routine = self.classify(request);
        info!("Routing request to {}", routine);
        self.run(routine, request).await
    }

    /// Run a routine for today.
    pub async fn run(
        &self,
        routine: RoutineId,
        request: &str,
    ) -> Result<ResponseEnvelope, EngineError> {
        self.run_as_of(routine, request, Utc::now().date_naive()).await
    }

    /// Run a routine for the window ending at `as_of`.
    pub async fn run_as_of(
        &self,
        routine: RoutineId,
        request: &str,
        as_of: NaiveDate,
    ) -> Result<ResponseEnvelope, EngineError> {
        let spec = self.catalog.get(routine)?;
        let params = self.params_for(spec, as_of);

        info!(
            "Running {} for {} to {}",
            spec.title,
            params.from_iso(),
            params.to_iso()
        );

        let (bundle, mut warnings) = match self.aggregator.gather(spec, &params).await {
            Ok(gathered) => gathered,
            Err(GatherError::InsufficientData {
                missing,
                bundle,
                warnings,
            }) => {
                let score = self.score_if_applicable(&bundle, spec);
                let narrative = insufficient_data_narrative(spec, &missing);
                return Ok(assembler::degraded(spec, narrative, bundle, score, warnings));
            }
        };

        let score = self.score_if_applicable(&bundle, spec);
        let context =
            NarrativeContext::new(spec, request, &params, &bundle, score.as_ref(), &warnings);

        let narrative = match self.narrate(&context).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Narrative generation failed: {}", e);
                warnings.push(narrative_warning(&e));
                self.settings.fallback.clone()
            }
        };

        Ok(assembler::assemble(spec, narrative, bundle, score, warnings))
    }

    /// Gather and score without calling the narrative service.
    pub async fn snapshot(&self, routine: RoutineId) -> Result<HealthSnapshot, EngineError> {
        self.snapshot_as_of(routine, Utc::now().date_naive()).await
    }

    pub async fn snapshot_as_of(
        &self,
        routine: RoutineId,
        as_of: NaiveDate,
    ) -> Result<HealthSnapshot, EngineError> {
        let spec = self.catalog.get(routine)?;
        let params = self.params_for(spec, as_of);

        let (metrics, warnings) = match self.aggregator.gather(spec, &params).await {
            Ok(gathered) => gathered,
            Err(GatherError::InsufficientData {
                bundle, warnings, ..
            }) => (bundle, warnings),
        };

        Ok(HealthSnapshot {
            routine,
            score: self.score_if_applicable(&metrics, spec),
            metrics,
            warnings,
        })
    }

    /// Fetch parameters for a routine's window ending at `as_of`.
    pub fn params_for(&self, spec: &RoutineSpec, as_of: NaiveDate) -> FetchParams {
        let params = FetchParams::window(as_of, spec.window_days, self.settings.limit);
        match &self.settings.filter {
            Some(filter) => params.with_filter(filter.clone()),
            None => params,
        }
    }

    fn score_if_applicable(&self, bundle: &MetricsBundle, spec: &RoutineSpec) -> Option<HealthScore> {
        if spec.scoring_dimensions.is_empty() {
            None
        } else {
            Some(self.scorer.score(bundle, spec))
        }
    }

    async fn narrate(&self, context: &NarrativeContext) -> Result<String, NarrativeError> {
        let limit = self.settings.narrative_timeout;
        debug!("Requesting narrative (timeout {}s)", limit.as_secs());

        match tokio::time::timeout(limit, self.narrator.generate(context)).await {
            Ok(result) => result,
            Err(_) => Err(NarrativeError::Timeout(limit.as_secs())),
        }
    }
}

fn narrative_warning(error: &NarrativeError) -> Warning {
    let reason = match error {
        NarrativeError::Timeout(_) => WarningReason::Timeout,
        NarrativeError::ServiceUnavailable(_) => WarningReason::ServiceUnavailable,
    };
    Warning::new(SourceId::Narrative, reason, error.to_string())
}

fn insufficient_data_narrative(spec: &RoutineSpec, missing: &[String]) -> String {
    format!(
        "{} could not be completed: no data was available for {}. \
The metrics that could be fetched are included below; see the warnings for the failing sources.",
        spec.title,
        missing.join(", ")
    )
}
