//! Health scoring.
//!
//! Each dimension maps one or more bundle fields to a sub-score in [0, 100]
//! by normalizing against a configured target. The composite is the weighted
//! mean of the dimensions that could be scored, with weights renormalized over
//! those dimensions.

use crate::error::EngineError;
use crate::models::{DimensionId, FieldStatus, HealthScore, MetricsBundle};
use crate::routines::RoutineSpec;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// How a dimension's input is normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Formula {
    /// `value / target`, higher is better.
    Ratio,
    /// `target / value`, lower is better.
    Inverse,
}

/// Fields a dimension reads.
pub fn dimension_inputs(dimension: DimensionId) -> &'static [&'static str] {
    match dimension {
        DimensionId::Growth => &["new_contacts"],
        DimensionId::Engagement => &["daily_active_users"],
        DimensionId::Support => &["avg_satisfaction"],
        DimensionId::Conversion => &["trial_conversion"],
        DimensionId::Pipeline => &["pipeline_value"],
        DimensionId::Resolution => &["avg_resolution_hours"],
    }
}

pub fn formula(dimension: DimensionId) -> Formula {
    match dimension {
        DimensionId::Resolution => Formula::Inverse,
        _ => Formula::Ratio,
    }
}

/// Weight and normalization target of one dimension.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    pub weight: f64,
    pub target: f64,
}

impl DimensionConfig {
    pub const fn new(weight: f64, target: f64) -> Self {
        Self { weight, target }
    }
}

/// Scoring configuration, one entry per dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_growth")]
    pub growth: DimensionConfig,
    #[serde(default = "default_engagement")]
    pub engagement: DimensionConfig,
    #[serde(default = "default_support")]
    pub support: DimensionConfig,
    #[serde(default = "default_conversion")]
    pub conversion: DimensionConfig,
    #[serde(default = "default_pipeline")]
    pub pipeline: DimensionConfig,
    #[serde(default = "default_resolution")]
    pub resolution: DimensionConfig,
}

fn default_growth() -> DimensionConfig {
    DimensionConfig::new(0.25, 100.0)
}

fn default_engagement() -> DimensionConfig {
    DimensionConfig::new(0.35, 1000.0)
}

fn default_support() -> DimensionConfig {
    DimensionConfig::new(0.25, 5.0)
}

fn default_conversion() -> DimensionConfig {
    DimensionConfig::new(0.15, 0.30)
}

fn default_pipeline() -> DimensionConfig {
    DimensionConfig::new(0.30, 500_000.0)
}

fn default_resolution() -> DimensionConfig {
    DimensionConfig::new(0.15, 4.0)
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            growth: default_growth(),
            engagement: default_engagement(),
            support: default_support(),
            conversion: default_conversion(),
            pipeline: default_pipeline(),
            resolution: default_resolution(),
        }
    }
}

impl ScoringConfig {
    pub fn dimension(&self, dimension: DimensionId) -> &DimensionConfig {
        match dimension {
            DimensionId::Growth => &self.growth,
            DimensionId::Engagement => &self.engagement,
            DimensionId::Support => &self.support,
            DimensionId::Conversion => &self.conversion,
            DimensionId::Pipeline => &self.pipeline,
            DimensionId::Resolution => &self.resolution,
        }
    }

    /// Targets and weights must be positive and finite.
    pub fn validate(&self) -> Result<(), EngineError> {
        for dimension in ALL_DIMENSIONS {
            let cfg = self.dimension(dimension);
            if !(cfg.target.is_finite() && cfg.target > 0.0) {
                return Err(EngineError::InvalidScoring(format!(
                    "{} target must be positive, got {}",
                    dimension, cfg.target
                )));
            }
            if !(cfg.weight.is_finite() && cfg.weight > 0.0) {
                return Err(EngineError::InvalidScoring(format!(
                    "{} weight must be positive, got {}",
                    dimension, cfg.weight
                )));
            }
        }
        Ok(())
    }
}

const ALL_DIMENSIONS: [DimensionId; 6] = [
    DimensionId::Growth,
    DimensionId::Engagement,
    DimensionId::Support,
    DimensionId::Conversion,
    DimensionId::Pipeline,
    DimensionId::Resolution,
];

/// Pure scorer over a validated configuration.
#[derive(Debug, Clone)]
pub struct HealthScorer {
    config: ScoringConfig,
}

impl HealthScorer {
    pub fn new(config: ScoringConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a bundle for a routine.
    ///
    /// Dimensions whose inputs are unavailable, null or non-numeric are left
    /// out entirely. With nothing left the score is indeterminate.
    pub fn score(&self, bundle: &MetricsBundle, spec: &RoutineSpec) -> HealthScore {
        let mut dimensions = BTreeMap::new();
        let mut inputs_used = BTreeSet::new();
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for &dimension in &spec.scoring_dimensions {
            let Some(values) = self.inputs(bundle, dimension) else {
                continue;
            };

            let cfg = self.config.dimension(dimension);
            let sub_score = normalize(formula(dimension), &values, cfg.target);

            dimensions.insert(dimension, sub_score);
            inputs_used.extend(dimension_inputs(dimension).iter().map(|s| s.to_string()));
            weighted_sum += cfg.weight * sub_score;
            total_weight += cfg.weight;
        }

        if dimensions.is_empty() || total_weight <= 0.0 {
            return HealthScore::indeterminate();
        }

        HealthScore {
            composite: Some((weighted_sum / total_weight).clamp(0.0, 100.0)),
            dimensions,
            inputs_used,
        }
    }

    /// Numeric values of every input, or `None` if any cannot be used.
    fn inputs(&self, bundle: &MetricsBundle, dimension: DimensionId) -> Option<Vec<f64>> {
        dimension_inputs(dimension)
            .iter()
            .map(|name| {
                let field = bundle.get(name)?;
                if field.status == FieldStatus::Unavailable {
                    return None;
                }
                field.number()
            })
            .collect()
    }
}

fn normalize(formula: Formula, values: &[f64], target: f64) -> f64 {
    let value = values.iter().sum::<f64>() / values.len().max(1) as f64;

    let raw = match formula {
        Formula::Ratio => value / target * 100.0,
        Formula::Inverse if value <= 0.0 => 100.0,
        Formula::Inverse => target / value * 100.0,
    };

    raw.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricField, RoutineId, SourceId};
    use crate::routines::required;
    use chrono::Utc;

    fn field(name: &str, value: f64) -> MetricField {
        MetricField::fetched(name, SourceId::Crm, Some(value.into()), Utc::now(), false)
    }

    fn two_dimension_spec() -> RoutineSpec {
        RoutineSpec::new(
            RoutineId::Growth,
            vec![required("daily_active_users"), required("new_contacts")],
            vec![DimensionId::Engagement, DimensionId::Growth],
        )
    }

    fn weighted_scorer() -> HealthScorer {
        let mut config = ScoringConfig::default();
        config.engagement = DimensionConfig::new(0.6, 100.0);
        config.growth = DimensionConfig::new(0.4, 100.0);
        HealthScorer::new(config).unwrap()
    }

    #[test]
    fn test_weighted_composite() {
        let bundle = MetricsBundle::new(vec![
            field("daily_active_users", 80.0),
            field("new_contacts", 50.0),
        ]);

        let score = weighted_scorer().score(&bundle, &two_dimension_spec());
        let composite = score.composite.unwrap();

        assert!((composite - (0.6 * 80.0 + 0.4 * 50.0)).abs() < 1e-9);
        assert_eq!(score.dimensions.len(), 2);
        assert!(score.inputs_used.contains("new_contacts"));
    }

    #[test]
    fn test_unavailable_dimension_is_renormalized_away() {
        let bundle = MetricsBundle::new(vec![
            field("daily_active_users", 80.0),
            MetricField::unavailable("new_contacts", SourceId::Crm),
        ]);

        let score = weighted_scorer().score(&bundle, &two_dimension_spec());

        assert!((score.composite.unwrap() - 80.0).abs() < 1e-9);
        assert!(!score.dimensions.contains_key(&DimensionId::Growth));
        assert!(!score.inputs_used.contains("new_contacts"));
    }

    #[test]
    fn test_no_includable_dimension_is_null_not_zero() {
        let bundle = MetricsBundle::new(vec![
            MetricField::unavailable("daily_active_users", SourceId::Analytics),
            MetricField::fetched("new_contacts", SourceId::Crm, None, Utc::now(), false),
        ]);

        let score = weighted_scorer().score(&bundle, &two_dimension_spec());
        assert_eq!(score, HealthScore::indeterminate());
        assert!(score.is_indeterminate());
    }

    #[test]
    fn test_ratio_is_clamped() {
        let bundle = MetricsBundle::new(vec![
            field("daily_active_users", 5000.0),
            field("new_contacts", -3.0),
        ]);

        let score = weighted_scorer().score(&bundle, &two_dimension_spec());
        assert_eq!(score.dimensions[&DimensionId::Engagement], 100.0);
        assert_eq!(score.dimensions[&DimensionId::Growth], 0.0);
    }

    #[test]
    fn test_resolution_is_inverse() {
        assert_eq!(normalize(Formula::Inverse, &[8.0], 4.0), 50.0);
        assert_eq!(normalize(Formula::Inverse, &[2.0], 4.0), 100.0);
        assert_eq!(normalize(Formula::Inverse, &[0.0], 4.0), 100.0);
    }

    #[test]
    fn test_stale_fields_still_score() {
        let bundle = MetricsBundle::new(vec![MetricField::fetched(
            "daily_active_users",
            SourceId::Analytics,
            Some(500.0.into()),
            Utc::now(),
            true,
        )]);
        let spec = RoutineSpec::new(
            RoutineId::Operations,
            vec![required("daily_active_users")],
            vec![DimensionId::Engagement],
        );

        let score = HealthScorer::new(ScoringConfig::default())
            .unwrap()
            .score(&bundle, &spec);
        assert_eq!(score.composite, Some(50.0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ScoringConfig::default();
        config.pipeline.target = 0.0;
        assert!(matches!(
            HealthScorer::new(config),
            Err(EngineError::InvalidScoring(_))
        ));

        let mut config = ScoringConfig::default();
        config.support.weight = -1.0;
        assert!(HealthScorer::new(config).is_err());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: ScoringConfig =
            toml::from_str("[engagement]\nweight = 0.5\ntarget = 800.0\n").unwrap();
        assert_eq!(config.engagement, DimensionConfig::new(0.5, 800.0));
        assert_eq!(config.pipeline, default_pipeline());
    }
}
