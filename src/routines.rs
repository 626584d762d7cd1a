//! Routine definitions.
//!
//! A routine is a fixed analysis workflow. Its [`RoutineSpec`] declares the
//! fields to gather (in output order), how to score them, and how to extract
//! recommendations from the narrative. Specs are built once at startup.

use crate::analysis::scorer::dimension_inputs;
use crate::error::EngineError;
use crate::models::{DimensionId, RoutineId, SourceId};
use crate::sources::source_of;
use std::collections::{BTreeMap, BTreeSet};

/// A field a routine needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRequirement {
    pub name: &'static str,
    /// Optional fields never cause `InsufficientData`.
    pub optional: bool,
}

/// Shorthand for a non-optional field.
pub const fn required(name: &'static str) -> FieldRequirement {
    FieldRequirement {
        name,
        optional: false,
    }
}

/// Shorthand for an optional field.
pub const fn optional(name: &'static str) -> FieldRequirement {
    FieldRequirement {
        name,
        optional: true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Below,
    Above,
}

/// Which envelope list a rule feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleTarget {
    Recommendation,
    NextAction,
}

/// How `{value}` is rendered in a rule template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueFormat {
    Plain,
    Percent,
    Hours,
    Currency,
}

impl ValueFormat {
    pub fn render(&self, value: f64) -> String {
        match self {
            ValueFormat::Plain => format!("{}", value.round() as i64),
            ValueFormat::Percent => format!("{:.0}%", value * 100.0),
            ValueFormat::Hours => format!("{:.1}h", value),
            ValueFormat::Currency => format!("${:.0}", value),
        }
    }
}

/// Threshold rule on a bundle field.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricRule {
    pub field: &'static str,
    pub comparison: Comparison,
    pub threshold: f64,
    pub target: RuleTarget,
    pub format: ValueFormat,
    /// Text with an optional `{value}` placeholder.
    pub template: &'static str,
}

impl MetricRule {
    pub fn fires(&self, value: f64) -> bool {
        match self.comparison {
            Comparison::Below => value < self.threshold,
            Comparison::Above => value > self.threshold,
        }
    }

    pub fn render(&self, value: f64) -> String {
        self.template.replace("{value}", &self.format.render(value))
    }
}

/// Statically declared rule for deriving recommendations and next actions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionRule {
    /// Heading keywords that open a recommendations section.
    pub recommendation_markers: &'static [&'static str],
    /// Heading keywords that open a next-actions section. Checked first.
    pub action_markers: &'static [&'static str],
    pub metric_rules: &'static [MetricRule],
    /// Used only when nothing else produced a recommendation.
    pub default_recommendations: &'static [&'static str],
    /// Used only when nothing else produced a next action.
    pub default_actions: &'static [&'static str],
}

impl ExtractionRule {
    pub const NONE: ExtractionRule = ExtractionRule {
        recommendation_markers: &[],
        action_markers: &[],
        metric_rules: &[],
        default_recommendations: &[],
        default_actions: &[],
    };
}

/// Static configuration of one routine.
#[derive(Debug, Clone, PartialEq)]
pub struct RoutineSpec {
    pub id: RoutineId,
    pub title: &'static str,
    pub required_sources: BTreeSet<SourceId>,
    /// Declaration order is the bundle's field order.
    pub required_fields: Vec<FieldRequirement>,
    pub scoring_dimensions: Vec<DimensionId>,
    /// Days of history to fetch, ending at the request date.
    pub window_days: u32,
    pub temperature: f32,
    pub system_prompt: &'static str,
    pub extraction: ExtractionRule,
}

impl RoutineSpec {
    /// Build a routine; required sources are derived from the fields.
    pub fn new(
        id: RoutineId,
        required_fields: Vec<FieldRequirement>,
        scoring_dimensions: Vec<DimensionId>,
    ) -> Self {
        let required_sources = required_fields
            .iter()
            .filter_map(|f| source_of(f.name))
            .collect();

        Self {
            id,
            title: id.as_str(),
            required_sources,
            required_fields,
            scoring_dimensions,
            window_days: 30,
            temperature: 0.5,
            system_prompt: "",
            extraction: ExtractionRule::NONE,
        }
    }

    pub fn titled(mut self, title: &'static str) -> Self {
        self.title = title;
        self
    }

    pub fn window(mut self, days: u32) -> Self {
        self.window_days = days;
        self
    }

    pub fn prompt(mut self, system_prompt: &'static str, temperature: f32) -> Self {
        self.system_prompt = system_prompt;
        self.temperature = temperature;
        self
    }

    pub fn extraction(mut self, rule: ExtractionRule) -> Self {
        self.extraction = rule;
        self
    }

    pub fn field_names(&self) -> Vec<&'static str> {
        self.required_fields.iter().map(|f| f.name).collect()
    }

    pub fn is_optional(&self, field: &str) -> bool {
        self.required_fields
            .iter()
            .any(|f| f.name == field && f.optional)
    }

    /// Check the routine against the field catalog and scorer.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| EngineError::InvalidCatalog(format!("{}: {}", self.id, msg));

        if self.window_days == 0 {
            return Err(invalid("window must be at least one day".to_string()));
        }

        let mut seen = BTreeSet::new();
        for field in &self.required_fields {
            if source_of(field.name).is_none() {
                return Err(invalid(format!("unknown field '{}'", field.name)));
            }
            if !seen.insert(field.name) {
                return Err(invalid(format!("field '{}' listed twice", field.name)));
            }
        }

        for dimension in &self.scoring_dimensions {
            for input in dimension_inputs(*dimension) {
                if !seen.contains(input) {
                    return Err(invalid(format!(
                        "dimension {} needs field '{}'",
                        dimension, input
                    )));
                }
            }
        }

        for source in &self.required_sources {
            let backs_field = self
                .required_fields
                .iter()
                .any(|f| source_of(f.name) == Some(*source));
            if !backs_field {
                return Err(invalid(format!("source {} backs no field", source)));
            }
        }

        Ok(())
    }
}

/// All configured routines, keyed by id.
#[derive(Debug, Clone)]
pub struct RoutineCatalog {
    specs: BTreeMap<RoutineId, RoutineSpec>,
}

impl RoutineCatalog {
    /// Build a catalog, validating every spec.
    pub fn new(specs: Vec<RoutineSpec>) -> Result<Self, EngineError> {
        let mut map = BTreeMap::new();
        for spec in specs {
            spec.validate()?;
            if map.insert(spec.id, spec).is_some() {
                return Err(EngineError::InvalidCatalog(
                    "routine defined twice".to_string(),
                ));
            }
        }
        Ok(Self { specs: map })
    }

    /// The built-in growth, operations and communication routines.
    pub fn standard() -> Result<Self, EngineError> {
        Self::new(vec![growth(), operations(), communication()])
    }

    pub fn get(&self, id: RoutineId) -> Result<&RoutineSpec, EngineError> {
        self.specs
            .get(&id)
            .ok_or_else(|| EngineError::UnknownRoutine(id.to_string()))
    }

    pub fn contains(&self, id: RoutineId) -> bool {
        self.specs.contains_key(&id)
    }

    pub fn ids(&self) -> Vec<RoutineId> {
        self.specs.keys().copied().collect()
    }
}

const GROWTH_RULES: &[MetricRule] = &[
    MetricRule {
        field: "trial_conversion",
        comparison: Comparison::Below,
        threshold: 0.25,
        target: RuleTarget::Recommendation,
        format: ValueFormat::Percent,
        template: "Optimize the trial-to-paid funnel (currently {value} conversion)",
    },
    MetricRule {
        field: "retention_d30",
        comparison: Comparison::Below,
        threshold: 0.5,
        target: RuleTarget::Recommendation,
        format: ValueFormat::Percent,
        template: "Implement a retention program targeting D30 retention (currently {value})",
    },
    MetricRule {
        field: "avg_resolution_hours",
        comparison: Comparison::Above,
        threshold: 2.0,
        target: RuleTarget::Recommendation,
        format: ValueFormat::Hours,
        template: "Reduce support resolution time to under 2 hours (currently {value})",
    },
];

const OPERATIONS_RULES: &[MetricRule] = &[
    MetricRule {
        field: "open_deals",
        comparison: Comparison::Above,
        threshold: 0.0,
        target: RuleTarget::NextAction,
        format: ValueFormat::Plain,
        template: "Review pipeline progression for the {value} open deals",
    },
    MetricRule {
        field: "avg_resolution_hours",
        comparison: Comparison::Above,
        threshold: 4.0,
        target: RuleTarget::NextAction,
        format: ValueFormat::Hours,
        template: "Optimize support response times (average {value})",
    },
];

const COMMUNICATION_RULES: &[MetricRule] = &[MetricRule {
    field: "pipeline_value",
    comparison: Comparison::Above,
    threshold: 0.0,
    target: RuleTarget::Recommendation,
    format: ValueFormat::Currency,
    template: "Highlight the {value} open pipeline in the executive summary",
}];

fn growth() -> RoutineSpec {
    RoutineSpec::new(
        RoutineId::Growth,
        vec![
            required("new_contacts"),
            optional("qualified_leads"),
            optional("customers"),
            optional("pipeline_value"),
            required("daily_active_users"),
            optional("retention_d7"),
            optional("retention_d30"),
            optional("trial_conversion"),
            optional("top_event"),
            optional("avg_resolution_hours"),
            optional("avg_satisfaction"),
        ],
        vec![
            DimensionId::Growth,
            DimensionId::Engagement,
            DimensionId::Conversion,
            DimensionId::Support,
        ],
    )
    .titled("Strategic Growth Analysis")
    .window(30)
    .prompt(GROWTH_PROMPT, 0.7)
    .extraction(ExtractionRule {
        recommendation_markers: &["recommend", "opportunit", "strateg"],
        action_markers: &["action plan", "next step", "30-60-90", "action"],
        metric_rules: GROWTH_RULES,
        default_recommendations: &[
            "Optimize the trial-to-paid conversion funnel",
            "Implement a user retention improvement program",
            "Expand product-led growth initiatives",
        ],
        default_actions: &[],
    })
}

fn operations() -> RoutineSpec {
    RoutineSpec::new(
        RoutineId::Operations,
        vec![
            required("open_deals"),
            optional("pipeline_value"),
            optional("daily_active_users"),
            optional("weekly_active_users"),
            optional("conversations"),
            optional("avg_resolution_hours"),
        ],
        vec![
            DimensionId::Pipeline,
            DimensionId::Engagement,
            DimensionId::Resolution,
        ],
    )
    .titled("Weekly Operational Report")
    .window(7)
    .prompt(OPERATIONS_PROMPT, 0.5)
    .extraction(ExtractionRule {
        recommendation_markers: &["recommend", "attention", "improvement", "bottleneck"],
        action_markers: &["action", "next week", "next step"],
        metric_rules: OPERATIONS_RULES,
        default_recommendations: &[],
        default_actions: &[
            "Review pipeline progression for stalled deals",
            "Analyze user engagement drop-offs",
            "Optimize support response times",
            "Schedule team capacity planning session",
        ],
    })
}

fn communication() -> RoutineSpec {
    RoutineSpec::new(
        RoutineId::Communication,
        vec![
            optional("total_contacts"),
            optional("new_contacts"),
            optional("customers"),
            optional("pipeline_value"),
            optional("daily_active_users"),
            optional("monthly_active_users"),
            optional("retention_d30"),
            optional("trial_conversion"),
            optional("avg_satisfaction"),
        ],
        vec![
            DimensionId::Growth,
            DimensionId::Engagement,
            DimensionId::Support,
        ],
    )
    .titled("Board Update Preparation")
    .window(90)
    .prompt(COMMUNICATION_PROMPT, 0.6)
    .extraction(ExtractionRule {
        recommendation_markers: &["recommend", "priorit", "challenge"],
        action_markers: &["next step", "follow-up", "follow up", "action"],
        metric_rules: COMMUNICATION_RULES,
        default_recommendations: &[
            "Schedule follow-up meetings with key stakeholders",
            "Prepare detailed financial projections",
            "Create visual dashboards for metrics presentation",
        ],
        default_actions: &[],
    })
}

const GROWTH_PROMPT: &str = r#"You are a strategic planning assistant for the CEO of a B2B SaaS company.
Analyze the business metrics provided as JSON and identify growth opportunities.
Structure your answer with a "Recommendations" section and an "Action Plan" section,
each as a bulleted list. Metrics marked unavailable must not be guessed."#;

const OPERATIONS_PROMPT: &str = r#"You are an operational intelligence assistant for the CEO of a B2B SaaS company.
Write a weekly operational report from the metrics provided as JSON.
Include an "Areas Requiring Attention" section and a "Recommended Actions for Next Week" section,
each as a bulleted list. Metrics marked unavailable must not be guessed."#;

const COMMUNICATION_PROMPT: &str = r#"You are a communication assistant for the CEO of a B2B SaaS company.
Prepare board update talking points from the metrics provided as JSON.
Include an executive summary, a "Priorities" section and a "Next Steps" section,
each as a bulleted list. Metrics marked unavailable must not be guessed."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_is_valid() {
        let catalog = RoutineCatalog::standard().unwrap();
        assert_eq!(catalog.ids(), RoutineId::ALL.to_vec());

        let growth = catalog.get(RoutineId::Growth).unwrap();
        assert_eq!(growth.field_names()[0], "new_contacts");
        assert!(growth.required_sources.contains(&SourceId::Support));
        assert!(!growth.is_optional("daily_active_users"));
        assert!(growth.is_optional("top_event"));
    }

    #[test]
    fn test_operations_window_is_weekly() {
        let catalog = RoutineCatalog::standard().unwrap();
        assert_eq!(catalog.get(RoutineId::Operations).unwrap().window_days, 7);
    }

    #[test]
    fn test_unknown_routine_lookup() {
        let catalog = RoutineCatalog::new(vec![growth()]).unwrap();
        assert_eq!(
            catalog.get(RoutineId::Operations),
            Err(EngineError::UnknownRoutine("operations".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_unknown_field() {
        let spec = RoutineSpec::new(RoutineId::Growth, vec![required("mrr")], vec![]);
        assert!(matches!(spec.validate(), Err(EngineError::InvalidCatalog(_))));
    }

    #[test]
    fn test_validate_rejects_dimension_without_inputs() {
        let spec = RoutineSpec::new(
            RoutineId::Growth,
            vec![required("new_contacts")],
            vec![DimensionId::Engagement],
        );
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("daily_active_users"));
    }

    #[test]
    fn test_validate_rejects_duplicate_field() {
        let spec = RoutineSpec::new(
            RoutineId::Growth,
            vec![required("new_contacts"), optional("new_contacts")],
            vec![],
        );
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_metric_rule_render() {
        let rule = GROWTH_RULES[0];
        assert!(rule.fires(0.22));
        assert!(!rule.fires(0.30));
        assert_eq!(
            rule.render(0.22),
            "Optimize the trial-to-paid funnel (currently 22% conversion)"
        );
    }
}
