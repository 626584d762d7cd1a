//! Request routing.
//!
//! Free-text requests are matched against an ordered list of keyword rules.
//! The first rule sharing a token with the request wins; otherwise the
//! default routine is used.

use crate::models::RoutineId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One routing rule: any of `keywords` selects `routine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub routine: RoutineId,
    pub keywords: Vec<String>,
}

impl RoutingRule {
    pub fn new(routine: RoutineId, keywords: &[&str]) -> Self {
        Self {
            routine,
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Why a request was routed where it was.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub routine: RoutineId,
    /// The keyword that matched, or `None` when the default was used.
    pub matched: Option<String>,
}

/// Ordered keyword router.
#[derive(Debug, Clone)]
pub struct Router {
    rules: Vec<(BTreeSet<String>, RoutineId)>,
    default: RoutineId,
}

impl Router {
    /// Build a router. Keywords are lower-cased; rule order is priority order.
    pub fn new(rules: &[RoutingRule], default: RoutineId) -> Self {
        let rules = rules
            .iter()
            .map(|rule| {
                let keywords = rule
                    .keywords
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect();
                (keywords, rule.routine)
            })
            .collect();

        Self { rules, default }
    }

    pub fn default_routine(&self) -> RoutineId {
        self.default
    }

    /// Route a request to a routine.
    pub fn classify(&self, request: &str) -> RoutineId {
        self.explain(request).routine
    }

    /// Route a request and report which keyword decided it.
    pub fn explain(&self, request: &str) -> Classification {
        let tokens = tokenize(request);

        for (keywords, routine) in &self.rules {
            if let Some(hit) = keywords.iter().find(|k| tokens.contains(*k)) {
                return Classification {
                    routine: *routine,
                    matched: Some(hit.clone()),
                };
            }
        }

        Classification {
            routine: self.default,
            matched: None,
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new(&default_rules(), RoutineId::Growth)
    }
}

/// The built-in rule list, in priority order.
pub fn default_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule::new(
            RoutineId::Growth,
            &[
                "growth",
                "strategy",
                "strategic",
                "market",
                "opportunity",
                "opportunities",
                "competitive",
                "comprehensive",
                "analysis",
            ],
        ),
        RoutingRule::new(
            RoutineId::Operations,
            &["weekly", "report", "kpi", "kpis", "performance", "operational"],
        ),
        RoutingRule::new(
            RoutineId::Communication,
            &[
                "board",
                "meeting",
                "presentation",
                "update",
                "communication",
                "stakeholder",
                "stakeholders",
            ],
        ),
    ]
}

/// Lower-case the request and split it on anything that isn't alphanumeric.
pub fn tokenize(request: &str) -> BTreeSet<String> {
    request
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let router = Router::default();
        assert_eq!(router.classify("Where are our growth opportunities?"), RoutineId::Growth);
        assert_eq!(router.classify("Generate the weekly KPI summary"), RoutineId::Operations);
        assert_eq!(router.classify("Prep talking points for the board"), RoutineId::Communication);
    }

    #[test]
    fn test_analysis_requests_route_to_growth() {
        let router = Router::default();
        assert_eq!(router.classify("weekly analysis"), RoutineId::Growth);
        assert_eq!(router.classify("A comprehensive review"), RoutineId::Growth);
    }

    #[test]
    fn test_unmatched_request_uses_default() {
        let router = Router::new(&default_rules(), RoutineId::Operations);
        let classification = router.explain("hello there");
        assert_eq!(classification.routine, RoutineId::Operations);
        assert_eq!(classification.matched, None);
    }

    #[test]
    fn test_rule_order_decides_ties() {
        let growth = RoutingRule::new(RoutineId::Growth, &["growth", "strategy"]);
        let operations = RoutingRule::new(RoutineId::Operations, &["report", "weekly"]);

        let growth_first = Router::new(&[growth.clone(), operations.clone()], RoutineId::Communication);
        assert_eq!(growth_first.classify("weekly growth report"), RoutineId::Growth);

        let operations_first = Router::new(&[operations, growth], RoutineId::Communication);
        assert_eq!(operations_first.classify("weekly growth report"), RoutineId::Operations);
    }

    #[test]
    fn test_matches_whole_tokens_only() {
        let router = Router::new(
            &[RoutingRule::new(RoutineId::Operations, &["report"])],
            RoutineId::Growth,
        );
        assert_eq!(router.classify("reporting cadence"), RoutineId::Growth);
        assert_eq!(router.classify("REPORT, please!"), RoutineId::Operations);
    }

    #[test]
    fn test_explain_names_keyword() {
        let classification = Router::default().explain("Board meeting next week");
        assert_eq!(classification.routine, RoutineId::Communication);
        assert_eq!(classification.matched.as_deref(), Some("board"));
    }

    #[test]
    fn test_tokenize() {
        let tokens = tokenize("Q3 board-meeting: KPIs?");
        assert!(tokens.contains("q3"));
        assert!(tokens.contains("board"));
        assert!(tokens.contains("meeting"));
        assert!(tokens.contains("kpis"));
    }
}
