//! Analysis modules.
//!
//! Gathering metrics from sources and scoring the resulting bundle.

pub mod aggregator;
pub mod scorer;

pub use aggregator::{Aggregator, GatherSettings};
pub use scorer::{HealthScorer, ScoringConfig};
