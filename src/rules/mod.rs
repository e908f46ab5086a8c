//! Declarative insight and recommendation rules.
//!
//! Both engines evaluate an ordered table of rules against one precomputed
//! [`Signals`] snapshot, so every metric is computed once per request regardless of
//! how many rules read it.

pub mod insights;
pub mod recommendations;
pub mod signals;

pub use signals::Signals;

use crate::config::{Benchmarks, RuleThresholds};
use serde::Serialize;

/// Impact, priority and effort grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Medium,
    Low,
}

impl Level {
    /// Sort weight: high = 3, medium = 2, low = 1.
    pub const fn weight(self) -> u8 {
        match self {
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
        }
    }
}

/// Everything a rule may read.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub signals: &'a Signals,
    pub thresholds: &'a RuleThresholds,
    pub benchmarks: &'a Benchmarks,
}
