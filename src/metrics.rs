//! Per-metric aggregation and polarity policy.
//!
//! Every metric has a default `(min_wins, aggregator)` pair, taken from a
//! builtin table of well-known planner metrics or guessed from the metric
//! name. Session overrides sit on top and are dropped on reset.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::data::{Dataset, SCORE_METRIC, SCORE_METRIC_NO_BOUNDS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    Sum,
    Mean,
    Gmean,
}

impl Aggregator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregator::Sum => "sum",
            Aggregator::Mean => "mean",
            Aggregator::Gmean => "gmean",
        }
    }

    /// Aggregate one column. `None` for an empty column or an undefined
    /// result (e.g. gmean over negative values). Zeros must already have
    /// been substituted for gmean.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let out = match self {
            Aggregator::Sum => values.iter().sum(),
            Aggregator::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Aggregator::Gmean => {
                let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
                (log_sum / values.len() as f64).exp()
            }
        };
        out.is_finite().then_some(out)
    }
}

impl fmt::Display for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Aggregator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sum" => Ok(Aggregator::Sum),
            "mean" | "arithmetic_mean" => Ok(Aggregator::Mean),
            "gmean" | "geometric_mean" => Ok(Aggregator::Gmean),
            other => Err(format!("unknown aggregator '{}'", other)),
        }
    }
}

/// Builtin defaults: `(name, min_wins, aggregator)`.
const BUILTIN: &[(&str, bool, Aggregator)] = &[
    ("cost", true, Aggregator::Sum),
    ("coverage", false, Aggregator::Sum),
    ("dead_ends", false, Aggregator::Sum),
    ("evaluations", true, Aggregator::Gmean),
    ("expansions", true, Aggregator::Gmean),
    ("expansions_until_last_jump", true, Aggregator::Gmean),
    ("generated", true, Aggregator::Gmean),
    ("initial_h_value", false, Aggregator::Sum),
    ("memory", true, Aggregator::Gmean),
    ("plan_length", true, Aggregator::Sum),
    ("planner_memory", true, Aggregator::Gmean),
    ("planner_time", true, Aggregator::Gmean),
    ("search_time", true, Aggregator::Gmean),
    ("total_time", true, Aggregator::Gmean),
    ("unsolvable", false, Aggregator::Sum),
    (SCORE_METRIC, false, Aggregator::Sum),
    (SCORE_METRIC_NO_BOUNDS, false, Aggregator::Sum),
];

const MIN_WINS_HINTS: &[&str] = &["cost", "time", "memory"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MetricPolicy {
    /// `None`: not orderable (no ranking or win semantics)
    pub default_min_wins: Option<bool>,
    /// `None`: not aggregated
    pub default_aggregator: Option<Aggregator>,
    pub override_min_wins: Option<bool>,
    pub override_aggregator: Option<Aggregator>,
}

impl MetricPolicy {
    pub fn defaults_for(metric: &str, numeric: bool) -> Self {
        if !numeric {
            return Self::default();
        }
        let (min_wins, aggregator) = match BUILTIN.iter().find(|(name, _, _)| *name == metric) {
            Some((_, min_wins, agg)) => (*min_wins, *agg),
            None if metric.starts_with("score_") => (false, Aggregator::Sum),
            None => {
                let lower = metric.to_lowercase();
                (MIN_WINS_HINTS.iter().any(|h| lower.contains(h)), Aggregator::Sum)
            }
        };
        Self {
            default_min_wins: Some(min_wins),
            default_aggregator: Some(aggregator),
            override_min_wins: None,
            override_aggregator: None,
        }
    }

    pub fn effective_min_wins(&self) -> Option<bool> {
        self.override_min_wins.or(self.default_min_wins)
    }

    pub fn effective_aggregator(&self) -> Option<Aggregator> {
        self.override_aggregator.or(self.default_aggregator)
    }

    pub fn is_overridden(&self) -> bool {
        self.override_min_wins.is_some() || self.override_aggregator.is_some()
    }
}

/// Fields of an override call; `None` leaves that part untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PolicyOverride {
    pub aggregator: Option<Aggregator>,
    pub min_wins: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PolicyTable {
    policies: BTreeMap<String, MetricPolicy>,
}

impl PolicyTable {
    pub fn for_dataset(dataset: &Dataset) -> Self {
        let policies = dataset
            .metrics()
            .iter()
            .map(|m| (m.clone(), MetricPolicy::defaults_for(m, dataset.is_numeric(m))))
            .collect();
        Self { policies }
    }

    pub fn get(&self, metric: &str) -> Option<&MetricPolicy> {
        self.policies.get(metric)
    }

    pub fn effective_aggregator(&self, metric: &str) -> Option<Aggregator> {
        self.policies.get(metric).and_then(MetricPolicy::effective_aggregator)
    }

    pub fn effective_min_wins(&self, metric: &str) -> Option<bool> {
        self.policies.get(metric).and_then(MetricPolicy::effective_min_wins)
    }

    /// Apply an override. Returns false for unknown or non-aggregatable
    /// metrics, leaving the table untouched.
    pub fn set_override(&mut self, metric: &str, change: PolicyOverride) -> bool {
        match self.policies.get_mut(metric) {
            Some(policy) if policy.default_aggregator.is_some() => {
                if let Some(agg) = change.aggregator {
                    policy.override_aggregator = Some(agg);
                }
                if let Some(min_wins) = change.min_wins {
                    policy.override_min_wins = Some(min_wins);
                }
                true
            }
            _ => false,
        }
    }

    pub fn reset(&mut self, metric: &str) -> bool {
        match self.policies.get_mut(metric) {
            Some(policy) => {
                policy.override_aggregator = None;
                policy.override_min_wins = None;
                true
            }
            None => false,
        }
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&String, &MetricPolicy)> {
        self.policies.iter().filter(|(_, p)| p.is_overridden())
    }
}
