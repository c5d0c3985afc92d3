//! Expand/collapse state of the report tree.
//!
//! `reduce` is the only way the fold state changes. It is a pure
//! transition that returns the new state together with the effect the
//! engine must carry out (an eager domain recompute, a detail view).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Wildcard used in the textual `(metric, domain, problem)` form.
pub const WILDCARD: &str = "*";

/// One row of the report tree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RowKey {
    Metric(String),
    Domain { metric: String, domain: String },
    Problem { metric: String, domain: String, problem: String },
}

impl RowKey {
    /// Build a key from its textual triple; `"*"` marks an aggregate level.
    pub fn from_triple(metric: &str, domain: &str, problem: &str) -> Self {
        if domain == WILDCARD {
            RowKey::Metric(metric.to_string())
        } else if problem == WILDCARD {
            RowKey::Domain {
                metric: metric.to_string(),
                domain: domain.to_string(),
            }
        } else {
            RowKey::Problem {
                metric: metric.to_string(),
                domain: domain.to_string(),
                problem: problem.to_string(),
            }
        }
    }

    pub fn metric(&self) -> &str {
        match self {
            RowKey::Metric(m) => m,
            RowKey::Domain { metric, .. } | RowKey::Problem { metric, .. } => metric,
        }
    }

    pub fn triple(&self) -> (&str, &str, &str) {
        match self {
            RowKey::Metric(m) => (m, WILDCARD, WILDCARD),
            RowKey::Domain { metric, domain } => (metric, domain, WILDCARD),
            RowKey::Problem { metric, domain, problem } => (metric, domain, problem),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (m, d, p) = self.triple();
        write!(f, "({}, {}, {})", m, d, p)
    }
}

/// metric -> expanded domains. A metric key present means the metric row
/// is expanded, even with an empty domain set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldState {
    pub expanded: BTreeMap<String, BTreeSet<String>>,
}

impl FoldState {
    pub fn is_metric_expanded(&self, metric: &str) -> bool {
        self.expanded.contains_key(metric)
    }

    pub fn is_domain_expanded(&self, metric: &str, domain: &str) -> bool {
        self.expanded
            .get(metric)
            .map(|domains| domains.contains(domain))
            .unwrap_or(false)
    }

    pub fn expanded_metrics(&self) -> impl Iterator<Item = &String> {
        self.expanded.keys()
    }
}

/// What the engine has to do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FoldEffect {
    /// Metric row opened: domain aggregates must be fresh before rendering
    MetricExpanded(String),
    MetricCollapsed(String),
    DomainToggled { metric: String, domain: String, expanded: bool },
    /// Leaf row: hand over to the per-problem detail view
    OpenDetail { domain: String, problem: String },
    /// Domain toggle under a collapsed metric
    Ignored,
}

/// Pure transition: (FoldState, toggle) -> (FoldState, effect)
pub fn reduce(mut state: FoldState, key: &RowKey) -> (FoldState, FoldEffect) {
    let effect = match key {
        RowKey::Problem { domain, problem, .. } => FoldEffect::OpenDetail {
            domain: domain.clone(),
            problem: problem.clone(),
        },
        RowKey::Domain { metric, domain } => match state.expanded.get_mut(metric) {
            Some(domains) => {
                let expanded = if domains.remove(domain) {
                    false
                } else {
                    domains.insert(domain.clone());
                    true
                };
                FoldEffect::DomainToggled {
                    metric: metric.clone(),
                    domain: domain.clone(),
                    expanded,
                }
            }
            None => FoldEffect::Ignored,
        },
        RowKey::Metric(metric) => {
            if state.expanded.remove(metric).is_some() {
                FoldEffect::MetricCollapsed(metric.clone())
            } else {
                state.expanded.insert(metric.clone(), BTreeSet::new());
                FoldEffect::MetricExpanded(metric.clone())
            }
        }
    };
    (state, effect)
}

/// Rows on screen, in tree order: each selected metric, then its domain
/// rows when expanded, then problem rows under each expanded domain.
pub fn visible_rows(
    fold: &FoldState,
    metrics: &[String],
    domains: &[String],
    problems_by_domain: &BTreeMap<String, Vec<String>>,
) -> Vec<RowKey> {
    let mut rows = Vec::new();
    for metric in metrics {
        rows.push(RowKey::Metric(metric.clone()));
        let Some(open_domains) = fold.expanded.get(metric) else {
            continue;
        };
        for domain in domains {
            rows.push(RowKey::Domain {
                metric: metric.clone(),
                domain: domain.clone(),
            });
            if !open_domains.contains(domain) {
                continue;
            }
            for problem in problems_by_domain.get(domain).into_iter().flatten() {
                rows.push(RowKey::Problem {
                    metric: metric.clone(),
                    domain: domain.clone(),
                    problem: problem.clone(),
                });
            }
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn problems() -> BTreeMap<String, Vec<String>> {
        BTreeMap::from([
            ("D1".to_string(), s(&["p1", "p2"])),
            ("D2".to_string(), s(&["q1"])),
        ])
    }

    #[test]
    fn test_from_triple() {
        assert_eq!(RowKey::from_triple("cost", "*", "*"), RowKey::Metric("cost".into()));
        assert!(matches!(RowKey::from_triple("cost", "D1", "*"), RowKey::Domain { .. }));
        assert!(matches!(RowKey::from_triple("cost", "D1", "p1"), RowKey::Problem { .. }));
        assert_eq!(RowKey::from_triple("cost", "D1", "p1").to_string(), "(cost, D1, p1)");
    }

    #[test]
    fn test_metric_toggle_round_trip() {
        let start = FoldState::default();
        let (open, effect) = reduce(start.clone(), &RowKey::Metric("cost".into()));
        assert_eq!(effect, FoldEffect::MetricExpanded("cost".into()));
        assert!(open.is_metric_expanded("cost"));
        let (closed, effect) = reduce(open, &RowKey::Metric("cost".into()));
        assert_eq!(effect, FoldEffect::MetricCollapsed("cost".into()));
        assert_eq!(closed, start);
    }

    #[test]
    fn test_domain_toggle_requires_open_metric() {
        let key = RowKey::from_triple("cost", "D1", "*");
        let (state, effect) = reduce(FoldState::default(), &key);
        assert_eq!(effect, FoldEffect::Ignored);
        assert_eq!(state, FoldState::default());

        let (state, _) = reduce(state, &RowKey::Metric("cost".into()));
        let (state, effect) = reduce(state, &key);
        assert!(matches!(effect, FoldEffect::DomainToggled { expanded: true, .. }));
        assert!(state.is_domain_expanded("cost", "D1"));
        let (state, effect) = reduce(state, &key);
        assert!(matches!(effect, FoldEffect::DomainToggled { expanded: false, .. }));
        assert!(!state.is_domain_expanded("cost", "D1"));
    }

    #[test]
    fn test_leaf_toggle_leaves_state() {
        let (state, _) = reduce(FoldState::default(), &RowKey::Metric("cost".into()));
        let before = state.clone();
        let (after, effect) = reduce(state, &RowKey::from_triple("cost", "D1", "p2"));
        assert_eq!(after, before);
        assert_eq!(
            effect,
            FoldEffect::OpenDetail { domain: "D1".into(), problem: "p2".into() }
        );
    }

    #[test]
    fn test_visible_rows_nesting() {
        let metrics = s(&["cost", "time"]);
        let domains = s(&["D1", "D2"]);
        let collapsed = visible_rows(&FoldState::default(), &metrics, &domains, &problems());
        assert_eq!(collapsed.len(), 2);

        let (state, _) = reduce(FoldState::default(), &RowKey::Metric("cost".into()));
        let (state, _) = reduce(state, &RowKey::from_triple("cost", "D1", "*"));
        let rows = visible_rows(&state, &metrics, &domains, &problems());
        let triples: Vec<(&str, &str, &str)> = rows.iter().map(RowKey::triple).collect();
        assert_eq!(
            triples,
            vec![
                ("cost", "*", "*"),
                ("cost", "D1", "*"),
                ("cost", "D1", "p1"),
                ("cost", "D1", "p2"),
                ("cost", "D2", "*"),
                ("time", "*", "*"),
            ]
        );
    }

    #[test]
    fn test_visible_rows_respect_selection() {
        let (state, _) = reduce(FoldState::default(), &RowKey::Metric("cost".into()));
        let (state, _) = reduce(state, &RowKey::from_triple("cost", "D1", "*"));
        // D1 deselected: its problems disappear with its row
        let rows = visible_rows(&state, &s(&["cost"]), &s(&["D2"]), &problems());
        assert_eq!(rows.len(), 2);
        // metric deselected: nothing of it remains
        assert!(visible_rows(&state, &[], &s(&["D1"]), &problems()).is_empty());
    }
}
