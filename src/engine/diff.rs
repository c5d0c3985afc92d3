//! Side-by-side view of two algorithms with a difference column.
//!
//! Aggregate rows are recomputed over the problems both algorithms solved,
//! independent of the engine's algorithm selection. Problem rows carry the
//! raw values.

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;

use super::aggregate::{AggregationInput, Coverage, FilteredData};
use super::fold::RowKey;
use crate::data::Value;
use crate::logging::{log, obj, v_list, Category, Level};

/// How the second algorithm fares against the first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Better,
    Worse,
    Even,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffRow {
    pub metric: String,
    pub domain: String,
    pub problem: String,
    pub first: Value,
    pub second: Value,
    /// `second - first`, or `second / first - 1` when percentual. `None` for
    /// opaque or missing values and for a zero base.
    pub diff: Option<f64>,
    /// `None` when the metric has no polarity or the values don't compare
    pub verdict: Option<Verdict>,
    pub coverage: Option<String>,
}

pub fn difference(first: Option<f64>, second: Option<f64>, percentual: bool) -> Option<f64> {
    let (a, b) = (first?, second?);
    let d = if percentual {
        if a == 0.0 {
            return None;
        }
        b / a - 1.0
    } else {
        b - a
    };
    d.is_finite().then_some(d)
}

/// Judged on the raw values, so a percentual diff against a negative base
/// still gets the right direction.
pub fn verdict(first: Option<f64>, second: Option<f64>, min_wins: Option<bool>) -> Option<Verdict> {
    let (a, b, min_wins) = (first?, second?, min_wins?);
    let d = b - a;
    if d.is_nan() {
        None
    } else if d == 0.0 {
        Some(Verdict::Even)
    } else if (d < 0.0) == min_wins {
        Some(Verdict::Better)
    } else {
        Some(Verdict::Worse)
    }
}

/// Diff rows for `rows`, in order. `input.algorithms` holds exactly the two
/// algorithms being compared.
pub fn diff_rows(input: &AggregationInput, rows: &[RowKey], percentual: bool) -> Vec<DiffRow> {
    let [first, second] = input.algorithms else {
        return Vec::new();
    };
    let mut filtered: BTreeMap<&str, FilteredData> = BTreeMap::new();
    let mut out = Vec::with_capacity(rows.len());

    for key in rows {
        let (metric, domain, problem) = key.triple();
        let (a, b, coverage) = match key {
            RowKey::Problem { .. } => (
                input.dataset.value(metric, domain, problem, first).clone(),
                input.dataset.value(metric, domain, problem, second).clone(),
                None,
            ),
            RowKey::Metric(_) | RowKey::Domain { .. } => match input.policy.effective_aggregator(metric) {
                None => (Value::Missing, Value::Missing, None),
                Some(aggregator) => {
                    let data = filtered.entry(metric).or_insert_with(|| {
                        FilteredData::common_subset(input.dataset, metric, input.algorithms, input.domains)
                    });
                    let (scope, total) = match key {
                        RowKey::Domain { .. } => (Some(domain), input.dataset.problems_of(domain).len()),
                        _ => (
                            None,
                            input.domains.iter().map(|d| input.dataset.problems_of(d).len()).sum(),
                        ),
                    };
                    let (values, contributing) = data.aggregate_within(scope, aggregator, input.epsilon);
                    let cell = |alg: &String| values.get(alg).map_or(Value::Missing, |v| Value::Number(*v));
                    (cell(first), cell(second), Some(Coverage { contributing, total }.to_string()))
                }
            },
        };
        let (x, y) = (a.as_f64(), b.as_f64());
        out.push(DiffRow {
            metric: metric.to_string(),
            domain: domain.to_string(),
            problem: problem.to_string(),
            diff: difference(x, y, percentual),
            verdict: verdict(x, y, input.policy.effective_min_wins(metric)),
            first: a,
            second: b,
            coverage,
        });
    }

    log(
        Level::Debug,
        Category::Compare,
        "diff_rows",
        obj(&[
            ("algorithms", v_list(input.algorithms)),
            ("rows", json!(out.len())),
            ("percentual", json!(percentual)),
        ]),
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Dataset, Record};
    use crate::metrics::PolicyTable;
    use std::collections::BTreeSet;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    #[test]
    fn test_difference_plain_and_percentual() {
        assert_eq!(difference(Some(10.0), Some(15.0), false), Some(5.0));
        assert_eq!(difference(Some(10.0), Some(15.0), true), Some(0.5));
        assert_eq!(difference(Some(0.0), Some(3.0), true), None);
        assert_eq!(difference(Some(0.0), Some(0.0), true), None);
        assert_eq!(difference(Some(0.0), Some(3.0), false), Some(3.0));
        assert_eq!(difference(None, Some(3.0), false), None);
    }

    #[test]
    fn test_verdict_follows_polarity() {
        assert_eq!(verdict(Some(10.0), Some(5.0), Some(true)), Some(Verdict::Better));
        assert_eq!(verdict(Some(10.0), Some(5.0), Some(false)), Some(Verdict::Worse));
        assert_eq!(verdict(Some(2.0), Some(2.0), Some(true)), Some(Verdict::Even));
        assert_eq!(verdict(Some(-2.0), Some(-1.0), Some(false)), Some(Verdict::Better));
        assert_eq!(verdict(Some(1.0), Some(2.0), None), None);
    }

    #[test]
    fn test_rows_over_pair_subset() {
        let ds = Dataset::load(
            &[
                Record::new("A", "D", "p1").with("cost", n(10.0)).with("error", Value::Text("ok".into())),
                Record::new("B", "D", "p1").with("cost", n(12.0)).with("error", Value::Text("oom".into())),
                Record::new("A", "D", "p2").with("cost", n(0.0)),
                Record::new("B", "D", "p2").with("cost", n(4.0)),
                Record::new("A", "D", "p3").with("cost", n(7.0)),
            ],
            None,
        );
        let policy = PolicyTable::for_dataset(&ds);
        let algorithms = vec!["A".to_string(), "B".to_string()];
        let domains = BTreeSet::from(["D".to_string()]);
        let input = AggregationInput {
            dataset: &ds,
            policy: &policy,
            algorithms: &algorithms,
            domains: &domains,
            epsilon: 1e-6,
        };
        let rows = [
            RowKey::Metric("cost".into()),
            RowKey::from_triple("cost", "D", "p2"),
            RowKey::from_triple("error", "D", "p1"),
            RowKey::Metric("error".into()),
        ];

        let plain = diff_rows(&input, &rows, false);
        // p3 lacks B and stays out of the sum
        assert_eq!((plain[0].first.clone(), plain[0].second.clone()), (n(10.0), n(16.0)));
        assert_eq!(plain[0].diff, Some(6.0));
        assert_eq!(plain[0].verdict, Some(Verdict::Worse));
        assert_eq!(plain[0].coverage.as_deref(), Some("2/3"));
        assert_eq!(plain[1].diff, Some(4.0));
        // opaque cells and aggregates have no diff
        assert_eq!(plain[2].first, Value::Text("ok".into()));
        assert_eq!(plain[2].diff, None);
        assert_eq!(plain[2].verdict, None);
        assert_eq!(plain[3].first, Value::Missing);
        assert_eq!(plain[3].coverage, None);

        let pct = diff_rows(&input, &rows, true);
        assert!((pct[0].diff.unwrap() - 0.6).abs() < 1e-12);
        // zero base
        assert_eq!(pct[1].diff, None);
        assert_eq!(pct[1].verdict, Some(Verdict::Worse));
    }
}
