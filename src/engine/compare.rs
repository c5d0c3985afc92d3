//! Pairwise win counts between algorithms on one metric.
//!
//! A missing run is imputed as the worst possible value, so it always
//! loses against a present one and ties against another missing one.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::data::{Dataset, ProblemKey};
use crate::logging::{log, obj, v_list, v_str, Category, Level};
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonMatrices {
    pub metric: String,
    pub algorithms: Vec<String>,
    pub min_wins: bool,
    /// `problem_wins[i][j]`: problems where `algorithms[i]` beats `algorithms[j]`
    pub problem_wins: Vec<Vec<u32>>,
    /// `domain_wins[i][j]`: domains where the summed signs favour `algorithms[i]`
    pub domain_wins: Vec<Vec<u32>>,
    #[serde(skip)]
    values: BTreeMap<ProblemKey, Vec<Option<f64>>>,
}

/// One compared problem behind a `problem_wins` cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemComparison {
    pub domain: String,
    pub problem: String,
    /// Raw values; `None` was imputed as a loss
    pub first: Option<f64>,
    pub second: Option<f64>,
    pub difference: f64,
    /// +1 when the first algorithm wins, -1 when it loses, 0 on a tie
    pub sign: i64,
}

/// One compared domain behind a `domain_wins` cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DomainComparison {
    pub domain: String,
    pub sign_sum: i64,
    pub problems: usize,
}

fn sign(x: f64) -> i64 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

impl ComparisonMatrices {
    /// Empty placeholder, e.g. for an empty dataset.
    pub fn placeholder(metric: &str) -> Self {
        Self {
            metric: metric.to_string(),
            algorithms: Vec::new(),
            min_wins: false,
            problem_wins: Vec::new(),
            domain_wins: Vec::new(),
            values: BTreeMap::new(),
        }
    }

    /// Win counts over the given problem rows. Values absent from the
    /// dataset, or opaque, are imputed as a loss.
    pub fn compute<'a>(
        dataset: &Dataset,
        metric: &str,
        algorithms: &[String],
        problems: impl IntoIterator<Item = &'a ProblemKey>,
        min_wins: bool,
    ) -> Self {
        let values: BTreeMap<ProblemKey, Vec<Option<f64>>> = problems
            .into_iter()
            .map(|(domain, problem)| {
                let row = algorithms
                    .iter()
                    .map(|a| dataset.value(metric, domain, problem, a).as_f64())
                    .collect();
                ((domain.clone(), problem.clone()), row)
            })
            .collect();

        let mut out = Self {
            metric: metric.to_string(),
            algorithms: algorithms.to_vec(),
            min_wins,
            problem_wins: vec![vec![0; algorithms.len()]; algorithms.len()],
            domain_wins: vec![vec![0; algorithms.len()]; algorithms.len()],
            values,
        };
        for i in 0..algorithms.len() {
            for j in 0..algorithms.len() {
                if i == j {
                    continue;
                }
                out.problem_wins[i][j] = out
                    .signs(i, j)
                    .filter(|(_, s)| *s > 0)
                    .count() as u32;
                out.domain_wins[i][j] = out
                    .domain_sums(i, j)
                    .values()
                    .filter(|(sum, _)| *sum > 0)
                    .count() as u32;
            }
        }
        log(
            Level::Info,
            Category::Compare,
            "comparison_computed",
            obj(&[
                ("metric", v_str(metric)),
                ("algorithms", v_list(algorithms)),
                ("problems", json!(out.values.len())),
                ("min_wins", json!(min_wins)),
            ]),
        );
        out
    }

    fn impute(&self, v: Option<f64>) -> f64 {
        match v {
            Some(x) => x,
            None if self.min_wins => f64::INFINITY,
            None => f64::NEG_INFINITY,
        }
    }

    fn difference(&self, row: &[Option<f64>], i: usize, j: usize) -> f64 {
        self.impute(row[i]) - self.impute(row[j])
    }

    /// Polarity-adjusted sign of `i` vs `j` per problem. Both missing gives
    /// an undefined difference, which counts as a tie.
    fn signs(&self, i: usize, j: usize) -> impl Iterator<Item = (&ProblemKey, i64)> + '_ {
        let flip = if self.min_wins { -1 } else { 1 };
        self.values
            .iter()
            .map(move |(pk, row)| (pk, sign(self.difference(row, i, j)) * flip))
    }

    /// domain -> (summed sign, problem count)
    fn domain_sums(&self, i: usize, j: usize) -> BTreeMap<&str, (i64, usize)> {
        let mut sums: BTreeMap<&str, (i64, usize)> = BTreeMap::new();
        for ((domain, _), s) in self.signs(i, j) {
            let entry = sums.entry(domain.as_str()).or_default();
            entry.0 += s;
            entry.1 += 1;
        }
        sums
    }

    pub fn index_of(&self, algorithm: &str) -> Option<usize> {
        self.algorithms.iter().position(|a| a == algorithm)
    }

    pub fn problem_wins_of(&self, a1: &str, a2: &str) -> Option<u32> {
        Some(self.problem_wins[self.index_of(a1)?][self.index_of(a2)?])
    }

    pub fn domain_wins_of(&self, a1: &str, a2: &str) -> Option<u32> {
        Some(self.domain_wins[self.index_of(a1)?][self.index_of(a2)?])
    }

    /// Number of problems the matrices were computed over.
    pub fn num_problems(&self) -> usize {
        self.values.len()
    }

    pub fn is_placeholder(&self) -> bool {
        self.algorithms.is_empty()
    }

    /// Every compared problem for the pair, with its polarity-adjusted sign.
    /// The rows with `sign > 0` are the ones counted in `problem_wins[a1][a2]`.
    pub fn drill_down(&self, a1: &str, a2: &str) -> Option<Vec<ProblemComparison>> {
        let (i, j) = (self.index_of(a1)?, self.index_of(a2)?);
        let rows = self
            .signs(i, j)
            .filter_map(|(pk, sign)| {
                let row = self.values.get(pk)?;
                Some(ProblemComparison {
                    domain: pk.0.clone(),
                    problem: pk.1.clone(),
                    first: row[i],
                    second: row[j],
                    difference: self.difference(row, i, j),
                    sign,
                })
            })
            .collect();
        Some(rows)
    }

    /// Every compared domain with its summed sign; positive sums are counted
    /// in `domain_wins[a1][a2]`.
    pub fn domain_drill_down(&self, a1: &str, a2: &str) -> Option<Vec<DomainComparison>> {
        let (i, j) = (self.index_of(a1)?, self.index_of(a2)?);
        let rows = self
            .domain_sums(i, j)
            .into_iter()
            .map(|(domain, (sign_sum, problems))| DomainComparison {
                domain: domain.to_string(),
                sign_sum,
                problems,
            })
            .collect();
        Some(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Record, Value};
    use crate::engine::aggregate::FilteredData;
    use std::collections::BTreeSet;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn all_domains(ds: &Dataset) -> BTreeSet<String> {
        ds.domains().iter().cloned().collect()
    }

    fn common(ds: &Dataset, metric: &str, algorithms: &[String], domains: &BTreeSet<String>) -> Vec<ProblemKey> {
        FilteredData::common_subset(ds, metric, algorithms, domains)
            .rows
            .into_keys()
            .collect()
    }

    fn every_problem(ds: &Dataset, metric: &str) -> Vec<ProblemKey> {
        ds.rows_of(metric).into_iter().flatten().map(|(pk, _)| pk.clone()).collect()
    }

    #[test]
    fn test_scenario_wins() {
        let ds = Dataset::load(
            &[
                Record::new("A", "D1", "p1").with("cost", n(10.0)),
                Record::new("B", "D1", "p1").with("cost", n(20.0)),
                Record::new("B", "D1", "p2").with("cost", n(5.0)),
            ],
            None,
        );
        let algs = s(&["A", "B"]);
        let problems = common(&ds, "cost", &algs, &all_domains(&ds));
        let m = ComparisonMatrices::compute(&ds, "cost", &algs, &problems, true);
        assert_eq!(m.problem_wins_of("A", "B"), Some(1));
        assert_eq!(m.problem_wins_of("B", "A"), Some(0));
        assert_eq!(m.problem_wins_of("A", "A"), Some(0));
        let rows = m.drill_down("A", "B").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].problem, "p1");
        assert_eq!(rows[0].difference, -10.0);
        assert_eq!(rows[0].sign, 1);

        // over every problem, A's missing p2 counts as a loss
        let m = ComparisonMatrices::compute(&ds, "cost", &algs, &every_problem(&ds, "cost"), true);
        assert_eq!(m.problem_wins_of("B", "A"), Some(1));
        let rows = m.drill_down("B", "A").unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!((rows[0].problem.as_str(), rows[0].sign), ("p1", -1));
        assert_eq!((rows[1].problem.as_str(), rows[1].sign), ("p2", 1));
        assert_eq!(rows[1].first, Some(5.0));
        assert_eq!(rows[1].second, None);
    }

    #[test]
    fn test_drill_down_lists_losses_and_ties() {
        let mut records = Vec::new();
        for (p, a, b) in [("p1", 1.0, 2.0), ("p2", 2.0, 2.0), ("p3", 3.0, 2.0)] {
            records.push(Record::new("A", "D", p).with("cost", n(a)));
            records.push(Record::new("B", "D", p).with("cost", n(b)));
        }
        let ds = Dataset::load(&records, None);
        let m = ComparisonMatrices::compute(&ds, "cost", &s(&["A", "B"]), &every_problem(&ds, "cost"), true);
        let rows = m.drill_down("B", "A").unwrap();
        let signs: Vec<i64> = rows.iter().map(|r| r.sign).collect();
        assert_eq!(signs, vec![-1, 0, 1]);
        let wins = rows.iter().filter(|r| r.sign > 0).count() as u32;
        assert_eq!(m.problem_wins_of("B", "A"), Some(wins));
        assert_eq!(
            m.domain_drill_down("B", "A").unwrap(),
            vec![DomainComparison { domain: "D".into(), sign_sum: 0, problems: 3 }]
        );
    }

    #[test]
    fn test_missing_vs_missing_is_tie() {
        let ds = Dataset::load(
            &[
                Record::new("A", "D", "p1").with("coverage", n(1.0)),
                Record::new("B", "D", "p1").with("coverage", n(0.0)),
                Record::new("C", "D", "p2").with("coverage", n(1.0)),
            ],
            None,
        );
        let m = ComparisonMatrices::compute(&ds, "coverage", &s(&["A", "B"]), &every_problem(&ds, "coverage"), false);
        // p1: A wins; p2: both missing
        assert_eq!(m.problem_wins_of("A", "B"), Some(1));
        assert_eq!(m.problem_wins_of("B", "A"), Some(0));
        assert_eq!(m.num_problems(), 2);
    }

    #[test]
    fn test_domain_wins_sum_signs() {
        let mut records = Vec::new();
        // D1: A wins two, loses one -> domain to A
        for (p, a, b) in [("p1", 1.0, 2.0), ("p2", 1.0, 2.0), ("p3", 3.0, 2.0)] {
            records.push(Record::new("A", "D1", p).with("time", n(a)));
            records.push(Record::new("B", "D1", p).with("time", n(b)));
        }
        // D2: one each -> nobody
        for (p, a, b) in [("q1", 1.0, 2.0), ("q2", 3.0, 2.0)] {
            records.push(Record::new("A", "D2", p).with("time", n(a)));
            records.push(Record::new("B", "D2", p).with("time", n(b)));
        }
        let ds = Dataset::load(&records, None);
        let m = ComparisonMatrices::compute(&ds, "time", &s(&["A", "B"]), &every_problem(&ds, "time"), true);
        assert_eq!(m.problem_wins_of("A", "B"), Some(3));
        assert_eq!(m.problem_wins_of("B", "A"), Some(2));
        assert_eq!(m.domain_wins_of("A", "B"), Some(1));
        assert_eq!(m.domain_wins_of("B", "A"), Some(0));
        let domains = m.domain_drill_down("A", "B").unwrap();
        assert_eq!(
            domains,
            vec![
                DomainComparison { domain: "D1".into(), sign_sum: 1, problems: 3 },
                DomainComparison { domain: "D2".into(), sign_sum: 0, problems: 2 },
            ]
        );
    }

    #[test]
    fn test_domain_filter_applies() {
        let ds = Dataset::load(
            &[
                Record::new("A", "D1", "p1").with("cost", n(1.0)),
                Record::new("B", "D1", "p1").with("cost", n(2.0)),
                Record::new("A", "D2", "q1").with("cost", n(1.0)),
                Record::new("B", "D2", "q1").with("cost", n(2.0)),
            ],
            None,
        );
        let only_d2 = BTreeSet::from(["D2".to_string()]);
        let algs = s(&["A", "B"]);
        let m = ComparisonMatrices::compute(&ds, "cost", &algs, &common(&ds, "cost", &algs, &only_d2), true);
        assert_eq!(m.problem_wins_of("A", "B"), Some(1));
        assert_eq!(m.num_problems(), 1);
    }

    #[test]
    fn test_unknown_algorithm_drill_down() {
        let m = ComparisonMatrices::placeholder("cost");
        assert!(m.is_placeholder());
        assert!(m.drill_down("A", "B").is_none());
        assert!(m.problem_wins_of("A", "B").is_none());
    }
}
