//! Report engine: owns the dataset and everything derived from it.
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────────┐   ┌──────────┐
//! │ Dataset  │──►│ PolicyTable  │──►│ AggregateTable   │──►│ visible  │
//! │ (pivot)  │   │ (agg, polar) │   │ + Cache (refresh)│   │ rows     │
//! └──────────┘   └──────────────┘   └──────────────────┘   └──────────┘
//!                                            ▲                   │
//!                                            └──── FoldState ◄───┘ toggle
//! ```
//!
//! Every public mutation runs to completion, including the cascaded
//! recompute, before it returns. A rejected operation leaves the engine
//! exactly as it was. Callers that share an engine across threads must
//! serialize access themselves.

pub mod aggregate;
pub mod compare;
pub mod diff;
pub mod fold;
pub mod session;

use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::Config;
use crate::data::{Bounds, Dataset, ProblemDetail, Record, Value};
use crate::logging::{log, log_rejected, obj, v_list, v_str, Category, Level};
use crate::metrics::{Aggregator, PolicyOverride, PolicyTable};

use aggregate::{AggregateTable, AggregationCache, AggregationInput, FilteredData};
use compare::{ComparisonMatrices, DomainComparison, ProblemComparison};
use diff::DiffRow;
use fold::{FoldEffect, FoldState, RowKey};
use session::SessionState;

/// Why an operation was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    EmptyAlgorithmSelection,
    UnknownAlgorithm(String),
    UnknownDomain(String),
    UnknownMetric(String),
    NotNumeric(String),
    NotOrderable(String),
    TooFewAlgorithms(usize),
    RowNotVisible(String),
    DuplicateAlgorithmName(String),
    InvalidSessionValue { key: String, reason: String },
}

impl fmt::Display for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionError::EmptyAlgorithmSelection => write!(f, "no algorithm selected"),
            SelectionError::UnknownAlgorithm(a) => write!(f, "unknown algorithm '{}'", a),
            SelectionError::UnknownDomain(d) => write!(f, "unknown domain '{}'", d),
            SelectionError::UnknownMetric(m) => write!(f, "unknown metric '{}'", m),
            SelectionError::NotNumeric(m) => write!(f, "metric '{}' is not numeric", m),
            SelectionError::NotOrderable(m) => write!(f, "metric '{}' has no polarity", m),
            SelectionError::TooFewAlgorithms(n) => {
                write!(f, "comparison needs at least 2 algorithms, got {}", n)
            }
            SelectionError::RowNotVisible(key) => write!(f, "row {} is not visible", key),
            SelectionError::DuplicateAlgorithmName(a) => {
                write!(f, "rename would produce duplicate algorithm '{}'", a)
            }
            SelectionError::InvalidSessionValue { key, reason } => {
                write!(f, "invalid session value for '{}': {}", key, reason)
            }
        }
    }
}

impl std::error::Error for SelectionError {}

fn reject<T>(operation: &str, err: SelectionError) -> Result<T, SelectionError> {
    log_rejected(operation, &err.to_string());
    Err(err)
}

/// Receiver of per-problem detail requests (leaf row toggles).
pub trait DetailView {
    fn open(&mut self, detail: &ProblemDetail);
}

/// Default detail view: records the request in the log.
pub struct LoggedDetailView;

impl DetailView for LoggedDetailView {
    fn open(&mut self, detail: &ProblemDetail) {
        log(
            Level::Info,
            Category::Fold,
            "detail_requested",
            obj(&[
                ("domain", v_str(&detail.domain)),
                ("problem", v_str(&detail.problem)),
                ("algorithms", v_list(&detail.algorithms)),
                ("metrics", json!(detail.rows.len())),
            ]),
        );
    }
}

/// One materialized row of the report, values in selected-algorithm order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowView {
    pub metric: String,
    pub domain: String,
    pub problem: String,
    pub aggregator: Option<Aggregator>,
    /// `"k/n"` on aggregate rows
    pub coverage: Option<String>,
    pub values: Vec<Value>,
}

pub struct Engine {
    epsilon: f64,
    dataset: Dataset,
    policy: PolicyTable,
    algorithms: Vec<String>,
    domains: BTreeSet<String>,
    metrics: BTreeSet<String>,
    table: AggregateTable,
    cache: AggregationCache,
    fold: FoldState,
    visible: Vec<RowKey>,
    comparison: Option<ComparisonMatrices>,
    detail: Box<dyn DetailView>,
}

impl Engine {
    pub fn new(cfg: &Config) -> Self {
        Self {
            epsilon: cfg.gmean_epsilon,
            dataset: Dataset::empty(),
            policy: PolicyTable::default(),
            algorithms: Vec::new(),
            domains: BTreeSet::new(),
            metrics: BTreeSet::new(),
            table: AggregateTable::default(),
            cache: AggregationCache::default(),
            fold: FoldState::default(),
            visible: Vec::new(),
            comparison: None,
            detail: Box::new(LoggedDetailView),
        }
    }

    pub fn with_detail_view(mut self, detail: Box<dyn DetailView>) -> Self {
        self.detail = detail;
        self
    }

    /// Replace the dataset and everything derived from it. Selections start
    /// out as "everything", the fold state collapsed, the policy at defaults.
    pub fn load(&mut self, dataset: Dataset) {
        self.policy = PolicyTable::for_dataset(&dataset);
        self.algorithms = dataset.algorithms().to_vec();
        self.domains = dataset.domains().iter().cloned().collect();
        self.metrics = dataset.metrics().iter().cloned().collect();
        self.table = AggregateTable::default();
        self.cache = AggregationCache::default();
        self.fold = FoldState::default();
        self.comparison = None;
        self.dataset = dataset;
        self.refresh();
    }

    /// Ingest records and load the result.
    pub fn load_records(&mut self, records: &[Record], bounds: Option<&Bounds>) -> &Dataset {
        self.load(Dataset::load(records, bounds));
        &self.dataset
    }

    pub fn select(
        &mut self,
        algorithms: &[String],
        domains: &[String],
        metrics: &[String],
    ) -> Result<&[RowKey], SelectionError> {
        if self.dataset.is_empty() {
            return Ok(&self.visible);
        }
        let selection = self
            .check_algorithms(algorithms)
            .and_then(|a| Ok((a, self.check_domains(domains)?, self.check_metrics(metrics)?)));
        let (algorithms, domains, metrics) = match selection {
            Ok(s) => s,
            Err(err) => return reject("select", err),
        };
        self.algorithms = algorithms;
        self.domains = domains;
        self.metrics = metrics;
        self.comparison = None;
        self.log_selection();
        self.refresh();
        Ok(&self.visible)
    }

    pub fn set_policy_override(&mut self, metric: &str, change: PolicyOverride) -> Result<(), SelectionError> {
        if self.dataset.is_empty() {
            return Ok(());
        }
        if let Err(err) = self.check_numeric(metric) {
            return reject("set_policy_override", err);
        }
        self.policy.set_override(metric, change);
        log(
            Level::Info,
            Category::Policy,
            "override",
            obj(&[
                ("metric", v_str(metric)),
                ("aggregator", json!(change.aggregator.map(|a| a.as_str()))),
                ("min_wins", json!(change.min_wins)),
            ]),
        );
        self.cache.invalidate(metric);
        self.comparison = None;
        self.refresh();
        Ok(())
    }

    pub fn reset_policy(&mut self, metric: &str) -> Result<(), SelectionError> {
        if self.dataset.is_empty() {
            return Ok(());
        }
        if !self.policy.reset(metric) {
            return reject("reset_policy", SelectionError::UnknownMetric(metric.to_string()));
        }
        log(Level::Info, Category::Policy, "reset", obj(&[("metric", v_str(metric))]));
        self.cache.invalidate(metric);
        self.comparison = None;
        self.refresh();
        Ok(())
    }

    /// Expand or collapse a visible row, or open the detail view for a leaf.
    pub fn toggle(&mut self, key: &RowKey) -> Result<&[RowKey], SelectionError> {
        if self.dataset.is_empty() {
            return Ok(&self.visible);
        }
        if !self.visible.contains(key) {
            return reject("toggle", SelectionError::RowNotVisible(key.to_string()));
        }
        let (fold, effect) = fold::reduce(std::mem::take(&mut self.fold), key);
        self.fold = fold;
        log(
            Level::Debug,
            Category::Fold,
            "toggle",
            obj(&[("row", v_str(&key.to_string())), ("effect", v_str(&format!("{:?}", effect)))]),
        );
        if let FoldEffect::OpenDetail { domain, problem } = &effect {
            if let Some(detail) = self.dataset.problem_detail(domain, problem, &self.algorithms) {
                self.detail.open(&detail);
            }
            return Ok(&self.visible);
        }
        // A freshly expanded metric gets its domain rows before the view is rebuilt.
        self.refresh();
        Ok(&self.visible)
    }

    pub fn comparison_matrix(
        &mut self,
        metric: &str,
        algorithms: &[String],
    ) -> Result<&ComparisonMatrices, SelectionError> {
        if self.dataset.is_empty() {
            return Ok(self.comparison.insert(ComparisonMatrices::placeholder(metric)));
        }
        let min_wins = match self.check_comparison(metric, algorithms) {
            Ok(m) => m,
            Err(err) => return reject("comparison_matrix", err),
        };
        let algorithms = dedup(algorithms);
        // problems every compared algorithm solved, whatever else is selected
        let common = FilteredData::common_subset(&self.dataset, metric, &algorithms, &self.domains);
        let matrices = ComparisonMatrices::compute(&self.dataset, metric, &algorithms, common.rows.keys(), min_wins);
        Ok(self.comparison.insert(matrices))
    }

    /// Compared problems behind `problem_wins[a1][a2]`, wins, losses and ties.
    pub fn drill_down(&mut self, metric: &str, a1: &str, a2: &str) -> Result<Vec<ProblemComparison>, SelectionError> {
        if self.dataset.is_empty() {
            return Ok(Vec::new());
        }
        let matrices = self.retained_for(metric, a1, a2)?;
        matrices
            .drill_down(a1, a2)
            .ok_or_else(|| SelectionError::UnknownAlgorithm(a1.to_string()))
    }

    /// Compared domains behind `domain_wins[a1][a2]` with their summed signs.
    pub fn domain_drill_down(
        &mut self,
        metric: &str,
        a1: &str,
        a2: &str,
    ) -> Result<Vec<DomainComparison>, SelectionError> {
        if self.dataset.is_empty() {
            return Ok(Vec::new());
        }
        let matrices = self.retained_for(metric, a1, a2)?;
        matrices
            .domain_drill_down(a1, a2)
            .ok_or_else(|| SelectionError::UnknownAlgorithm(a1.to_string()))
    }

    /// The visible rows with `a1` and `a2` side by side and a diff column
    /// (`a2 - a1`, or `a2 / a1 - 1` when `percentual`). Aggregates cover the
    /// problems both algorithms solved.
    pub fn diff_rows(&self, a1: &str, a2: &str, percentual: bool) -> Result<Vec<DiffRow>, SelectionError> {
        if self.dataset.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(unknown) = [a1, a2].into_iter().find(|a| !self.dataset.has_algorithm(a)) {
            return reject("diff_rows", SelectionError::UnknownAlgorithm(unknown.to_string()));
        }
        if a1 == a2 {
            return reject("diff_rows", SelectionError::TooFewAlgorithms(1));
        }
        let pair = [a1.to_string(), a2.to_string()];
        let input = AggregationInput {
            dataset: &self.dataset,
            policy: &self.policy,
            algorithms: &pair,
            domains: &self.domains,
            epsilon: self.epsilon,
        };
        Ok(diff::diff_rows(&input, &self.visible, percentual))
    }

    /// Reuse the last matrices when they cover the pair, else compute them
    /// for just `[a1, a2]`.
    fn retained_for(&mut self, metric: &str, a1: &str, a2: &str) -> Result<&ComparisonMatrices, SelectionError> {
        let covered = self.comparison.as_ref().map_or(false, |c| {
            c.metric == metric && c.index_of(a1).is_some() && c.index_of(a2).is_some()
        });
        if !covered {
            self.comparison_matrix(metric, &[a1.to_string(), a2.to_string()])?;
        }
        self.comparison
            .as_ref()
            .ok_or_else(|| SelectionError::UnknownMetric(metric.to_string()))
    }

    /// Rename algorithm columns everywhere without re-ingesting.
    pub fn rename_algorithms(&mut self, mapping: &BTreeMap<String, String>) -> Result<(), SelectionError> {
        if self.dataset.is_empty() {
            return Ok(());
        }
        if let Some(unknown) = mapping.keys().find(|a| !self.dataset.has_algorithm(a)) {
            return reject("rename_algorithms", SelectionError::UnknownAlgorithm(unknown.clone()));
        }
        let mut seen = BTreeSet::new();
        for alg in self.dataset.algorithms() {
            let name = mapping.get(alg).unwrap_or(alg);
            if !seen.insert(name.clone()) {
                return reject("rename_algorithms", SelectionError::DuplicateAlgorithmName(name.clone()));
            }
        }
        self.dataset.rename_algorithms(mapping);
        self.algorithms = self
            .algorithms
            .iter()
            .map(|a| mapping.get(a).unwrap_or(a).clone())
            .collect();
        self.table.rename_algorithms(mapping);
        self.cache.rename_algorithms(mapping);
        self.comparison = None;
        log(
            Level::Info,
            Category::Session,
            "rename",
            obj(&[("renamed", json!(mapping.len())), ("algorithms", v_list(&self.algorithms))]),
        );
        self.refresh();
        Ok(())
    }

    pub fn session(&self) -> SessionState {
        SessionState {
            algorithms: self.algorithms.clone(),
            domains: self.domains.iter().cloned().collect(),
            metrics: self.metrics.iter().cloned().collect(),
            overrides: self
                .policy
                .overrides()
                .map(|(m, p)| {
                    let o = PolicyOverride {
                        aggregator: p.override_aggregator,
                        min_wins: p.override_min_wins,
                    };
                    (m.clone(), o)
                })
                .collect(),
            fold: self.fold.clone(),
        }
    }

    /// Apply a saved session. Everything is validated before anything
    /// changes.
    pub fn restore(&mut self, state: &SessionState) -> Result<&[RowKey], SelectionError> {
        if self.dataset.is_empty() {
            return Ok(&self.visible);
        }
        let checked = self.check_session(state);
        let (algorithms, domains, metrics) = match checked {
            Ok(s) => s,
            Err(err) => return reject("restore", err),
        };
        let mut policy = PolicyTable::for_dataset(&self.dataset);
        for (metric, change) in &state.overrides {
            policy.set_override(metric, *change);
        }
        self.algorithms = algorithms;
        self.domains = domains;
        self.metrics = metrics;
        self.policy = policy;
        self.fold = state.fold.clone();
        self.comparison = None;
        log(
            Level::Info,
            Category::Session,
            "restore",
            obj(&[
                ("overrides", json!(state.overrides.len())),
                ("expanded", json!(state.fold.expanded.len())),
            ]),
        );
        self.refresh();
        Ok(&self.visible)
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn policy(&self) -> &PolicyTable {
        &self.policy
    }

    pub fn table(&self) -> &AggregateTable {
        &self.table
    }

    pub fn cache(&self) -> &AggregationCache {
        &self.cache
    }

    pub fn fold(&self) -> &FoldState {
        &self.fold
    }

    pub fn visible_rows(&self) -> &[RowKey] {
        &self.visible
    }

    pub fn selected_algorithms(&self) -> &[String] {
        &self.algorithms
    }

    pub fn selected_domains(&self) -> &BTreeSet<String> {
        &self.domains
    }

    pub fn selected_metrics(&self) -> &BTreeSet<String> {
        &self.metrics
    }

    /// Materialize one row. Aggregate rows without a computed aggregate
    /// (opaque metrics) come back with missing values and no coverage.
    pub fn row(&self, key: &RowKey) -> RowView {
        let (metric, domain, problem) = key.triple();
        let aggregate = match key {
            RowKey::Metric(m) => self.table.metric_row(m),
            RowKey::Domain { metric, domain } => self.table.domain_row(metric, domain),
            RowKey::Problem { .. } => None,
        };
        let values = self
            .algorithms
            .iter()
            .map(|alg| match (key, aggregate) {
                (RowKey::Problem { .. }, _) => self.dataset.value(metric, domain, problem, alg).clone(),
                (_, Some(row)) => row.get(alg).map(Value::Number).unwrap_or(Value::Missing),
                (_, None) => Value::Missing,
            })
            .collect();
        RowView {
            metric: metric.to_string(),
            domain: domain.to_string(),
            problem: problem.to_string(),
            aggregator: aggregate.map(|r| r.aggregator),
            coverage: aggregate.map(|r| r.coverage_label()),
            values,
        }
    }

    /// Every visible row, in display order.
    pub fn rows(&self) -> Vec<RowView> {
        self.visible.iter().map(|k| self.row(k)).collect()
    }

    /// Bring aggregates up to date, fill domain rows of expanded metrics,
    /// then rebuild the visible rows.
    fn refresh(&mut self) {
        let input = AggregationInput {
            dataset: &self.dataset,
            policy: &self.policy,
            algorithms: &self.algorithms,
            domains: &self.domains,
            epsilon: self.epsilon,
        };
        aggregate::refresh(&mut self.table, &mut self.cache, &self.fold, &input);
        for metric in self.fold.expanded_metrics() {
            if self.cache.entry(metric).is_some() && self.cache.is_domains_stale(metric) {
                aggregate::refresh_domains(&mut self.table, &mut self.cache, metric, &input);
            }
        }
        let metrics: Vec<String> = self.metrics.iter().cloned().collect();
        let domains: Vec<String> = self.domains.iter().cloned().collect();
        self.visible = fold::visible_rows(&self.fold, &metrics, &domains, self.dataset.problems_by_domain());
    }

    fn log_selection(&self) {
        log(
            Level::Info,
            Category::Session,
            "selection_changed",
            obj(&[
                ("algorithms", v_list(&self.algorithms)),
                ("domains", json!(self.domains.len())),
                ("metrics", json!(self.metrics.len())),
            ]),
        );
    }

    fn check_algorithms(&self, algorithms: &[String]) -> Result<Vec<String>, SelectionError> {
        if algorithms.is_empty() {
            return Err(SelectionError::EmptyAlgorithmSelection);
        }
        if let Some(unknown) = algorithms.iter().find(|a| !self.dataset.has_algorithm(a)) {
            return Err(SelectionError::UnknownAlgorithm(unknown.clone()));
        }
        Ok(dedup(algorithms))
    }

    fn check_domains(&self, domains: &[String]) -> Result<BTreeSet<String>, SelectionError> {
        match domains.iter().find(|d| !self.dataset.has_domain(d)) {
            Some(unknown) => Err(SelectionError::UnknownDomain(unknown.clone())),
            None => Ok(domains.iter().cloned().collect()),
        }
    }

    fn check_metrics(&self, metrics: &[String]) -> Result<BTreeSet<String>, SelectionError> {
        match metrics.iter().find(|m| !self.dataset.has_metric(m)) {
            Some(unknown) => Err(SelectionError::UnknownMetric(unknown.clone())),
            None => Ok(metrics.iter().cloned().collect()),
        }
    }

    fn check_numeric(&self, metric: &str) -> Result<(), SelectionError> {
        if !self.dataset.has_metric(metric) {
            return Err(SelectionError::UnknownMetric(metric.to_string()));
        }
        if !self.dataset.is_numeric(metric) {
            return Err(SelectionError::NotNumeric(metric.to_string()));
        }
        Ok(())
    }

    /// Validate a comparison request; returns the metric's polarity.
    fn check_comparison(&self, metric: &str, algorithms: &[String]) -> Result<bool, SelectionError> {
        self.check_numeric(metric)?;
        let unique = dedup(algorithms);
        if unique.len() < 2 {
            return Err(SelectionError::TooFewAlgorithms(unique.len()));
        }
        if let Some(unknown) = unique.iter().find(|a| !self.dataset.has_algorithm(a)) {
            return Err(SelectionError::UnknownAlgorithm(unknown.clone()));
        }
        self.policy
            .effective_min_wins(metric)
            .ok_or_else(|| SelectionError::NotOrderable(metric.to_string()))
    }

    #[allow(clippy::type_complexity)]
    fn check_session(
        &self,
        state: &SessionState,
    ) -> Result<(Vec<String>, BTreeSet<String>, BTreeSet<String>), SelectionError> {
        let algorithms = self.check_algorithms(&state.algorithms)?;
        let domains = self.check_domains(&state.domains)?;
        let metrics = self.check_metrics(&state.metrics)?;
        for metric in state.overrides.keys() {
            self.check_numeric(metric)?;
        }
        for (metric, expanded) in &state.fold.expanded {
            if !self.dataset.has_metric(metric) {
                return Err(SelectionError::UnknownMetric(metric.clone()));
            }
            if let Some(unknown) = expanded.iter().find(|d| !self.dataset.has_domain(d)) {
                return Err(SelectionError::UnknownDomain(unknown.clone()));
            }
        }
        Ok((algorithms, domains, metrics))
    }
}

/// Drop repeated names, keeping first occurrences in order.
fn dedup(names: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    names.iter().filter(|n| seen.insert(n.as_str())).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    fn engine() -> Engine {
        let mut e = Engine::new(&Config::default());
        e.load_records(
            &[
                Record::new("A", "D1", "p1").with("cost", n(10.0)).with("error", Value::Text("ok".into())),
                Record::new("B", "D1", "p1").with("cost", n(20.0)),
                Record::new("B", "D1", "p2").with("cost", n(5.0)),
            ],
            None,
        );
        e
    }

    struct Recorder(Rc<RefCell<Vec<(String, String)>>>);

    impl DetailView for Recorder {
        fn open(&mut self, detail: &ProblemDetail) {
            self.0.borrow_mut().push((detail.domain.clone(), detail.problem.clone()));
        }
    }

    #[test]
    fn test_load_selects_everything() {
        let e = engine();
        assert_eq!(e.selected_algorithms(), &s(&["A", "B"]));
        assert_eq!(e.selected_domains().len(), 1);
        // cost, error, bound-free score
        assert_eq!(e.visible_rows().len(), 3);
        assert_eq!(e.table().metric_row("cost").unwrap().coverage_label(), "1/2");
    }

    #[test]
    fn test_rejected_select_keeps_state() {
        let mut e = engine();
        let before = e.visible_rows().to_vec();
        let digest = e.table().digest();
        assert_eq!(
            e.select(&[], &s(&["D1"]), &s(&["cost"])).unwrap_err(),
            SelectionError::EmptyAlgorithmSelection
        );
        assert_eq!(
            e.select(&s(&["A", "Z"]), &s(&["D1"]), &s(&["cost"])).unwrap_err(),
            SelectionError::UnknownAlgorithm("Z".into())
        );
        assert_eq!(
            e.select(&s(&["A"]), &s(&["D9"]), &s(&["cost"])).unwrap_err(),
            SelectionError::UnknownDomain("D9".into())
        );
        assert_eq!(e.visible_rows(), before.as_slice());
        assert_eq!(e.table().digest(), digest);
        assert_eq!(e.selected_algorithms(), &s(&["A", "B"]));
    }

    #[test]
    fn test_select_recomputes_with_new_columns() {
        let mut e = engine();
        let rows = e.select(&s(&["B"]), &s(&["D1"]), &s(&["cost"])).unwrap().to_vec();
        assert_eq!(rows, vec![RowKey::Metric("cost".into())]);
        let row = e.table().metric_row("cost").unwrap();
        assert_eq!(row.get("B"), Some(25.0));
        assert_eq!(row.coverage_label(), "2/2");
    }

    #[test]
    fn test_override_rules() {
        let mut e = engine();
        assert_eq!(
            e.set_policy_override("error", PolicyOverride { min_wins: Some(true), ..Default::default() }),
            Err(SelectionError::NotNumeric("error".into()))
        );
        assert_eq!(
            e.set_policy_override("nope", PolicyOverride::default()),
            Err(SelectionError::UnknownMetric("nope".into()))
        );
        e.set_policy_override("cost", PolicyOverride { aggregator: Some(Aggregator::Mean), min_wins: None })
            .unwrap();
        assert_eq!(e.table().metric_row("cost").unwrap().aggregator, Aggregator::Mean);
        e.reset_policy("cost").unwrap();
        assert_eq!(e.table().metric_row("cost").unwrap().aggregator, Aggregator::Sum);
    }

    #[test]
    fn test_toggle_flow() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut e = engine().with_detail_view(Box::new(Recorder(calls.clone())));
        let cost = RowKey::Metric("cost".into());
        let d1 = RowKey::from_triple("cost", "D1", "*");
        let p2 = RowKey::from_triple("cost", "D1", "p2");

        assert_eq!(e.toggle(&d1).unwrap_err(), SelectionError::RowNotVisible(d1.to_string()));
        e.toggle(&cost).unwrap();
        assert_eq!(e.table().domain_row("cost", "D1").unwrap().get("A"), Some(10.0));
        e.toggle(&d1).unwrap();
        assert!(e.visible_rows().contains(&p2));

        let digest = e.table().digest();
        let rows = e.toggle(&p2).unwrap().to_vec();
        assert!(rows.contains(&p2));
        assert_eq!(e.table().digest(), digest);
        assert_eq!(calls.borrow().as_slice(), &[("D1".to_string(), "p2".to_string())]);
    }

    #[test]
    fn test_comparison_validation() {
        let mut e = engine();
        assert_eq!(
            e.comparison_matrix("cost", &s(&["A", "A"])).unwrap_err(),
            SelectionError::TooFewAlgorithms(1)
        );
        assert_eq!(
            e.comparison_matrix("error", &s(&["A", "B"])).unwrap_err(),
            SelectionError::NotNumeric("error".into())
        );
        let m = e.comparison_matrix("cost", &s(&["A", "B"])).unwrap();
        assert_eq!(m.problem_wins_of("A", "B"), Some(1));
        assert_eq!(m.problem_wins_of("B", "A"), Some(0));
        assert_eq!(e.drill_down("cost", "A", "B").unwrap().len(), 1);
        let back = e.drill_down("cost", "B", "A").unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].sign, -1);
        let domains = e.domain_drill_down("cost", "B", "A").unwrap();
        assert_eq!(domains.len(), 1);
        assert_eq!(domains[0].sign_sum, -1);
    }

    #[test]
    fn test_rename() {
        let mut e = engine();
        let bad = BTreeMap::from([("A".to_string(), "B".to_string())]);
        assert_eq!(
            e.rename_algorithms(&bad),
            Err(SelectionError::DuplicateAlgorithmName("B".into()))
        );
        let ok = BTreeMap::from([("A".to_string(), "lama".to_string())]);
        e.rename_algorithms(&ok).unwrap();
        assert_eq!(e.selected_algorithms(), &s(&["lama", "B"]));
        assert_eq!(e.table().metric_row("cost").unwrap().get("lama"), Some(10.0));
        assert_eq!(e.dataset().value("cost", "D1", "p1", "lama"), &n(10.0));
    }

    #[test]
    fn test_session_round_trip() {
        let mut e = engine();
        e.select(&s(&["A", "B"]), &s(&["D1"]), &s(&["cost"])).unwrap();
        e.set_policy_override("cost", PolicyOverride { aggregator: Some(Aggregator::Mean), min_wins: None })
            .unwrap();
        e.toggle(&RowKey::Metric("cost".into())).unwrap();
        let saved = e.session();
        let visible = e.visible_rows().to_vec();
        let digest = e.table().digest();

        let mut fresh = engine();
        fresh.restore(&saved).unwrap();
        assert_eq!(fresh.visible_rows(), visible.as_slice());
        assert_eq!(fresh.table().digest(), digest);
        assert_eq!(fresh.session(), saved);
    }

    #[test]
    fn test_restore_rejects_unknown_names() {
        let mut e = engine();
        let mut state = e.session();
        state.fold.expanded.insert("cost".into(), BTreeSet::from(["D7".to_string()]));
        assert_eq!(e.restore(&state).unwrap_err(), SelectionError::UnknownDomain("D7".into()));
        assert!(e.fold().expanded.is_empty());
    }

    #[test]
    fn test_row_views() {
        let mut e = engine();
        e.select(&s(&["A", "B"]), &s(&["D1"]), &s(&["cost", "error"])).unwrap();
        let rows = e.rows();
        assert_eq!(rows[0].coverage.as_deref(), Some("1/2"));
        assert_eq!(rows[0].values, vec![n(10.0), n(20.0)]);
        // opaque metric rows carry no aggregate
        assert_eq!(rows[1].metric, "error");
        assert_eq!(rows[1].coverage, None);
        assert_eq!(rows[1].values, vec![Value::Missing, Value::Missing]);
    }

    #[test]
    fn test_empty_dataset_is_inert() {
        let mut e = Engine::new(&Config::default());
        e.load(Dataset::empty());
        assert!(e.select(&[], &[], &[]).unwrap().is_empty());
        assert!(e.toggle(&RowKey::Metric("cost".into())).unwrap().is_empty());
        assert!(e.comparison_matrix("cost", &s(&["A", "B"])).unwrap().is_placeholder());
        assert!(e.drill_down("cost", "A", "B").unwrap().is_empty());
        assert!(e.set_policy_override("cost", PolicyOverride::default()).is_ok());
        assert!(e.rename_algorithms(&BTreeMap::new()).is_ok());
        assert!(e.table().is_empty());
    }
}
