//! Metric- and domain-level aggregates over the common problem subset.
//!
//! A metric is recomputed only when the algorithm selection, the domain
//! selection or its effective aggregator changed since the last pass
//! (`needs_recompute`). Domain rows are derived from the filtered data kept
//! in the cache and only for metrics that are expanded in the fold state.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::data::{Dataset, ProblemKey};
use crate::engine::fold::FoldState;
use crate::logging::{log_domain_recompute, log_metric_recompute, v_num, ProfileScope};
use crate::metrics::{Aggregator, PolicyTable};

/// Contributing vs total problem count of an aggregate cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Coverage {
    pub contributing: usize,
    pub total: usize,
}

impl fmt::Display for Coverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.contributing, self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateRow {
    pub aggregator: Aggregator,
    /// algorithm -> aggregate. An algorithm without an entry has no data;
    /// this is distinct from an aggregate that is legitimately zero.
    pub values: BTreeMap<String, f64>,
    pub coverage: Coverage,
}

impl AggregateRow {
    pub fn has_data(&self) -> bool {
        !self.values.is_empty()
    }

    pub fn get(&self, algorithm: &str) -> Option<f64> {
        self.values.get(algorithm).copied()
    }

    /// `"k/n"` label shown next to the row.
    pub fn coverage_label(&self) -> String {
        self.coverage.to_string()
    }

    fn rename_algorithms(&mut self, mapping: &BTreeMap<String, String>) {
        let old = std::mem::take(&mut self.values);
        self.values = old.into_iter().map(|(alg, v)| (renamed(mapping, alg), v)).collect();
    }
}

fn renamed(mapping: &BTreeMap<String, String>, alg: String) -> String {
    mapping.get(&alg).cloned().unwrap_or(alg)
}

/// Synthetic aggregate rows layered over the dataset: `(metric, *, *)` and
/// `(metric, domain, *)`. Leaf rows are read straight from the dataset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateTable {
    metric_rows: BTreeMap<String, AggregateRow>,
    domain_rows: BTreeMap<(String, String), AggregateRow>,
}

impl AggregateTable {
    pub fn metric_row(&self, metric: &str) -> Option<&AggregateRow> {
        self.metric_rows.get(metric)
    }

    pub fn domain_row(&self, metric: &str, domain: &str) -> Option<&AggregateRow> {
        self.domain_rows.get(&(metric.to_string(), domain.to_string()))
    }

    pub fn metric_rows(&self) -> impl Iterator<Item = (&String, &AggregateRow)> {
        self.metric_rows.iter()
    }

    pub fn domain_rows_of<'a>(&'a self, metric: &'a str) -> impl Iterator<Item = (&'a String, &'a AggregateRow)> + 'a {
        self.domain_rows
            .iter()
            .filter(move |((m, _), _)| m == metric)
            .map(|((_, d), row)| (d, row))
    }

    pub fn is_empty(&self) -> bool {
        self.metric_rows.is_empty() && self.domain_rows.is_empty()
    }

    pub(crate) fn rename_algorithms(&mut self, mapping: &BTreeMap<String, String>) {
        for row in self.metric_rows.values_mut().chain(self.domain_rows.values_mut()) {
            row.rename_algorithms(mapping);
        }
    }

    fn clear_domains_of(&mut self, metric: &str) {
        self.domain_rows.retain(|(m, _), _| m != metric);
    }

    /// SHA-256 over every aggregate cell, bit exact.
    pub fn digest(&self) -> String {
        fn feed(hasher: &mut Sha256, row: &AggregateRow) {
            hasher.update(row.aggregator.as_str().as_bytes());
            hasher.update((row.coverage.contributing as u64).to_le_bytes());
            hasher.update((row.coverage.total as u64).to_le_bytes());
            for (alg, v) in &row.values {
                hasher.update(alg.as_bytes());
                hasher.update(v.to_bits().to_le_bytes());
            }
        }
        let mut hasher = Sha256::new();
        for (metric, row) in &self.metric_rows {
            hasher.update(metric.as_bytes());
            feed(&mut hasher, row);
        }
        for ((metric, domain), row) in &self.domain_rows {
            hasher.update(metric.as_bytes());
            hasher.update([0u8]);
            hasher.update(domain.as_bytes());
            feed(&mut hasher, row);
        }
        hex::encode(hasher.finalize())
    }
}

/// Common-subset rows of one metric: `(domain, problem)` -> one value per
/// selected algorithm, in selection order. `None` marks a cell that did
/// not coerce to a number.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilteredData {
    pub algorithms: Vec<String>,
    pub rows: BTreeMap<ProblemKey, Vec<Option<f64>>>,
}

impl FilteredData {
    /// Keep problems in `domains` where every algorithm has a non-missing
    /// value, then coerce.
    pub fn common_subset(
        dataset: &Dataset,
        metric: &str,
        algorithms: &[String],
        domains: &BTreeSet<String>,
    ) -> Self {
        let rows = dataset
            .rows_of(metric)
            .into_iter()
            .flatten()
            .filter(|((domain, _), _)| domains.contains(domain))
            .filter_map(|(pk, cells)| {
                let mut values = Vec::with_capacity(algorithms.len());
                for alg in algorithms {
                    let value = cells.get(alg)?;
                    if value.is_missing() {
                        return None;
                    }
                    values.push(value.as_f64());
                }
                Some((pk.clone(), values))
            })
            .collect();
        Self {
            algorithms: algorithms.to_vec(),
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Column aggregates over every kept row, or over one domain's rows,
    /// with the number of contributing problems. No rows gives no data.
    pub fn aggregate_within(
        &self,
        domain: Option<&str>,
        aggregator: Aggregator,
        epsilon: f64,
    ) -> (BTreeMap<String, f64>, usize) {
        let rows = self
            .rows
            .iter()
            .filter(move |((d, _), _)| domain.map_or(true, |want| d == want))
            .map(|(_, values)| values);
        let contributing = rows.clone().count();
        if contributing == 0 {
            return (BTreeMap::new(), 0);
        }
        (self.aggregate(rows, aggregator, epsilon), contributing)
    }

    /// Aggregate each algorithm column over the given rows.
    fn aggregate<'a>(
        &self,
        rows: impl Iterator<Item = &'a Vec<Option<f64>>> + Clone,
        aggregator: Aggregator,
        epsilon: f64,
    ) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for (col, alg) in self.algorithms.iter().enumerate() {
            let column: Vec<f64> = rows
                .clone()
                .filter_map(|values| values.get(col).copied().flatten())
                .map(|v| if aggregator == Aggregator::Gmean && v == 0.0 { epsilon } else { v })
                .collect();
            if let Some(agg) = aggregator.apply(&column) {
                out.insert(alg.clone(), agg);
            }
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetricCache {
    pub aggregator_used: Option<Aggregator>,
    pub domains_stale: bool,
    filtered: FilteredData,
}

/// What was last computed, per metric and for the selection as a whole.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregationCache {
    metrics: BTreeMap<String, MetricCache>,
    last_algorithms: Option<Vec<String>>,
    last_domains: Option<BTreeSet<String>>,
}

impl AggregationCache {
    pub fn entry(&self, metric: &str) -> Option<&MetricCache> {
        self.metrics.get(metric)
    }

    /// Forget a metric so the next pass recomputes it.
    pub fn invalidate(&mut self, metric: &str) {
        self.metrics.remove(metric);
    }

    pub fn is_domains_stale(&self, metric: &str) -> bool {
        self.metrics.get(metric).map(|c| c.domains_stale).unwrap_or(true)
    }

    /// Follow an algorithm rename so that the renamed selection does not
    /// count as a selection change.
    pub(crate) fn rename_algorithms(&mut self, mapping: &BTreeMap<String, String>) {
        if let Some(last) = self.last_algorithms.take() {
            self.last_algorithms = Some(last.into_iter().map(|a| renamed(mapping, a)).collect());
        }
        for entry in self.metrics.values_mut() {
            let old = std::mem::take(&mut entry.filtered.algorithms);
            entry.filtered.algorithms = old.into_iter().map(|a| renamed(mapping, a)).collect();
        }
    }
}

/// Recompute trigger for a metric's metric-level row.
pub fn needs_recompute(
    cache: &AggregationCache,
    metric: &str,
    algorithms: &[String],
    domains: &BTreeSet<String>,
    aggregator: Aggregator,
) -> bool {
    let algorithms_changed = cache.last_algorithms.as_deref() != Some(algorithms);
    let domains_changed = cache.last_domains.as_ref() != Some(domains);
    let aggregator_changed = cache
        .metrics
        .get(metric)
        .and_then(|c| c.aggregator_used)
        != Some(aggregator);
    algorithms_changed || domains_changed || aggregator_changed
}

/// Everything a recompute pass reads.
pub struct AggregationInput<'a> {
    pub dataset: &'a Dataset,
    pub policy: &'a PolicyTable,
    pub algorithms: &'a [String],
    pub domains: &'a BTreeSet<String>,
    pub epsilon: f64,
}

impl AggregationInput<'_> {
    fn total_problems(&self) -> usize {
        self.domains.iter().map(|d| self.dataset.problems_of(d).len()).sum()
    }
}

/// Bring every numeric metric up to date. Returns the metrics that were
/// recomputed.
pub fn refresh(
    table: &mut AggregateTable,
    cache: &mut AggregationCache,
    fold: &FoldState,
    input: &AggregationInput,
) -> Vec<String> {
    let _scope = ProfileScope::with_context(
        "aggregate_refresh",
        &[
            ("algorithms", v_num(input.algorithms.len() as f64)),
            ("domains", v_num(input.domains.len() as f64)),
        ],
    );
    let mut recomputed = Vec::new();
    if input.algorithms.is_empty() {
        return recomputed;
    }
    let total = input.total_problems();
    for metric in input.dataset.numeric_metrics() {
        let Some(aggregator) = input.policy.effective_aggregator(metric) else {
            continue;
        };
        if !needs_recompute(cache, metric, input.algorithms, input.domains, aggregator) {
            continue;
        }
        let filtered = FilteredData::common_subset(input.dataset, metric, input.algorithms, input.domains);
        let row = AggregateRow {
            aggregator,
            values: filtered.aggregate(filtered.rows.values(), aggregator, input.epsilon),
            coverage: Coverage {
                contributing: filtered.len(),
                total,
            },
        };
        log_metric_recompute(metric, aggregator.as_str(), row.coverage.contributing, total);
        table.metric_rows.insert(metric.clone(), row);
        table.clear_domains_of(metric);
        cache.metrics.insert(
            metric.clone(),
            MetricCache {
                aggregator_used: Some(aggregator),
                domains_stale: true,
                filtered,
            },
        );
        if fold.is_metric_expanded(metric) {
            refresh_domains(table, cache, metric, input);
        }
        recomputed.push(metric.clone());
    }
    cache.last_algorithms = Some(input.algorithms.to_vec());
    cache.last_domains = Some(input.domains.clone());
    recomputed
}

/// Domain rows of one metric from its cached filtered data. No-op for a
/// metric that was never computed.
pub fn refresh_domains(
    table: &mut AggregateTable,
    cache: &mut AggregationCache,
    metric: &str,
    input: &AggregationInput,
) {
    let Some(entry) = cache.metrics.get_mut(metric) else {
        return;
    };
    let Some(aggregator) = entry.aggregator_used else {
        return;
    };
    table.clear_domains_of(metric);
    let mut with_data = 0;
    for domain in input.domains {
        let (values, contributing) =
            entry
                .filtered
                .aggregate_within(Some(domain.as_str()), aggregator, input.epsilon);
        if !values.is_empty() {
            with_data += 1;
        }
        table.domain_rows.insert(
            (metric.to_string(), domain.clone()),
            AggregateRow {
                aggregator,
                values,
                coverage: Coverage {
                    contributing,
                    total: input.dataset.problems_of(domain).len(),
                },
            },
        );
    }
    entry.domains_stale = false;
    log_domain_recompute(metric, with_data, input.domains.len());
}
