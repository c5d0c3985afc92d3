//! Benchmark dataset: flat per-run records pivoted into a
//! `metric -> (domain, problem) -> algorithm -> value` hierarchy.
//!
//! Ingestion never fails outward. A malformed document or record set
//! yields an empty [`Dataset`], which every consumer treats as a valid,
//! terminal state.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::logging::{log, log_dataset_loaded, log_ingest_failure, obj, v_str, Category, Level};

pub mod retry;
pub mod source;

pub const COST_METRIC: &str = "cost";
pub const SCORE_METRIC: &str = "ipc-sat-score";
pub const SCORE_METRIC_NO_BOUNDS: &str = "ipc-sat-score-no-planning-domains";
pub const KEY_FIELDS: [&str; 3] = ["algorithm", "domain", "problem"];

/// `(domain, problem)`
pub type ProblemKey = (String, String);
/// algorithm -> value for one `(metric, domain, problem)` row
pub type Cells = BTreeMap<String, Value>;
/// Reference cost bound per `(domain, problem)`
pub type Bounds = BTreeMap<ProblemKey, f64>;

/// One cell of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Text(String),
    Missing,
}

impl Value {
    /// Parse a raw textual value. Blank means missing; anything that reads
    /// as a number is a number; everything else is an opaque literal.
    pub fn parse(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Missing;
        }
        match trimmed.parse::<f64>() {
            Ok(n) if n.is_nan() => Value::Missing,
            Ok(n) => Value::Number(n),
            Err(_) => Value::Text(raw.to_string()),
        }
    }

    pub fn from_json(raw: &serde_json::Value) -> Value {
        match raw {
            serde_json::Value::Null => Value::Missing,
            serde_json::Value::Number(n) => match n.as_f64() {
                Some(f) if !f.is_nan() => Value::Number(f),
                _ => Value::Missing,
            },
            serde_json::Value::String(s) => Value::parse(s),
            serde_json::Value::Bool(b) => Value::Text(b.to_string()),
            other => Value::Text(other.to_string()),
        }
    }

    /// Numeric coercion; opaque literals and missing cells yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Value::Missing)
    }
}

/// One raw observation.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub algorithm: String,
    pub domain: String,
    pub problem: String,
    pub values: BTreeMap<String, Value>,
}

impl Record {
    pub fn new(algorithm: &str, domain: &str, problem: &str) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            domain: domain.to_string(),
            problem: problem.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn with(mut self, metric: &str, value: Value) -> Self {
        self.values.insert(metric.to_string(), value);
        self
    }

    pub fn from_json(index: usize, raw: &serde_json::Value) -> Result<Record, IngestError> {
        let fields = raw.as_object().ok_or_else(|| IngestError::Malformed {
            reason: format!("run {} is not an object", index),
        })?;
        let key = |name: &'static str| -> Result<String, IngestError> {
            match fields.get(name) {
                Some(serde_json::Value::String(s)) if !s.is_empty() => Ok(s.clone()),
                Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
                _ => Err(IngestError::MissingField { index, field: name }),
            }
        };
        let mut record = Record::new(&key("algorithm")?, &key("domain")?, &key("problem")?);
        for (name, value) in fields {
            if KEY_FIELDS.contains(&name.as_str()) {
                continue;
            }
            record.values.insert(name.clone(), Value::from_json(value));
        }
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestError {
    MissingField { index: usize, field: &'static str },
    DuplicateRun { algorithm: String, domain: String, problem: String },
    Malformed { reason: String },
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::MissingField { index, field } => {
                write!(f, "run {} is missing required field '{}'", index, field)
            }
            IngestError::DuplicateRun { algorithm, domain, problem } => {
                write!(f, "duplicate run for {} on {}:{}", algorithm, domain, problem)
            }
            IngestError::Malformed { reason } => write!(f, "malformed properties: {}", reason),
        }
    }
}

impl std::error::Error for IngestError {}

/// Parse a properties document: an object of run-id -> run, or an array of runs.
pub fn parse_properties(text: &str) -> Result<Vec<Record>, IngestError> {
    let doc: serde_json::Value = serde_json::from_str(text).map_err(|e| IngestError::Malformed {
        reason: e.to_string(),
    })?;
    let runs: Vec<&serde_json::Value> = match &doc {
        serde_json::Value::Object(map) => map.values().collect(),
        serde_json::Value::Array(items) => items.iter().collect(),
        _ => {
            return Err(IngestError::Malformed {
                reason: "expected an object or array of runs".to_string(),
            })
        }
    };
    runs.into_iter()
        .enumerate()
        .map(|(i, run)| Record::from_json(i, run))
        .collect()
}

/// Parse a reference-bounds document. Each entry carries `domain`,
/// `problem` and one numeric field holding the bound.
pub fn parse_bounds(text: &str) -> Option<Bounds> {
    let doc: serde_json::Value = serde_json::from_str(text).ok()?;
    let entries: Vec<&serde_json::Value> = match &doc {
        serde_json::Value::Object(map) => map.values().collect(),
        serde_json::Value::Array(items) => items.iter().collect(),
        _ => return None,
    };
    let mut bounds = Bounds::new();
    for entry in entries {
        let fields = entry.as_object()?;
        let domain = fields.get("domain")?.as_str()?;
        let problem = fields.get("problem")?.as_str()?;
        let bound = fields
            .iter()
            .filter(|(k, _)| k.as_str() != "domain" && k.as_str() != "problem")
            .find_map(|(_, v)| Value::from_json(v).as_f64());
        if let Some(b) = bound {
            bounds.insert((domain.to_string(), problem.to_string()), b);
        }
    }
    Some(bounds)
}

/// Benchmark results pivoted by metric, then `(domain, problem)`, then algorithm.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    algorithms: Vec<String>,
    domains: Vec<String>,
    metrics: Vec<String>,
    numeric_metrics: Vec<String>,
    problems_by_domain: BTreeMap<String, Vec<String>>,
    rows: BTreeMap<String, BTreeMap<ProblemKey, Cells>>,
    fingerprint: String,
}

static MISSING: Value = Value::Missing;

impl Dataset {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Ingest records. Malformed input yields an empty dataset.
    pub fn load(records: &[Record], bounds: Option<&Bounds>) -> Self {
        match Self::pivot(records) {
            Ok(mut ds) => {
                ds.derive_scores(bounds);
                ds.fingerprint = ds.compute_fingerprint();
                log_dataset_loaded(
                    &ds.fingerprint,
                    ds.algorithms.len(),
                    ds.domains.len(),
                    ds.num_problems(),
                    ds.metrics.len(),
                    ds.numeric_metrics.len(),
                );
                ds
            }
            Err(err) => {
                log_ingest_failure(&err.to_string());
                Self::empty()
            }
        }
    }

    /// Ingest a properties document. Unparseable text yields an empty dataset.
    pub fn from_properties(text: &str, bounds: Option<&Bounds>) -> Self {
        match parse_properties(text) {
            Ok(records) => Self::load(&records, bounds),
            Err(err) => {
                log_ingest_failure(&err.to_string());
                Self::empty()
            }
        }
    }

    fn pivot(records: &[Record]) -> Result<Self, IngestError> {
        let mut seen: BTreeSet<(&str, &str, &str)> = BTreeSet::new();
        let mut algorithms = BTreeSet::new();
        let mut problems: BTreeSet<ProblemKey> = BTreeSet::new();
        let mut metric_names = BTreeSet::new();

        for (index, r) in records.iter().enumerate() {
            for (field, value) in [("algorithm", &r.algorithm), ("domain", &r.domain), ("problem", &r.problem)] {
                if value.is_empty() {
                    return Err(IngestError::MissingField { index, field });
                }
            }
            if !seen.insert((r.algorithm.as_str(), r.domain.as_str(), r.problem.as_str())) {
                return Err(IngestError::DuplicateRun {
                    algorithm: r.algorithm.clone(),
                    domain: r.domain.clone(),
                    problem: r.problem.clone(),
                });
            }
            algorithms.insert(r.algorithm.clone());
            problems.insert((r.domain.clone(), r.problem.clone()));
            for name in r.values.keys() {
                if !KEY_FIELDS.contains(&name.as_str()) {
                    metric_names.insert(name.clone());
                }
            }
        }

        let metrics: Vec<String> = metric_names.into_iter().collect();
        let numeric_metrics: Vec<String> = metrics
            .iter()
            .filter(|m| {
                records
                    .iter()
                    .all(|r| !matches!(r.values.get(m.as_str()), Some(Value::Text(_))))
            })
            .cloned()
            .collect();

        // Every (metric, domain, problem) row holds every algorithm, so that
        // absent runs are explicit `Missing` cells rather than holes.
        let blank: Cells = algorithms.iter().map(|a| (a.clone(), Value::Missing)).collect();
        let mut rows: BTreeMap<String, BTreeMap<ProblemKey, Cells>> = metrics
            .iter()
            .map(|m| {
                let by_problem = problems.iter().map(|pk| (pk.clone(), blank.clone())).collect();
                (m.clone(), by_problem)
            })
            .collect();
        for r in records {
            let pk = (r.domain.clone(), r.problem.clone());
            for (name, value) in &r.values {
                if let Some(cells) = rows.get_mut(name).and_then(|by_problem| by_problem.get_mut(&pk)) {
                    cells.insert(r.algorithm.clone(), value.clone());
                }
            }
        }

        let mut problems_by_domain: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (domain, problem) in &problems {
            problems_by_domain.entry(domain.clone()).or_default().push(problem.clone());
        }

        Ok(Self {
            algorithms: algorithms.into_iter().collect(),
            domains: problems_by_domain.keys().cloned().collect(),
            metrics,
            numeric_metrics,
            problems_by_domain,
            rows,
            fingerprint: String::new(),
        })
    }

    /// Derive `ipc-sat-score` (best known cost including the reference bound)
    /// and its bound-free variant from `cost`. Best effort: whatever cannot
    /// be derived is omitted.
    fn derive_scores(&mut self, bounds: Option<&Bounds>) {
        if !self.is_numeric(COST_METRIC) {
            log(
                Level::Debug,
                Category::Ingest,
                "score_skipped",
                obj(&[("msg", v_str("no numeric cost metric"))]),
            );
            return;
        }
        let mut variants: Vec<(&str, Option<&Bounds>)> = vec![(SCORE_METRIC_NO_BOUNDS, None)];
        match bounds {
            Some(b) => variants.push((SCORE_METRIC, Some(b))),
            None => log(
                Level::Info,
                Category::Ingest,
                "score_skipped",
                obj(&[("metric", v_str(SCORE_METRIC)), ("msg", v_str("no reference bounds"))]),
            ),
        }

        let costs = match self.rows.get(COST_METRIC) {
            Some(c) => c.clone(),
            None => return,
        };
        for (name, bounds) in variants {
            if self.rows.contains_key(name) {
                log(
                    Level::Warn,
                    Category::Ingest,
                    "score_skipped",
                    obj(&[("metric", v_str(name)), ("msg", v_str("metric already present in data"))]),
                );
                continue;
            }
            let scored = costs
                .iter()
                .map(|(pk, cells)| {
                    let mut best = cells
                        .values()
                        .filter_map(Value::as_f64)
                        .fold(None, |acc: Option<f64>, c| Some(acc.map_or(c, |a| a.min(c))));
                    if let Some(b) = bounds.and_then(|b| b.get(pk)) {
                        best = Some(best.map_or(*b, |a| a.min(*b)));
                    }
                    let scores = cells
                        .iter()
                        .map(|(alg, v)| (alg.clone(), ipc_score(v.as_f64(), best)))
                        .collect();
                    (pk.clone(), scores)
                })
                .collect();
            self.rows.insert(name.to_string(), scored);
            self.metrics.push(name.to_string());
            self.numeric_metrics.push(name.to_string());
        }
        self.metrics.sort();
        self.numeric_metrics.sort();
    }

    fn compute_fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (metric, by_problem) in &self.rows {
            hasher.update(metric.as_bytes());
            for ((domain, problem), cells) in by_problem {
                hasher.update(domain.as_bytes());
                hasher.update([0u8]);
                hasher.update(problem.as_bytes());
                for (alg, value) in cells {
                    hasher.update(alg.as_bytes());
                    match value {
                        Value::Number(n) => hasher.update(n.to_bits().to_le_bytes()),
                        Value::Text(s) => hasher.update(s.as_bytes()),
                        Value::Missing => hasher.update([0xffu8]),
                    }
                }
            }
        }
        hex::encode(hasher.finalize())
    }

    pub fn algorithms(&self) -> &[String] {
        &self.algorithms
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn numeric_metrics(&self) -> &[String] {
        &self.numeric_metrics
    }

    pub fn problems_by_domain(&self) -> &BTreeMap<String, Vec<String>> {
        &self.problems_by_domain
    }

    pub fn problems_of(&self, domain: &str) -> &[String] {
        self.problems_by_domain.get(domain).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn num_problems(&self) -> usize {
        self.problems_by_domain.values().map(Vec::len).sum()
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn is_empty(&self) -> bool {
        self.algorithms.is_empty() || self.rows.is_empty()
    }

    pub fn has_algorithm(&self, algorithm: &str) -> bool {
        self.algorithms.iter().any(|a| a == algorithm)
    }

    pub fn has_domain(&self, domain: &str) -> bool {
        self.problems_by_domain.contains_key(domain)
    }

    pub fn has_metric(&self, metric: &str) -> bool {
        self.rows.contains_key(metric)
    }

    pub fn is_numeric(&self, metric: &str) -> bool {
        self.numeric_metrics.iter().any(|m| m == metric)
    }

    /// All `(domain, problem)` rows of one metric.
    pub fn rows_of(&self, metric: &str) -> Option<&BTreeMap<ProblemKey, Cells>> {
        self.rows.get(metric)
    }

    pub fn cells(&self, metric: &str, domain: &str, problem: &str) -> Option<&Cells> {
        self.rows
            .get(metric)?
            .get(&(domain.to_string(), problem.to_string()))
    }

    pub fn value(&self, metric: &str, domain: &str, problem: &str, algorithm: &str) -> &Value {
        self.cells(metric, domain, problem)
            .and_then(|cells| cells.get(algorithm))
            .unwrap_or(&MISSING)
    }

    /// Every metric's values for one problem, restricted to `algorithms`.
    pub fn problem_detail(&self, domain: &str, problem: &str, algorithms: &[String]) -> Option<ProblemDetail> {
        let key = (domain.to_string(), problem.to_string());
        if !self.problems_of(domain).contains(&key.1) {
            return None;
        }
        let rows = self
            .metrics
            .iter()
            .map(|m| {
                let values = algorithms
                    .iter()
                    .map(|a| self.value(m, domain, problem, a).clone())
                    .collect();
                (m.clone(), values)
            })
            .collect();
        Some(ProblemDetail {
            domain: key.0,
            problem: key.1,
            algorithms: algorithms.to_vec(),
            rows,
        })
    }

    /// Remap algorithm names in place. The caller guarantees that every
    /// key exists and the resulting names are unique.
    pub(crate) fn rename_algorithms(&mut self, mapping: &BTreeMap<String, String>) {
        let rename = |alg: &String| mapping.get(alg).cloned().unwrap_or_else(|| alg.clone());
        for by_problem in self.rows.values_mut() {
            for cells in by_problem.values_mut() {
                let old = std::mem::take(cells);
                *cells = old.into_iter().map(|(alg, v)| (rename(&alg), v)).collect();
            }
        }
        let mut renamed: Vec<String> = self.algorithms.iter().map(rename).collect();
        renamed.sort();
        self.algorithms = renamed;
        self.fingerprint = self.compute_fingerprint();
    }

    pub fn summary(&self) -> DatasetSummary {
        let missing_cells = self
            .rows
            .values()
            .flat_map(|by_problem| by_problem.values())
            .flat_map(|cells| cells.values())
            .filter(|v| v.is_missing())
            .count();
        DatasetSummary {
            fingerprint: self.fingerprint.clone(),
            algorithms: self.algorithms.clone(),
            domains: self.domains.len(),
            problems: self.num_problems(),
            numeric_metrics: self.numeric_metrics.clone(),
            opaque_metrics: self
                .metrics
                .iter()
                .filter(|m| !self.is_numeric(m))
                .cloned()
                .collect(),
            missing_cells,
        }
    }
}

/// Score of one run: best known cost over this run's cost, 0 for a
/// missing run, no data when nothing is known about the problem.
fn ipc_score(cost: Option<f64>, best: Option<f64>) -> Value {
    match (cost, best) {
        (_, None) => Value::Missing,
        (None, Some(_)) => Value::Number(0.0),
        (Some(c), Some(_)) if c == 0.0 => Value::Number(1.0),
        (Some(c), Some(b)) => Value::Number(b / c),
    }
}

/// All metric values for one problem instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProblemDetail {
    pub domain: String,
    pub problem: String,
    pub algorithms: Vec<String>,
    /// metric -> values in `algorithms` order
    pub rows: Vec<(String, Vec<Value>)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub fingerprint: String,
    pub algorithms: Vec<String>,
    pub domains: usize,
    pub problems: usize,
    pub numeric_metrics: Vec<String>,
    pub opaque_metrics: Vec<String>,
    pub missing_cells: usize,
}

pub fn file_sha256(path: &Path) -> Result<String, String> {
    let mut file = File::open(path).map_err(|e| e.to_string())?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|e| e.to_string())?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn default_summary_path(properties_path: &Path) -> PathBuf {
    let mut p = properties_path.to_path_buf();
    let fname = properties_path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("properties");
    p.set_file_name(format!("{}.summary.json", fname));
    p
}
