//! Structured JSON-line logging for the report engine.
//!
//! Every record carries a run id, a sequence number and a category, so a
//! session can be followed from its log: the dataset that was loaded, the
//! selections and overrides applied to it, and the aggregates recomputed
//! as a consequence.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    const ALL: [Level; 5] = [Level::Trace, Level::Debug, Level::Info, Level::Warn, Level::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }

    fn parse(raw: &str) -> Option<Level> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|l| l.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Ingest,
    Policy,
    Aggregate,
    Fold,
    Compare,
    Session,
    Source,
    System,
    Profile,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Ingest => "ingest",
            Category::Policy => "policy",
            Category::Aggregate => "aggregate",
            Category::Fold => "fold",
            Category::Compare => "compare",
            Category::Session => "session",
            Category::Source => "source",
            Category::System => "system",
            Category::Profile => "profile",
        }
    }

    /// LOG_CATEGORIES holds a comma-separated allow list, or "all".
    fn allowed_by(&self, filter: Option<&str>) -> bool {
        match filter {
            None | Some("all") => true,
            Some(list) => list.split(',').any(|c| c.trim() == self.as_str()),
        }
    }
}

/// Environment-driven filters, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq)]
struct Filters {
    threshold: Level,
    categories: Option<String>,
    profile_rate: f64,
}

impl Filters {
    fn from_vars(level: Option<String>, categories: Option<String>, profile_sample: Option<String>) -> Self {
        Self {
            threshold: level.and_then(|v| Level::parse(&v)).unwrap_or(Level::Info),
            categories: categories.map(|c| c.trim().to_string()),
            profile_rate: profile_sample
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|r| !r.is_nan())
                .unwrap_or(1.0),
        }
    }

    fn from_env() -> Self {
        Self::from_vars(
            std::env::var("LOG_LEVEL").ok(),
            std::env::var("LOG_CATEGORIES").ok(),
            std::env::var("PROFILE_SAMPLE").ok(),
        )
    }
}

static SEQ: AtomicU64 = AtomicU64::new(0);
static PROFILE_TICKS: AtomicU64 = AtomicU64::new(0);
static RUN: OnceLock<Run> = OnceLock::new();

struct Run {
    id: String,
    filters: Filters,
    // debug and trace go to a separate file so events.jsonl stays readable
    events: Option<Mutex<BufWriter<File>>>,
    trace: Option<Mutex<BufWriter<File>>>,
}

fn appender(path: &Path) -> Option<Mutex<BufWriter<File>>> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(f) => Some(Mutex::new(BufWriter::new(f))),
        Err(err) => {
            eprintln!("[log] cannot open {}: {}", path.display(), err);
            None
        }
    }
}

fn run() -> &'static Run {
    RUN.get_or_init(|| {
        let id = std::env::var("RUN_ID")
            .unwrap_or_else(|_| format!("bv-{}-{}", Utc::now().timestamp_millis(), process::id()));
        let filters = Filters::from_env();
        let Some(base) = std::env::var_os("LOG_DIR") else {
            return Run { id, filters, events: None, trace: None };
        };
        let dir = Path::new(&base).join(&id);
        if let Err(err) = fs::create_dir_all(&dir) {
            eprintln!("[log] cannot create {}: {}", dir.display(), err);
            return Run { id, filters, events: None, trace: None };
        }
        let header = json!({"run_id": &id, "ts": ts_now(), "pid": process::id()});
        let _ = fs::write(dir.join("run.json"), header.to_string());
        Run {
            events: appender(&dir.join("events.jsonl")),
            trace: appender(&dir.join("trace.jsonl")),
            id,
            filters,
        }
    })
}

/// RFC3339 timestamp with milliseconds.
pub fn ts_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Row coordinates and the message sit beside the envelope; everything else
/// goes under "data".
fn build_entry(run_id: &str, seq: u64, level: Level, category: Category, event: &str, mut fields: Map<String, Value>) -> Value {
    let mut entry = Map::new();
    entry.insert("ts".into(), json!(ts_now()));
    entry.insert("run_id".into(), json!(run_id));
    entry.insert("seq".into(), json!(seq));
    entry.insert("lvl".into(), json!(level.as_str()));
    entry.insert("category".into(), json!(category.as_str()));
    entry.insert("event".into(), json!(event));
    for key in ["msg", "metric", "domain", "problem"] {
        if let Some(v) = fields.remove(key) {
            entry.insert(key.into(), v);
        }
    }
    entry.insert("data".into(), Value::Object(fields));
    Value::Object(entry)
}

/// Emit a structured log entry to stderr and, with LOG_DIR set, to the run's
/// files.
pub fn log(level: Level, category: Category, event: &str, fields: Map<String, Value>) {
    let run = run();
    if level < run.filters.threshold || !category.allowed_by(run.filters.categories.as_deref()) {
        return;
    }
    let seq = SEQ.fetch_add(1, Ordering::SeqCst);
    let line = build_entry(&run.id, seq, level, category, event, fields).to_string();
    let sink = if level <= Level::Debug { &run.trace } else { &run.events };
    if let Some(Ok(mut w)) = sink.as_ref().map(|m| m.lock()) {
        let _ = writeln!(w, "{}", line);
        let _ = w.flush();
    }
    eprintln!("{}", line);
}

pub fn log_dataset_loaded(
    fingerprint: &str,
    algorithms: usize,
    domains: usize,
    problems: usize,
    metrics: usize,
    numeric_metrics: usize,
) {
    log(
        Level::Info,
        Category::Ingest,
        "dataset_loaded",
        obj(&[
            ("fingerprint", v_str(fingerprint)),
            ("algorithms", json!(algorithms)),
            ("domains", json!(domains)),
            ("problems", json!(problems)),
            ("metrics", json!(metrics)),
            ("numeric_metrics", json!(numeric_metrics)),
        ]),
    );
}

pub fn log_ingest_failure(reason: &str) {
    log(
        Level::Warn,
        Category::Ingest,
        "ingest_failed",
        obj(&[
            ("msg", v_str("falling back to empty dataset")),
            ("reason", v_str(reason)),
        ]),
    );
}

pub fn log_metric_recompute(metric: &str, aggregator: &str, contributing: usize, total: usize) {
    log(
        Level::Debug,
        Category::Aggregate,
        "metric_recompute",
        obj(&[
            ("metric", v_str(metric)),
            ("aggregator", v_str(aggregator)),
            ("contributing", json!(contributing)),
            ("total", json!(total)),
        ]),
    );
}

pub fn log_domain_recompute(metric: &str, domains_with_data: usize, domains: usize) {
    log(
        Level::Debug,
        Category::Aggregate,
        "domain_recompute",
        obj(&[
            ("metric", v_str(metric)),
            ("domains_with_data", json!(domains_with_data)),
            ("domains", json!(domains)),
        ]),
    );
}

pub fn log_rejected(operation: &str, reason: &str) {
    log(
        Level::Warn,
        Category::Session,
        "rejected",
        obj(&[("operation", v_str(operation)), ("reason", v_str(reason))]),
    );
}

pub fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
}

pub fn v_str(s: &str) -> Value {
    Value::String(s.to_string())
}

pub fn v_num(n: f64) -> Value {
    json!(n)
}

pub fn v_list(items: &[String]) -> Value {
    items.iter().map(|s| v_str(s)).collect()
}

/// Timing scope, logged at trace level when dropped. PROFILE_SAMPLE in [0, 1]
/// thins out the scopes that get reported.
pub struct ProfileScope {
    label: &'static str,
    started: Instant,
    context: Option<Map<String, Value>>,
}

impl ProfileScope {
    pub fn new(label: &'static str) -> Self {
        Self::with_context(label, &[])
    }

    pub fn with_context(label: &'static str, fields: &[(&str, Value)]) -> Self {
        let rate = run().filters.profile_rate;
        Self {
            label,
            started: Instant::now(),
            context: sampled(rate, PROFILE_TICKS.fetch_add(1, Ordering::Relaxed)).then(|| obj(fields)),
        }
    }
}

fn sampled(rate: f64, tick: u64) -> bool {
    if rate >= 1.0 {
        return true;
    }
    rate > 0.0 && ((tick % 10_000) as f64 / 10_000.0) < rate
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let Some(mut fields) = self.context.take() else {
            return;
        };
        fields.insert("label".into(), v_str(self.label));
        fields.insert("elapsed_ms".into(), v_num(self.started.elapsed().as_secs_f64() * 1000.0));
        log(Level::Trace, Category::Profile, "profile", fields);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse_and_order() {
        assert_eq!(Level::parse(" WARN "), Some(Level::Warn));
        assert_eq!(Level::parse("fatal"), None);
        assert!(Level::Debug < Level::Info && Level::Warn < Level::Error);
    }

    #[test]
    fn test_category_filter() {
        assert!(Category::Compare.allowed_by(None));
        assert!(Category::Compare.allowed_by(Some("all")));
        assert!(Category::Compare.allowed_by(Some("ingest, compare")));
        assert!(!Category::Fold.allowed_by(Some("ingest,compare")));
    }

    #[test]
    fn test_entry_lifts_row_coordinates() {
        let fields = obj(&[
            ("metric", v_str("cost")),
            ("msg", v_str("hello")),
            ("contributing", json!(3)),
        ]);
        let entry = build_entry("r", 7, Level::Info, Category::Aggregate, "metric_recompute", fields);
        assert_eq!(entry["metric"], "cost");
        assert_eq!(entry["msg"], "hello");
        assert_eq!(entry["category"], "aggregate");
        assert_eq!(entry["seq"], 7);
        assert_eq!(entry["data"]["contributing"], 3);
        assert!(entry["data"].get("metric").is_none());
    }

    #[test]
    fn test_filters_from_vars() {
        let f = Filters::from_vars(Some("debug".into()), Some(" compare,fold ".into()), Some("0.25".into()));
        assert_eq!(f.threshold, Level::Debug);
        assert!(Category::Fold.allowed_by(f.categories.as_deref()));
        assert!(!Category::Ingest.allowed_by(f.categories.as_deref()));
        assert_eq!(f.profile_rate, 0.25);

        let defaults = Filters::from_vars(Some("loud".into()), None, Some("often".into()));
        assert_eq!(defaults, Filters { threshold: Level::Info, categories: None, profile_rate: 1.0 });
    }

    #[test]
    fn test_filters_read_once() {
        let first = &run().filters as *const Filters;
        assert_eq!(first, &run().filters as *const Filters);
    }

    #[test]
    fn test_sampling_bounds() {
        assert!(sampled(1.0, 12345));
        assert!(!sampled(0.0, 0));
        assert!(sampled(0.5, 1));
        assert!(!sampled(0.5, 9_000));
    }
}
