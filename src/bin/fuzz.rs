//! Seeded random-operation run against the engine. Prints one JSON line per
//! violated invariant and exits non-zero if any was found.

use benchview::config::Config;
use benchview::data::{Dataset, Record, Value};
use benchview::engine::fold::RowKey;
use benchview::engine::aggregate::FilteredData;
use benchview::engine::Engine;
use benchview::metrics::{Aggregator, PolicyOverride};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::env;

const METRICS: [&str; 4] = ["cost", "expansions", "search_time", "coverage"];

fn random_dataset(rng: &mut StdRng) -> Dataset {
    let algorithms = rng.gen_range(1..5);
    let domains = rng.gen_range(1..4);
    let mut records = Vec::new();
    for d in 0..domains {
        for p in 0..rng.gen_range(1..6) {
            for a in 0..algorithms {
                if rng.gen_bool(0.15) {
                    continue;
                }
                let mut r = Record::new(&format!("alg{}", a), &format!("dom{}", d), &format!("p{:02}", p));
                for m in METRICS {
                    let v = if rng.gen_bool(0.1) {
                        Value::Missing
                    } else if rng.gen_bool(0.2) {
                        Value::Number(0.0)
                    } else {
                        Value::Number(rng.gen_range(1..1000) as f64)
                    };
                    r = r.with(m, v);
                }
                records.push(r);
            }
        }
    }
    Dataset::load(&records, None)
}

fn pick<'a>(rng: &mut StdRng, items: &'a [String]) -> Option<&'a String> {
    if items.is_empty() {
        None
    } else {
        Some(&items[rng.gen_range(0..items.len())])
    }
}

fn subset(rng: &mut StdRng, items: &[String], min: usize) -> Vec<String> {
    let mut out: Vec<String> = items.iter().filter(|_| rng.gen_bool(0.6)).cloned().collect();
    for item in items {
        if out.len() >= min {
            break;
        }
        if !out.contains(item) {
            out.push(item.clone());
        }
    }
    out
}

struct Checker {
    violations: u64,
}

impl Checker {
    fn fail(&mut self, step: u64, invariant: &str, detail: String) {
        self.violations += 1;
        println!("{}", json!({"step": step, "invariant": invariant, "detail": detail}));
    }

    fn check_engine(&mut self, step: u64, engine: &Engine) {
        let table = engine.table();
        for (metric, row) in table.metric_rows() {
            if row.coverage.contributing > row.coverage.total {
                self.fail(step, "coverage", format!("{} {}", metric, row.coverage_label()));
            }
            if row.values.values().any(|v| !v.is_finite()) {
                self.fail(step, "finite_aggregate", metric.clone());
            }
        }
        for key in engine.visible_rows() {
            if !engine.selected_metrics().contains(key.metric()) {
                self.fail(step, "visible_metric_selected", key.to_string());
            }
        }
    }
}

fn main() {
    let seed = env::var("SEED").ok().and_then(|v| v.parse().ok()).unwrap_or(42u64);
    let steps = env::var("STEPS").ok().and_then(|v| v.parse().ok()).unwrap_or(500u64);
    let mut rng = StdRng::seed_from_u64(seed);
    let mut engine = Engine::new(&Config::default());
    let mut checker = Checker { violations: 0 };
    let mut rejected = 0u64;

    for step in 0..steps {
        if step % 100 == 0 {
            engine.load(random_dataset(&mut rng));
        }
        let algorithms = engine.dataset().algorithms().to_vec();
        let domains = engine.dataset().domains().to_vec();
        let metrics = engine.dataset().numeric_metrics().to_vec();

        match rng.gen_range(0..6) {
            0 => {
                let algs = subset(&mut rng, &algorithms, 1);
                let doms = subset(&mut rng, &domains, 0);
                let mets = subset(&mut rng, engine.dataset().metrics(), 1);
                if engine.select(&algs, &doms, &mets).is_err() {
                    rejected += 1;
                }
            }
            1 => {
                if let Some(m) = pick(&mut rng, &metrics).cloned() {
                    let aggregator = [Aggregator::Sum, Aggregator::Mean, Aggregator::Gmean][rng.gen_range(0..3)];
                    let change = PolicyOverride { aggregator: Some(aggregator), min_wins: Some(rng.gen_bool(0.5)) };
                    if engine.set_policy_override(&m, change).is_err() {
                        rejected += 1;
                    }
                }
            }
            2 => {
                if let Some(m) = pick(&mut rng, &metrics).cloned() {
                    let _ = engine.reset_policy(&m);
                }
            }
            3 => {
                let visible = engine.visible_rows().to_vec();
                if visible.is_empty() {
                    continue;
                }
                let key = visible[rng.gen_range(0..visible.len())].clone();
                if matches!(key, RowKey::Metric(_)) && !engine.fold().is_metric_expanded(key.metric()) {
                    // expand then collapse must restore the rows and leave the aggregate alone
                    let before = engine.table().metric_row(key.metric()).cloned();
                    let _ = engine.toggle(&key);
                    let _ = engine.toggle(&key);
                    if engine.visible_rows() != visible.as_slice() {
                        checker.fail(step, "fold_round_trip", key.to_string());
                    }
                    if engine.table().metric_row(key.metric()).cloned() != before {
                        checker.fail(step, "toggle_mutated_aggregate", key.to_string());
                    }
                }
                let _ = engine.toggle(&key);
            }
            4 => {
                if let Some(m) = pick(&mut rng, &metrics).cloned() {
                    let algs = subset(&mut rng, &algorithms, 2);
                    let common =
                        FilteredData::common_subset(engine.dataset(), &m, &algs, engine.selected_domains()).len();
                    match engine.comparison_matrix(&m, &algs) {
                        Ok(matrices) => {
                            let n = matrices.algorithms.len();
                            for i in 0..n {
                                for j in 0..n {
                                    if i != j && (matrices.problem_wins[i][j] + matrices.problem_wins[j][i]) as usize > common {
                                        checker.fail(step, "win_count_bound", format!("{} {}/{}", m, i, j));
                                    }
                                }
                            }
                        }
                        Err(_) => rejected += 1,
                    }
                }
            }
            _ => {
                let digest = engine.table().digest();
                let session = engine.session();
                if engine.restore(&session).is_ok() && engine.table().digest() != digest {
                    checker.fail(step, "idempotence", digest);
                }
            }
        }
        checker.check_engine(step, &engine);
    }

    println!(
        "{}",
        json!({"seed": seed, "steps": steps, "rejected": rejected, "violations": checker.violations})
    );
    if checker.violations > 0 {
        std::process::exit(1);
    }
}
