use anyhow::{anyhow, Result};
use benchview::config::Config;
use benchview::data::source::load_dataset;
use benchview::engine::fold::RowKey;
use benchview::engine::Engine;
use benchview::logging::{log, obj, v_str, Category, Level, ProfileScope};
use serde_json::json;
use std::env;

const USAGE: &str = "usage: benchview table [properties] [metric-to-expand ...]
       benchview wins <properties> <metric> [algorithm ...]
       benchview diff <properties> <algorithm1> <algorithm2> [--percent]";

fn location(arg: Option<&String>, cfg: &Config) -> Result<String> {
    arg.cloned()
        .or_else(|| cfg.properties.clone())
        .ok_or_else(|| anyhow!("no properties location given and PROPERTIES unset\n{}", USAGE))
}

/// Aggregate table of every metric, with the named metrics expanded.
async fn table(args: &[String], cfg: &Config) -> Result<()> {
    let loc = location(args.first(), cfg)?;
    let mut engine = Engine::new(cfg);
    engine.load(load_dataset(&loc, cfg).await);
    for metric in args.iter().skip(1) {
        engine.toggle(&RowKey::Metric(metric.clone()))?;
    }
    let payload = json!({
        "fingerprint": engine.dataset().fingerprint(),
        "algorithms": engine.selected_algorithms(),
        "digest": engine.table().digest(),
        "rows": engine.rows(),
    });
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

/// Win-count matrices of one metric.
async fn wins(args: &[String], cfg: &Config) -> Result<()> {
    let (loc, metric) = match args {
        [loc, metric, ..] => (loc.clone(), metric.clone()),
        _ => return Err(anyhow!(USAGE)),
    };
    let mut engine = Engine::new(cfg);
    engine.load(load_dataset(&loc, cfg).await);
    let algorithms: Vec<String> = if args.len() > 2 {
        args[2..].to_vec()
    } else {
        engine.selected_algorithms().to_vec()
    };
    let matrices = engine.comparison_matrix(&metric, &algorithms)?;
    println!("{}", serde_json::to_string_pretty(matrices)?);
    Ok(())
}

/// Two algorithms side by side over the metric rows.
async fn diff(args: &[String], cfg: &Config) -> Result<()> {
    let (loc, a1, a2) = match args {
        [loc, a1, a2, ..] => (loc, a1, a2),
        _ => return Err(anyhow!(USAGE)),
    };
    let percentual = args[3..].iter().any(|a| a == "--percent");
    let mut engine = Engine::new(cfg);
    engine.load(load_dataset(loc, cfg).await);
    let rows = engine.diff_rows(a1, a2, percentual)?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Config::from_env();
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        return Err(anyhow!(USAGE));
    };
    let _scope = ProfileScope::new("cli");
    log(Level::Info, Category::System, "start", obj(&[("command", v_str(command))]));
    match command.as_str() {
        "table" => table(&args[1..], &cfg).await,
        "wins" => wins(&args[1..], &cfg).await,
        "diff" => diff(&args[1..], &cfg).await,
        other => Err(anyhow!("unknown command '{}'\n{}", other, USAGE)),
    }
}
