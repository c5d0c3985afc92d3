use benchview::config::Config;
use benchview::data::{default_summary_path, file_sha256, Dataset};
use benchview::data::source::load_bounds;
use serde_json::json;
use std::env;
use std::fs;
use std::path::PathBuf;

#[tokio::main]
async fn main() {
    let cfg = Config::from_env();
    let path = env::args()
        .nth(1)
        .or_else(|| cfg.properties.clone())
        .unwrap_or_else(|| "properties".to_string());
    let path = PathBuf::from(&path);

    let text = match fs::read_to_string(&path) {
        Ok(t) => t,
        Err(err) => {
            eprintln!("cannot read {}: {}", path.display(), err);
            std::process::exit(1);
        }
    };
    let file_hash = match file_sha256(&path) {
        Ok(h) => h,
        Err(err) => {
            eprintln!("hash failed: {}", err);
            std::process::exit(1);
        }
    };

    let bounds = match &cfg.bounds_file {
        Some(loc) => load_bounds(loc, &cfg).await,
        None => None,
    };
    let dataset = Dataset::from_properties(&text, bounds.as_ref());
    if dataset.is_empty() {
        eprintln!("{} holds no usable runs", path.display());
        std::process::exit(2);
    }

    let out_path = default_summary_path(&path);
    let payload = json!({
        "source": path.display().to_string(),
        "file_sha256": file_hash,
        "bounds": bounds.as_ref().map(|b| b.len()),
        "summary": dataset.summary(),
    });
    let body = match serde_json::to_string_pretty(&payload) {
        Ok(b) => b,
        Err(err) => {
            eprintln!("encode failed: {}", err);
            std::process::exit(3);
        }
    };
    if let Err(err) = fs::write(&out_path, body) {
        eprintln!("failed to write {}: {}", out_path.display(), err);
        std::process::exit(4);
    }
    println!("wrote summary {}", out_path.display());
}
