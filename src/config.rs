use std::str::FromStr;

/// Runtime configuration, read from the environment with fallbacks.
#[derive(Debug, Clone)]
pub struct Config {
    /// Properties document location (file path or http(s) URL)
    pub properties: Option<String>,
    /// Reference cost bounds used by `ipc-sat-score`
    pub bounds_file: Option<String>,
    /// Substitute for exact zeros before taking a geometric mean
    pub gmean_epsilon: f64,
    pub fetch_retries: u32,
    pub fetch_base_delay_ms: u64,
    pub fetch_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            properties: None,
            bounds_file: Some("upper_bounds.json".to_string()),
            gmean_epsilon: 1e-6,
            fetch_retries: 3,
            fetch_base_delay_ms: 100,
            fetch_timeout_secs: 30,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            properties: std::env::var("PROPERTIES").ok().filter(|v| !v.trim().is_empty()),
            bounds_file: match std::env::var("BOUNDS_FILE") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => d.bounds_file,
            },
            gmean_epsilon: std::env::var("GMEAN_EPSILON")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|e| e.is_finite() && *e > 0.0)
                .unwrap_or(d.gmean_epsilon),
            fetch_retries: parse_or(std::env::var("FETCH_RETRIES").ok(), d.fetch_retries),
            fetch_base_delay_ms: parse_or(std::env::var("FETCH_BASE_DELAY_MS").ok(), d.fetch_base_delay_ms),
            fetch_timeout_secs: parse_or(std::env::var("FETCH_TIMEOUT_SECS").ok(), d.fetch_timeout_secs),
        }
    }
}

/// Parsed value, or `default` when unset or unparsable.
fn parse_or<T: FromStr>(raw: Option<String>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}
