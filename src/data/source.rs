//! Where properties and bounds documents come from: a local path or an
//! http(s) URL. Fetch failures are ingestion failures and end in an
//! empty dataset rather than an error.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use super::retry::{is_retryable_http_error, retry_async, Permanent, RetryConfig};
use super::{parse_bounds, Bounds, Dataset};
use crate::config::Config;
use crate::logging::{log, log_ingest_failure, obj, v_str, Category, Level};

#[async_trait]
pub trait PropertiesSource {
    async fn fetch(&self) -> Result<String>;
    fn describe(&self) -> String;
}

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl PropertiesSource for FileSource {
    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| anyhow!("cannot read {}: {}", self.path.display(), e))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

pub struct HttpSource {
    client: Client,
    url: Url,
    retry: RetryConfig,
}

impl HttpSource {
    pub fn new(url: Url, cfg: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url,
            retry: RetryConfig {
                max_retries: cfg.fetch_retries,
                base_delay_ms: cfg.fetch_base_delay_ms,
                ..Default::default()
            },
        })
    }

    async fn fetch_once(&self) -> Result<String> {
        let resp = self.client.get(self.url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let code = status.as_u16();
            if is_retryable_http_error(code) {
                return Err(anyhow!("transient http status {}", code));
            }
            return Err(Permanent(format!("http status {}", code)).into());
        }
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl PropertiesSource for HttpSource {
    async fn fetch(&self) -> Result<String> {
        retry_async(&self.retry, "fetch_properties", || self.fetch_once()).await
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

/// Pick a source for a location: http(s) URLs are fetched, anything else
/// is treated as a filesystem path.
pub fn source_for(location: &str, cfg: &Config) -> Result<Box<dyn PropertiesSource + Send + Sync>> {
    match Url::parse(location) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Ok(Box::new(HttpSource::new(url, cfg)?)),
        Ok(url) if url.scheme() == "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| anyhow!("invalid file url {}", location))?;
            Ok(Box::new(FileSource::new(path)))
        }
        _ => Ok(Box::new(FileSource::new(location))),
    }
}

/// Fetch and parse reference bounds. Any failure means "no bounds".
pub async fn load_bounds(location: &str, cfg: &Config) -> Option<Bounds> {
    let text = match source_for(location, cfg) {
        Ok(src) => src.fetch().await,
        Err(e) => Err(e),
    };
    match text.map(|t| parse_bounds(&t)) {
        Ok(Some(bounds)) => Some(bounds),
        Ok(None) | Err(_) => {
            log(
                Level::Info,
                Category::Source,
                "bounds_unavailable",
                obj(&[("location", v_str(location))]),
            );
            None
        }
    }
}

/// Fetch, parse and pivot a properties document. Never fails: an
/// unreadable source gives an empty dataset.
pub async fn load_dataset(location: &str, cfg: &Config) -> Dataset {
    let text = match source_for(location, cfg) {
        Ok(src) => {
            log(
                Level::Info,
                Category::Source,
                "fetch",
                obj(&[("location", v_str(&src.describe()))]),
            );
            src.fetch().await
        }
        Err(e) => Err(e),
    };
    let text = match text {
        Ok(t) => t,
        Err(err) => {
            log_ingest_failure(&err.to_string());
            return Dataset::empty();
        }
    };
    let bounds = match &cfg.bounds_file {
        Some(loc) => load_bounds(loc, cfg).await,
        None => None,
    };
    Dataset::from_properties(&text, bounds.as_ref())
}
