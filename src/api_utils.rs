use reqwest::Client;
use serde::Deserialize;
use std::future::Future;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::errors::{Result, SyncError};

pub const DEFAULT_TAG_ENDPOINT: &str = "https://api.mangadex.org/manga/tag";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FetcherKind {
    /// In-process HTTP client.
    #[default]
    Reqwest,
    /// External `curl` executable.
    Curl,
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u8,
    pub backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| SyncError::MissingCapability(format!("HTTP client unavailable: {}", e)))?;
        Ok(HttpFetcher { client })
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::Fetch(e.to_string()))?
            .error_for_status()
            .map_err(|e| SyncError::Fetch(e.to_string()))?;
        let body = response.bytes().await.map_err(|e| SyncError::Fetch(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct CurlFetcher {
    program: String,
    user_agent: String,
}

impl CurlFetcher {
    /// Fails unless `curl --version` runs and exits cleanly.
    pub async fn new(program: &str, user_agent: &str) -> Result<Self> {
        let status = Command::new(program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| SyncError::MissingCapability(format!("{} is not installed: {}", program, e)))?;
        if !status.success() {
            return Err(SyncError::MissingCapability(format!(
                "{} --version exited with {}",
                program, status
            )));
        }
        Ok(CurlFetcher {
            program: program.to_string(),
            user_agent: user_agent.to_string(),
        })
    }

    fn args(&self, url: &str) -> Vec<String> {
        vec![
            "-sSfL".to_string(),
            "-A".to_string(),
            self.user_agent.clone(),
            url.to_string(),
        ]
    }

    async fn get(&self, url: &str) -> Result<Vec<u8>> {
        let output = Command::new(&self.program)
            .args(self.args(url))
            .output()
            .await
            .map_err(|e| SyncError::Fetch(format!("failed to run {}: {}", self.program, e)))?;
        if !output.status.success() {
            return Err(SyncError::Fetch(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

#[derive(Debug, Clone)]
pub enum Fetcher {
    Http(HttpFetcher),
    Curl(CurlFetcher),
}

impl Fetcher {
    /// Builds the selected backend; this is the capability check.
    pub async fn new(kind: FetcherKind, user_agent: &str) -> Result<Self> {
        match kind {
            FetcherKind::Reqwest => Ok(Fetcher::Http(HttpFetcher::new(user_agent)?)),
            FetcherKind::Curl => Ok(Fetcher::Curl(CurlFetcher::new("curl", user_agent).await?)),
        }
    }

    pub async fn fetch_tags(&self, url: &str, retry: &RetryPolicy) -> Result<Vec<u8>> {
        debug!("GET {}", url);
        with_retry(retry, move || async move {
            match self {
                Fetcher::Http(http) => http.get(url).await,
                Fetcher::Curl(curl) => curl.get(url).await,
            }
        })
        .await
    }
}

async fn with_retry<F, Fut, T>(retry: &RetryPolicy, func: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        match func().await {
            Ok(result) => return Ok(result),
            Err(e) if attempt < attempts => {
                warn!("Fetch failed: {}. Retrying... (Attempt {}/{})", e, attempt + 1, attempts);
                attempt += 1;
                tokio::time::sleep(retry.backoff).await;
            }
            Err(e) => return Err(e),
        }
    }
}
