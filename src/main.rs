use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use api_utils::{Fetcher, FetcherKind, RetryPolicy, DEFAULT_TAG_ENDPOINT};
use errors::SyncError;
use filter_utils::{MissingTagsPolicy, SpliceOutcome};

mod api_utils;
mod errors;
mod filter_utils;
mod tag_utils;

const CONFIG_FILE_NAME: &str = "update_tags.toml";

/// Refresh the "Tags" group of filters.json from the MangaDex tag list
#[derive(Parser, Debug)]
#[command(name = "update-tags", version, long_about = None)]
struct Cli {
    /// Config file (default: update_tags.toml next to the binary, if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Filters document to rewrite
    #[arg(long)]
    filters: Option<PathBuf>,

    /// Tag list endpoint
    #[arg(long)]
    endpoint: Option<String>,

    /// Fetch backend
    #[arg(long, value_enum)]
    fetcher: Option<FetcherKind>,

    /// Behavior when the document has no "Tags" group
    #[arg(long, value_enum)]
    on_missing: Option<MissingTagsPolicy>,

    /// Print the updated document instead of writing it
    #[arg(long)]
    dry_run: bool,

    /// Log filter, e.g. "debug" or "update_tags=trace"
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct Config {
    server: ServerConfig,
    settings: SettingsConfig,
    paths: PathsConfig,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
struct ServerConfig {
    url: String,
    user_agent: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            url: DEFAULT_TAG_ENDPOINT.to_string(),
            user_agent: concat!("update-tags/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
struct SettingsConfig {
    fetcher: FetcherKind,
    retry_attempts: u8,
    backoff_ms: u64,
    on_missing_tags: MissingTagsPolicy,
    log_level: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        SettingsConfig {
            fetcher: FetcherKind::default(),
            retry_attempts: 1,
            backoff_ms: 1000,
            on_missing_tags: MissingTagsPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct PathsConfig {
    filters: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
struct RunSummary {
    tags: usize,
    outcome: SpliceOutcome,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let config = apply_overrides(config, &cli);

    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::new(&config.settings.log_level))
        .init();

    let fetcher = Fetcher::new(config.settings.fetcher, &config.server.user_agent)
        .await
        .context("Capability check failed")?;

    let filters_path = match &config.paths.filters {
        Some(path) => path.clone(),
        None => filter_utils::default_filters_path()?,
    };

    let retry = RetryPolicy {
        attempts: config.settings.retry_attempts,
        backoff: Duration::from_millis(config.settings.backoff_ms),
    };
    info!("Fetching tags from {} via {:?}", config.server.url, config.settings.fetcher);
    let spinner = fetch_spinner(&config.server.url);
    let fetched = fetcher.fetch_tags(&config.server.url, &retry).await;
    spinner.finish_and_clear();
    let body = fetched.context("Fetching tag list failed")?;

    let summary = update_filters(&body, &filters_path, config.settings.on_missing_tags, cli.dry_run)
        .with_context(|| format!("Updating {} failed", filters_path.display()))?;

    match summary.outcome {
        SpliceOutcome::Replaced(groups) => info!(
            "Wrote {} tags into {} \"Tags\" group(s) of {}",
            summary.tags,
            groups,
            filters_path.display()
        ),
        SpliceOutcome::Appended => info!(
            "Appended a \"Tags\" group with {} tags to {}",
            summary.tags,
            filters_path.display()
        ),
        SpliceOutcome::Unchanged => info!("Rewrote {} without changes", filters_path.display()),
    }
    Ok(())
}

/// Parses the upstream body, splices it into the document and writes it back.
/// Nothing touches the file until every earlier step has succeeded.
fn update_filters(
    body: &[u8],
    filters_path: &Path,
    policy: MissingTagsPolicy,
    dry_run: bool,
) -> Result<RunSummary, SyncError> {
    let response = tag_utils::parse_tag_response(body)?;
    let entries = tag_utils::to_filter_entries(&response);
    info!("Parsed {} tags", entries.len());

    let mut groups = filter_utils::load_document(filters_path)?;
    let outcome = filter_utils::splice_tags(&mut groups, &entries, policy)?;
    let rendered = filter_utils::render_document(&groups)?;

    if dry_run {
        let mut stdout = io::stdout().lock();
        stdout
            .write_all(&rendered)
            .and_then(|_| stdout.write_all(b"\n"))
            .map_err(|e| SyncError::filesystem("<stdout>", e))?;
    } else {
        filter_utils::write_atomic(filters_path, &rendered)?;
    }

    Ok(RunSummary {
        tags: entries.len(),
        outcome,
    })
}

fn load_config(explicit: Option<&Path>) -> Result<Config, SyncError> {
    let config_path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match filter_utils::binary_path()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            Some(dir) => dir.join(CONFIG_FILE_NAME),
            None => return Ok(Config::default()),
        },
    };

    if explicit.is_none() && !config_path.exists() {
        return Ok(Config::default());
    }

    let config_data = fs::read_to_string(&config_path).map_err(|e| SyncError::filesystem(&config_path, e))?;
    parse_config(&config_data)
}

fn parse_config(config_data: &str) -> Result<Config, SyncError> {
    toml::from_str(config_data).map_err(|e| SyncError::Config(e.to_string()))
}

fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(filters) = &cli.filters {
        config.paths.filters = Some(filters.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config.server.url = endpoint.clone();
    }
    if let Some(fetcher) = cli.fetcher {
        config.settings.fetcher = fetcher;
    }
    if let Some(policy) = cli.on_missing {
        config.settings.on_missing_tags = policy;
    }
    if let Some(level) = &cli.log_level {
        config.settings.log_level = level.clone();
    }
    config
}

fn fetch_spinner(url: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("GET {}", url));
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
