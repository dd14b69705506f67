use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use url::Url;

use crate::client::{LinxClient, UploadRequest, Uploaded};
use crate::config::{Config, Overrides};

mod client;
mod config;
mod progress;
mod uploadlog;

const COLLECTION_NAME: &str = "linx.collection";
const REPORT_WIDTH: usize = 40;

#[derive(Parser)]
#[command(name = "linx")]
#[command(version)]
#[command(about = "Upload files to a linx server, or delete previous uploads")]
struct Cli {
    /// Delete the given URLs instead of uploading
    #[arg(short, long)]
    delete: bool,
    /// Delete key to attach to uploads, or to use for deletion
    #[arg(long)]
    delete_key: Option<String>,
    /// Time until the upload expires, in seconds or as a duration such as "90s" or "2h" (0 = server default)
    #[arg(long, value_parser = parse_ttl, default_value = "0")]
    ttl: u64,
    /// After uploading, also upload a newline-separated list of the result URLs
    #[arg(long)]
    collection: bool,
    /// Server base URL
    #[arg(long)]
    server: Option<Url>,
    /// Proxy URL (http, https or socks5)
    #[arg(long)]
    proxy: Option<Url>,
    /// Config file path
    #[arg(long)]
    config: Option<PathBuf>,
    /// File recording name:key pairs for later deletion
    #[arg(long)]
    upload_log: Option<PathBuf>,
    /// API key for servers that require authentication
    #[arg(long)]
    api_key: Option<String>,
    /// Extra header to send, as "Name: Value"
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
    /// Store an API key in the OS keyring and exit
    #[arg(long)]
    set_api_key: Option<String>,
    /// Files to upload, or URLs to delete with --delete
    targets: Vec<String>,
}

fn parse_ttl(value: &str) -> Result<u64, String> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(seconds);
    }
    humantime::parse_duration(value)
        .map(|duration| duration.as_secs())
        .map_err(|err| format!("invalid duration {value:?}: {err}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(api_key) = cli.set_api_key {
        return config::set_api_key_keyring(api_key);
    }

    if cli.targets.is_empty() {
        bail!("No files to upload or URLs to delete");
    }

    let config = config::read_config(
        cli.config.as_deref(),
        Overrides {
            server: cli.server,
            proxy: cli.proxy,
            api_key: cli.api_key,
            upload_log: cli.upload_log,
            headers: cli.headers,
        },
    )?;

    let client = LinxClient::new(config.proxy.as_ref())?;

    if cli.delete {
        run_deletes(&client, &config, &cli.targets, cli.delete_key.as_deref()).await
    } else {
        run_uploads(
            &client,
            &config,
            &cli.targets,
            cli.delete_key,
            cli.ttl,
            cli.collection,
        )
        .await
    }
}

/// Uploads each file in turn, reporting every result as it lands. Any
/// failure aborts the rest of the batch. With `collection` set, the result
/// URLs are uploaded once more as a newline-separated list.
async fn run_uploads(
    client: &LinxClient,
    config: &Config,
    paths: &[String],
    delete_key: Option<String>,
    ttl: u64,
    collection: bool,
) -> Result<()> {
    let mut urls = Vec::new();

    for path in paths {
        let path = Path::new(path);
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let metadata = file
            .metadata()
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?;
        if metadata.is_dir() {
            bail!("{} is a directory", path.display());
        }
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("{} has no file name", path.display()))?;

        let uploaded = client
            .upload(
                config,
                UploadRequest {
                    name,
                    size: metadata.len(),
                    source: file,
                    ttl,
                    delete_key: delete_key.clone(),
                },
            )
            .await?;

        report_upload(config, &uploaded, delete_key.as_deref()).await?;
        urls.push(uploaded.url);
    }

    if collection {
        let body = urls.join("\n");
        let uploaded = client
            .upload(
                config,
                UploadRequest {
                    name: COLLECTION_NAME.to_string(),
                    size: body.len() as u64,
                    source: Cursor::new(body.into_bytes()),
                    ttl,
                    delete_key: delete_key.clone(),
                },
            )
            .await?;
        report_upload(config, &uploaded, delete_key.as_deref()).await?;
    }

    Ok(())
}

/// Prints the upload result. Without a delete key or an upload log the key
/// is shown next to the URL; otherwise the URL is printed alone and the key
/// is persisted so deletion keeps working later.
async fn report_upload(config: &Config, uploaded: &Uploaded, supplied_key: Option<&str>) -> Result<()> {
    tracing::debug!(
        "uploaded {} ({} bytes, expires {})",
        uploaded.filename,
        uploaded.size,
        uploaded.expiry
    );

    if supplied_key.is_none() && config.upload_log.is_none() {
        println!(
            "{:<width$}  delete key: {}",
            uploaded.url,
            uploaded.delete_key,
            width = REPORT_WIDTH
        );
        return Ok(());
    }

    println!("{}", uploaded.url);

    let log = config.upload_log.as_ref().ok_or_else(|| {
        anyhow!(
            "No upload log configured to record the delete key for {}",
            uploaded.filename
        )
    })?;
    uploadlog::append(log, &uploaded.filename, &uploaded.delete_key).await
}

/// Deletes each URL in turn. A URL without a known delete key, or one the
/// server refuses, is reported and skipped; the rest of the batch goes on.
async fn run_deletes(
    client: &LinxClient,
    config: &Config,
    urls: &[String],
    delete_key: Option<&str>,
) -> Result<()> {
    let keys = match &config.upload_log {
        Some(log) => uploadlog::load(log).await?,
        None => HashMap::new(),
    };

    for url in urls {
        let target: Url = url.parse().with_context(|| format!("Invalid URL {url}"))?;
        let name = target.path().trim_start_matches('/');
        let key = delete_key.or_else(|| keys.get(name).map(String::as_str));

        match key {
            Some(key) => {
                client.delete(config, &target, key).await?;
            }
            None => println!("{url}: no delete key found"),
        }
    }

    Ok(())
}
