use anyhow::{Context, Result, bail};
use reqwest::{Body, Client, Proxy, StatusCode};
use serde::Deserialize;
use tokio::io::AsyncRead;
use tokio_util::io::ReaderStream;
use url::Url;

use crate::config::Config;
use crate::progress::ProgressReader;

pub const USER_AGENT: &str = concat!("linx/", env!("CARGO_PKG_VERSION"));

/// Successful upload reply. Field names follow the server's JSON casing.
#[derive(Debug, Deserialize)]
pub struct Uploaded {
    #[serde(rename = "Filename")]
    pub filename: String,
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "Delete_Key")]
    pub delete_key: String,
    #[serde(rename = "Expiry")]
    pub expiry: String,
    #[serde(rename = "Size")]
    pub size: String,
}

/// One object to send. `source` streams as the request body while `size` is
/// the total used for progress accounting (0 when unknown).
pub struct UploadRequest<R> {
    pub name: String,
    pub size: u64,
    pub source: R,
    pub ttl: u64,
    pub delete_key: Option<String>,
}

pub struct LinxClient {
    client: Client,
}

impl LinxClient {
    pub fn new(proxy: Option<&Url>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(proxy) = proxy {
            builder = builder
                .proxy(Proxy::all(proxy.as_str()).with_context(|| format!("Invalid proxy URL {proxy}"))?);
        }
        let client = builder.build().context("Failed to build HTTP client")?;
        Ok(Self { client })
    }

    /// Uploads one object, streaming `request.source` as the PUT body while a
    /// progress line tracks it on stderr.
    pub async fn upload<R>(&self, config: &Config, request: UploadRequest<R>) -> Result<Uploaded>
    where
        R: AsyncRead + Send + Sync + Unpin + 'static,
    {
        let url = config
            .server
            .join(&format!("upload/{}", request.name))
            .with_context(|| format!("Failed to construct upload URL for {}", request.name))?;

        let (reader, progress) = ProgressReader::new(&request.name, request.source, request.size);

        let mut req = self
            .client
            .put(url)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .header("Linx-Randomize", "yes")
            .header("Linx-Expiry", request.ttl.to_string());

        if let Some(api_key) = &config.api_key {
            req = req.header("Linx-Api-Key", api_key);
        }
        if let Some(delete_key) = &request.delete_key {
            req = req.header("Linx-Delete-Key", delete_key);
        }

        let response = req
            .headers(config.headers.clone())
            .body(Body::wrap_stream(ReaderStream::new(reader)))
            .send()
            .await;

        // Sending consumed the reader, so the renderer is already winding
        // down; wait for it to clear the line before reporting anything.
        progress.finish().await;

        let response = response
            .with_context(|| format!("Failed to send upload request for {}", request.name))?;
        if !response.status().is_success() {
            bail!("Upload of {} failed: {}", request.name, response.status());
        }

        let body = response
            .bytes()
            .await
            .context("Failed to read upload response")?;
        serde_json::from_slice(&body).context("Failed to decode upload response")
    }

    /// Deletes a previously uploaded object. The URL must belong to the
    /// configured server so the delete key is never sent elsewhere. Returns
    /// whether the server accepted the deletion.
    pub async fn delete(&self, config: &Config, target: &Url, delete_key: &str) -> Result<bool> {
        if !target.as_str().starts_with(config.server.as_str()) {
            bail!("Refusing to delete {target}: not hosted on {}", config.server);
        }

        let response = self
            .client
            .delete(target.clone())
            .header("User-Agent", USER_AGENT)
            .header("Linx-Delete-Key", delete_key)
            .headers(config.headers.clone())
            .send()
            .await
            .with_context(|| format!("Failed to send delete request for {target}"))?;

        if response.status() == StatusCode::OK {
            println!("{target}: deleted");
            Ok(true)
        } else {
            println!("{target}: deletion failed: {}", response.status());
            Ok(false)
        }
    }
}
