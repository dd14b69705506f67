use anyhow::{Context, Result, anyhow};
use dotenvy::dotenv;
use keyring::Entry;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

pub const KEYRING_SERVICE: &str = "linx-api-key";
pub const KEYRING_USER: &str = "linx";

#[derive(Debug, Deserialize, Default)]
struct ConfigFile {
    server: Option<Url>,
    proxy: Option<Url>,
    api_key: Option<String>,
    upload_log: Option<PathBuf>,
    headers: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct ConfigEnv {
    linx_server: Option<Url>,
    linx_proxy: Option<Url>,
    linx_api_key: Option<String>,
    linx_upload_log: Option<PathBuf>,
}

/// Settings supplied on the command line. These beat everything else.
#[derive(Debug, Default)]
pub struct Overrides {
    pub server: Option<Url>,
    pub proxy: Option<Url>,
    pub api_key: Option<String>,
    pub upload_log: Option<PathBuf>,
    pub headers: Vec<String>,
}

/// Options resolved for the whole invocation.
pub struct Config {
    pub server: Url,
    pub proxy: Option<Url>,
    pub api_key: Option<String>,
    pub upload_log: Option<PathBuf>,
    pub headers: HeaderMap,
}

fn merge_config(base: ConfigFile, env: ConfigEnv, overrides: Overrides) -> Result<Config> {
    let server = overrides
        .server
        .or(env.linx_server)
        .or(base.server)
        .ok_or(anyhow!("No server URL provided"))?;
    let server = normalize_server(server);

    let proxy = overrides.proxy.or(env.linx_proxy).or(base.proxy);
    let upload_log = overrides
        .upload_log
        .or(env.linx_upload_log)
        .or(base.upload_log);

    let api_key = overrides
        .api_key
        .or(env.linx_api_key)
        .or(base.api_key)
        .or_else(api_key_from_keyring);

    let mut header_lines = base.headers.unwrap_or_default();
    header_lines.extend(overrides.headers);
    let headers = parse_extra_headers(&header_lines)?;

    Ok(Config {
        server,
        proxy,
        api_key,
        upload_log,
        headers,
    })
}

// Upload routes are joined onto the server URL, so its path must be a base.
fn normalize_server(mut server: Url) -> Url {
    if !server.path().ends_with('/') {
        let path = format!("{}/", server.path());
        server.set_path(&path);
    }
    server
}

fn api_key_from_keyring() -> Option<String> {
    let entry = match Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        Ok(entry) => entry,
        Err(err) => {
            tracing::debug!("OS keyring unavailable: {err}");
            return None;
        }
    };
    match entry.get_secret() {
        Ok(secret) => String::from_utf8(secret).ok(),
        Err(keyring::Error::NoEntry) => None,
        Err(err) => {
            tracing::warn!("Failed to read API key from OS keyring: {err}");
            None
        }
    }
}

fn parse_extra_headers(lines: &[String]) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("Invalid header {line:?}, expected \"Name: Value\""))?;
        let name: HeaderName = name
            .trim()
            .parse()
            .with_context(|| format!("Invalid header name in {line:?}"))?;
        let value: HeaderValue = value
            .trim()
            .parse()
            .with_context(|| format!("Invalid header value in {line:?}"))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

pub fn read_config(config_path: Option<&Path>, overrides: Overrides) -> Result<Config> {
    let _ = dotenv();
    let env_config = envy::from_env::<ConfigEnv>().unwrap_or_default();

    let file_config = match config_path {
        Some(path) => {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        }
        None => {
            let project_dirs = directories::ProjectDirs::from("", "", "linx")
                .ok_or(anyhow!("Unable to determine home directory"))?;
            let config_file = project_dirs.config_dir().join("config.toml");
            if let Ok(contents) = fs::read_to_string(config_file) {
                toml::from_str(&contents).context("Failed to parse config.toml")?
            } else {
                ConfigFile::default()
            }
        }
    };

    merge_config(file_config, env_config, overrides)
}

pub fn set_api_key_keyring(api_key: String) -> Result<()> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_USER)?;
    entry.set_secret(api_key.as_bytes())?;
    println!("API key set for use with linx");
    Ok(())
}
