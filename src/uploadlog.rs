use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;

/// Loads the `name:key` records from an upload log.
///
/// A missing log is not an error since deletion still works with an explicit
/// key, so an empty map is returned. Records split on the first colon only,
/// lines without one are skipped, and later records win over earlier ones.
pub async fn load(path: &Path) -> Result<HashMap<String, String>> {
    let contents = match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("upload log {} does not exist yet", path.display());
            return Ok(HashMap::new());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to read upload log {}", path.display()));
        }
    };

    let mut keys = HashMap::new();
    for line in contents.lines() {
        if let Some((name, key)) = line.split_once(':') {
            keys.insert(name.to_string(), key.to_string());
        }
    }
    Ok(keys)
}

/// Appends one `name:key` record, syncing before returning so the delete key
/// survives a crash right after the upload.
pub async fn append(path: &Path, name: &str, key: &str) -> Result<()> {
    let mut options = OpenOptions::new();
    options.append(true).create(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options
        .open(path)
        .await
        .with_context(|| format!("Failed to open upload log {}", path.display()))?;
    file.write_all(format!("{name}:{key}\n").as_bytes())
        .await
        .with_context(|| format!("Failed to append to upload log {}", path.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("Failed to sync upload log {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_log_loads_empty() {
        let dir = tempdir().unwrap();
        let keys = load(&dir.path().join("absent")).await.unwrap();
        assert!(keys.is_empty());
    }

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("uploads.log");

        append(&log, "abc123.txt", "k3y").await.unwrap();
        append(&log, "photo.jpg", "s3cret").await.unwrap();

        let keys = load(&log).await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys["abc123.txt"], "k3y");
        assert_eq!(keys["photo.jpg"], "s3cret");
    }

    #[tokio::test]
    async fn later_records_win() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("uploads.log");
        tokio::fs::write(&log, "a:1\na:2\n").await.unwrap();

        let keys = load(&log).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["a"], "2");
    }

    #[tokio::test]
    async fn splits_on_first_colon_only() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("uploads.log");

        append(&log, "file.txt", "key:with:colons").await.unwrap();

        let keys = load(&log).await.unwrap();
        assert_eq!(keys["file.txt"], "key:with:colons");
    }

    #[tokio::test]
    async fn skips_lines_without_separator() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("uploads.log");
        tokio::fs::write(&log, "garbage\nok:1\n\n").await.unwrap();

        let keys = load(&log).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys["ok"], "1");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn log_is_created_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let log = dir.path().join("uploads.log");
        append(&log, "a", "1").await.unwrap();

        let mode = std::fs::metadata(&log).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
