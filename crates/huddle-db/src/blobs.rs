use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use rand::Rng;
use rand::distr::Alphanumeric;
use tokio::fs;
use tracing::{info, warn};

/// URL prefix under which stored blobs are served.
pub const PUBLIC_PREFIX: &str = "/uploads/";

const MAX_EXTENSION_CHARS: usize = 10;

/// Manages locally owned attachment blobs.
///
/// Each blob is a flat file at `{dir}/{name}` and is addressed by clients as
/// `/uploads/{name}`. Only URLs with that prefix and a plain file name are
/// considered locally owned.
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Upload directory: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a new blob and return its public URL.
    pub async fn store(&self, extension: Option<&str>, data: &[u8]) -> Result<String> {
        let name = blob_name(chrono::Utc::now().timestamp_millis(), extension);
        fs::write(self.dir.join(&name), data).await?;
        Ok(format!("{PUBLIC_PREFIX}{name}"))
    }

    /// Map a public URL to its on-disk path, or `None` if the URL does not
    /// point into this store.
    pub fn local_path(&self, url: &str) -> Option<PathBuf> {
        let name = url.strip_prefix(PUBLIC_PREFIX)?;
        if !is_plain_file_name(name) {
            return None;
        }
        Some(self.dir.join(name))
    }

    pub async fn read(&self, url: &str) -> Result<Vec<u8>> {
        let Some(path) = self.local_path(url) else {
            bail!("not a local blob: {}", url);
        };
        Ok(fs::read(&path).await?)
    }

    /// Delete a blob. Returns false if the URL is not locally owned or the
    /// file is already gone.
    pub async fn remove(&self, url: &str) -> Result<bool> {
        let Some(path) = self.local_path(url) else {
            return Ok(false);
        };
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted blob {}", path.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", path.display());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// `{millis}-{7 random alphanumerics}[.ext]`
fn blob_name(now_ms: i64, extension: Option<&str>) -> String {
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();

    match extension.map(sanitize_extension).filter(|e| !e.is_empty()) {
        Some(ext) => format!("{now_ms}-{suffix}.{ext}"),
        None => format!("{now_ms}-{suffix}"),
    }
}

fn sanitize_extension(raw: &str) -> String {
    raw.trim_start_matches('.')
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(MAX_EXTENSION_CHARS)
        .collect::<String>()
        .to_ascii_lowercase()
}

fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
