use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};

/// The exposed upload tree.
///
/// Completed extractions are moved here under a per-upload batch directory
/// and served back to peers over `/files/<batch>/<path>`.
pub struct UploadStore {
    root: PathBuf,
}

impl UploadStore {
    pub async fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .await
            .with_context(|| format!("creating upload dir {}", root.display()))?;
        info!("upload directory: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Move one extracted file out of its staging dir into
    /// `<root>/<batch>/<rel>`. Returns the URL path (`batch/rel`, forward
    /// slashes) for the peer's download link.
    pub async fn publish(&self, staged: &Path, batch: &str, rel: &Path) -> Result<String> {
        let dest = self.root.join(batch).join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Staging lives under the system temp dir, which may be another
        // filesystem; fall back to copy when rename cannot cross.
        if fs::rename(staged, &dest).await.is_err() {
            fs::copy(staged, &dest).await.with_context(|| {
                format!("copying {} to {}", staged.display(), dest.display())
            })?;
            let _ = fs::remove_file(staged).await;
        }

        let rel_url = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        Ok(format!("{batch}/{rel_url}"))
    }

    /// Delete batch directories whose last modification is older than
    /// `retention`. Returns how many were pruned.
    pub async fn sweep(&self, retention: Duration) -> Result<usize> {
        let mut pruned = 0;
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = match entry.metadata().await {
                Ok(m) => m,
                Err(_) => continue,
            };
            if !meta.is_dir() {
                continue;
            }
            let age = meta
                .modified()
                .ok()
                .and_then(|t| t.elapsed().ok())
                .unwrap_or_default();
            if age > retention {
                match fs::remove_dir_all(entry.path()).await {
                    Ok(()) => pruned += 1,
                    Err(e) => warn!("pruning {} failed: {e}", entry.path().display()),
                }
            }
        }
        Ok(pruned)
    }
}
