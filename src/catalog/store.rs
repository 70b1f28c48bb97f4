//! On-disk persistence for the catalog document

use chrono::Utc;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::model::{CatalogDocument, PersistedTrack};

const CATALOG_FILE: &str = "cache.json";

/// Errors raised while reading or writing the catalog
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to access catalog at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("catalog at {} is corrupt: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize catalog: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CatalogError + '_ {
    move |source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads and writes `<root>/cache.json`
#[derive(Debug, Clone)]
pub struct CatalogStore {
    root: PathBuf,
    path: PathBuf,
}

impl CatalogStore {
    /// Create a store for the library rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let path = root.join(CATALOG_FILE);
        Self { root, path }
    }

    /// Library root (parent of the per-author folders)
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the catalog file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the catalog, creating an empty one if absent
    ///
    /// A document that fails to parse is moved aside to
    /// `cache.json.corrupt-<timestamp>` and replaced by an empty catalog.
    pub async fn load(&self) -> Result<CatalogDocument, CatalogError> {
        match self.read_existing().await {
            Ok(Some(doc)) => Ok(doc),
            Ok(None) => {
                info!("No catalog at {}, creating an empty one", self.path.display());
                let doc = CatalogDocument::default();
                self.save(&doc).await?;
                Ok(doc)
            }
            Err(CatalogError::Corrupt { source, .. }) => {
                let quarantine = self.quarantine().await?;
                warn!(
                    "Catalog was unreadable ({}); moved to {} and started fresh",
                    source,
                    quarantine.display()
                );
                let doc = CatalogDocument::default();
                self.save(&doc).await?;
                Ok(doc)
            }
            Err(e) => Err(e),
        }
    }

    /// Read the catalog without creating or repairing anything
    ///
    /// A missing file reads as an empty catalog.
    pub async fn read(&self) -> Result<CatalogDocument, CatalogError> {
        Ok(self.read_existing().await?.unwrap_or_default())
    }

    async fn read_existing(&self) -> Result<Option<CatalogDocument>, CatalogError> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No catalog found at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(io_error(&self.path)(e)),
        };

        let mut doc: CatalogDocument =
            serde_json::from_str(&content).map_err(|source| CatalogError::Corrupt {
                path: self.path.clone(),
                source,
            })?;
        doc.upgrade_legacy();

        debug!(
            "Loaded catalog: {} tracks, {} playlists",
            doc.all.len(),
            doc.playlists.len()
        );
        Ok(Some(doc))
    }

    /// Overwrite the catalog atomically
    ///
    /// Writes a sibling temp file, syncs it and renames it over the catalog, so
    /// readers only ever see the old or the new document.
    pub async fn save(&self, doc: &CatalogDocument) -> Result<(), CatalogError> {
        fs::create_dir_all(&self.root)
            .await
            .map_err(io_error(&self.root))?;

        let mut doc = doc.clone();
        doc.sync_views();
        let content = serde_json::to_string_pretty(&doc)?;

        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)
                .await
                .map_err(io_error(&tmp_path))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(io_error(&tmp_path))?;
            file.sync_all().await.map_err(io_error(&tmp_path))?;
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(io_error(&self.path)(e));
        }

        debug!("Saved catalog to {}", self.path.display());
        Ok(())
    }

    /// Look a track up by id in the persisted catalog
    pub async fn exists(&self, id: &str) -> Result<Option<PersistedTrack>, CatalogError> {
        Ok(self.read().await?.find(id).cloned())
    }

    async fn quarantine(&self) -> Result<PathBuf, CatalogError> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%SZ");
        let target = self
            .root
            .join(format!("{}.corrupt-{}", CATALOG_FILE, stamp));
        fs::rename(&self.path, &target)
            .await
            .map_err(io_error(&self.path))?;
        Ok(target)
    }
}
