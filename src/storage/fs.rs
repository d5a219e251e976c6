/// Filesystem-backed data source
///
/// Blobs live under `<root>/<account>/<container>/<path>`. Blob paths are
/// relative and may not climb out of the container directory.
use crate::config::types::StorageError;
use crate::storage::source::{DataSource, StorageConfig, StorageResult};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

pub struct FsDataSource {
    config: StorageConfig,
    container_dir: PathBuf,
    quota_bytes: Option<u64>,
}

impl FsDataSource {
    pub fn new(config: StorageConfig, root: impl AsRef<Path>) -> Self {
        let container_dir = root
            .as_ref()
            .join(config.account())
            .join(config.container());
        Self {
            config,
            container_dir,
            quota_bytes: None,
        }
    }

    /// Cap the total bytes stored in the container
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota_bytes = Some(bytes);
        self
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    fn blob_path(&self, path: &str) -> StorageResult<PathBuf> {
        if path.is_empty() {
            return Err(StorageError::Validation(
                "blob path must be non-empty".to_string(),
            ));
        }
        let relative = Path::new(path);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(StorageError::AccessDenied(format!(
                        "blob path {} escapes container {}",
                        path,
                        self.config.container()
                    )))
                }
            }
        }
        Ok(self.container_dir.join(relative))
    }

    fn used_bytes(&self) -> StorageResult<u64> {
        fn walk(dir: &Path) -> std::io::Result<u64> {
            let mut total = 0;
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let meta = entry.metadata()?;
                if meta.is_dir() {
                    total += walk(&entry.path())?;
                } else {
                    total += meta.len();
                }
            }
            Ok(total)
        }

        match walk(&self.container_dir) {
            Ok(total) => Ok(total),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
            Err(e) => Err(map_io(e, &self.container_dir.display().to_string())),
        }
    }
}

fn map_io(err: std::io::Error, path: &str) -> StorageError {
    match err.kind() {
        ErrorKind::NotFound => StorageError::NotFound(path.to_string()),
        ErrorKind::PermissionDenied => StorageError::AccessDenied(path.to_string()),
        _ => StorageError::Io(err),
    }
}

impl DataSource for FsDataSource {
    fn fetch(&self, path: &str) -> StorageResult<Vec<u8>> {
        let blob = self.blob_path(path)?;
        if blob.is_dir() {
            return Err(StorageError::NotFound(path.to_string()));
        }
        let bytes = fs::read(&blob).map_err(|e| map_io(e, path))?;
        log::debug!(
            "Fetched {} bytes from {}/{}",
            bytes.len(),
            self.config.container_url(),
            path
        );
        Ok(bytes)
    }

    fn store(&self, path: &str, bytes: &[u8]) -> StorageResult<()> {
        let blob = self.blob_path(path)?;

        if let Some(quota) = self.quota_bytes {
            let replaced = fs::metadata(&blob).map(|m| m.len()).unwrap_or(0);
            let used = self.used_bytes()?.saturating_sub(replaced);
            let requested = bytes.len() as u64;
            if used.saturating_add(requested) > quota {
                return Err(StorageError::QuotaExceeded {
                    quota,
                    used,
                    requested,
                });
            }
        }

        if let Some(parent) = blob.parent() {
            fs::create_dir_all(parent).map_err(|e| map_io(e, path))?;
        }
        fs::write(&blob, bytes).map_err(|e| map_io(e, path))?;
        log::debug!(
            "Stored {} bytes to {}/{}",
            bytes.len(),
            self.config.container_url(),
            path
        );
        Ok(())
    }
}
