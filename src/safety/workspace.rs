/// Run-scoped staging directories for uploaded payloads
/// No two sessions share a workspace; every directory is named by a fresh UUID.
use crate::config::types::{Result, TeeError};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ALGORITHM_FILE: &str = "algorithm";
const DATA_DIR: &str = "data";

/// Workspace holding the algorithm and data files of one session
#[derive(Debug)]
pub struct Workspace {
    run_id: String,
    run_dir: PathBuf,
    data_files: Vec<PathBuf>,
    removed: bool,
}

impl Workspace {
    /// Create a new workspace under `base_dir`
    pub fn new(base_dir: &Path) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let run_dir = base_dir.join(&run_id);

        fs::create_dir_all(run_dir.join(DATA_DIR)).map_err(|e| {
            TeeError::BackendUnavailable(format!(
                "Failed to create workspace directory {}: {}",
                run_dir.display(),
                e
            ))
        })?;
        fs::set_permissions(&run_dir, fs::Permissions::from_mode(0o700)).map_err(|e| {
            TeeError::BackendUnavailable(format!(
                "Failed to restrict workspace {}: {}",
                run_dir.display(),
                e
            ))
        })?;

        log::debug!("Created workspace {}", run_dir.display());
        Ok(Self {
            run_id,
            run_dir,
            data_files: Vec::new(),
            removed: false,
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn algorithm_path(&self) -> PathBuf {
        self.run_dir.join(ALGORITHM_FILE)
    }

    /// Data files in upload order
    pub fn data_paths(&self) -> &[PathBuf] {
        &self.data_files
    }

    /// Replace any previously staged payloads with these ones.
    ///
    /// On failure the workspace is left with no staged payloads.
    pub fn stage(&mut self, algorithm: &[u8], data: &[Vec<u8>]) -> Result<()> {
        self.clear_payloads()?;

        if let Err(e) = self.write_payloads(algorithm, data) {
            if let Err(clear_err) = self.clear_payloads() {
                log::warn!(
                    "Failed to clear partial upload in {}: {}",
                    self.run_dir.display(),
                    clear_err
                );
            }
            return Err(e);
        }
        Ok(())
    }

    fn write_payloads(&mut self, algorithm: &[u8], data: &[Vec<u8>]) -> Result<()> {
        let algorithm_path = self.algorithm_path();
        write_file(&algorithm_path, algorithm, 0o700)?;

        for (idx, bytes) in data.iter().enumerate() {
            let path = self.run_dir.join(DATA_DIR).join(format!("{idx:04}"));
            write_file(&path, bytes, 0o400)?;
            self.data_files.push(path);
        }

        log::debug!(
            "Staged algorithm ({} bytes) and {} data payloads in {}",
            algorithm.len(),
            data.len(),
            self.run_dir.display()
        );
        Ok(())
    }

    /// Remove staged payloads, keeping the workspace itself
    pub fn clear_payloads(&mut self) -> Result<()> {
        let algorithm_path = self.algorithm_path();
        if algorithm_path.exists() {
            fs::remove_file(&algorithm_path).map_err(|e| {
                TeeError::TransferError(format!(
                    "Failed to remove {}: {}",
                    algorithm_path.display(),
                    e
                ))
            })?;
        }

        let data_dir = self.run_dir.join(DATA_DIR);
        if data_dir.exists() {
            fs::remove_dir_all(&data_dir).map_err(|e| {
                TeeError::TransferError(format!(
                    "Failed to clear {}: {}",
                    data_dir.display(),
                    e
                ))
            })?;
        }
        fs::create_dir_all(&data_dir).map_err(|e| {
            TeeError::TransferError(format!(
                "Failed to recreate {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        self.data_files.clear();
        Ok(())
    }

    /// Write an auxiliary file (manifests, reports) into the workspace
    pub fn write_aux(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.run_dir.join(name);
        write_file(&path, bytes, 0o600)?;
        Ok(path)
    }

    /// Remove the workspace directory (idempotent)
    pub fn cleanup(&mut self) -> Result<()> {
        if self.removed {
            return Ok(());
        }
        if self.run_dir.exists() {
            fs::remove_dir_all(&self.run_dir).map_err(|e| {
                TeeError::TeardownError(format!(
                    "Failed to remove workspace {}: {}",
                    self.run_dir.display(),
                    e
                ))
            })?;
        }
        self.data_files.clear();
        self.removed = true;
        log::debug!("Removed workspace {}", self.run_dir.display());
        Ok(())
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        // Hygiene only; destroy() is the contract
        if let Err(e) = self.cleanup() {
            log::warn!("Workspace cleanup on drop failed: {}", e);
        }
    }
}

fn write_file(path: &Path, bytes: &[u8], mode: u32) -> Result<()> {
    fs::write(path, bytes).map_err(|e| {
        TeeError::TransferError(format!("Failed to write {}: {}", path.display(), e))
    })?;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        TeeError::TransferError(format!(
            "Failed to set permissions on {}: {}",
            path.display(),
            e
        ))
    })
}
