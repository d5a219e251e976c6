/// Configuration loading from teebox.json
use crate::config::types::{BackendType, Result, TeeError};
use crate::storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Limits applied to the algorithm while it runs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Wall-clock budget for a single execute call
    pub timeout_ms: u64,
    /// Maximum bytes of stdout accepted as algorithm output
    pub output_limit_bytes: usize,
    /// Address-space limit for the algorithm process
    pub memory_limit_bytes: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            output_limit_bytes: 8 * 1024 * 1024,
            memory_limit_bytes: Some(512 * 1024 * 1024),
        }
    }
}

impl ExecutionLimits {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Sibling container settings. The control socket must be bound from the host.
///
/// The peer's bind mount is resolved by the host daemon, not by this
/// process, so `workspace_root` must be a directory the host sees too. When
/// teebox itself runs in a container, mount the host directory at the same
/// path, or set `host_workspace_root` to where `workspace_root` lives on the
/// host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SiblingConfig {
    pub docker_binary: PathBuf,
    pub docker_socket: PathBuf,
    pub image: String,
    /// Host-side location of `workspace_root`; `None` means the same path
    pub host_workspace_root: Option<PathBuf>,
}

impl Default for SiblingConfig {
    fn default() -> Self {
        Self {
            docker_binary: PathBuf::from("docker"),
            docker_socket: PathBuf::from("/var/run/docker.sock"),
            image: "alpine:3.19".to_string(),
            host_workspace_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnclaveConfig {
    /// Device nodes probed in order; the first one present is used
    pub device_paths: Vec<PathBuf>,
    /// Loader that runs an unmodified binary inside the enclave
    pub loader: PathBuf,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            device_paths: vec![
                PathBuf::from("/dev/sgx_enclave"),
                PathBuf::from("/dev/sgx/enclave"),
                PathBuf::from("/dev/isgx"),
            ],
            loader: PathBuf::from("/usr/bin/gramine-sgx"),
        }
    }
}

/// Full teebox.json structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TeeConfig {
    pub backend: BackendType,
    /// Parent directory for run-scoped workspaces
    pub workspace_root: PathBuf,
    pub execution: ExecutionLimits,
    pub sibling: SiblingConfig,
    pub enclave: EnclaveConfig,
    pub storage: Option<StorageConfig>,
}

impl Default for TeeConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            workspace_root: std::env::temp_dir().join("teebox"),
            execution: ExecutionLimits::default(),
            sibling: SiblingConfig::default(),
            enclave: EnclaveConfig::default(),
            storage: None,
        }
    }
}

impl TeeConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            TeeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: TeeConfig = serde_json::from_str(&content)
            .map_err(|e| TeeError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        log::debug!(
            "Loaded config from {} (backend={})",
            path.display(),
            config.backend
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workspace_root.as_os_str().is_empty() {
            return Err(TeeError::Config("workspace_root must be non-empty".to_string()));
        }
        if self.execution.timeout_ms == 0 {
            return Err(TeeError::Config("execution.timeout_ms must be > 0".to_string()));
        }
        if self.execution.output_limit_bytes == 0 {
            return Err(TeeError::Config(
                "execution.output_limit_bytes must be > 0".to_string(),
            ));
        }
        if self.execution.memory_limit_bytes == Some(0) {
            return Err(TeeError::Config(
                "execution.memory_limit_bytes must be > 0 when set".to_string(),
            ));
        }
        if self.sibling.image.trim().is_empty() {
            return Err(TeeError::Config("sibling.image must be non-empty".to_string()));
        }
        if self.enclave.device_paths.is_empty() {
            return Err(TeeError::Config(
                "enclave.device_paths must list at least one device".to_string(),
            ));
        }
        Ok(())
    }

    /// Same config with a different backend selection
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }
}
