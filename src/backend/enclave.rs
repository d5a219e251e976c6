use crate::backend::adapter::ExecutionBackend;
use crate::backend::process::{into_output, run_bounded, ProcessLimits};
use crate::config::types::{BackendType, Result, TeeError};
use crate::config::{EnclaveConfig, TeeConfig};
use crate::integrity::compute_hash;
use crate::safety::workspace::Workspace;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

const MANIFEST_FILE: &str = "manifest.json";
const NONCE_LEN: usize = 12;

/// Per-context sealing key. Staged payloads are `nonce || ciphertext`.
struct Sealer {
    key: Key,
}

impl Sealer {
    fn generate() -> Self {
        Self {
            key: ChaCha20Poly1305::generate_key(&mut OsRng),
        }
    }

    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let cipher = ChaCha20Poly1305::new(&self.key);
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| TeeError::TransferError("sealing payload failed".to_string()))?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn unseal(&self, path: &Path) -> Result<Vec<u8>> {
        let sealed = std::fs::read(path).map_err(|e| {
            TeeError::ExecutionFault(format!("reading sealed {}: {e}", path.display()))
        })?;
        if sealed.len() < NONCE_LEN {
            return Err(TeeError::ExecutionFault(format!(
                "sealed payload {} is truncated",
                path.display()
            )));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        ChaCha20Poly1305::new(&self.key)
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| {
                TeeError::ExecutionFault(format!(
                    "sealed payload {} failed authentication",
                    path.display()
                ))
            })
    }
}

impl fmt::Debug for Sealer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sealer(<redacted>)")
    }
}

/// Plaintext digests of the payloads staged into the enclave
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnclaveManifest {
    pub algorithm_measurement: String,
    pub data_digests: Vec<String>,
}

/// Report bound to one successful enclave execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnclaveReport {
    pub device: PathBuf,
    pub manifest: EnclaveManifest,
    pub output_digest: String,
    pub executed_at: DateTime<Utc>,
}

/// Hardware-enclave backend.
///
/// Requires an SGX device node and an enclave loader able to run an
/// unmodified binary inside the enclave. Upload seals every payload with
/// ChaCha20-Poly1305 under a key generated at create and held only in memory,
/// and writes a measurement manifest of the plaintext digests. Execute
/// unseals into a scratch directory that lives only for the loader run,
/// checks each payload against the manifest, and yields an [`EnclaveReport`].
#[derive(Debug)]
pub struct EnclaveBackend {
    settings: EnclaveConfig,
    workspace_root: PathBuf,
    limits: ProcessLimits,
    device: Option<PathBuf>,
    sealer: Option<Sealer>,
    workspace: Option<Workspace>,
    manifest: Option<EnclaveManifest>,
    last_report: Option<EnclaveReport>,
}

impl EnclaveBackend {
    pub fn new(config: &TeeConfig) -> Self {
        Self {
            settings: config.enclave.clone(),
            workspace_root: config.workspace_root.clone(),
            limits: ProcessLimits {
                timeout: config.execution.timeout(),
                output_limit: config.execution.output_limit_bytes,
                // Enclave loaders reserve the whole enclave range up front
                memory_limit: None,
            },
            device: None,
            sealer: None,
            workspace: None,
            manifest: None,
            last_report: None,
        }
    }

    /// Report of the most recent successful execution
    pub fn last_report(&self) -> Option<&EnclaveReport> {
        self.last_report.as_ref()
    }

    pub fn manifest(&self) -> Option<&EnclaveManifest> {
        self.manifest.as_ref()
    }

    /// Directory holding the sealed payloads and `manifest.json`
    pub fn staging_dir(&self) -> Option<&Path> {
        self.workspace.as_ref().map(|w| w.run_dir())
    }

    /// Unseal the staged payloads into a scratch workspace, checking each
    /// against its measurement
    fn unseal_staged(
        workspace: &Workspace,
        sealer: &Sealer,
        manifest: &EnclaveManifest,
    ) -> Result<Workspace> {
        let algorithm = sealer.unseal(&workspace.algorithm_path())?;
        check_measurement("algorithm", &algorithm, &manifest.algorithm_measurement)?;

        if workspace.data_paths().len() != manifest.data_digests.len() {
            return Err(TeeError::ExecutionFault(
                "staged data does not match the manifest".to_string(),
            ));
        }
        let mut data = Vec::with_capacity(manifest.data_digests.len());
        for (idx, (path, digest)) in workspace
            .data_paths()
            .iter()
            .zip(&manifest.data_digests)
            .enumerate()
        {
            let bytes = sealer.unseal(path)?;
            check_measurement(&format!("data[{idx}]"), &bytes, digest)?;
            data.push(bytes);
        }

        let mut scratch = Workspace::new(workspace.run_dir())?;
        scratch.stage(&algorithm, &data)?;
        Ok(scratch)
    }

    fn find_device(&self) -> Option<PathBuf> {
        self.settings
            .device_paths
            .iter()
            .find(|path| path.exists())
            .cloned()
    }
}

impl ExecutionBackend for EnclaveBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::HardwareEnclave
    }

    fn create(&mut self) -> Result<()> {
        if self.workspace.is_some() {
            return Ok(());
        }

        let device = self.find_device().ok_or_else(|| {
            TeeError::BackendUnavailable(format!(
                "no enclave device found (probed {:?})",
                self.settings.device_paths
            ))
        })?;
        if !self.settings.loader.is_file() {
            return Err(TeeError::BackendUnavailable(format!(
                "enclave loader {} not installed",
                self.settings.loader.display()
            )));
        }

        let workspace = Workspace::new(&self.workspace_root)?;
        log::info!(
            "Provisioned enclave context on {} (staging {})",
            device.display(),
            workspace.run_dir().display()
        );
        self.device = Some(device);
        self.sealer = Some(Sealer::generate());
        self.workspace = Some(workspace);
        Ok(())
    }

    fn upload(&mut self, algorithm: &[u8], data: &[Vec<u8>]) -> Result<()> {
        let (workspace, sealer) = match (self.workspace.as_mut(), self.sealer.as_ref()) {
            (Some(w), Some(s)) => (w, s),
            _ => {
                return Err(TeeError::BackendUnavailable(
                    "enclave not provisioned before upload".to_string(),
                ))
            }
        };

        self.manifest = None;
        self.last_report = None;
        let sealed_algorithm = sealer.seal(algorithm)?;
        let sealed_data = data
            .iter()
            .map(|d| sealer.seal(d))
            .collect::<Result<Vec<_>>>()?;
        workspace.stage(&sealed_algorithm, &sealed_data)?;

        let manifest = EnclaveManifest {
            algorithm_measurement: compute_hash(algorithm),
            data_digests: data.iter().map(|d| compute_hash(d)).collect(),
        };
        let encoded = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| TeeError::TransferError(format!("manifest encoding: {e}")))?;
        workspace.write_aux(MANIFEST_FILE, &encoded)?;
        self.manifest = Some(manifest);
        Ok(())
    }

    fn execute(&mut self) -> Result<Vec<u8>> {
        let (workspace, device, sealer, manifest) = match (
            self.workspace.as_ref(),
            self.device.as_ref(),
            self.sealer.as_ref(),
            self.manifest.as_ref(),
        ) {
            (Some(w), Some(d), Some(s), Some(m)) => (w, d, s, m),
            _ => {
                return Err(TeeError::ExecutionFault(
                    "enclave has no staged payloads".to_string(),
                ))
            }
        };

        let mut scratch = Self::unseal_staged(workspace, sealer, manifest)?;
        let mut command = Command::new(&self.settings.loader);
        command
            .arg(scratch.algorithm_path())
            .args(scratch.data_paths())
            .current_dir(scratch.run_dir())
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("TEE_MANIFEST", workspace.run_dir().join(MANIFEST_FILE))
            .env("TEE_DEVICE", device);

        let run = run_bounded(command, &self.limits);
        if let Err(e) = scratch.cleanup() {
            log::warn!("Failed to remove unsealed payloads: {}", e);
        }
        let output = into_output(run?, self.limits.output_limit)?;

        let report = EnclaveReport {
            device: device.clone(),
            manifest: manifest.clone(),
            output_digest: compute_hash(&output),
            executed_at: Utc::now(),
        };
        log::info!(
            "Enclave execution finished, measurement {} output {}",
            report.manifest.algorithm_measurement,
            report.output_digest
        );
        self.last_report = Some(report);
        Ok(output)
    }

    fn destroy(&mut self) -> Result<()> {
        if let Some(workspace) = self.workspace.as_mut() {
            workspace.cleanup()?;
        }
        self.workspace = None;
        self.manifest = None;
        self.sealer = None;
        self.device = None;
        Ok(())
    }
}

fn check_measurement(name: &str, bytes: &[u8], expected: &str) -> Result<()> {
    if compute_hash(bytes) == expected {
        Ok(())
    } else {
        Err(TeeError::ExecutionFault(format!(
            "unsealed {name} does not match its measurement"
        )))
    }
}
