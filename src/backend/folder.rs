use crate::backend::adapter::ExecutionBackend;
use crate::backend::process::{into_output, run_bounded, ProcessLimits};
use crate::config::types::{BackendType, Result, TeeError};
use crate::config::TeeConfig;
use crate::safety::workspace::Workspace;
use std::path::PathBuf;
use std::process::Command;

/// Folder backend: the algorithm runs as a local subprocess confined to a
/// run-scoped workspace directory.
///
/// The algorithm file is executed directly (native binary or script with a
/// shebang) and receives the data file paths as arguments in upload order.
/// The environment is cleared and the working directory is the workspace.
#[derive(Debug)]
pub struct FolderBackend {
    workspace_root: PathBuf,
    limits: ProcessLimits,
    workspace: Option<Workspace>,
}

impl FolderBackend {
    pub fn new(config: &TeeConfig) -> Self {
        Self {
            workspace_root: config.workspace_root.clone(),
            limits: ProcessLimits {
                timeout: config.execution.timeout(),
                output_limit: config.execution.output_limit_bytes,
                memory_limit: config.execution.memory_limit_bytes,
            },
            workspace: None,
        }
    }

    /// Workspace directory, while the backend is provisioned
    pub fn workspace(&self) -> Option<&Workspace> {
        self.workspace.as_ref()
    }

    fn workspace_mut(&mut self, step: &str) -> Result<&mut Workspace> {
        self.workspace.as_mut().ok_or_else(|| {
            TeeError::BackendUnavailable(format!("folder backend not provisioned before {step}"))
        })
    }
}

impl ExecutionBackend for FolderBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::DockerFolder
    }

    fn create(&mut self) -> Result<()> {
        if self.workspace.is_some() {
            return Ok(());
        }
        let workspace = Workspace::new(&self.workspace_root)?;
        log::info!("Provisioned folder sandbox {}", workspace.run_dir().display());
        self.workspace = Some(workspace);
        Ok(())
    }

    fn upload(&mut self, algorithm: &[u8], data: &[Vec<u8>]) -> Result<()> {
        self.workspace_mut("upload")?.stage(algorithm, data)
    }

    fn execute(&mut self) -> Result<Vec<u8>> {
        let limits = self.limits.clone();
        let workspace = self.workspace_mut("execute")?;

        let mut command = Command::new(workspace.algorithm_path());
        command
            .args(workspace.data_paths())
            .current_dir(workspace.run_dir())
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("TEE_WORKSPACE", workspace.run_dir());

        let run = run_bounded(command, &limits)?;
        into_output(run, limits.output_limit)
    }

    fn destroy(&mut self) -> Result<()> {
        if let Some(workspace) = self.workspace.as_mut() {
            workspace.cleanup()?;
        }
        self.workspace = None;
        Ok(())
    }
}
