use crate::backend::adapter::ExecutionBackend;
use crate::backend::process::{into_output, run_bounded, ProcessLimits, ProcessOutput};
use crate::config::types::{BackendType, Result, TeeError};
use crate::config::{SiblingConfig, TeeConfig};
use crate::safety::workspace::Workspace;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

const CONTROL_TIMEOUT: Duration = Duration::from_secs(30);
const CONTROL_OUTPUT_LIMIT: usize = 64 * 1024;
const CONTAINER_MOUNT: &str = "/tee";

/// Sibling-container backend.
///
/// Runs the algorithm in a peer container on the host's container runtime,
/// reached through the control socket bound into this process' environment.
/// Payloads are staged in a host workspace that is bind-mounted read-only
/// into the peer at `/tee`. The mount source is resolved by the host daemon,
/// so the workspace must be shared with the host (see [`SiblingConfig`]).
#[derive(Debug)]
pub struct SiblingBackend {
    settings: SiblingConfig,
    workspace_root: PathBuf,
    timeout: Duration,
    output_limit: usize,
    memory_limit: Option<u64>,
    workspace: Option<Workspace>,
    container_name: Option<String>,
}

impl SiblingBackend {
    pub fn new(config: &TeeConfig) -> Self {
        Self {
            settings: config.sibling.clone(),
            workspace_root: config.workspace_root.clone(),
            timeout: config.execution.timeout(),
            output_limit: config.execution.output_limit_bytes,
            memory_limit: config.execution.memory_limit_bytes,
            workspace: None,
            container_name: None,
        }
    }

    pub fn container_name(&self) -> Option<&str> {
        self.container_name.as_deref()
    }

    fn docker(&self) -> Command {
        let mut command = Command::new(&self.settings.docker_binary);
        command.arg("-H").arg(format!(
            "unix://{}",
            self.settings.docker_socket.display()
        ));
        command
    }

    fn control(&self, args: &[&str]) -> Result<ProcessOutput> {
        let mut command = self.docker();
        command.args(args);
        run_bounded(
            command,
            &ProcessLimits {
                timeout: CONTROL_TIMEOUT,
                output_limit: CONTROL_OUTPUT_LIMIT,
                memory_limit: None,
            },
        )
    }

    /// Both roots must be absolute; the daemon resolves relative mount
    /// sources against its own working directory, not ours
    fn check_shared_root(&self) -> Result<()> {
        let roots = std::iter::once(&self.workspace_root)
            .chain(self.settings.host_workspace_root.as_ref());
        for root in roots {
            if !root.is_absolute() {
                return Err(TeeError::Config(format!(
                    "sibling workspace root {} must be an absolute path shared with the host",
                    root.display()
                )));
            }
        }
        Ok(())
    }

    fn probe_runtime(&self) -> Result<()> {
        if !self.settings.docker_socket.exists() {
            return Err(TeeError::BackendUnavailable(format!(
                "container control socket {} is not bound into this environment",
                self.settings.docker_socket.display()
            )));
        }

        let version = self
            .control(&["version", "--format", "{{.Server.Version}}"])
            .map_err(|e| TeeError::BackendUnavailable(format!("container runtime: {e}")))?;
        if !version.status.success() {
            return Err(TeeError::BackendUnavailable(format!(
                "container runtime unreachable: {}",
                version.stderr_text()
            )));
        }
        log::debug!(
            "Container runtime version {}",
            String::from_utf8_lossy(&version.stdout).trim()
        );

        let image = self
            .control(&["image", "inspect", "--format", "{{.Id}}", &self.settings.image])
            .map_err(|e| TeeError::BackendUnavailable(format!("image inspect: {e}")))?;
        if !image.status.success() {
            return Err(TeeError::BackendUnavailable(format!(
                "image {} not available: {}",
                self.settings.image,
                image.stderr_text()
            )));
        }
        Ok(())
    }

    fn remove_container(&self, name: &str) -> Result<()> {
        let run = self
            .control(&["rm", "--force", name])
            .map_err(|e| TeeError::TeardownError(format!("container removal: {e}")))?;
        if run.status.success() || run.stderr_text().contains("No such container") {
            return Ok(());
        }
        Err(TeeError::TeardownError(format!(
            "failed to remove container {}: {}",
            name,
            run.stderr_text()
        )))
    }
}

/// Host-side path of a run directory under `workspace_root`
pub fn host_path(
    workspace_root: &Path,
    host_workspace_root: Option<&Path>,
    run_dir: &Path,
) -> Result<PathBuf> {
    let Some(host_root) = host_workspace_root else {
        return Ok(run_dir.to_path_buf());
    };
    let relative = run_dir.strip_prefix(workspace_root).map_err(|_| {
        TeeError::Config(format!(
            "run directory {} is outside workspace root {}",
            run_dir.display(),
            workspace_root.display()
        ))
    })?;
    Ok(host_root.join(relative))
}

/// Arguments for `docker run` executing the staged algorithm
pub fn run_args(
    container_name: &str,
    image: &str,
    host_dir: &Path,
    data_files: usize,
    memory_limit: Option<u64>,
) -> Vec<String> {
    let mut args = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--name".to_string(),
        container_name.to_string(),
        "--network".to_string(),
        "none".to_string(),
        "--read-only".to_string(),
        "--cap-drop".to_string(),
        "ALL".to_string(),
        "--security-opt".to_string(),
        "no-new-privileges".to_string(),
    ];
    if let Some(bytes) = memory_limit {
        args.push("--memory".to_string());
        args.push(bytes.to_string());
    }
    args.extend([
        "--volume".to_string(),
        format!("{}:{}:ro", host_dir.display(), CONTAINER_MOUNT),
        "--workdir".to_string(),
        CONTAINER_MOUNT.to_string(),
        "--entrypoint".to_string(),
        format!("{CONTAINER_MOUNT}/algorithm"),
        image.to_string(),
    ]);
    args.extend((0..data_files).map(|idx| format!("{CONTAINER_MOUNT}/data/{idx:04}")));
    args
}

impl ExecutionBackend for SiblingBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::SiblingContainer
    }

    fn create(&mut self) -> Result<()> {
        if self.workspace.is_some() {
            return Ok(());
        }
        self.check_shared_root()?;
        self.probe_runtime()?;

        let workspace = Workspace::new(&self.workspace_root)?;
        let name = format!("teebox-{}", workspace.run_id());
        log::info!(
            "Provisioned sibling container {} on {} (image {})",
            name,
            self.settings.docker_socket.display(),
            self.settings.image
        );
        self.container_name = Some(name);
        self.workspace = Some(workspace);
        Ok(())
    }

    fn upload(&mut self, algorithm: &[u8], data: &[Vec<u8>]) -> Result<()> {
        match self.workspace.as_mut() {
            Some(workspace) => workspace.stage(algorithm, data),
            None => Err(TeeError::BackendUnavailable(
                "sibling backend not provisioned before upload".to_string(),
            )),
        }
    }

    fn execute(&mut self) -> Result<Vec<u8>> {
        let (workspace, name) = match (self.workspace.as_ref(), self.container_name.as_deref()) {
            (Some(w), Some(n)) => (w, n),
            _ => {
                return Err(TeeError::BackendUnavailable(
                    "sibling backend not provisioned before execute".to_string(),
                ))
            }
        };

        let host_dir = host_path(
            &self.workspace_root,
            self.settings.host_workspace_root.as_deref(),
            workspace.run_dir(),
        )?;
        let args = run_args(
            name,
            &self.settings.image,
            &host_dir,
            workspace.data_paths().len(),
            self.memory_limit,
        );
        let mut command = self.docker();
        command.args(&args);

        let limits = ProcessLimits {
            timeout: self.timeout,
            output_limit: self.output_limit,
            memory_limit: None,
        };
        match run_bounded(command, &limits) {
            Ok(run) => into_output(run, self.output_limit),
            Err(e) => {
                // The client is gone but the peer may still be running
                if let Err(rm_err) = self.remove_container(name) {
                    log::warn!("Failed to stop container {} after fault: {}", name, rm_err);
                }
                Err(e)
            }
        }
    }

    fn destroy(&mut self) -> Result<()> {
        if let Some(name) = self.container_name.clone() {
            self.remove_container(&name)?;
            self.container_name = None;
        }
        if let Some(workspace) = self.workspace.as_mut() {
            workspace.cleanup()?;
        }
        self.workspace = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_socket_is_unavailable() {
        let root = tempfile::tempdir().unwrap();
        let mut config = TeeConfig::default();
        config.workspace_root = root.path().to_path_buf();
        config.sibling.docker_socket = root.path().join("missing.sock");

        let mut backend = SiblingBackend::new(&config);
        let err = backend.create().unwrap_err();
        assert!(matches!(err, TeeError::BackendUnavailable(_)));
        assert!(backend.container_name().is_none());
        // Nothing was provisioned, so teardown is trivially fine
        backend.destroy().unwrap();
    }

    #[test]
    fn test_run_args_layout() {
        let args = run_args(
            "teebox-1",
            "alpine:3.19",
            Path::new("/tmp/ws"),
            2,
            Some(1024),
        );
        assert_eq!(&args[..4], &["run", "--rm", "--name", "teebox-1"]);
        assert!(args.windows(2).any(|w| w == ["--network", "none"]));
        assert!(args.windows(2).any(|w| w == ["--memory", "1024"]));
        assert!(args.contains(&"/tmp/ws:/tee:ro".to_string()));
        assert_eq!(
            &args[args.len() - 3..],
            &["alpine:3.19", "/tee/data/0000", "/tee/data/0001"]
        );
    }

    #[test]
    fn test_relative_workspace_root_rejected_before_runtime() {
        let root = tempfile::tempdir().unwrap();
        let mut config = TeeConfig::default();
        config.workspace_root = PathBuf::from("relative/ws");
        // A missing socket would be BackendUnavailable; the path check runs first
        config.sibling.docker_socket = root.path().join("missing.sock");

        let mut backend = SiblingBackend::new(&config);
        let err = backend.create().unwrap_err();
        assert!(matches!(err, TeeError::Config(_)));
        assert!(err.to_string().contains("shared with the host"));

        config.workspace_root = root.path().to_path_buf();
        config.sibling.host_workspace_root = Some(PathBuf::from("srv/teebox"));
        let err = SiblingBackend::new(&config).create().unwrap_err();
        assert!(matches!(err, TeeError::Config(_)));
    }

    #[test]
    fn test_host_path_mapping() {
        let local = Path::new("/var/lib/teebox");
        let run_dir = local.join("run-1");

        assert_eq!(host_path(local, None, &run_dir).unwrap(), run_dir);
        assert_eq!(
            host_path(local, Some(Path::new("/srv/teebox")), &run_dir).unwrap(),
            PathBuf::from("/srv/teebox/run-1")
        );
        assert!(host_path(local, Some(Path::new("/srv/teebox")), Path::new("/tmp/x")).is_err());

        let mount = format!(
            "{}:/tee:ro",
            host_path(local, Some(Path::new("/srv/teebox")), &run_dir)
                .unwrap()
                .display()
        );
        let args = run_args("teebox-1", "alpine:3.19", Path::new("/srv/teebox/run-1"), 0, None);
        assert!(args.contains(&mount));
    }
}
