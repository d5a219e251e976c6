/// Bounded subprocess execution shared by the process-based backends
///
/// The payload runs in its own process group with rlimits applied before
/// exec. Stdout is collected up to a byte limit, stderr is kept as a short
/// diagnostic tail, and the whole group is SIGKILLed once the wall-clock
/// budget runs out or the leader exits. Output not delivered by the
/// deadline fails the run.
use crate::config::types::{Result, TeeError};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const STDERR_TAIL_LIMIT: usize = 64 * 1024;
const POLL_INTERVAL: Duration = Duration::from_millis(10);
const DRAIN_GRACE: Duration = Duration::from_millis(100);

/// Limits applied to one subprocess run
#[derive(Debug, Clone)]
pub struct ProcessLimits {
    pub timeout: Duration,
    pub output_limit: usize,
    /// RLIMIT_AS for the child; leave unset for runtimes that reserve large mappings
    pub memory_limit: Option<u64>,
}

/// Captured result of a finished subprocess
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub elapsed: Duration,
}

impl ProcessOutput {
    /// Stderr as trimmed lossy text for diagnostics
    pub fn stderr_text(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

fn set_rlimit(resource: libc::__rlimit_resource_t, value: u64) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value as libc::rlim_t,
        rlim_max: value as libc::rlim_t,
    };
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

fn collect_stream<R: Read>(mut reader: R, limit: usize) -> (Vec<u8>, bool) {
    let mut collected = Vec::new();
    let mut truncated = false;
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let room = limit.saturating_sub(collected.len());
                if n > room {
                    collected.extend_from_slice(&chunk[..room]);
                    truncated = true;
                } else {
                    collected.extend_from_slice(&chunk[..n]);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Output stream read failed: {}", e);
                break;
            }
        }
    }

    (collected, truncated)
}

/// Keep only the last `limit` bytes of the stream
fn collect_tail<R: Read>(mut reader: R, limit: usize) -> Vec<u8> {
    let mut tail = Vec::new();
    let mut chunk = [0u8; 8192];

    loop {
        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > limit {
                    let excess = tail.len() - limit;
                    tail.drain(..excess);
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                log::warn!("Output stream read failed: {}", e);
                break;
            }
        }
    }

    tail
}

fn kill_group(pgid: i32) {
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => log::warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

type Collected = (Vec<u8>, bool);

fn spawn_collector<R, F>(reader: Option<R>, collect: F) -> Option<Receiver<Collected>>
where
    R: Read + Send + 'static,
    F: FnOnce(R) -> Collected + Send + 'static,
{
    reader.map(|reader| {
        let (tx, rx) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            let _ = tx.send(collect(reader));
        });
        rx
    })
}

/// `None` when the stream is still open at `deadline`
fn receive_collected(rx: Option<Receiver<Collected>>, deadline: Instant) -> Option<Collected> {
    let rx = match rx {
        Some(rx) => rx,
        None => return Some((Vec::new(), false)),
    };
    match rx.recv_deadline(deadline) {
        Ok(collected) => Some(collected),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => {
            log::error!("Output collector thread panicked");
            Some((Vec::new(), false))
        }
    }
}

/// Spawn `command` and wait for it within `limits`.
///
/// The deadline bounds the whole run, including output collection: a
/// descendant that leaves the process group and keeps a pipe open past the
/// deadline fails the run instead of stalling it. Spawn failures, timeouts
/// and collector failures surface as `ExecutionFault`; the exit status is
/// returned for the caller to judge.
pub fn run_bounded(mut command: Command, limits: &ProcessLimits) -> Result<ProcessOutput> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let memory_limit = limits.memory_limit;
    unsafe {
        command.pre_exec(move || {
            set_rlimit(libc::RLIMIT_CORE, 0)?;
            if let Some(bytes) = memory_limit {
                set_rlimit(libc::RLIMIT_AS, bytes)?;
            }
            Ok(())
        });
    }

    let start = Instant::now();
    let deadline = start + limits.timeout;
    let mut child = spawn_retrying_busy(&mut command)
        .map_err(|e| TeeError::ExecutionFault(format!("Failed to spawn {:?}: {}", command, e)))?;
    let pgid = child.id() as i32;
    log::debug!("Spawned process group {} for {:?}", pgid, command.get_program());

    let output_limit = limits.output_limit;
    let stdout_rx = spawn_collector(child.stdout.take(), move |out| {
        collect_stream(out, output_limit)
    });
    let stderr_rx = spawn_collector(child.stderr.take(), |err| {
        (collect_tail(err, STDERR_TAIL_LIMIT), false)
    });

    // WNOWAIT leaves the leader unreaped, so its pid and the group id stay
    // reserved until the group has been killed.
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    let exited = loop {
        match waitid(Id::Pid(Pid::from_raw(pgid)), flags) {
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline {
                    break false;
                }
                thread::sleep(POLL_INTERVAL);
            }
            Ok(_) => break true,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                kill_group(pgid);
                let _ = child.wait();
                return Err(TeeError::ExecutionFault(format!(
                    "Failed to wait for process: {}",
                    e
                )));
            }
        }
    };

    kill_group(pgid);
    let status = child
        .wait()
        .map_err(|e| TeeError::ExecutionFault(format!("Failed to reap process: {}", e)))?;

    if !exited {
        log::warn!(
            "Process group {} exceeded {:?}; sent SIGKILL",
            pgid,
            limits.timeout
        );
        return Err(TeeError::ExecutionFault(format!(
            "timed out after {:?}",
            limits.timeout
        )));
    }

    let drain_by = deadline.max(Instant::now() + DRAIN_GRACE);
    let (stdout, stdout_truncated) = receive_collected(stdout_rx, drain_by).ok_or_else(|| {
        TeeError::ExecutionFault(format!(
            "timed out after {:?}: output held open by a detached descendant",
            limits.timeout
        ))
    })?;
    let (stderr, _) = receive_collected(stderr_rx, drain_by).unwrap_or_default();

    Ok(ProcessOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        elapsed: start.elapsed(),
    })
}

// A freshly written executable can report ETXTBSY while a concurrent fork
// still holds the write descriptor.
fn spawn_retrying_busy(command: &mut Command) -> std::io::Result<std::process::Child> {
    let mut attempts = 0;
    loop {
        match command.spawn() {
            Err(e) if e.raw_os_error() == Some(libc::ETXTBSY) && attempts < 5 => {
                attempts += 1;
                thread::sleep(Duration::from_millis(20));
            }
            other => return other,
        }
    }
}

/// Turn a finished run into algorithm output, enforcing success and the output bound
pub fn into_output(run: ProcessOutput, output_limit: usize) -> Result<Vec<u8>> {
    if !run.status.success() {
        let cause = match (run.status.code(), run.status.signal()) {
            (Some(code), _) => format!("exited with status {code}"),
            (None, Some(sig)) => format!("killed by signal {sig}"),
            (None, None) => "terminated abnormally".to_string(),
        };
        let stderr = run.stderr_text();
        return Err(TeeError::ExecutionFault(if stderr.is_empty() {
            cause
        } else {
            format!("{cause}: {stderr}")
        }));
    }

    if run.stdout_truncated {
        return Err(TeeError::ExecutionFault(format!(
            "output exceeded {output_limit} bytes"
        )));
    }

    log::debug!(
        "Process finished in {:?} with {} bytes of output",
        run.elapsed,
        run.stdout.len()
    );
    Ok(run.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits() -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_secs(10),
            output_limit: 1024,
            memory_limit: None,
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn test_collects_stdout() {
        let run = run_bounded(sh("printf hello"), &limits()).unwrap();
        assert!(run.status.success());
        assert_eq!(into_output(run, 1024).unwrap(), b"hello");
    }

    #[test]
    fn test_nonzero_exit_is_fault_with_stderr() {
        let run = run_bounded(sh("echo boom >&2; exit 3"), &limits()).unwrap();
        let err = into_output(run, 1024).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("status 3"), "{msg}");
        assert!(msg.contains("boom"), "{msg}");
    }

    #[test]
    fn test_timeout_kills_group() {
        let limits = ProcessLimits {
            timeout: Duration::from_millis(200),
            ..limits()
        };
        let start = Instant::now();
        let err = run_bounded(sh("sleep 30 & sleep 30"), &limits).unwrap_err();
        assert!(matches!(err, TeeError::ExecutionFault(_)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_timeout_with_detached_descendant() {
        let limits = ProcessLimits {
            timeout: Duration::from_millis(300),
            ..limits()
        };
        let start = Instant::now();
        let err = run_bounded(sh("setsid sleep 6 & sleep 30"), &limits).unwrap_err();
        assert!(matches!(err, TeeError::ExecutionFault(_)));
        assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
    }

    #[test]
    fn test_detached_descendant_holding_output_after_exit() {
        let limits = ProcessLimits {
            timeout: Duration::from_millis(300),
            ..limits()
        };
        let start = Instant::now();
        let err = run_bounded(sh("setsid sleep 6 & printf done"), &limits).unwrap_err();
        match err {
            TeeError::ExecutionFault(cause) => assert!(cause.contains("detached"), "{cause}"),
            other => panic!("expected ExecutionFault, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(3), "{:?}", start.elapsed());
    }

    #[test]
    fn test_group_members_killed_after_leader_exits() {
        let start = Instant::now();
        let run = run_bounded(sh("sleep 30 & printf done"), &limits()).unwrap();
        assert_eq!(into_output(run, 1024).unwrap(), b"done");
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_output_limit() {
        let limits = ProcessLimits {
            output_limit: 4,
            ..limits()
        };
        let run = run_bounded(sh("printf 0123456789"), &limits).unwrap();
        assert!(run.stdout_truncated);
        assert_eq!(run.stdout, b"0123");
        assert!(into_output(run, 4).is_err());
    }

    #[test]
    fn test_stderr_keeps_tail() {
        let tail = collect_tail(std::io::Cursor::new(b"first line\nlast line".to_vec()), 9);
        assert_eq!(tail, b"last line");
    }

    #[test]
    fn test_spawn_failure() {
        let err = run_bounded(Command::new("/nonexistent/teebox-bin"), &limits()).unwrap_err();
        assert!(matches!(err, TeeError::ExecutionFault(_)));
    }
}
