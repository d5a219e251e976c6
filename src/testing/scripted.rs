/// In-process backend for exercising the lifecycle controller
///
/// Execution is a Rust closure over the uploaded bytes, and each step can be
/// made to fail on demand. Nothing leaves the process, so controller tests
/// run without a container runtime or enclave hardware.
use crate::backend::ExecutionBackend;
use crate::config::types::{BackendType, Operation, Result, TeeError};
use std::sync::{Arc, Mutex};

pub type ScriptFn = Box<dyn Fn(&[u8], &[Vec<u8>]) -> std::result::Result<Vec<u8>, String> + Send>;

/// Shared record of the backend calls made so far
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Operation>>>);

impl CallLog {
    fn push(&self, op: Operation) {
        if let Ok(mut calls) = self.0.lock() {
            calls.push(op);
        }
    }

    pub fn snapshot(&self) -> Vec<Operation> {
        self.0.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn count(&self, op: Operation) -> usize {
        self.snapshot().iter().filter(|c| **c == op).count()
    }
}

/// Algorithms understood by [`ScriptedBackend::builtin`], keyed by the
/// algorithm bytes:
/// - `sum.bin`: sum of all comma or whitespace separated integers in the data
/// - `concat.bin`: the data payloads concatenated in order
pub fn builtin_algorithm(algorithm: &[u8], data: &[Vec<u8>]) -> std::result::Result<Vec<u8>, String> {
    match algorithm {
        b"sum.bin" => {
            let mut total: i64 = 0;
            for (idx, payload) in data.iter().enumerate() {
                let text = std::str::from_utf8(payload)
                    .map_err(|e| format!("data[{idx}] is not UTF-8: {e}"))?;
                for token in text
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|t| !t.is_empty())
                {
                    let value: i64 = token
                        .parse()
                        .map_err(|e| format!("data[{idx}]: bad integer {token:?}: {e}"))?;
                    total = total
                        .checked_add(value)
                        .ok_or_else(|| "sum overflowed".to_string())?;
                }
            }
            Ok(total.to_string().into_bytes())
        }
        b"concat.bin" => Ok(data.concat()),
        other => Err(format!(
            "unknown algorithm {:?}",
            String::from_utf8_lossy(other)
        )),
    }
}

pub struct ScriptedBackend {
    backend_type: BackendType,
    script: ScriptFn,
    create_fault: Option<String>,
    upload_fault: Option<String>,
    execute_fault: Option<String>,
    destroy_failures: usize,
    provisioned: bool,
    loaded: Option<(Vec<u8>, Vec<Vec<u8>>)>,
    calls: CallLog,
}

impl ScriptedBackend {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(&[u8], &[Vec<u8>]) -> std::result::Result<Vec<u8>, String> + Send + 'static,
    {
        Self {
            backend_type: BackendType::DockerFolder,
            script: Box::new(script),
            create_fault: None,
            upload_fault: None,
            execute_fault: None,
            destroy_failures: 0,
            provisioned: false,
            loaded: None,
            calls: CallLog::default(),
        }
    }

    /// Runs [`builtin_algorithm`]
    pub fn builtin() -> Self {
        Self::new(builtin_algorithm)
    }

    /// Returns the data payloads concatenated, whatever the algorithm
    pub fn echo() -> Self {
        Self::new(|_, data| Ok(data.concat()))
    }

    /// Report a different backend type than the default `DockerFolder`
    pub fn as_type(mut self, backend_type: BackendType) -> Self {
        self.backend_type = backend_type;
        self
    }

    pub fn fail_create(mut self, cause: &str) -> Self {
        self.create_fault = Some(cause.to_string());
        self
    }

    pub fn fail_upload(mut self, cause: &str) -> Self {
        self.upload_fault = Some(cause.to_string());
        self
    }

    pub fn fail_execute(mut self, cause: &str) -> Self {
        self.execute_fault = Some(cause.to_string());
        self
    }

    /// Fail the next `times` destroy calls, then succeed
    pub fn fail_destroy(mut self, times: usize) -> Self {
        self.destroy_failures = times;
        self
    }

    /// Handle that stays valid after the backend moves into a session
    pub fn calls(&self) -> CallLog {
        self.calls.clone()
    }
}

impl ExecutionBackend for ScriptedBackend {
    fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    fn create(&mut self) -> Result<()> {
        self.calls.push(Operation::Create);
        if let Some(cause) = &self.create_fault {
            return Err(TeeError::BackendUnavailable(cause.clone()));
        }
        self.provisioned = true;
        Ok(())
    }

    fn upload(&mut self, algorithm: &[u8], data: &[Vec<u8>]) -> Result<()> {
        self.calls.push(Operation::Upload);
        self.loaded = None;
        if let Some(cause) = &self.upload_fault {
            return Err(TeeError::TransferError(cause.clone()));
        }
        if !self.provisioned {
            return Err(TeeError::TransferError("backend not provisioned".to_string()));
        }
        self.loaded = Some((algorithm.to_vec(), data.to_vec()));
        Ok(())
    }

    fn execute(&mut self) -> Result<Vec<u8>> {
        self.calls.push(Operation::Execute);
        if let Some(cause) = &self.execute_fault {
            return Err(TeeError::ExecutionFault(cause.clone()));
        }
        let (algorithm, data) = self
            .loaded
            .as_ref()
            .ok_or_else(|| TeeError::ExecutionFault("nothing uploaded".to_string()))?;
        (self.script)(algorithm.as_slice(), data.as_slice()).map_err(TeeError::ExecutionFault)
    }

    fn destroy(&mut self) -> Result<()> {
        self.calls.push(Operation::Destroy);
        if self.destroy_failures > 0 {
            self.destroy_failures -= 1;
            return Err(TeeError::TeardownError(
                "scripted process refused to die".to_string(),
            ));
        }
        self.loaded = None;
        self.provisioned = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_sum() {
        assert_eq!(builtin_algorithm(b"sum.bin", &[b"1,2,3".to_vec()]).unwrap(), b"6");
        assert_eq!(
            builtin_algorithm(b"sum.bin", &[b"10, -4".to_vec(), b"1 1".to_vec()]).unwrap(),
            b"8"
        );
        assert!(builtin_algorithm(b"sum.bin", &[b"1,x".to_vec()]).is_err());
        assert!(builtin_algorithm(b"rm -rf", &[b"1".to_vec()]).is_err());
    }

    #[test]
    fn test_faults_and_call_log() {
        let mut backend = ScriptedBackend::echo().fail_destroy(1);
        let calls = backend.calls();
        backend.create().unwrap();
        backend.upload(b"a", &[b"b".to_vec()]).unwrap();
        assert_eq!(backend.execute().unwrap(), b"b");
        assert!(backend.destroy().is_err());
        backend.destroy().unwrap();
        assert_eq!(calls.count(Operation::Destroy), 2);
        assert_eq!(calls.snapshot()[0], Operation::Create);
    }
}
