use crate::backend::{adapter_for, ExecutionBackend};
use crate::config::types::{BackendType, ErrorKind, Operation, Result, SessionState, TeeError};
use crate::config::TeeConfig;
use crate::integrity::verify_payloads;
use crate::observability::audit::{AuditTrail, LifecycleEventType};
use std::fmt;
use uuid::Uuid;

/// Session lifecycle controller
///
/// Drives one backend through `create → upload → verify → execute →
/// destroy`. Every method takes `&mut self`, so a session has exactly one
/// driver and no call can overlap another. Operations attempted from the
/// wrong state fail with [`TeeError::InvalidState`] and change nothing.
///
/// Only `verify` can move a session into `Verified`, and only `Verified`
/// admits `execute`. Uploading again always discards the previous
/// verification.
pub struct Session {
    id: Uuid,
    backend_type: BackendType,
    state: SessionState,
    backend: Option<Box<dyn ExecutionBackend>>,
    algorithm: Vec<u8>,
    data: Vec<Vec<u8>>,
    teardown_pending: bool,
    audit: AuditTrail,
}

impl Session {
    /// New session on the backend selected by `config.backend`
    pub fn from_config(config: &TeeConfig) -> Self {
        Self::new(config.backend, config)
    }

    /// New session on `backend_type`; nothing is provisioned until `create`
    pub fn new(backend_type: BackendType, config: &TeeConfig) -> Self {
        Self::with_backend(adapter_for(backend_type, config))
    }

    /// New session on a caller-supplied backend implementation
    pub fn with_backend(backend: Box<dyn ExecutionBackend>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            backend_type: backend.backend_type(),
            state: SessionState::Uninitialized,
            backend: Some(backend),
            algorithm: Vec::new(),
            data: Vec::new(),
            teardown_pending: false,
            audit: AuditTrail::new(id),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn backend_type(&self) -> BackendType {
        self.backend_type
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Uploaded algorithm bytes (empty unless loaded)
    pub fn algorithm(&self) -> &[u8] {
        &self.algorithm
    }

    /// Uploaded data payloads in upload order
    pub fn data(&self) -> &[Vec<u8>] {
        &self.data
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    /// A previous destroy failed to release the backend; calling destroy again retries it
    pub fn teardown_pending(&self) -> bool {
        self.teardown_pending
    }

    fn require(&mut self, operation: Operation, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        self.audit.record(
            LifecycleEventType::PreconditionViolation,
            operation,
            self.state,
            self.state,
            format!("{operation} is not valid from {}", self.state),
        );
        Err(TeeError::InvalidState {
            operation,
            state: self.state,
        })
    }

    fn backend_mut(&mut self, operation: Operation) -> Result<&mut Box<dyn ExecutionBackend>> {
        let state = self.state;
        self.backend
            .as_mut()
            .ok_or(TeeError::InvalidState { operation, state })
    }

    fn transition(
        &mut self,
        event: LifecycleEventType,
        operation: Operation,
        to: SessionState,
        details: impl Into<String>,
    ) {
        let from = self.state;
        self.state = to;
        self.audit.record(event, operation, from, to, details);
        if from != to {
            log::info!("Session {}: {} -> {}", self.id, from, to);
        }
    }

    fn discard_payloads(&mut self) {
        self.algorithm = Vec::new();
        self.data = Vec::new();
    }

    /// Provision the isolated execution context
    pub fn create(&mut self) -> Result<()> {
        self.require(Operation::Create, &[SessionState::Uninitialized])?;

        let outcome = self.backend_mut(Operation::Create)?.create();
        match outcome {
            Ok(()) => {
                let details = format!("provisioned {}", self.backend_type);
                self.transition(
                    LifecycleEventType::Created,
                    Operation::Create,
                    SessionState::Created,
                    details,
                );
                Ok(())
            }
            Err(e) => {
                log::error!("Session {}: provisioning failed: {}", self.id, e);
                self.transition(
                    LifecycleEventType::ProvisionFailed,
                    Operation::Create,
                    SessionState::Failed,
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    /// Load the algorithm and its ordered data payloads into the backend.
    ///
    /// Any previous verification is discarded, whether or not the transfer
    /// succeeds.
    pub fn upload(&mut self, algorithm: Vec<u8>, data: Vec<Vec<u8>>) -> Result<()> {
        self.require(
            Operation::Upload,
            &[
                SessionState::Created,
                SessionState::Loaded,
                SessionState::Verified,
                SessionState::Executed,
            ],
        )?;

        let invalid = if algorithm.is_empty() {
            Some("algorithm must be non-empty")
        } else if data.is_empty() {
            Some("data list must contain at least one payload")
        } else {
            None
        };
        if let Some(reason) = invalid {
            self.audit.record(
                LifecycleEventType::UploadRejected,
                Operation::Upload,
                self.state,
                self.state,
                reason,
            );
            return Err(TeeError::InvalidInput(reason.to_string()));
        }

        // Trust in earlier payloads ends here
        self.discard_payloads();

        let outcome = self.backend_mut(Operation::Upload)?.upload(&algorithm, &data);
        match outcome {
            Ok(()) => {
                let details = format!(
                    "algorithm {} bytes, {} data payloads",
                    algorithm.len(),
                    data.len()
                );
                self.algorithm = algorithm;
                self.data = data;
                self.transition(
                    LifecycleEventType::Uploaded,
                    Operation::Upload,
                    SessionState::Loaded,
                    details,
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("Session {}: upload failed: {}", self.id, e);
                self.transition(
                    LifecycleEventType::TransferFailed,
                    Operation::Upload,
                    SessionState::Created,
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    /// Check the uploaded payloads against caller-supplied digests.
    ///
    /// `data_hashes[i]` must be the digest of the i-th uploaded payload. Any
    /// mismatch fails the whole check and the session stays `Loaded`.
    pub fn verify<S: AsRef<str>>(&mut self, algorithm_hash: &str, data_hashes: &[S]) -> Result<()> {
        self.require(Operation::Verify, &[SessionState::Loaded])?;

        let outcome = verify_payloads(&self.algorithm, &self.data, algorithm_hash, data_hashes);
        match outcome {
            Ok(()) => {
                let details = format!("{} payloads matched", self.data.len() + 1);
                self.transition(
                    LifecycleEventType::Verified,
                    Operation::Verify,
                    SessionState::Verified,
                    details,
                );
                Ok(())
            }
            Err(e) => {
                let event = if e.kind() == ErrorKind::IntegrityViolation {
                    LifecycleEventType::IntegrityViolation
                } else {
                    LifecycleEventType::VerificationRejected
                };
                self.audit.record(
                    event,
                    Operation::Verify,
                    self.state,
                    self.state,
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    /// Run the verified algorithm and return its output.
    ///
    /// Running again requires a fresh upload and verify.
    pub fn execute(&mut self) -> Result<Vec<u8>> {
        self.require(Operation::Execute, &[SessionState::Verified])?;

        let outcome = self.backend_mut(Operation::Execute)?.execute();
        match outcome {
            Ok(output) => {
                let details = format!("{} bytes of output", output.len());
                self.transition(
                    LifecycleEventType::Executed,
                    Operation::Execute,
                    SessionState::Executed,
                    details,
                );
                Ok(output)
            }
            Err(e) => {
                log::error!("Session {}: execution failed: {}", self.id, e);
                self.transition(
                    LifecycleEventType::ExecutionFault,
                    Operation::Execute,
                    SessionState::Failed,
                    e.to_string(),
                );
                Err(e)
            }
        }
    }

    /// Release the backend and every held payload.
    ///
    /// Safe to call repeatedly: once destroyed, further calls return `Ok`.
    /// If the backend cannot be released the session is still destroyed,
    /// but the backend is kept so the next call retries the release.
    pub fn destroy(&mut self) -> Result<()> {
        if self.state == SessionState::Destroyed && !self.teardown_pending {
            log::debug!("Session {}: already destroyed", self.id);
            return Ok(());
        }
        self.require(
            Operation::Destroy,
            &[
                SessionState::Created,
                SessionState::Loaded,
                SessionState::Verified,
                SessionState::Executed,
                SessionState::Failed,
                SessionState::Destroyed,
            ],
        )?;

        self.discard_payloads();

        let released = match self.backend.as_mut() {
            Some(backend) => backend.destroy(),
            None => Ok(()),
        };

        match released {
            Ok(()) => {
                self.backend = None;
                self.teardown_pending = false;
                self.transition(
                    LifecycleEventType::Destroyed,
                    Operation::Destroy,
                    SessionState::Destroyed,
                    "backend released",
                );
                Ok(())
            }
            Err(e) => {
                let e = match e {
                    TeeError::TeardownError(_) => e,
                    other => TeeError::TeardownError(other.to_string()),
                };
                log::error!("Session {}: teardown failed: {}", self.id, e);
                self.teardown_pending = true;
                self.transition(
                    LifecycleEventType::TeardownFailed,
                    Operation::Destroy,
                    SessionState::Destroyed,
                    e.to_string(),
                );
                Err(e)
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("backend_type", &self.backend_type)
            .field("state", &self.state)
            .field("algorithm_len", &self.algorithm.len())
            .field("data_payloads", &self.data.len())
            .field("teardown_pending", &self.teardown_pending)
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Hygiene only; callers are expected to destroy explicitly
        if self.state.holds_backend() || self.teardown_pending {
            log::warn!(
                "Session {} dropped in state {} without destroy; releasing backend",
                self.id,
                self.state
            );
            if let Err(e) = self.destroy() {
                log::warn!("Session {}: release on drop failed: {}", self.id, e);
            }
        }
    }
}
