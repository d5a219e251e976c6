//! Type-state lifecycle
//!
//! `TeeSession<S>` wraps a [`Session`] and tracks its lifecycle state in the
//! type, so an ordering violation is a compile error rather than an
//! `InvalidState` at runtime:
//!
//! `Fresh -> Created -> Loaded -> Verified -> Executed`
//!
//! Each step consumes the previous value. Only `TeeSession<Verified>`
//! exposes `execute`, and only `verify` produces a `TeeSession<Verified>`.
//! A failed step hands back the underlying [`Session`] in an
//! [`Interrupted`] so the caller can inspect its state and destroy it.
//!
//! ```
//! use teebox::integrity::compute_hash;
//! use teebox::session::typed::TeeSession;
//! use teebox::testing::ScriptedBackend;
//!
//! # fn main() -> teebox::Result<()> {
//! let output = TeeSession::new(Box::new(ScriptedBackend::builtin()))
//!     .create()?
//!     .upload(b"sum.bin".to_vec(), vec![b"1,2,3".to_vec()])?
//!     .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1,2,3")])?
//!     .execute()?;
//! assert_eq!(output.output(), b"6");
//! output.destroy()?;
//! # Ok(())
//! # }
//! ```
//!
//! Executing loaded but unverified payloads does not compile:
//!
//! ```compile_fail
//! use teebox::session::typed::TeeSession;
//! use teebox::testing::ScriptedBackend;
//!
//! # fn main() -> teebox::Result<()> {
//! let loaded = TeeSession::new(Box::new(ScriptedBackend::builtin()))
//!     .create()?
//!     .upload(b"sum.bin".to_vec(), vec![b"1,2,3".to_vec()])?;
//! loaded.execute()?;
//! # Ok(())
//! # }
//! ```
//!
//! Nor does reusing a verified session after it was consumed by a re-upload:
//!
//! ```compile_fail
//! use teebox::integrity::compute_hash;
//! use teebox::session::typed::TeeSession;
//! use teebox::testing::ScriptedBackend;
//!
//! # fn main() -> teebox::Result<()> {
//! let verified = TeeSession::new(Box::new(ScriptedBackend::builtin()))
//!     .create()?
//!     .upload(b"sum.bin".to_vec(), vec![b"1".to_vec()])?
//!     .verify(&compute_hash(b"sum.bin"), &[compute_hash(b"1")])?;
//! let _reloaded = verified.upload(b"sum.bin".to_vec(), vec![b"2".to_vec()])?;
//! verified.execute()?;
//! # Ok(())
//! # }
//! ```

use crate::backend::ExecutionBackend;
use crate::config::types::{SessionState, TeeError};
use crate::session::controller::Session;
use std::fmt;

/// Type-state marker: backend not provisioned yet
pub struct Fresh;

/// Type-state marker: backend provisioned, nothing loaded
pub struct Created;

/// Type-state marker: payloads loaded, not verified
pub struct Loaded;

/// Type-state marker: loaded payloads passed verification
pub struct Verified;

/// Type-state marker: algorithm ran; carries its output
pub struct Executed {
    output: Vec<u8>,
}

/// Session with its lifecycle state tracked in the type
pub struct TeeSession<S> {
    inner: Session,
    state: S,
}

/// A lifecycle step failed; the session is handed back for inspection and teardown
pub struct Interrupted {
    pub session: Session,
    pub error: TeeError,
}

impl Interrupted {
    fn new(session: Session, error: TeeError) -> Self {
        Self { session, error }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// Destroy the session and return the original error
    pub fn abandon(mut self) -> TeeError {
        if let Err(e) = self.session.destroy() {
            log::warn!(
                "Session {}: teardown after failed step: {}",
                self.session.id(),
                e
            );
        }
        self.error
    }
}

impl fmt::Debug for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupted")
            .field("session", &self.session)
            .field("error", &self.error)
            .finish()
    }
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session {} interrupted: {}", self.session.id(), self.error)
    }
}

impl std::error::Error for Interrupted {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<Interrupted> for TeeError {
    fn from(interrupted: Interrupted) -> Self {
        interrupted.abandon()
    }
}

type Step<S> = std::result::Result<TeeSession<S>, Interrupted>;

impl<S> TeeSession<S> {
    fn advance<T>(self, next: T) -> TeeSession<T> {
        TeeSession {
            inner: self.inner,
            state: next,
        }
    }

    pub fn session(&self) -> &Session {
        &self.inner
    }

    /// Drop the type-state tracking and keep driving the session dynamically
    pub fn into_inner(self) -> Session {
        self.inner
    }

    /// Release the backend and all payloads
    pub fn destroy(self) -> crate::Result<()> {
        let mut inner = self.inner;
        inner.destroy()
    }
}

impl TeeSession<Fresh> {
    pub fn new(backend: Box<dyn ExecutionBackend>) -> Self {
        Self::from_session(Session::with_backend(backend))
    }

    /// Wrap an uninitialized session
    pub fn from_session(session: Session) -> Self {
        debug_assert_eq!(session.state(), SessionState::Uninitialized);
        TeeSession {
            inner: session,
            state: Fresh,
        }
    }

    pub fn create(mut self) -> Step<Created> {
        match self.inner.create() {
            Ok(()) => Ok(self.advance(Created)),
            Err(e) => Err(Interrupted::new(self.inner, e)),
        }
    }
}

/// States from which payloads may be (re)uploaded
pub trait Uploadable {}

impl Uploadable for Created {}
impl Uploadable for Loaded {}
impl Uploadable for Verified {}
impl Uploadable for Executed {}

impl<S: Uploadable> TeeSession<S> {
    /// Load new payloads. Any earlier verification is gone with the old value.
    pub fn upload(mut self, algorithm: Vec<u8>, data: Vec<Vec<u8>>) -> Step<Loaded> {
        match self.inner.upload(algorithm, data) {
            Ok(()) => Ok(self.advance(Loaded)),
            Err(e) => Err(Interrupted::new(self.inner, e)),
        }
    }
}

impl TeeSession<Loaded> {
    pub fn verify<H: AsRef<str>>(mut self, algorithm_hash: &str, data_hashes: &[H]) -> Step<Verified> {
        match self.inner.verify(algorithm_hash, data_hashes) {
            Ok(()) => Ok(self.advance(Verified)),
            Err(e) => Err(Interrupted::new(self.inner, e)),
        }
    }
}

impl TeeSession<Verified> {
    /// Run the verified algorithm. This is the only way to execute a typed session.
    pub fn execute(mut self) -> Step<Executed> {
        match self.inner.execute() {
            Ok(output) => Ok(self.advance(Executed { output })),
            Err(e) => Err(Interrupted::new(self.inner, e)),
        }
    }
}

impl TeeSession<Executed> {
    pub fn output(&self) -> &[u8] {
        &self.state.output
    }

    /// Take the output and keep the session for teardown
    pub fn into_output(self) -> (Vec<u8>, Session) {
        (self.state.output, self.inner)
    }
}
