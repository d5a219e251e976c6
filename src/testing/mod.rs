//! Testing infrastructure
//!
//! An in-process backend with fault injection for driving the lifecycle
//! controller without real isolation.

pub mod scripted;

pub use scripted::{builtin_algorithm, CallLog, ScriptedBackend};

/// Serializes unit tests that mutate the process environment
#[cfg(test)]
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
    ENV_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
