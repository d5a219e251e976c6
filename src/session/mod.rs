//! Session lifecycle
//!
//! [`Session`] enforces the lifecycle at runtime; [`typed::TeeSession`]
//! encodes the same ordering in the type system.

pub mod controller;
pub mod typed;

pub use controller::Session;
pub use typed::{Interrupted, TeeSession};
