//! Run-scoped workspaces for staged payloads

pub mod workspace;
