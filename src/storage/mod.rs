//! Data-source collaborator
//!
//! Where algorithm and data bytes come from before they are uploaded into a
//! session. Credentials are validated once when [`StorageConfig`] is built.

pub mod fs;
pub mod source;

pub use fs::FsDataSource;
pub use source::{DataSource, StorageConfig, StorageResult, ACCESS_KEY_ENV_KEY, ACCOUNT_ENV_KEY};

/// Fetch an algorithm and its data payloads in one go
pub fn fetch_payloads<D: DataSource + ?Sized>(
    source: &D,
    algorithm: &str,
    data: &[String],
) -> StorageResult<(Vec<u8>, Vec<Vec<u8>>)> {
    let algorithm = source.fetch(algorithm)?;
    let data = data
        .iter()
        .map(|path| source.fetch(path))
        .collect::<StorageResult<Vec<_>>>()?;
    Ok((algorithm, data))
}
