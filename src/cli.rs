use crate::config::types::{BackendType, TeeError};
use crate::config::TeeConfig;
use crate::integrity::compute_hash;
use crate::session::Session;
use crate::storage::{fetch_payloads, FsDataSource};
use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an algorithm over data inside a trusted execution context
    Run {
        /// Algorithm file (blob path when --storage-root is set)
        #[arg(long)]
        algorithm: String,
        /// Data payload files, in order
        #[arg(long = "data", value_name = "FILE")]
        data: Vec<String>,
        /// Expected SHA-256 of the algorithm
        #[arg(long)]
        algorithm_hash: String,
        /// Expected SHA-256 of each data payload, in order
        #[arg(long = "data-hash", value_name = "HASH")]
        data_hashes: Vec<String>,
        /// Backend variant (docker_folder, sibling_container, hardware_enclave)
        #[arg(long)]
        backend: Option<BackendType>,
        /// Path to teebox.json
        #[arg(long)]
        config: Option<PathBuf>,
        /// Fetch payloads from the configured data source rooted here
        #[arg(long)]
        storage_root: Option<PathBuf>,
        /// Write output here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print SHA-256 digests of files
    Hash {
        files: Vec<PathBuf>,
    },
    /// Check that a backend can be provisioned on this host
    Probe {
        #[arg(long)]
        backend: Option<BackendType>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = dispatch(cli.command) {
        eprintln!("Error: {}", e);
        std::process::exit(i32::from(&e));
    }
    Ok(())
}

fn dispatch(command: Commands) -> crate::Result<()> {
    match command {
        Commands::Run {
            algorithm,
            data,
            algorithm_hash,
            data_hashes,
            backend,
            config,
            storage_root,
            output,
        } => {
            let config = load_config(config.as_deref(), backend)?;
            let (algorithm, data) = match storage_root {
                Some(root) => {
                    let storage = config.storage.clone().ok_or_else(|| {
                        TeeError::Config(
                            "--storage-root needs a storage section in the config".to_string(),
                        )
                    })?;
                    let source = FsDataSource::new(storage, root);
                    fetch_payloads(&source, &algorithm, &data)?
                }
                None => read_payloads(&algorithm, &data)?,
            };
            let result = run_session(&config, algorithm, data, &algorithm_hash, &data_hashes)?;
            write_output(output.as_deref(), &result)
                .map_err(|e| TeeError::TransferError(format!("failed to write output: {}", e)))
        }
        Commands::Hash { files } => {
            for file in files {
                let bytes = std::fs::read(&file).map_err(|e| {
                    TeeError::InvalidInput(format!("failed to read {}: {}", file.display(), e))
                })?;
                println!("{}  {}", compute_hash(&bytes), file.display());
            }
            Ok(())
        }
        Commands::Probe { backend, config } => {
            let config = load_config(config.as_deref(), backend)?;
            probe(&config)
        }
    }
}

fn load_config(path: Option<&Path>, backend: Option<BackendType>) -> crate::Result<TeeConfig> {
    let mut config = match path {
        Some(path) => TeeConfig::load_from_file(path)?,
        None => TeeConfig::default(),
    };
    if let Some(backend) = backend {
        config = config.with_backend(backend);
    }
    Ok(config)
}

fn read_payloads(algorithm: &str, data: &[String]) -> crate::Result<(Vec<u8>, Vec<Vec<u8>>)> {
    let read = |path: &str| {
        std::fs::read(path)
            .map_err(|e| TeeError::InvalidInput(format!("failed to read {}: {}", path, e)))
    };
    let algorithm = read(algorithm)?;
    let data = data
        .iter()
        .map(|path| read(path))
        .collect::<crate::Result<Vec<_>>>()?;
    Ok((algorithm, data))
}

/// Drive one session through the full lifecycle. The session is destroyed
/// whatever the outcome; a lifecycle error wins over a teardown error.
pub fn run_session(
    config: &TeeConfig,
    algorithm: Vec<u8>,
    data: Vec<Vec<u8>>,
    algorithm_hash: &str,
    data_hashes: &[String],
) -> crate::Result<Vec<u8>> {
    let mut session = Session::from_config(config);
    log::info!(
        "Session {} starting on {} backend",
        session.id(),
        session.backend_type()
    );

    let result = (|| {
        session.create()?;
        session.upload(algorithm, data)?;
        session.verify(algorithm_hash, data_hashes)?;
        session.execute()
    })();

    let teardown = session.destroy();
    let output = result?;
    teardown?;
    Ok(output)
}

fn probe(config: &TeeConfig) -> crate::Result<()> {
    let mut session = Session::from_config(config);
    let created = session.create();
    let teardown = session.destroy();
    created?;
    teardown?;
    println!("{}: available", config.backend);
    Ok(())
}

fn write_output(path: Option<&Path>, output: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    match path {
        Some(path) => std::fs::write(path, output),
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(output)?;
            stdout.flush()
        }
    }
}
