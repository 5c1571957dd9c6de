//! CLI argument parsing for the pool binary.
//!
//! Defines the `Args` struct and a function turning the CLI arguments into a `PoolConfig`.
use clap::Parser;
use ext_config::{Config, File, FileFormat};
use std::path::PathBuf;
use tracing::error;
use ucp_pool::{
    config::PoolConfig,
    error::{PoolError, PoolResult},
};

/// Holds the parsed CLI arguments.
#[derive(Parser, Debug)]
#[command(author, version, about = "UCP Stratum pool", long_about = None)]
pub struct Args {
    #[arg(
        short = 'c',
        long = "config",
        help = "Path to the TOML configuration file",
        default_value = "pool-config.toml"
    )]
    pub config_path: PathBuf,
    #[arg(
        short = 'f',
        long = "log-file",
        help = "Path to the log file. If not set, logs will only be written to stdout."
    )]
    pub log_file: Option<PathBuf>,
}

/// Parses CLI arguments and loads the `PoolConfig` from the specified file.
pub fn process_cli_args() -> PoolResult<PoolConfig> {
    let args = Args::parse();

    let config_path = args.config_path.to_str().ok_or_else(|| {
        error!("Invalid configuration path.");
        PoolError::BadCliArgs
    })?;

    let settings = Config::builder()
        .add_source(File::new(config_path, FileFormat::Toml))
        .build()?;

    let mut config = settings.try_deserialize::<PoolConfig>()?;
    config.set_log_dir(args.log_file);
    Ok(config)
}
