mod args;

use args::process_cli_args;
use ucp_pool::{logging::init_logging, PoolParts, UcpPool};

#[tokio::main]
async fn main() {
    let config = match process_cli_args() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = init_logging(config.log_dir()) {
        eprintln!("Failed to initialize logging: {e}");
        std::process::exit(1);
    }

    let parts = PoolParts::from_config(&config);
    match UcpPool::new(config, parts) {
        Ok(pool) => pool.start().await,
        Err(e) => {
            tracing::error!("Failed to start pool: {e}");
            std::process::exit(1);
        }
    }
}
