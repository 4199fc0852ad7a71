//! resp-tap: decode and log RESP traffic
//!
//! Modes:
//! - Listen for mirrored connections and log every value each peer sends
//! - Replay a captured byte stream from a file (`--replay`)
//!
//! Configuration via CLI arguments or TOML file.

use resp_tap::config::Config;
use resp_tap::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match config.replay.clone() {
        Some(path) => {
            runtime::replay::run_file(&config, &path)?;
            Ok(())
        }
        None => {
            info!(
                listen = %config.listen,
                workers = config.workers,
                bulk_capture_limit = config.bulk_capture_limit,
                max_line_length = config.max_line_length,
                "Starting resp-tap"
            );
            runtime::run(config)?;
            Ok(())
        }
    }
}
