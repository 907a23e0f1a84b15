//! CLI entry point for the StarkEx synchronizer.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! cli.rs (command dispatch)
//!     ↓
//! app.rs (wiring) → sync scheduler → collectors / preprocessing / freeze check
//! ```
//!
//! Logging is controlled by `RUST_LOG`, `LOG_JSON` and `LOG_FILE`.

use eyre::WrapErr;
use starkex_sync::{cli, observability};
use tracing::error;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .ok()
        .and_then(|value| value.parse::<bool>().ok())
        .unwrap_or(false);

    let _guard = observability::init_tracing(None, log_file, json_output)
        .map_err(|e| eyre::eyre!(e))
        .wrap_err("Failed to initialize tracing")?;

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        return Err(e).wrap_err("starkex-sync failed");
    }
    Ok(())
}
