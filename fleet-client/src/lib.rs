// === Core modules ===
pub mod config;
pub mod error;
pub mod server;

// === Drives and on-drive configuration ===
pub mod config_blob;
pub mod drive;
pub mod partition;

// === Provisioning pipeline ===
pub mod prompt;
pub mod provision;

pub mod commands;
pub mod util;

// === CLI entrypoint ===
pub mod cli;

/// Entrypoint used by `main.rs` to run the full CLI.
pub async fn run_cli() -> anyhow::Result<()> {
    cli::cli().await
}
