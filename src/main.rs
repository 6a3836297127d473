//! Minimal example binary: loads the configuration file for the current directory,
//! launches a debug session for the file passed as the first argument, and waits for
//! the session to terminate before exiting.
//!
//! Argument parsing here is deliberately bare — a full CLI is outside what this crate
//! provides; embedders are expected to build their own entry point against
//! [`debugmcp_dap::backend::DebugBackend`].

use std::io;
use std::path::Path;

use debugmcp_dap::backend::DebugBackend;
use debugmcp_dap::config::ConfigLoader;
use tracing_subscriber::{fmt, EnvFilter};

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).with_writer(io::stderr).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let program = std::env::args().nth(1).ok_or_else(|| anyhow::anyhow!("usage: debugmcp-dap <program>"))?;
    let program_path = Path::new(&program);
    let cwd = std::env::current_dir()?;

    let config_path = ConfigLoader::search_upward(&cwd).ok_or_else(|| anyhow::anyhow!("no debugmcp.config.json found above {}", cwd.display()))?;
    let loader = ConfigLoader::load(&config_path)?;

    let backend = DebugBackend::new(loader.config().adapters.clone());
    let cfg = loader.provide_debug_config(program_path, &cwd);

    let terminated = backend.on_terminated(|_| tracing::info!("debug session terminated"));

    if !backend.start_debugging(&cwd, cfg).await {
        anyhow::bail!("failed to start debugging {program}");
    }
    tracing::info!(%program, "debug session started");

    tokio::signal::ctrl_c().await?;
    backend.stop_debugging().await;
    terminated.dispose();

    Ok(())
}
