use anyhow::{anyhow, Result};

use parlor::logging::init_tracing;
use parlor::run_cli;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing().map_err(|e| anyhow!("failed to initialize logging: {}", e))?;
    run_cli().await
}
