use anyhow::Result;
use std::path::PathBuf;

use crate::config;

pub fn run(
    config_path: Option<PathBuf>,
    http_addr: Option<String>,
    log_level: Option<String>,
) -> Result<()> {
    let mut settings = config::load(config_path.as_deref())?;

    // CLI flags override file and environment values
    if let Some(addr) = http_addr {
        settings.http_addr = addr;
    }
    if let Some(level) = log_level {
        settings.log_level = level;
    }
    settings.validate()?;

    // Build tokio runtime explicitly (no #[tokio::main] on fn main)
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(crate::server::run(settings))
}
