use anyhow::{Context, Result};
use colored::Colorize;
use std::path::PathBuf;

use crate::config;
use crate::server;

/// Install the pinned Helm release and the helm-diff plugin ahead of `serve`.
pub fn run(config_path: Option<PathBuf>) -> Result<()> {
    let mut settings = config::load(config_path.as_deref())?;
    settings.helm.auto_install = true;

    println!(
        "{} Ensuring helm {} in {}",
        "::".blue().bold(),
        settings.helm.version,
        settings.helm.bin_path.display()
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let bin = runtime.block_on(async {
        let installer = server::helm_installer(server::http_client()?, &settings);
        installer.ensure().await.context("preparing helm")
    })?;

    println!("{} helm ready at {}", "ok".green().bold(), bin.display());
    Ok(())
}
