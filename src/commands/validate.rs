use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::cluster::ProviderConfig;
use crate::sparrowfile::Sparrowfile;

pub fn run(file: &Path) -> Result<()> {
    let sparrowfile =
        Sparrowfile::load(file).with_context(|| format!("validating {}", file.display()))?;

    println!("{}", format!("sparrowfile {}", file.display()).bold());

    println!("  clusters:");
    if sparrowfile.clusters.is_empty() {
        println!("    {}", "(none)".dimmed());
    }
    for cluster in &sparrowfile.clusters {
        let detail = match &cluster.provider {
            ProviderConfig::Local(local) => match &local.kubeconfig {
                Some(path) => format!("kubeconfig {}", path.display()),
                None => "ambient kubeconfig".to_string(),
            },
            ProviderConfig::Azure(aks) => {
                format!("{} in {}", aks.cluster_name, aks.resource_group)
            }
        };
        println!("    {:<20} {:<6} {}", cluster.name, cluster.provider.kind(), detail);
    }

    println!("  charts:");
    if sparrowfile.chart_configurations.is_empty() {
        println!("    {}", "(none)".dimmed());
    }
    for config in &sparrowfile.chart_configurations {
        println!(
            "    {} [{}]",
            config.path.cyan(),
            config.environment_names().join(", ")
        );
        for env in &config.environments {
            let values = if env.values_files.is_empty() {
                String::new()
            } else {
                format!(" values: {}", env.values_files.join(", "))
            };
            println!("      {:<12} -> {}{}", env.name, env.cluster.name, values);
        }
    }

    println!("{} sparrowfile is valid", "ok".green().bold());
    Ok(())
}
