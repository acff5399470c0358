use anyhow::{Context, Result};
use colored::Colorize;
use std::path::Path;

use crate::event::ChangedFile;
use crate::release::charts;
use crate::sparrowfile::{relative_chart_path, Sparrowfile};

/// Show which charts a set of changed paths touches and how each resolves
/// against the repository's sparrowfile.
pub fn run(repo: &Path, sparrowfile_name: &str, changed: &[String]) -> Result<()> {
    let changes: Vec<ChangedFile> = changed.iter().map(|p| ChangedFile::modified(p.as_str())).collect();
    let detected = charts::detect_changed_charts(repo, &changes);

    if detected.is_empty() {
        println!("{} No charts touched by the given paths", "::".blue().bold());
        return Ok(());
    }

    let sparrowfile_path = repo.join(sparrowfile_name);
    let sparrowfile = Sparrowfile::load(&sparrowfile_path)
        .with_context(|| format!("loading {}", sparrowfile_path.display()))?;

    for chart_dir in &detected {
        let chart = relative_chart_path(repo, chart_dir);
        match sparrowfile.resolve(repo, chart_dir)? {
            Some(config) => {
                println!(
                    "{} {} (release {}, configuration {})",
                    "ok".green().bold(),
                    chart.bold(),
                    config.release_name.as_deref().unwrap_or("-"),
                    config.path
                );
                for env in &config.environments {
                    println!(
                        "     {:<12} cluster {:<16} namespace {}",
                        env.name,
                        env.cluster.name,
                        env.namespace.as_deref().unwrap_or("-")
                    );
                }
            }
            None => println!(
                "{} {} has no applicable configuration",
                "!!".yellow().bold(),
                chart.bold()
            ),
        }
    }
    Ok(())
}
