//! Chart change detection: map changed files onto the Helm charts that own them.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::event::ChangedFile;

/// Manifest file that marks a chart root (matched case-insensitively).
pub const CHART_MANIFEST: &str = "Chart.yaml";
const TEMPLATES_DIR: &str = "templates";

/// A directory is a chart root when it holds a chart manifest and a
/// `templates` subdirectory.
pub fn is_chart_root(dir: &Path) -> bool {
    if !dir.is_dir() || !dir.join(TEMPLATES_DIR).is_dir() {
        return false;
    }

    std::fs::read_dir(dir)
        .map(|entries| {
            entries.flatten().any(|entry| {
                entry.path().is_file()
                    && entry
                        .file_name()
                        .to_str()
                        .is_some_and(|name| name.eq_ignore_ascii_case(CHART_MANIFEST))
            })
        })
        .unwrap_or(false)
}

/// Walk from the directory containing `path` up to `repo_root` (inclusive)
/// and return the first chart root found.
pub fn owning_chart(path: &Path, repo_root: &Path) -> Option<PathBuf> {
    let mut current = path.parent();
    while let Some(dir) = current {
        if !dir.starts_with(repo_root) {
            break;
        }
        if is_chart_root(dir) {
            return Some(dir.to_path_buf());
        }
        if dir == repo_root {
            break;
        }
        current = dir.parent();
    }
    None
}

/// Chart roots touched by `changes`, in order of first discovery.
///
/// Both sides of a rename are checked since a file can move into or out of a
/// chart. Paths already under a discovered chart are not walked again.
pub fn detect_changed_charts(repo_root: &Path, changes: &[ChangedFile]) -> Vec<PathBuf> {
    let mut charts: Vec<PathBuf> = Vec::new();

    for change in changes {
        let new_path = repo_root.join(&change.new_path);
        let old_path = repo_root.join(&change.old_path);

        let mut candidates = vec![(&change.new_path, new_path.clone())];
        if old_path != new_path {
            candidates.push((&change.old_path, old_path));
        }

        for (relative, absolute) in candidates {
            if charts.iter().any(|chart| absolute.starts_with(chart)) {
                debug!(path = %relative, "already under a detected chart, skipping");
                continue;
            }

            match owning_chart(&absolute, repo_root) {
                Some(chart) if !charts.contains(&chart) => {
                    debug!(path = %relative, chart = %chart.display(), "detected changed chart");
                    charts.push(chart);
                }
                Some(_) => {}
                None => info!(path = %relative, "changed path is not in a helm chart directory"),
            }
        }
    }

    charts
}
