use std::path::{Path, PathBuf};

/// Look for `name` in `preferred_dir` first, then on PATH.
pub fn find(name: &str, preferred_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = preferred_dir.map(|dir| dir.join(name)).filter(|p| p.is_file()) {
        return Some(p);
    }
    find_in_path(name)
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    std::env::var_os("PATH").and_then(|paths| {
        std::env::split_paths(&paths)
            .map(|dir| dir.join(name))
            .find(|path| path.is_file())
    })
}
