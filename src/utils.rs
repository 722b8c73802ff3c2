//! Filesystem helpers for challenge programs and CLI output.
use std::env;
use std::path::{Path, PathBuf};

const WINDOWS_EXTENSIONS: [&str; 3] = ["exe", "cmd", "bat"];

fn executable_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = dir.join(name);
    if candidate.is_file() {
        return Some(candidate);
    }
    if cfg!(windows) {
        return WINDOWS_EXTENSIONS
            .iter()
            .map(|ext| dir.join(format!("{}.{}", name, ext)))
            .find(|candidate| candidate.is_file());
    }
    None
}

/// Locate a program.
///
/// Names containing a path separator are taken as paths; anything else is
/// searched on `PATH`, trying each name in order.
#[must_use]
pub fn get_binary_path(names: &[&str]) -> Option<PathBuf> {
    for name in names {
        let path = Path::new(name);
        if path.components().count() > 1 && path.is_file() {
            return Some(path.to_path_buf());
        }
    }

    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .find_map(|dir| names.iter().find_map(|name| executable_in(&dir, name)))
}

/// Write `contents` to `path`, creating parent directories first.
pub fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)
}
