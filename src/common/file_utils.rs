use crate::errors::AppError;
use log::debug;
use std::env;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Outcome of an idempotent file write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    Unchanged,
}

pub fn ensure_directory(dir_path: &Path) -> Result<PathBuf, AppError> {
    if !dir_path.exists() {
        debug!("Directory '{}' does not exist, attempting to create it.", dir_path.display());
        fs::create_dir_all(dir_path).map_err(|e| {
            AppError::Io(format!(
                "Failed to create directory '{}': {}",
                dir_path.display(),
                e
            ))
        })?;
    } else if !dir_path.is_dir() {
        return Err(AppError::Io(format!(
            "Path '{}' exists but is not a directory.",
            dir_path.display()
        )));
    }
    Ok(dir_path.to_path_buf())
}

/// Writes `contents` only when `path` does not exist yet.
pub fn write_if_absent(path: &Path, contents: &str) -> Result<WriteOutcome, AppError> {
    if path.exists() {
        debug!("Keeping existing file '{}'", path.display());
        return Ok(WriteOutcome::Unchanged);
    }
    write_with_parents(path, contents)?;
    Ok(WriteOutcome::Created)
}

/// Writes `contents` unless `path` already holds exactly that text.
pub fn write_if_changed(path: &Path, contents: &str) -> Result<WriteOutcome, AppError> {
    match fs::read_to_string(path) {
        Ok(existing) if existing == contents => Ok(WriteOutcome::Unchanged),
        Ok(_) => {
            write_with_parents(path, contents)?;
            Ok(WriteOutcome::Updated)
        }
        Err(_) => {
            write_with_parents(path, contents)?;
            Ok(WriteOutcome::Created)
        }
    }
}

fn write_with_parents(path: &Path, contents: &str) -> Result<(), AppError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent)?;
    }
    fs::write(path, contents)
        .map_err(|e| AppError::Io(format!("Failed to write '{}': {}", path.display(), e)))
}

/// Looks `binary` up on `PATH`. Names containing a slash are checked as given.
pub fn find_in_path(binary: &str) -> Option<PathBuf> {
    if binary.contains('/') {
        let candidate = PathBuf::from(binary);
        return is_executable(&candidate).then_some(candidate);
    }
    let path_var = env::var_os("PATH")?;
    env::split_paths(&path_var)
        .map(|dir| dir.join(binary))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}
