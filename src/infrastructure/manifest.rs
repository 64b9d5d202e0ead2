use std::path::Path;

use walkdir::WalkDir;

use crate::core::{AppError, AppResult};
use crate::infrastructure::protocol::ManifestFileFrame;
use crate::infrastructure::session::file_hash_hex;
use crate::infrastructure::state_store::SIDECAR_FILE_NAME;

fn scan_error(detail: impl Into<String>) -> AppError {
    AppError::new("manifest_scan_failed", "生成文件清单失败").with_cause(detail.into())
}

// Walks the install directory and hashes every regular file. Paths are
// normalized to forward slashes and sorted so both sides diff the same list.
pub fn build_manifest(install_dir: &Path) -> AppResult<Vec<ManifestFileFrame>> {
    if !install_dir.is_dir() {
        return Err(
            scan_error(format!("not a directory: {}", install_dir.to_string_lossy()))
                .with_context("installDir", install_dir.to_string_lossy()),
        );
    }

    let mut entries: Vec<(String, u64)> = Vec::new();
    for entry in WalkDir::new(install_dir).follow_links(false) {
        let entry = entry.map_err(|error| scan_error(error.to_string()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy() == SIDECAR_FILE_NAME {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(install_dir)
            .map_err(|error| scan_error(error.to_string()))?;
        let relative_path = relative
            .to_string_lossy()
            .replace(std::path::MAIN_SEPARATOR, "/");
        let metadata = entry.metadata().map_err(|error| scan_error(error.to_string()))?;
        entries.push((relative_path, metadata.len()));
    }
    entries.sort_by(|left, right| left.0.cmp(&right.0));

    let mut files = Vec::with_capacity(entries.len());
    for (relative_path, size_bytes) in entries {
        let absolute = install_dir.join(relative_path.replace('/', std::path::MAIN_SEPARATOR_STR));
        let hash = file_hash_hex(&absolute)?;
        files.push(ManifestFileFrame {
            relative_path,
            size_bytes,
            hash,
        });
    }
    Ok(files)
}

pub fn manifest_total_bytes(files: &[ManifestFileFrame]) -> u64 {
    files.iter().map(|file| file.size_bytes).sum()
}

#[cfg(test)]
#[path = "../../tests/infrastructure/manifest_tests.rs"]
mod tests;
