use std::io::Read;
use std::path::{Component, Path, PathBuf};

use tokio::fs::{OpenOptions, create_dir_all};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::core::{AppError, AppResult};

fn io_error(code: &str, detail: impl Into<String>) -> AppError {
    AppError::new(code, "文件传输读写失败").with_cause(detail.into())
}

pub fn file_hash_hex(path: &Path) -> AppResult<String> {
    let mut file = std::fs::File::open(path).map_err(|error| {
        io_error(
            "transfer_file_read_failed",
            format!("{}: {}", path.to_string_lossy(), error),
        )
    })?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let read_count = file.read(buffer.as_mut_slice()).map_err(|error| {
            io_error(
                "transfer_file_read_failed",
                format!("{}: {}", path.to_string_lossy(), error),
            )
        })?;
        if read_count == 0 {
            break;
        }
        hasher.update(&buffer[..read_count]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

// Relative paths arrive over the wire; anything that could escape the target
// directory is rejected before it touches the filesystem.
pub fn resolve_target_path(base_dir: &Path, relative_path: &str) -> AppResult<PathBuf> {
    let clean = relative_path.replace('\\', "/");
    if clean.trim().is_empty() {
        return Err(AppError::new("transfer_path_invalid", "非法文件路径")
            .with_context("relativePath", relative_path));
    }

    let candidate = PathBuf::from(clean.as_str());
    let mut resolved = base_dir.to_path_buf();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            _ => {
                return Err(AppError::new("transfer_path_invalid", "非法文件路径")
                    .with_context("relativePath", relative_path));
            }
        }
    }
    Ok(resolved)
}

#[derive(Debug)]
pub struct FileStreamReader {
    path: PathBuf,
    file: tokio::fs::File,
}

impl FileStreamReader {
    pub async fn open(path: &Path, offset: u64) -> AppResult<Self> {
        let mut file = tokio::fs::File::open(path).await.map_err(|error| {
            io_error(
                "transfer_source_open_failed",
                format!("{}: {}", path.to_string_lossy(), error),
            )
        })?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|error| {
                io_error(
                    "transfer_source_seek_failed",
                    format!("{}: {}", path.to_string_lossy(), error),
                )
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub async fn read_into(&mut self, buffer: &mut [u8]) -> AppResult<usize> {
        self.file.read(buffer).await.map_err(|error| {
            io_error(
                "transfer_source_read_failed",
                format!("{}: {}", self.path.to_string_lossy(), error),
            )
        })
    }
}

#[derive(Debug)]
pub struct FileStreamWriter {
    path: PathBuf,
    file: tokio::fs::File,
}

impl FileStreamWriter {
    pub async fn open(path: &Path, total_size: u64, offset: u64) -> AppResult<Self> {
        if let Some(parent) = path.parent() {
            create_dir_all(parent).await.map_err(|error| {
                io_error(
                    "transfer_target_dir_create_failed",
                    format!("{}: {}", parent.to_string_lossy(), error),
                )
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .await
            .map_err(|error| {
                io_error(
                    "transfer_target_open_failed",
                    format!("{}: {}", path.to_string_lossy(), error),
                )
            })?;

        file.set_len(total_size).await.map_err(|error| {
            io_error(
                "transfer_target_preallocate_failed",
                format!("{}: {}", path.to_string_lossy(), error),
            )
        })?;

        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(|error| {
                io_error(
                    "transfer_target_seek_failed",
                    format!("{}: {}", path.to_string_lossy(), error),
                )
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> AppResult<()> {
        self.file.write_all(bytes).await.map_err(|error| {
            io_error(
                "transfer_target_write_failed",
                format!("{}: {}", self.path.to_string_lossy(), error),
            )
        })
    }

    pub async fn flush(&mut self) -> AppResult<()> {
        self.file.flush().await.map_err(|error| {
            io_error(
                "transfer_target_flush_failed",
                format!("{}: {}", self.path.to_string_lossy(), error),
            )
        })
    }
}

#[cfg(test)]
#[path = "../../tests/infrastructure/session_tests.rs"]
mod tests;
