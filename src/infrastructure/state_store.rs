use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use crate::core::models::TransferState;
use crate::core::{AppError, AppResult};
use crate::infrastructure::now_millis;

pub const SIDECAR_FILE_NAME: &str = ".lansync-transfer.json";

pub fn sidecar_path(target_dir: &Path) -> PathBuf {
    target_dir.join(SIDECAR_FILE_NAME)
}

fn store_error(code: &str, message: &str, detail: impl Into<String>) -> AppError {
    AppError::new(code, message).with_cause(detail.into())
}

// The sidecar is replaced atomically: a torn write must never leave a
// half-serialized state behind, only the previous complete one.
pub async fn save_state(state: &mut TransferState) -> AppResult<()> {
    state.refresh_accounting();
    state.updated_at = now_millis();

    let target_dir = PathBuf::from(state.target_path.as_str());
    tokio::fs::create_dir_all(&target_dir).await.map_err(|error| {
        store_error(
            "transfer_state_dir_create_failed",
            "保存传输状态失败",
            format!("{}: {}", target_dir.to_string_lossy(), error),
        )
    })?;

    let json = serde_json::to_string_pretty(state).map_err(|error| {
        store_error(
            "transfer_state_serialize_failed",
            "保存传输状态失败",
            error.to_string(),
        )
    })?;

    let final_path = sidecar_path(&target_dir);
    let staging_path = final_path.with_extension("json.tmp");
    tokio::fs::write(&staging_path, json.as_bytes())
        .await
        .map_err(|error| {
            store_error(
                "transfer_state_write_failed",
                "保存传输状态失败",
                format!("{}: {}", staging_path.to_string_lossy(), error),
            )
        })?;
    tokio::fs::rename(&staging_path, &final_path)
        .await
        .map_err(|error| {
            store_error(
                "transfer_state_rename_failed",
                "保存传输状态失败",
                format!("{}: {}", final_path.to_string_lossy(), error),
            )
        })?;
    Ok(())
}

pub fn load_state(target_dir: &Path) -> Option<TransferState> {
    let path = sidecar_path(target_dir);
    let raw = match std::fs::read_to_string(&path) {
        Ok(raw) => raw,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return None,
        Err(error) => {
            warn!(
                event = "transfer_state_read_failed",
                path = %path.to_string_lossy(),
                error = %error
            );
            return None;
        }
    };

    let mut state: TransferState = match serde_json::from_str(raw.as_str()) {
        Ok(state) => state,
        Err(error) => {
            warn!(
                event = "transfer_state_parse_failed",
                path = %path.to_string_lossy(),
                error = %error
            );
            return None;
        }
    };

    let accounted = state.accounted_bytes();
    if accounted != state.transferred_bytes {
        warn!(
            event = "transfer_state_accounting_repaired",
            path = %path.to_string_lossy(),
            recorded = state.transferred_bytes,
            accounted
        );
        state.transferred_bytes = accounted;
    }
    Some(state)
}

pub async fn delete_state(target_dir: &Path) -> AppResult<()> {
    let path = sidecar_path(target_dir);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(store_error(
            "transfer_state_delete_failed",
            "删除传输状态失败",
            format!("{}: {}", path.to_string_lossy(), error),
        )),
    }
}

// Sidecars sit directly inside a game directory; a shallow walk keeps root
// scans cheap even on large libraries.
pub fn find_incomplete_transfers(roots: &[PathBuf]) -> Vec<TransferState> {
    let mut found = Vec::new();
    for root in roots {
        if !root.is_dir() {
            continue;
        }
        for entry in WalkDir::new(root)
            .follow_links(false)
            .max_depth(3)
            .into_iter()
            .filter_map(Result::ok)
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if entry.file_name().to_string_lossy() != SIDECAR_FILE_NAME {
                continue;
            }
            if let Some(target_dir) = entry.path().parent()
                && let Some(state) = load_state(target_dir)
            {
                found.push(state);
            }
        }
    }
    found.sort_by(|left, right| left.app_id.cmp(&right.app_id));
    found
}

#[cfg(test)]
#[path = "../../tests/infrastructure/state_store_tests.rs"]
mod tests;
