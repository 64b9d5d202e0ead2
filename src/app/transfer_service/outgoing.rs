use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use super::TransferRequest;
use super::control::{HaltReason, TransferControl};
use super::progress::ProgressReporter;
use crate::app::events::{SyncEvent, SyncEventSink};
use crate::app::lock_mutex;
use crate::core::config::SyncConfig;
use crate::core::models::{CompletedFile, PendingFile, SpeedMode, TransferState};
use crate::core::{AppError, AppResult, ResultExt};
use crate::infrastructure::now_millis;
use crate::infrastructure::protocol::{
    ManifestFileFrame, TransferFrame, io_to_error, read_json_frame, write_json_frame,
};
use crate::infrastructure::runtime::blocking::run_blocking;
use crate::infrastructure::session::{FileStreamWriter, file_hash_hex, resolve_target_path};
use crate::infrastructure::state_store::{delete_state, load_state, save_state};

pub(super) struct JobContext {
    pub config: SyncConfig,
    pub device_id: String,
    pub display_name: String,
    pub events: Arc<dyn SyncEventSink>,
    pub control: Arc<TransferControl>,
    pub speed_mode: Arc<Mutex<SpeedMode>>,
}

impl JobContext {
    fn chunk_bytes(&self) -> usize {
        let mode = *lock_mutex(&self.speed_mode, "transfer_speed_mode");
        self.config.chunk_bytes(mode) as usize
    }

    fn max_chunk_bytes(&self) -> usize {
        self.config
            .wired_chunk_bytes
            .max(self.config.wireless_chunk_bytes) as usize
    }
}

pub(super) async fn run_job(ctx: JobContext, request: TransferRequest) {
    let app_id = request.remote.app_id.clone();
    let game_name = request.remote.name.clone();
    if let Err(failure) = run_transfer(&ctx, request).await {
        error!(
            event = "transfer_failed",
            app_id,
            error_code = %failure.code,
            error = %failure
        );
        ctx.events.emit(SyncEvent::TransferFailed {
            app_id,
            game_name,
            error: failure.public_text(),
        });
    }
    ctx.control.finish();
}

enum ExecutionOutcome {
    Completed,
    Halted(HaltReason),
}

async fn run_transfer(ctx: &JobContext, request: TransferRequest) -> AppResult<()> {
    let target_dir = PathBuf::from(request.target_path.as_str());
    let mut stream = connect_transfer(ctx, &request).await?;

    write_json_frame(
        &mut stream,
        &TransferFrame::Hello {
            device_id: ctx.device_id.clone(),
            display_name: ctx.display_name.clone(),
        },
    )
    .await?;
    write_json_frame(
        &mut stream,
        &TransferFrame::ManifestRequest {
            app_id: request.remote.app_id.clone(),
        },
    )
    .await?;

    let response: TransferFrame = read_json_frame(&mut stream).await?;
    let (app_id, game_name, build_id, total_bytes, files) = match response {
        TransferFrame::Manifest {
            app_id,
            game_name,
            build_id,
            total_bytes,
            files,
        } => (app_id, game_name, build_id, total_bytes, files),
        TransferFrame::Error { code, message } => {
            return Err(AppError::new(code, "对端返回错误").with_cause(message));
        }
        _ => return Err(AppError::new("transfer_response_invalid", "传输响应无效")),
    };
    if app_id != request.remote.app_id {
        return Err(
            AppError::new("transfer_response_invalid", "传输响应无效").with_context("appId", app_id)
        );
    }
    if build_id != request.remote.build_id {
        info!(
            event = "transfer_build_changed",
            app_id,
            requested = %request.remote.build_id,
            served = %build_id
        );
    }
    info!(
        event = "transfer_manifest_received",
        app_id,
        build_id,
        files = files.len(),
        total_bytes
    );

    let plan_dir = target_dir.clone();
    let plan_input = PlanInput {
        app_id: app_id.clone(),
        game_name: game_name.clone(),
        build_id,
        total_bytes,
        target_path: request.target_path.clone(),
        peer_device_id: request.peer_device_id.clone(),
        peer_address: request.peer_address.clone(),
        peer_catalog_port: request.peer_catalog_port,
        peer_transfer_port: request.peer_transfer_port,
    };
    let (mut state, resumed) = run_blocking("transfer_plan", move || {
        let previous = load_state(&plan_dir);
        plan_transfer_state(&plan_dir, plan_input, &files, previous)
    })
    .await?;

    if resumed {
        info!(
            event = "transfer_resumed",
            app_id,
            transferred = state.transferred_bytes,
            total = state.total_bytes
        );
    } else {
        info!(
            event = "transfer_started",
            app_id,
            pending = state.pending_files.len(),
            completed = state.completed_files.len()
        );
    }
    save_state(&mut state).await?;

    let mut progress = ProgressReporter::new(
        ctx.events.clone(),
        app_id.clone(),
        game_name.clone(),
        state.total_bytes,
        ctx.config.progress_interval_ms,
        state.transferred_bytes,
    );
    progress.report(state.transferred_bytes);

    let outcome =
        match execute_transfer(ctx, &mut stream, &mut state, &target_dir, &mut progress).await {
            Ok(outcome) => outcome,
            Err(failure) => {
                // keep whatever progress was made resumable before failing
                if let Err(save_error) = save_state(&mut state).await {
                    warn!(
                        event = "transfer_state_save_failed",
                        error_code = %save_error.code,
                        error = %save_error
                    );
                }
                return Err(failure);
            }
        };

    match outcome {
        ExecutionOutcome::Completed => {
            let complete = TransferFrame::Complete {
                app_id: app_id.clone(),
            };
            if let Err(notify_error) = write_json_frame(&mut stream, &complete).await {
                debug!(
                    event = "transfer_complete_notify_failed",
                    error_code = %notify_error.code
                );
            }
            if let Err(cleanup_error) = delete_state(&target_dir).await {
                warn!(
                    event = "transfer_state_cleanup_failed",
                    error_code = %cleanup_error.code,
                    error = %cleanup_error
                );
            }
            progress.clear_current_file();
            progress.report_final(state.transferred_bytes);
            info!(
                event = "transfer_completed",
                app_id,
                total_bytes = state.total_bytes
            );
            ctx.events.emit(SyncEvent::TransferCompleted {
                app_id,
                game_name,
                target_path: state.target_path.clone(),
            });
        }
        ExecutionOutcome::Halted(reason) => {
            save_state(&mut state).await?;
            let paused = reason == HaltReason::Paused;
            progress.report_final(state.transferred_bytes);
            info!(
                event = "transfer_halted",
                app_id,
                paused,
                transferred = state.transferred_bytes
            );
            ctx.events.emit(SyncEvent::TransferStopped { app_id, paused });
        }
    }
    Ok(())
}

async fn connect_transfer(ctx: &JobContext, request: &TransferRequest) -> AppResult<TcpStream> {
    let target = format!("{}:{}", request.peer_address, request.peer_transfer_port);
    let timeout = Duration::from_millis(ctx.config.connect_timeout_ms);
    match tokio::time::timeout(timeout, TcpStream::connect(target.as_str())).await {
        Ok(connected) => connected
            .with_code("transfer_connect_failed", "连接传输服务失败")
            .with_ctx("address", target.clone()),
        Err(_) => Err(AppError::new("transfer_connect_timeout", "连接传输服务超时")
            .with_context("address", target)),
    }
}

struct PlanInput {
    app_id: String,
    game_name: String,
    build_id: String,
    total_bytes: u64,
    target_path: String,
    peer_device_id: String,
    peer_address: String,
    peer_catalog_port: u16,
    peer_transfer_port: u16,
}

// A sidecar recorded for the same application and build seeds completed and
// partial files; anything else falls back to diffing the manifest against the
// disk. Build ids alone are not unique across games, so both must match.
fn plan_transfer_state(
    target_dir: &Path,
    input: PlanInput,
    manifest_files: &[ManifestFileFrame],
    previous: Option<TransferState>,
) -> AppResult<(TransferState, bool)> {
    let now = now_millis();
    let resume = match previous {
        Some(state) if state.app_id == input.app_id && state.build_id == input.build_id => {
            Some(state)
        }
        Some(state) => {
            info!(
                event = "transfer_state_mismatch",
                recorded_app = %state.app_id,
                recorded_build = %state.build_id,
                current_app = %input.app_id,
                current_build = %input.build_id
            );
            None
        }
        None => None,
    };
    let resumed = resume.is_some();

    let mut completed = Vec::new();
    let mut pending = Vec::new();
    if let Some(resume_state) = resume.as_ref() {
        let done: HashMap<&str, &CompletedFile> = resume_state
            .completed_files
            .iter()
            .map(|file| (file.relative_path.as_str(), file))
            .collect();
        let partial: HashMap<&str, &PendingFile> = resume_state
            .pending_files
            .iter()
            .map(|file| (file.relative_path.as_str(), file))
            .collect();

        for file in manifest_files {
            let absolute = resolve_target_path(target_dir, &file.relative_path)?;
            if let Some(entry) = done.get(file.relative_path.as_str())
                && entry.size_bytes == file.size_bytes
                && disk_size(&absolute) == Some(file.size_bytes)
            {
                completed.push(CompletedFile {
                    relative_path: file.relative_path.clone(),
                    size_bytes: file.size_bytes,
                });
                continue;
            }
            // A flushed sidecar can lag the bytes on disk; lagging is safe,
            // the tail is simply fetched again.
            let transferred = partial
                .get(file.relative_path.as_str())
                .filter(|entry| entry.size_bytes == file.size_bytes && entry.hash == file.hash)
                .map(|entry| entry.transferred_bytes.min(file.size_bytes))
                .unwrap_or(0);
            pending.push(PendingFile {
                relative_path: file.relative_path.clone(),
                size_bytes: file.size_bytes,
                transferred_bytes: transferred,
                hash: file.hash.clone(),
            });
        }
    } else {
        for file in manifest_files {
            let absolute = resolve_target_path(target_dir, &file.relative_path)?;
            if file_matches_on_disk(&absolute, file) {
                completed.push(CompletedFile {
                    relative_path: file.relative_path.clone(),
                    size_bytes: file.size_bytes,
                });
            } else {
                pending.push(PendingFile {
                    relative_path: file.relative_path.clone(),
                    size_bytes: file.size_bytes,
                    transferred_bytes: 0,
                    hash: file.hash.clone(),
                });
            }
        }
    }

    let started_at = resume
        .as_ref()
        .map(|state| state.started_at)
        .unwrap_or(now);
    let mut state = TransferState {
        app_id: input.app_id,
        game_name: input.game_name,
        target_path: input.target_path,
        peer_device_id: input.peer_device_id,
        peer_address: input.peer_address,
        peer_catalog_port: input.peer_catalog_port,
        peer_transfer_port: input.peer_transfer_port,
        build_id: input.build_id,
        total_bytes: input.total_bytes,
        transferred_bytes: 0,
        completed_files: completed,
        pending_files: pending,
        started_at,
        updated_at: now,
    };
    state.refresh_accounting();
    Ok((state, resumed))
}

fn disk_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|metadata| metadata.is_file())
        .map(|metadata| metadata.len())
}

// Matching size alone is not enough for an update diff; only a hash match
// lets a file be skipped.
fn file_matches_on_disk(path: &Path, file: &ManifestFileFrame) -> bool {
    if disk_size(path) != Some(file.size_bytes) {
        return false;
    }
    match file_hash_hex(path) {
        Ok(hash) => hash == file.hash,
        Err(hash_error) => {
            warn!(
                event = "transfer_local_hash_failed",
                path = %path.to_string_lossy(),
                error_code = %hash_error.code
            );
            false
        }
    }
}

async fn execute_transfer(
    ctx: &JobContext,
    stream: &mut TcpStream,
    state: &mut TransferState,
    target_dir: &Path,
    progress: &mut ProgressReporter,
) -> AppResult<ExecutionOutcome> {
    let flush_interval = Duration::from_millis(ctx.config.state_flush_interval_ms);
    let mut last_flush = Instant::now();
    // Sized for the larger mode so a wireless-to-wired toggle mid-transfer
    // needs no reallocation.
    let mut buffer = vec![0u8; ctx.max_chunk_bytes()];
    let mut retries: HashMap<String, u8> = HashMap::new();

    while let Some(file) = state.pending_files.first().cloned() {
        if let Some(reason) = ctx.control.halt_reason() {
            return Ok(ExecutionOutcome::Halted(reason));
        }

        progress.set_current_file(&file.relative_path);
        let absolute = resolve_target_path(target_dir, &file.relative_path)?;
        debug!(
            event = "transfer_file_requested",
            relative_path = %file.relative_path,
            offset = file.transferred_bytes
        );
        write_json_frame(
            stream,
            &TransferFrame::FileRequest {
                relative_path: file.relative_path.clone(),
                offset: file.transferred_bytes,
            },
        )
        .await?;

        let header: TransferFrame = read_json_frame(stream).await?;
        let (relative_path, offset, len) = match header {
            TransferFrame::FileHeader {
                relative_path,
                offset,
                len,
            } => (relative_path, offset, len),
            TransferFrame::Error { code, message } => {
                return Err(AppError::new(code, "对端返回错误").with_cause(message));
            }
            _ => return Err(AppError::new("transfer_response_invalid", "传输响应无效")),
        };
        if relative_path != file.relative_path
            || offset != file.transferred_bytes
            || offset.checked_add(len) != Some(file.size_bytes)
        {
            return Err(AppError::new("transfer_size_mismatch", "文件大小不一致")
                .with_context("relativePath", file.relative_path.clone())
                .with_context("expectedBytes", file.size_bytes.to_string()));
        }

        let mut writer = FileStreamWriter::open(&absolute, file.size_bytes, offset).await?;
        let mut remaining = len;
        while remaining > 0 {
            let want = remaining.min(ctx.chunk_bytes() as u64) as usize;
            stream
                .read_exact(&mut buffer[..want])
                .await
                .map_err(io_to_error)?;
            writer.write_all(&buffer[..want]).await?;
            remaining -= want as u64;
            if let Some(front) = state.pending_files.first_mut() {
                front.transferred_bytes += want as u64;
            }
            state.transferred_bytes += want as u64;
            progress.report(state.transferred_bytes);

            if last_flush.elapsed() >= flush_interval {
                writer.flush().await?;
                save_state(state).await?;
                last_flush = Instant::now();
            }

            if let Some(reason) = ctx.control.halt_reason() {
                writer.flush().await?;
                return Ok(ExecutionOutcome::Halted(reason));
            }
        }
        writer.flush().await?;
        drop(writer);

        let verify_path = absolute.clone();
        let actual_hash =
            run_blocking("transfer_file_verify", move || file_hash_hex(&verify_path)).await?;
        if actual_hash == file.hash {
            let finished = state.pending_files.remove(0);
            state.completed_files.push(CompletedFile {
                relative_path: finished.relative_path,
                size_bytes: finished.size_bytes,
            });
            save_state(state).await?;
            last_flush = Instant::now();
            debug!(
                event = "transfer_file_completed",
                relative_path = %file.relative_path
            );
            continue;
        }

        let attempts = retries.entry(file.relative_path.clone()).or_insert(0);
        *attempts += 1;
        warn!(
            event = "transfer_file_hash_mismatch",
            relative_path = %file.relative_path,
            attempt = *attempts
        );
        if *attempts >= ctx.config.file_retry_limit {
            return Err(AppError::new("transfer_file_corrupt", "文件校验失败")
                .with_context("relativePath", file.relative_path.clone())
                .with_context("attempts", attempts.to_string()));
        }
        // the corrupt copy goes to the back of the queue and is rewritten
        // from offset zero
        let mut requeued = state.pending_files.remove(0);
        requeued.transferred_bytes = 0;
        state.pending_files.push(requeued);
        save_state(state).await?;
        last_flush = Instant::now();
        progress.report(state.transferred_bytes);
    }
    Ok(ExecutionOutcome::Completed)
}
