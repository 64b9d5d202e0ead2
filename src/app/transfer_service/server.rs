use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::app::catalog_service::LocalCatalog;
use crate::app::lock_mutex;
use crate::core::config::SyncConfig;
use crate::core::models::SpeedMode;
use crate::core::{AppError, AppResult};
use crate::infrastructure::manifest::{build_manifest, manifest_total_bytes};
use crate::infrastructure::protocol::{
    TransferFrame, io_to_error, read_json_frame, write_json_frame,
};
use crate::infrastructure::runtime::blocking::run_blocking;
use crate::infrastructure::session::{FileStreamReader, resolve_target_path};

fn error_frame(code: &str, message: &str) -> TransferFrame {
    TransferFrame::Error {
        code: code.to_string(),
        message: message.to_string(),
    }
}

// A connection is a session: Hello, then one manifest, then any number of
// file requests against that manifest.
pub(super) async fn serve_transfer_connection(
    mut stream: TcpStream,
    catalog: Arc<LocalCatalog>,
    config: SyncConfig,
    speed_mode: Arc<Mutex<SpeedMode>>,
) -> AppResult<()> {
    let hello: TransferFrame = read_json_frame(&mut stream).await?;
    let TransferFrame::Hello {
        device_id,
        display_name,
    } = hello
    else {
        write_json_frame(
            &mut stream,
            &error_frame("transfer_handshake_invalid", "传输握手无效"),
        )
        .await?;
        return Err(AppError::new("transfer_handshake_invalid", "传输握手无效"));
    };
    info!(event = "transfer_peer_connected", peer = %device_id, name = %display_name);

    let mut serving_dir: Option<PathBuf> = None;
    loop {
        let frame = match read_json_frame::<_, TransferFrame>(&mut stream).await {
            Ok(frame) => frame,
            Err(error) if error.code == "connection_closed" => {
                debug!(event = "transfer_peer_disconnected", peer = %device_id);
                return Ok(());
            }
            Err(error) => return Err(error),
        };

        match frame {
            TransferFrame::ManifestRequest { app_id } => {
                serving_dir = serve_manifest(&mut stream, &catalog, app_id).await?;
            }
            TransferFrame::FileRequest {
                relative_path,
                offset,
            } => {
                let Some(install_dir) = serving_dir.as_deref() else {
                    write_json_frame(
                        &mut stream,
                        &error_frame("transfer_request_out_of_order", "请求顺序无效"),
                    )
                    .await?;
                    continue;
                };
                serve_file(
                    &mut stream,
                    install_dir,
                    &relative_path,
                    offset,
                    &config,
                    &speed_mode,
                )
                .await?;
            }
            TransferFrame::Complete { app_id } => {
                info!(event = "transfer_serving_complete", app_id, peer = %device_id);
                return Ok(());
            }
            _ => {
                write_json_frame(
                    &mut stream,
                    &error_frame("transfer_frame_unexpected", "意外的协议帧"),
                )
                .await?;
                return Err(AppError::new("transfer_frame_unexpected", "意外的协议帧"));
            }
        }
    }
}

async fn serve_manifest(
    stream: &mut TcpStream,
    catalog: &Arc<LocalCatalog>,
    app_id: String,
) -> AppResult<Option<PathBuf>> {
    let Some(record) = catalog.serving_record(&app_id) else {
        warn!(event = "transfer_game_unavailable", app_id);
        write_json_frame(
            stream,
            &error_frame("transfer_game_unavailable", "游戏不可用或未共享"),
        )
        .await?;
        return Ok(None);
    };
    let Some(install_path) = record.install_path.clone() else {
        write_json_frame(
            stream,
            &error_frame("transfer_game_unavailable", "游戏不可用或未共享"),
        )
        .await?;
        return Ok(None);
    };

    let install_dir = PathBuf::from(install_path);
    let scan_dir = install_dir.clone();
    let files = match run_blocking("transfer_manifest_scan", move || build_manifest(&scan_dir)).await
    {
        Ok(files) => files,
        Err(error) => {
            warn!(
                event = "transfer_manifest_scan_failed",
                app_id,
                error_code = %error.code,
                error = %error
            );
            write_json_frame(stream, &error_frame(&error.code, "生成文件清单失败")).await?;
            return Ok(None);
        }
    };

    let total_bytes = manifest_total_bytes(&files);
    info!(
        event = "transfer_manifest_served",
        app_id,
        files = files.len(),
        total_bytes
    );
    let manifest = TransferFrame::Manifest {
        app_id,
        game_name: record.name.clone(),
        build_id: record.build_id.clone(),
        total_bytes,
        files,
    };
    write_json_frame(stream, &manifest).await?;
    Ok(Some(install_dir))
}

async fn serve_file(
    stream: &mut TcpStream,
    install_dir: &Path,
    relative_path: &str,
    offset: u64,
    config: &SyncConfig,
    speed_mode: &Mutex<SpeedMode>,
) -> AppResult<()> {
    let path = match resolve_target_path(install_dir, relative_path) {
        Ok(path) => path,
        Err(error) => {
            write_json_frame(stream, &error_frame(&error.code, "非法文件路径")).await?;
            return Err(error);
        }
    };

    let size = match tokio::fs::metadata(&path).await {
        Ok(metadata) if metadata.is_file() => metadata.len(),
        Ok(_) | Err(_) => {
            warn!(event = "transfer_file_missing", relative_path);
            write_json_frame(stream, &error_frame("transfer_file_missing", "源文件不存在"))
                .await?;
            return Err(AppError::new("transfer_file_missing", "源文件不存在")
                .with_context("relativePath", relative_path));
        }
    };
    if offset > size {
        write_json_frame(stream, &error_frame("transfer_offset_invalid", "请求偏移无效"))
            .await?;
        return Err(AppError::new("transfer_offset_invalid", "请求偏移无效")
            .with_context("relativePath", relative_path)
            .with_context("offset", offset.to_string()));
    }

    let len = size - offset;
    write_json_frame(
        stream,
        &TransferFrame::FileHeader {
            relative_path: relative_path.to_string(),
            offset,
            len,
        },
    )
    .await?;

    let mut reader = FileStreamReader::open(&path, offset).await?;
    let mut remaining = len;
    // Sized for the larger mode so a toggle mid-transfer needs no
    // reallocation; the live mode picks the slice each round.
    let max_chunk = config.wired_chunk_bytes.max(config.wireless_chunk_bytes) as usize;
    let mut buffer = vec![0u8; max_chunk];
    while remaining > 0 {
        let mode = *lock_mutex(speed_mode, "transfer_speed_mode");
        let chunk = config.chunk_bytes(mode);
        let want = remaining.min(chunk) as usize;
        let read_count = reader.read_into(&mut buffer[..want]).await?;
        if read_count == 0 {
            return Err(AppError::new("transfer_source_truncated", "源文件被截断")
                .with_context("relativePath", relative_path));
        }
        stream
            .write_all(&buffer[..read_count])
            .await
            .map_err(io_to_error)?;
        remaining -= read_count as u64;
    }
    stream.flush().await.map_err(io_to_error)?;
    debug!(event = "transfer_file_served", relative_path, offset, len);
    Ok(())
}
