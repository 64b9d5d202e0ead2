use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::core::models::GameRecord;
use crate::core::{AppError, AppResult};

pub const FRAME_MAX_BYTES: usize = 16 * 1024 * 1024;
const MODE_JSON: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestFileFrame {
    pub relative_path: String,
    pub size_bytes: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum CatalogFrame {
    CatalogRequest {
        device_id: String,
        display_name: String,
    },
    Catalog {
        device_id: String,
        display_name: String,
        transfer_port: u16,
        games: Vec<GameRecord>,
    },
    NotScanned {
        device_id: String,
        display_name: String,
        transfer_port: u16,
    },
    Error {
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum TransferFrame {
    Hello {
        device_id: String,
        display_name: String,
    },
    ManifestRequest {
        app_id: String,
    },
    Manifest {
        app_id: String,
        game_name: String,
        build_id: String,
        total_bytes: u64,
        files: Vec<ManifestFileFrame>,
    },
    FileRequest {
        relative_path: String,
        offset: u64,
    },
    // A FileHeader is followed by exactly `len` raw bytes on the stream.
    FileHeader {
        relative_path: String,
        offset: u64,
        len: u64,
    },
    Complete {
        app_id: String,
    },
    Error {
        code: String,
        message: String,
    },
}

fn app_error(code: &str, cause: impl Into<String>) -> AppError {
    AppError::new(code, "同步协议错误").with_cause(cause.into())
}

fn serialize_frame<T: Serialize>(frame: &T) -> AppResult<Vec<u8>> {
    serde_json::to_vec(frame)
        .map_err(|error| app_error("protocol_frame_serialize_failed", error.to_string()))
}

fn deserialize_frame<T: DeserializeOwned>(payload: &[u8]) -> AppResult<T> {
    serde_json::from_slice::<T>(payload)
        .map_err(|error| app_error("protocol_frame_parse_failed", error.to_string()))
}

pub async fn write_json_frame<W, T>(writer: &mut W, frame: &T) -> AppResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serialize_frame(frame)?;
    if payload.len() > FRAME_MAX_BYTES {
        return Err(app_error(
            "protocol_frame_too_large",
            format!("payload too large: {}", payload.len()),
        ));
    }

    let mut header = Vec::with_capacity(5);
    header.push(MODE_JSON);
    header.extend_from_slice(&(payload.len() as u32).to_be_bytes());

    writer
        .write_all(header.as_slice())
        .await
        .map_err(io_to_error)?;
    writer
        .write_all(payload.as_slice())
        .await
        .map_err(io_to_error)?;
    writer.flush().await.map_err(io_to_error)?;
    Ok(())
}

pub async fn read_json_frame<R, T>(reader: &mut R) -> AppResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header = [0u8; 5];
    reader.read_exact(&mut header).await.map_err(io_to_error)?;

    let mode = header[0];
    if mode != MODE_JSON {
        return Err(app_error(
            "protocol_frame_mode_invalid",
            format!("invalid frame mode: {mode}"),
        ));
    }

    let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if length == 0 || length > FRAME_MAX_BYTES {
        return Err(app_error(
            "protocol_frame_length_invalid",
            format!("invalid frame length: {length}"),
        ));
    }

    let mut payload = vec![0u8; length];
    reader
        .read_exact(payload.as_mut_slice())
        .await
        .map_err(io_to_error)?;

    deserialize_frame(payload.as_slice())
}

pub fn io_to_error(error: io::Error) -> AppError {
    match error.kind() {
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => {
            AppError::new("connection_closed", "连接已断开").with_cause(error.to_string())
        }
        _ => AppError::new("protocol_io_error", "网络 I/O 错误").with_cause(error.to_string()),
    }
}
