use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::catalog_service::LocalCatalog;
use crate::app::events::SyncEventSink;
use crate::app::lock_mutex;
use crate::core::config::SyncConfig;
use crate::core::models::{GameRecord, SpeedMode, TransferState};
use crate::core::{AppError, AppResult, ResultExt};

mod control;
mod outgoing;
mod progress;
mod server;

pub use control::ActiveTransfer;

use control::TransferControl;
use outgoing::{JobContext, run_job};
use server::serve_transfer_connection;

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub peer_device_id: String,
    pub peer_address: String,
    pub peer_catalog_port: u16,
    pub peer_transfer_port: u16,
    pub remote: GameRecord,
    pub target_path: String,
}

pub struct TransferEngine {
    config: SyncConfig,
    device_id: String,
    display_name: String,
    catalog: Arc<LocalCatalog>,
    events: Arc<dyn SyncEventSink>,
    transfer_port: Arc<AtomicU16>,
    speed_mode: Arc<Mutex<SpeedMode>>,
    listener_started: AtomicBool,
    listener_task: Mutex<Option<JoinHandle<()>>>,
    control: Arc<TransferControl>,
    job_task: Mutex<Option<JoinHandle<()>>>,
}

impl TransferEngine {
    pub fn new(
        config: SyncConfig,
        device_id: String,
        display_name: String,
        catalog: Arc<LocalCatalog>,
        events: Arc<dyn SyncEventSink>,
        transfer_port: Arc<AtomicU16>,
    ) -> Self {
        let speed_mode = Arc::new(Mutex::new(config.speed_mode));
        Self {
            config,
            device_id,
            display_name,
            catalog,
            events,
            transfer_port,
            speed_mode,
            listener_started: AtomicBool::new(false),
            listener_task: Mutex::new(None),
            control: Arc::new(TransferControl::new()),
            job_task: Mutex::new(None),
        }
    }

    pub async fn start_listener(&self) -> AppResult<u16> {
        if self.listener_started.swap(true, Ordering::SeqCst) {
            return Ok(self.transfer_port.load(Ordering::SeqCst));
        }

        let preferred = self.config.transfer_port;
        let listener =
            match bind_with_fallback(preferred, self.config.transfer_port_fallback_attempts).await {
                Ok(listener) => listener,
                Err(error) => {
                    self.listener_started.store(false, Ordering::SeqCst);
                    return Err(error);
                }
            };
        let bound = match listener.local_addr() {
            Ok(address) => address.port(),
            Err(error) => {
                self.listener_started.store(false, Ordering::SeqCst);
                return Err(
                    AppError::new("transfer_listener_bind_failed", "传输服务启动失败")
                        .with_cause(error.to_string()),
                );
            }
        };
        // Discovery announces whatever port actually got bound.
        if preferred != 0 && bound != preferred {
            warn!(event = "transfer_port_fallback", preferred, bound);
        }
        self.transfer_port.store(bound, Ordering::SeqCst);
        info!(event = "transfer_listener_started", port = bound);

        let catalog = self.catalog.clone();
        let config = self.config.clone();
        let speed_mode = self.speed_mode.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(event = "transfer_connection_accepted", remote = %remote);
                        let catalog = catalog.clone();
                        let config = config.clone();
                        let speed_mode = speed_mode.clone();
                        tokio::spawn(async move {
                            if let Err(error) =
                                serve_transfer_connection(stream, catalog, config, speed_mode)
                                    .await
                            {
                                warn!(
                                    event = "transfer_connection_failed",
                                    remote = %remote,
                                    error_code = %error.code,
                                    error = %error
                                );
                            }
                        });
                    }
                    Err(error) => {
                        warn!(event = "transfer_accept_failed", error = %error);
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                }
            }
        });
        *lock_mutex(&self.listener_task, "transfer_listener_task") = Some(task);
        Ok(bound)
    }

    pub fn active_transfer(&self) -> Option<ActiveTransfer> {
        self.control.active()
    }

    // A sizing hint, not a protocol value: an active transfer picks the new
    // chunk size up at its next chunk boundary.
    pub fn set_speed_mode(&self, mode: SpeedMode) {
        *lock_mutex(&self.speed_mode, "transfer_speed_mode") = mode;
        info!(event = "transfer_speed_mode_changed", mode = ?mode);
    }

    pub fn speed_mode(&self) -> SpeedMode {
        *lock_mutex(&self.speed_mode, "transfer_speed_mode")
    }

    pub fn pause(&self) -> AppResult<()> {
        self.control.request_pause()
    }

    pub fn stop(&self) -> AppResult<()> {
        self.control.request_stop()
    }

    pub fn start(&self, request: TransferRequest) -> AppResult<()> {
        self.control
            .begin(&request.remote.app_id, &request.remote.name)?;
        info!(
            event = "transfer_job_started",
            app_id = %request.remote.app_id,
            peer = %request.peer_device_id,
            target = %request.target_path
        );
        let ctx = JobContext {
            config: self.config.clone(),
            device_id: self.device_id.clone(),
            display_name: self.display_name.clone(),
            events: self.events.clone(),
            control: self.control.clone(),
            speed_mode: self.speed_mode.clone(),
        };
        let task = tokio::spawn(run_job(ctx, request));
        *lock_mutex(&self.job_task, "transfer_job_task") = Some(task);
        Ok(())
    }

    // The sidecar has everything needed to dial the peer again; the manifest
    // exchange re-validates the build before any byte moves.
    pub fn resume(&self, state: TransferState) -> AppResult<()> {
        let request = TransferRequest {
            peer_device_id: state.peer_device_id.clone(),
            peer_address: state.peer_address.clone(),
            peer_catalog_port: state.peer_catalog_port,
            peer_transfer_port: state.peer_transfer_port,
            remote: GameRecord {
                app_id: state.app_id.clone(),
                name: state.game_name.clone(),
                build_id: state.build_id.clone(),
                last_updated_at: 0,
                size_bytes: state.total_bytes,
                install_path: None,
                installed: false,
                hidden: false,
            },
            target_path: state.target_path,
        };
        self.start(request)
    }

    pub fn shutdown(&self) {
        let _ = self.control.request_stop();
        if let Some(task) = lock_mutex(&self.job_task, "transfer_job_task").take() {
            task.abort();
        }
        if let Some(task) = lock_mutex(&self.listener_task, "transfer_listener_task").take() {
            task.abort();
        }
        self.listener_started.store(false, Ordering::SeqCst);
        info!(event = "transfer_engine_stopped");
    }
}

async fn bind_with_fallback(preferred: u16, attempts: u16) -> AppResult<TcpListener> {
    if preferred == 0 {
        return TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .with_code("transfer_listener_bind_failed", "传输服务启动失败");
    }

    let mut last_error: Option<std::io::Error> = None;
    for step in 0..=attempts {
        let Some(port) = preferred.checked_add(step) else {
            break;
        };
        match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => return Ok(listener),
            Err(error) => {
                debug!(event = "transfer_port_busy", port, error = %error);
                last_error = Some(error);
            }
        }
    }

    let cause = last_error
        .map(|error| error.to_string())
        .unwrap_or_else(|| "no usable port".to_string());
    Err(
        AppError::new("transfer_listener_bind_failed", "传输服务启动失败")
            .with_context("preferredPort", preferred.to_string())
            .with_context("attempts", ((attempts as u32) + 1).to_string())
            .with_cause(cause),
    )
}

#[cfg(test)]
#[path = "../../../tests/app/transfer_service_tests.rs"]
mod tests;
