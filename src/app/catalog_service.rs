use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::events::{SyncEvent, SyncEventSink};
use crate::app::lock_mutex;
use crate::app::registry::PeerRegistry;
use crate::core::config::SyncConfig;
use crate::core::models::{GameRecord, PeerRecord};
use crate::core::{AppError, AppResult, ResultExt};
use crate::infrastructure::now_millis;
use crate::infrastructure::protocol::{CatalogFrame, read_json_frame, write_json_frame};

pub struct LocalCatalog {
    games: Mutex<Option<Vec<GameRecord>>>,
    hidden_app_ids: Mutex<HashSet<String>>,
}

impl LocalCatalog {
    pub fn new() -> Self {
        Self {
            games: Mutex::new(None),
            hidden_app_ids: Mutex::new(HashSet::new()),
        }
    }

    pub fn publish_games(&self, games: Vec<GameRecord>) {
        let count = games.len();
        *lock_mutex(&self.games, "local_catalog") = Some(games);
        info!(event = "local_catalog_published", count);
    }

    pub fn set_hidden_app_ids(&self, app_ids: Vec<String>) {
        let mut hidden = lock_mutex(&self.hidden_app_ids, "local_catalog_hidden");
        *hidden = app_ids.into_iter().collect();
        debug!(event = "local_catalog_hidden_updated", count = hidden.len());
    }

    pub fn published_games(&self) -> Vec<GameRecord> {
        lock_mutex(&self.games, "local_catalog")
            .clone()
            .unwrap_or_default()
    }

    fn is_shareable(&self, game: &GameRecord, hidden: &HashSet<String>) -> bool {
        game.installed
            && !game.hidden
            && !hidden.contains(&game.app_id)
            && game.install_path.is_some()
    }

    // None means the library was never scanned, which peers must be able to
    // tell apart from a scanned-but-empty catalog.
    pub fn shareable_games(&self) -> Option<Vec<GameRecord>> {
        let games = lock_mutex(&self.games, "local_catalog");
        let hidden = lock_mutex(&self.hidden_app_ids, "local_catalog_hidden");
        let published = games.as_ref()?;
        let mut shareable: Vec<GameRecord> = published
            .iter()
            .filter(|game| self.is_shareable(game, &hidden))
            .map(GameRecord::without_install_path)
            .collect();
        shareable.sort_by(|left, right| left.name.cmp(&right.name));
        Some(shareable)
    }

    pub fn serving_record(&self, app_id: &str) -> Option<GameRecord> {
        let games = lock_mutex(&self.games, "local_catalog");
        let hidden = lock_mutex(&self.hidden_app_ids, "local_catalog_hidden");
        games
            .as_ref()?
            .iter()
            .find(|game| game.app_id == app_id && self.is_shareable(game, &hidden))
            .cloned()
    }
}

impl Default for LocalCatalog {
    fn default() -> Self {
        Self::new()
    }
}

pub struct CatalogService {
    device_id: String,
    display_name: String,
    connect_timeout: Duration,
    catalog: Arc<LocalCatalog>,
    registry: Arc<PeerRegistry>,
    events: Arc<dyn SyncEventSink>,
    catalog_port: Arc<AtomicU16>,
    transfer_port: Arc<AtomicU16>,
    server_started: AtomicBool,
    server_task: Mutex<Option<JoinHandle<()>>>,
}

impl CatalogService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device_id: String,
        display_name: String,
        config: &SyncConfig,
        catalog: Arc<LocalCatalog>,
        registry: Arc<PeerRegistry>,
        events: Arc<dyn SyncEventSink>,
        catalog_port: Arc<AtomicU16>,
        transfer_port: Arc<AtomicU16>,
    ) -> Self {
        Self {
            device_id,
            display_name,
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            catalog,
            registry,
            events,
            catalog_port,
            transfer_port,
            server_started: AtomicBool::new(false),
            server_task: Mutex::new(None),
        }
    }

    pub async fn start_server(&self, port: u16) -> AppResult<u16> {
        if self.server_started.swap(true, Ordering::SeqCst) {
            return Ok(self.catalog_port.load(Ordering::SeqCst));
        }

        let listener = match TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).await {
            Ok(listener) => listener,
            Err(error) => {
                self.server_started.store(false, Ordering::SeqCst);
                return Err(AppError::new("catalog_listener_bind_failed", "目录服务启动失败")
                    .with_context("port", port.to_string())
                    .with_cause(error.to_string()));
            }
        };
        let bound = listener
            .local_addr()
            .with_code("catalog_listener_bind_failed", "目录服务启动失败")?
            .port();
        self.catalog_port.store(bound, Ordering::SeqCst);
        info!(event = "catalog_server_started", port = bound);

        let device_id = self.device_id.clone();
        let display_name = self.display_name.clone();
        let catalog = self.catalog.clone();
        let transfer_port = self.transfer_port.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, remote)) => {
                        debug!(event = "catalog_connection_accepted", remote = %remote);
                        let device_id = device_id.clone();
                        let display_name = display_name.clone();
                        let catalog = catalog.clone();
                        let transfer_port = transfer_port.clone();
                        tokio::spawn(async move {
                            if let Err(error) = serve_catalog_connection(
                                stream,
                                device_id,
                                display_name,
                                catalog,
                                transfer_port,
                            )
                            .await
                            {
                                warn!(
                                    event = "catalog_connection_failed",
                                    remote = %remote,
                                    error_code = %error.code,
                                    error = %error
                                );
                            }
                        });
                    }
                    Err(error) => {
                        warn!(event = "catalog_accept_failed", error = %error);
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                }
            }
        });
        *lock_mutex(&self.server_task, "catalog_server_task") = Some(task);
        Ok(bound)
    }

    pub fn stop_server(&self) {
        if let Some(task) = lock_mutex(&self.server_task, "catalog_server_task").take() {
            task.abort();
        }
        self.server_started.store(false, Ordering::SeqCst);
        info!(event = "catalog_server_stopped");
    }

    pub async fn fetch_catalog(&self, address: &str, port: u16) -> AppResult<PeerRecord> {
        match self.fetch_catalog_inner(address, port).await {
            Ok(peer) => Ok(peer),
            Err(error) => {
                warn!(
                    event = "catalog_fetch_failed",
                    address,
                    error_code = %error.code,
                    error = %error
                );
                self.events.emit(SyncEvent::ConnectionError {
                    address: address.to_string(),
                    detail: error.public_text(),
                });
                Err(error)
            }
        }
    }

    // The response carries the server's identity and transfer port, so a
    // direct-address fetch can register a peer broadcast never reached.
    async fn fetch_catalog_inner(&self, address: &str, port: u16) -> AppResult<PeerRecord> {
        let target = format!("{address}:{port}");
        let mut stream =
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(target.as_str()))
                .await
            {
                Ok(connected) => connected
                    .with_code("catalog_connect_failed", "连接目录服务失败")
                    .with_ctx("address", target.clone())?,
                Err(_) => {
                    return Err(AppError::new("catalog_connect_timeout", "连接目录服务超时")
                        .with_context("address", target));
                }
            };

        let request = CatalogFrame::CatalogRequest {
            device_id: self.device_id.clone(),
            display_name: self.display_name.clone(),
        };
        write_json_frame(&mut stream, &request).await?;
        let response: CatalogFrame = read_json_frame(&mut stream).await?;

        let now = now_millis();
        match response {
            CatalogFrame::Catalog {
                device_id,
                display_name,
                transfer_port,
                games,
            } => {
                info!(
                    event = "catalog_received",
                    device_id,
                    address,
                    count = games.len()
                );
                self.registry
                    .upsert_peer(&device_id, &display_name, address, port, transfer_port, now);
                self.registry.set_games(&device_id, games);
                self.synthesized_peer(&device_id)
            }
            CatalogFrame::NotScanned {
                device_id,
                display_name,
                transfer_port,
            } => {
                info!(event = "catalog_not_scanned", device_id, address);
                self.registry
                    .upsert_peer(&device_id, &display_name, address, port, transfer_port, now);
                self.events.emit(SyncEvent::GamesRequestedButEmpty {
                    device_id: device_id.clone(),
                });
                self.synthesized_peer(&device_id)
            }
            CatalogFrame::Error { code, message } => Err(AppError::new(code, message)),
            CatalogFrame::CatalogRequest { .. } => {
                Err(AppError::new("catalog_response_invalid", "目录响应无效"))
            }
        }
    }

    fn synthesized_peer(&self, device_id: &str) -> AppResult<PeerRecord> {
        self.registry.get(device_id).ok_or_else(|| {
            AppError::new("catalog_peer_register_failed", "记录对端设备失败")
                .with_context("deviceId", device_id)
        })
    }
}

async fn serve_catalog_connection(
    mut stream: TcpStream,
    device_id: String,
    display_name: String,
    catalog: Arc<LocalCatalog>,
    transfer_port: Arc<AtomicU16>,
) -> AppResult<()> {
    let frame: CatalogFrame = read_json_frame(&mut stream).await?;
    let CatalogFrame::CatalogRequest {
        device_id: requester_id,
        ..
    } = frame
    else {
        let rejection = CatalogFrame::Error {
            code: "catalog_request_invalid".to_string(),
            message: "目录请求无效".to_string(),
        };
        write_json_frame(&mut stream, &rejection).await?;
        return Err(AppError::new("catalog_request_invalid", "目录请求无效"));
    };
    debug!(event = "catalog_request_received", requester = %requester_id);

    let transfer_port = transfer_port.load(Ordering::SeqCst);
    let response = match catalog.shareable_games() {
        Some(games) => CatalogFrame::Catalog {
            device_id,
            display_name,
            transfer_port,
            games,
        },
        None => CatalogFrame::NotScanned {
            device_id,
            display_name,
            transfer_port,
        },
    };
    write_json_frame(&mut stream, &response).await
}

#[cfg(test)]
#[path = "../../tests/app/catalog_service_tests.rs"]
mod tests;
