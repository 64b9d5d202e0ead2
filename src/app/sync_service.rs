use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU16;

use tracing::info;
use uuid::Uuid;

use crate::app::catalog_service::{CatalogService, LocalCatalog};
use crate::app::discovery_service::DiscoveryService;
use crate::app::events::SyncEventSink;
use crate::app::planning::plan_sync_jobs;
use crate::app::registry::PeerRegistry;
use crate::app::transfer_service::{ActiveTransfer, TransferEngine, TransferRequest};
use crate::core::config::SyncConfig;
use crate::core::{AppError, AppResult};
use crate::core::models::{GameRecord, PeerRecord, SpeedMode, SyncJob, TransferState};
use crate::infrastructure::now_millis;
use crate::infrastructure::runtime::blocking::run_blocking;
use crate::infrastructure::state_store::find_incomplete_transfers;

pub struct SyncService {
    config: SyncConfig,
    device_id: String,
    display_name: String,
    registry: Arc<PeerRegistry>,
    catalog: Arc<LocalCatalog>,
    catalog_service: Arc<CatalogService>,
    discovery: Arc<DiscoveryService>,
    engine: Arc<TransferEngine>,
}

impl SyncService {
    pub fn new(config: SyncConfig, events: Arc<dyn SyncEventSink>) -> Self {
        let config = config.normalized();
        let device_id = Uuid::new_v4().to_string();
        let display_name = resolve_device_name(config.device_name.as_deref(), &device_id);

        let registry = Arc::new(PeerRegistry::new(events.clone()));
        let catalog = Arc::new(LocalCatalog::new());
        let catalog_port = Arc::new(AtomicU16::new(config.catalog_port));
        let transfer_port = Arc::new(AtomicU16::new(config.transfer_port));

        let catalog_service = Arc::new(CatalogService::new(
            device_id.clone(),
            display_name.clone(),
            &config,
            catalog.clone(),
            registry.clone(),
            events.clone(),
            catalog_port.clone(),
            transfer_port.clone(),
        ));
        let engine = Arc::new(TransferEngine::new(
            config.clone(),
            device_id.clone(),
            display_name.clone(),
            catalog.clone(),
            events,
            transfer_port.clone(),
        ));
        let discovery = Arc::new(DiscoveryService::new(
            config.clone(),
            device_id.clone(),
            display_name.clone(),
            registry.clone(),
            catalog_port,
            transfer_port,
        ));

        info!(
            event = "sync_service_created",
            device_id = %device_id,
            display_name = %display_name
        );

        Self {
            config,
            device_id,
            display_name,
            registry,
            catalog,
            catalog_service,
            discovery,
            engine,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    // The transfer listener comes up first so discovery and the catalog
    // announce the port that actually got bound, fallback included.
    pub async fn start(&self) -> AppResult<()> {
        self.engine.start_listener().await?;
        self.catalog_service
            .start_server(self.config.catalog_port)
            .await?;
        self.discovery.start().await?;
        info!(event = "sync_service_started", device_id = %self.device_id);
        Ok(())
    }

    pub fn shutdown(&self) {
        self.discovery.stop();
        self.catalog_service.stop_server();
        self.engine.shutdown();
        info!(event = "sync_service_stopped", device_id = %self.device_id);
    }

    pub fn publish_games(&self, games: Vec<GameRecord>) {
        self.catalog.publish_games(games);
    }

    pub fn set_hidden_app_ids(&self, app_ids: Vec<String>) {
        self.catalog.set_hidden_app_ids(app_ids);
    }

    pub fn peers(&self) -> Vec<PeerRecord> {
        self.registry.snapshot()
    }

    pub fn online_peers(&self) -> Vec<PeerRecord> {
        self.registry
            .online_peers(now_millis(), self.config.online_window_ms)
    }

    pub async fn scan_network(&self) -> AppResult<usize> {
        self.discovery.scan_network().await
    }

    // Entry point for networks where broadcast is blocked: a successful
    // catalog handshake registers the peer as if it had been discovered.
    pub async fn connect_by_address(&self, address: &str) -> AppResult<PeerRecord> {
        self.catalog_service
            .fetch_catalog(address, self.config.catalog_port)
            .await
    }

    pub async fn refresh_peer_games(&self, device_id: &str) -> AppResult<()> {
        let peer = self.require_peer(device_id)?;
        self.catalog_service
            .fetch_catalog(&peer.address, peer.catalog_port)
            .await
            .map(|_| ())
    }

    pub fn plan_jobs(&self, device_id: &str) -> AppResult<Vec<SyncJob>> {
        let peer = self.require_peer(device_id)?;
        Ok(plan_sync_jobs(&self.catalog.published_games(), &peer))
    }

    pub fn start_sync(&self, job: &SyncJob, target_path: &str) -> AppResult<()> {
        self.start_transfer_to(&job.peer_device_id, &job.remote, target_path)
    }

    // Fresh install: every manifest file will be fetched into target_path.
    pub fn request_download(
        &self,
        device_id: &str,
        remote: &GameRecord,
        target_path: &str,
    ) -> AppResult<()> {
        self.start_transfer_to(device_id, remote, target_path)
    }

    // Update of an existing install: the manifest diff against the local
    // install directory decides what actually moves.
    pub fn request_transfer(
        &self,
        device_id: &str,
        remote: &GameRecord,
        local: &GameRecord,
    ) -> AppResult<()> {
        let target_path = local.install_path.as_deref().ok_or_else(|| {
            AppError::new("transfer_target_missing", "本地安装路径缺失")
                .with_context("appId", local.app_id.clone())
        })?;
        self.start_transfer_to(device_id, remote, target_path)
    }

    fn start_transfer_to(
        &self,
        device_id: &str,
        remote: &GameRecord,
        target_path: &str,
    ) -> AppResult<()> {
        let peer = self.require_peer(device_id)?;
        let request = TransferRequest {
            peer_device_id: peer.device_id,
            peer_address: peer.address,
            peer_catalog_port: peer.catalog_port,
            peer_transfer_port: peer.transfer_port,
            remote: remote.clone(),
            target_path: target_path.to_string(),
        };
        self.engine.start(request)
    }

    // A peer that is currently known overrides the address recorded in the
    // sidecar, in case its DHCP lease changed while the transfer sat paused.
    pub fn resume_transfer(&self, mut state: TransferState) -> AppResult<()> {
        if let Some(peer) = self.registry.get(&state.peer_device_id) {
            state.peer_address = peer.address;
            state.peer_catalog_port = peer.catalog_port;
            state.peer_transfer_port = peer.transfer_port;
        }
        self.engine.resume(state)
    }

    pub fn pause_transfer(&self) -> AppResult<()> {
        self.engine.pause()
    }

    pub fn stop_transfer(&self) -> AppResult<()> {
        self.engine.stop()
    }

    pub fn active_transfer(&self) -> Option<ActiveTransfer> {
        self.engine.active_transfer()
    }

    pub fn set_speed_mode(&self, mode: SpeedMode) {
        self.engine.set_speed_mode(mode);
    }

    pub fn speed_mode(&self) -> SpeedMode {
        self.engine.speed_mode()
    }

    pub async fn find_incomplete_transfers(
        &self,
        roots: Vec<PathBuf>,
    ) -> AppResult<Vec<TransferState>> {
        run_blocking("transfer_state_scan", move || {
            Ok(find_incomplete_transfers(&roots))
        })
        .await
    }

    fn require_peer(&self, device_id: &str) -> AppResult<PeerRecord> {
        self.registry.get(device_id).ok_or_else(|| {
            AppError::new("peer_not_found", "未找到目标设备").with_context("deviceId", device_id)
        })
    }
}

fn resolve_device_name(configured: Option<&str>, device_id: &str) -> String {
    if let Some(value) = configured {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Ok(value) = std::env::var("HOSTNAME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    if let Ok(value) = std::env::var("COMPUTERNAME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    let short_id: String = device_id.chars().take(8).collect();
    format!("lansync-{short_id}")
}
