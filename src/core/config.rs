use crate::core::models::SpeedMode;
use serde::{Deserialize, Serialize};

pub const DEFAULT_DISCOVERY_PORT: u16 = 45677;
pub const DEFAULT_CATALOG_PORT: u16 = 45678;
pub const DEFAULT_TRANSFER_PORT: u16 = 45679;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    pub device_name: Option<String>,
    pub discovery_port: u16,
    pub catalog_port: u16,
    pub transfer_port: u16,
    pub transfer_port_fallback_attempts: u16,
    pub announce_interval_ms: u64,
    pub scan_window_ms: u64,
    pub online_window_ms: u64,
    pub evict_after_ms: u64,
    pub sweep_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub progress_interval_ms: u64,
    pub state_flush_interval_ms: u64,
    pub file_retry_limit: u8,
    pub speed_mode: SpeedMode,
    pub wired_chunk_bytes: u64,
    pub wireless_chunk_bytes: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_name: None,
            discovery_port: DEFAULT_DISCOVERY_PORT,
            catalog_port: DEFAULT_CATALOG_PORT,
            transfer_port: DEFAULT_TRANSFER_PORT,
            transfer_port_fallback_attempts: 16,
            announce_interval_ms: 3_000,
            scan_window_ms: 2_000,
            online_window_ms: 30_000,
            evict_after_ms: 120_000,
            sweep_interval_ms: 2_000,
            connect_timeout_ms: 5_000,
            progress_interval_ms: 100,
            state_flush_interval_ms: 1_000,
            file_retry_limit: 3,
            speed_mode: SpeedMode::Wireless,
            wired_chunk_bytes: 1_024 * 1_024,
            wireless_chunk_bytes: 256 * 1_024,
        }
    }
}

impl SyncConfig {
    pub fn normalized(mut self) -> Self {
        self.transfer_port_fallback_attempts = self.transfer_port_fallback_attempts.clamp(0, 128);
        self.announce_interval_ms = self.announce_interval_ms.clamp(500, 60_000);
        self.scan_window_ms = self.scan_window_ms.clamp(100, 30_000);
        self.online_window_ms = self.online_window_ms.clamp(5_000, 600_000);
        // The eviction window can never undercut the online window, otherwise
        // a peer would be removed before PeerLost fires.
        self.evict_after_ms = self.evict_after_ms.clamp(self.online_window_ms, 3_600_000);
        self.sweep_interval_ms = self.sweep_interval_ms.clamp(250, 30_000);
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(500, 60_000);
        self.progress_interval_ms = self.progress_interval_ms.clamp(50, 5_000);
        self.state_flush_interval_ms = self.state_flush_interval_ms.clamp(200, 30_000);
        self.file_retry_limit = self.file_retry_limit.clamp(1, 10);
        self.wired_chunk_bytes = self.wired_chunk_bytes.clamp(64 * 1_024, 8 * 1_024 * 1_024);
        self.wireless_chunk_bytes = self
            .wireless_chunk_bytes
            .clamp(16 * 1_024, 4 * 1_024 * 1_024);
        self
    }

    pub fn chunk_bytes(&self, mode: SpeedMode) -> u64 {
        match mode {
            SpeedMode::Wired => self.wired_chunk_bytes,
            SpeedMode::Wireless => self.wireless_chunk_bytes,
        }
    }
}
