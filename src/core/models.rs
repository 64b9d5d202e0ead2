use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub device_id: String,
    pub display_name: String,
    pub address: String,
    pub catalog_port: u16,
    pub transfer_port: u16,
    pub last_seen_at: i64,
    #[serde(default)]
    pub games: Vec<GameRecord>,
}

impl PeerRecord {
    pub fn is_online(&self, now_ms: i64, online_window_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_seen_at) < online_window_ms as i64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub app_id: String,
    pub name: String,
    pub build_id: String,
    pub last_updated_at: i64,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_path: Option<String>,
    pub installed: bool,
    pub hidden: bool,
}

impl GameRecord {
    pub fn version_cmp(&self, other: &GameRecord) -> Ordering {
        match self.build_id.cmp(&other.build_id) {
            Ordering::Equal => self.last_updated_at.cmp(&other.last_updated_at),
            ordering => ordering,
        }
    }

    pub fn is_newer_than(&self, other: &GameRecord) -> bool {
        self.version_cmp(other) == Ordering::Greater
    }

    // Install paths stay on the machine that owns them.
    pub fn without_install_path(&self) -> GameRecord {
        let mut record = self.clone();
        record.install_path = None;
        record
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncJobKind {
    NewDownload,
    Update,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncJob {
    pub kind: SyncJobKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<GameRecord>,
    pub remote: GameRecord,
    pub peer_device_id: String,
    pub peer_display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeedMode {
    Wired,
    Wireless,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedFile {
    pub relative_path: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingFile {
    pub relative_path: String,
    pub size_bytes: u64,
    pub transferred_bytes: u64,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferState {
    pub app_id: String,
    pub game_name: String,
    pub target_path: String,
    pub peer_device_id: String,
    pub peer_address: String,
    pub peer_catalog_port: u16,
    pub peer_transfer_port: u16,
    pub build_id: String,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    #[serde(default)]
    pub completed_files: Vec<CompletedFile>,
    #[serde(default)]
    pub pending_files: Vec<PendingFile>,
    pub started_at: i64,
    pub updated_at: i64,
}

impl TransferState {
    pub fn accounted_bytes(&self) -> u64 {
        let completed: u64 = self.completed_files.iter().map(|file| file.size_bytes).sum();
        let pending: u64 = self
            .pending_files
            .iter()
            .map(|file| file.transferred_bytes)
            .sum();
        completed.saturating_add(pending)
    }

    pub fn refresh_accounting(&mut self) {
        self.transferred_bytes = self.accounted_bytes();
    }

    pub fn is_complete(&self) -> bool {
        self.pending_files.is_empty()
    }

    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.transferred_bytes)
    }
}
