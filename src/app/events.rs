use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::core::models::{GameRecord, PeerRecord};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum SyncEvent {
    PeerDiscovered {
        peer: PeerRecord,
    },
    PeerLost {
        device_id: String,
        display_name: String,
    },
    PeerGamesUpdated {
        device_id: String,
        games: Vec<GameRecord>,
    },
    GamesRequestedButEmpty {
        device_id: String,
    },
    ConnectionError {
        address: String,
        detail: String,
    },
    TransferProgress {
        app_id: String,
        game_name: String,
        current_file: Option<String>,
        transferred_bytes: u64,
        total_bytes: u64,
        speed_bytes_per_sec: u64,
        eta_seconds: Option<u64>,
    },
    TransferStopped {
        app_id: String,
        paused: bool,
    },
    TransferCompleted {
        app_id: String,
        game_name: String,
        target_path: String,
    },
    TransferFailed {
        app_id: String,
        game_name: String,
        error: String,
    },
}

impl SyncEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PeerDiscovered { .. } => "peer_discovered",
            Self::PeerLost { .. } => "peer_lost",
            Self::PeerGamesUpdated { .. } => "peer_games_updated",
            Self::GamesRequestedButEmpty { .. } => "games_requested_but_empty",
            Self::ConnectionError { .. } => "connection_error",
            Self::TransferProgress { .. } => "transfer_progress",
            Self::TransferStopped { .. } => "transfer_stopped",
            Self::TransferCompleted { .. } => "transfer_completed",
            Self::TransferFailed { .. } => "transfer_failed",
        }
    }
}

pub trait SyncEventSink: Send + Sync + 'static {
    fn emit(&self, event: SyncEvent);
}

pub struct ChannelSyncEventSink {
    sender: mpsc::UnboundedSender<SyncEvent>,
}

impl ChannelSyncEventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl SyncEventSink for ChannelSyncEventSink {
    fn emit(&self, event: SyncEvent) {
        let kind = event.kind();
        if self.sender.send(event).is_err() {
            warn!(event = "sync_event_dropped", kind);
        }
    }
}

pub struct NoopSyncEventSink;

impl SyncEventSink for NoopSyncEventSink {
    fn emit(&self, _event: SyncEvent) {}
}
