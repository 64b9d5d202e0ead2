pub mod app;
pub mod core;
pub mod infrastructure;

pub use app::events::{ChannelSyncEventSink, NoopSyncEventSink, SyncEvent, SyncEventSink};
pub use app::sync_service::SyncService;
pub use app::transfer_service::{ActiveTransfer, TransferRequest};
pub use crate::core::config::SyncConfig;
pub use crate::core::errors::{AppError, AppResult, ResultExt};
pub use crate::core::models::{
    GameRecord, PeerRecord, SpeedMode, SyncJob, SyncJobKind, TransferState,
};
pub use infrastructure::logging::{LoggingGuard, init_logging};
