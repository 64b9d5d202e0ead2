use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::info;

use crate::app::lock_mutex;
use crate::core::{AppError, AppResult};

#[derive(Debug, Clone)]
pub struct ActiveTransfer {
    pub app_id: String,
    pub game_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    Paused,
    Stopped,
}

pub struct TransferControl {
    active: Mutex<Option<ActiveTransfer>>,
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
}

impl TransferControl {
    pub fn new() -> Self {
        Self {
            active: Mutex::new(None),
            pause_requested: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
        }
    }

    pub fn begin(&self, app_id: &str, game_name: &str) -> AppResult<()> {
        let mut active = lock_mutex(&self.active, "transfer_active");
        if let Some(current) = active.as_ref() {
            return Err(AppError::new("transfer_already_active", "已有进行中的传输")
                .with_context("activeAppId", current.app_id.clone()));
        }
        *active = Some(ActiveTransfer {
            app_id: app_id.to_string(),
            game_name: game_name.to_string(),
        });
        self.pause_requested.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn finish(&self) {
        *lock_mutex(&self.active, "transfer_active") = None;
        self.pause_requested.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub fn active(&self) -> Option<ActiveTransfer> {
        lock_mutex(&self.active, "transfer_active").clone()
    }

    pub fn request_pause(&self) -> AppResult<()> {
        if lock_mutex(&self.active, "transfer_active").is_none() {
            return Err(AppError::new("transfer_not_active", "当前没有进行中的传输"));
        }
        self.pause_requested.store(true, Ordering::SeqCst);
        info!(event = "transfer_pause_requested");
        Ok(())
    }

    pub fn request_stop(&self) -> AppResult<()> {
        if lock_mutex(&self.active, "transfer_active").is_none() {
            return Err(AppError::new("transfer_not_active", "当前没有进行中的传输"));
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        info!(event = "transfer_stop_requested");
        Ok(())
    }

    // Stop wins when both arrive before the next chunk boundary.
    pub fn halt_reason(&self) -> Option<HaltReason> {
        if self.stop_requested.load(Ordering::SeqCst) {
            return Some(HaltReason::Stopped);
        }
        if self.pause_requested.load(Ordering::SeqCst) {
            return Some(HaltReason::Paused);
        }
        None
    }
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}
