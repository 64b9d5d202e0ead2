use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{Builder as RollingBuilder, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::core::{AppResult, ResultExt};

const DEFAULT_KEEP_DAYS: u64 = 7;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct LoggingGuard {
    log_dir: PathBuf,
    level: String,
}

impl LoggingGuard {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn level(&self) -> &str {
        &self.level
    }
}

fn worker_guard_slot() -> &'static Mutex<Option<WorkerGuard>> {
    static SLOT: OnceLock<Mutex<Option<WorkerGuard>>> = OnceLock::new();
    SLOT.get_or_init(|| Mutex::new(None))
}

pub fn resolve_log_level() -> String {
    std::env::var("RUST_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

pub fn init_logging(data_dir: &Path) -> AppResult<LoggingGuard> {
    let log_dir = data_dir.join("logs");
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("创建日志目录失败: {}", log_dir.display()))
        .with_code("log_dir_create_failed", "创建日志目录失败")
        .with_ctx("logDir", log_dir.display().to_string())?;
    cleanup_expired_logs(&log_dir, DEFAULT_KEEP_DAYS);

    let file_appender = RollingBuilder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("lansync")
        .filename_suffix("log")
        .build(&log_dir)
        .with_context(|| format!("创建日志写入器失败: {}", log_dir.display()))
        .with_code("log_appender_create_failed", "创建日志写入器失败")
        .with_ctx("logDir", log_dir.display().to_string())?;
    let (file_writer, worker_guard) = tracing_appender::non_blocking(file_appender);

    if let Ok(mut slot) = worker_guard_slot().lock() {
        *slot = Some(worker_guard);
    }

    let level = resolve_log_level();
    if !tracing::dispatcher::has_been_set() {
        let env_filter = EnvFilter::new(level.clone());
        let file_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(file_writer)
            .with_current_span(false)
            .with_span_list(false);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer);
        #[cfg(debug_assertions)]
        let subscriber = subscriber.with(
            tracing_subscriber::fmt::layer()
                .compact()
                .with_ansi(true)
                .with_target(true),
        );

        subscriber
            .try_init()
            .with_context(|| format!("初始化日志订阅器失败: level={level}"))
            .with_code("log_subscriber_init_failed", "初始化日志订阅器失败")
            .with_ctx("logLevel", level.clone())?;
    }

    Ok(LoggingGuard { log_dir, level })
}

fn cleanup_expired_logs(log_dir: &Path, keep_days: u64) {
    let Ok(entries) = fs::read_dir(log_dir) else {
        return;
    };
    let cutoff = SystemTime::now()
        .checked_sub(Duration::from_secs(keep_days * 24 * 60 * 60))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let expired = entry
            .metadata()
            .and_then(|meta| meta.modified())
            .map(|modified| modified < cutoff)
            .unwrap_or(false);
        if expired && let Err(error) = fs::remove_file(&path) {
            tracing::warn!(
                event = "log_cleanup_remove_failed",
                path = path.display().to_string(),
                error = error.to_string()
            );
        }
    }
}

#[cfg(test)]
#[path = "../../tests/infrastructure/logging_tests.rs"]
mod tests;
