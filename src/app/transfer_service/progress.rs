use std::sync::Arc;

use crate::app::events::{SyncEvent, SyncEventSink};
use crate::infrastructure::now_millis;

pub struct ProgressReporter {
    events: Arc<dyn SyncEventSink>,
    app_id: String,
    game_name: String,
    total_bytes: u64,
    min_interval_ms: i64,
    // Speed is averaged over this run only, so a resumed transfer does not
    // count bytes and wall time from before the pause.
    baseline_bytes: u64,
    run_started_at: i64,
    last_emit_ms: i64,
    current_file: Option<String>,
}

impl ProgressReporter {
    pub fn new(
        events: Arc<dyn SyncEventSink>,
        app_id: String,
        game_name: String,
        total_bytes: u64,
        min_interval_ms: u64,
        baseline_bytes: u64,
    ) -> Self {
        Self {
            events,
            app_id,
            game_name,
            total_bytes,
            min_interval_ms: min_interval_ms as i64,
            baseline_bytes,
            run_started_at: now_millis(),
            last_emit_ms: 0,
            current_file: None,
        }
    }

    pub fn set_current_file(&mut self, relative_path: &str) {
        if self.current_file.as_deref() != Some(relative_path) {
            self.current_file = Some(relative_path.to_string());
        }
    }

    pub fn clear_current_file(&mut self) {
        self.current_file = None;
    }

    pub fn report(&mut self, transferred_bytes: u64) {
        let now = now_millis();
        if self.last_emit_ms != 0 && now - self.last_emit_ms < self.min_interval_ms {
            return;
        }
        self.emit_at(now, transferred_bytes);
    }

    pub fn report_final(&mut self, transferred_bytes: u64) {
        self.emit_at(now_millis(), transferred_bytes);
    }

    fn emit_at(&mut self, now: i64, transferred_bytes: u64) {
        let run_bytes = transferred_bytes.saturating_sub(self.baseline_bytes);
        let speed = calculate_speed(run_bytes, self.run_started_at, now);
        let eta_seconds = estimate_eta(self.total_bytes, transferred_bytes, speed);
        self.events.emit(SyncEvent::TransferProgress {
            app_id: self.app_id.clone(),
            game_name: self.game_name.clone(),
            current_file: self.current_file.clone(),
            transferred_bytes,
            total_bytes: self.total_bytes,
            speed_bytes_per_sec: speed,
            eta_seconds,
        });
        self.last_emit_ms = now;
    }
}

fn calculate_speed(run_bytes: u64, started_at: i64, now: i64) -> u64 {
    let elapsed_ms = (now - started_at).max(1) as u64;
    run_bytes.saturating_mul(1000) / elapsed_ms
}

fn estimate_eta(total_bytes: u64, transferred_bytes: u64, speed_bps: u64) -> Option<u64> {
    if speed_bps == 0 || transferred_bytes >= total_bytes {
        return None;
    }
    Some((total_bytes - transferred_bytes).div_ceil(speed_bps))
}
