use super::*;

fn unique_temp_dir(label: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "lansync-log-{}-{}",
        label,
        uuid::Uuid::new_v4()
    ));
    fs::create_dir_all(&dir).expect("create temp log dir");
    dir
}

#[test]
fn cleanup_should_remove_only_expired_log_files() {
    let log_dir = unique_temp_dir("cleanup");
    let stale = log_dir.join("lansync.2026-08-01.log");
    fs::write(&stale, b"old entry").expect("write stale log");
    let keep_dir = log_dir.join("archive");
    fs::create_dir_all(&keep_dir).expect("create nested dir");
    std::thread::sleep(Duration::from_millis(30));

    // keep_days of zero puts the cutoff at "now", so the file just written
    // already counts as expired.
    cleanup_expired_logs(&log_dir, 0);
    assert!(!stale.exists());
    assert!(keep_dir.exists());

    let fresh = log_dir.join("lansync.2026-08-24.log");
    fs::write(&fresh, b"new entry").expect("write fresh log");
    cleanup_expired_logs(&log_dir, DEFAULT_KEEP_DAYS);
    assert!(fresh.exists());

    let _ = fs::remove_dir_all(&log_dir);
}

#[test]
fn resolve_log_level_should_fall_back_to_info() {
    let level = resolve_log_level();
    match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => assert_eq!(level, value),
        _ => assert_eq!(level, DEFAULT_LOG_LEVEL),
    }
}

#[test]
fn init_logging_should_create_log_dir_and_be_reentrant() {
    let data_dir = unique_temp_dir("init");

    let guard = init_logging(&data_dir).expect("initialize logging");
    assert_eq!(guard.log_dir(), data_dir.join("logs").as_path());
    assert!(guard.log_dir().is_dir());
    assert!(!guard.level().is_empty());

    // A second call must not fight over the global subscriber.
    let again = init_logging(&data_dir).expect("re-initialize logging");
    assert_eq!(again.log_dir(), guard.log_dir());

    tracing::info!(event = "logging_smoke", probe = true);

    let _ = fs::remove_dir_all(&data_dir);
}
