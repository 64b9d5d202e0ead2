pub mod discovery;
pub mod logging;
pub mod manifest;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod state_store;

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|value| value.as_millis() as i64)
        .unwrap_or_default()
}
