use std::sync::{Mutex, MutexGuard};

pub mod catalog_service;
pub mod discovery_service;
pub mod events;
pub mod planning;
pub mod registry;
pub mod sync_service;
pub mod transfer_service;

pub(crate) fn lock_mutex<'a, T>(lock: &'a Mutex<T>, name: &'static str) -> MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(event = "sync_lock_poisoned", lock = name, access = "mutex");
            poisoned.into_inner()
        }
    }
}
