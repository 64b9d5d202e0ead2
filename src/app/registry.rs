use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::app::events::{SyncEvent, SyncEventSink};
use crate::app::lock_mutex;
use crate::core::models::{GameRecord, PeerRecord};

struct PeerEntry {
    record: PeerRecord,
    lost_emitted: bool,
}

pub struct PeerRegistry {
    peers: Mutex<HashMap<String, PeerEntry>>,
    events: Arc<dyn SyncEventSink>,
}

impl PeerRegistry {
    pub fn new(events: Arc<dyn SyncEventSink>) -> Self {
        Self {
            peers: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn upsert_peer(
        &self,
        device_id: &str,
        display_name: &str,
        address: &str,
        catalog_port: u16,
        transfer_port: u16,
        now_ms: i64,
    ) {
        let discovered = {
            let mut peers = lock_mutex(&self.peers, "peer_registry");
            match peers.get_mut(device_id) {
                Some(entry) => {
                    let returned = entry.lost_emitted;
                    entry.record.display_name = display_name.to_string();
                    entry.record.address = address.to_string();
                    entry.record.catalog_port = catalog_port;
                    entry.record.transfer_port = transfer_port;
                    entry.record.last_seen_at = now_ms;
                    entry.lost_emitted = false;
                    if returned {
                        info!(event = "peer_returned", device_id, address);
                        Some(entry.record.clone())
                    } else {
                        None
                    }
                }
                None => {
                    let record = PeerRecord {
                        device_id: device_id.to_string(),
                        display_name: display_name.to_string(),
                        address: address.to_string(),
                        catalog_port,
                        transfer_port,
                        last_seen_at: now_ms,
                        games: Vec::new(),
                    };
                    peers.insert(
                        device_id.to_string(),
                        PeerEntry {
                            record: record.clone(),
                            lost_emitted: false,
                        },
                    );
                    info!(event = "peer_discovered", device_id, address);
                    Some(record)
                }
            }
        };

        if let Some(peer) = discovered {
            self.events.emit(SyncEvent::PeerDiscovered { peer });
        }
    }

    pub fn set_games(&self, device_id: &str, games: Vec<GameRecord>) -> bool {
        let updated = {
            let mut peers = lock_mutex(&self.peers, "peer_registry");
            let Some(entry) = peers.get_mut(device_id) else {
                return false;
            };
            entry.record.games = games;
            debug!(
                event = "peer_games_updated",
                device_id,
                count = entry.record.games.len()
            );
            SyncEvent::PeerGamesUpdated {
                device_id: device_id.to_string(),
                games: entry.record.games.clone(),
            }
        };
        self.events.emit(updated);
        true
    }

    // Loss is edge-triggered: one event when a peer falls out of the online
    // window, then silence until it is seen again or evicted.
    pub fn sweep(&self, now_ms: i64, online_window_ms: u64, evict_after_ms: u64) {
        let mut lost = Vec::new();
        {
            let mut peers = lock_mutex(&self.peers, "peer_registry");
            peers.retain(|device_id, entry| {
                let idle_ms = now_ms.saturating_sub(entry.record.last_seen_at);
                if !entry.record.is_online(now_ms, online_window_ms) && !entry.lost_emitted {
                    entry.lost_emitted = true;
                    info!(event = "peer_lost", device_id = %device_id, idle_ms);
                    lost.push(SyncEvent::PeerLost {
                        device_id: device_id.clone(),
                        display_name: entry.record.display_name.clone(),
                    });
                }
                idle_ms < evict_after_ms as i64
            });
        }
        for event in lost {
            self.events.emit(event);
        }
    }

    pub fn get(&self, device_id: &str) -> Option<PeerRecord> {
        let peers = lock_mutex(&self.peers, "peer_registry");
        peers.get(device_id).map(|entry| entry.record.clone())
    }

    pub fn snapshot(&self) -> Vec<PeerRecord> {
        let peers = lock_mutex(&self.peers, "peer_registry");
        let mut records: Vec<PeerRecord> =
            peers.values().map(|entry| entry.record.clone()).collect();
        records.sort_by(|left, right| left.device_id.cmp(&right.device_id));
        records
    }

    pub fn online_peers(&self, now_ms: i64, online_window_ms: u64) -> Vec<PeerRecord> {
        self.snapshot()
            .into_iter()
            .filter(|record| record.is_online(now_ms, online_window_ms))
            .collect()
    }

    pub fn count(&self) -> usize {
        lock_mutex(&self.peers, "peer_registry").len()
    }
}

#[cfg(test)]
#[path = "../../tests/app/registry_tests.rs"]
mod tests;
