use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::app::lock_mutex;
use crate::app::registry::PeerRegistry;
use crate::core::AppResult;
use crate::core::config::SyncConfig;
use crate::infrastructure::discovery::{
    ANNOUNCE_BUFFER_BYTES, AnnouncePacket, bind_announce_socket, bind_listen_socket, decode_packet,
    send_announce,
};
use crate::infrastructure::now_millis;

pub struct DiscoveryService {
    config: SyncConfig,
    device_id: String,
    display_name: String,
    registry: Arc<PeerRegistry>,
    catalog_port: Arc<AtomicU16>,
    transfer_port: Arc<AtomicU16>,
    running: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiscoveryService {
    pub fn new(
        config: SyncConfig,
        device_id: String,
        display_name: String,
        registry: Arc<PeerRegistry>,
        catalog_port: Arc<AtomicU16>,
        transfer_port: Arc<AtomicU16>,
    ) -> Self {
        Self {
            config,
            device_id,
            display_name,
            registry,
            catalog_port,
            transfer_port,
            running: Arc::new(AtomicBool::new(false)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn make_packet(&self) -> AnnouncePacket {
        AnnouncePacket {
            device_id: self.device_id.clone(),
            display_name: self.display_name.clone(),
            catalog_port: self.catalog_port.load(Ordering::SeqCst),
            transfer_port: self.transfer_port.load(Ordering::SeqCst),
            ts: now_millis(),
        }
    }

    // Sockets are bound before any task is spawned so a dead port fails the
    // call instead of a background loop.
    pub async fn start(&self) -> AppResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let announce_socket = match bind_announce_socket().await {
            Ok(socket) => socket,
            Err(error) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };
        let listen_socket = match bind_listen_socket(self.config.discovery_port).await {
            Ok(socket) => socket,
            Err(error) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(error);
            }
        };
        info!(event = "discovery_started", port = self.config.discovery_port);

        let mut tasks = Vec::with_capacity(3);

        let running = self.running.clone();
        let device_id = self.device_id.clone();
        let display_name = self.display_name.clone();
        let catalog_port = self.catalog_port.clone();
        let transfer_port = self.transfer_port.clone();
        let announce_port = self.config.discovery_port;
        let announce_interval = Duration::from_millis(self.config.announce_interval_ms);
        tasks.push(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                let packet = AnnouncePacket {
                    device_id: device_id.clone(),
                    display_name: display_name.clone(),
                    catalog_port: catalog_port.load(Ordering::SeqCst),
                    transfer_port: transfer_port.load(Ordering::SeqCst),
                    ts: now_millis(),
                };
                if let Err(error) = send_announce(&announce_socket, announce_port, &packet).await {
                    warn!(
                        event = "discovery_announce_failed",
                        error_code = %error.code,
                        error = %error
                    );
                }
                tokio::time::sleep(announce_interval).await;
            }
        }));

        let running = self.running.clone();
        let registry = self.registry.clone();
        let own_device_id = self.device_id.clone();
        tasks.push(tokio::spawn(async move {
            let mut buffer = [0u8; ANNOUNCE_BUFFER_BYTES];
            while running.load(Ordering::SeqCst) {
                tokio::select! {
                    received = listen_socket.recv_from(&mut buffer) => match received {
                        Ok((count, remote)) => {
                            let Some(packet) = decode_packet(&buffer[..count]) else {
                                continue;
                            };
                            apply_packet(&registry, &own_device_id, packet, remote.ip().to_string());
                        }
                        Err(error) => {
                            warn!(event = "discovery_recv_failed", error = %error);
                            tokio::time::sleep(Duration::from_millis(250)).await;
                        }
                    },
                    _ = tokio::time::sleep(Duration::from_millis(300)) => {}
                }
            }
        }));

        let running = self.running.clone();
        let registry = self.registry.clone();
        let sweep_interval = Duration::from_millis(self.config.sweep_interval_ms);
        let online_window_ms = self.config.online_window_ms;
        let evict_after_ms = self.config.evict_after_ms;
        tasks.push(tokio::spawn(async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(sweep_interval).await;
                registry.sweep(now_millis(), online_window_ms, evict_after_ms);
            }
        }));

        *lock_mutex(&self.tasks, "discovery_tasks") = tasks;
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut tasks = lock_mutex(&self.tasks, "discovery_tasks");
        for task in tasks.drain(..) {
            task.abort();
        }
        info!(event = "discovery_stopped");
    }

    // One announce outside the normal cadence so peers refresh this device
    // and answer with their own announces, then a short wait to collect them.
    // The send uses a throwaway socket so the announce loop keeps exclusive
    // ownership of its own; a send failure degrades to a warning.
    pub async fn scan_network(&self) -> AppResult<usize> {
        let socket = bind_announce_socket().await?;
        let packet = self.make_packet();
        if let Err(error) = send_announce(&socket, self.config.discovery_port, &packet).await {
            warn!(
                event = "discovery_scan_announce_failed",
                error_code = %error.code,
                error = %error
            );
        }
        tokio::time::sleep(Duration::from_millis(self.config.scan_window_ms)).await;

        let found = self.registry.count();
        debug!(event = "discovery_scan_finished", peers = found);
        Ok(found)
    }
}

fn apply_packet(
    registry: &PeerRegistry,
    own_device_id: &str,
    packet: AnnouncePacket,
    source_address: String,
) -> bool {
    if packet.device_id == own_device_id {
        return false;
    }
    registry.upsert_peer(
        &packet.device_id,
        &packet.display_name,
        &source_address,
        packet.catalog_port,
        packet.transfer_port,
        now_millis(),
    );
    true
}

#[cfg(test)]
#[path = "../../tests/app/discovery_service_tests.rs"]
mod tests;
