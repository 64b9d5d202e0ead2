use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;

use crate::core::{AppResult, ResultExt};

pub const ANNOUNCE_BUFFER_BYTES: usize = 2048;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncePacket {
    pub device_id: String,
    pub display_name: String,
    pub catalog_port: u16,
    pub transfer_port: u16,
    pub ts: i64,
}

pub fn broadcast_target(port: u16) -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, port))
}

pub async fn bind_announce_socket() -> AppResult<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
        .await
        .with_code("discovery_socket_bind_failed", "发现服务启动失败")?;
    socket
        .set_broadcast(true)
        .with_code("discovery_socket_bind_failed", "发现服务启动失败")?;
    Ok(socket)
}

pub async fn bind_listen_socket(port: u16) -> AppResult<UdpSocket> {
    UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))
        .await
        .with_code("discovery_socket_bind_failed", "发现服务启动失败")
        .with_ctx("port", port.to_string())
}

pub fn encode_packet(packet: &AnnouncePacket) -> AppResult<Vec<u8>> {
    serde_json::to_vec(packet).with_code("discovery_packet_encode_failed", "发现广播编码失败")
}

// Malformed datagrams from unrelated LAN traffic are expected; the caller
// drops a None without logging.
pub fn decode_packet(bytes: &[u8]) -> Option<AnnouncePacket> {
    serde_json::from_slice(bytes).ok()
}

pub async fn send_announce(
    socket: &UdpSocket,
    port: u16,
    packet: &AnnouncePacket,
) -> AppResult<()> {
    let bytes = encode_packet(packet)?;
    socket
        .send_to(bytes.as_slice(), broadcast_target(port))
        .await
        .with_code("discovery_send_failed", "发现广播发送失败")?;
    Ok(())
}

#[cfg(test)]
#[path = "../../tests/infrastructure/discovery_tests.rs"]
mod tests;
