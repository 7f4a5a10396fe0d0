use std::net::SocketAddr;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use crate::server::event_handler::ServerEventHandler;

/// Permits every peer and records all session events
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    ping_response: Bytes,
    connected: RwLock<Vec<SocketAddr>>,
    disconnected: RwLock<Vec<SocketAddr>>,
    messages: RwLock<Vec<(SocketAddr, Bytes)>>,
}

impl RecordingEventHandler {
    pub fn new() -> RecordingEventHandler {
        RecordingEventHandler::default()
    }

    pub fn with_ping_response(self, ping_response: Bytes) -> RecordingEventHandler {
        RecordingEventHandler { ping_response, ..self }
    }

    pub async fn connected(&self) -> Vec<SocketAddr> {
        self.connected.read().await.clone()
    }

    pub async fn disconnected(&self) -> Vec<SocketAddr> {
        self.disconnected.read().await.clone()
    }

    pub async fn messages(&self) -> Vec<(SocketAddr, Bytes)> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl ServerEventHandler for RecordingEventHandler {
    fn ping_response(&self) -> Bytes {
        self.ping_response.clone()
    }

    fn is_permitted(&self, _addr: SocketAddr) -> bool {
        true
    }

    async fn on_connected(&self, addr: SocketAddr) {
        self.connected.write().await.push(addr);
    }

    async fn on_disconnected(&self, addr: SocketAddr) {
        self.disconnected.write().await.push(addr);
    }

    async fn on_message(&self, addr: SocketAddr, payload: Bytes) {
        self.messages.write().await.push((addr, payload));
    }
}
