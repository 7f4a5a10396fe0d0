use std::net::SocketAddr;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;
use crate::server::send_socket::SendSocket;

/// Records every packet instead of sending it. Assertions consume recorded packets in the order
///  they were sent.
#[derive(Debug, Default)]
pub struct TrackingSendSocket {
    tracker: Arc<RwLock<Vec<(SocketAddr, Bytes)>>>,
}
impl TrackingSendSocket {
    pub fn new() -> TrackingSendSocket {
        TrackingSendSocket {
            tracker: Default::default(),
        }
    }

    pub async fn assert_sent(&self, to: SocketAddr, packet: &[u8]) {
        let mut lock = self.tracker.write().await;
        if lock.is_empty() {
            panic!("no packet was sent");
        }

        let (actual_to, actual_packet) = lock.remove(0);
        assert_eq!(actual_to, to);
        assert_eq!(actual_packet.as_ref(), packet);
    }

    pub async fn assert_no_remaining_packets(&self) {
        let lock = self.tracker.read().await;
        assert!(lock.is_empty(), "unexpected packets: {:?}", *lock);
    }

    pub async fn clear(&self) {
        self.tracker.write().await.clear();
    }

    pub async fn take_sent(&self) -> Vec<(SocketAddr, Bytes)> {
        std::mem::take(&mut *self.tracker.write().await)
    }
}

#[async_trait]
impl SendSocket for TrackingSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) {
        self.tracker.write().await
            .push((to, Bytes::copy_from_slice(packet_buf)));
    }
}
