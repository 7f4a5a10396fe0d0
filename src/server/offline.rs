use std::net::SocketAddr;
use std::sync::Arc;
use bytes::{Bytes, BytesMut};
use tokio::time::Instant;
use tracing::{debug, warn};
use crate::protocol::offline_messages::{ConnectionRejection, IncompatibleProtocol, OpenConnectionReply1, OpenConnectionRequest1, OpenConnectionRequest2, UnconnectedPing, UnconnectedPong};
use crate::protocol::packet_id::PacketId;
use crate::protocol::{clamp_mtu, proposed_mtu, PROTOCOL_VERSION};
use crate::server::config::RakNetConfig;
use crate::server::event_handler::ServerEventHandler;
use crate::server::registry::{Admission, SessionHandle, SessionRegistry};
use crate::server::send_socket::SendSocket;
use crate::server::session::Session;
use crate::server::session_task::{spawn_session, SessionCommand};

/// Handles datagrams from peers without a session: unconnected pings, and the handshake steps
///  that lead to a session being created.
///
/// Apart from the registry's cache of pending handshakes, this is stateless.
pub struct OfflineHandler {
    config: Arc<RakNetConfig>,
    server_guid: i64,
    send_socket: Arc<dyn SendSocket>,
    event_handler: Arc<dyn ServerEventHandler>,
    registry: Arc<SessionRegistry>,
}

impl OfflineHandler {
    pub fn new(
        config: Arc<RakNetConfig>,
        server_guid: i64,
        send_socket: Arc<dyn SendSocket>,
        event_handler: Arc<dyn ServerEventHandler>,
        registry: Arc<SessionRegistry>,
    ) -> OfflineHandler {
        OfflineHandler {
            config,
            server_guid,
            send_socket,
            event_handler,
            registry,
        }
    }

    pub async fn on_datagram(&self, from: SocketAddr, buf: &[u8]) {
        let Some(&id) = buf.first() else {
            return;
        };
        let mut body = &buf[1..];

        match PacketId::of(buf) {
            Some(PacketId::UnconnectedPing) => {
                match UnconnectedPing::deser(&mut body) {
                    Ok(ping) => self.on_unconnected_ping(from, ping).await,
                    Err(e) => debug!("invalid UNCONNECTED_PING from {:?}: {} - dropping", from, e),
                }
            }
            Some(PacketId::OpenConnectionRequest1) => {
                match OpenConnectionRequest1::deser(&mut body) {
                    Ok(request) => self.on_open_connection_request_1(from, request, buf).await,
                    Err(e) => debug!("invalid OPEN_CONNECTION_REQUEST_1 from {:?}: {} - dropping", from, e),
                }
            }
            Some(PacketId::OpenConnectionRequest2) => {
                match OpenConnectionRequest2::deser(&mut body) {
                    Ok(request) => self.on_open_connection_request_2(from, request, buf).await,
                    Err(e) => debug!("invalid OPEN_CONNECTION_REQUEST_2 from {:?}: {} - dropping", from, e),
                }
            }
            _ => {
                debug!("unexpected offline message {:#04x} from {:?} - dropping", id, from);
            }
        }
    }

    async fn on_unconnected_ping(&self, from: SocketAddr, ping: UnconnectedPing) {
        let ping_response = self.event_handler.ping_response();
        if ping_response.len() > u16::MAX as usize {
            warn!("ping response of {} bytes does not fit into UNCONNECTED_PONG - not replying", ping_response.len());
            return;
        }

        let pong = UnconnectedPong {
            time: ping.time,
            server_guid: self.server_guid,
            ping_response,
        };
        self.send(from, |buf| pong.ser(buf)).await;
    }

    async fn on_open_connection_request_1(&self, from: SocketAddr, request: OpenConnectionRequest1, raw: &[u8]) {
        if !self.event_handler.is_permitted(from) {
            if self.config.reply_to_denied_addresses {
                debug!("{:?} is not permitted to connect - replying CONNECTION_BANNED", from);
                self.send_rejection(from, PacketId::ConnectionBanned).await;
            }
            else {
                debug!("{:?} is not permitted to connect - dropping", from);
            }
            return;
        }

        if self.registry.is_pending(&from).await {
            debug!("{:?} is in the middle of a handshake already", from);
            self.send_rejection(from, PacketId::AlreadyConnected).await;
            return;
        }

        if request.protocol_version != PROTOCOL_VERSION {
            debug!("{:?} uses protocol version {}, expected {}", from, request.protocol_version, PROTOCOL_VERSION);
            self.send(from, |buf| IncompatibleProtocol { server_guid: self.server_guid }.ser(buf)).await;
            return;
        }

        let mtu = proposed_mtu(&from, request.padding_len);
        match self.admit(from, mtu).await {
            Admission::Admitted(_) => {
                self.registry.add_pending(from, Instant::now()).await;
                self.send(from, |buf| OpenConnectionReply1 { server_guid: self.server_guid, mtu }.ser(buf)).await;
            }
            Admission::Existing(handle) => {
                // a session was created since routing, so it handles the request
                forward(&handle, from, raw);
            }
            Admission::Full => {
                debug!("no free session slot for {:?}", from);
                self.send_rejection(from, PacketId::NoFreeIncomingConnections).await;
            }
        }
    }

    async fn on_open_connection_request_2(&self, from: SocketAddr, request: OpenConnectionRequest2, raw: &[u8]) {
        if !self.registry.is_pending(&from).await {
            debug!("OPEN_CONNECTION_REQUEST_2 from {:?} without prior handshake - dropping", from);
            return;
        }

        // the pending record outlived its session: recreate the session and let it continue
        debug!("recreating session for {:?} with pending handshake", from);
        match self.admit(from, clamp_mtu(request.mtu)).await {
            Admission::Admitted(handle) | Admission::Existing(handle) => {
                forward(&handle, from, raw);
            }
            Admission::Full => {
                debug!("no free session slot for {:?}", from);
                self.send_rejection(from, PacketId::NoFreeIncomingConnections).await;
            }
        }
    }

    async fn admit(&self, from: SocketAddr, mtu: u16) -> Admission {
        self.registry.try_admit(from, |session_id| {
            let (session, state) = Session::new(
                session_id,
                from,
                self.server_guid,
                mtu,
                self.config.clone(),
                self.send_socket.clone(),
                self.event_handler.clone(),
                Arc::downgrade(&self.registry),
            );
            spawn_session(session, state, session_id, self.config.session_command_queue_size)
        }).await
    }

    async fn send_rejection(&self, to: SocketAddr, id: PacketId) {
        self.send(to, |buf| ConnectionRejection { id, server_guid: self.server_guid }.ser(buf)).await;
    }

    async fn send(&self, to: SocketAddr, ser: impl FnOnce(&mut BytesMut)) {
        let mut buf = BytesMut::new();
        ser(&mut buf);
        self.send_socket.do_send_packet(to, &buf).await;
    }
}

fn forward(handle: &SessionHandle, from: SocketAddr, raw: &[u8]) {
    if handle.try_send(SessionCommand::Datagram(Bytes::copy_from_slice(raw))).is_err() {
        debug!("command queue of session for {:?} is full or closed - dropping datagram", from);
    }
}
