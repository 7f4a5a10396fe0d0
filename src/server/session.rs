use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use bytes::{Bytes, BytesMut};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use crate::protocol::ack::AckRecords;
use crate::protocol::datagram::{DatagramFramer, FramedDatagram};
use crate::protocol::offline_messages::{ConnectedPing, ConnectedPong, ConnectionRejection, ConnectionRequest, ConnectionRequestAccepted, OpenConnectionReply1, OpenConnectionReply2, OpenConnectionRequest1, OpenConnectionRequest2};
use crate::protocol::packet_id::PacketId;
use crate::protocol::reliability::Reliability;
use crate::protocol::split_assembler::SplitAssembler;
use crate::protocol::{adjusted_mtu, clamp_mtu, is_framed_datagram};
use crate::server::config::RakNetConfig;
use crate::server::event_handler::ServerEventHandler;
use crate::server::registry::SessionRegistry;
use crate::server::send_socket::SendSocket;

/// A session's progress through the handshake. States only ever move forward; removal from the
///  registry is the terminal transition and has no state of its own.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ConnectionState {
    /// There is no session for the address
    Unconnected,
    /// OPEN_CONNECTION_REPLY_1 was sent, waiting for OPEN_CONNECTION_REQUEST_2
    Initializing,
    /// MTU and client guid are fixed, waiting for CONNECTION_REQUEST
    Initialized,
    /// CONNECTION_REQUEST_ACCEPTED was sent, waiting for NEW_INCOMING_CONNECTION
    Connecting,
    Connected,
}

/// Current wall clock time as RakNet transmits it
pub fn current_time_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// All per-peer protocol state. A `Session` is owned by exactly one task (see `session_task`),
///  so it is mutated without any locking.
pub struct Session {
    session_id: u64,
    peer_addr: SocketAddr,
    server_guid: i64,
    config: Arc<RakNetConfig>,

    state: ConnectionState,
    state_publisher: watch::Sender<ConnectionState>,
    is_closed: bool,

    mtu: u16,
    client_guid: i64,
    last_activity: Instant,

    framer: DatagramFramer,
    split_assembler: SplitAssembler,
    /// sequence numbers of received datagrams that were not acknowledged yet
    pending_acks: BTreeSet<u32>,

    send_socket: Arc<dyn SendSocket>,
    event_handler: Arc<dyn ServerEventHandler>,
    registry: Weak<SessionRegistry>,
}

impl Session {
    /// Creates a session in `Initializing`. The returned receiver observes the session's state.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session_id: u64,
        peer_addr: SocketAddr,
        server_guid: i64,
        mtu: u16,
        config: Arc<RakNetConfig>,
        send_socket: Arc<dyn SendSocket>,
        event_handler: Arc<dyn ServerEventHandler>,
        registry: Weak<SessionRegistry>,
    ) -> (Session, watch::Receiver<ConnectionState>) {
        let (state_publisher, state_receiver) = watch::channel(ConnectionState::Initializing);
        let mtu = clamp_mtu(mtu);
        let session = Session {
            session_id,
            peer_addr,
            server_guid,
            state: ConnectionState::Initializing,
            state_publisher,
            is_closed: false,
            mtu,
            client_guid: 0,
            last_activity: Instant::now(),
            framer: DatagramFramer::new(adjusted_mtu(&peer_addr, mtu)),
            split_assembler: SplitAssembler::new(config.max_split_count, config.max_concurrent_splits),
            pending_acks: BTreeSet::new(),
            config,
            send_socket,
            event_handler,
            registry,
        };
        (session, state_receiver)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_closed(&self) -> bool {
        self.is_closed
    }

    pub fn mtu(&self) -> u16 {
        self.mtu
    }

    fn set_state(&mut self, new_state: ConnectionState) {
        assert!(new_state > self.state, "this is a bug: connection state must not go from {:?} to {:?}", self.state, new_state);
        debug!("session for {:?}: {:?} -> {:?}", self.peer_addr, self.state, new_state);
        self.state = new_state;
        // the registry may hold the only receiver, and it may be gone already
        let _ = self.state_publisher.send(new_state);
    }

    pub async fn on_datagram(&mut self, buf: Bytes) {
        if self.is_closed {
            return;
        }

        if is_framed_datagram(&buf) {
            self.on_framed_datagram(buf).await;
        }
        else {
            self.on_raw_message(buf).await;
        }
    }

    async fn on_raw_message(&mut self, buf: Bytes) {
        match PacketId::of(&buf) {
            Some(PacketId::OpenConnectionRequest1) => {
                match OpenConnectionRequest1::deser(&mut &buf[1..]) {
                    Ok(_) => {
                        self.last_activity = Instant::now();
                        self.on_open_connection_request_1().await;
                    }
                    Err(e) => debug!("invalid OPEN_CONNECTION_REQUEST_1 from {:?}: {} - dropping", self.peer_addr, e),
                }
            }
            Some(PacketId::OpenConnectionRequest2) => {
                match OpenConnectionRequest2::deser(&mut &buf[1..]) {
                    Ok(request) => {
                        self.last_activity = Instant::now();
                        self.on_open_connection_request_2(request).await;
                    }
                    Err(e) => debug!("invalid OPEN_CONNECTION_REQUEST_2 from {:?}: {} - dropping", self.peer_addr, e),
                }
            }
            _ if self.state >= ConnectionState::Initialized => {
                self.last_activity = Instant::now();
                self.on_message_payload(buf).await;
            }
            _ => {
                debug!("raw message {:?} from {:?} in state {:?} - dropping", buf.first(), self.peer_addr, self.state);
            }
        }
    }

    async fn on_open_connection_request_1(&mut self) {
        match self.state {
            ConnectionState::Unconnected | ConnectionState::Initializing => {
                debug!("repeated OPEN_CONNECTION_REQUEST_1 from {:?} - re-sending reply", self.peer_addr);
                if let Some(registry) = self.registry.upgrade() {
                    registry.refresh_pending(&self.peer_addr, Instant::now()).await;
                }
                self.send_open_connection_reply_1().await;
            }
            ConnectionState::Initialized => {
                debug!("OPEN_CONNECTION_REQUEST_1 from {:?} after second handshake step - ignoring", self.peer_addr);
            }
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!("OPEN_CONNECTION_REQUEST_1 from connected peer {:?}", self.peer_addr);
                self.send_raw(|buf| ConnectionRejection { id: PacketId::AlreadyConnected, server_guid: self.server_guid }.ser(buf)).await;
            }
        }
    }

    pub async fn send_open_connection_reply_1(&self) {
        self.send_raw(|buf| OpenConnectionReply1 { server_guid: self.server_guid, mtu: self.mtu }.ser(buf)).await;
    }

    async fn on_open_connection_request_2(&mut self, request: OpenConnectionRequest2) {
        if self.state != ConnectionState::Initializing {
            debug!("OPEN_CONNECTION_REQUEST_2 from {:?} in state {:?} - ignoring", self.peer_addr, self.state);
            return;
        }

        self.mtu = clamp_mtu(request.mtu);
        self.framer = DatagramFramer::new(adjusted_mtu(&self.peer_addr, self.mtu));
        self.client_guid = request.client_guid;
        debug!("session for {:?}: MTU {}, client guid {}", self.peer_addr, self.mtu, self.client_guid);

        if let Some(registry) = self.registry.upgrade() {
            registry.remove_pending(&self.peer_addr).await;
        }

        self.set_state(ConnectionState::Initialized);
        let reply = OpenConnectionReply2 {
            server_guid: self.server_guid,
            client_address: self.peer_addr,
            mtu: self.mtu,
        };
        self.send_raw(|buf| reply.ser(buf)).await;
    }

    async fn on_framed_datagram(&mut self, buf: Bytes) {
        if self.state < ConnectionState::Initialized {
            debug!("framed datagram from {:?} before handshake completion - dropping", self.peer_addr);
            return;
        }

        let datagram = match FramedDatagram::deser(buf) {
            Ok(d) => d,
            Err(e) => {
                warn!("malformed datagram from {:?}: {} - closing session", self.peer_addr, e);
                self.disconnect().await;
                return;
            }
        };
        self.last_activity = Instant::now();

        match datagram {
            FramedDatagram::Ack(records) => trace!("ACK from {:?}: {:?}", self.peer_addr, records),
            FramedDatagram::Nack(records) => trace!("NACK from {:?}: {:?}", self.peer_addr, records),
            FramedDatagram::Data(datagram) => {
                self.pending_acks.insert(datagram.sequence_number);
                for packet in datagram.packets {
                    let packet = match self.split_assembler.on_packet(packet, Instant::now()) {
                        Ok(Some(p)) => p,
                        Ok(None) => continue,
                        Err(e) => {
                            warn!("invalid split packet from {:?}: {} - closing session", self.peer_addr, e);
                            self.disconnect().await;
                            return;
                        }
                    };
                    self.on_message_payload(packet.payload).await;
                    if self.is_closed {
                        return;
                    }
                }
            }
        }
    }

    async fn on_message_payload(&mut self, payload: Bytes) {
        match PacketId::of(&payload) {
            Some(PacketId::ConnectionRequest) => {
                match ConnectionRequest::deser(&mut &payload[1..]) {
                    Ok(request) => self.on_connection_request(request).await,
                    Err(e) => {
                        warn!("malformed CONNECTION_REQUEST from {:?}: {} - closing session", self.peer_addr, e);
                        self.disconnect().await;
                    }
                }
            }
            Some(PacketId::NewIncomingConnection) => {
                if self.state == ConnectionState::Connecting {
                    self.set_state(ConnectionState::Connected);
                    info!("{:?} connected", self.peer_addr);
                    self.event_handler.on_connected(self.peer_addr).await;
                }
                else {
                    debug!("NEW_INCOMING_CONNECTION from {:?} in state {:?} - ignoring", self.peer_addr, self.state);
                }
            }
            Some(PacketId::ConnectedPing) => {
                match ConnectedPing::deser(&mut &payload[1..]) {
                    Ok(ping) => {
                        let mut buf = BytesMut::new();
                        ConnectedPong { ping_time: ping.time, pong_time: current_time_millis() }.ser(&mut buf);
                        self.send_framed(buf.freeze(), Reliability::Unreliable).await;
                    }
                    Err(e) => debug!("malformed CONNECTED_PING from {:?}: {} - ignoring", self.peer_addr, e),
                }
            }
            Some(PacketId::Disconnected) => {
                debug!("{:?} disconnected", self.peer_addr);
                self.close().await;
            }
            Some(id) => {
                debug!("unexpected {:?} from {:?} in state {:?} - ignoring", id, self.peer_addr, self.state);
            }
            None => {
                if self.state == ConnectionState::Connected {
                    self.event_handler.on_message(self.peer_addr, payload).await;
                }
                else {
                    debug!("application payload from {:?} in state {:?} - dropping", self.peer_addr, self.state);
                }
            }
        }
    }

    async fn on_connection_request(&mut self, request: ConnectionRequest) {
        if self.state != ConnectionState::Initialized {
            debug!("CONNECTION_REQUEST from {:?} in state {:?} - ignoring", self.peer_addr, self.state);
            return;
        }

        if request.client_guid != self.client_guid || request.use_security {
            debug!("rejecting CONNECTION_REQUEST from {:?}: guid {} (expected {}), security {}", self.peer_addr, request.client_guid, self.client_guid, request.use_security);
            self.send_raw(|buf| ConnectionRejection { id: PacketId::ConnectionRequestFailed, server_guid: self.server_guid }.ser(buf)).await;
            self.close().await;
            return;
        }

        self.set_state(ConnectionState::Connecting);

        let accepted = ConnectionRequestAccepted {
            client_address: self.peer_addr,
            local_addresses: self.config.local_addresses.clone(),
            request_time: request.time,
            server_time: current_time_millis(),
        };
        let mut buf = BytesMut::new();
        accepted.ser(&mut buf);
        self.send_framed(buf.freeze(), Reliability::Reliable).await;
    }

    pub async fn on_tick(&mut self, now: Instant) {
        if self.is_closed {
            return;
        }

        if now.saturating_duration_since(self.last_activity) >= self.config.session_timeout {
            debug!("session for {:?} timed out", self.peer_addr);
            self.disconnect().await;
            return;
        }

        self.split_assembler.evict_stale(now, self.config.split_reassembly_timeout);
        self.flush_acks().await;
    }

    async fn flush_acks(&mut self) {
        if self.pending_acks.is_empty() {
            return;
        }
        let records = AckRecords::from_sequence_numbers(&self.pending_acks);
        self.pending_acks.clear();

        let buf = self.framer.ack_datagram(&records);
        self.send_socket.do_send_packet(self.peer_addr, &buf).await;
    }

    /// Sends an application payload. Payloads can only be sent once the peer is connected.
    pub async fn send(&mut self, payload: Bytes, reliability: Reliability) {
        if self.is_closed || self.state != ConnectionState::Connected {
            debug!("session for {:?} is not connected - dropping outgoing payload", self.peer_addr);
            return;
        }
        self.send_framed(payload, reliability).await;
    }

    async fn send_framed(&mut self, payload: Bytes, reliability: Reliability) {
        let packets = self.framer.encapsulate(payload, reliability);
        for datagram in self.framer.pack(packets) {
            self.send_socket.do_send_packet(self.peer_addr, &datagram).await;
        }
    }

    async fn send_raw(&self, ser: impl FnOnce(&mut BytesMut)) {
        let mut buf = BytesMut::new();
        ser(&mut buf);
        self.send_socket.do_send_packet(self.peer_addr, &buf).await;
    }

    /// Notifies the peer (best effort) and closes the session. Calling this on a closed session
    ///  has no effect.
    pub async fn disconnect(&mut self) {
        if self.is_closed {
            return;
        }

        let notice = Bytes::from_static(&[PacketId::Disconnected as u8]);
        if self.state >= ConnectionState::Connecting {
            self.send_framed(notice, Reliability::Reliable).await;
        }
        else {
            self.send_socket.do_send_packet(self.peer_addr, &notice).await;
        }

        self.close().await;
    }

    /// Closes the session without notifying the peer
    async fn close(&mut self) {
        if self.is_closed {
            return;
        }

        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.peer_addr, self.session_id).await;
        }
        self.is_closed = true;

        if self.state >= ConnectionState::Connecting {
            self.event_handler.on_disconnected(self.peer_addr).await;
        }
    }
}
