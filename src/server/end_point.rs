use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::anyhow;
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::select;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, span, trace, Instrument, Level};
use crate::protocol::packet_id::PacketId;
use crate::protocol::reliability::Reliability;
use crate::server::config::RakNetConfig;
use crate::server::event_handler::ServerEventHandler;
use crate::server::offline::OfflineHandler;
use crate::server::registry::SessionRegistry;
use crate::server::session::ConnectionState;
use crate::server::session_task::SessionCommand;
use crate::util::random::{Random, RngRandom};

const RECEIVE_BUFFER_SIZE: usize = 2048;

/// RakNetServer is where all other parts come together: it listens on a UDP socket, routes
///  incoming datagrams to their sessions or to the offline handler, drives the global tick, and
///  has an API for application code to send payloads to connected peers.
pub struct RakNetServer {
    config: Arc<RakNetConfig>,
    guid: i64,
    socket: Arc<UdpSocket>,
    registry: Arc<SessionRegistry>,
    offline_handler: OfflineHandler,
}

impl RakNetServer {
    pub async fn bind(config: Arc<RakNetConfig>, event_handler: Arc<dyn ServerEventHandler>) -> anyhow::Result<Arc<RakNetServer>> {
        Self::bind_with_random::<RngRandom>(config, event_handler).await
    }

    pub async fn bind_with_random<R: Random>(config: Arc<RakNetConfig>, event_handler: Arc<dyn ServerEventHandler>) -> anyhow::Result<Arc<RakNetServer>> {
        config.validate()?;

        let socket = Arc::new(UdpSocket::bind(config.bind_addr).await?);
        let guid = R::next_guid();
        info!("bound RakNet server to {:?}, guid {}", socket.local_addr()?, guid);

        let registry = Arc::new(SessionRegistry::new(config.max_sessions));
        let offline_handler = OfflineHandler::new(
            config.clone(),
            guid,
            Arc::new(socket.clone()),
            event_handler.clone(),
            registry.clone(),
        );

        event_handler.on_initialized(guid);

        Ok(Arc::new(RakNetServer {
            config,
            guid,
            socket,
            registry,
            offline_handler,
        }))
    }

    pub fn guid(&self) -> i64 {
        self.guid
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn session_count(&self) -> usize {
        self.registry.len().await
    }

    /// `Unconnected` if there is no session for the address
    pub async fn session_state(&self, addr: &SocketAddr) -> ConnectionState {
        self.registry.get(addr).await
            .map(|h| h.state())
            .unwrap_or(ConnectionState::Unconnected)
    }

    /// Sends an application payload to a connected peer. The payload is dropped if the session
    ///  is not (yet) connected.
    pub async fn send(&self, to: SocketAddr, payload: Bytes, reliability: Reliability) -> anyhow::Result<()> {
        let handle = self.registry.get(&to).await
            .ok_or_else(|| anyhow!("no session for {:?}", to))?;
        handle.send(SessionCommand::Send { payload, reliability }).await
    }

    pub async fn disconnect(&self, addr: SocketAddr) -> anyhow::Result<()> {
        let handle = self.registry.get(&addr).await
            .ok_or_else(|| anyhow!("no session for {:?}", addr))?;
        handle.send(SessionCommand::Disconnect).await
    }

    /// Runs the receive loop and the tick loop. This returns only if one of them terminates,
    ///  which they do not do regularly.
    pub async fn run(&self) {
        select! {
            _ = self.recv_loop() => {}
            _ = self.tick_loop() => {}
        }
    }

    async fn recv_loop(&self) {
        info!("starting receive loop");

        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        loop {
            let (num_read, from) = match self.socket.recv_from(&mut buf).await {
                Ok(x) => x,
                Err(e) => {
                    error!("socket error: {}", e);
                    continue;
                }
            };

            let span = span!(Level::TRACE, "datagram_received", ?from);
            self.on_datagram(from, &buf[..num_read])
                .instrument(span)
                .await;
        }
    }

    async fn on_datagram(&self, from: SocketAddr, buf: &[u8]) {
        trace!("received datagram from {:?}: {:?}", from, buf);

        if buf.is_empty() {
            debug!("empty datagram - dropping");
            return;
        }

        // pings are answered regardless of a session
        if PacketId::of(buf) == Some(PacketId::UnconnectedPing) {
            self.offline_handler.on_datagram(from, buf).await;
            return;
        }

        if let Some(handle) = self.registry.get(&from).await {
            match handle.try_send(SessionCommand::Datagram(Bytes::copy_from_slice(buf))) {
                Ok(()) => return,
                Err(TrySendError::Full(_)) => {
                    debug!("command queue of session for {:?} is full - dropping datagram", from);
                    return;
                }
                Err(TrySendError::Closed(_)) => {
                    // the session's task ended without deregistering
                    debug!("session for {:?} is gone - treating datagram as offline", from);
                    self.registry.remove(&from, handle.session_id).await;
                }
            }
        }
        self.offline_handler.on_datagram(from, buf).await;
    }

    async fn tick_loop(&self) {
        let mut ticks = interval(self.config.tick_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticks.tick().await;
            self.registry.tick(Instant::now(), self.config.pending_connection_timeout).await;
        }
    }
}
