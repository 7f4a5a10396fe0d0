use async_trait::async_trait;
use bytes::Bytes;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;

/// The application's side of the engine: it provides the capabilities the protocol needs from
///  the outside (ping response, admission policy) and receives session events and payloads.
///
/// Callbacks are invoked from session tasks, so they should return quickly.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServerEventHandler: Send + Sync + 'static {
    /// The opaque payload of UNCONNECTED_PONG. For Bedrock servers, this is the
    ///  'MCPE;motd;protocol;...' string. It is embedded verbatim.
    fn ping_response(&self) -> Bytes;

    /// Called before a session is created for a peer. Returning `false` denies the connection.
    fn is_permitted(&self, addr: SocketAddr) -> bool;

    /// Called once after the server is bound, with the server's unique id
    fn on_initialized(&self, _server_guid: i64) {}

    /// A peer completed the handshake
    async fn on_connected(&self, _addr: SocketAddr) {}

    /// A session that reached CONNECTING was removed
    async fn on_disconnected(&self, _addr: SocketAddr) {}

    /// An application payload arrived from a connected peer
    async fn on_message(&self, addr: SocketAddr, payload: Bytes);
}
