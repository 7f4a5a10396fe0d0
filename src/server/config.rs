use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;
use crate::protocol::offline_messages::NUM_LOCAL_ADDRESSES;

pub struct RakNetConfig {
    /// The UDP address the server listens on. Port 0 binds an ephemeral port, which is
    ///  mostly useful for tests.
    pub bind_addr: SocketAddr,

    /// This is the maximum number of sessions (in any state) the server keeps at a time. When it
    ///  is reached, new peers are turned away with NO_FREE_INCOMING_CONNECTIONS.
    pub max_sessions: usize,

    /// A session that did not receive a valid datagram for this long is disconnected.
    pub session_timeout: Duration,

    /// Interval of the global tick that checks sessions for timeouts and flushes ACKs
    pub tick_interval: Duration,

    /// Peers that sent OPEN_CONNECTION_REQUEST_1 are remembered for this long. A second
    ///  handshake attempt from the same address in that time is rejected with
    ///  ALREADY_CONNECTED.
    pub pending_connection_timeout: Duration,

    /// By default, addresses that are not permitted to connect get no reply at all so that the
    ///  server's presence is not disclosed to them. Set this to reply with CONNECTION_BANNED
    ///  instead.
    pub reply_to_denied_addresses: bool,

    /// The server's own addresses that are reported to clients in CONNECTION_REQUEST_ACCEPTED.
    ///  At most 10, the remaining slots are filled with a placeholder.
    pub local_addresses: Vec<SocketAddr>,

    /// Capacity of each session's command queue. Datagrams for a session whose queue is full are
    ///  dropped.
    pub session_command_queue_size: usize,

    /// Upper bound for the number of parts of a split packet, limiting the memory a peer can
    ///  make the server allocate for reassembly
    pub max_split_count: u32,
    /// Upper bound for the number of split packets that are reassembled concurrently per session
    pub max_concurrent_splits: usize,
    /// A split packet that did not receive a new part for this long is discarded, freeing its
    ///  slot for other split packets
    pub split_reassembly_timeout: Duration,
}

impl RakNetConfig {
    pub fn new(bind_addr: SocketAddr) -> RakNetConfig {
        RakNetConfig {
            bind_addr,
            max_sessions: 1024,
            session_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_millis(10),
            pending_connection_timeout: Duration::from_secs(30),
            reply_to_denied_addresses: false,
            local_addresses: vec![
                SocketAddr::from(([127, 0, 0, 1], 19132)),
                SocketAddr::from(([0u16, 0, 0, 0, 0, 0, 0, 1], 19132)),
            ],
            session_command_queue_size: 1024,
            max_split_count: 128,
            max_concurrent_splits: 4,
            split_reassembly_timeout: Duration::from_secs(5),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_sessions == 0 {
            bail!("max_sessions must be positive");
        }
        if self.tick_interval.is_zero() {
            bail!("tick interval must be positive");
        }
        if self.session_timeout <= self.tick_interval {
            bail!("session timeout must be longer than the tick interval");
        }
        if self.pending_connection_timeout <= self.tick_interval {
            bail!("pending connection timeout must be longer than the tick interval");
        }
        if self.local_addresses.len() > NUM_LOCAL_ADDRESSES {
            bail!("at most {} local addresses are supported, got {}", NUM_LOCAL_ADDRESSES, self.local_addresses.len());
        }
        if self.session_command_queue_size == 0 {
            bail!("session command queue size must be positive");
        }
        if self.max_split_count == 0 || self.max_concurrent_splits == 0 {
            bail!("split limits must be positive");
        }
        if self.split_reassembly_timeout <= self.tick_interval {
            bail!("split reassembly timeout must be longer than the tick interval");
        }

        Ok(())
    }
}
