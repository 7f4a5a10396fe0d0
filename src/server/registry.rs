use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracing::{debug, info};
use crate::server::pending_connections::PendingConnections;
use crate::server::session::ConnectionState;
use crate::server::session_task::SessionCommand;

/// The registry's view of a live session: a way to post commands to the session's task, and
///  the session's connection state as last published by that task.
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub session_id: u64,
    commands: mpsc::Sender<SessionCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    pub fn new(session_id: u64, commands: mpsc::Sender<SessionCommand>, state: watch::Receiver<ConnectionState>) -> SessionHandle {
        SessionHandle { session_id, commands, state }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Never blocks: if the session's queue is full, the command is handed back as an error.
    ///  UDP is lossy anyway, and a slow session must not hold up the receive loop.
    pub fn try_send(&self, command: SessionCommand) -> Result<(), TrySendError<SessionCommand>> {
        self.commands.try_send(command)
    }

    pub async fn send(&self, command: SessionCommand) -> anyhow::Result<()> {
        self.commands.send(command).await
            .map_err(|_| anyhow::anyhow!("session is closed"))
    }
}

pub enum Admission {
    Admitted(SessionHandle),
    /// There is a session for this address already
    Existing(SessionHandle),
    /// The global session limit is reached
    Full,
}

/// Owns all live sessions keyed by peer address, and the cache of pending handshakes.
///
/// This is the only state shared between the receive loop, the ticker and the session tasks.
///  Lock scopes are short and never span an `.await` on I/O.
pub struct SessionRegistry {
    max_sessions: usize,
    sessions: RwLock<FxHashMap<SocketAddr, SessionHandle>>,
    pending: RwLock<PendingConnections>,
    next_session_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(max_sessions: usize) -> SessionRegistry {
        SessionRegistry {
            max_sessions,
            sessions: Default::default(),
            pending: Default::default(),
            next_session_id: AtomicU64::new(1),
        }
    }

    pub async fn get(&self, addr: &SocketAddr) -> Option<SessionHandle> {
        self.sessions.read().await
            .get(addr)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_full(&self) -> bool {
        self.len().await >= self.max_sessions
    }

    /// Uniqueness per address and the session limit are checked atomically with the insert.
    ///  `create_session` is only called if the session is admitted; it gets the new session's id.
    pub async fn try_admit(&self, addr: SocketAddr, create_session: impl FnOnce(u64) -> SessionHandle) -> Admission {
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(&addr) {
            return Admission::Existing(existing.clone());
        }
        if sessions.len() >= self.max_sessions {
            return Admission::Full;
        }

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let handle = create_session(session_id);
        sessions.insert(addr, handle.clone());
        info!("created session #{} for {:?} ({} sessions)", session_id, addr, sessions.len());
        Admission::Admitted(handle)
    }

    /// Removes the session for `addr`, but only if it is the session identified by `session_id`
    ///  - a stale session must not unregister its successor.
    pub async fn remove(&self, addr: &SocketAddr, session_id: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(addr) {
            Some(h) if h.session_id == session_id => {
                sessions.remove(addr);
                info!("removed session #{} for {:?} ({} sessions)", session_id, addr, sessions.len());
                true
            }
            _ => {
                debug!("session #{} for {:?} is not registered", session_id, addr);
                false
            }
        }
    }

    /// Posts a tick to every session's own task rather than checking timeouts here
    pub async fn tick(&self, now: Instant, pending_connection_timeout: Duration) {
        for (addr, handle) in self.sessions.read().await.iter() {
            if handle.try_send(SessionCommand::Tick(now)).is_err() {
                debug!("command queue of session for {:?} is full or closed - skipping tick", addr);
            }
        }

        self.pending.write().await
            .evict_expired(now, pending_connection_timeout);
    }

    pub async fn is_pending(&self, addr: &SocketAddr) -> bool {
        self.pending.read().await.contains(addr)
    }

    pub async fn add_pending(&self, addr: SocketAddr, now: Instant) {
        self.pending.write().await.touch(addr, now);
    }

    /// Keeps a pending handshake alive without adding a record for an unknown address
    pub async fn refresh_pending(&self, addr: &SocketAddr, now: Instant) {
        self.pending.write().await.refresh(addr, now);
    }

    pub async fn remove_pending(&self, addr: &SocketAddr) {
        self.pending.write().await.remove(addr);
    }
}
