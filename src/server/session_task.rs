use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, span, Instrument, Level};
use crate::protocol::reliability::Reliability;
use crate::server::registry::SessionHandle;
use crate::server::session::{ConnectionState, Session};

/// Everything that happens to a session is posted to its task as a command, so that all of a
///  session's state changes happen sequentially on that task.
#[derive(Debug)]
pub enum SessionCommand {
    Datagram(Bytes),
    Tick(Instant),
    Send {
        payload: Bytes,
        reliability: Reliability,
    },
    Disconnect,
}

/// Spawns the task owning `session` and returns the handle for posting commands to it. The task
///  ends when the session is closed or when all handles are dropped.
pub fn spawn_session(session: Session, state: watch::Receiver<ConnectionState>, session_id: u64, queue_size: usize) -> SessionHandle {
    let (send, recv) = mpsc::channel(queue_size);
    let peer_addr = session.peer_addr();

    let span = span!(Level::DEBUG, "session", ?peer_addr, session_id);
    tokio::spawn(run_session(session, recv).instrument(span));

    SessionHandle::new(session_id, send, state)
}

async fn run_session(mut session: Session, mut commands: mpsc::Receiver<SessionCommand>) {
    while let Some(command) = commands.recv().await {
        match command {
            SessionCommand::Datagram(buf) => session.on_datagram(buf).await,
            SessionCommand::Tick(now) => session.on_tick(now).await,
            SessionCommand::Send { payload, reliability } => session.send(payload, reliability).await,
            SessionCommand::Disconnect => session.disconnect().await,
        }

        if session.is_closed() {
            break;
        }
    }
    debug!("session task terminated");
}
