//! The server side of the protocol: the UDP endpoint, the offline handshake, per-peer sessions
//!  running on their own tasks, and the registry tying them together.

pub mod config;
pub mod end_point;
pub mod event_handler;
pub mod offline;
pub mod pending_connections;
pub mod registry;
pub mod send_socket;
pub mod session;
pub mod session_task;
