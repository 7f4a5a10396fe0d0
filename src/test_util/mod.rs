//! Utilities for testing code built on the RakNet server: a send socket that records instead of
//!  sending, and an event handler that records the events it receives.
//!
//! They are part of the regular (non-#[cfg(test)]) code so that applications can use them for
//!  their own tests.

pub mod event_handler;
pub mod send_socket;
