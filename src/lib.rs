//! A server-side implementation of the RakNet protocol as spoken by Minecraft Bedrock clients.
//!
//! Datagrams are either raw offline messages (first byte is a packet id with the top bit clear)
//!  or framed datagrams carrying encapsulated packets:
//!
//! ```ascii
//! 0: flags (0x80 valid, 0x40 ACK, 0x20 NACK, 0x08 continuous send)
//! 1: sequence number (u24 LE)
//! 4: encapsulated packets, each:
//!      flags (reliability << 5, 0x10 split)
//!      payload length in bits (u16 BE)
//!      [reliable index (u24 LE)]                          if reliable
//!      [sequenced index (u24 LE)]                         if sequenced
//!      [ordered index (u24 LE), ordering channel (u8)]    if ordered or sequenced
//!      [split count (u32 BE), compound id (u16 BE), split index (u32 BE)]   if split
//!      payload
//! ```
//!
//! The application plugs in via [server::event_handler::ServerEventHandler] and drives the
//!  server through [server::end_point::RakNetServer].

pub mod protocol;
pub mod server;
pub mod util;
pub mod test_util;
