//! Wire level building blocks of the RakNet protocol. Everything in here is pure: codecs and
//!  constants, no I/O and no clocks.

use std::net::SocketAddr;

pub mod ack;
pub mod address;
pub mod datagram;
pub mod encapsulated;
pub mod offline_messages;
pub mod packet_id;
pub mod reliability;
pub mod split_assembler;


/// Marker that every offline (i.e. unframed handshake) message carries
pub const MAGIC: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00,
    0xfe, 0xfe, 0xfe, 0xfe,
    0xfd, 0xfd, 0xfd, 0xfd,
    0x12, 0x34, 0x56, 0x78,
];

pub const PROTOCOL_VERSION: u8 = 10;

pub const MINIMUM_MTU: u16 = 576;
pub const MAXIMUM_MTU: u16 = 1400;

pub const UDP_HEADER_SIZE: usize = 8;
pub const IPV4_HEADER_SIZE: usize = 20;
pub const IPV6_HEADER_SIZE: usize = 40;

/// flag byte + u24 sequence number
pub const DATAGRAM_HEADER_SIZE: usize = 4;
pub const MAXIMUM_ENCAPSULATED_HEADER_SIZE: usize = 28;

pub const FLAG_VALID: u8 = 0b1000_0000;
pub const FLAG_ACK: u8 = 0b0100_0000;
pub const FLAG_NACK: u8 = 0b0010_0000;
pub const FLAG_CONTINUOUS_SEND: u8 = 0b0000_1000;

pub const FLAG_RELIABILITY_MASK: u8 = 0b1110_0000;
pub const FLAG_SPLIT: u8 = 0b0001_0000;


pub fn clamp_mtu(mtu: u16) -> u16 {
    mtu.clamp(MINIMUM_MTU, MAXIMUM_MTU)
}

/// The top bit of the first byte separates framed datagrams from raw offline messages
pub fn is_framed_datagram(buf: &[u8]) -> bool {
    buf.first()
        .map(|b| b & FLAG_VALID != 0)
        .unwrap_or(false)
}

fn ip_header_size(addr: &SocketAddr) -> usize {
    if addr.is_ipv4() {
        IPV4_HEADER_SIZE
    }
    else {
        IPV6_HEADER_SIZE
    }
}

/// Clients pad OPEN_CONNECTION_REQUEST_1 up to the MTU they want to probe. The MTU is estimated
///  from the padding that is left after id, magic and protocol version, plus IP and UDP headers.
pub fn proposed_mtu(peer_addr: &SocketAddr, remaining_padding: usize) -> u16 {
    let raw = remaining_padding + 1 + MAGIC.len() + 1 + ip_header_size(peer_addr) + UDP_HEADER_SIZE;
    clamp_mtu(raw.min(u16::MAX as usize) as u16)
}

/// The MTU minus the IP and UDP header overhead, i.e. the space available for a UDP payload
pub fn adjusted_mtu(peer_addr: &SocketAddr, mtu: u16) -> usize {
    mtu as usize - ip_header_size(peer_addr) - UDP_HEADER_SIZE
}

/// Payloads bigger than this are split across several encapsulated packets
pub fn split_threshold(adjusted_mtu: usize) -> usize {
    adjusted_mtu - DATAGRAM_HEADER_SIZE - MAXIMUM_ENCAPSULATED_HEADER_SIZE
}
