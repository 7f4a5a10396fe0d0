//! Bodies of RakNet's own messages, i.e. everything that is not application payload. Most of them
//!  are exchanged as raw (unframed) datagrams during the handshake, the rest travels inside
//!  encapsulated packets once a session is established.
//!
//! `ser` writes the message including its id byte, `deser` expects the id byte to be consumed
//!  already.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};
use crate::protocol::address::{ser_address, try_deser_address};
use crate::protocol::packet_id::PacketId;
use crate::util::buf_ext::{BufExt, BufMutExt};
use crate::util::safe_converter::PrecheckedCast;

/// CONNECTION_REQUEST_ACCEPTED always carries this many local addresses
pub const NUM_LOCAL_ADDRESSES: usize = 10;

pub const PLACEHOLDER_LOCAL_ADDRESS: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::BROADCAST, 19132));


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnconnectedPing {
    pub time: i64,
    /// Some clients omit their guid, it is 0 then
    pub client_guid: i64,
}
impl UnconnectedPing {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::UnconnectedPing.into());
        buf.put_i64(self.time);
        buf.put_magic();
        buf.put_i64(self.client_guid);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<UnconnectedPing> {
        let time = buf.try_get_i64()?;
        buf.try_check_magic()?;
        let client_guid = if buf.remaining() >= 8 { buf.get_i64() } else { 0 };
        Ok(UnconnectedPing { time, client_guid })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct UnconnectedPong {
    pub time: i64,
    pub server_guid: i64,
    pub ping_response: Bytes,
}
impl UnconnectedPong {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::UnconnectedPong.into());
        buf.put_i64(self.time);
        buf.put_i64(self.server_guid);
        buf.put_magic();
        let len: u16 = self.ping_response.len().prechecked_cast();
        buf.put_u16(len);
        buf.put_slice(&self.ping_response);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<UnconnectedPong> {
        let time = buf.try_get_i64()?;
        let server_guid = buf.try_get_i64()?;
        buf.try_check_magic()?;
        let len = buf.try_get_u16()? as usize;
        if buf.remaining() < len {
            bail!("buffer underflow");
        }
        let ping_response = buf.copy_to_bytes(len);
        Ok(UnconnectedPong { time, server_guid, ping_response })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpenConnectionRequest1 {
    pub protocol_version: u8,
    /// Clients pad this message to probe the path MTU
    pub padding_len: usize,
}
impl OpenConnectionRequest1 {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::OpenConnectionRequest1.into());
        buf.put_magic();
        buf.put_u8(self.protocol_version);
        buf.put_bytes(0, self.padding_len);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<OpenConnectionRequest1> {
        buf.try_check_magic()?;
        let protocol_version = buf.try_get_u8()?;
        let padding_len = buf.remaining();
        buf.advance(padding_len);
        Ok(OpenConnectionRequest1 { protocol_version, padding_len })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpenConnectionReply1 {
    pub server_guid: i64,
    pub mtu: u16,
}
impl OpenConnectionReply1 {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::OpenConnectionReply1.into());
        buf.put_magic();
        buf.put_i64(self.server_guid);
        buf.put_raknet_bool(false); // security
        buf.put_u16(self.mtu);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<OpenConnectionReply1> {
        buf.try_check_magic()?;
        let server_guid = buf.try_get_i64()?;
        if buf.try_get_raknet_bool()? {
            bail!("security is not supported");
        }
        let mtu = buf.try_get_u16()?;
        Ok(OpenConnectionReply1 { server_guid, mtu })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpenConnectionRequest2 {
    /// The server's address as the client sees it
    pub server_address: SocketAddr,
    pub mtu: u16,
    pub client_guid: i64,
}
impl OpenConnectionRequest2 {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::OpenConnectionRequest2.into());
        buf.put_magic();
        ser_address(&self.server_address, buf);
        buf.put_u16(self.mtu);
        buf.put_i64(self.client_guid);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<OpenConnectionRequest2> {
        buf.try_check_magic()?;
        let server_address = try_deser_address(buf)?;
        let mtu = buf.try_get_u16()?;
        let client_guid = buf.try_get_i64()?;
        Ok(OpenConnectionRequest2 { server_address, mtu, client_guid })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OpenConnectionReply2 {
    pub server_guid: i64,
    pub client_address: SocketAddr,
    pub mtu: u16,
}
impl OpenConnectionReply2 {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::OpenConnectionReply2.into());
        buf.put_magic();
        buf.put_i64(self.server_guid);
        ser_address(&self.client_address, buf);
        buf.put_u16(self.mtu);
        buf.put_raknet_bool(false); // security
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<OpenConnectionReply2> {
        buf.try_check_magic()?;
        let server_guid = buf.try_get_i64()?;
        let client_address = try_deser_address(buf)?;
        let mtu = buf.try_get_u16()?;
        let _security = buf.try_get_raknet_bool()?;
        Ok(OpenConnectionReply2 { server_guid, client_address, mtu })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct IncompatibleProtocol {
    pub server_guid: i64,
}
impl IncompatibleProtocol {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::IncompatibleProtocol.into());
        buf.put_u8(crate::protocol::PROTOCOL_VERSION);
        buf.put_magic();
        buf.put_i64(self.server_guid);
    }
}

/// ALREADY_CONNECTED, NO_FREE_INCOMING_CONNECTIONS, CONNECTION_BANNED and
///  CONNECTION_REQUEST_FAILED share a layout
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectionRejection {
    pub id: PacketId,
    pub server_guid: i64,
}
impl ConnectionRejection {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.id.into());
        buf.put_magic();
        buf.put_i64(self.server_guid);
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectionRequest {
    pub client_guid: i64,
    pub time: i64,
    pub use_security: bool,
}
impl ConnectionRequest {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::ConnectionRequest.into());
        buf.put_i64(self.client_guid);
        buf.put_i64(self.time);
        buf.put_raknet_bool(self.use_security);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ConnectionRequest> {
        let client_guid = buf.try_get_i64()?;
        let time = buf.try_get_i64()?;
        let use_security = buf.try_get_raknet_bool()?;
        Ok(ConnectionRequest { client_guid, time, use_security })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectionRequestAccepted {
    pub client_address: SocketAddr,
    /// Padded to `NUM_LOCAL_ADDRESSES` on the wire
    pub local_addresses: Vec<SocketAddr>,
    pub request_time: i64,
    pub server_time: i64,
}
impl ConnectionRequestAccepted {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::ConnectionRequestAccepted.into());
        ser_address(&self.client_address, buf);
        buf.put_u16(0); // system index
        for i in 0..NUM_LOCAL_ADDRESSES {
            let addr = self.local_addresses.get(i)
                .unwrap_or(&PLACEHOLDER_LOCAL_ADDRESS);
            ser_address(addr, buf);
        }
        buf.put_i64(self.request_time);
        buf.put_i64(self.server_time);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ConnectionRequestAccepted> {
        let client_address = try_deser_address(buf)?;
        let _system_index = buf.try_get_u16()?;
        let mut local_addresses = Vec::with_capacity(NUM_LOCAL_ADDRESSES);
        for _ in 0..NUM_LOCAL_ADDRESSES {
            let addr = try_deser_address(buf)?;
            if addr != PLACEHOLDER_LOCAL_ADDRESS {
                local_addresses.push(addr);
            }
        }
        let request_time = buf.try_get_i64()?;
        let server_time = buf.try_get_i64()?;
        Ok(ConnectionRequestAccepted { client_address, local_addresses, request_time, server_time })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectedPing {
    pub time: i64,
}
impl ConnectedPing {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::ConnectedPing.into());
        buf.put_i64(self.time);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ConnectedPing> {
        Ok(ConnectedPing { time: buf.try_get_i64()? })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ConnectedPong {
    pub ping_time: i64,
    pub pong_time: i64,
}
impl ConnectedPong {
    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(PacketId::ConnectedPong.into());
        buf.put_i64(self.ping_time);
        buf.put_i64(self.pong_time);
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<ConnectedPong> {
        let ping_time = buf.try_get_i64()?;
        let pong_time = buf.try_get_i64()?;
        Ok(ConnectedPong { ping_time, pong_time })
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;
    use rstest::rstest;
    use crate::protocol::MAGIC;

    fn with_magic(prefix: &[u8], suffix: &[u8]) -> Vec<u8> {
        let mut result = prefix.to_vec();
        result.extend_from_slice(&MAGIC);
        result.extend_from_slice(suffix);
        result
    }

    #[test]
    fn test_unconnected_pong() {
        let pong = UnconnectedPong {
            time: 0x0102,
            server_guid: 3,
            ping_response: Bytes::from_static(b"MCPE;x"),
        };
        let mut buf = BytesMut::new();
        pong.ser(&mut buf);

        let expected = with_magic(
            &[0x1c, 0,0,0,0,0,0,1,2, 0,0,0,0,0,0,0,3],
            &[0, 6, b'M', b'C', b'P', b'E', b';', b'x'],
        );
        assert_eq!(buf.as_ref(), expected.as_slice());
        assert_eq!(buf.len(), 1 + 8 + 8 + 16 + 2 + 6);

        let mut b = &buf[1..];
        assert_eq!(UnconnectedPong::deser(&mut b).unwrap(), pong);
    }

    #[rstest]
    #[case::with_guid(with_magic(&[0,0,0,0,0,0,0,9], &[0,0,0,0,0,0,0,4]), Some(UnconnectedPing { time: 9, client_guid: 4 }))]
    #[case::without_guid(with_magic(&[0,0,0,0,0,0,0,9], &[]), Some(UnconnectedPing { time: 9, client_guid: 0 }))]
    #[case::bad_magic(vec![0,0,0,0,0,0,0,9, 1,2,3,4,5,6,7,8,9,10,11,12,13,14,15,16], None)]
    #[case::truncated(vec![0,0,0,0], None)]
    fn test_unconnected_ping_deser(#[case] buf: Vec<u8>, #[case] expected: Option<UnconnectedPing>) {
        let mut b: &[u8] = &buf;
        assert_eq!(UnconnectedPing::deser(&mut b).ok(), expected);
    }

    #[test]
    fn test_open_connection_request_1() {
        let request = OpenConnectionRequest1 { protocol_version: 10, padding_len: 5 };
        let mut buf = BytesMut::new();
        request.ser(&mut buf);
        assert_eq!(buf.as_ref(), with_magic(&[0x05], &[10, 0,0,0,0,0]).as_slice());

        let mut b = &buf[1..];
        assert_eq!(OpenConnectionRequest1::deser(&mut b).unwrap(), request);
        assert!(b.is_empty());
    }

    #[test]
    fn test_open_connection_reply_1() {
        let mut buf = BytesMut::new();
        OpenConnectionReply1 { server_guid: 7, mtu: 1400 }.ser(&mut buf);
        assert_eq!(buf.as_ref(), with_magic(&[0x06], &[0,0,0,0,0,0,0,7, 0, 0x05, 0x78]).as_slice());
    }

    #[test]
    fn test_open_connection_request_2() {
        let request = OpenConnectionRequest2 {
            server_address: "1.2.3.4:19132".parse().unwrap(),
            mtu: 1200,
            client_guid: -2,
        };
        let mut buf = BytesMut::new();
        request.ser(&mut buf);
        assert_eq!(buf.as_ref(), with_magic(&[0x07], &[4, 0xfe,0xfd,0xfc,0xfb, 0x4a,0xbc, 0x04,0xb0, 0xff,0xff,0xff,0xff,0xff,0xff,0xff,0xfe]).as_slice());

        let mut b = &buf[1..];
        assert_eq!(OpenConnectionRequest2::deser(&mut b).unwrap(), request);
    }

    #[test]
    fn test_open_connection_reply_2() {
        let reply = OpenConnectionReply2 {
            server_guid: 7,
            client_address: "1.2.3.4:5".parse().unwrap(),
            mtu: 576,
        };
        let mut buf = BytesMut::new();
        reply.ser(&mut buf);
        assert_eq!(buf.as_ref(), with_magic(&[0x08], &[0,0,0,0,0,0,0,7, 4, 0xfe,0xfd,0xfc,0xfb, 0,5, 0x02,0x40, 0]).as_slice());

        let mut b = &buf[1..];
        assert_eq!(OpenConnectionReply2::deser(&mut b).unwrap(), reply);
    }

    #[test]
    fn test_incompatible_protocol() {
        let mut buf = BytesMut::new();
        IncompatibleProtocol { server_guid: 1 }.ser(&mut buf);
        let mut expected = vec![0x19, 10];
        expected.extend_from_slice(&MAGIC);
        expected.extend_from_slice(&[0,0,0,0,0,0,0,1]);
        assert_eq!(buf.as_ref(), expected.as_slice());
    }

    #[rstest]
    #[case::already_connected(PacketId::AlreadyConnected, 0x12)]
    #[case::no_free(PacketId::NoFreeIncomingConnections, 0x14)]
    #[case::banned(PacketId::ConnectionBanned, 0x17)]
    #[case::failed(PacketId::ConnectionRequestFailed, 0x11)]
    fn test_connection_rejection(#[case] id: PacketId, #[case] raw_id: u8) {
        let mut buf = BytesMut::new();
        ConnectionRejection { id, server_guid: 2 }.ser(&mut buf);
        assert_eq!(buf.as_ref(), with_magic(&[raw_id], &[0,0,0,0,0,0,0,2]).as_slice());
    }

    #[rstest]
    #[case::plain(vec![0,0,0,0,0,0,0,5, 0,0,0,0,0,0,1,0, 0], Some(ConnectionRequest { client_guid: 5, time: 256, use_security: false }))]
    #[case::security(vec![0,0,0,0,0,0,0,5, 0,0,0,0,0,0,1,0, 1], Some(ConnectionRequest { client_guid: 5, time: 256, use_security: true }))]
    #[case::truncated(vec![0,0,0,0,0,0,0,5, 0,0,0,0,0,0,1,0], None)]
    fn test_connection_request_deser(#[case] buf: Vec<u8>, #[case] expected: Option<ConnectionRequest>) {
        let mut b: &[u8] = &buf;
        assert_eq!(ConnectionRequest::deser(&mut b).ok(), expected);
    }

    #[test]
    fn test_connection_request_accepted() {
        let accepted = ConnectionRequestAccepted {
            client_address: "1.2.3.4:5".parse().unwrap(),
            local_addresses: vec!["127.0.0.1:19132".parse().unwrap(), "[::1]:19132".parse().unwrap()],
            request_time: 11,
            server_time: 12,
        };
        let mut buf = BytesMut::new();
        accepted.ser(&mut buf);

        assert_eq!(buf.len(), 1 + 7 + 2 + (7 + 29 + 8 * 7) + 8 + 8);
        assert_eq!(&buf[..10], &[0x10, 4, 0xfe,0xfd,0xfc,0xfb, 0,5, 0,0]);
        // first placeholder slot
        assert_eq!(&buf[46..53], &[4, 0,0,0,0, 0x4a,0xbc]);

        let mut b = &buf[1..];
        assert_eq!(ConnectionRequestAccepted::deser(&mut b).unwrap(), accepted);
        assert!(b.is_empty());
    }

    #[test]
    fn test_connected_ping_pong() {
        let mut b: &[u8] = &[0,0,0,0,0,0,0,3];
        assert_eq!(ConnectedPing::deser(&mut b).unwrap(), ConnectedPing { time: 3 });

        let mut buf = BytesMut::new();
        ConnectedPong { ping_time: 3, pong_time: 4 }.ser(&mut buf);
        assert_eq!(buf.as_ref(), &[0x03, 0,0,0,0,0,0,0,3, 0,0,0,0,0,0,0,4]);
    }
}
