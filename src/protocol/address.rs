use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};
use anyhow::anyhow;
use bytes::{Buf, BufMut};

const ADDRESS_FAMILY_V4: u8 = 4;
const ADDRESS_FAMILY_V6: u8 = 6;

/// RakNet writes the OS level `AF_INET6` constant (as a little-endian u16) in front of IPv6
///  addresses. 23 is the Windows value, which is what clients expect.
const AF_INET6: u16 = 23;

/// Serializes a socket address the way RakNet does. IPv4 address bytes are stored bitwise
///  complemented.
pub fn ser_address(addr: &SocketAddr, buf: &mut impl BufMut) {
    match addr {
        SocketAddr::V4(data) => {
            buf.put_u8(ADDRESS_FAMILY_V4);
            for b in data.ip().octets() {
                buf.put_u8(!b);
            }
            buf.put_u16(data.port());
        }
        SocketAddr::V6(data) => {
            buf.put_u8(ADDRESS_FAMILY_V6);
            buf.put_u16_le(AF_INET6);
            buf.put_u16(data.port());
            buf.put_u32(0);
            buf.put_slice(&data.ip().octets());
            buf.put_u32(data.scope_id());
        }
    }
}

pub fn try_deser_address(buf: &mut impl Buf) -> anyhow::Result<SocketAddr> {
    match buf.try_get_u8()? {
        ADDRESS_FAMILY_V4 => {
            let mut octets = [0u8; 4];
            for o in octets.iter_mut() {
                *o = !buf.try_get_u8()?;
            }
            let port = buf.try_get_u16()?;
            Ok(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port)))
        }
        ADDRESS_FAMILY_V6 => {
            let _family = buf.try_get_u16_le()?;
            let port = buf.try_get_u16()?;
            let _flowinfo = buf.try_get_u32()?;
            let ip = buf.try_get_u128()?;
            let scope_id = buf.try_get_u32()?;
            Ok(SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ip), port, 0, scope_id)))
        }
        family => Err(anyhow!("invalid socket address family {}", family)),
    }
}

/// The number of bytes `ser_address` writes for a given address
pub fn serialized_address_len(addr: &SocketAddr) -> usize {
    if addr.is_ipv4() { 7 } else { 29 }
}
