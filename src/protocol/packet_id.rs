use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The first byte of every raw message and of every encapsulated payload that RakNet itself
///  interprets. Payloads starting with any other byte belong to the application.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum PacketId {
    ConnectedPing = 0x00,
    UnconnectedPing = 0x01,
    ConnectedPong = 0x03,
    OpenConnectionRequest1 = 0x05,
    OpenConnectionReply1 = 0x06,
    OpenConnectionRequest2 = 0x07,
    OpenConnectionReply2 = 0x08,
    ConnectionRequest = 0x09,
    ConnectionRequestAccepted = 0x10,
    ConnectionRequestFailed = 0x11,
    AlreadyConnected = 0x12,
    NewIncomingConnection = 0x13,
    NoFreeIncomingConnections = 0x14,
    Disconnected = 0x15,
    ConnectionBanned = 0x17,
    IncompatibleProtocol = 0x19,
    UnconnectedPong = 0x1c,
}

impl PacketId {
    /// Parses the leading id byte, returning `None` for application payloads
    pub fn of(buf: &[u8]) -> Option<PacketId> {
        buf.first()
            .and_then(|&b| PacketId::try_from_primitive(b).ok())
    }
}
