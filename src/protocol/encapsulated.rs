use anyhow::bail;
use bytes::{Buf, BufMut, Bytes};
use crate::protocol::reliability::Reliability;
use crate::protocol::{FLAG_RELIABILITY_MASK, FLAG_SPLIT};
use crate::util::buf_ext::{BufExt, BufMutExt};
use crate::util::safe_converter::PrecheckedCast;

/// flags (u8) + payload length in bits (u16)
pub const BASE_HEADER_LEN: usize = 3;
/// compound size (u32) + compound id (u16) + index (u32)
pub const SPLIT_HEADER_LEN: usize = 10;


/// Describes where a fragment of a split ('compound') payload belongs
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SplitInfo {
    /// total number of parts of the compound
    pub count: u32,
    pub compound_id: u16,
    pub index: u32,
}

/// One application payload (or a fragment of one) together with its reliability metadata.
///
/// Index fields are only transmitted if the reliability mode calls for them; otherwise they
///  are 0. All indices are 24 bit on the wire.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct EncapsulatedPacket {
    pub reliability: Reliability,
    pub reliable_index: u32,
    pub sequenced_index: u32,
    pub ordered_index: u32,
    pub ordered_channel: u8,
    pub split: Option<SplitInfo>,
    pub payload: Bytes,
}

impl EncapsulatedPacket {
    pub fn new(reliability: Reliability, payload: Bytes) -> EncapsulatedPacket {
        EncapsulatedPacket {
            reliability,
            reliable_index: 0,
            sequenced_index: 0,
            ordered_index: 0,
            ordered_channel: 0,
            split: None,
            payload,
        }
    }

    pub fn header_len(&self) -> usize {
        BASE_HEADER_LEN
            + self.reliability.header_extra_bytes()
            + if self.split.is_some() { SPLIT_HEADER_LEN } else { 0 }
    }

    pub fn serialized_len(&self) -> usize {
        self.header_len() + self.payload.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let mut flags = self.reliability.code() << 5;
        if self.split.is_some() {
            flags |= FLAG_SPLIT;
        }
        buf.put_u8(flags);

        let len_in_bits: u16 = (self.payload.len() * 8).prechecked_cast();
        buf.put_u16(len_in_bits);

        if self.reliability.is_reliable() {
            buf.put_u24_le(self.reliable_index);
        }
        if self.reliability.is_sequenced() {
            buf.put_u24_le(self.sequenced_index);
        }
        if self.reliability.has_ordering_info() {
            buf.put_u24_le(self.ordered_index);
            buf.put_u8(self.ordered_channel);
        }

        if let Some(split) = &self.split {
            buf.put_u32(split.count);
            buf.put_u16(split.compound_id);
            buf.put_u32(split.index);
        }

        buf.put_slice(&self.payload);
    }

    /// Decodes a single encapsulated packet from the front of `buf`. The payload shares the
    ///  underlying memory with `buf`.
    pub fn deser(buf: &mut Bytes) -> anyhow::Result<EncapsulatedPacket> {
        let flags = buf.try_get_u8()?;
        let reliability = Reliability::from_code((flags & FLAG_RELIABILITY_MASK) >> 5)?;
        let is_split = flags & FLAG_SPLIT != 0;

        let len_in_bits = buf.try_get_u16()?;
        let len = (len_in_bits as usize + 7) >> 3;

        let reliable_index = if reliability.is_reliable() { buf.try_get_u24_le()? } else { 0 };
        let sequenced_index = if reliability.is_sequenced() { buf.try_get_u24_le()? } else { 0 };
        let (ordered_index, ordered_channel) = if reliability.has_ordering_info() {
            (buf.try_get_u24_le()?, buf.try_get_u8()?)
        }
        else {
            (0, 0)
        };

        let split = if is_split {
            Some(SplitInfo {
                count: buf.try_get_u32()?,
                compound_id: buf.try_get_u16()?,
                index: buf.try_get_u32()?,
            })
        }
        else {
            None
        };

        if buf.remaining() < len {
            bail!("encapsulated payload of {} bytes exceeds remaining buffer of {} bytes", len, buf.remaining());
        }
        let payload = buf.split_to(len);

        Ok(EncapsulatedPacket {
            reliability,
            reliable_index,
            sequenced_index,
            ordered_index,
            ordered_channel,
            split,
            payload,
        })
    }
}
