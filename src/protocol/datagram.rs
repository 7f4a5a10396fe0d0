use anyhow::bail;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::protocol::ack::AckRecords;
use crate::protocol::encapsulated::{EncapsulatedPacket, SplitInfo};
use crate::protocol::reliability::Reliability;
use crate::protocol::{split_threshold, DATAGRAM_HEADER_SIZE, FLAG_ACK, FLAG_CONTINUOUS_SEND, FLAG_NACK, FLAG_VALID};
use crate::util::buf_ext::{BufExt, BufMutExt};
use crate::util::safe_converter::PrecheckedCast;

const U24_MASK: u32 = 0xff_ffff;


/// A framed (i.e. 'online') datagram carrying application data
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Datagram {
    pub flags: u8,
    pub sequence_number: u32,
    pub packets: Vec<EncapsulatedPacket>,
}

impl Datagram {
    pub fn serialized_len(&self) -> usize {
        DATAGRAM_HEADER_SIZE + self.packets.iter()
            .map(|p| p.serialized_len())
            .sum::<usize>()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.flags);
        buf.put_u24_le(self.sequence_number);
        for p in &self.packets {
            p.ser(buf);
        }
    }

    /// Expects the flag byte to be consumed already
    fn deser_after_flags(flags: u8, buf: &mut Bytes) -> anyhow::Result<Datagram> {
        let sequence_number = buf.try_get_u24_le()?;
        let mut packets = Vec::new();
        while buf.has_remaining() {
            packets.push(EncapsulatedPacket::deser(buf)?);
        }
        Ok(Datagram {
            flags,
            sequence_number,
            packets,
        })
    }
}

/// Everything that can arrive in a datagram with the 'valid' bit set
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FramedDatagram {
    Ack(AckRecords),
    Nack(AckRecords),
    Data(Datagram),
}

impl FramedDatagram {
    /// A failure anywhere in the datagram invalidates all of it
    pub fn deser(mut buf: Bytes) -> anyhow::Result<FramedDatagram> {
        let flags = buf.try_get_u8()?;
        if flags & FLAG_VALID == 0 {
            bail!("not a framed datagram: flags {:#04x}", flags);
        }

        let result = if flags & FLAG_ACK != 0 {
            FramedDatagram::Ack(AckRecords::deser(&mut buf)?)
        }
        else if flags & FLAG_NACK != 0 {
            FramedDatagram::Nack(AckRecords::deser(&mut buf)?)
        }
        else {
            FramedDatagram::Data(Datagram::deser_after_flags(flags, &mut buf)?)
        };

        if buf.has_remaining() {
            bail!("{} trailing bytes after framed datagram", buf.remaining());
        }
        Ok(result)
    }
}


/// The outbound half of a session's framing: it owns the counters that are assigned at send
///  time and packs encapsulated packets into datagrams that fit the peer's MTU.
#[derive(Debug)]
pub struct DatagramFramer {
    adjusted_mtu: usize,
    next_sequence_number: u32,
    next_reliable_index: u32,
    next_sequenced_index: u32,
    next_ordered_index: u32,
    next_compound_id: u16,
}

impl DatagramFramer {
    pub fn new(adjusted_mtu: usize) -> DatagramFramer {
        DatagramFramer {
            adjusted_mtu,
            next_sequence_number: 0,
            next_reliable_index: 0,
            next_sequenced_index: 0,
            next_ordered_index: 0,
            next_compound_id: 0,
        }
    }

    fn next_u24(counter: &mut u32) -> u32 {
        let result = *counter;
        *counter = (*counter + 1) & U24_MASK;
        result
    }

    /// Wraps an application payload into one or more encapsulated packets, splitting it if it
    ///  does not fit into a single datagram. All messages go through ordering channel 0.
    pub fn encapsulate(&mut self, payload: Bytes, reliability: Reliability) -> Vec<EncapsulatedPacket> {
        let max_part_len = split_threshold(self.adjusted_mtu);

        let sequenced_index = if reliability.is_sequenced() {
            Self::next_u24(&mut self.next_sequenced_index)
        }
        else {
            0
        };
        // NB: sequenced packets carry the ordered index of the *next* ordered message
        let ordered_index = if reliability.is_ordered() {
            Self::next_u24(&mut self.next_ordered_index)
        }
        else if reliability.is_sequenced() {
            self.next_ordered_index
        }
        else {
            0
        };

        let mut template = EncapsulatedPacket::new(reliability, Bytes::new());
        template.sequenced_index = sequenced_index;
        template.ordered_index = ordered_index;

        if payload.len() <= max_part_len {
            if reliability.is_reliable() {
                template.reliable_index = Self::next_u24(&mut self.next_reliable_index);
            }
            template.payload = payload;
            return vec![template];
        }

        let count = payload.len().div_ceil(max_part_len);
        let compound_id = self.next_compound_id;
        self.next_compound_id = self.next_compound_id.wrapping_add(1);

        let mut remaining = payload;
        let mut result = Vec::with_capacity(count);
        for index in 0..count {
            let part_len = max_part_len.min(remaining.len());

            let mut part = template.clone();
            if reliability.is_reliable() {
                part.reliable_index = Self::next_u24(&mut self.next_reliable_index);
            }
            part.split = Some(SplitInfo {
                count: count.prechecked_cast(),
                compound_id,
                index: index.prechecked_cast(),
            });
            part.payload = remaining.split_to(part_len);
            result.push(part);
        }
        result
    }

    /// Packs encapsulated packets into as few datagrams as possible, preserving their order,
    ///  and serializes them. Each datagram gets the next sequence number.
    pub fn pack(&mut self, packets: Vec<EncapsulatedPacket>) -> Vec<Bytes> {
        let mut result = Vec::new();
        let mut current: Vec<EncapsulatedPacket> = Vec::new();
        let mut current_len = DATAGRAM_HEADER_SIZE;

        for p in packets {
            if !current.is_empty() && current_len + p.serialized_len() > self.adjusted_mtu {
                result.push(self.finish_datagram(std::mem::take(&mut current)));
                current_len = DATAGRAM_HEADER_SIZE;
            }
            current_len += p.serialized_len();
            current.push(p);
        }
        if !current.is_empty() {
            result.push(self.finish_datagram(current));
        }
        result
    }

    fn finish_datagram(&mut self, packets: Vec<EncapsulatedPacket>) -> Bytes {
        let mut flags = FLAG_VALID;
        if packets.iter().any(|p| p.split.is_some()) {
            flags |= FLAG_CONTINUOUS_SEND;
        }

        let datagram = Datagram {
            flags,
            sequence_number: Self::next_u24(&mut self.next_sequence_number),
            packets,
        };

        let len = datagram.serialized_len();
        assert!(len <= self.adjusted_mtu, "this is a bug: datagram of {} bytes exceeds adjusted MTU of {}", len, self.adjusted_mtu);

        let mut buf = BytesMut::with_capacity(len);
        datagram.ser(&mut buf);
        buf.freeze()
    }

    /// ACK datagrams carry no sequence number of their own
    pub fn ack_datagram(&self, records: &AckRecords) -> Bytes {
        let mut buf = BytesMut::with_capacity(1 + records.serialized_len());
        buf.put_u8(FLAG_VALID | FLAG_ACK);
        records.ser(&mut buf);
        buf.freeze()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_deser_data() {
        let buf = Bytes::from_static(&[
            0x84, 3, 0, 0,
            0x00, 0, 16, 0xfe, 1,
            0x40, 0, 8, 7, 0, 0, 0x13,
        ]);
        let expected = FramedDatagram::Data(Datagram {
            flags: 0x84,
            sequence_number: 3,
            packets: vec![
                EncapsulatedPacket::new(Reliability::Unreliable, Bytes::from_static(&[0xfe, 1])),
                EncapsulatedPacket {
                    reliable_index: 7,
                    ..EncapsulatedPacket::new(Reliability::Reliable, Bytes::from_static(&[0x13]))
                },
            ],
        });
        assert_eq!(FramedDatagram::deser(buf).unwrap(), expected);
    }

    #[test]
    fn test_deser_empty_data() {
        let buf = Bytes::from_static(&[0x80, 1, 2, 3]);
        let expected = FramedDatagram::Data(Datagram {
            flags: 0x80,
            sequence_number: 0x03_0201,
            packets: vec![],
        });
        assert_eq!(FramedDatagram::deser(buf).unwrap(), expected);
    }

    #[rstest]
    #[case::ack(vec![0xc0, 0, 1, 1, 5, 0, 0], FramedDatagram::Ack(AckRecords { ranges: vec![(5, 5)] }))]
    #[case::nack(vec![0xa0, 0, 1, 0, 1, 0, 0, 3, 0, 0], FramedDatagram::Nack(AckRecords { ranges: vec![(1, 3)] }))]
    fn test_deser_ack_nack(#[case] buf: Vec<u8>, #[case] expected: FramedDatagram) {
        assert_eq!(FramedDatagram::deser(Bytes::from(buf)).unwrap(), expected);
    }

    #[rstest]
    #[case::empty(vec![])]
    #[case::not_valid(vec![0x05, 0, 0, 0])]
    #[case::truncated_sequence(vec![0x80, 1, 2])]
    #[case::truncated_packet(vec![0x80, 0, 0, 0, 0x00, 0, 16, 1])]
    #[case::truncated_second_packet(vec![0x80, 0, 0, 0, 0x00, 0, 8, 1, 0x40])]
    #[case::invalid_ack(vec![0xc0, 0, 1, 9, 0, 0, 0])]
    #[case::trailing_after_ack(vec![0xc0, 0, 0, 1])]
    fn test_deser_malformed(#[case] buf: Vec<u8>) {
        assert!(FramedDatagram::deser(Bytes::from(buf)).is_err());
    }

    #[test]
    fn test_encapsulate_small() {
        let mut framer = DatagramFramer::new(1372);
        let packets = framer.encapsulate(Bytes::from_static(b"abc"), Reliability::Reliable);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].reliable_index, 0);
        assert_eq!(packets[0].split, None);

        let packets = framer.encapsulate(Bytes::from_static(b"abc"), Reliability::Reliable);
        assert_eq!(packets[0].reliable_index, 1);

        let packets = framer.encapsulate(Bytes::from_static(b"abc"), Reliability::Unreliable);
        assert_eq!(packets[0].reliable_index, 0);
    }

    #[test]
    fn test_encapsulate_ordered() {
        let mut framer = DatagramFramer::new(1372);
        let first = framer.encapsulate(Bytes::from_static(b"a"), Reliability::ReliableOrdered);
        let seq = framer.encapsulate(Bytes::from_static(b"b"), Reliability::UnreliableSequenced);
        let second = framer.encapsulate(Bytes::from_static(b"c"), Reliability::ReliableOrdered);

        assert_eq!(first[0].ordered_index, 0);
        assert_eq!(seq[0].ordered_index, 1);
        assert_eq!(seq[0].sequenced_index, 0);
        assert_eq!(second[0].ordered_index, 1);
    }

    #[rstest]
    #[case::exact_fit(548, 516, 1)]
    #[case::one_more(548, 517, 2)]
    #[case::three_parts(548, 1500, 3)]
    #[case::max_mtu(1372, 4000, 3)]
    fn test_encapsulate_split(#[case] adjusted_mtu: usize, #[case] payload_len: usize, #[case] expected_parts: usize) {
        let mut framer = DatagramFramer::new(adjusted_mtu);
        // consume a compound id to see it is shared by all parts
        let _ = framer.encapsulate(Bytes::from(vec![0u8; 2 * adjusted_mtu]), Reliability::Reliable);

        let payload: Vec<u8> = (0..payload_len).map(|i| i as u8).collect();
        let packets = framer.encapsulate(Bytes::from(payload.clone()), Reliability::ReliableOrdered);
        assert_eq!(packets.len(), expected_parts);

        if expected_parts == 1 {
            assert_eq!(packets[0].split, None);
        }
        else {
            for (i, p) in packets.iter().enumerate() {
                let split = p.split.unwrap();
                assert_eq!(split.count as usize, expected_parts);
                assert_eq!(split.compound_id, 1);
                assert_eq!(split.index as usize, i);
                assert_eq!(p.ordered_index, packets[0].ordered_index);
                assert!(p.payload.len() <= split_threshold(adjusted_mtu));
            }
            let reliable_indices: Vec<u32> = packets.iter().map(|p| p.reliable_index).collect();
            let mut sorted = reliable_indices.clone();
            sorted.dedup();
            assert_eq!(sorted.len(), reliable_indices.len());
        }

        let reassembled: Vec<u8> = packets.iter()
            .flat_map(|p| p.payload.iter().cloned())
            .collect();
        assert_eq!(reassembled, payload);
    }

    #[test]
    fn test_pack_sequence_numbers_and_flags() {
        let mut framer = DatagramFramer::new(548);
        let packets = framer.encapsulate(Bytes::from(vec![1u8; 1000]), Reliability::Reliable);
        assert_eq!(packets.len(), 2);

        let datagrams = framer.pack(packets);
        assert_eq!(datagrams.len(), 2);
        for (i, d) in datagrams.iter().enumerate() {
            assert!(d.len() <= 548);
            match FramedDatagram::deser(d.clone()).unwrap() {
                FramedDatagram::Data(datagram) => {
                    assert_eq!(datagram.flags, FLAG_VALID | FLAG_CONTINUOUS_SEND);
                    assert_eq!(datagram.sequence_number as usize, i);
                    assert_eq!(datagram.packets.len(), 1);
                }
                other => panic!("unexpected {:?}", other),
            }
        }

        let datagrams = framer.pack(framer_packets(&mut DatagramFramer::new(548), 1));
        match FramedDatagram::deser(datagrams[0].clone()).unwrap() {
            FramedDatagram::Data(datagram) => {
                assert_eq!(datagram.flags, FLAG_VALID);
                assert_eq!(datagram.sequence_number, 2);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    fn framer_packets(framer: &mut DatagramFramer, n: usize) -> Vec<EncapsulatedPacket> {
        (0..n)
            .flat_map(|_| framer.encapsulate(Bytes::from_static(&[0xfe; 100]), Reliability::Reliable))
            .collect()
    }

    #[test]
    fn test_pack_combines_small_packets() {
        let mut framer = DatagramFramer::new(548);
        // 106 bytes per encapsulated packet with reliable header: 5 fit into 548 - 4
        let packets = framer_packets(&mut framer, 6);
        let datagrams = framer.pack(packets);
        assert_eq!(datagrams.len(), 2);
        assert_eq!(datagrams[0].len(), 4 + 5 * 106);
        assert_eq!(datagrams[1].len(), 4 + 106);
    }

    #[test]
    fn test_sequence_number_wraps() {
        let mut framer = DatagramFramer::new(548);
        framer.next_sequence_number = U24_MASK;
        let packets = framer_packets(&mut DatagramFramer::new(548), 2);
        let datagrams = framer.pack(packets);
        // both fit into one datagram
        assert_eq!(datagrams.len(), 1);
        assert_eq!(framer.next_sequence_number, 0);
    }

    #[test]
    #[should_panic(expected = "this is a bug")]
    fn test_pack_oversized_packet_is_a_bug() {
        let mut framer = DatagramFramer::new(548);
        let packet = EncapsulatedPacket::new(Reliability::Unreliable, Bytes::from(vec![0u8; 600]));
        framer.pack(vec![packet]);
    }

    #[test]
    fn test_ack_datagram() {
        let framer = DatagramFramer::new(548);
        let buf = framer.ack_datagram(&AckRecords { ranges: vec![(5, 5)] });
        assert_eq!(buf.as_ref(), &[0xc0, 0, 1, 1, 5, 0, 0]);
    }
}
