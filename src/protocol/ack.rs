use std::collections::BTreeSet;
use anyhow::bail;
use bytes::{Buf, BufMut};
use crate::util::buf_ext::{BufExt, BufMutExt};
use crate::util::safe_converter::PrecheckedCast;

const RECORD_RANGE: u8 = 0;
const RECORD_SINGLE: u8 = 1;

/// Body of an ACK or NACK datagram: a list of (inclusive) datagram sequence number ranges.
///
/// ```ascii
/// 0: number of records (u16 BE)
/// *: per record:
///    0: 1 for a single sequence number, 0 for a range
///    1: start (u24 LE)
///    4: end (u24 LE), only for ranges
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct AckRecords {
    pub ranges: Vec<(u32, u32)>,
}

impl AckRecords {
    /// Collapses sequence numbers into as few ranges as possible. Wraparound at 2^24 is not
    ///  collapsed, it just starts a new range.
    pub fn from_sequence_numbers(sequence_numbers: &BTreeSet<u32>) -> AckRecords {
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        for &n in sequence_numbers {
            match ranges.last_mut() {
                Some((_, end)) if end.checked_add(1) == Some(n) => *end = n,
                _ => ranges.push((n, n)),
            }
        }
        AckRecords { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn serialized_len(&self) -> usize {
        2 + self.ranges.iter()
            .map(|(start, end)| if start == end { 4 } else { 7 })
            .sum::<usize>()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let num_records: u16 = self.ranges.len().prechecked_cast();
        buf.put_u16(num_records);
        for &(start, end) in &self.ranges {
            if start == end {
                buf.put_u8(RECORD_SINGLE);
                buf.put_u24_le(start);
            }
            else {
                buf.put_u8(RECORD_RANGE);
                buf.put_u24_le(start);
                buf.put_u24_le(end);
            }
        }
    }

    pub fn deser(buf: &mut impl Buf) -> anyhow::Result<AckRecords> {
        let num_records = buf.try_get_u16()?;
        let mut ranges = Vec::with_capacity(num_records as usize);
        for _ in 0..num_records {
            let range = match buf.try_get_u8()? {
                RECORD_SINGLE => {
                    let n = buf.try_get_u24_le()?;
                    (n, n)
                }
                RECORD_RANGE => {
                    let start = buf.try_get_u24_le()?;
                    let end = buf.try_get_u24_le()?;
                    if end < start {
                        bail!("ACK range end {} is before its start {}", end, start);
                    }
                    (start, end)
                }
                b => bail!("invalid ACK record discriminator {}", b),
            };
            ranges.push(range);
        }
        Ok(AckRecords { ranges })
    }
}
