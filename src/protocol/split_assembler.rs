use std::collections::VecDeque;
use std::time::Duration;
use anyhow::bail;
use bytes::{BufMut, Bytes, BytesMut};
use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, trace};
use crate::protocol::encapsulated::EncapsulatedPacket;
use crate::util::safe_converter::SafeCast;

/// Retransmitted parts of a compound can arrive after it was completed. Compound ids wrap at
///  2^16, so remembering the most recent ones is enough to recognize them.
const COMPLETED_HISTORY_LEN: usize = 64;

struct PendingCompound {
    count: u32,
    parts: Vec<Option<Bytes>>,
    num_received: u32,
    last_progress: Instant,
}

/// Reassembles split encapsulated packets. Bounded both in the number of parts per compound and
///  in the number of compounds that are in progress at the same time, since a peer can send
///  split metadata for arbitrarily large payloads.
pub struct SplitAssembler {
    max_split_count: u32,
    max_concurrent_splits: usize,
    pending: FxHashMap<u16, PendingCompound>,
    recently_completed: VecDeque<u16>,
}

impl SplitAssembler {
    pub fn new(max_split_count: u32, max_concurrent_splits: usize) -> SplitAssembler {
        SplitAssembler {
            max_split_count,
            max_concurrent_splits,
            pending: FxHashMap::default(),
            recently_completed: VecDeque::with_capacity(COMPLETED_HISTORY_LEN),
        }
    }

    /// Returns unsplit packets unchanged. For split packets, returns the reassembled packet once
    ///  the last missing part arrives, and `None` before that.
    pub fn on_packet(&mut self, packet: EncapsulatedPacket, now: Instant) -> anyhow::Result<Option<EncapsulatedPacket>> {
        let split = match packet.split {
            None => return Ok(Some(packet)),
            Some(split) => split,
        };

        if !self.pending.contains_key(&split.compound_id) && self.recently_completed.contains(&split.compound_id) {
            trace!("part {} of completed compound {} - ignoring", split.index, split.compound_id);
            return Ok(None);
        }

        if split.count == 0 || split.count > self.max_split_count {
            bail!("split packet with {} parts exceeds limit of {}", split.count, self.max_split_count);
        }
        if split.index >= split.count {
            bail!("split packet index {} out of range for {} parts", split.index, split.count);
        }

        if !self.pending.contains_key(&split.compound_id) && self.pending.len() >= self.max_concurrent_splits {
            bail!("too many concurrent split packets");
        }

        let pending = self.pending
            .entry(split.compound_id)
            .or_insert_with(|| PendingCompound {
                count: split.count,
                parts: vec![None; split.count.safe_cast()],
                num_received: 0,
                last_progress: now,
            });

        if pending.count != split.count {
            bail!("inconsistent part count for compound {}: {} vs. {}", split.compound_id, pending.count, split.count);
        }

        let slot = &mut pending.parts[split.index.safe_cast()];
        if slot.is_some() {
            trace!("duplicate part {} of compound {} - ignoring", split.index, split.compound_id);
            return Ok(None);
        }
        *slot = Some(packet.payload.clone());
        pending.num_received += 1;
        pending.last_progress = now;

        if pending.num_received < pending.count {
            return Ok(None);
        }

        let Some(complete) = self.pending.remove(&split.compound_id) else {
            return Ok(None);
        };
        if self.recently_completed.len() >= COMPLETED_HISTORY_LEN {
            self.recently_completed.pop_front();
        }
        self.recently_completed.push_back(split.compound_id);
        let total_len = complete.parts.iter()
            .map(|p| p.as_ref().map(|b| b.len()).unwrap_or(0))
            .sum();
        let mut buf = BytesMut::with_capacity(total_len);
        for part in complete.parts.into_iter().flatten() {
            buf.put_slice(&part);
        }

        Ok(Some(EncapsulatedPacket {
            split: None,
            payload: buf.freeze(),
            ..packet
        }))
    }

    /// Drops compounds that did not receive a new part for `timeout`, so that abandoned
    ///  compounds do not use up the concurrency limit
    pub fn evict_stale(&mut self, now: Instant, timeout: Duration) {
        self.pending.retain(|compound_id, pending| {
            let keep = now.saturating_duration_since(pending.last_progress) < timeout;
            if !keep {
                debug!("split compound {} with {} of {} parts timed out", compound_id, pending.num_received, pending.count);
            }
            keep
        });
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }
}
