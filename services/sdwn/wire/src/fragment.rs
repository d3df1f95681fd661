//! Fragmentation of oversized control payloads.
//!
//! Payloads that do not fit one packet are split into
//! `[id, part, total, slice]` fragments and carried inside REQUEST packets
//! (node to controller) or CONFIG function-install packets (controller to
//! node); both planes share this module. Reassembly is keyed by
//! `(source, id)` and completes exactly when the number of distinct
//! collected parts reaches the total announced by the set's first fragment.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::addr::NodeId;
use crate::error::WireError;
use crate::packet::{HEADER_LEN, MAX_PACKET_LEN};

/// Fragment header size: id, part index, total parts
pub const FRAGMENT_HEADER_LEN: usize = 3;

/// Payload budget of one fragment once packet and fragment headers are paid
pub const MAX_FRAGMENT_DATA: usize = MAX_PACKET_LEN - HEADER_LEN - FRAGMENT_HEADER_LEN;

/// Splits payloads into fragment payloads, cycling a per-source id.
#[derive(Debug, Default)]
pub struct Fragmenter {
    next_id: u8,
}

impl Fragmenter {
    /// Create a fragmenter starting at id 0
    pub fn new() -> Self {
        Fragmenter::default()
    }

    /// Split `payload` into ready-to-send fragment payloads.
    ///
    /// Errors when the payload would need more than 255 parts.
    pub fn split(&mut self, payload: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
        self.split_with_id(None, payload)
    }

    /// Split with a caller-chosen set id (function installs key fragments by
    /// the function id instead of the rolling counter).
    pub fn split_with_id(
        &mut self,
        id: Option<u8>,
        payload: &[u8],
    ) -> Result<Vec<Vec<u8>>, WireError> {
        let total = payload.len().div_ceil(MAX_FRAGMENT_DATA).max(1);
        let total = u8::try_from(total).map_err(|_| WireError::Size(payload.len()))?;

        let id = id.unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            id
        });

        let mut fragments = Vec::with_capacity(total as usize);
        for part in 0..total {
            let start = part as usize * MAX_FRAGMENT_DATA;
            let end = (start + MAX_FRAGMENT_DATA).min(payload.len());
            let mut fragment = Vec::with_capacity(FRAGMENT_HEADER_LEN + end - start);
            fragment.push(id);
            fragment.push(part);
            fragment.push(total);
            fragment.extend_from_slice(&payload[start..end]);
            fragments.push(fragment);
        }
        Ok(fragments)
    }
}

#[derive(Debug)]
struct PendingSet {
    total: u8,
    parts: HashMap<u8, Vec<u8>>,
    first_seen: Instant,
}

/// Collects fragments back into complete payloads.
#[derive(Debug, Default)]
pub struct Reassembler {
    pending: HashMap<(NodeId, u8), PendingSet>,
}

impl Reassembler {
    /// Create an empty reassembler
    pub fn new() -> Self {
        Reassembler::default()
    }

    /// Feed one fragment payload from `source`.
    ///
    /// Returns the reassembled payload once the set is complete, clearing
    /// the pending entry; duplicates and fragments disagreeing with the
    /// set's announced total are ignored.
    pub fn feed(&mut self, source: NodeId, fragment: &[u8]) -> Result<Option<Vec<u8>>, WireError> {
        if fragment.len() < FRAGMENT_HEADER_LEN {
            return Err(WireError::Malformed);
        }
        let (id, part, total) = (fragment[0], fragment[1], fragment[2]);
        if total == 0 || part >= total {
            return Err(WireError::Malformed);
        }

        let set = self
            .pending
            .entry((source, id))
            .or_insert_with(|| PendingSet {
                total,
                parts: HashMap::new(),
                first_seen: Instant::now(),
            });
        if total != set.total {
            debug!(%source, id, "fragment disagrees with announced total, ignored");
            return Ok(None);
        }
        set.parts
            .entry(part)
            .or_insert_with(|| fragment[FRAGMENT_HEADER_LEN..].to_vec());

        if set.parts.len() < set.total as usize {
            return Ok(None);
        }

        let mut set = match self.pending.remove(&(source, id)) {
            Some(set) => set,
            None => return Ok(None),
        };
        let mut payload = Vec::new();
        for part in 0..set.total {
            if let Some(slice) = set.parts.remove(&part) {
                payload.extend_from_slice(&slice);
            }
        }
        Ok(Some(payload))
    }

    /// Drop pending sets older than `age`, returning how many were dropped
    pub fn expire_older_than(&mut self, age: Duration) -> usize {
        let before = self.pending.len();
        self.pending
            .retain(|_, set| set.first_seen.elapsed() <= age);
        before - self.pending.len()
    }

    /// Number of incomplete fragment sets
    pub fn pending_sets(&self) -> usize {
        self.pending.len()
    }
}
