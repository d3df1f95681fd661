//! Ordered rule list with replace-vs-append insertion and TTL aging.

use sdwn_wire::FlowTableEntry;
use tracing::debug;

/// What one aging pass did to the table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgingOutcome {
    /// Entries removed by this pass
    pub removed: usize,
    /// Whether the entry at position 0 (the default route to the sink) was
    /// among them; the owning node must reset its routing state
    pub default_route_lost: bool,
}

/// Per-node ordered flow rule list.
///
/// Position 0 is reserved for the synthesized default route toward the
/// sink; losing it, by aging or explicit delete, is reported to the caller
/// so the node can fall back to beacon discovery.
#[derive(Debug, Clone, Default)]
pub struct FlowTable {
    entries: Vec<FlowTableEntry>,
}

impl FlowTable {
    /// Create an empty table
    pub fn new() -> Self {
        FlowTable::default()
    }

    /// Insert an entry: an entry whose window list equals an existing one
    /// replaces it in place (position preserved), anything else appends.
    /// Returns the position the entry landed at.
    pub fn insert(&mut self, entry: FlowTableEntry) -> usize {
        if let Some(position) = self
            .entries
            .iter()
            .position(|existing| existing.same_windows(&entry))
        {
            self.entries[position] = entry;
            position
        } else {
            self.entries.push(entry);
            self.entries.len() - 1
        }
    }

    /// Install the default route at position 0, displacing nothing.
    pub fn install_default(&mut self, entry: FlowTableEntry) {
        if let Some(first) = self.entries.first_mut() {
            if first.same_windows(&entry) {
                *first = entry;
                return;
            }
        }
        self.entries.insert(0, entry);
    }

    /// Remove the entry at `position`; removing position 0 is reported as a
    /// lost default route.
    pub fn remove_at(&mut self, position: usize) -> Option<AgingOutcome> {
        if position >= self.entries.len() {
            return None;
        }
        self.entries.remove(position);
        Some(AgingOutcome {
            removed: 1,
            default_route_lost: position == 0,
        })
    }

    /// One aging pass: decrement every non-permanent entry's TTL by `step`,
    /// removing entries that reach zero.
    pub fn age(&mut self, step: u8) -> AgingOutcome {
        let mut outcome = AgingOutcome::default();
        let mut position = 0usize;
        self.entries.retain_mut(|entry| {
            let keep = if entry.stats.is_permanent() {
                true
            } else {
                entry.stats.ttl = entry.stats.ttl.saturating_sub(step);
                entry.stats.ttl > 0
            };
            if !keep {
                outcome.removed += 1;
                if position == 0 {
                    outcome.default_route_lost = true;
                }
            }
            position += 1;
            keep
        });
        if outcome.removed > 0 {
            debug!(removed = outcome.removed, "aged out flow entries");
        }
        outcome
    }

    /// Count one hit against the entry at `position`
    pub fn hit(&mut self, position: usize) {
        if let Some(entry) = self.entries.get_mut(position) {
            entry.stats.count = entry.stats.count.saturating_add(1);
        }
    }

    /// Entry at `position`
    pub fn get(&self, position: usize) -> Option<&FlowTableEntry> {
        self.entries.get(position)
    }

    /// Iterate entries in match order
    pub fn iter(&self) -> impl Iterator<Item = &FlowTableEntry> {
        self.entries.iter()
    }

    /// Number of installed entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table holds no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
