//! The mergeable store and its last-writer-wins merge.

use crate::delta::{Delta, Stamped};
use driftlist_types::{CellValue, ReplicaId, Stamp};
use std::collections::BTreeMap;

/// Live content of one table: row id → cell name → value.
pub type TableContent = BTreeMap<String, BTreeMap<String, CellValue>>;

#[derive(Clone, Debug)]
struct Cell {
    value: Option<CellValue>,
    stamp: Stamp,
}

#[derive(Clone, Debug)]
struct Row {
    present: Stamped<bool>,
    cells: BTreeMap<String, Cell>,
}

impl Row {
    /// A row that exists structurally but has never been written: ordered
    /// below every real write so any incoming stamp beats it.
    fn unborn() -> Self {
        Self {
            present: Stamped::new(false, Stamp::zero()),
            cells: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Table {
    rows: BTreeMap<String, Row>,
}

/// In-memory tabular store with per-cell logical stamps and conflict-free
/// merge.
///
/// Local mutations are synchronous, stamp their writes from this replica's
/// Lamport counter, and accumulate in a pending delta for the synchronizer
/// to drain. [`MergeableStore::merge`] folds in a foreign delta and returns
/// the subset that actually won, which is exactly what a relay must forward
/// to the other connected replicas.
#[derive(Clone, Debug)]
pub struct MergeableStore {
    replica: ReplicaId,
    clock: u64,
    change_seq: u64,
    tables: BTreeMap<String, Table>,
    pending: Delta,
}

impl MergeableStore {
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            clock: 0,
            change_seq: 0,
            tables: BTreeMap::new(),
            pending: Delta::default(),
        }
    }

    pub fn replica(&self) -> &ReplicaId {
        &self.replica
    }

    /// Monotonic counter bumped by every effective mutation, local or
    /// merged. Lets persistence detect dirtiness without diffing content.
    pub fn change_seq(&self) -> u64 {
        self.change_seq
    }

    fn next_stamp(&mut self) -> Stamp {
        self.clock += 1;
        Stamp::new(self.clock, self.replica.clone())
    }

    // ── Local mutations ─────────────────────────────────────────────

    /// Writes one cell, creating (or resurrecting) the row if needed.
    pub fn set_cell(&mut self, table: &str, row: &str, cell: &str, value: impl Into<CellValue>) {
        self.ensure_live_row(table, row);
        let stamp = self.next_stamp();
        let write = Stamped::new(Some(value.into()), stamp);
        self.apply_cell(table, row, cell, &write);
        self.pending.record_cell(table, row, cell, write);
        self.change_seq += 1;
    }

    /// Writes a whole row of cells under a single presence write.
    pub fn set_row(
        &mut self,
        table: &str,
        row: &str,
        cells: impl IntoIterator<Item = (String, CellValue)>,
    ) {
        self.ensure_live_row(table, row);
        for (cell, value) in cells {
            let stamp = self.next_stamp();
            let write = Stamped::new(Some(value), stamp);
            self.apply_cell(table, row, &cell, &write);
            self.pending.record_cell(table, row, &cell, write);
        }
        self.change_seq += 1;
    }

    /// Tombstones one cell.
    pub fn delete_cell(&mut self, table: &str, row: &str, cell: &str) {
        let stamp = self.next_stamp();
        let write = Stamped::new(None, stamp);
        self.apply_cell(table, row, cell, &write);
        self.pending.record_cell(table, row, cell, write);
        self.change_seq += 1;
    }

    /// Tombstones a row: the presence flag flips to absent and every live
    /// cell is tombstoned under the same stamp, so the content is purged
    /// rather than merely hidden.
    pub fn delete_row(&mut self, table: &str, row: &str) {
        let stamp = self.next_stamp();
        let presence = Stamped::new(false, stamp.clone());
        self.apply_presence(table, row, &presence);
        self.pending.record_presence(table, row, presence);

        let live_cells: Vec<String> = self
            .tables
            .get(table)
            .and_then(|t| t.rows.get(row))
            .map(|r| {
                r.cells
                    .iter()
                    .filter(|(_, c)| c.value.is_some())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();

        for cell in live_cells {
            let write = Stamped::new(None, stamp.clone());
            self.apply_cell(table, row, &cell, &write);
            self.pending.record_cell(table, row, &cell, write);
        }
        self.change_seq += 1;
    }

    fn ensure_live_row(&mut self, table: &str, row: &str) {
        let live = self
            .tables
            .get(table)
            .and_then(|t| t.rows.get(row))
            .map(|r| r.present.value)
            .unwrap_or(false);
        if !live {
            let stamp = self.next_stamp();
            let presence = Stamped::new(true, stamp);
            self.apply_presence(table, row, &presence);
            self.pending.record_presence(table, row, presence);
        }
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Whether a row exists and is live (not tombstoned).
    pub fn has_row(&self, table: &str, row: &str) -> bool {
        self.tables
            .get(table)
            .and_then(|t| t.rows.get(row))
            .map(|r| r.present.value)
            .unwrap_or(false)
    }

    /// Reads one cell of a live row.
    pub fn cell(&self, table: &str, row: &str, cell: &str) -> Option<&CellValue> {
        let r = self.tables.get(table)?.rows.get(row)?;
        if !r.present.value {
            return None;
        }
        r.cells.get(cell)?.value.as_ref()
    }

    /// Live row ids of a table, in id order.
    pub fn row_ids(&self, table: &str) -> Vec<&str> {
        self.tables
            .get(table)
            .map(|t| {
                t.rows
                    .iter()
                    .filter(|(_, r)| r.present.value)
                    .map(|(id, _)| id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live cells of one row.
    pub fn row(&self, table: &str, row: &str) -> Option<BTreeMap<&str, &CellValue>> {
        let r = self.tables.get(table)?.rows.get(row)?;
        if !r.present.value {
            return None;
        }
        Some(
            r.cells
                .iter()
                .filter_map(|(name, c)| c.value.as_ref().map(|v| (name.as_str(), v)))
                .collect(),
        )
    }

    /// Full live content: table → row → cell → value. Tombstones excluded.
    /// Two converged replicas hold equal content.
    pub fn content(&self) -> BTreeMap<String, TableContent> {
        let mut out = BTreeMap::new();
        for (tname, table) in &self.tables {
            let mut rows = TableContent::new();
            for (rid, row) in &table.rows {
                if !row.present.value {
                    continue;
                }
                let cells: BTreeMap<String, CellValue> = row
                    .cells
                    .iter()
                    .filter_map(|(name, c)| c.value.clone().map(|v| (name.clone(), v)))
                    .collect();
                rows.insert(rid.clone(), cells);
            }
            if !rows.is_empty() {
                out.insert(tname.clone(), rows);
            }
        }
        out
    }

    // ── Delta exchange ──────────────────────────────────────────────

    /// The full state as a delta, tombstones included, suitable for
    /// bootstrapping another replica.
    pub fn snapshot(&self) -> Delta {
        let mut delta = Delta::default();
        for (tname, table) in &self.tables {
            for (rid, row) in &table.rows {
                if row.present.stamp > Stamp::zero() {
                    delta.record_presence(tname, rid, row.present.clone());
                }
                for (cname, cell) in &row.cells {
                    delta.record_cell(
                        tname,
                        rid,
                        cname,
                        Stamped::new(cell.value.clone(), cell.stamp.clone()),
                    );
                }
            }
        }
        delta
    }

    /// Drains the local writes accumulated since the last drain. The
    /// synchronizer calls this on its debounce tick; a reconnecting replica
    /// can discard the result because the snapshot bootstrap covers it.
    pub fn take_pending(&mut self) -> Delta {
        std::mem::take(&mut self.pending)
    }

    /// Folds a foreign delta in and returns the changes that won locally.
    ///
    /// For each incoming write, the incoming stamp must be strictly greater
    /// than the local stamp (counter first, replica tag byte order on ties)
    /// to apply; losers are discarded. The local Lamport counter is bumped
    /// past every observed stamp whether or not it wins, so subsequent local
    /// writes are causally after everything this replica has seen.
    pub fn merge(&mut self, delta: &Delta) -> Delta {
        let mut applied = Delta::default();
        for (tname, tdelta) in &delta.tables {
            for (rid, rdelta) in &tdelta.rows {
                if let Some(presence) = &rdelta.presence {
                    self.clock = self.clock.max(presence.stamp.counter);
                    if self.apply_presence(tname, rid, presence) {
                        applied.record_presence(tname, rid, presence.clone());
                    }
                }
                for (cname, write) in &rdelta.cells {
                    self.clock = self.clock.max(write.stamp.counter);
                    if self.apply_cell(tname, rid, cname, write) {
                        applied.record_cell(tname, rid, cname, write.clone());
                    }
                }
            }
        }
        if !applied.is_empty() {
            self.change_seq += 1;
        }
        applied
    }

    /// Applies a presence write if it beats the current stamp. Returns
    /// whether it won.
    fn apply_presence(&mut self, table: &str, row: &str, write: &Stamped<bool>) -> bool {
        let r = self
            .tables
            .entry(table.to_string())
            .or_default()
            .rows
            .entry(row.to_string())
            .or_insert_with(Row::unborn);
        if write.stamp > r.present.stamp {
            r.present = write.clone();
            true
        } else {
            false
        }
    }

    /// Applies a cell write if it beats the current stamp. Returns whether
    /// it won.
    fn apply_cell(
        &mut self,
        table: &str,
        row: &str,
        cell: &str,
        write: &Stamped<Option<CellValue>>,
    ) -> bool {
        let r = self
            .tables
            .entry(table.to_string())
            .or_default()
            .rows
            .entry(row.to_string())
            .or_insert_with(Row::unborn);
        match r.cells.get_mut(cell) {
            Some(existing) => {
                if write.stamp > existing.stamp {
                    existing.value = write.value.clone();
                    existing.stamp = write.stamp.clone();
                    true
                } else {
                    false
                }
            }
            None => {
                r.cells.insert(
                    cell.to_string(),
                    Cell {
                        value: write.value.clone(),
                        stamp: write.stamp.clone(),
                    },
                );
                true
            }
        }
    }

    /// Largest stamp counter this store has observed (for tests and
    /// diagnostics).
    pub fn clock(&self) -> u64 {
        self.clock
    }
}
