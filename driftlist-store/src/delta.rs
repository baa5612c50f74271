//! Deltas — the minimal stamped change sets exchanged between replicas.

use driftlist_types::{CellValue, Stamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A value paired with the logical stamp of the write that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stamped<T> {
    pub value: T,
    pub stamp: Stamp,
}

impl<T> Stamped<T> {
    pub fn new(value: T, stamp: Stamp) -> Self {
        Self { value, stamp }
    }
}

/// Changes to one row: an optional presence write plus cell writes.
///
/// A cell value of `None` is a cell tombstone. Presence `false` is a row
/// tombstone; the row's identity survives so a later, newer write can
/// resurrect it deterministically.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RowDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence: Option<Stamped<bool>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cells: BTreeMap<String, Stamped<Option<CellValue>>>,
}

impl RowDelta {
    pub fn is_empty(&self) -> bool {
        self.presence.is_none() && self.cells.is_empty()
    }
}

/// Changes to one table, keyed by row id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TableDelta {
    pub rows: BTreeMap<String, RowDelta>,
}

/// A set of stamped changes suitable for merging into any replica.
///
/// A full snapshot is just a delta that happens to contain every cell and
/// presence flag, so bootstrap and incremental sync share one merge path.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub tables: BTreeMap<String, TableDelta>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.tables
            .values()
            .all(|t| t.rows.values().all(RowDelta::is_empty))
    }

    /// Number of individual stamped writes carried (cells + presence flags).
    pub fn len(&self) -> usize {
        self.tables
            .values()
            .flat_map(|t| t.rows.values())
            .map(|r| r.cells.len() + usize::from(r.presence.is_some()))
            .sum()
    }

    pub(crate) fn row_mut(&mut self, table: &str, row: &str) -> &mut RowDelta {
        self.tables
            .entry(table.to_string())
            .or_default()
            .rows
            .entry(row.to_string())
            .or_default()
    }

    /// Records a presence write, keeping the newer stamp if one is already
    /// recorded for this row.
    pub(crate) fn record_presence(&mut self, table: &str, row: &str, write: Stamped<bool>) {
        let slot = &mut self.row_mut(table, row).presence;
        match slot {
            Some(existing) if existing.stamp >= write.stamp => {}
            _ => *slot = Some(write),
        }
    }

    /// Records a cell write, keeping the newer stamp on collision.
    pub(crate) fn record_cell(
        &mut self,
        table: &str,
        row: &str,
        cell: &str,
        write: Stamped<Option<CellValue>>,
    ) {
        let cells = &mut self.row_mut(table, row).cells;
        match cells.get(cell) {
            Some(existing) if existing.stamp >= write.stamp => {}
            _ => {
                cells.insert(cell.to_string(), write);
            }
        }
    }

    /// Folds another delta into this one, keeping the newer stamp wherever
    /// both touch the same cell. Used to batch pending writes within the
    /// outbound debounce window.
    pub fn absorb(&mut self, other: Delta) {
        for (table, tdelta) in other.tables {
            for (row, rdelta) in tdelta.rows {
                if let Some(p) = rdelta.presence {
                    self.record_presence(&table, &row, p);
                }
                for (cell, write) in rdelta.cells {
                    self.record_cell(&table, &row, &cell, write);
                }
            }
        }
    }
}
