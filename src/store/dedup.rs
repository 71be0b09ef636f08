use std::collections::HashSet;
use tracing::trace;
use super::normalize::normalize_identity;
use super::schema::TableKind;
use super::table::Row;
use super::table_store::TableStore;

/// Insert-if-absent appends into one table, keyed by a normalized identity.
///
/// The set of known identities is read once when the appender is created and
/// kept current as rows go in, so expanding a large block costs one pass over
/// the table rather than one per address.
pub struct DedupAppender<'a> {
    store: &'a mut TableStore,
    table: TableKind,
    column: &'static str,
    seen: HashSet<String>,
    appended: usize,
}

impl<'a> DedupAppender<'a> {
    /// Appender keyed on the table's own identity column.
    pub fn new(store: &'a mut TableStore, table: TableKind) -> Self {
        Self::with_column(store, table, table.identity_column())
    }

    pub fn with_column(store: &'a mut TableStore, table: TableKind, column: &'static str) -> Self {
        let seen = store.identities(table, column);
        Self { store, table, column, seen, appended: 0 }
    }

    /// Append `row` unless a row with the same normalized identity exists.
    /// Returns whether a row was added. Rows with a blank identity are dropped.
    pub fn append_unique(&mut self, row: Row) -> bool {
        let raw = row.get(self.column);
        if raw.trim().is_empty() {
            return false;
        }
        let key = normalize_identity(self.table.identity_kind(), raw);
        if !self.seen.insert(key) {
            trace!(table = %self.table, identity = raw, "Duplicate identity, skipped");
            return false;
        }
        self.store.append_row(self.table, row);
        self.appended += 1;
        true
    }

    pub fn appended(&self) -> usize {
        self.appended
    }
}

impl TableStore {
    /// One-off dedup append. Prefer holding a [`DedupAppender`] for batches.
    pub fn append_unique(&mut self, table: TableKind, row: Row) -> bool {
        DedupAppender::new(self, table).append_unique(row)
    }
}
