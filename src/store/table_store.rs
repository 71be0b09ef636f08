use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use crate::errors::{ReconError, RetryPolicy};
use crate::utils::truncation::truncate_error;
use super::normalize::normalize_identity;
use super::schema::TableKind;
use super::status::{RowState, RowStatus};
use super::table::{Row, Table, Workbook};

/// The pipeline's single source of truth: a JSON workbook on disk that people
/// may also edit between cycles.
///
/// Nothing is cached across [`load`](Self::load) calls. Writes go to memory
/// and reach disk only through [`flush`](Self::flush), which replaces the
/// whole file through a temp file and a rename.
#[derive(Debug)]
pub struct TableStore {
    path: PathBuf,
    workbook: Workbook,
    loaded_modified: Option<SystemTime>,
    dirty: bool,
}

/// Row counts for one status-bearing table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusCounts {
    pub total: usize,
    pub processed: usize,
    pub pending: usize,
    pub failed_terminal: usize,
}

impl TableStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            workbook: Workbook::with_schema(),
            loaded_modified: None,
            dirty: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u64 {
        self.workbook.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Re-read the whole document. A missing file is an empty workbook.
    pub async fn load(&mut self) -> Result<(), ReconError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Some(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(ReconError::Store(format!(
                    "Failed to read {}: {}", self.path.display(), e
                )));
            }
        };

        let existed = content.is_some();
        let mut workbook = match content {
            Some(text) if !text.trim().is_empty() => serde_json::from_str::<Workbook>(&text)
                .map_err(|e| ReconError::Store(format!(
                    "Failed to parse {}: {}", self.path.display(), e
                )))?,
            Some(_) => Workbook::default(),
            None => {
                info!(path = %self.path.display(), "Store not found, starting from an empty workbook");
                Workbook::default()
            }
        };

        let schema_added = workbook.ensure_schema();
        self.workbook = workbook;
        self.loaded_modified = modified_time(&self.path).await;
        self.dirty = existed && schema_added;

        debug!(
            path = %self.path.display(),
            version = self.workbook.version,
            "Store loaded"
        );
        Ok(())
    }

    /// Rewrite the whole document. The previous file stays intact until the
    /// new content is fully on disk.
    pub async fn flush(&mut self) -> Result<(), ReconError> {
        let on_disk = modified_time(&self.path).await;
        if on_disk.is_some() && on_disk != self.loaded_modified {
            warn!(
                path = %self.path.display(),
                "Store changed on disk since it was loaded; pipeline state overwrites it"
            );
        }

        self.workbook.version += 1;
        self.workbook.updated_at = Some(Utc::now());
        let json = match serde_json::to_string_pretty(&self.workbook) {
            Ok(json) => json,
            Err(e) => {
                self.workbook.version -= 1;
                return Err(ReconError::Store(format!("Failed to serialize store: {}", e)));
            }
        };

        if let Err(e) = write_atomic(&self.path, &json).await {
            self.workbook.version -= 1;
            return Err(ReconError::Store(format!(
                "Failed to flush {}: {}", self.path.display(), e
            )));
        }

        self.loaded_modified = modified_time(&self.path).await;
        self.dirty = false;
        debug!(path = %self.path.display(), version = self.workbook.version, "Store flushed");
        Ok(())
    }

    pub fn rows(&self, kind: TableKind) -> &[Row] {
        self.workbook
            .tables
            .get(kind.name())
            .map(|t| t.rows.as_slice())
            .unwrap_or(&[])
    }

    fn table_mut(&mut self, kind: TableKind) -> &mut Table {
        self.workbook
            .tables
            .entry(kind.name().to_string())
            .or_insert_with(|| Table::for_kind(kind))
    }

    pub fn rows_where<F>(&self, kind: TableKind, predicate: F) -> Vec<Row>
    where
        F: Fn(&Row) -> bool,
    {
        self.rows(kind).iter().filter(|r| predicate(r)).cloned().collect()
    }

    pub fn find(&self, kind: TableKind, identity: &str) -> Option<&Row> {
        let key = normalize_identity(kind.identity_kind(), identity);
        let column = kind.identity_column();
        self.rows(kind)
            .iter()
            .find(|r| normalize_identity(kind.identity_kind(), r.get(column)) == key)
    }

    /// Normalized identities present in a table. Blank identities are skipped.
    pub fn identities(&self, kind: TableKind, column: &str) -> HashSet<String> {
        self.rows(kind)
            .iter()
            .map(|r| r.get(column))
            .filter(|v| !v.trim().is_empty())
            .map(|v| normalize_identity(kind.identity_kind(), v))
            .collect()
    }

    /// Unconditional append. Use [`DedupAppender`](super::DedupAppender) to
    /// keep identities unique.
    pub fn append_row(&mut self, kind: TableKind, row: Row) {
        self.table_mut(kind).rows.push(row);
        self.dirty = true;
    }

    /// Set `fields` on every row whose identity matches. Returns the number of
    /// rows touched.
    pub fn update_row(&mut self, kind: TableKind, identity: &str, fields: &[(&str, String)]) -> usize {
        let key = normalize_identity(kind.identity_kind(), identity);
        let column = kind.identity_column();
        let mut updated = 0;
        for row in self.table_mut(kind).rows.iter_mut() {
            if normalize_identity(kind.identity_kind(), row.get(column)) == key {
                for (field, value) in fields {
                    row.set(field, value.clone());
                }
                updated += 1;
            }
        }
        if updated > 0 {
            self.dirty = true;
        }
        updated
    }

    /// Rows the owning stage should work on now.
    pub fn pending_rows(&self, kind: TableKind, policy: &RetryPolicy) -> Vec<Row> {
        let Some(cols) = kind.status_columns() else {
            return Vec::new();
        };
        let identity = kind.identity_column();
        self.rows_where(kind, |r| {
            !r.is_blank(identity) && RowState::read(r, &cols).is_pending(policy)
        })
    }

    pub fn row_state(&self, kind: TableKind, identity: &str) -> Option<RowState> {
        let cols = kind.status_columns()?;
        self.find(kind, identity).map(|r| RowState::read(r, &cols))
    }

    /// Flip matching rows to `processed` and write `fields` alongside.
    pub fn mark_processed(&mut self, kind: TableKind, identity: &str, fields: &[(&str, String)]) -> usize {
        let Some(cols) = kind.status_columns() else {
            return 0;
        };
        let mut all: Vec<(&str, String)> = fields.to_vec();
        all.push((cols.status, RowStatus::Processed.as_str().to_string()));
        all.push((cols.error, String::new()));
        self.update_row(kind, identity, &all)
    }

    /// Record a failed attempt. Rows already `processed` are left alone: the
    /// pipeline never moves a row backwards.
    pub fn mark_failed(&mut self, kind: TableKind, identity: &str, reason: &str) -> usize {
        let Some(cols) = kind.status_columns() else {
            return 0;
        };
        let key = normalize_identity(kind.identity_kind(), identity);
        let column = kind.identity_column();
        let reason = truncate_error(reason);
        let mut updated = 0;
        for row in self.table_mut(kind).rows.iter_mut() {
            if normalize_identity(kind.identity_kind(), row.get(column)) != key {
                continue;
            }
            let state = RowState::read(row, &cols);
            if state.status == RowStatus::Processed {
                continue;
            }
            row.set(cols.status, RowStatus::Failed.as_str());
            row.set(cols.attempts, (state.attempts + 1).to_string());
            row.set(cols.error, reason.clone());
            updated += 1;
        }
        if updated > 0 {
            self.dirty = true;
        }
        updated
    }

    pub fn status_counts(&self, kind: TableKind, policy: &RetryPolicy) -> StatusCounts {
        let mut counts = StatusCounts::default();
        let Some(cols) = kind.status_columns() else {
            return counts;
        };
        let identity = kind.identity_column();
        for row in self.rows(kind).iter().filter(|r| !r.is_blank(identity)) {
            let state = RowState::read(row, &cols);
            counts.total += 1;
            if state.status == RowStatus::Processed {
                counts.processed += 1;
            } else if state.is_pending(policy) {
                counts.pending += 1;
            } else {
                counts.failed_terminal += 1;
            }
        }
        counts
    }
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
    tokio::fs::metadata(path).await.ok().and_then(|m| m.modified().ok())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "store".into());
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write to a sibling temp file, fsync, then rename over the target.
async fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = temp_path(path);
    let result: std::io::Result<()> = async {
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await
    }
    .await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(&tmp).await;
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::schema::col;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> TableStore {
        TableStore::new(dir.path().join("recon.json"))
    }

    #[tokio::test]
    async fn test_load_missing_file_yields_all_tables() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.load().await.unwrap();
        for kind in TableKind::ALL {
            assert!(store.rows(kind).is_empty());
        }
        assert!(!store.is_dirty());
    }

    #[tokio::test]
    async fn test_flush_then_load_keeps_rows_and_bumps_version() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.load().await.unwrap();
        store.append_row(TableKind::Subdomains, Row::new().with(col::NAME, "a.example.com"));
        store.flush().await.unwrap();
        assert_eq!(store.version(), 1);
        assert!(!dir.path().join("recon.json.tmp").exists());

        let mut reopened = store_in(&dir);
        reopened.load().await.unwrap();
        assert_eq!(reopened.version(), 1);
        assert_eq!(reopened.rows(TableKind::Subdomains).len(), 1);
        assert_eq!(reopened.rows(TableKind::Subdomains)[0].get(col::NAME), "a.example.com");
    }

    #[tokio::test]
    async fn test_load_picks_up_manual_edits() {
        let dir = TempDir::new().unwrap();
        let mut store = store_in(&dir);
        store.load().await.unwrap();
        store.append_row(
            TableKind::Subdomains,
            Row::new().with(col::NAME, "a.example.com").with(col::HOST_STATUS, "processed"),
        );
        store.flush().await.unwrap();

        let path = dir.path().join("recon.json");
        let text = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, text.replace("\"processed\"", "\"\"")).unwrap();

        store.load().await.unwrap();
        let policy = RetryPolicy::default();
        assert_eq!(store.pending_rows(TableKind::Subdomains, &policy).len(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error_and_left_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recon.json");
        std::fs::write(&path, "{ not json").unwrap();
        let mut store = store_in(&dir);
        let err = store.load().await.unwrap_err();
        assert!(matches!(err, ReconError::Store(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }

    #[tokio::test]
    async fn test_unknown_columns_survive_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("recon.json");
        std::fs::write(
            &path,
            r#"{"tables":{"subdomains":{"columns":["name","owner"],"rows":[{"name":"a.example.com","owner":"ops"}]},"scratch":{"columns":["x"],"rows":[{"x":1}]}}}"#,
        ).unwrap();
        let mut store = store_in(&dir);
        store.load().await.unwrap();
        assert!(store.is_dirty());
        store.flush().await.unwrap();

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["tables"]["subdomains"]["rows"][0]["owner"], "ops");
        assert_eq!(saved["tables"]["scratch"]["rows"][0]["x"], "1");
    }

    #[test]
    fn test_update_row_matches_normalized_identity() {
        let mut store = TableStore::new("unused.json");
        store.append_row(TableKind::NonCdnIps, Row::new().with(col::IP, "010.0.0.5"));
        let n = store.update_row(TableKind::NonCdnIps, "10.0.0.5", &[(col::IP_TYPE, "cloud".into())]);
        assert_eq!(n, 1);
        assert_eq!(store.rows(TableKind::NonCdnIps)[0].get(col::IP_TYPE), "cloud");
        assert_eq!(store.update_row(TableKind::NonCdnIps, "10.0.0.6", &[]), 0);
    }

    #[test]
    fn test_mark_failed_counts_attempts_and_never_reverts_processed() {
        let mut store = TableStore::new("unused.json");
        store.append_row(TableKind::Subdomains, Row::new().with(col::NAME, "a.example.com"));
        store.append_row(
            TableKind::Subdomains,
            Row::new().with(col::NAME, "b.example.com").with(col::HOST_STATUS, "processed"),
        );

        store.mark_failed(TableKind::Subdomains, "a.example.com", "exit 2");
        store.mark_failed(TableKind::Subdomains, "a.example.com", "exit 2");
        let state = store.row_state(TableKind::Subdomains, "a.example.com").unwrap();
        assert_eq!(state.status, RowStatus::Failed);
        assert_eq!(state.attempts, 2);
        assert_eq!(state.error, "exit 2");

        assert_eq!(store.mark_failed(TableKind::Subdomains, "b.example.com", "boom"), 0);
        let state = store.row_state(TableKind::Subdomains, "b.example.com").unwrap();
        assert_eq!(state.status, RowStatus::Processed);
    }

    #[test]
    fn test_status_counts() {
        let mut store = TableStore::new("unused.json");
        let policy = RetryPolicy::new(1);
        store.append_row(TableKind::Subdomains, Row::new().with(col::NAME, "a.example.com"));
        store.append_row(
            TableKind::Subdomains,
            Row::new().with(col::NAME, "b.example.com").with(col::HOST_STATUS, "processed"),
        );
        store.append_row(
            TableKind::Subdomains,
            Row::new()
                .with(col::NAME, "c.example.com")
                .with(col::HOST_STATUS, "failed")
                .with(col::HOST_ATTEMPTS, "1"),
        );
        store.append_row(TableKind::Subdomains, Row::new().with(col::NAME, "  "));
        let counts = store.status_counts(TableKind::Subdomains, &policy);
        assert_eq!(counts, StatusCounts { total: 3, processed: 1, pending: 1, failed_terminal: 1 });
    }
}
