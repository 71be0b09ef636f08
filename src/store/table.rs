use std::collections::BTreeMap;
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, SerializeStruct};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use super::schema::TableKind;

/// One record: named columns mapped to scalar text.
///
/// Cells a human typed as numbers, booleans or lists are read back as their
/// textual form so the pipeline only ever sees strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    cells: BTreeMap<String, String>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<String>) -> Self {
        self.set(column, value);
        self
    }

    /// Cell text, or `""` when the column is absent.
    pub fn get(&self, column: &str) -> &str {
        self.cells.get(column).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, column: &str, value: impl Into<String>) {
        self.cells.insert(column.to_string(), value.into());
    }

    pub fn is_blank(&self, column: &str) -> bool {
        self.get(column).trim().is_empty()
    }

    pub fn cells(&self) -> impl Iterator<Item = (&String, &String)> {
        self.cells.iter()
    }
}

impl<'de> Deserialize<'de> for Row {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        Ok(Row {
            cells: raw.into_iter().map(|(k, v)| (k, scalar_text(v))).collect(),
        })
    }
}

fn scalar_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(scalar_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Table {
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Table {
    pub fn for_kind(kind: TableKind) -> Self {
        Self {
            columns: kind.columns().iter().map(|c| c.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Append any schema columns missing from the header. Returns whether the
    /// header changed.
    pub fn ensure_columns(&mut self, columns: &[&str]) -> bool {
        let mut changed = false;
        for column in columns {
            if !self.columns.iter().any(|c| c == column) {
                self.columns.push(column.to_string());
                changed = true;
            }
        }
        changed
    }
}

// Rows are written in header order, every header column present, so the
// document stays easy to edit by hand. Cells outside the header follow.
impl Serialize for Table {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let rows: Vec<OrderedRow<'_>> = self
            .rows
            .iter()
            .map(|row| OrderedRow { columns: &self.columns, row })
            .collect();
        let mut state = serializer.serialize_struct("Table", 2)?;
        state.serialize_field("columns", &self.columns)?;
        state.serialize_field("rows", &rows)?;
        state.end()
    }
}

struct OrderedRow<'a> {
    columns: &'a [String],
    row: &'a Row,
}

impl Serialize for OrderedRow<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for column in self.columns {
            map.serialize_entry(column, self.row.get(column))?;
        }
        for (key, value) in self.row.cells() {
            if !self.columns.iter().any(|c| c == key) {
                map.serialize_entry(key, value)?;
            }
        }
        map.end()
    }
}

/// The persisted document: every table of the run plus a flush counter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Workbook {
    #[serde(default)]
    pub version: u64,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tables: BTreeMap<String, Table>,
}

impl Workbook {
    pub fn with_schema() -> Self {
        let mut workbook = Self::default();
        workbook.ensure_schema();
        workbook
    }

    /// Add missing tables and columns. Tables and columns unknown to the
    /// pipeline are left untouched. Returns whether anything was added.
    pub fn ensure_schema(&mut self) -> bool {
        let mut changed = false;
        for kind in TableKind::ALL {
            match self.tables.get_mut(kind.name()) {
                Some(table) => changed |= table.ensure_columns(kind.columns()),
                None => {
                    self.tables.insert(kind.name().to_string(), Table::for_kind(kind));
                    changed = true;
                }
            }
        }
        changed
    }
}
