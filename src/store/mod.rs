pub mod schema;
pub mod normalize;
pub mod table;
pub mod status;
pub mod table_store;
pub mod dedup;

pub use schema::{col, StatusColumns, TableKind};
pub use normalize::{normalize_identity, IdentityKind};
pub use table::{Row, Table, Workbook};
pub use status::{RowState, RowStatus};
pub use table_store::{StatusCounts, TableStore};
pub use dedup::DedupAppender;
