//! Table metadata catalog.
//!
//! Metadata is loaded from the driver once per `(dialect, table)` and shared
//! read-only by every executor afterwards.

mod manager;
mod schema;
mod types;

pub use manager::TableMetaCache;
pub(crate) use schema::unquote;
pub use schema::{SchemaError, TableMeta, TableMetaBuilder};
pub use types::ColumnMeta;
