//! Row snapshot model.
//!
//! Values, fields, rows and table records used for the before and after
//! images captured around every intercepted statement.

mod records;
mod value;

pub use records::{Field, KeyType, Row, TableRecords};
pub use value::{ColumnType, SqlValue};
