//! Undo log model and its JSON codec.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::UndoResult;
use crate::coordinator::BranchId;
use crate::types::TableRecords;

/// Statement kind an undo item was recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SqlType {
    Insert,
    Update,
    Delete,
    SelectForUpdate,
}

/// Before and after images of one statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlUndoLog {
    pub sql_type: SqlType,
    pub table_name: String,
    pub before_image: TableRecords,
    pub after_image: TableRecords,
}

impl SqlUndoLog {
    pub fn new(
        sql_type: SqlType,
        table_name: impl Into<String>,
        before_image: TableRecords,
        after_image: TableRecords,
    ) -> Self {
        Self {
            sql_type,
            table_name: table_name.into(),
            before_image,
            after_image,
        }
    }
}

/// All undo items of one branch, in execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchUndoLog {
    pub xid: String,
    pub branch_id: BranchId,
    pub created_at: DateTime<Utc>,
    pub sql_undo_logs: Vec<SqlUndoLog>,
}

impl BranchUndoLog {
    pub fn new(xid: impl Into<String>, branch_id: BranchId, sql_undo_logs: Vec<SqlUndoLog>) -> Self {
        Self {
            xid: xid.into(),
            branch_id,
            created_at: Utc::now(),
            sql_undo_logs,
        }
    }

    /// Serialize for registration with the coordinator.
    pub fn encode(&self) -> UndoResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> UndoResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::catalog::{ColumnMeta, TableMetaBuilder};
    use crate::sql::DbType;
    use crate::types::{ColumnType, Field, Row, SqlValue};

    #[test]
    fn test_branch_log_codec() {
        let meta = Arc::new(
            TableMetaBuilder::new("stock", DbType::MySql)
                .column(ColumnMeta::new("id", ColumnType::Integer))
                .column(ColumnMeta::new("qty", ColumnType::Integer))
                .primary_key("id")
                .build()
                .unwrap(),
        );
        let row = |qty: i64| {
            Row::new(vec![
                Field::new("id", ColumnType::Integer, 1i64).primary_key(),
                Field::new("qty", ColumnType::Integer, qty),
            ])
        };
        let item = SqlUndoLog::new(
            SqlType::Update,
            "stock",
            TableRecords::new(meta.clone(), vec![row(10)]),
            TableRecords::new(meta, vec![row(9)]),
        );
        let log = BranchUndoLog::new("xid-1", 42, vec![item]);

        let bytes = log.encode().unwrap();
        let back = BranchUndoLog::decode(&bytes).unwrap();
        assert_eq!(back, log);
        let qty = &back.sql_undo_logs[0].after_image.rows()[0].field("qty").unwrap().value;
        assert_eq!(qty, &SqlValue::Integer(9));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(BranchUndoLog::decode(b"not json").is_err());
    }
}
