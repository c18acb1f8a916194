//! Statement recognition.
//!
//! Parses one intercepted statement with the dialect's `sqlparser` grammar
//! and keeps the parts the image capture needs: kind, target table, WHERE
//! condition, updated columns and inserted rows.

use std::ops::ControlFlow;

use sqlparser::ast as sp;
use sqlparser::parser::Parser;

use super::condition::{render_condition, resolve_placeholder, ParamList};
use super::dialect::{dialect_for, DbType, Dialect};
use super::error::{RecognizerError, RecognizerResult};
use crate::catalog::TableMeta;
use crate::types::SqlValue;

/// Kind of a recognized statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlKind {
    Insert,
    Update,
    Delete,
    Select,
    SelectForUpdate,
    /// Anything else (DDL, session statements). Passed through untouched.
    Other,
}

/// One value of an INSERT row.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertValue {
    /// A literal or bound parameter.
    Value(SqlValue),
    /// A database-side expression such as `NOW()` or `DEFAULT`.
    Expression(String),
}

impl InsertValue {
    pub fn as_value(&self) -> Option<&SqlValue> {
        match self {
            InsertValue::Value(v) => Some(v),
            InsertValue::Expression(_) => None,
        }
    }
}

/// A recognized statement.
#[derive(Debug, Clone)]
pub struct SqlRecognizer {
    dialect: &'static dyn Dialect,
    sql: String,
    kind: SqlKind,
    table: Option<String>,
    alias: Option<String>,
    selection: Option<sp::Expr>,
    /// Bare `?` placeholders that precede the WHERE clause.
    placeholder_offset: usize,
    update_columns: Vec<String>,
    insert_columns: Vec<String>,
    insert_rows: Vec<Vec<sp::Expr>>,
}

impl SqlRecognizer {
    /// Recognize exactly one statement in the given dialect.
    pub fn recognize(db_type: DbType, sql: &str) -> RecognizerResult<Self> {
        let dialect = dialect_for(db_type)?;
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(RecognizerError::EmptyStatement);
        }

        let parser_dialect = dialect.parser_dialect();
        let mut statements = Parser::parse_sql(parser_dialect.as_ref(), trimmed)?;
        if statements.len() > 1 {
            return Err(RecognizerError::MultipleStatements);
        }
        let statement = statements.pop().ok_or(RecognizerError::EmptyStatement)?;

        let mut recognizer = Self {
            dialect,
            sql: sql.to_string(),
            kind: SqlKind::Other,
            table: None,
            alias: None,
            selection: None,
            placeholder_offset: 0,
            update_columns: Vec::new(),
            insert_columns: Vec::new(),
            insert_rows: Vec::new(),
        };

        match statement {
            sp::Statement::Insert(insert) => recognizer.recognize_insert(insert)?,
            sp::Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => {
                if from.is_some() || !table.joins.is_empty() {
                    return Err(RecognizerError::UnsupportedStatement(
                        "multi-table UPDATE".into(),
                    ));
                }
                recognizer.kind = SqlKind::Update;
                recognizer.set_table(&table)?;
                recognizer.placeholder_offset = count_positional(&assignments);
                recognizer.update_columns = assignments
                    .iter()
                    .flat_map(|a| assignment_columns(&a.target))
                    .collect();
                recognizer.selection = selection;
            }
            sp::Statement::Delete(delete) => {
                let tables = match &delete.from {
                    sp::FromTable::WithFromKeyword(tables) => tables,
                    sp::FromTable::WithoutKeyword(tables) => tables,
                };
                if tables.len() != 1 || !delete.tables.is_empty() || delete.using.is_some() {
                    return Err(RecognizerError::UnsupportedStatement(
                        "multi-table DELETE".into(),
                    ));
                }
                recognizer.kind = SqlKind::Delete;
                recognizer.set_table(&tables[0])?;
                recognizer.selection = delete.selection;
            }
            sp::Statement::Query(query) => recognizer.recognize_query(*query)?,
            _ => {}
        }

        Ok(recognizer)
    }

    fn recognize_insert(&mut self, insert: sp::Insert) -> RecognizerResult<()> {
        let name = match &insert.table {
            sp::TableObject::TableName(name) => name,
            sp::TableObject::TableFunction(_) => {
                return Err(RecognizerError::UnsupportedStatement(
                    "INSERT into table function".into(),
                ))
            }
        };
        self.kind = SqlKind::Insert;
        self.table = Some(name.to_string());
        self.alias = insert.table_alias.as_ref().map(|a| a.value.clone());
        self.insert_columns = insert.columns.iter().map(|c| c.value.clone()).collect();

        self.insert_rows = match insert.source.map(|s| *s.body) {
            Some(sp::SetExpr::Values(sp::Values { rows, .. })) => rows,
            _ => {
                return Err(RecognizerError::UnsupportedStatement(
                    "INSERT without VALUES".into(),
                ))
            }
        };
        Ok(())
    }

    fn recognize_query(&mut self, query: sp::Query) -> RecognizerResult<()> {
        let for_update = query
            .locks
            .iter()
            .any(|lock| lock.lock_type == sp::LockType::Update);
        self.kind = if for_update {
            SqlKind::SelectForUpdate
        } else {
            SqlKind::Select
        };

        // Plain reads pass through whatever their shape.
        let select = match *query.body {
            sp::SetExpr::Select(select) => select,
            _ if !for_update => return Ok(()),
            _ => {
                return Err(RecognizerError::UnsupportedStatement(
                    "compound query FOR UPDATE".into(),
                ))
            }
        };
        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            if !for_update {
                return Ok(());
            }
            return Err(RecognizerError::UnsupportedStatement(
                "SELECT FOR UPDATE over multiple tables".into(),
            ));
        }

        if let Err(e) = self.set_table(&select.from[0]) {
            return if for_update { Err(e) } else { Ok(()) };
        }
        self.placeholder_offset = count_positional(&select.projection);
        self.selection = select.selection;
        Ok(())
    }

    fn set_table(&mut self, from: &sp::TableWithJoins) -> RecognizerResult<()> {
        match &from.relation {
            sp::TableFactor::Table { name, alias, .. } => {
                self.table = Some(name.to_string());
                self.alias = alias.as_ref().map(|a| a.name.value.clone());
                Ok(())
            }
            other => Err(RecognizerError::UnsupportedStatement(format!(
                "table source {}",
                other
            ))),
        }
    }

    pub fn db_type(&self) -> DbType {
        self.dialect.db_type()
    }

    pub fn dialect(&self) -> &'static dyn Dialect {
        self.dialect
    }

    /// The statement as issued by the caller.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> SqlKind {
        self.kind
    }

    /// Target table as written in the statement.
    pub fn table_name(&self) -> RecognizerResult<&str> {
        self.table.as_deref().ok_or_else(|| {
            RecognizerError::UnsupportedStatement(format!("no target table in: {}", self.sql))
        })
    }

    pub fn table_alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// `FROM` target for rewritten queries: escaped table plus alias.
    pub fn table_source(&self) -> RecognizerResult<String> {
        let table = self.dialect().escape_identifier(self.table_name()?);
        Ok(match &self.alias {
            Some(alias) => format!("{} {}", table, alias),
            None => table,
        })
    }

    pub fn has_condition(&self) -> bool {
        self.selection.is_some()
    }

    /// Rewrite the WHERE condition, binding its parameters into `out`.
    pub fn where_condition(
        &self,
        params: &[SqlValue],
        out: &mut ParamList,
    ) -> RecognizerResult<Option<String>> {
        self.selection
            .as_ref()
            .map(|expr| render_condition(expr, params, self.placeholder_offset, out))
            .transpose()
    }

    /// Columns assigned by an UPDATE.
    pub fn update_columns(&self) -> &[String] {
        &self.update_columns
    }

    /// Columns listed by an INSERT, empty when the statement names none.
    pub fn insert_columns(&self) -> &[String] {
        &self.insert_columns
    }

    /// INSERT rows with their placeholders resolved.
    pub fn insert_rows(&self, params: &[SqlValue]) -> RecognizerResult<Vec<Vec<InsertValue>>> {
        let mut next_positional = 0;
        self.insert_rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|expr| insert_value(expr, params, &mut next_positional))
                    .collect()
            })
            .collect()
    }

    /// Build `SELECT <columns> FROM <table> [WHERE <cond>] [FOR UPDATE]`
    /// reusing this statement's condition.
    pub fn select_sql(
        &self,
        columns: &[String],
        params: &[SqlValue],
        for_update: bool,
    ) -> RecognizerResult<(String, Vec<SqlValue>)> {
        let mut out = ParamList::new(self.dialect());
        let mut sql = format!("SELECT {} FROM {}", columns.join(", "), self.table_source()?);
        if let Some(condition) = self.where_condition(params, &mut out)? {
            sql.push_str(" WHERE ");
            sql.push_str(&condition);
        }
        if for_update {
            sql.push_str(" FOR UPDATE");
        }
        Ok((sql, out.into_values()))
    }
}

/// Build the query that locks the statement's rows and returns their keys.
///
/// Produces `SELECT <escaped pk columns> FROM <table> [WHERE <cond>] FOR UPDATE`.
pub fn build_select_for_update_sql(
    recognizer: &SqlRecognizer,
    meta: &TableMeta,
    params: &[SqlValue],
) -> RecognizerResult<(String, Vec<SqlValue>)> {
    let columns = meta.escaped_pk_names(recognizer.dialect());
    recognizer.select_sql(&columns, params, true)
}

fn count_positional<V: sp::Visit>(node: &V) -> usize {
    let mut count = 0;
    let _ = sp::visit_expressions(node, |expr| {
        if let sp::Expr::Value(v) = expr {
            if matches!(&v.value, sp::Value::Placeholder(p) if p == "?") {
                count += 1;
            }
        }
        ControlFlow::<()>::Continue(())
    });
    count
}

fn assignment_columns(target: &sp::AssignmentTarget) -> Vec<String> {
    let last_part = |name: &sp::ObjectName| {
        name.0
            .last()
            .map(|p| {
                p.as_ident()
                    .map(|id| id.value.clone())
                    .unwrap_or_else(|| p.to_string())
            })
            .unwrap_or_default()
    };
    match target {
        sp::AssignmentTarget::ColumnName(name) => vec![last_part(name)],
        sp::AssignmentTarget::Tuple(names) => names.iter().map(last_part).collect(),
    }
}

fn insert_value(
    expr: &sp::Expr,
    params: &[SqlValue],
    next_positional: &mut usize,
) -> RecognizerResult<InsertValue> {
    match expr {
        sp::Expr::Value(v) => match &v.value {
            sp::Value::Placeholder(text) => Ok(InsertValue::Value(resolve_placeholder(
                text,
                params,
                next_positional,
            )?)),
            other => Ok(literal(other)
                .map(InsertValue::Value)
                .unwrap_or_else(|| InsertValue::Expression(other.to_string()))),
        },
        sp::Expr::UnaryOp {
            op: sp::UnaryOperator::Minus,
            expr: inner,
        } => match inner.as_ref() {
            sp::Expr::Value(v) => match literal(&v.value) {
                Some(SqlValue::Integer(n)) => Ok(InsertValue::Value(SqlValue::Integer(-n))),
                Some(SqlValue::Float(x)) => Ok(InsertValue::Value(SqlValue::Float(-x))),
                _ => Ok(InsertValue::Expression(expr.to_string())),
            },
            _ => Ok(InsertValue::Expression(expr.to_string())),
        },
        other => Ok(InsertValue::Expression(other.to_string())),
    }
}

fn literal(value: &sp::Value) -> Option<SqlValue> {
    match value {
        sp::Value::Null => Some(SqlValue::Null),
        sp::Value::Boolean(b) => Some(SqlValue::Boolean(*b)),
        sp::Value::Number(s, _) => s
            .parse::<i64>()
            .map(SqlValue::Integer)
            .ok()
            .or_else(|| s.parse::<f64>().map(SqlValue::Float).ok()),
        sp::Value::SingleQuotedString(s) | sp::Value::DoubleQuotedString(s) => {
            Some(SqlValue::Text(s.clone()))
        }
        _ => None,
    }
}
