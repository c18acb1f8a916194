//! Database dialects.
//!
//! Each supported dialect bundles the parser used to recognize statements,
//! its identifier quoting rule and its placeholder syntax. Dialects are
//! looked up by [`DbType`] through [`dialect_for`].

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlparser::dialect as sp;

use super::error::{RecognizerError, RecognizerResult};

/// Database type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    MySql,
    Oracle,
    PostgreSql,
    /// ANSI SQL with `?` placeholders.
    Generic,
    /// Known database without a registered adapter.
    SqlServer,
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DbType::MySql => "mysql",
            DbType::Oracle => "oracle",
            DbType::PostgreSql => "postgresql",
            DbType::Generic => "generic",
            DbType::SqlServer => "sqlserver",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for DbType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DbType::MySql),
            "oracle" => Ok(DbType::Oracle),
            "postgresql" | "postgres" | "pg" => Ok(DbType::PostgreSql),
            "generic" | "ansi" => Ok(DbType::Generic),
            "sqlserver" | "mssql" => Ok(DbType::SqlServer),
            _ => Err(format!("unknown database type: {}", s)),
        }
    }
}

/// Words that must be quoted when used as identifiers in any dialect.
const RESERVED: &[&str] = &[
    "ALL", "ALTER", "AND", "AS", "ASC", "BETWEEN", "BY", "CASE", "CHECK", "COLUMN", "CREATE",
    "DEFAULT", "DELETE", "DESC", "DISTINCT", "DROP", "ELSE", "END", "EXISTS", "FOR", "FROM",
    "GROUP", "HAVING", "IN", "INDEX", "INSERT", "INTO", "IS", "JOIN", "KEY", "LIKE", "LIMIT",
    "NOT", "NULL", "ON", "OR", "ORDER", "PRIMARY", "SELECT", "SET", "TABLE", "THEN", "TO",
    "UNION", "UNIQUE", "UPDATE", "USER", "VALUES", "WHEN", "WHERE",
];

const MYSQL_RESERVED: &[&str] = &["CONDITION", "INTERVAL", "RANGE", "RANK", "READ", "SIGNAL"];
const ORACLE_RESERVED: &[&str] = &["LEVEL", "NUMBER", "ROWID", "ROWNUM", "SIZE", "UID", "COMMENT"];
const POSTGRES_RESERVED: &[&str] = &["ANALYSE", "ANALYZE", "LIMIT", "OFFSET", "RETURNING", "WINDOW"];

fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false)
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn is_reserved(name: &str, extra: &[&str]) -> bool {
    let upper = name.to_ascii_uppercase();
    RESERVED.contains(&upper.as_str()) || extra.contains(&upper.as_str())
}

/// Per-dialect capability bundle.
pub trait Dialect: Send + Sync + fmt::Debug {
    /// The tag this dialect is registered under.
    fn db_type(&self) -> DbType;

    /// Parser dialect used to recognize statements.
    fn parser_dialect(&self) -> Box<dyn sp::Dialect>;

    /// Identifier quote character.
    fn quote_char(&self) -> char {
        '"'
    }

    /// Dialect-specific reserved words, in addition to the common set.
    fn extra_reserved(&self) -> &'static [&'static str] {
        &[]
    }

    /// Whether an unquoted identifier would be misread.
    fn needs_escape(&self, name: &str) -> bool {
        !is_plain_identifier(name) || is_reserved(name, self.extra_reserved())
    }

    /// Escape an identifier, handling `schema.table` names part by part.
    /// Already quoted parts are left alone.
    fn escape_identifier(&self, name: &str) -> String {
        let quote = self.quote_char();
        name.split('.')
            .map(|part| {
                if part.starts_with(quote) || part.starts_with('"') || !self.needs_escape(part) {
                    part.to_string()
                } else {
                    let close = if quote == '`' { '`' } else { '"' };
                    format!("{}{}{}", quote, part, close)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Placeholder text for the parameter at 1-based `position`.
    fn placeholder(&self, _position: usize) -> String {
        "?".to_string()
    }

    /// Whether global locks may be taken on composite primary keys.
    fn supports_multi_pk_lock(&self) -> bool {
        false
    }
}

/// MySQL: backtick quoting, `?` placeholders, composite-key locking.
#[derive(Debug)]
pub struct MySql;

impl Dialect for MySql {
    fn db_type(&self) -> DbType {
        DbType::MySql
    }

    fn parser_dialect(&self) -> Box<dyn sp::Dialect> {
        Box::new(sp::MySqlDialect {})
    }

    fn quote_char(&self) -> char {
        '`'
    }

    fn extra_reserved(&self) -> &'static [&'static str] {
        MYSQL_RESERVED
    }

    fn supports_multi_pk_lock(&self) -> bool {
        true
    }
}

/// Oracle: double-quote quoting, `?` placeholders.
#[derive(Debug)]
pub struct Oracle;

impl Dialect for Oracle {
    fn db_type(&self) -> DbType {
        DbType::Oracle
    }

    fn parser_dialect(&self) -> Box<dyn sp::Dialect> {
        Box::new(sp::GenericDialect {})
    }

    fn extra_reserved(&self) -> &'static [&'static str] {
        ORACLE_RESERVED
    }
}

/// PostgreSQL: double-quote quoting (case-sensitive), `$n` placeholders.
#[derive(Debug)]
pub struct PostgreSql;

impl Dialect for PostgreSql {
    fn db_type(&self) -> DbType {
        DbType::PostgreSql
    }

    fn parser_dialect(&self) -> Box<dyn sp::Dialect> {
        Box::new(sp::PostgreSqlDialect {})
    }

    fn extra_reserved(&self) -> &'static [&'static str] {
        POSTGRES_RESERVED
    }

    // Unquoted identifiers fold to lower case.
    fn needs_escape(&self, name: &str) -> bool {
        name.chars().any(|c| c.is_ascii_uppercase())
            || !is_plain_identifier(name)
            || is_reserved(name, POSTGRES_RESERVED)
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${}", position)
    }
}

/// Generic ANSI dialect.
#[derive(Debug)]
pub struct Generic;

impl Dialect for Generic {
    fn db_type(&self) -> DbType {
        DbType::Generic
    }

    fn parser_dialect(&self) -> Box<dyn sp::Dialect> {
        Box::new(sp::GenericDialect {})
    }
}

static MYSQL: MySql = MySql;
static ORACLE: Oracle = Oracle;
static POSTGRESQL: PostgreSql = PostgreSql;
static GENERIC: Generic = Generic;

/// Look up the dialect registered for `db_type`.
pub fn dialect_for(db_type: DbType) -> RecognizerResult<&'static dyn Dialect> {
    match db_type {
        DbType::MySql => Ok(&MYSQL),
        DbType::Oracle => Ok(&ORACLE),
        DbType::PostgreSql => Ok(&POSTGRESQL),
        DbType::Generic => Ok(&GENERIC),
        other => Err(RecognizerError::UnsupportedDialect(other)),
    }
}
