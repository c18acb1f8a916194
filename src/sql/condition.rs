//! WHERE-clause rewriting.
//!
//! Renders a recognized condition back to SQL text for the image capture
//! queries. Every placeholder is resolved against the intercepted statement's
//! bound parameters and re-emitted through a [`ParamList`], so the rewritten
//! text always binds positionally in the order it reads.

use sqlparser::ast as sp;

use super::dialect::Dialect;
use super::error::{RecognizerError, RecognizerResult};
use crate::types::SqlValue;

/// Parameters collected for a rewritten statement.
///
/// Each pushed value gets the next placeholder in the dialect's syntax.
#[derive(Debug, Clone)]
pub struct ParamList {
    dialect: &'static dyn Dialect,
    values: Vec<SqlValue>,
}

impl ParamList {
    pub fn new(dialect: &'static dyn Dialect) -> Self {
        Self {
            dialect,
            values: Vec::new(),
        }
    }

    /// Append a value and return the placeholder that binds it.
    pub fn push(&mut self, value: SqlValue) -> String {
        self.values.push(value);
        self.dialect.placeholder(self.values.len())
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn into_values(self) -> Vec<SqlValue> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Render `expr` with its placeholders rebound into `out`.
///
/// `positional_offset` is the number of bare `?` placeholders that precede
/// the condition in the original statement (for example inside `SET`).
pub(crate) fn render_condition(
    expr: &sp::Expr,
    params: &[SqlValue],
    positional_offset: usize,
    out: &mut ParamList,
) -> RecognizerResult<String> {
    let mut renderer = ConditionRenderer {
        params,
        next_positional: positional_offset,
        out,
    };
    renderer.render(expr)
}

/// Largest IN list emitted in one predicate (Oracle's limit).
pub const MAX_IN_LIST_SIZE: usize = 1000;

/// Build a condition selecting rows by primary key.
///
/// One key column renders as `id IN (?,?)`, composite keys as
/// `(a,b) IN ((?,?),(?,?))`. More than [`MAX_IN_LIST_SIZE`] keys are split
/// into parenthesized `IN` lists joined with `OR`.
pub fn pk_condition(
    pk_columns: &[String],
    pk_rows: &[Vec<SqlValue>],
    out: &mut ParamList,
) -> String {
    let target = if pk_columns.len() == 1 {
        pk_columns[0].clone()
    } else {
        format!("({})", pk_columns.join(","))
    };

    let batches: Vec<String> = pk_rows
        .chunks(MAX_IN_LIST_SIZE)
        .map(|chunk| {
            let tuples: Vec<String> = chunk
                .iter()
                .map(|row| {
                    let placeholders: Vec<String> =
                        row.iter().map(|v| out.push(v.clone())).collect();
                    if placeholders.len() == 1 {
                        placeholders.join("")
                    } else {
                        format!("({})", placeholders.join(","))
                    }
                })
                .collect();
            format!("{} IN ({})", target, tuples.join(","))
        })
        .collect();

    match batches.len() {
        0 => format!("{} IN ()", target),
        1 => batches.join(""),
        _ => format!("({})", batches.join(" OR ")),
    }
}

struct ConditionRenderer<'a> {
    params: &'a [SqlValue],
    next_positional: usize,
    out: &'a mut ParamList,
}

impl ConditionRenderer<'_> {
    fn render(&mut self, expr: &sp::Expr) -> RecognizerResult<String> {
        match expr {
            sp::Expr::Identifier(ident) => Ok(ident.to_string()),

            sp::Expr::CompoundIdentifier(parts) => Ok(parts
                .iter()
                .map(|p| p.to_string())
                .collect::<Vec<_>>()
                .join(".")),

            sp::Expr::Value(v) => match &v.value {
                sp::Value::Placeholder(text) => self.placeholder(text),
                other => Ok(other.to_string()),
            },

            sp::Expr::BinaryOp { left, op, right } => {
                let l = self.render(left)?;
                let r = self.render(right)?;
                let op = op.to_string();
                if op.chars().any(|c| c.is_ascii_alphabetic()) {
                    Ok(format!("{} {} {}", l, op, r))
                } else {
                    Ok(glue(&glue(&l, &op), &r))
                }
            }

            sp::Expr::UnaryOp { op, expr } => {
                let e = self.render(expr)?;
                let op = op.to_string();
                if op.chars().any(|c| c.is_ascii_alphabetic()) {
                    Ok(format!("{} {}", op, e))
                } else {
                    Ok(glue(&op, &e))
                }
            }

            sp::Expr::IsNull(e) => Ok(format!("{} IS NULL", self.render(e)?)),
            sp::Expr::IsNotNull(e) => Ok(format!("{} IS NOT NULL", self.render(e)?)),

            sp::Expr::InList {
                expr,
                list,
                negated,
            } => {
                let e = self.render(expr)?;
                let items = self.render_list(list)?;
                let not = if *negated { "NOT " } else { "" };
                Ok(format!("{} {}IN ({})", e, not, items))
            }

            sp::Expr::Between {
                expr,
                negated,
                low,
                high,
            } => {
                let e = self.render(expr)?;
                let l = self.render(low)?;
                let h = self.render(high)?;
                let not = if *negated { "NOT " } else { "" };
                Ok(format!("{} {}BETWEEN {} AND {}", e, not, l, h))
            }

            sp::Expr::Like {
                negated,
                expr,
                pattern,
                escape_char,
                ..
            } => {
                if escape_char.is_some() {
                    return Err(malformed("LIKE with ESCAPE", expr));
                }
                self.render_pattern("LIKE", *negated, expr, pattern)
            }

            sp::Expr::ILike {
                negated,
                expr,
                pattern,
                escape_char,
                ..
            } => {
                if escape_char.is_some() {
                    return Err(malformed("ILIKE with ESCAPE", expr));
                }
                self.render_pattern("ILIKE", *negated, expr, pattern)
            }

            sp::Expr::Nested(inner) => Ok(format!("({})", self.render(inner)?)),

            sp::Expr::Tuple(items) => Ok(format!("({})", self.render_list(items)?)),

            sp::Expr::Cast {
                expr, data_type, ..
            } => Ok(format!("CAST({} AS {})", self.render(expr)?, data_type)),

            sp::Expr::Function(f) => self.render_function(f),

            sp::Expr::Subquery(_) | sp::Expr::InSubquery { .. } | sp::Expr::Exists { .. } => {
                Err(malformed("sub-select in condition", expr))
            }

            other => Err(malformed("untranslatable expression", other)),
        }
    }

    fn render_list(&mut self, items: &[sp::Expr]) -> RecognizerResult<String> {
        let rendered = items
            .iter()
            .map(|e| self.render(e))
            .collect::<RecognizerResult<Vec<_>>>()?;
        Ok(rendered.join(","))
    }

    fn render_pattern(
        &mut self,
        keyword: &str,
        negated: bool,
        expr: &sp::Expr,
        pattern: &sp::Expr,
    ) -> RecognizerResult<String> {
        let e = self.render(expr)?;
        let p = self.render(pattern)?;
        let not = if negated { "NOT " } else { "" };
        Ok(format!("{} {}{} {}", e, not, keyword, p))
    }

    fn render_function(&mut self, f: &sp::Function) -> RecognizerResult<String> {
        if f.over.is_some() {
            return Err(RecognizerError::MalformedExpression(format!(
                "window function {} in condition",
                f.name
            )));
        }
        if f.filter.is_some() || !f.within_group.is_empty() {
            return Err(RecognizerError::MalformedExpression(format!(
                "aggregate clause on {} in condition",
                f.name
            )));
        }

        let args = match &f.args {
            sp::FunctionArguments::None => return Ok(f.name.to_string()),
            sp::FunctionArguments::Subquery(_) => {
                return Err(RecognizerError::MalformedExpression(format!(
                    "sub-select argument to {}",
                    f.name
                )))
            }
            sp::FunctionArguments::List(list) => list
                .args
                .iter()
                .map(|arg| match arg {
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Expr(e)) => self.render(e),
                    sp::FunctionArg::Unnamed(sp::FunctionArgExpr::Wildcard) => Ok("*".to_string()),
                    other => Err(RecognizerError::MalformedExpression(format!(
                        "function argument {}",
                        other
                    ))),
                })
                .collect::<RecognizerResult<Vec<_>>>()?,
        };
        Ok(format!("{}({})", f.name, args.join(",")))
    }

    fn placeholder(&mut self, text: &str) -> RecognizerResult<String> {
        let value = resolve_placeholder(text, self.params, &mut self.next_positional)?;
        Ok(self.out.push(value))
    }
}

/// Resolve one placeholder against the bound parameters.
///
/// Bare `?` takes the next sequential position from `next_positional`;
/// numbered forms address their parameter directly.
pub(crate) fn resolve_placeholder(
    text: &str,
    params: &[SqlValue],
    next_positional: &mut usize,
) -> RecognizerResult<SqlValue> {
    let index = if text == "?" {
        let index = *next_positional;
        *next_positional += 1;
        index
    } else {
        numbered_index(text)?
    };
    params
        .get(index)
        .cloned()
        .ok_or(RecognizerError::MissingParameter(index + 1))
}

/// Zero-based index of a numbered placeholder (`?N`, `$N`, `:N`).
fn numbered_index(text: &str) -> RecognizerResult<usize> {
    let digits = text
        .strip_prefix('?')
        .or_else(|| text.strip_prefix('$'))
        .or_else(|| text.strip_prefix(':'))
        .unwrap_or(text);
    match digits.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n - 1),
        _ => Err(RecognizerError::MalformedExpression(format!(
            "named placeholder {}",
            text
        ))),
    }
}

/// Concatenate two rendered fragments, separating them with a space when
/// the join would open a comment (`--` or `/*`).
fn glue(left: &str, right: &str) -> String {
    let opens_comment = matches!(
        (left.chars().last(), right.chars().next()),
        (Some('-'), Some('-')) | (Some('/'), Some('*'))
    );
    if opens_comment {
        format!("{} {}", left, right)
    } else {
        format!("{}{}", left, right)
    }
}

fn malformed(what: &str, expr: &sp::Expr) -> RecognizerError {
    RecognizerError::MalformedExpression(format!("{}: {}", what, expr))
}
