//! Row selection for reports: `<field> <op> <value>` clauses joined by
//! `and`/`or`. Expressions are split on `or` first, then each side on `and`.

use regex::Regex;
use tracing::debug;

use crate::error::AuditError;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl Value {
    pub fn as_text(&self) -> String {
        match self {
            Value::Str(value) => value.clone(),
            Value::Number(value) if value.fract() == 0.0 && value.abs() < 1e15 => {
                format!("{}", *value as i64)
            }
            Value::Number(value) => value.to_string(),
            Value::Bool(value) => value.to_string(),
            Value::Null => String::new(),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(value) => Some(*value),
            Value::Str(value) => value.trim().parse().ok(),
            Value::Bool(_) | Value::Null => None,
        }
    }
}

/// Typed, name-addressed access to a row's columns.
pub trait FieldAccess {
    fn field(&self, name: &str) -> Option<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Contains,
    Eq,
    Ne,
    Ge,
    Le,
    Gt,
    Lt,
}

impl Operator {
    fn parse(op: &str) -> Option<Self> {
        match op.to_ascii_lowercase().as_str() {
            "contains" => Some(Operator::Contains),
            "==" => Some(Operator::Eq),
            "!=" => Some(Operator::Ne),
            ">=" => Some(Operator::Ge),
            "<=" => Some(Operator::Le),
            ">" => Some(Operator::Gt),
            "<" => Some(Operator::Lt),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub field: String,
    pub op: Operator,
    pub value: String,
}

impl Clause {
    fn evaluate<R: FieldAccess>(&self, row: &R) -> Result<bool, AuditError> {
        let actual = row
            .field(&self.field)
            .ok_or_else(|| AuditError::InvalidFilter(format!("unknown field: {}", self.field)))?;
        let numeric = |cmp: fn(f64, f64) -> bool| match (
            actual.as_number(),
            self.value.trim().parse::<f64>().ok(),
        ) {
            (Some(left), Some(right)) => cmp(left, right),
            _ => false,
        };
        Ok(match self.op {
            Operator::Contains => actual.as_text().contains(&self.value),
            Operator::Eq => actual.as_text() == self.value,
            Operator::Ne => actual.as_text() != self.value,
            Operator::Ge => numeric(|l, r| l >= r),
            Operator::Le => numeric(|l, r| l <= r),
            Operator::Gt => numeric(|l, r| l > r),
            Operator::Lt => numeric(|l, r| l < r),
        })
    }
}

/// A parsed expression: any of the `or` branches, each requiring all its clauses.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    branches: Vec<Vec<Clause>>,
}

impl FilterExpr {
    pub fn parse(expression: &str) -> Result<Self, AuditError> {
        let invalid = |err: regex::Error| AuditError::InvalidFilter(err.to_string());
        let or_split = Regex::new(r"(?i)\s+or\s+").map_err(invalid)?;
        let and_split = Regex::new(r"(?i)\s+and\s+").map_err(invalid)?;
        let clause_re =
            Regex::new(r"(?i)^\s*(.+?)\s+(contains|==|!=|>=|<=|>|<)\s+(.*?)\s*$").map_err(invalid)?;

        if expression.trim().is_empty() {
            return Err(AuditError::InvalidFilter("empty expression".to_string()));
        }

        let mut branches = Vec::new();
        for branch in or_split.split(expression) {
            let mut clauses = Vec::new();
            for part in and_split.split(branch) {
                let captures = clause_re
                    .captures(part)
                    .ok_or_else(|| AuditError::InvalidFilter(part.trim().to_string()))?;
                let op = Operator::parse(&captures[2])
                    .ok_or_else(|| AuditError::InvalidFilter(captures[2].to_string()))?;
                clauses.push(Clause {
                    field: captures[1].trim().to_string(),
                    op,
                    value: strip_quotes(&captures[3]).to_string(),
                });
            }
            branches.push(clauses);
        }
        Ok(Self { branches })
    }

    pub fn matches<R: FieldAccess>(&self, row: &R) -> Result<bool, AuditError> {
        for clauses in &self.branches {
            let mut all = true;
            for clause in clauses {
                if !clause.evaluate(row)? {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Keeps the rows matching every expression.
pub fn filter_rows<R: FieldAccess + Clone>(
    expressions: &[String],
    rows: &[R],
) -> Result<Vec<R>, AuditError> {
    let parsed = expressions
        .iter()
        .map(|expression| FilterExpr::parse(expression))
        .collect::<Result<Vec<_>, _>>()?;

    let mut selected = Vec::new();
    for row in rows {
        let mut keep = true;
        for expr in &parsed {
            if !expr.matches(row)? {
                keep = false;
                break;
            }
        }
        if keep {
            selected.push(row.clone());
        }
    }
    debug!(total = rows.len(), selected = selected.len(), "filtered report rows");
    Ok(selected)
}

fn strip_quotes(value: &str) -> &str {
    let trimmed = value.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    trimmed
}
