use sqlparser::ast::{self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input. Every command runs on behalf of the
/// connection's actor.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// `INSERT INTO availabilities ([id,] start, "end")`
    InsertAvailability {
        id: Option<Ulid>,
        start: Ms,
        end: Ms,
    },
    /// `INSERT INTO bookings (availability_id, start, "end", meeting_type[, student_id[, note]])`
    InsertBooking {
        availability_id: Ulid,
        start: Ms,
        end: Ms,
        meeting_type: MeetingType,
        student_id: Option<Ulid>,
        note: Option<String>,
    },
    /// `INSERT INTO booking_decisions (booking_id, status)`
    InsertDecision {
        booking_id: Ulid,
        status: BookingStatus,
    },
    SelectAvailabilities {
        owner_id: Option<Ulid>,
    },
    SelectBookings {
        availability_id: Option<Ulid>,
    },
    SelectFreeSegments {
        availability_id: Ulid,
    },
    SelectCalendar,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "availabilities" => match values.len() {
            2 => Ok(Command::InsertAvailability {
                id: None,
                start: parse_i64(&values[0])?,
                end: parse_i64(&values[1])?,
            }),
            3 => Ok(Command::InsertAvailability {
                id: parse_ulid_or_null(&values[0])?,
                start: parse_i64(&values[1])?,
                end: parse_i64(&values[2])?,
            }),
            n => Err(SqlError::WrongArity("availabilities", 2, n)),
        },
        "bookings" => {
            if !(4..=6).contains(&values.len()) {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let meeting_type = parse_string(&values[3])?;
            Ok(Command::InsertBooking {
                availability_id: parse_ulid(&values[0])?,
                start: parse_i64(&values[1])?,
                end: parse_i64(&values[2])?,
                meeting_type: MeetingType::parse(&meeting_type)
                    .ok_or_else(|| SqlError::Parse(format!("unknown meeting type: {meeting_type}")))?,
                student_id: values.get(4).map(parse_ulid_or_null).transpose()?.flatten(),
                note: values.get(5).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "booking_decisions" => {
            if values.len() != 2 {
                return Err(SqlError::WrongArity("booking_decisions", 2, values.len()));
            }
            let status = parse_string(&values[1])?;
            Ok(Command::InsertDecision {
                booking_id: parse_ulid(&values[0])?,
                status: BookingStatus::parse(&status)
                    .ok_or_else(|| SqlError::Parse(format!("unknown status: {status}")))?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filter = |column: &'static str| -> Result<Option<Ulid>, SqlError> {
        match &select.selection {
            Some(expr) => extract_eq_filter(expr, column),
            None => Ok(None),
        }
    };

    match table.as_str() {
        "availabilities" => Ok(Command::SelectAvailabilities {
            owner_id: filter("owner_id")?,
        }),
        "bookings" => Ok(Command::SelectBookings {
            availability_id: filter("availability_id")?,
        }),
        "free_segments" => Ok(Command::SelectFreeSegments {
            availability_id: filter("availability_id")?
                .ok_or(SqlError::MissingFilter("availability_id"))?,
        }),
        "calendar" => match &select.selection {
            None => Ok(Command::SelectCalendar),
            Some(expr) => Err(SqlError::Unsupported(format!("WHERE {expr}"))),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Find `column = '<ulid>'` in an AND-chain. Any other predicate is refused
/// rather than ignored.
fn extract_eq_filter(expr: &Expr, column: &str) -> Result<Option<Ulid>, SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => Ok(extract_eq_filter(left, column)?.or(extract_eq_filter(right, column)?)),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some(column) => parse_ulid(right).map(Some),
        Expr::Nested(inner) => extract_eq_filter(inner, column),
        other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// Values of the single row being inserted.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            rows => Err(SqlError::Unsupported(format!(
                "multi-row INSERT ({} rows)",
                rows.len()
            ))),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID {s:?}: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected ULID string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid(expr).map(Some),
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64 {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string(expr).map(Some),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
