use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::engine::BookingForm;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertOwner {
        id: Ulid,
        api_key: String,
    },
    InsertBusiness {
        id: Ulid,
        owner_id: Ulid,
        name: String,
        contact_email: Option<String>,
    },
    InsertBusinessHours {
        day: DayOfWeek,
        is_open: bool,
        start: ClockTime,
        end: ClockTime,
    },
    InsertService {
        id: Ulid,
        name: String,
        duration: u16,
        price: i64,
        category: String,
    },
    InsertServiceAvailability {
        service_id: Ulid,
        day: DayOfWeek,
        start: ClockTime,
        end: ClockTime,
        break_between: u16,
        max_concurrent: u32,
        duration: Option<u16>,
    },
    DeleteServiceAvailability {
        service_id: Ulid,
        day: DayOfWeek,
    },
    InsertBooking {
        form: BookingForm,
    },
    InsertBookingStatus {
        id: Ulid,
        status: BookingStatus,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectSlots {
        service_id: Ulid,
        from: String,
        to: String,
    },
    SelectServices,
    SelectServiceAvailability {
        service_id: Ulid,
    },
    SelectBusinessInfo,
    SelectBusinessHours,
    SelectBooking {
        id: Ulid,
    },
    SweepNotifications,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let need = |n: usize, name: &'static str| {
        if values.len() < n {
            Err(SqlError::WrongArity(name, n, values.len()))
        } else {
            Ok(())
        }
    };

    match table.as_str() {
        "owners" => {
            need(2, "owners")?;
            Ok(Command::InsertOwner {
                id: parse_ulid_expr(&values[0])?,
                api_key: parse_string_expr(&values[1])?,
            })
        }
        "businesses" => {
            need(3, "businesses")?;
            Ok(Command::InsertBusiness {
                id: parse_ulid_expr(&values[0])?,
                owner_id: parse_ulid_expr(&values[1])?,
                name: parse_string_expr(&values[2])?,
                contact_email: values.get(3).map(parse_string_or_null).transpose()?.flatten(),
            })
        }
        "business_hours" => {
            need(2, "business_hours")?;
            let is_open = parse_bool(&values[1])?;
            // A closed day may leave its times NULL or out entirely.
            let time_at = |i: usize, column: &str| -> Result<ClockTime, SqlError> {
                match values.get(i).map(parse_string_or_null).transpose()?.flatten() {
                    Some(s) => parse_clock(&s),
                    None if !is_open => Ok(ClockTime::default()),
                    None => Err(SqlError::InvalidValue(format!("open day needs {column}"))),
                }
            };
            Ok(Command::InsertBusinessHours {
                day: parse_day(&values[0])?,
                is_open,
                start: time_at(2, "start_time")?,
                end: time_at(3, "end_time")?,
            })
        }
        "services" => {
            need(5, "services")?;
            Ok(Command::InsertService {
                id: parse_ulid_expr(&values[0])?,
                name: parse_string_expr(&values[1])?,
                duration: parse_u16(&values[2])?,
                price: parse_i64_expr(&values[3])?,
                category: parse_string_expr(&values[4])?,
            })
        }
        "service_availability" => {
            need(6, "service_availability")?;
            Ok(Command::InsertServiceAvailability {
                service_id: parse_ulid_expr(&values[0])?,
                day: parse_day(&values[1])?,
                start: parse_clock(&parse_string_expr(&values[2])?)?,
                end: parse_clock(&parse_string_expr(&values[3])?)?,
                break_between: parse_u16(&values[4])?,
                max_concurrent: parse_u32(&values[5])?,
                duration: values.get(6).map(parse_u16_or_null).transpose()?.flatten(),
            })
        }
        "bookings" => {
            need(7, "bookings")?;
            Ok(Command::InsertBooking {
                form: BookingForm {
                    id: parse_ulid_expr(&values[0])?,
                    service_id: parse_ulid_expr(&values[1])?,
                    customer_name: parse_string_expr(&values[2])?,
                    customer_email: parse_string_expr(&values[3])?,
                    customer_phone: parse_string_expr(&values[4])?,
                    date: parse_string_expr(&values[5])?,
                    time: parse_string_expr(&values[6])?,
                    notes: values.get(7).map(parse_string_or_null).transpose()?.flatten(),
                },
            })
        }
        "booking_status" => {
            need(2, "booking_status")?;
            let status = parse_string_expr(&values[1])?;
            Ok(Command::InsertBookingStatus {
                id: parse_ulid_expr(&values[0])?,
                status: status.parse().map_err(SqlError::InvalidValue)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let mut filters = Filters::default();
    if let Some(selection) = &delete.selection {
        filters.collect(selection)?;
    }

    match table.as_str() {
        "bookings" => Ok(Command::DeleteBooking {
            id: filters.id.ok_or(SqlError::MissingFilter("id"))?,
        }),
        "service_availability" => Ok(Command::DeleteServiceAvailability {
            service_id: filters.service_id.ok_or(SqlError::MissingFilter("service_id"))?,
            day: filters.day.ok_or(SqlError::MissingFilter("day"))?,
        }),
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

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        filters.collect(selection)?;
    }

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            service_id: filters.service_id.ok_or(SqlError::MissingFilter("service_id"))?,
            from: filters.date_from.ok_or(SqlError::MissingFilter("date >="))?,
            to: filters.date_to.ok_or(SqlError::MissingFilter("date <="))?,
        }),
        "services" => Ok(Command::SelectServices),
        "service_availability" => Ok(Command::SelectServiceAvailability {
            service_id: filters.service_id.ok_or(SqlError::MissingFilter("service_id"))?,
        }),
        "business_info" => Ok(Command::SelectBusinessInfo),
        "business_hours" => Ok(Command::SelectBusinessHours),
        "bookings" => Ok(Command::SelectBooking {
            id: filters.id.ok_or(SqlError::MissingFilter("id"))?,
        }),
        "sweep_notifications" => Ok(Command::SweepNotifications),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Column filters recognised in WHERE clauses joined by AND.
#[derive(Debug, Default)]
struct Filters {
    id: Option<Ulid>,
    service_id: Option<Ulid>,
    day: Option<DayOfWeek>,
    date_from: Option<String>,
    date_to: Option<String>,
}

impl Filters {
    fn collect(&mut self, expr: &Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => {
                if let ast::BinaryOperator::And = op {
                    self.collect(left)?;
                    return self.collect(right);
                }
                let col = expr_column_name(left);
                match (op, col.as_deref()) {
                    (ast::BinaryOperator::Eq, Some("id")) => self.id = Some(parse_ulid_expr(right)?),
                    (ast::BinaryOperator::Eq, Some("service_id")) => {
                        self.service_id = Some(parse_ulid_expr(right)?)
                    }
                    (ast::BinaryOperator::Eq, Some("day")) => self.day = Some(parse_day(right)?),
                    (ast::BinaryOperator::Eq, Some("date")) => {
                        let d = parse_string_expr(right)?;
                        self.date_from = Some(d.clone());
                        self.date_to = Some(d);
                    }
                    (ast::BinaryOperator::GtEq, Some("date")) => self.date_from = Some(parse_string_expr(right)?),
                    (ast::BinaryOperator::LtEq, Some("date")) => self.date_to = Some(parse_string_expr(right)?),
                    _ => {}
                }
                Ok(())
            }
            _ => Ok(()),
        }
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

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(Some),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u16(expr: &Expr) -> Result<u16, SqlError> {
    let v = parse_i64_expr(expr)?;
    u16::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{v} out of range")))
}

fn parse_u16_or_null(expr: &Expr) -> Result<Option<u16>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_u16(expr).map(Some),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::InvalidValue(format!("{v} out of range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_day(expr: &Expr) -> Result<DayOfWeek, SqlError> {
    parse_string_expr(expr)?.parse().map_err(SqlError::InvalidValue)
}

fn parse_clock(s: &str) -> Result<ClockTime, SqlError> {
    s.parse().map_err(|e: ClockTimeError| SqlError::InvalidValue(e.to_string()))
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
    /// Well-formed SQL carrying a value the domain rejects (bad time, day, status).
    InvalidValue(String),
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
            SqlError::InvalidValue(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
