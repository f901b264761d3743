use chrono::{NaiveDate, NaiveDateTime};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::household::{HouseholdColor, HouseholdError};
use crate::model::*;

/// When a booking should start, as written by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStart {
    /// Unix milliseconds.
    Instant(Ms),
    /// Wall-clock time in the laundry's time zone.
    Local(NaiveDateTime),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingFilter {
    Today,
    OnDate(NaiveDate),
    Household(Ulid),
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertHousehold {
        id: Ulid,
        name: String,
        color: HouseholdColor,
    },
    UpdateProfile {
        name: String,
        color: HouseholdColor,
    },
    InsertBooking {
        id: Ulid,
        start: BookingStart,
        duration: WashDuration,
    },
    StartWash {
        booking_id: Ulid,
    },
    CompleteWash {
        booking_id: Ulid,
    },
    CancelBooking {
        id: Ulid,
    },
    SelectHouseholds,
    SelectColors,
    SelectDashboard,
    SelectBookings {
        filter: BookingFilter,
    },
    SelectAvailability {
        date: NaiveDate,
        duration: WashDuration,
    },
    SelectSchedule {
        date: NaiveDate,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("one statement per query".into()));
    }

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "households" => match values.as_slice() {
            [id, name, color] => Ok(Command::InsertHousehold {
                id: parse_ulid_expr(id)?,
                name: parse_string_expr(name)?,
                color: parse_color_expr(color)?,
            }),
            _ => Err(SqlError::WrongArity("households", 3, values.len())),
        },
        "profile_updates" => match values.as_slice() {
            [name, color] => Ok(Command::UpdateProfile {
                name: parse_string_expr(name)?,
                color: parse_color_expr(color)?,
            }),
            _ => Err(SqlError::WrongArity("profile_updates", 2, values.len())),
        },
        "bookings" => {
            let (id, start, duration) = match values.as_slice() {
                [id, start] => (id, start, WashDuration::default()),
                [id, start, duration] => (id, start, parse_duration_expr(duration)?),
                _ => return Err(SqlError::WrongArity("bookings", 3, values.len())),
            };
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(id)?,
                start: parse_start_expr(start)?,
                duration,
            })
        }
        "wash_starts" => match values.as_slice() {
            [booking_id] => Ok(Command::StartWash {
                booking_id: parse_ulid_expr(booking_id)?,
            }),
            _ => Err(SqlError::WrongArity("wash_starts", 1, values.len())),
        },
        "wash_completions" => match values.as_slice() {
            [booking_id] => Ok(Command::CompleteWash {
                booking_id: parse_ulid_expr(booking_id)?,
            }),
            _ => Err(SqlError::WrongArity("wash_completions", 1, values.len())),
        },
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "bookings" => Ok(Command::CancelBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "households" => Ok(Command::SelectHouseholds),
        "colors" => Ok(Command::SelectColors),
        "dashboard" => Ok(Command::SelectDashboard),
        "bookings" => {
            let filter = match (filters.date, filters.household_id) {
                (Some(_), Some(_)) => {
                    return Err(SqlError::Unsupported(
                        "filter bookings by date or by household_id, not both".into(),
                    ));
                }
                (Some(date), None) => BookingFilter::OnDate(date),
                (None, Some(id)) => BookingFilter::Household(id),
                (None, None) => BookingFilter::Today,
            };
            Ok(Command::SelectBookings { filter })
        }
        "availability" => Ok(Command::SelectAvailability {
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
            duration: filters.duration.unwrap_or_default(),
        }),
        "schedule" => Ok(Command::SelectSchedule {
            date: filters.date.ok_or(SqlError::MissingFilter("date"))?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Debug, Default)]
struct Filters {
    date: Option<NaiveDate>,
    household_id: Option<Ulid>,
    duration: Option<WashDuration>,
}

/// Collect `column = value` terms joined by AND. Other columns are rejected
/// so a typo never silently widens a query.
fn extract_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => extract_filters(inner, filters),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            match expr_column_name(left).as_deref() {
                Some("date") => filters.date = Some(parse_date_expr(right)?),
                Some("household_id") => filters.household_id = Some(parse_ulid_expr(right)?),
                Some("duration") => filters.duration = Some(parse_duration_expr(right)?),
                Some(other) => return Err(SqlError::UnknownColumn(other.to_string())),
                None => return Err(SqlError::Unsupported(format!("filter {expr}"))),
            }
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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
            _ => Err(SqlError::Unsupported("multi-row VALUES".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
        _ => Err(SqlError::MissingFilter("id")),
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
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

fn parse_color_expr(expr: &Expr) -> Result<HouseholdColor, SqlError> {
    let s = parse_string_expr(expr)?;
    Ok(HouseholdColor::parse(&s).ok_or(HouseholdError::UnknownColor(s))?)
}

/// Minutes: one of the offered wash programs.
fn parse_duration_expr(expr: &Expr) -> Result<WashDuration, SqlError> {
    let minutes = parse_i64_expr(expr)?;
    WashDuration::from_minutes(minutes).ok_or(SqlError::BadDuration(minutes))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|e| SqlError::Parse(format!("bad date {s:?}: {e}")))
}

const LOCAL_START_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
];

/// A bare number is Unix milliseconds; a string is either digits or a
/// local `YYYY-MM-DD HH:MM`.
fn parse_start_expr(expr: &Expr) -> Result<BookingStart, SqlError> {
    if let Some(Value::SingleQuotedString(s)) = extract_value(expr) {
        let s = s.trim();
        if let Ok(ms) = s.parse::<Ms>() {
            return Ok(BookingStart::Instant(ms));
        }
        return LOCAL_START_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
            .map(BookingStart::Local)
            .ok_or_else(|| SqlError::Parse(format!("bad start time {s:?}")));
    }
    parse_i64_expr(expr).map(BookingStart::Instant)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("no {0}-minute wash program (choose 30, 60, 90 or 120)")]
    BadDuration(i64),
    #[error(transparent)]
    Household(#[from] HouseholdError),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_insert_household() {
        let sql = format!("INSERT INTO households (id, name, color) VALUES ('{ID}', '2. tv', 'lime')");
        match parse_sql(&sql).unwrap() {
            Command::InsertHousehold { id: got, name, color } => {
                assert_eq!(got, id());
                assert_eq!(name, "2. tv");
                assert_eq!(color, HouseholdColor::Lime);
            }
            cmd => panic!("expected InsertHousehold, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_household_color_by_hex() {
        let sql = format!("INSERT INTO households VALUES ('{ID}', 'st', '#EAB308')");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertHousehold { color: HouseholdColor::Yellow, .. }
        ));
    }

    #[test]
    fn unknown_color_rejected() {
        let sql = format!("INSERT INTO households VALUES ('{ID}', 'st', 'magenta')");
        let err = parse_sql(&sql).unwrap_err();
        assert!(matches!(err, SqlError::Household(HouseholdError::UnknownColor(c)) if c == "magenta"));
    }

    #[test]
    fn household_needs_three_values() {
        let sql = format!("INSERT INTO households (id, name) VALUES ('{ID}', 'st')");
        assert!(matches!(
            parse_sql(&sql).unwrap_err(),
            SqlError::WrongArity("households", 3, 2)
        ));
    }

    #[test]
    fn parse_profile_update() {
        let cmd = parse_sql("INSERT INTO profile_updates (name, color) VALUES ('kld', 'blue')").unwrap();
        assert_eq!(
            cmd,
            Command::UpdateProfile {
                name: "kld".into(),
                color: HouseholdColor::Blue
            }
        );
    }

    #[test]
    fn parse_booking_with_instant() {
        let sql = format!("INSERT INTO bookings (id, start, duration) VALUES ('{ID}', 1780000000000, 90)");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                id: id(),
                start: BookingStart::Instant(1_780_000_000_000),
                duration: WashDuration::NinetyMinutes,
            }
        );
    }

    #[test]
    fn extra_values_rejected() {
        let sql = format!("INSERT INTO households VALUES ('{ID}', 'st', 'red', 'extra')");
        assert!(matches!(
            parse_sql(&sql).unwrap_err(),
            SqlError::WrongArity("households", 3, 4)
        ));
        let sql = format!("INSERT INTO bookings VALUES ('{ID}', 1780000000000, 60, 'x')");
        assert!(matches!(
            parse_sql(&sql).unwrap_err(),
            SqlError::WrongArity("bookings", 3, 4)
        ));
        let sql = "INSERT INTO profile_updates VALUES ('kld', 'blue', 'x')";
        assert!(matches!(
            parse_sql(sql).unwrap_err(),
            SqlError::WrongArity("profile_updates", 2, 3)
        ));
    }

    #[test]
    fn parse_booking_with_local_time_and_default_duration() {
        let sql = format!("INSERT INTO bookings (id, start) VALUES ('{ID}', '2026-03-10 14:00')");
        let expected = date(2026, 3, 10).and_hms_opt(14, 0, 0).unwrap();
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                id: id(),
                start: BookingStart::Local(expected),
                duration: WashDuration::OneHour,
            }
        );
    }

    #[test]
    fn parse_booking_start_as_quoted_millis() {
        let sql = format!("INSERT INTO bookings VALUES ('{ID}', '1780000000000', 30)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertBooking {
                start: BookingStart::Instant(1_780_000_000_000),
                duration: WashDuration::HalfHour,
                ..
            }
        ));
    }

    #[test]
    fn odd_duration_rejected() {
        let sql = format!("INSERT INTO bookings VALUES ('{ID}', 1780000000000, 45)");
        assert!(matches!(parse_sql(&sql).unwrap_err(), SqlError::BadDuration(45)));
    }

    #[test]
    fn bad_start_rejected() {
        let sql = format!("INSERT INTO bookings VALUES ('{ID}', 'tomorrow-ish', 60)");
        assert!(matches!(parse_sql(&sql).unwrap_err(), SqlError::Parse(_)));
    }

    #[test]
    fn multi_row_insert_rejected() {
        let sql = format!("INSERT INTO wash_starts VALUES ('{ID}'), ('{ID}')");
        assert!(matches!(parse_sql(&sql).unwrap_err(), SqlError::Unsupported(_)));
    }

    #[test]
    fn parse_wash_start_and_completion() {
        let start = parse_sql(&format!("INSERT INTO wash_starts (booking_id) VALUES ('{ID}')")).unwrap();
        assert_eq!(start, Command::StartWash { booking_id: id() });
        let done = parse_sql(&format!("INSERT INTO wash_completions (booking_id) VALUES ('{ID}')")).unwrap();
        assert_eq!(done, Command::CompleteWash { booking_id: id() });
    }

    #[test]
    fn parse_cancel() {
        let cmd = parse_sql(&format!("DELETE FROM bookings WHERE id = '{ID}'")).unwrap();
        assert_eq!(cmd, Command::CancelBooking { id: id() });
    }

    #[test]
    fn delete_needs_id_filter() {
        assert!(matches!(
            parse_sql("DELETE FROM bookings").unwrap_err(),
            SqlError::MissingFilter("id")
        ));
        assert!(matches!(
            parse_sql(&format!("DELETE FROM households WHERE id = '{ID}'")).unwrap_err(),
            SqlError::UnknownTable(_)
        ));
    }

    #[test]
    fn parse_plain_selects() {
        assert_eq!(parse_sql("SELECT * FROM households").unwrap(), Command::SelectHouseholds);
        assert_eq!(parse_sql("select * from colors").unwrap(), Command::SelectColors);
        assert_eq!(parse_sql("SELECT * FROM dashboard").unwrap(), Command::SelectDashboard);
    }

    #[test]
    fn parse_booking_filters() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { filter: BookingFilter::Today }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE date = '2026-03-10'").unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::OnDate(date(2026, 3, 10))
            }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM bookings WHERE household_id = '{ID}'")).unwrap(),
            Command::SelectBookings {
                filter: BookingFilter::Household(id())
            }
        );
    }

    #[test]
    fn parse_availability() {
        assert_eq!(
            parse_sql("SELECT * FROM availability WHERE date = '2026-03-10' AND duration = 120").unwrap(),
            Command::SelectAvailability {
                date: date(2026, 3, 10),
                duration: WashDuration::TwoHours
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM availability WHERE date = '2026-03-10'").unwrap(),
            Command::SelectAvailability {
                date: date(2026, 3, 10),
                duration: WashDuration::OneHour
            }
        );
    }

    #[test]
    fn availability_needs_date() {
        assert!(matches!(
            parse_sql("SELECT * FROM availability WHERE duration = 60").unwrap_err(),
            SqlError::MissingFilter("date")
        ));
    }

    #[test]
    fn parse_schedule() {
        assert_eq!(
            parse_sql("SELECT * FROM schedule WHERE date = '2026-03-10'").unwrap(),
            Command::SelectSchedule { date: date(2026, 3, 10) }
        );
    }

    #[test]
    fn unknown_filter_column_rejected() {
        assert!(matches!(
            parse_sql("SELECT * FROM schedule WHERE day = '2026-03-10'").unwrap_err(),
            SqlError::UnknownColumn(c) if c == "day"
        ));
    }

    #[test]
    fn bad_date_rejected() {
        assert!(matches!(
            parse_sql("SELECT * FROM schedule WHERE date = '10/03/2026'").unwrap_err(),
            SqlError::Parse(_)
        ));
    }

    #[test]
    fn unknown_table() {
        assert!(matches!(
            parse_sql("SELECT * FROM machines").unwrap_err(),
            SqlError::UnknownTable(t) if t == "machines"
        ));
    }

    #[test]
    fn unsupported_statement() {
        assert!(matches!(
            parse_sql("DROP TABLE bookings").unwrap_err(),
            SqlError::Unsupported(_)
        ));
    }

    #[test]
    fn empty_query() {
        assert!(matches!(parse_sql("").unwrap_err(), SqlError::Empty));
    }
}
