use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertAgent {
        id: Ulid,
        name: Option<String>,
        utc_offset_minutes: i32,
    },
    SelectAgents {
        id: Option<Ulid>,
    },
    InsertWeeklyRules {
        agent_id: Ulid,
        rules: Vec<WeeklyDayRule>,
    },
    SelectWeeklyRules {
        agent_id: Ulid,
    },
    InsertOverrides {
        agent_id: Ulid,
        date: NaiveDate,
        end_date: Option<NaiveDate>,
        is_available: bool,
        slots: Option<Vec<TimeRange>>,
        reason: Option<String>,
    },
    DeleteOverride {
        agent_id: Ulid,
        date: NaiveDate,
    },
    SelectOverrides {
        agent_id: Ulid,
    },
    InsertPolicy {
        agent_id: Ulid,
        policy: AvailabilityPolicy,
    },
    SelectPolicy {
        agent_id: Ulid,
    },
    SelectAvailability {
        agent_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
        duration: Option<Minutes>,
    },
    InsertAppointment {
        request: BookingRequest,
    },
    InsertStatusChange {
        appointment_id: Ulid,
        status: AppointmentStatus,
        agent_notes: Option<String>,
    },
    InsertReschedule {
        appointment_id: Ulid,
        date: NaiveDate,
        time: Minutes,
    },
    SelectAppointment {
        id: Ulid,
    },
    SelectAppointments {
        agent_id: Ulid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    },
    Listen {
        channel: String,
    },
    Unlisten {
        channel: String,
    },
    UnlistenAll,
}

/// Positional column order for each writable table, used when an INSERT
/// omits its column list.
const AGENT_COLUMNS: &[&str] = &["id", "name", "utc_offset"];
const WEEKLY_RULE_COLUMNS: &[&str] = &["agent_id", "day_of_week", "is_available", "slots"];
const OVERRIDE_COLUMNS: &[&str] = &["agent_id", "date", "end_date", "is_available", "slots", "reason"];
const POLICY_COLUMNS: &[&str] = &[
    "agent_id",
    "default_duration",
    "buffer_time",
    "max_appointments_per_day",
    "advance_booking_days",
];
const APPOINTMENT_COLUMNS: &[&str] = &[
    "id",
    "agent_id",
    "client_id",
    "date",
    "time",
    "duration",
    "type",
    "contact_name",
    "contact_email",
    "contact_phone",
    "notes",
    "idempotency_key",
];
const STATUS_CHANGE_COLUMNS: &[&str] = &["appointment_id", "status", "agent_notes"];
const RESCHEDULE_COLUMNS: &[&str] = &["appointment_id", "date", "time"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim().trim_end_matches(';').trim();
    if let Some(channel) = strip_keyword(trimmed, "LISTEN") {
        return Ok(Command::Listen {
            channel: channel_ident(channel)?,
        });
    }
    if let Some(channel) = strip_keyword(trimmed, "UNLISTEN") {
        if channel == "*" {
            return Ok(Command::UnlistenAll);
        }
        return Ok(Command::Unlisten {
            channel: channel_ident(channel)?,
        });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Table a SELECT reads from, without binding any filter values. Used to
/// describe prepared statements whose placeholders are not bound yet.
pub fn select_table(sql: &str) -> Option<String> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).ok()?;
    let Some(Statement::Query(query)) = stmts.first() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_ref() else {
        return None;
    };
    table_factor_name(&select.from.first()?.relation).ok()
}

fn strip_keyword<'a>(sql: &'a str, keyword: &str) -> Option<&'a str> {
    let head = sql.get(..keyword.len())?;
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    let rest = &sql[keyword.len()..];
    if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

fn channel_ident(raw: &str) -> Result<String, SqlError> {
    let channel = raw.trim_matches('"');
    if channel.is_empty() || !channel.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(SqlError::Parse(format!("bad channel name: {raw}")));
    }
    Ok(channel.to_string())
}

// ── INSERT ────────────────────────────────────────────────────

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let columns: Vec<String> = insert.columns.iter().map(|c| c.value.to_lowercase()).collect();
    let rows = extract_all_insert_rows(insert)?;

    match table.as_str() {
        "agents" => {
            let row = single_row("agents", AGENT_COLUMNS, &columns, &rows)?;
            Ok(Command::InsertAgent {
                id: parse_ulid_expr(row.required("id")?)?,
                name: row.get("name").map(parse_string_expr).transpose()?,
                utc_offset_minutes: row
                    .get("utc_offset")
                    .map(|e| parse_int_expr::<i32>(e, "utc_offset"))
                    .transpose()?
                    .unwrap_or(0),
            })
        }
        "weekly_rules" => parse_weekly_rules(&columns, &rows),
        "date_overrides" => {
            let row = single_row("date_overrides", OVERRIDE_COLUMNS, &columns, &rows)?;
            let slots = row
                .get("slots")
                .map(parse_slots_expr)
                .transpose()?
                .filter(|s| !s.is_empty());
            Ok(Command::InsertOverrides {
                agent_id: parse_ulid_expr(row.required("agent_id")?)?,
                date: parse_date_expr(row.required("date")?)?,
                end_date: row.get("end_date").map(parse_date_expr).transpose()?,
                is_available: row.get("is_available").map(parse_bool).transpose()?.unwrap_or(false),
                slots,
                reason: row.get("reason").map(parse_string_expr).transpose()?,
            })
        }
        "policies" => {
            let row = single_row("policies", POLICY_COLUMNS, &columns, &rows)?;
            let defaults = AvailabilityPolicy::default();
            let minutes = |col: &'static str, default: Minutes| -> Result<Minutes, SqlError> {
                Ok(row.get(col).map(|e| parse_int_expr(e, col)).transpose()?.unwrap_or(default))
            };
            Ok(Command::InsertPolicy {
                agent_id: parse_ulid_expr(row.required("agent_id")?)?,
                policy: AvailabilityPolicy {
                    default_duration: minutes("default_duration", defaults.default_duration)?,
                    buffer_time: minutes("buffer_time", defaults.buffer_time)?,
                    max_appointments_per_day: minutes("max_appointments_per_day", defaults.max_appointments_per_day)?,
                    advance_booking_days: minutes("advance_booking_days", defaults.advance_booking_days)?,
                },
            })
        }
        "appointments" => {
            let row = single_row("appointments", APPOINTMENT_COLUMNS, &columns, &rows)?;
            let type_str = parse_string_expr(row.required("type")?)?;
            let appointment_type = AppointmentType::parse(&type_str)
                .ok_or_else(|| SqlError::Parse(format!("unknown appointment type: {type_str}")))?;
            Ok(Command::InsertAppointment {
                request: BookingRequest {
                    id: parse_ulid_expr(row.required("id")?)?,
                    agent_id: parse_ulid_expr(row.required("agent_id")?)?,
                    client_id: parse_ulid_expr(row.required("client_id")?)?,
                    date: parse_date_expr(row.required("date")?)?,
                    time: parse_time_expr(row.required("time")?)?,
                    duration: row.get("duration").map(|e| parse_int_expr(e, "duration")).transpose()?,
                    appointment_type,
                    contact: ContactDetails {
                        name: parse_string_expr(row.required("contact_name")?)?,
                        email: parse_string_expr(row.required("contact_email")?)?,
                        phone: row.get("contact_phone").map(parse_string_expr).transpose()?,
                    },
                    notes: row.get("notes").map(parse_string_expr).transpose()?,
                    idempotency_key: row.get("idempotency_key").map(parse_string_expr).transpose()?,
                },
            })
        }
        "status_changes" => {
            let row = single_row("status_changes", STATUS_CHANGE_COLUMNS, &columns, &rows)?;
            let status_str = parse_string_expr(row.required("status")?)?;
            Ok(Command::InsertStatusChange {
                appointment_id: parse_ulid_expr(row.required("appointment_id")?)?,
                status: AppointmentStatus::parse(&status_str)
                    .ok_or_else(|| SqlError::Parse(format!("unknown status: {status_str}")))?,
                agent_notes: row.get("agent_notes").map(parse_string_expr).transpose()?,
            })
        }
        "reschedules" => {
            let row = single_row("reschedules", RESCHEDULE_COLUMNS, &columns, &rows)?;
            Ok(Command::InsertReschedule {
                appointment_id: parse_ulid_expr(row.required("appointment_id")?)?,
                date: parse_date_expr(row.required("date")?)?,
                time: parse_time_expr(row.required("time")?)?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Every row must target the same agent; the batch becomes one settings update.
fn parse_weekly_rules(columns: &[String], rows: &[Vec<Expr>]) -> Result<Command, SqlError> {
    let mut agent_id = None;
    let mut rules = Vec::with_capacity(rows.len());
    for (i, values) in rows.iter().enumerate() {
        let row = InsertRow::new("weekly_rules", WEEKLY_RULE_COLUMNS, columns, values)?;
        let row_agent = parse_ulid_expr(row.required("agent_id")?)?;
        if *agent_id.get_or_insert(row_agent) != row_agent {
            return Err(SqlError::Parse(format!("row {i}: all weekly_rules rows must share one agent_id")));
        }
        let slots = row
            .get("slots")
            .map(parse_slots_expr)
            .transpose()
            .map_err(|e| SqlError::Parse(format!("row {i}: {e}")))?
            .unwrap_or_default();
        let is_available = row
            .get("is_available")
            .map(parse_bool)
            .transpose()?
            .unwrap_or(!slots.is_empty());
        rules.push(WeeklyDayRule {
            day_of_week: parse_int_expr(row.required("day_of_week")?, "day_of_week")?,
            is_available,
            slots,
        });
    }
    Ok(Command::InsertWeeklyRules {
        agent_id: agent_id.ok_or_else(|| SqlError::Parse("empty VALUES".into()))?,
        rules,
    })
}

/// One VALUES row with its values looked up by column name.
struct InsertRow<'a> {
    table: &'static str,
    layout: &'static [&'static str],
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> InsertRow<'a> {
    fn new(
        table: &'static str,
        layout: &'static [&'static str],
        columns: &'a [String],
        values: &'a [Expr],
    ) -> Result<Self, SqlError> {
        if let Some(unknown) = columns.iter().find(|c| !layout.contains(&c.as_str())) {
            return Err(SqlError::UnknownColumn(table, unknown.clone()));
        }
        let expected = if columns.is_empty() { layout.len() } else { columns.len() };
        if values.len() > expected || (!columns.is_empty() && values.len() != expected) {
            return Err(SqlError::WrongArity(table, expected, values.len()));
        }
        Ok(Self {
            table,
            layout,
            columns,
            values,
        })
    }

    /// `None` for an absent column or a NULL value.
    fn get(&self, column: &str) -> Option<&'a Expr> {
        let idx = if self.columns.is_empty() {
            self.layout.iter().position(|c| *c == column)?
        } else {
            self.columns.iter().position(|c| c == column)?
        };
        self.values
            .get(idx)
            .filter(|e| !matches!(extract_value(e), Some(Value::Null)))
    }

    fn required(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(self.table, column))
    }
}

fn single_row<'a>(
    table: &'static str,
    layout: &'static [&'static str],
    columns: &'a [String],
    rows: &'a [Vec<Expr>],
) -> Result<InsertRow<'a>, SqlError> {
    match rows {
        [values] => InsertRow::new(table, layout, columns, values),
        _ => Err(SqlError::Unsupported(format!("multi-row INSERT INTO {table}"))),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    match table.as_str() {
        "date_overrides" => {
            let filters = Filters::from_selection(delete.selection.as_ref())?;
            Ok(Command::DeleteOverride {
                agent_id: parse_ulid_expr(filters.eq("agent_id").ok_or(SqlError::MissingFilter("agent_id"))?)?,
                date: parse_date_expr(filters.eq("date").ok_or(SqlError::MissingFilter("date"))?)?,
            })
        }
        "appointments" => Err(SqlError::Unsupported(
            "appointments cannot be deleted; insert a status_changes row instead".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;
    let agent_id = || -> Result<Ulid, SqlError> {
        parse_ulid_expr(filters.eq("agent_id").ok_or(SqlError::MissingFilter("agent_id"))?)
    };

    match table.as_str() {
        "agents" => Ok(Command::SelectAgents {
            id: filters.eq("id").map(parse_ulid_expr).transpose()?,
        }),
        "weekly_rules" => Ok(Command::SelectWeeklyRules { agent_id: agent_id()? }),
        "date_overrides" => Ok(Command::SelectOverrides { agent_id: agent_id()? }),
        "policies" => Ok(Command::SelectPolicy { agent_id: agent_id()? }),
        "availability" => {
            let (from, to) = filters.date_bounds()?;
            Ok(Command::SelectAvailability {
                agent_id: agent_id()?,
                from: from.ok_or(SqlError::MissingFilter("date >="))?,
                to: to.ok_or(SqlError::MissingFilter("date <="))?,
                duration: filters.eq("duration").map(|e| parse_int_expr(e, "duration")).transpose()?,
            })
        }
        "appointments" => {
            if let Some(id) = filters.eq("id") {
                return Ok(Command::SelectAppointment { id: parse_ulid_expr(id)? });
            }
            let (from, to) = filters.date_bounds()?;
            Ok(Command::SelectAppointments {
                agent_id: agent_id()?,
                from,
                to,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Conjunction of `column <op> value` predicates from a WHERE clause.
struct Filters<'a> {
    preds: Vec<(String, ast::BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut filters = Filters { preds: Vec::new() };
        if let Some(expr) = selection {
            filters.collect(expr)?;
        }
        Ok(filters)
    }

    fn collect(&mut self, expr: &'a Expr) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => self.collect(inner),
            Expr::BinaryOp { left, op, right } => match op {
                ast::BinaryOperator::And => {
                    self.collect(left)?;
                    self.collect(right)
                }
                ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq => {
                    let col = expr_column_name(left)
                        .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                    self.preds.push((col, op.clone(), right.as_ref()));
                    Ok(())
                }
                other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
            },
            other => Err(SqlError::Unsupported(format!("WHERE {other}"))),
        }
    }

    fn find(&self, column: &str, op: &ast::BinaryOperator) -> Option<&'a Expr> {
        self.preds
            .iter()
            .find(|(c, o, _)| c == column && o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, &ast::BinaryOperator::Eq)
    }

    /// `date = d` bounds both ends; otherwise `date >=` and `date <=`.
    fn date_bounds(&self) -> Result<(Option<NaiveDate>, Option<NaiveDate>), SqlError> {
        if let Some(exact) = self.eq("date") {
            let d = parse_date_expr(exact)?;
            return Ok((Some(d), Some(d)));
        }
        let from = self.find("date", &ast::BinaryOperator::GtEq).map(parse_date_expr).transpose()?;
        let to = self.find("date", &ast::BinaryOperator::LtEq).map(parse_date_expr).transpose()?;
        Ok((from, to))
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

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
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

/// Literal value, looking through parentheses and casts such as `'2026-03-02'::date`.
fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        Expr::Nested(inner) | Expr::Cast { expr: inner, .. } => extract_value(inner),
        _ => None,
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string_expr(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID '{s}': {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string_expr(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| SqlError::Parse(format!("bad date '{s}': expected YYYY-MM-DD")))
}

fn parse_time_expr(expr: &Expr) -> Result<Minutes, SqlError> {
    let s = parse_string_expr(expr)?;
    parse_hhmm(&s)
        .filter(|m| *m < MINUTES_PER_DAY)
        .ok_or_else(|| SqlError::Parse(format!("bad time '{s}': expected HH:MM")))
}

fn parse_slots_expr(expr: &Expr) -> Result<Vec<TimeRange>, SqlError> {
    parse_ranges(&parse_string_expr(expr)?).map_err(SqlError::Parse)
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
            _ => Err(SqlError::Parse(format!("expected number, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

fn parse_int_expr<T: TryFrom<i64>>(expr: &Expr, column: &str) -> Result<T, SqlError> {
    let v = parse_i64_expr(expr)?;
    T::try_from(v).map_err(|_| SqlError::Parse(format!("{column}: {v} out of range")))
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
            _ => Err(SqlError::Parse(format!("expected bool, got {value}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(&'static str, String),
    WrongArity(&'static str, usize, usize),
    MissingColumn(&'static str, &'static str),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(t, c) => write!(f, "{t}: unknown column {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingColumn(t, c) => write!(f, "{t}: missing value for {c}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
