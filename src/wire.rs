use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use futures::{stream, Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::response::NotificationResponse;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;
use ulid::Ulid;

use crate::auth::{resolve_actor, AgendaAuthSource};
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::notify::{self, NotifyHub};
use crate::observability::{command_label, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};
use crate::tenant::TenantManager;

/// Backend pid reported in notifications. Only has to be unique per process.
static NEXT_PID: AtomicI32 = AtomicI32::new(1);

/// Channels this connection is listening on.
#[derive(Default)]
struct Listeners {
    hub: Option<Arc<NotifyHub>>,
    channels: HashMap<Ulid, broadcast::Receiver<Event>>,
}

/// One handler per connection. Notifications queue up in the broadcast
/// receivers and are flushed to the client ahead of its next query.
pub struct AgendaHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AgendaQueryParser>,
    pid: i32,
    listeners: Mutex<Listeners>,
}

impl AgendaHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AgendaQueryParser),
            pid: NEXT_PID.fetch_add(1, Ordering::Relaxed),
            listeners: Mutex::new(Listeners::default()),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    fn resolve_actor<C: ClientInfo>(client: &C) -> Actor {
        resolve_actor(client.metadata().get("user").map(String::as_str))
    }

    /// Pending notifications, oldest first. Lagged receivers skip ahead.
    fn drain_notifications(&self) -> Vec<NotificationResponse> {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let mut out = Vec::new();
        for (agent_id, rx) in listeners.channels.iter_mut() {
            loop {
                match rx.try_recv() {
                    Ok(event) => out.push(NotificationResponse::new(
                        self.pid,
                        notify::channel_name(*agent_id),
                        notify::payload(&event),
                    )),
                    Err(TryRecvError::Lagged(missed)) => {
                        warn!(agent = %agent_id, missed, "listener lagged, notifications dropped");
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                }
            }
        }
        out
    }

    async fn deliver_notifications<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        for notification in self.drain_notifications() {
            client
                .send(PgWireBackendMessage::NotificationResponse(notification))
                .await?;
        }
        Ok(())
    }

    fn listen(&self, engine: &Engine, agent_id: Ulid) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        listeners.hub.get_or_insert_with(|| engine.notify.clone());
        listeners
            .channels
            .entry(agent_id)
            .or_insert_with(|| engine.notify.subscribe(agent_id));
    }

    fn unlisten(&self, agent_id: Option<Ulid>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
        let dropped: Vec<Ulid> = match agent_id {
            Some(id) => listeners.channels.remove(&id).map(|_| id).into_iter().collect(),
            None => listeners.channels.drain().map(|(id, _)| id).collect(),
        };
        if let Some(hub) = &listeners.hub {
            for id in &dropped {
                hub.prune(id);
            }
        }
    }

    /// Parse, execute and record RED metrics for one statement.
    async fn run(&self, engine: &Engine, actor: Actor, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, actor: Actor, cmd: Command) -> PgWireResult<Response> {
        match cmd {
            Command::InsertAgent {
                id,
                name,
                utc_offset_minutes,
            } => {
                engine
                    .create_agent(actor, id, name, utc_offset_minutes)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectAgents { id } => {
                let agents = match id {
                    Some(id) => vec![engine.get_agent(id).await.map_err(engine_err)?],
                    None => engine.list_agents().await,
                };
                Ok(query_response(agents_schema(), agents, |enc, agent| {
                    enc.encode_field(&agent.id.to_string())?;
                    enc.encode_field(&agent.name)?;
                    enc.encode_field(&i64::from(agent.utc_offset_minutes))
                }))
            }
            Command::InsertWeeklyRules { agent_id, rules } => {
                let count = rules.len();
                engine
                    .update_settings(
                        actor,
                        agent_id,
                        SettingsUpdate {
                            weekly_schedule: Some(rules),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(count))
            }
            Command::SelectWeeklyRules { agent_id } => {
                let settings = engine.get_settings(agent_id).await.map_err(engine_err)?;
                let aid = agent_id.to_string();
                Ok(query_response(
                    weekly_rules_schema(),
                    settings.weekly.rules().to_vec(),
                    |enc, rule| {
                        enc.encode_field(&aid)?;
                        enc.encode_field(&i64::from(rule.day_of_week))?;
                        enc.encode_field(&rule.is_available)?;
                        enc.encode_field(&format_ranges(&rule.slots))
                    },
                ))
            }
            Command::InsertOverrides {
                agent_id,
                date,
                end_date,
                is_available,
                slots,
                reason,
            } => {
                let written = engine
                    .add_date_overrides(actor, agent_id, date, end_date, is_available, slots, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(written))
            }
            Command::DeleteOverride { agent_id, date } => {
                let removed = engine
                    .remove_date_override(actor, agent_id, date)
                    .await
                    .map_err(engine_err)?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(usize::from(removed))))
            }
            Command::SelectOverrides { agent_id } => {
                let settings = engine.get_settings(agent_id).await.map_err(engine_err)?;
                let aid = agent_id.to_string();
                Ok(query_response(overrides_schema(), settings.overrides, |enc, ov| {
                    enc.encode_field(&aid)?;
                    enc.encode_field(&ov.date.to_string())?;
                    enc.encode_field(&ov.is_available)?;
                    enc.encode_field(&ov.slots.as_deref().map(format_ranges))?;
                    enc.encode_field(&ov.reason)
                }))
            }
            Command::InsertPolicy { agent_id, policy } => {
                engine
                    .update_settings(
                        actor,
                        agent_id,
                        SettingsUpdate {
                            policy: Some(policy),
                            ..Default::default()
                        },
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectPolicy { agent_id } => {
                let settings = engine.get_settings(agent_id).await.map_err(engine_err)?;
                let aid = agent_id.to_string();
                Ok(query_response(policies_schema(), [settings.policy], |enc, p| {
                    enc.encode_field(&aid)?;
                    enc.encode_field(&i64::from(p.default_duration))?;
                    enc.encode_field(&i64::from(p.buffer_time))?;
                    enc.encode_field(&i64::from(p.max_appointments_per_day))?;
                    enc.encode_field(&i64::from(p.advance_booking_days))
                }))
            }
            Command::SelectAvailability {
                agent_id,
                from,
                to,
                duration,
            } => {
                let days = engine
                    .availability(agent_id, from, to, duration)
                    .await
                    .map_err(engine_err)?;
                let aid = agent_id.to_string();
                let slots: Vec<(chrono::NaiveDate, Slot)> = days
                    .into_iter()
                    .flat_map(|(date, slots)| slots.into_iter().map(move |slot| (date, slot)))
                    .collect();
                Ok(query_response(availability_schema(), slots, |enc, (date, slot)| {
                    enc.encode_field(&aid)?;
                    enc.encode_field(&date.to_string())?;
                    enc.encode_field(&format_hhmm(slot.start))?;
                    enc.encode_field(&format_hhmm(slot.end))
                }))
            }
            Command::InsertAppointment { request } => {
                engine.book(actor, request).await.map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertStatusChange {
                appointment_id,
                status,
                agent_notes,
            } => {
                engine
                    .transition(actor, appointment_id, status, agent_notes)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::InsertReschedule {
                appointment_id,
                date,
                time,
            } => {
                engine
                    .reschedule(actor, appointment_id, date, time)
                    .await
                    .map_err(engine_err)?;
                Ok(inserted(1))
            }
            Command::SelectAppointment { id } => {
                let appt = engine.get_appointment(id).await.map_err(engine_err)?;
                Ok(query_response(appointments_schema(), [appt], encode_appointment))
            }
            Command::SelectAppointments { agent_id, from, to } => {
                let appts = engine
                    .list_appointments(agent_id, from, to)
                    .await
                    .map_err(engine_err)?;
                Ok(query_response(appointments_schema(), appts, encode_appointment))
            }
            Command::Listen { channel } => {
                let agent_id = channel_agent(&channel)?;
                self.listen(engine, agent_id);
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::Unlisten { channel } => {
                let agent_id = channel_agent(&channel)?;
                self.unlisten(Some(agent_id));
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
            Command::UnlistenAll => {
                self.unlisten(None);
                Ok(Response::Execution(Tag::new("UNLISTEN")))
            }
        }
    }
}

impl Drop for AgendaHandler {
    fn drop(&mut self) {
        self.unlisten(None);
    }
}

fn channel_agent(channel: &str) -> PgWireResult<Ulid> {
    notify::parse_channel(channel)
        .ok_or_else(|| user_error("42000", format!("invalid channel: {channel} (expected agent_{{id}})")))
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn query_response<I, T, F>(schema: Arc<Vec<FieldInfo>>, items: I, mut encode: F) -> Response
where
    I: IntoIterator<Item = T>,
    F: FnMut(&mut DataRowEncoder, T) -> PgWireResult<()>,
{
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_appointment(enc: &mut DataRowEncoder, appt: Appointment) -> PgWireResult<()> {
    enc.encode_field(&appt.id.to_string())?;
    enc.encode_field(&appt.agent_id.to_string())?;
    enc.encode_field(&appt.client_id.to_string())?;
    enc.encode_field(&appt.scheduled_date.to_string())?;
    enc.encode_field(&format_hhmm(appt.scheduled_time))?;
    enc.encode_field(&i64::from(appt.duration))?;
    enc.encode_field(&appt.status.to_string())?;
    enc.encode_field(&appt.appointment_type.as_str().to_string())?;
    enc.encode_field(&appt.contact.name)?;
    enc.encode_field(&appt.contact.email)?;
    enc.encode_field(&appt.contact.phone)?;
    enc.encode_field(&appt.notes)?;
    enc.encode_field(&appt.agent_notes)?;
    enc.encode_field(&appt.created_at)?;
    enc.encode_field(&appt.updated_at)
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn agents_schema() -> Arc<Vec<FieldInfo>> {
    Arc::new(vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("utc_offset", Type::INT8),
    ])
}

fn weekly_rules_schema() -> Arc<Vec<FieldInfo>> {
    Arc::new(vec![
        field("agent_id", Type::VARCHAR),
        field("day_of_week", Type::INT8),
        field("is_available", Type::BOOL),
        field("slots", Type::VARCHAR),
    ])
}

fn overrides_schema() -> Arc<Vec<FieldInfo>> {
    Arc::new(vec![
        field("agent_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("is_available", Type::BOOL),
        field("slots", Type::VARCHAR),
        field("reason", Type::VARCHAR),
    ])
}

fn policies_schema() -> Arc<Vec<FieldInfo>> {
    Arc::new(vec![
        field("agent_id", Type::VARCHAR),
        field("default_duration", Type::INT8),
        field("buffer_time", Type::INT8),
        field("max_appointments_per_day", Type::INT8),
        field("advance_booking_days", Type::INT8),
    ])
}

fn availability_schema() -> Arc<Vec<FieldInfo>> {
    Arc::new(vec![
        field("agent_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("start_time", Type::VARCHAR),
        field("end_time", Type::VARCHAR),
    ])
}

fn appointments_schema() -> Arc<Vec<FieldInfo>> {
    Arc::new(vec![
        field("id", Type::VARCHAR),
        field("agent_id", Type::VARCHAR),
        field("client_id", Type::VARCHAR),
        field("date", Type::VARCHAR),
        field("time", Type::VARCHAR),
        field("duration", Type::INT8),
        field("status", Type::VARCHAR),
        field("type", Type::VARCHAR),
        field("contact_name", Type::VARCHAR),
        field("contact_email", Type::VARCHAR),
        field("contact_phone", Type::VARCHAR),
        field("notes", Type::VARCHAR),
        field("agent_notes", Type::VARCHAR),
        field("created_at", Type::INT8),
        field("updated_at", Type::INT8),
    ])
}

/// Row shape of a SELECT, or empty for statements that return no rows.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let schema = match sql::select_table(sql).as_deref() {
        Some("agents") => agents_schema(),
        Some("weekly_rules") => weekly_rules_schema(),
        Some("date_overrides") => overrides_schema(),
        Some("policies") => policies_schema(),
        Some("availability") => availability_schema(),
        Some("appointments") => appointments_schema(),
        _ => return Vec::new(),
    };
    schema.as_ref().clone()
}

#[async_trait]
impl SimpleQueryHandler for AgendaHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.deliver_notifications(client).await?;
        let engine = self.resolve_engine(client)?;
        let actor = Self::resolve_actor(client);
        Ok(vec![self.run(&engine, actor, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AgendaQueryParser;

#[async_trait]
impl QueryParser for AgendaQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AgendaHandler {
    type Statement = String;
    type QueryParser = AgendaQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.deliver_notifications(client).await?;
        let engine = self.resolve_engine(client)?;
        let actor = Self::resolve_actor(client);
        let sql = substitute_params(portal);
        self.run(&engine, actor, &sql).await
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
        )))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut sql = portal.statement.statement.clone();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        sql = sql.replace(&format!("${}", i + 1), &value);
    }
    sql
}

// ── Factory ──────────────────────────────────────────────────────

pub struct AgendaFactory {
    handler: Arc<AgendaHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AgendaAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AgendaFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = AgendaAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AgendaHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AgendaFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes. Each connection gets its own
/// handler so LISTEN state is never shared.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(AgendaFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Policy(_) => "P0001",
        EngineError::Conflict(_) => "23P01",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::Forbidden(_) => "42501",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(..) => "42703",
        SqlError::Unsupported(_) => "0A000",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
