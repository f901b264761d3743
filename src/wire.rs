use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Sink;
use futures::stream;
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::WashbookAuthSource;
use crate::booking::BookingError;
use crate::calendar::Calendar;
use crate::engine::{Engine, EngineError};
use crate::household::{HouseholdError, PALETTE};
use crate::model::*;
use crate::observability;
use crate::session::Session;
use crate::sql::{self, BookingFilter, BookingStart, Command, SqlError};
use crate::tenant::TenantManager;

const LOCAL_FORMAT: &str = "%Y-%m-%d %H:%M";

pub struct WashbookHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<WashbookQueryParser>,
}

impl WashbookHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(WashbookQueryParser),
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
            .map_err(|e| user_error("08006", format!("laundry unavailable: {e}")))
    }

    /// The household named by the login user, if it is registered here.
    async fn resolve_session<C: ClientInfo>(&self, engine: &Engine, client: &C) -> Option<Session> {
        let user = client.metadata().get("user")?;
        let id = Ulid::from_string(user).ok()?;
        engine.session_for(id).await.ok()
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Response> {
        let engine = self.resolve_engine(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let session = self.resolve_session(&engine, client).await;
        let now = self.tenant_manager.now_ms();

        let started = Instant::now();
        let result = execute_command(&engine, session.as_ref(), cmd, now).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }
}

fn require(session: Option<&Session>) -> PgWireResult<&Session> {
    session.ok_or_else(|| {
        user_error(
            "28000",
            "log in as a registered household (user = household id) to do this".into(),
        )
    })
}

fn resolve_start(start: BookingStart, calendar: &Calendar) -> Ms {
    match start {
        BookingStart::Instant(ms) => ms,
        BookingStart::Local(local) => calendar.at(local.date(), local.time()),
    }
}

fn execution(tag: &str) -> PgWireResult<Response> {
    Ok(Response::Execution(Tag::new(tag).with_rows(1)))
}

async fn execute_command(
    engine: &Engine,
    session: Option<&Session>,
    cmd: Command,
    now: Ms,
) -> PgWireResult<Response> {
    let calendar = *engine.calendar();
    match cmd {
        Command::InsertHousehold { id, name, color } => {
            engine
                .register_household(id, &name, color, now)
                .await
                .map_err(engine_err)?;
            execution("INSERT")
        }
        Command::UpdateProfile { name, color } => {
            engine
                .update_profile(require(session)?, &name, color)
                .await
                .map_err(engine_err)?;
            execution("INSERT")
        }
        Command::InsertBooking { id, start, duration } => {
            let session = require(session)?;
            let start = resolve_start(start, &calendar);
            if let Err(e) = engine.book(session, id, start, duration, now).await {
                if let EngineError::Booking(reason) = &e {
                    metrics::counter!(
                        observability::BOOKINGS_REJECTED_TOTAL,
                        "reason" => observability::rejection_label(reason)
                    )
                    .increment(1);
                }
                return Err(engine_err(e));
            }
            execution("INSERT")
        }
        Command::StartWash { booking_id } => {
            engine
                .start_wash(require(session)?, booking_id, now)
                .await
                .map_err(engine_err)?;
            execution("INSERT")
        }
        Command::CompleteWash { booking_id } => {
            engine
                .complete_wash(require(session)?, booking_id, now)
                .await
                .map_err(engine_err)?;
            execution("INSERT")
        }
        Command::CancelBooking { id } => {
            engine
                .cancel_booking(require(session)?, id, now)
                .await
                .map_err(engine_err)?;
            execution("DELETE")
        }
        Command::SelectHouseholds => {
            let schema = Arc::new(households_schema());
            let rows: Vec<PgWireResult<DataRow>> = engine
                .households()
                .await
                .into_iter()
                .map(|h| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&h.id.to_string())?;
                    encoder.encode_field(&h.name)?;
                    encoder.encode_field(&h.color.name())?;
                    encoder.encode_field(&h.color.hex())?;
                    encoder.encode_field(&h.color.text_color().as_str())?;
                    encoder.encode_field(&h.created_at)?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(query_response(schema, rows))
        }
        Command::SelectColors => {
            let schema = Arc::new(colors_schema());
            let free = engine.available_colors().await;
            let rows: Vec<PgWireResult<DataRow>> = PALETTE
                .iter()
                .map(|entry| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&entry.name)?;
                    encoder.encode_field(&entry.hex)?;
                    encoder.encode_field(&entry.text.as_str())?;
                    encoder.encode_field(&free.contains(&entry.color))?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(query_response(schema, rows))
        }
        Command::SelectDashboard => {
            let dash = engine.dashboard(require(session)?, now).await;
            let schema = Arc::new(dashboard_schema());
            let entries = dash
                .running
                .iter()
                .map(|b| ("running", b))
                .chain(dash.next.iter().map(|b| ("next", b)))
                .chain(dash.mine.iter().map(|b| ("mine", b)));
            let rows: Vec<PgWireResult<DataRow>> = entries
                .map(|(kind, info)| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&kind)?;
                    encode_booking(&mut encoder, info, &calendar)?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(query_response(schema, rows))
        }
        Command::SelectBookings { filter } => {
            let infos = match filter {
                BookingFilter::Today => engine.bookings_on(calendar.today(now), now).await,
                BookingFilter::OnDate(date) => engine.bookings_on(date, now).await,
                BookingFilter::Household(id) => Ok(engine.household_bookings(&id, now).await),
            }
            .map_err(engine_err)?;
            let schema = Arc::new(bookings_schema());
            let rows: Vec<PgWireResult<DataRow>> = infos
                .iter()
                .map(|info| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encode_booking(&mut encoder, info, &calendar)?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(query_response(schema, rows))
        }
        Command::SelectAvailability { date, duration } => {
            let slots = engine
                .availability_on(date, duration, now)
                .await
                .map_err(engine_err)?;
            let schema = Arc::new(availability_schema());
            let rows: Vec<PgWireResult<DataRow>> = slots
                .into_iter()
                .map(|info| {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&info.slot.to_string())?;
                    encoder.encode_field(&info.slot.instant(&calendar))?;
                    encoder.encode_field(&info.available)?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(query_response(schema, rows))
        }
        Command::SelectSchedule { date } => {
            let timeline = engine.timeline_on(date, now).await.map_err(engine_err)?;
            let schema = Arc::new(schedule_schema());
            let rows: Vec<PgWireResult<DataRow>> = timeline
                .into_iter()
                .map(|entry| {
                    let occupant = entry.occupant.as_ref();
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&entry.slot.to_string())?;
                    encoder.encode_field(&entry.slot.instant(&calendar))?;
                    encoder.encode_field(&occupant.map(|o| o.id.to_string()))?;
                    encoder.encode_field(&occupant.and_then(|o| o.household_name.clone()))?;
                    encoder.encode_field(&occupant.and_then(|o| o.color).map(|c| c.hex()))?;
                    encoder.encode_field(&occupant.and_then(|o| o.color).map(|c| c.text_color().as_str()))?;
                    encoder.encode_field(&occupant.map(|o| o.display.as_str()))?;
                    Ok(encoder.take_row())
                })
                .collect();
            Ok(query_response(schema, rows))
        }
    }
}

fn encode_booking(encoder: &mut DataRowEncoder, info: &BookingInfo, calendar: &Calendar) -> PgWireResult<()> {
    encoder.encode_field(&info.id.to_string())?;
    encoder.encode_field(&info.household_id.to_string())?;
    encoder.encode_field(&info.household_name)?;
    encoder.encode_field(&info.color.map(|c| c.name()))?;
    encoder.encode_field(&info.start)?;
    encoder.encode_field(&info.end)?;
    encoder.encode_field(&calendar.local(info.start).format(LOCAL_FORMAT).to_string())?;
    encoder.encode_field(&(info.duration.minutes() as i32))?;
    encoder.encode_field(&info.status.as_str())?;
    encoder.encode_field(&info.display.as_str())?;
    encoder.encode_field(&info.actions.can_start)?;
    encoder.encode_field(&info.actions.can_complete)?;
    encoder.encode_field(&info.actions.can_cancel)?;
    Ok(())
}

fn query_response(schema: Arc<Vec<FieldInfo>>, rows: Vec<PgWireResult<DataRow>>) -> Response {
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

// ── Result schemas ───────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn households_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("name", Type::VARCHAR),
        field("color", Type::VARCHAR),
        field("hex", Type::VARCHAR),
        field("text_color", Type::VARCHAR),
        field("created_at", Type::INT8),
    ]
}

fn colors_schema() -> Vec<FieldInfo> {
    vec![
        field("name", Type::VARCHAR),
        field("hex", Type::VARCHAR),
        field("text_color", Type::VARCHAR),
        field("available", Type::BOOL),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        field("id", Type::VARCHAR),
        field("household_id", Type::VARCHAR),
        field("household_name", Type::VARCHAR),
        field("color", Type::VARCHAR),
        field("start", Type::INT8),
        field("end", Type::INT8),
        field("start_local", Type::VARCHAR),
        field("duration", Type::INT4),
        field("status", Type::VARCHAR),
        field("display_status", Type::VARCHAR),
        field("can_start", Type::BOOL),
        field("can_complete", Type::BOOL),
        field("can_cancel", Type::BOOL),
    ]
}

fn dashboard_schema() -> Vec<FieldInfo> {
    let mut schema = vec![field("kind", Type::VARCHAR)];
    schema.extend(bookings_schema());
    schema
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        field("slot", Type::VARCHAR),
        field("start", Type::INT8),
        field("available", Type::BOOL),
    ]
}

fn schedule_schema() -> Vec<FieldInfo> {
    vec![
        field("slot", Type::VARCHAR),
        field("start", Type::INT8),
        field("booking_id", Type::VARCHAR),
        field("household_name", Type::VARCHAR),
        field("hex", Type::VARCHAR),
        field("text_color", Type::VARCHAR),
        field("display_status", Type::VARCHAR),
    ]
}

/// Row shape of a statement, decided from the table after FROM so that
/// statements with unbound `$n` parameters can be described.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    let mut words = upper
        .split(|c: char| c.is_whitespace() || c == ';')
        .filter(|w| !w.is_empty());
    if words.next() != Some("SELECT") {
        return vec![];
    }
    match words.skip_while(|w| *w != "FROM").nth(1) {
        Some("HOUSEHOLDS") => households_schema(),
        Some("COLORS") => colors_schema(),
        Some("DASHBOARD") => dashboard_schema(),
        Some("BOOKINGS") => bookings_schema(),
        Some("AVAILABILITY") => availability_schema(),
        Some("SCHEDULE") => schedule_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for WashbookHandler {
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
        Ok(vec![self.run(client, query).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct WashbookQueryParser;

#[async_trait]
impl QueryParser for WashbookQueryParser {
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
impl ExtendedQueryHandler for WashbookHandler {
    type Statement = String;
    type QueryParser = WashbookQueryParser;

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
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(client, &sql).await
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

/// Count the highest $N parameter placeholder in the SQL string.
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

/// Substitute $1, $2, ... placeholders with bound parameter values (text
/// format) in one left-to-right pass, so bound text is never rescanned.
/// Placeholders without a bound value are left as written.
fn substitute_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        result.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let bound = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes);
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            Some(None) => result.push_str("NULL"),
            None => result.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    result.push_str(rest);
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct WashbookFactory {
    handler: Arc<WashbookHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<WashbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl WashbookFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = WashbookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(WashbookHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for WashbookFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(WashbookFactory::new(tenant_manager, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each store rejection.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Booking(BookingError::SlotUnavailable(_)) => "23P01",
        EngineError::Booking(
            BookingError::InThePast | BookingError::BeyondHorizon(_) | BookingError::OutsideViewWindow,
        ) => "22023",
        EngineError::Booking(
            BookingError::NotStartable | BookingError::NotRunning | BookingError::NotCancellable,
        ) => "55000",
        EngineError::Household(HouseholdError::HouseholdsFull) => "53400",
        EngineError::Household(HouseholdError::ColorTaken(_)) | EngineError::AlreadyExists(_) => "23505",
        EngineError::Household(HouseholdError::EmptyName | HouseholdError::UnknownColor(_)) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::NotOwner(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(msg) = &e {
        tracing::error!("write failed: {msg}");
    }
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::UnknownColumn(_) => "42703",
        SqlError::BadDuration(_) | SqlError::Household(_) => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}
