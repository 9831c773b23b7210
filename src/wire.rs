use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{Role, Secrets, SlotlineAuthSource};
use crate::engine::{now_ms, Engine, EngineError};
use crate::mailer::Mailer;
use crate::model::*;
use crate::observability;
use crate::resolver::{self, RequestContext, VerifiedPrincipal};
use crate::sql::{self, Command, SqlError};
use crate::sweep;

pub struct SlotlineHandler {
    engine: Arc<Engine>,
    mailer: Arc<dyn Mailer>,
    query_parser: Arc<SlotlineQueryParser>,
}

impl SlotlineHandler {
    pub fn new(engine: Arc<Engine>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            engine,
            mailer,
            query_parser: Arc::new(SlotlineQueryParser),
        }
    }

    fn role<C: ClientInfo>(&self, client: &C) -> PgWireResult<Role> {
        client
            .metadata()
            .get("user")
            .and_then(|u| Role::from_user(u))
            .ok_or_else(|| engine_err(EngineError::AuthFailure("unknown login user".into())))
    }

    /// Bind the connection to one business. The database name carries the business id.
    fn business<C: ClientInfo>(&self, client: &C, role: Role) -> Result<Ulid, EngineError> {
        let database = client.metadata().get("database").cloned();
        let named = database.as_deref().and_then(|d| Ulid::from_string(d).ok());
        match role {
            Role::Admin | Role::Channel => {
                let ctx = match named {
                    Some(business_id) => RequestContext::Trusted { business_id },
                    None => RequestContext::Anonymous,
                };
                resolver::resolve(&self.engine, &ctx)
            }
            Role::Owner(owner_id) => {
                // Clients default the database to the user name; that names no business.
                let requested = named.filter(|id| *id != owner_id);
                let principal = VerifiedPrincipal::verified_at_startup(owner_id);
                resolver::resolve_for_principal(&self.engine, &principal, requested)
            }
            Role::Scheduler => Err(EngineError::AuthFailure("scheduler may only run the sweep".into())),
        }
    }

    async fn run<C: ClientInfo>(&self, client: &C, query: &str) -> PgWireResult<Vec<Response>> {
        let role = self.role(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(client, role, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command<C: ClientInfo>(
        &self,
        client: &C,
        role: Role,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertOwner { id, api_key } => {
                require_admin(role)?;
                engine.create_owner(id, api_key).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertBusiness {
                id,
                owner_id,
                name,
                contact_email,
            } => {
                require_admin(role)?;
                engine
                    .create_business(Business {
                        id,
                        owner_id,
                        name,
                        contact_email,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::SweepNotifications => {
                if role != Role::Scheduler {
                    return Err(engine_err(EngineError::AuthFailure(
                        "only the scheduler may run the sweep".into(),
                    )));
                }
                let results = sweep::sweep_once(engine, self.mailer.as_ref(), now_ms()).await;
                let schema = Arc::new(sweep_schema());
                let rows: Vec<PgWireResult<_>> = results
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.booking_id.to_string())?;
                        encoder.encode_field(&r.success)?;
                        encoder.encode_field(&r.error)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            scoped => {
                if role == Role::Channel && changes_catalog(&scoped) {
                    return Err(engine_err(EngineError::AuthFailure(
                        "channel may only book and read".into(),
                    )));
                }
                let business_id = self.business(client, role).map_err(engine_err)?;
                self.execute_scoped(business_id, scoped).await
            }
        }
    }

    async fn execute_scoped(&self, business_id: Ulid, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertBusinessHours {
                day,
                is_open,
                start,
                end,
            } => {
                engine
                    .set_business_hours(BusinessHours {
                        business_id,
                        day,
                        is_open,
                        start,
                        end,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertService {
                id,
                name,
                duration,
                price,
                category,
            } => {
                engine
                    .create_service(Service {
                        id,
                        business_id,
                        name,
                        duration,
                        price,
                        category,
                    })
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertServiceAvailability {
                service_id,
                day,
                start,
                end,
                break_between,
                max_concurrent,
                duration,
            } => {
                engine
                    .set_service_availability(
                        business_id,
                        ServiceAvailability {
                            service_id,
                            day,
                            start,
                            end,
                            break_between,
                            max_concurrent,
                            duration_override: duration,
                        },
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::DeleteServiceAvailability { service_id, day } => {
                engine
                    .remove_service_availability(business_id, service_id, day)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking { form } => {
                engine.create_booking(business_id, form).await.map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::InsertBookingStatus { id, status } => {
                engine
                    .set_booking_status(business_id, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![inserted()])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(business_id, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectSlots { service_id, from, to } => {
                let slots = engine
                    .list_available_slots_between(business_id, service_id, &from, &to)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(slots_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&slot.date.to_string())?;
                        encoder.encode_field(&slot.time.to_string())?;
                        encoder.encode_field(&slot.available)?;
                        encoder.encode_field(&i64::from(slot.remaining_capacity))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectServices => {
                let services = engine.list_services(business_id).await.map_err(engine_err)?;
                let schema = Arc::new(services_schema());
                let rows: Vec<PgWireResult<_>> = services
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.id.to_string())?;
                        encoder.encode_field(&s.name)?;
                        encoder.encode_field(&i32::from(s.duration))?;
                        encoder.encode_field(&s.price)?;
                        encoder.encode_field(&s.category)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectServiceAvailability { service_id } => {
                let rules = engine
                    .service_availability(business_id, service_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(service_availability_schema());
                let rows: Vec<PgWireResult<_>> = rules
                    .into_iter()
                    .map(|a| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&a.service_id.to_string())?;
                        encoder.encode_field(&a.day.to_string())?;
                        encoder.encode_field(&a.start.to_string())?;
                        encoder.encode_field(&a.end.to_string())?;
                        encoder.encode_field(&i32::from(a.break_between))?;
                        encoder.encode_field(&i64::from(a.max_concurrent))?;
                        encoder.encode_field(&a.duration_override.map(i32::from))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBusinessInfo => {
                let info = engine.get_business_info(business_id).await.map_err(engine_err)?;
                let weekly_hours = serde_json::to_string(&info.weekly_hours).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), "XX000".into(), e.to_string())))
                })?;
                let schema = Arc::new(business_info_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&info.business.id.to_string())?;
                encoder.encode_field(&info.business.owner_id.to_string())?;
                encoder.encode_field(&info.business.name)?;
                encoder.encode_field(&info.business.contact_email)?;
                encoder.encode_field(&(info.services_count as i64))?;
                encoder.encode_field(&weekly_hours)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBusinessHours => {
                let hours = engine.business_hours(business_id).await.map_err(engine_err)?;
                let schema = Arc::new(business_hours_schema());
                let rows: Vec<PgWireResult<_>> = hours
                    .into_iter()
                    .map(|h| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&h.day.to_string())?;
                        encoder.encode_field(&h.is_open)?;
                        encoder.encode_field(&h.is_open.then(|| h.start.to_string()))?;
                        encoder.encode_field(&h.is_open.then(|| h.end.to_string()))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::SelectBooking { id } => {
                let b = engine.get_booking(business_id, id).await.map_err(engine_err)?;
                let schema = Arc::new(bookings_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&b.id.to_string())?;
                encoder.encode_field(&b.service_id.to_string())?;
                encoder.encode_field(&b.customer.name)?;
                encoder.encode_field(&b.customer.email)?;
                encoder.encode_field(&b.customer.phone)?;
                encoder.encode_field(&b.date.to_string())?;
                encoder.encode_field(&b.time.to_string())?;
                encoder.encode_field(&b.status.as_str().to_string())?;
                encoder.encode_field(&b.email_confirmed)?;
                encoder.encode_field(&b.notes)?;
                encoder.encode_field(&b.created_at)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
            Command::InsertOwner { .. } | Command::InsertBusiness { .. } | Command::SweepNotifications => Err(
                engine_err(EngineError::validation("statement does not run against a business")),
            ),
        }
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

fn require_admin(role: Role) -> PgWireResult<()> {
    if role == Role::Admin {
        Ok(())
    } else {
        Err(engine_err(EngineError::AuthFailure("provisioning requires the admin user".into())))
    }
}

/// Services, hours and availability rules belong to the business's owner.
fn changes_catalog(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::InsertBusinessHours { .. }
            | Command::InsertService { .. }
            | Command::InsertServiceAvailability { .. }
            | Command::DeleteServiceAvailability { .. }
    )
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn typed(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn slots_schema() -> Vec<FieldInfo> {
    vec![
        text("date"),
        text("time"),
        typed("available", Type::BOOL),
        typed("remaining_capacity", Type::INT8),
    ]
}

fn services_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("name"),
        typed("duration", Type::INT4),
        typed("price", Type::INT8),
        text("category"),
    ]
}

fn service_availability_schema() -> Vec<FieldInfo> {
    vec![
        text("service_id"),
        text("day"),
        text("start_time"),
        text("end_time"),
        typed("break_between", Type::INT4),
        typed("max_concurrent", Type::INT8),
        typed("duration", Type::INT4),
    ]
}

fn business_info_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("owner_id"),
        text("name"),
        text("contact_email"),
        typed("services_count", Type::INT8),
        text("weekly_hours"),
    ]
}

fn business_hours_schema() -> Vec<FieldInfo> {
    vec![
        text("day"),
        typed("is_open", Type::BOOL),
        text("start_time"),
        text("end_time"),
    ]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("service_id"),
        text("customer_name"),
        text("customer_email"),
        text("customer_phone"),
        text("booking_date"),
        text("booking_time"),
        text("status"),
        typed("email_confirmed", Type::BOOL),
        text("notes"),
        typed("created_at", Type::INT8),
    ]
}

fn sweep_schema() -> Vec<FieldInfo> {
    vec![text("booking_id"), typed("success", Type::BOOL), text("error")]
}

/// Result columns for a statement, judged from the table after FROM.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.trim_start().to_lowercase();
    if !lower.starts_with("select") {
        return vec![];
    }
    let table = lower
        .split_whitespace()
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_end_matches(';'));
    match table {
        Some("slots") => slots_schema(),
        Some("services") => services_schema(),
        Some("service_availability") => service_availability_schema(),
        Some("business_info") => business_info_schema(),
        Some("business_hours") => business_hours_schema(),
        Some("bookings") => bookings_schema(),
        Some("sweep_notifications") => sweep_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for SlotlineHandler {
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
        self.run(client, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotlineQueryParser;

#[async_trait]
impl QueryParser for SlotlineQueryParser {
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
impl ExtendedQueryHandler for SlotlineHandler {
    type Statement = String;
    type QueryParser = SlotlineQueryParser;

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
        let sql = substitute_params(portal);
        let mut responses = self.run(client, &sql).await?;
        Ok(responses.remove(0))
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
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Count the highest $N parameter placeholder outside quoted literals.
fn count_params(sql: &str) -> usize {
    let mut max = 0;
    let mut in_literal = false;
    let mut chars = sql.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '\'' => in_literal = !in_literal,
            '$' if !in_literal => {
                let mut end = i + 1;
                while let Some((j, _)) = chars.next_if(|&(_, d)| d.is_ascii_digit()) {
                    end = j + 1;
                }
                if let Ok(n) = sql[i + 1..end].parse::<usize>() {
                    max = max.max(n);
                }
            }
            _ => {}
        }
    }
    max
}

fn substitute_params(portal: &Portal<String>) -> String {
    bind_params(&portal.statement.statement, &portal.parameters)
}

/// Replace $1, $2, ... with bound text values in one pass over the template.
/// Placeholders inside quoted literals and inside bound values are left alone.
fn bind_params<P: AsRef<[u8]>>(template: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut in_literal = false;
    let mut chars = template.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c == '\'' {
            in_literal = !in_literal;
        }
        if c != '$' || in_literal {
            out.push(c);
            continue;
        }
        let mut end = i + 1;
        while let Some((j, _)) = chars.next_if(|&(_, d)| d.is_ascii_digit()) {
            end = j + 1;
        }
        let bound = template[i + 1..end]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| params.get(n));
        match bound {
            Some(Some(bytes)) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                out.push('\'');
                out.push_str(&text.replace('\'', "''"));
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&template[i..end]),
        }
    }
    out
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SlotlineFactory {
    handler: Arc<SlotlineHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<SlotlineAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotlineFactory {
    pub fn new(engine: Arc<Engine>, mailer: Arc<dyn Mailer>, secrets: Secrets) -> Self {
        let auth_source = SlotlineAuthSource::new(engine.clone(), secrets);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotlineHandler::new(engine, mailer)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotlineFactory {
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
    factory: SlotlineFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::NotFound(..) => "02000",
        EngineError::AuthFailure(_) => "28000",
        EngineError::SlotUnavailable { .. } => "40001",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "P0001",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        format!("{}: {e}", e.kind()),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    let (code, kind) = match &e {
        SqlError::InvalidValue(_) => ("22023", "validation_error"),
        _ => ("42601", "syntax_error"),
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        format!("{kind}: {e}"),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM bookings WHERE id = $1"), 1);
        assert_eq!(count_params("INSERT INTO x VALUES ($2, $10, $1)"), 10);
        assert_eq!(count_params("SELECT * FROM services"), 0);
    }

    #[test]
    fn placeholders_in_literals_are_not_counted() {
        assert_eq!(count_params("INSERT INTO x VALUES ($1, 'costs $9')"), 1);
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let params = [Some("01JAAAAAAAAAAAAAAAAAAAAAAA"), Some("deposit of $1 paid")];
        assert_eq!(
            bind_params("INSERT INTO x VALUES ($1, $2)", &params),
            "INSERT INTO x VALUES ('01JAAAAAAAAAAAAAAAAAAAAAAA', 'deposit of $1 paid')"
        );
    }

    #[test]
    fn binding_quotes_escapes_and_nulls() {
        let mut params = vec![Some("O'Brien"), None];
        params.extend(["c", "d", "e", "f", "g", "h", "i", "ten"].map(Some));
        assert_eq!(
            bind_params("VALUES ($1, $2, $10, '$1', $11)", &params),
            "VALUES ('O''Brien', NULL, 'ten', '$1', $11)"
        );
    }

    #[test]
    fn schema_follows_table() {
        assert_eq!(result_schema("SELECT * FROM slots WHERE service_id = $1").len(), 4);
        assert_eq!(result_schema("select * from sweep_notifications;").len(), 3);
        assert!(result_schema("DELETE FROM bookings WHERE id = $1").is_empty());
    }

    #[test]
    fn error_codes_by_kind() {
        let key = SlotKey {
            date: chrono::NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            time: ClockTime::hm(9, 0).unwrap(),
        };
        assert_eq!(sqlstate(&EngineError::SlotUnavailable { key, reason: "fully booked" }), "40001");
        assert_eq!(sqlstate(&EngineError::validation("x")), "22023");
        assert_eq!(sqlstate(&EngineError::NotFound("booking", Ulid::nil())), "02000");
    }
}
