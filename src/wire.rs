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

use crate::auth::MeetslotAuthSource;
use crate::engine::SchedulerError;
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::projection::{AnnotatedEvent, EventKind};
use crate::scheduler::{BookingRequest, Scheduler};
use crate::sql::{self, Command};

pub struct MeetslotHandler {
    scheduler: Arc<Scheduler>,
    query_parser: Arc<MeetslotQueryParser>,
}

impl MeetslotHandler {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        Self {
            scheduler,
            query_parser: Arc::new(MeetslotQueryParser),
        }
    }

    /// The connection's user name is the person id; the role comes from the
    /// directory, never from the client.
    async fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        let id = Ulid::from_string(&user).map_err(|_| {
            auth_err(format!("user name {user:?} is not a person id"))
        })?;
        let person = self
            .scheduler
            .directory()
            .find_person(id)
            .await
            .map_err(scheduler_err)?
            .ok_or_else(|| auth_err(format!("unknown person {id}")))?;
        Ok(Actor::from(&person))
    }

    async fn run(&self, actor: Actor, sql: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, actor: Actor, cmd: Command) -> PgWireResult<Vec<Response>> {
        let scheduler = &self.scheduler;
        let store = scheduler.store();
        match cmd {
            Command::InsertAvailability { id, start, end } => {
                let window = TimeWindow::try_new(start, end)
                    .ok_or(SchedulerError::InvalidWindow { start, end })
                    .map_err(scheduler_err)?;
                scheduler
                    .create_availability(actor, id, window)
                    .await
                    .map_err(scheduler_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertBooking {
                availability_id,
                start,
                end,
                meeting_type,
                student_id,
                note,
            } => {
                if actor.role != Role::Coach {
                    return Err(scheduler_err(SchedulerError::NotPermitted(
                        "only coaches request bookings",
                    )));
                }
                scheduler
                    .request_booking(BookingRequest {
                        availability_id,
                        start,
                        end,
                        requester_id: actor.id,
                        meeting_type,
                        student_id,
                        note,
                    })
                    .await
                    .map_err(scheduler_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertDecision { booking_id, status } => {
                scheduler
                    .set_booking_status(actor, booking_id, status)
                    .await
                    .map_err(scheduler_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectAvailabilities { owner_id } => {
                let availabilities = match (actor.role, owner_id) {
                    (Role::Student, _) => Ok(Vec::new()),
                    (_, Some(owner)) => store.list_availabilities_by_owner(owner).await,
                    (_, None) => store.list_availabilities().await,
                }
                .map_err(scheduler_err)?;
                Ok(vec![availabilities_response(&availabilities)?])
            }
            Command::SelectBookings { availability_id } => {
                let mut bookings = store
                    .list_bookings_visible_to(actor)
                    .await
                    .map_err(scheduler_err)?;
                if let Some(aid) = availability_id {
                    bookings.retain(|b| b.availability_id == aid);
                }
                Ok(vec![bookings_response(&bookings)?])
            }
            Command::SelectFreeSegments { availability_id } => {
                let segments = if actor.role == Role::Student {
                    Vec::new()
                } else {
                    scheduler
                        .free_segments_for(actor, availability_id)
                        .await
                        .map_err(scheduler_err)?
                };
                Ok(vec![free_segments_response(availability_id, &segments)?])
            }
            Command::SelectCalendar => {
                let events = scheduler.calendar(actor).await.map_err(scheduler_err)?;
                Ok(vec![calendar_response(&events)?])
            }
        }
    }
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn availabilities_schema() -> Vec<FieldInfo> {
    vec![text("id"), text("owner_id"), int8("start"), int8("end")]
}

fn bookings_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("availability_id"),
        text("requester_id"),
        text("owner_id"),
        int8("start"),
        int8("end"),
        text("status"),
        text("meeting_type"),
        text("student_id"),
        text("note"),
        int8("created_at"),
    ]
}

fn free_segments_schema() -> Vec<FieldInfo> {
    vec![text("availability_id"), int8("start"), int8("end")]
}

fn calendar_schema() -> Vec<FieldInfo> {
    vec![
        int8("start"),
        int8("end"),
        text("label"),
        text("color"),
        text("availability_id"),
        text("owner_name"),
        text("booking_id"),
        text("status"),
        text("meeting_type"),
        text("student_id"),
        text("note"),
    ]
}

/// Result columns for a statement, judged from its SQL.
fn schema_for(sql: &str) -> Vec<FieldInfo> {
    match sql::parse_sql(sql) {
        Ok(Command::SelectAvailabilities { .. }) => availabilities_schema(),
        Ok(Command::SelectBookings { .. }) => bookings_schema(),
        Ok(Command::SelectFreeSegments { .. }) => free_segments_schema(),
        Ok(Command::SelectCalendar) => calendar_schema(),
        _ => Vec::new(),
    }
}

fn availabilities_response(availabilities: &[Availability]) -> PgWireResult<Response> {
    let schema = Arc::new(availabilities_schema());
    let rows: Vec<PgWireResult<_>> = availabilities
        .iter()
        .map(|a| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&a.id.to_string())?;
            encoder.encode_field(&a.owner_id.to_string())?;
            encoder.encode_field(&a.window.start)?;
            encoder.encode_field(&a.window.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn bookings_response(bookings: &[Booking]) -> PgWireResult<Response> {
    let schema = Arc::new(bookings_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.availability_id.to_string())?;
            encoder.encode_field(&b.requester_id.to_string())?;
            encoder.encode_field(&b.owner_id.to_string())?;
            encoder.encode_field(&b.window.start)?;
            encoder.encode_field(&b.window.end)?;
            encoder.encode_field(&b.status.as_str().to_string())?;
            encoder.encode_field(&b.meeting_type.as_str().to_string())?;
            encoder.encode_field(&b.student_id.map(|s| s.to_string()))?;
            encoder.encode_field(&b.note)?;
            encoder.encode_field(&b.created_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

fn free_segments_response(availability_id: Ulid, segments: &[TimeWindow]) -> PgWireResult<Response> {
    let schema = Arc::new(free_segments_schema());
    let aid = availability_id.to_string();
    let rows: Vec<PgWireResult<_>> = segments
        .iter()
        .map(|w| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&aid)?;
            encoder.encode_field(&w.start)?;
            encoder.encode_field(&w.end)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

/// Columns of a calendar row that only some event kinds carry.
struct CalendarDetail {
    owner_name: Option<String>,
    booking_id: Option<String>,
    status: Option<String>,
    meeting_type: Option<String>,
    student_id: Option<String>,
    note: Option<String>,
}

fn calendar_detail(kind: &EventKind) -> CalendarDetail {
    let mut detail = CalendarDetail {
        owner_name: None,
        booking_id: None,
        status: None,
        meeting_type: None,
        student_id: None,
        note: None,
    };
    match kind {
        EventKind::Available { owner_name, .. } => detail.owner_name = Some(owner_name.clone()),
        EventKind::OwnBooking {
            booking_id,
            status,
            meeting_type,
            student_id,
            note,
            ..
        } => {
            detail.booking_id = Some(booking_id.to_string());
            detail.status = Some(status.as_str().to_string());
            detail.meeting_type = Some(meeting_type.as_str().to_string());
            detail.student_id = student_id.map(|s| s.to_string());
            detail.note = note.clone();
        }
        EventKind::Booked { .. } | EventKind::OtherBooking { .. } => {}
    }
    detail
}

fn calendar_response(events: &[AnnotatedEvent]) -> PgWireResult<Response> {
    let schema = Arc::new(calendar_schema());
    let rows: Vec<PgWireResult<_>> = events
        .iter()
        .map(|e| {
            let detail = calendar_detail(&e.kind);
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&e.window.start)?;
            encoder.encode_field(&e.window.end)?;
            encoder.encode_field(&e.label().to_string())?;
            encoder.encode_field(&e.color.to_string())?;
            encoder.encode_field(&e.kind.availability_id().to_string())?;
            encoder.encode_field(&detail.owner_name)?;
            encoder.encode_field(&detail.booking_id)?;
            encoder.encode_field(&detail.status)?;
            encoder.encode_field(&detail.meeting_type)?;
            encoder.encode_field(&detail.student_id)?;
            encoder.encode_field(&detail.note)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

#[async_trait]
impl SimpleQueryHandler for MeetslotHandler {
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
        let actor = self.resolve_actor(client).await?;
        self.run(actor, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MeetslotQueryParser;

#[async_trait]
impl QueryParser for MeetslotQueryParser {
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
        Ok(schema_for(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for MeetslotHandler {
    type Statement = String;
    type QueryParser = MeetslotQueryParser;

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
        let actor = self.resolve_actor(client).await?;
        let sql = substitute_params(portal);
        let mut responses = self.run(actor, &sql).await?;
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
        Ok(DescribeStatementResponse::new(
            param_types,
            schema_for(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for(
            &target.statement.statement,
        )))
    }
}

/// Byte ranges and indexes of the `$N` placeholders in `sql`. Text inside
/// single-quoted literals is skipped.
fn placeholders(sql: &str) -> Vec<(usize, usize, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => in_literal = !in_literal,
            b'$' if !in_literal => {
                let digits = bytes[i + 1..].iter().take_while(|b| b.is_ascii_digit()).count();
                if let Ok(n) = sql[i + 1..i + 1 + digits].parse::<usize>() {
                    found.push((i, i + 1 + digits, n));
                    i += digits;
                }
            }
            _ => {}
        }
        i += 1;
    }
    found
}

/// Highest `$N` placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).iter().map(|&(_, _, n)| n).max().unwrap_or(0)
}

/// Inline bound parameters (text format) in place of `$1`, `$2`, ...
/// in one pass, so placeholder-like text inside a value stays as written.
fn render_params<P: AsRef<[u8]>>(sql: &str, params: &[Option<P>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut copied = 0;
    for (start, end, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        out.push_str(&sql[copied..start]);
        match param {
            Some(bytes) => {
                out.push('\'');
                out.push_str(&String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''"));
                out.push('\'');
            }
            None => out.push_str("NULL"),
        }
        copied = end;
    }
    out.push_str(&sql[copied..]);
    out
}

fn substitute_params(portal: &Portal<String>) -> String {
    render_params(&portal.statement.statement, &portal.parameters)
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MeetslotFactory {
    handler: Arc<MeetslotHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MeetslotAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MeetslotFactory {
    pub fn new(scheduler: Arc<Scheduler>, password: String) -> Self {
        let auth_source = MeetslotAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MeetslotHandler::new(scheduler)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MeetslotFactory {
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
    factory: MeetslotFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Error mapping ────────────────────────────────────────────────

fn scheduler_err(e: SchedulerError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "P0001".into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

fn auth_err(message: String) -> PgWireError {
    metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "28000".into(),
        message,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM calendar"), 0);
        assert_eq!(count_params("INSERT INTO x VALUES ($1, $2, $3)"), 3);
        assert_eq!(count_params("VALUES ($2, $10, $1)"), 10);
        assert_eq!(count_params("costs $ money"), 0);
    }

    #[test]
    fn placeholders_inside_literals_are_ignored() {
        assert_eq!(count_params("VALUES ('$5', $1)"), 1);
        assert_eq!(count_params("VALUES ('it''s $3', $2)"), 2);
    }

    #[test]
    fn params_rendered_in_one_pass() {
        let sql = "INSERT INTO x VALUES ($1, $2, $3)";
        let params = [Some("fee is $2 per session"), Some("it's"), None];
        assert_eq!(
            render_params(sql, &params),
            "INSERT INTO x VALUES ('fee is $2 per session', 'it''s', NULL)"
        );

        let params = [Some("a"), Some("b"), Some("c"), Some("d"), Some("e"),
            Some("f"), Some("g"), Some("h"), Some("i"), Some("j")];
        assert_eq!(render_params("VALUES ($10, $1)", &params), "VALUES ('j', 'a')");
        // unbound placeholders are left for the parser to reject
        assert_eq!(render_params("VALUES ($4)", &[Some("x")]), "VALUES ($4)");
    }

    #[test]
    fn schema_follows_statement() {
        assert_eq!(schema_for("SELECT * FROM calendar").len(), 11);
        assert_eq!(schema_for("SELECT * FROM availabilities").len(), 4);
        assert_eq!(
            schema_for("SELECT * FROM free_segments WHERE availability_id = '01ARZ3NDEKTSV4RRFFQ69G5FAV'")
                .len(),
            3
        );
        assert!(schema_for("INSERT INTO booking_decisions (booking_id, status) VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 'accepted')").is_empty());
        assert!(schema_for("not sql at all").is_empty());
    }

    #[test]
    fn other_bookings_expose_no_detail() {
        let d = calendar_detail(&EventKind::OtherBooking {
            availability_id: Ulid::new(),
        });
        assert!(d.booking_id.is_none() && d.note.is_none() && d.student_id.is_none());
        assert!(d.owner_name.is_none() && d.status.is_none() && d.meeting_type.is_none());
    }
}
