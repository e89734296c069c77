//! The `/ddb/run` pipeline: statement batching, parameter binding, the cooperative step
//! loop and chunk routing between the response and an optional result table.

use std::{sync::Arc, time::Duration};

use axum::http::HeaderMap;
use tracing::{debug, info};
use wire::{
    Base64HeaderError, ColumnNamesAndTypes, DataChunk, HEADER_CONNECTION_NAME,
    HEADER_DATABASE_NAME, HEADER_ERRORS_AS_JSON, HEADER_PARAMETER_COUNT,
    HEADER_REQUEST_DESCRIPTION, HEADER_RESULT_CHUNK_LIMIT, HEADER_RESULT_DATABASE_NAME,
    HEADER_RESULT_SCHEMA_NAME, HEADER_RESULT_TABLE_CHUNK_LIMIT, HEADER_RESULT_TABLE_NAME,
    HEADER_SCHEMA_NAME, SuccessResult, Value, WireError, decode_base64_header,
    parameter_value_header,
};

use crate::{
    connections::EngineBinding,
    engine::{
        Appender, Database, EngineConnection, EngineError, PendingExecutionResult, PendingQuery,
        QualifiedName, QueryResult, TableDefinition,
    },
    logging::category_query,
};

pub const INVALIDATED_MESSAGE: &str = "Database was invalidated, UI needs to be restarted";
pub const NO_STATEMENTS_MESSAGE: &str = "No statements";

const STEP_YIELD: Duration = Duration::from_millis(1);

/// Everything `/ddb/run` reads from one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunRequest {
    pub description: String,
    pub connection_name: String,
    pub database_name: String,
    pub schema_name: String,
    /// Bound positionally, always as strings.
    pub parameters: Vec<String>,
    pub result_chunk_limit: usize,
    pub result_database_name: String,
    pub result_schema_name: String,
    pub result_table_name: String,
    pub result_table_chunk_limit: usize,
    pub errors_as_json: Option<bool>,
    pub sql: String,
}

impl RunRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            description: String::new(),
            connection_name: String::new(),
            database_name: String::new(),
            schema_name: String::new(),
            parameters: Vec::new(),
            result_chunk_limit: usize::MAX,
            result_database_name: String::new(),
            result_schema_name: String::new(),
            result_table_name: String::new(),
            result_table_chunk_limit: 0,
            errors_as_json: None,
            sql: sql.into(),
        }
    }

    pub fn from_headers(headers: &HeaderMap, sql: String) -> Result<Self, ExecutionError> {
        let mut request = Self::new(sql);
        request.description = plain_header(headers, HEADER_REQUEST_DESCRIPTION);
        request.connection_name = plain_header(headers, HEADER_CONNECTION_NAME);
        request.database_name = base64_header(headers, HEADER_DATABASE_NAME)?;
        request.schema_name = base64_header(headers, HEADER_SCHEMA_NAME)?;

        let parameter_count = plain_header(headers, HEADER_PARAMETER_COUNT);
        if !parameter_count.is_empty() {
            let count = parse_limit(HEADER_PARAMETER_COUNT, &parameter_count)?;
            // every announced value must be present, which also bounds the loop
            for index in 0..count {
                let name = parameter_value_header(index);
                let Some(raw) = header_str(headers, &name) else {
                    return Err(ExecutionError::Header {
                        name,
                        reason: format!("missing, {count} parameter(s) announced"),
                    });
                };
                let value = decode_base64_header(Some(raw)).map_err(|err| {
                    ExecutionError::Header {
                        name: name.clone(),
                        reason: err.to_string(),
                    }
                })?;
                request.parameters.push(value);
            }
        }

        let chunk_limit = plain_header(headers, HEADER_RESULT_CHUNK_LIMIT);
        if !chunk_limit.is_empty() {
            request.result_chunk_limit = parse_limit(HEADER_RESULT_CHUNK_LIMIT, &chunk_limit)?;
        }

        request.result_database_name = base64_header(headers, HEADER_RESULT_DATABASE_NAME)?;
        request.result_schema_name = base64_header(headers, HEADER_RESULT_SCHEMA_NAME)?;
        request.result_table_name = base64_header(headers, HEADER_RESULT_TABLE_NAME)?;

        // the table limit is only meaningful, and only read, when a table is named
        if !request.result_table_name.is_empty() {
            request.result_table_chunk_limit = usize::MAX;
            let table_limit = plain_header(headers, HEADER_RESULT_TABLE_CHUNK_LIMIT);
            if !table_limit.is_empty() {
                request.result_table_chunk_limit =
                    parse_limit(HEADER_RESULT_TABLE_CHUNK_LIMIT, &table_limit)?;
            }
        }

        let errors_as_json = plain_header(headers, HEADER_ERRORS_AS_JSON);
        if !errors_as_json.is_empty() {
            request.errors_as_json = Some(errors_as_json == "true");
        }

        Ok(request)
    }
}

#[derive(Debug)]
pub enum ExecutionError {
    Invalidated,
    NoStatements,
    Engine(EngineError),
    Unexpected(PendingExecutionResult),
    Header { name: String, reason: String },
    Wire(WireError),
    TaskJoin(tokio::task::JoinError),
}

impl std::fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionError::Invalidated => f.write_str(INVALIDATED_MESSAGE),
            ExecutionError::NoStatements => f.write_str(NO_STATEMENTS_MESSAGE),
            ExecutionError::Engine(err) => write!(f, "{err}"),
            ExecutionError::Unexpected(outcome) => {
                write!(f, "Unexpected PendingExecutionResult: {outcome}")
            }
            ExecutionError::Header { name, reason } => {
                write!(f, "invalid {name} header: {reason}")
            }
            ExecutionError::Wire(err) => write!(f, "failed to serialize result: {err}"),
            ExecutionError::TaskJoin(err) => write!(f, "query execution task failed: {err}"),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<EngineError> for ExecutionError {
    fn from(err: EngineError) -> Self {
        ExecutionError::Engine(err)
    }
}

impl From<WireError> for ExecutionError {
    fn from(err: WireError) -> Self {
        ExecutionError::Wire(err)
    }
}

/// Runs a `/ddb/run` request to completion on the calling thread.
pub fn execute_run(
    binding: &EngineBinding,
    request: &RunRequest,
) -> Result<SuccessResult, ExecutionError> {
    let database = binding.database.lock().ok_or(ExecutionError::Invalidated)?;
    let connection = binding
        .connections
        .find_or_create(database.as_ref(), &request.connection_name)?;

    if let Some(enabled) = request.errors_as_json {
        connection.set_errors_as_json(enabled);
    }

    if !request.database_name.is_empty() || !request.schema_name.is_empty() {
        let schema = if request.schema_name.is_empty() {
            database.default_schema()
        } else {
            request.schema_name.clone()
        };
        connection.set_search_path(&request.database_name, &schema)?;
    }

    let mut statements = connection.extract_statements(&request.sql)?;
    let Some(last) = statements.pop() else {
        return Err(ExecutionError::NoStatements);
    };

    let leading = statements.len();
    for statement in statements {
        let pending = connection.pending_query(statement)?;
        drop(drive_to_ready(pending)?);
    }

    let pending = if request.parameters.is_empty() {
        connection.pending_query(last)?
    } else {
        let mut prepared = connection.prepare(last)?;
        let values = request
            .parameters
            .iter()
            .map(|value| Value::Text(value.clone()))
            .collect();
        prepared.pending_query(values)?
    };
    let mut result = drive_to_ready(pending)?;

    let names = result.names();
    let types = result.types();
    let mut materialization = if request.result_table_name.is_empty() {
        None
    } else {
        Some(Materialization::open(database.as_ref(), request, &names, &types)?)
    };

    let chunks = fetch_chunks(
        result.as_mut(),
        request.result_chunk_limit,
        request.result_table_chunk_limit,
        materialization.as_mut(),
    )?;

    if let Some(materialization) = materialization {
        materialization.close()?;
    }

    info!(
        "{} connection={} statements={} chunks={} description={}",
        category_query(),
        display_connection(&request.connection_name),
        leading + 1,
        chunks.len(),
        request.description
    );

    Ok(SuccessResult {
        column_names_and_types: ColumnNamesAndTypes { names, types },
        chunks,
    })
}

/// Interrupts whatever runs on the named connection. `false` when the engine is gone or
/// the connection was never opened.
pub fn interrupt_connection(binding: &EngineBinding, connection_name: &str) -> bool {
    if binding.database.lock().is_none() {
        return false;
    }
    let Some(connection) = binding.connections.find(connection_name) else {
        return false;
    };
    connection.interrupt();
    true
}

/// Steps a pending query until it is ready, yielding briefly whenever the engine is
/// blocked. Interrupts surface here as an execution error.
pub fn drive_to_ready(
    mut pending: Box<dyn PendingQuery>,
) -> Result<Box<dyn QueryResult>, ExecutionError> {
    let mut outcome = PendingExecutionResult::ResultNotReady;
    while !outcome.is_result_ready() {
        outcome = pending.execute_task();
        if outcome.should_yield() {
            std::thread::sleep(STEP_YIELD);
        }
    }

    match outcome {
        PendingExecutionResult::ExecutionError => {
            let message = pending
                .error()
                .unwrap_or_else(|| "Unknown execution error".to_string());
            Err(ExecutionError::Engine(EngineError::new(message)))
        }
        PendingExecutionResult::ResultReady | PendingExecutionResult::ExecutionFinished => {
            Ok(pending.execute()?)
        }
        other => Err(ExecutionError::Unexpected(other)),
    }
}

/// Fetches at most `max(response_limit, table_limit)` chunks. Every fetched chunk counts
/// once against that bound whichever destinations it lands in.
fn fetch_chunks(
    result: &mut dyn QueryResult,
    response_limit: usize,
    table_limit: usize,
    mut materialization: Option<&mut Materialization>,
) -> Result<Vec<DataChunk>, ExecutionError> {
    let fetch_limit = response_limit.max(table_limit);
    let mut fetched = 0usize;
    let mut chunks = Vec::new();
    while fetched < fetch_limit {
        let Some(chunk) = result.fetch()? else {
            break;
        };
        fetched += 1;
        if let Some(materialization) = materialization.as_deref_mut()
            && fetched <= table_limit
        {
            materialization.appender.append_chunk(&chunk)?;
        }
        if fetched <= response_limit {
            chunks.push(chunk);
        }
    }
    Ok(chunks)
}

/// Destination table plus the dedicated connection appending to it, so appends never
/// contend with the primary connection's fetch cursor.
struct Materialization {
    _connection: Arc<dyn EngineConnection>,
    appender: Box<dyn Appender>,
}

impl Materialization {
    fn open(
        database: &dyn Database,
        request: &RunRequest,
        names: &[String],
        types: &[wire::LogicalType],
    ) -> Result<Self, ExecutionError> {
        let table = QualifiedName {
            database: non_empty_or(&request.result_database_name, database.default_database()),
            schema: non_empty_or(&request.result_schema_name, database.default_schema()),
            table: request.result_table_name.clone(),
        };
        let definition = TableDefinition {
            name: table.clone(),
            columns: names.iter().cloned().zip(types.iter().cloned()).collect(),
        };

        let connection = database.connect()?;
        connection.create_table(&definition)?;
        let appender = connection.appender(&table)?;
        debug!(
            "{} materializing into {}.{}.{}",
            category_query(),
            table.database,
            table.schema,
            table.table
        );
        Ok(Self {
            _connection: connection,
            appender,
        })
    }

    fn close(self) -> Result<(), ExecutionError> {
        self.appender.close()?;
        Ok(())
    }
}

fn non_empty_or(value: &str, fallback: String) -> String {
    if value.is_empty() {
        fallback
    } else {
        value.to_string()
    }
}

fn display_connection(name: &str) -> &str {
    if name.is_empty() { "<default>" } else { name }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn plain_header(headers: &HeaderMap, name: &str) -> String {
    header_str(headers, name).unwrap_or("").trim().to_string()
}

fn base64_header(headers: &HeaderMap, name: &'static str) -> Result<String, ExecutionError> {
    decode_base64_header(header_str(headers, name)).map_err(|err: Base64HeaderError| {
        ExecutionError::Header {
            name: name.to_string(),
            reason: err.to_string(),
        }
    })
}

/// Negative limits select nothing.
fn parse_limit(name: &'static str, value: &str) -> Result<usize, ExecutionError> {
    let parsed: i64 = value.parse().map_err(|_| ExecutionError::Header {
        name: name.to_string(),
        reason: format!("'{value}' is not an integer"),
    })?;
    Ok(usize::try_from(parsed.max(0)).unwrap_or(usize::MAX))
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use wire::encode_base64_header;

    use super::*;

    fn headers(entries: &[(&'static str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                *name,
                HeaderValue::from_str(value).expect("header value should be valid"),
            );
        }
        map
    }

    #[test]
    fn defaults_leave_response_unlimited_and_table_off() {
        let request =
            RunRequest::from_headers(&HeaderMap::new(), "select 1".to_string()).expect("parse");
        assert_eq!(request.result_chunk_limit, usize::MAX);
        assert_eq!(request.result_table_chunk_limit, 0);
        assert_eq!(request.errors_as_json, None);
        assert!(request.parameters.is_empty());
    }

    #[test]
    fn table_limit_header_is_ignored_without_table_name() {
        let request = RunRequest::from_headers(
            &headers(&[(HEADER_RESULT_TABLE_CHUNK_LIMIT, "5".to_string())]),
            String::new(),
        )
        .expect("parse");
        assert_eq!(request.result_table_chunk_limit, 0);

        let request = RunRequest::from_headers(
            &headers(&[(HEADER_RESULT_TABLE_NAME, encode_base64_header("saved"))]),
            String::new(),
        )
        .expect("parse");
        assert_eq!(request.result_table_name, "saved");
        assert_eq!(request.result_table_chunk_limit, usize::MAX);

        let request = RunRequest::from_headers(
            &headers(&[
                (HEADER_RESULT_TABLE_NAME, encode_base64_header("saved")),
                (HEADER_RESULT_TABLE_CHUNK_LIMIT, "5".to_string()),
            ]),
            String::new(),
        )
        .expect("parse");
        assert_eq!(request.result_table_chunk_limit, 5);
    }

    #[test]
    fn parameters_and_names_are_base64_decoded() {
        let request = RunRequest::from_headers(
            &headers(&[
                (HEADER_CONNECTION_NAME, "tab-7".to_string()),
                (HEADER_DATABASE_NAME, encode_base64_header("analytics")),
                (HEADER_PARAMETER_COUNT, "2".to_string()),
                ("x-duckdb-ui-parameter-value-0", encode_base64_header("a b")),
                ("x-duckdb-ui-parameter-value-1", encode_base64_header("ü")),
                (HEADER_ERRORS_AS_JSON, "false".to_string()),
            ]),
            "select ?, ?".to_string(),
        )
        .expect("parse");
        assert_eq!(request.connection_name, "tab-7");
        assert_eq!(request.database_name, "analytics");
        assert_eq!(request.schema_name, "");
        assert_eq!(request.parameters, vec!["a b".to_string(), "ü".to_string()]);
        assert_eq!(request.errors_as_json, Some(false));
    }

    #[test]
    fn malformed_limits_and_base64_are_reported() {
        let err = RunRequest::from_headers(
            &headers(&[(HEADER_RESULT_CHUNK_LIMIT, "lots".to_string())]),
            String::new(),
        )
        .expect_err("limit should be rejected");
        assert!(matches!(err, ExecutionError::Header { .. }));

        let err = RunRequest::from_headers(
            &headers(&[(HEADER_SCHEMA_NAME, "%%%".to_string())]),
            String::new(),
        )
        .expect_err("schema should be rejected");
        assert!(err.to_string().starts_with("invalid x-duckdb-ui-schema-name header"));
    }

    #[test]
    fn announced_parameters_must_all_be_present() {
        let err = RunRequest::from_headers(
            &headers(&[
                (HEADER_PARAMETER_COUNT, "3".to_string()),
                ("x-duckdb-ui-parameter-value-0", encode_base64_header("only")),
            ]),
            "select ?, ?, ?".to_string(),
        )
        .expect_err("missing parameter should be rejected");
        assert!(
            err.to_string()
                .starts_with("invalid x-duckdb-ui-parameter-value-1 header: missing"),
            "{err}"
        );

        let err = RunRequest::from_headers(
            &headers(&[(HEADER_PARAMETER_COUNT, "2000000000".to_string())]),
            "select ?".to_string(),
        )
        .expect_err("huge count without values should be rejected");
        assert!(matches!(err, ExecutionError::Header { .. }));
    }

    #[test]
    fn empty_parameter_header_binds_empty_string() {
        let request = RunRequest::from_headers(
            &headers(&[
                (HEADER_PARAMETER_COUNT, "1".to_string()),
                ("x-duckdb-ui-parameter-value-0", String::new()),
            ]),
            "select ?".to_string(),
        )
        .expect("parse");
        assert_eq!(request.parameters, vec![String::new()]);
    }

    #[test]
    fn negative_limits_clamp_to_zero() {
        let request = RunRequest::from_headers(
            &headers(&[(HEADER_RESULT_CHUNK_LIMIT, "-3".to_string())]),
            String::new(),
        )
        .expect("parse");
        assert_eq!(request.result_chunk_limit, 0);
    }

    #[test]
    fn fixed_messages_match_the_protocol() {
        assert_eq!(
            ExecutionError::Invalidated.to_string(),
            "Database was invalidated, UI needs to be restarted"
        );
        assert_eq!(ExecutionError::NoStatements.to_string(), "No statements");
        assert_eq!(
            ExecutionError::Unexpected(PendingExecutionResult::Blocked).to_string(),
            "Unexpected PendingExecutionResult: BLOCKED"
        );
    }
}
