#![allow(dead_code)]

//! A scripted in-memory engine.
//!
//! Each statement is a small command:
//! - `chunks N` yields N one-row chunks holding 0..N
//! - `echo` yields one row with every bound parameter as a column
//! - `fail MSG` fails while creating the pending query
//! - `fail_exec MSG` fails during execution
//! - `sleep` stays blocked until the connection is interrupted
//! - `ddl [DB]` bumps the catalog version of DB (default `memory`)
//! - anything else yields a single `1`
//!
//! Statements are split on `;`. Input containing `syntax error` fails to parse.

use std::{
    collections::{BTreeMap, VecDeque},
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use axum::Router;
use bridge::{
    Appender, Database, EngineConnection, EngineError, PendingExecutionResult, PendingQuery,
    PreparedStatement, QualifiedName, QueryResult, Statement, TableDefinition, UiServer,
    UiSettings,
};
use tokio::task::JoinHandle;
use wire::{DataChunk, LogicalType, Value, Vector};

pub const INTERRUPTED_MESSAGE: &str = "INTERRUPT Error: Interrupted!";
const SLEEP_CAP: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MockTable {
    pub columns: Vec<(String, LogicalType)>,
    pub rows: usize,
    pub closed: bool,
}

#[derive(Default)]
pub struct MockState {
    pub executed: Mutex<Vec<String>>,
    pub tables: Mutex<BTreeMap<String, MockTable>>,
    pub catalog: Mutex<BTreeMap<String, u64>>,
    pub search_paths: Mutex<Vec<(String, String)>>,
    pub errors_as_json: Mutex<Vec<bool>>,
    pub connects: AtomicUsize,
    pub fetched_chunks: AtomicUsize,
    pub sleeping: AtomicBool,
}

pub struct MockDatabase {
    pub version: String,
    pub token: String,
    pub state: Arc<MockState>,
}

impl MockDatabase {
    pub fn new(version: &str) -> Arc<Self> {
        let state = MockState::default();
        state
            .catalog
            .lock()
            .expect("catalog lock poisoned")
            .insert("memory".to_string(), 1);
        Arc::new(Self {
            version: version.to_string(),
            token: "local-token-123".to_string(),
            state: Arc::new(state),
        })
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().expect("log lock poisoned").clone()
    }

    pub fn table(&self, key: &str) -> Option<MockTable> {
        self.state
            .tables
            .lock()
            .expect("tables lock poisoned")
            .get(key)
            .cloned()
    }
}

impl Database for MockDatabase {
    fn connect(&self) -> Result<Arc<dyn EngineConnection>, EngineError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MockConnection {
            state: self.state.clone(),
            token: self.token.clone(),
            running: Arc::new(AtomicBool::new(false)),
            interrupted: Arc::new(AtomicBool::new(false)),
        }))
    }

    fn library_version(&self) -> String {
        self.version.clone()
    }

    fn platform(&self) -> String {
        "linux_amd64".to_string()
    }

    fn catalog_snapshot(&self) -> Result<BTreeMap<String, u64>, EngineError> {
        Ok(self.state.catalog.lock().expect("catalog lock poisoned").clone())
    }
}

pub struct MockConnection {
    state: Arc<MockState>,
    token: String,
    running: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
}

impl MockConnection {
    fn pending(&self, sql: &str, params: Vec<Value>) -> Result<Box<dyn PendingQuery>, EngineError> {
        let plan = Plan::parse(sql, params)?;
        self.interrupted.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(Box::new(MockPending {
            sql: sql.to_string(),
            plan,
            steps: 0,
            started: Instant::now(),
            error: None,
            state: self.state.clone(),
            running: self.running.clone(),
            interrupted: self.interrupted.clone(),
        }))
    }
}

impl EngineConnection for MockConnection {
    fn extract_statements(&self, sql: &str) -> Result<Vec<Statement>, EngineError> {
        if sql.contains("syntax error") {
            return Err(EngineError::new("Parser Error: syntax error at end of input"));
        }
        Ok(sql
            .split(';')
            .map(str::trim)
            .filter(|statement| !statement.is_empty())
            .map(Statement::new)
            .collect())
    }

    fn set_errors_as_json(&self, enabled: bool) {
        self.state
            .errors_as_json
            .lock()
            .expect("flag lock poisoned")
            .push(enabled);
    }

    fn set_search_path(&self, database: &str, schema: &str) -> Result<(), EngineError> {
        self.state
            .search_paths
            .lock()
            .expect("search path lock poisoned")
            .push((database.to_string(), schema.to_string()));
        Ok(())
    }

    fn pending_query(&self, statement: Statement) -> Result<Box<dyn PendingQuery>, EngineError> {
        self.pending(&statement.sql, Vec::new())
    }

    fn prepare(&self, statement: Statement) -> Result<Box<dyn PreparedStatement>, EngineError> {
        Ok(Box::new(MockPrepared {
            sql: statement.sql,
            connection: MockConnection {
                state: self.state.clone(),
                token: self.token.clone(),
                running: self.running.clone(),
                interrupted: self.interrupted.clone(),
            },
        }))
    }

    fn interrupt(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.interrupted.store(true, Ordering::SeqCst);
        }
    }

    fn create_table(&self, definition: &TableDefinition) -> Result<(), EngineError> {
        let key = table_key(&definition.name);
        let mut tables = self.state.tables.lock().expect("tables lock poisoned");
        if tables.contains_key(&key) {
            return Err(EngineError::new(format!(
                "Catalog Error: Table with name {} already exists!",
                definition.name.table
            )));
        }
        tables.insert(
            key,
            MockTable {
                columns: definition.columns.clone(),
                ..MockTable::default()
            },
        );
        Ok(())
    }

    fn appender(&self, table: &QualifiedName) -> Result<Box<dyn Appender>, EngineError> {
        Ok(Box::new(MockAppender {
            key: table_key(table),
            state: self.state.clone(),
        }))
    }

    fn credential_token(&self) -> Result<String, EngineError> {
        if self.token.is_empty() {
            return Err(EngineError::new("not signed in"));
        }
        Ok(self.token.clone())
    }
}

pub fn table_key(name: &QualifiedName) -> String {
    format!("{}.{}.{}", name.database, name.schema, name.table)
}

struct MockPrepared {
    sql: String,
    connection: MockConnection,
}

impl PreparedStatement for MockPrepared {
    fn pending_query(&mut self, values: Vec<Value>) -> Result<Box<dyn PendingQuery>, EngineError> {
        self.connection.pending(&self.sql, values)
    }
}

enum Plan {
    Chunks(usize),
    Echo(Vec<Value>),
    FailExec(String),
    Sleep,
    Ddl(String),
    One,
}

impl Plan {
    fn parse(sql: &str, params: Vec<Value>) -> Result<Self, EngineError> {
        let (command, argument) = sql
            .split_once(' ')
            .map(|(command, argument)| (command, argument.trim()))
            .unwrap_or((sql, ""));
        match command {
            "chunks" => argument
                .parse()
                .map(Plan::Chunks)
                .map_err(|_| EngineError::new("Binder Error: bad chunk count")),
            "echo" => Ok(Plan::Echo(params)),
            "fail" => Err(EngineError::new(argument)),
            "fail_exec" => Ok(Plan::FailExec(argument.to_string())),
            "sleep" => Ok(Plan::Sleep),
            "ddl" if argument.is_empty() => Ok(Plan::Ddl("memory".to_string())),
            "ddl" => Ok(Plan::Ddl(argument.to_string())),
            _ => Ok(Plan::One),
        }
    }
}

struct MockPending {
    sql: String,
    plan: Plan,
    steps: usize,
    started: Instant,
    error: Option<String>,
    state: Arc<MockState>,
    running: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
}

impl MockPending {
    fn fail(&mut self, message: String) -> PendingExecutionResult {
        self.running.store(false, Ordering::SeqCst);
        self.state.sleeping.store(false, Ordering::SeqCst);
        self.error = Some(message);
        PendingExecutionResult::ExecutionError
    }
}

impl PendingQuery for MockPending {
    fn execute_task(&mut self) -> PendingExecutionResult {
        self.steps += 1;
        if self.interrupted.load(Ordering::SeqCst) {
            return self.fail(INTERRUPTED_MESSAGE.to_string());
        }
        match &self.plan {
            Plan::FailExec(message) => {
                let message = message.clone();
                self.fail(message)
            }
            Plan::Sleep => {
                self.state.sleeping.store(true, Ordering::SeqCst);
                if self.started.elapsed() < SLEEP_CAP {
                    PendingExecutionResult::Blocked
                } else {
                    PendingExecutionResult::ResultReady
                }
            }
            Plan::Ddl(_) if self.steps > 1 => PendingExecutionResult::ExecutionFinished,
            _ => match self.steps {
                1 => PendingExecutionResult::ResultNotReady,
                2 => PendingExecutionResult::NoTasksAvailable,
                _ => PendingExecutionResult::ResultReady,
            },
        }
    }

    fn error(&self) -> Option<String> {
        self.error.clone()
    }

    fn execute(self: Box<Self>) -> Result<Box<dyn QueryResult>, EngineError> {
        let MockPending {
            sql,
            plan,
            state,
            running,
            ..
        } = *self;
        running.store(false, Ordering::SeqCst);
        state.sleeping.store(false, Ordering::SeqCst);
        state.executed.lock().expect("log lock poisoned").push(sql);

        let result = match plan {
            Plan::Chunks(count) => MockResult {
                names: vec!["n".to_string()],
                types: vec![LogicalType::Integer],
                chunks: (0..count)
                    .map(|index| {
                        DataChunk::new(vec![Vector::new(
                            LogicalType::Integer,
                            vec![Value::Int(index as i64)],
                        )])
                    })
                    .collect(),
                state: state.clone(),
            },
            Plan::Echo(params) => MockResult {
                names: (0..params.len()).map(|index| format!("p{index}")).collect(),
                types: vec![LogicalType::Varchar; params.len()],
                chunks: VecDeque::from([DataChunk::new(
                    params
                        .into_iter()
                        .map(|value| Vector::new(LogicalType::Varchar, vec![value]))
                        .collect(),
                )]),
                state: state.clone(),
            },
            Plan::Ddl(database) => {
                *state
                    .catalog
                    .lock()
                    .expect("catalog lock poisoned")
                    .entry(database)
                    .or_insert(0) += 1;
                MockResult {
                    names: vec!["Count".to_string()],
                    types: vec![LogicalType::BigInt],
                    chunks: VecDeque::new(),
                    state: state.clone(),
                }
            }
            Plan::One | Plan::Sleep | Plan::FailExec(_) => MockResult {
                names: vec!["1".to_string()],
                types: vec![LogicalType::Integer],
                chunks: VecDeque::from([DataChunk::new(vec![Vector::new(
                    LogicalType::Integer,
                    vec![Value::Int(1)],
                )])]),
                state: state.clone(),
            },
        };
        Ok(Box::new(result))
    }
}

struct MockResult {
    names: Vec<String>,
    types: Vec<LogicalType>,
    chunks: VecDeque<DataChunk>,
    state: Arc<MockState>,
}

impl QueryResult for MockResult {
    fn names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn types(&self) -> Vec<LogicalType> {
        self.types.clone()
    }

    fn fetch(&mut self) -> Result<Option<DataChunk>, EngineError> {
        let chunk = self.chunks.pop_front();
        if chunk.is_some() {
            self.state.fetched_chunks.fetch_add(1, Ordering::SeqCst);
        }
        Ok(chunk)
    }
}

struct MockAppender {
    key: String,
    state: Arc<MockState>,
}

impl Appender for MockAppender {
    fn append_chunk(&mut self, chunk: &DataChunk) -> Result<(), EngineError> {
        let mut tables = self.state.tables.lock().expect("tables lock poisoned");
        let table = tables
            .get_mut(&self.key)
            .ok_or_else(|| EngineError::new("Catalog Error: table vanished"))?;
        table.rows += chunk.row_count;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), EngineError> {
        if let Some(table) = self
            .state
            .tables
            .lock()
            .expect("tables lock poisoned")
            .get_mut(&self.key)
        {
            table.closed = true;
        }
        Ok(())
    }
}

pub fn test_settings(remote_url: &str) -> UiSettings {
    UiSettings {
        local_port: 0,
        remote_url: remote_url.to_string(),
        polling_interval: Duration::from_millis(20),
        allow_unsigned_extensions: true,
        ..UiSettings::default()
    }
}

/// Starts a server on an ephemeral port and returns it with its origin string.
pub fn start_server(database: &Arc<MockDatabase>, remote_url: &str) -> (UiServer, String) {
    let server = UiServer::new();
    let database: Arc<dyn Database> = database.clone();
    let started = server
        .start(&test_settings(remote_url), &database)
        .expect("server should start");
    assert!(started);
    let port = server.local_port().expect("server should have a port");
    (server, format!("http://localhost:{port}"))
}

pub async fn spawn_upstream(app: Router) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("listener should have addr");
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("upstream should run");
    });
    (addr, handle)
}

pub fn reserve_closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind should succeed");
    let port = listener.local_addr().expect("local addr should exist").port();
    drop(listener);
    port
}
