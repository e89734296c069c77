//! The seam between the HTTP bridge and the SQL engine that hosts it.
//!
//! The bridge never owns the engine. It holds a [`DatabaseHandle`], which is a weak
//! reference, and checks liveness before every use so a detached or dropped engine is
//! reported instead of used.

use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use wire::{DataChunk, LogicalType, Value};

pub const DEFAULT_DATABASE_NAME: &str = "memory";
pub const DEFAULT_SCHEMA_NAME: &str = "main";

pub trait Database: Send + Sync {
    /// Opens a fresh connection. The bridge keeps named ones in its registry and uses
    /// throwaway ones for materialization and token requests.
    fn connect(&self) -> Result<Arc<dyn EngineConnection>, EngineError>;

    fn library_version(&self) -> String;

    fn platform(&self) -> String;

    fn default_database(&self) -> String {
        DEFAULT_DATABASE_NAME.to_string()
    }

    fn default_schema(&self) -> String {
        DEFAULT_SCHEMA_NAME.to_string()
    }

    /// Catalog version per attached database name.
    fn catalog_snapshot(&self) -> Result<BTreeMap<String, u64>, EngineError>;
}

/// A connection may be used by one `/run` request while another request interrupts it,
/// so every method takes `&self`.
pub trait EngineConnection: Send + Sync {
    fn extract_statements(&self, sql: &str) -> Result<Vec<Statement>, EngineError>;

    fn set_errors_as_json(&self, enabled: bool);

    /// Runs inside a single transaction on the engine side.
    fn set_search_path(&self, database: &str, schema: &str) -> Result<(), EngineError>;

    fn pending_query(&self, statement: Statement) -> Result<Box<dyn PendingQuery>, EngineError>;

    fn prepare(&self, statement: Statement) -> Result<Box<dyn PreparedStatement>, EngineError>;

    /// Asks the statement currently executing to stop at its next step. No-op when idle.
    fn interrupt(&self);

    fn create_table(&self, definition: &TableDefinition) -> Result<(), EngineError>;

    fn appender(&self, table: &QualifiedName) -> Result<Box<dyn Appender>, EngineError>;

    fn credential_token(&self) -> Result<String, EngineError>;
}

pub trait PreparedStatement {
    fn pending_query(&mut self, values: Vec<Value>) -> Result<Box<dyn PendingQuery>, EngineError>;
}

pub trait PendingQuery {
    /// Runs one bounded unit of work.
    fn execute_task(&mut self) -> PendingExecutionResult;

    fn error(&self) -> Option<String>;

    fn execute(self: Box<Self>) -> Result<Box<dyn QueryResult>, EngineError>;
}

pub trait QueryResult {
    fn names(&self) -> Vec<String>;

    fn types(&self) -> Vec<LogicalType>;

    /// `Ok(None)` once the result is exhausted.
    fn fetch(&mut self) -> Result<Option<DataChunk>, EngineError>;
}

pub trait Appender {
    fn append_chunk(&mut self, chunk: &DataChunk) -> Result<(), EngineError>;

    fn close(self: Box<Self>) -> Result<(), EngineError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingExecutionResult {
    ResultNotReady,
    Blocked,
    NoTasksAvailable,
    ResultReady,
    ExecutionFinished,
    ExecutionError,
}

impl PendingExecutionResult {
    pub fn is_result_ready(self) -> bool {
        matches!(
            self,
            PendingExecutionResult::ResultReady
                | PendingExecutionResult::ExecutionFinished
                | PendingExecutionResult::ExecutionError
        )
    }

    pub fn should_yield(self) -> bool {
        matches!(
            self,
            PendingExecutionResult::Blocked | PendingExecutionResult::NoTasksAvailable
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PendingExecutionResult::ResultNotReady => "RESULT_NOT_READY",
            PendingExecutionResult::Blocked => "BLOCKED",
            PendingExecutionResult::NoTasksAvailable => "NO_TASKS_AVAILABLE",
            PendingExecutionResult::ResultReady => "RESULT_READY",
            PendingExecutionResult::ExecutionFinished => "EXECUTION_FINISHED",
            PendingExecutionResult::ExecutionError => "EXECUTION_ERROR",
        }
    }
}

impl std::fmt::Display for PendingExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self { sql: sql.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QualifiedName {
    pub database: String,
    pub schema: String,
    pub table: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableDefinition {
    pub name: QualifiedName,
    pub columns: Vec<(String, LogicalType)>,
}

/// An engine failure. The message is shown to the user unchanged.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineError {
    pub message: String,
}

impl EngineError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for EngineError {}

/// Non-owning reference to the hosting engine.
#[derive(Clone)]
pub struct DatabaseHandle {
    inner: Weak<dyn Database>,
}

impl DatabaseHandle {
    pub fn new(database: &Arc<dyn Database>) -> Self {
        Self {
            inner: Arc::downgrade(database),
        }
    }

    pub fn lock(&self) -> Option<Arc<dyn Database>> {
        self.inner.upgrade()
    }

    pub fn same_as(&self, database: &Arc<dyn Database>) -> bool {
        Weak::ptr_eq(&self.inner, &Arc::downgrade(database))
    }
}

impl std::fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("alive", &(self.inner.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullDatabase;

    impl Database for NullDatabase {
        fn connect(&self) -> Result<Arc<dyn EngineConnection>, EngineError> {
            Err(EngineError::new("no connections"))
        }

        fn library_version(&self) -> String {
            "v0.0.0".to_string()
        }

        fn platform(&self) -> String {
            "test".to_string()
        }

        fn catalog_snapshot(&self) -> Result<BTreeMap<String, u64>, EngineError> {
            Ok(BTreeMap::new())
        }
    }

    #[test]
    fn handle_reports_dropped_database() {
        let database: Arc<dyn Database> = Arc::new(NullDatabase);
        let handle = DatabaseHandle::new(&database);
        assert!(handle.lock().is_some());
        drop(database);
        assert!(handle.lock().is_none());
    }

    #[test]
    fn handle_identity_follows_the_allocation() {
        let first: Arc<dyn Database> = Arc::new(NullDatabase);
        let second: Arc<dyn Database> = Arc::new(NullDatabase);
        let handle = DatabaseHandle::new(&first);
        assert!(handle.same_as(&first));
        assert!(handle.same_as(&first.clone()));
        assert!(!handle.same_as(&second));
    }

    #[test]
    fn ready_states_end_the_step_loop() {
        assert!(!PendingExecutionResult::ResultNotReady.is_result_ready());
        assert!(!PendingExecutionResult::Blocked.is_result_ready());
        assert!(PendingExecutionResult::ExecutionError.is_result_ready());
        assert!(PendingExecutionResult::NoTasksAvailable.should_yield());
        assert_eq!(
            PendingExecutionResult::NoTasksAvailable.to_string(),
            "NO_TASKS_AVAILABLE"
        );
    }
}
