mod config;
mod connections;
mod engine;
mod events;
mod executor;
mod logging;
mod proxy;
mod runtime;
mod server;
mod tokenizer;
mod watcher;

pub use config::{
    DEFAULT_LOCAL_PORT, DEFAULT_POLLING_INTERVAL_MS, DEFAULT_REMOTE_URL, HttpClientParams,
    SettingsError, UiSettings, certificate_verification_disabled, parse_flag,
    validate_remote_url,
};
pub use connections::{ConnectionRegistry, DEFAULT_CONNECTION_NAME, EngineBinding};
pub use engine::{
    Appender, DEFAULT_DATABASE_NAME, DEFAULT_SCHEMA_NAME, Database, DatabaseHandle,
    EngineConnection, EngineError, PendingExecutionResult, PendingQuery, PreparedStatement,
    QualifiedName, QueryResult, Statement, TableDefinition,
};
pub use events::{CATALOG_CHANGE_EVENT, Event, EventDispatcher, Subscriber};
pub use executor::{
    ExecutionError, INVALIDATED_MESSAGE, NO_STATEMENTS_MESSAGE, RunRequest, drive_to_ready,
    execute_run, interrupt_connection,
};
pub use logging::init as init_logging;
pub use proxy::{CONFIG_PATH, build_client, user_agent};
pub use runtime::{SharedState, build_app};
pub use server::{ServerError, UiServer};
pub use tokenizer::{SqlToken, tokenize, tokenize_bytes, tokenize_result};
pub use watcher::{Watcher, changed_databases};

/// Version of this UI bridge, embedded at build time.
pub fn ui_version() -> &'static str {
    option_env!("UI_BRIDGE_BUILD_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"))
}
