use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use tracing::debug;

use crate::{
    engine::{Database, DatabaseHandle, EngineConnection, EngineError},
    logging::category_query,
};

pub const DEFAULT_CONNECTION_NAME: &str = "default";

/// Named connections shared by every request against one engine instance.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<String, Arc<dyn EngineConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, name: &str) -> Option<Arc<dyn EngineConnection>> {
        let guard = self.connections.lock().expect("connection registry lock poisoned");
        guard.get(normalize_name(name)).cloned()
    }

    pub fn find_or_create(
        &self,
        database: &dyn Database,
        name: &str,
    ) -> Result<Arc<dyn EngineConnection>, EngineError> {
        let name = normalize_name(name);
        let mut guard = self.connections.lock().expect("connection registry lock poisoned");
        if let Some(connection) = guard.get(name) {
            return Ok(connection.clone());
        }

        let connection = database.connect()?;
        guard.insert(name.to_string(), connection.clone());
        debug!("{} opened connection name={name}", category_query());
        Ok(connection)
    }

    pub fn len(&self) -> usize {
        self.connections
            .lock()
            .expect("connection registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize_name(name: &str) -> &str {
    if name.is_empty() {
        DEFAULT_CONNECTION_NAME
    } else {
        name
    }
}

/// Everything request handlers resolve against the engine the server is currently bound
/// to. Rebinding swaps the whole binding so connections never outlive their engine.
#[derive(Clone)]
pub struct EngineBinding {
    pub database: DatabaseHandle,
    pub connections: Arc<ConnectionRegistry>,
    pub engine_version: String,
    pub platform: String,
}

impl EngineBinding {
    pub fn new(database: &Arc<dyn Database>) -> Self {
        Self {
            database: DatabaseHandle::new(database),
            connections: Arc::new(ConnectionRegistry::new()),
            engine_version: database.library_version(),
            platform: database.platform(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::engine::{
        Appender, PendingQuery, PreparedStatement, QualifiedName, Statement, TableDefinition,
    };

    struct IdleConnection;

    impl EngineConnection for IdleConnection {
        fn extract_statements(&self, _sql: &str) -> Result<Vec<Statement>, EngineError> {
            Ok(Vec::new())
        }

        fn set_errors_as_json(&self, _enabled: bool) {}

        fn set_search_path(&self, _database: &str, _schema: &str) -> Result<(), EngineError> {
            Ok(())
        }

        fn pending_query(&self, _statement: Statement) -> Result<Box<dyn PendingQuery>, EngineError> {
            Err(EngineError::new("idle"))
        }

        fn prepare(&self, _statement: Statement) -> Result<Box<dyn PreparedStatement>, EngineError> {
            Err(EngineError::new("idle"))
        }

        fn interrupt(&self) {}

        fn create_table(&self, _definition: &TableDefinition) -> Result<(), EngineError> {
            Ok(())
        }

        fn appender(&self, _table: &QualifiedName) -> Result<Box<dyn Appender>, EngineError> {
            Err(EngineError::new("idle"))
        }

        fn credential_token(&self) -> Result<String, EngineError> {
            Ok(String::new())
        }
    }

    #[derive(Default)]
    struct CountingDatabase {
        connects: AtomicUsize,
    }

    impl Database for CountingDatabase {
        fn connect(&self) -> Result<Arc<dyn EngineConnection>, EngineError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(IdleConnection))
        }

        fn library_version(&self) -> String {
            "v1.2.3".to_string()
        }

        fn platform(&self) -> String {
            "linux_amd64".to_string()
        }

        fn catalog_snapshot(&self) -> Result<BTreeMap<String, u64>, EngineError> {
            Ok(BTreeMap::new())
        }
    }

    #[test]
    fn same_name_reuses_the_connection() {
        let database = CountingDatabase::default();
        let registry = ConnectionRegistry::new();
        let first = registry
            .find_or_create(&database, "tab-1")
            .expect("connection should open");
        let second = registry
            .find_or_create(&database, "tab-1")
            .expect("connection should be reused");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(database.connects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_name_maps_to_default() {
        let database = CountingDatabase::default();
        let registry = ConnectionRegistry::new();
        registry
            .find_or_create(&database, "")
            .expect("connection should open");
        assert!(registry.find(DEFAULT_CONNECTION_NAME).is_some());
        assert!(registry.find("").is_some());
        assert!(registry.find("other").is_none());
        assert_eq!(registry.len(), 1);
    }
}
