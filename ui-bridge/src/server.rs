use std::{
    io,
    net::TcpListener,
    sync::{Arc, Mutex, RwLock},
    thread::JoinHandle,
    time::Duration,
};

use tokio::sync::watch;
use tracing::{info, warn};

use crate::{
    config::UiSettings,
    connections::EngineBinding,
    engine::{Database, DatabaseHandle},
    events::EventDispatcher,
    logging::category_server,
    proxy::build_client,
    runtime::{SharedState, build_app},
    ui_version,
    watcher::Watcher,
};

const FORCED_SHUTDOWN_AFTER: Duration = Duration::from_secs(5);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum ServerError {
    Bind { port: u16, source: io::Error },
    Runtime(io::Error),
    Spawn(io::Error),
    Client(reqwest::Error),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Bind { port, source } => {
                write!(f, "failed to bind localhost:{port}: {source}")
            }
            ServerError::Runtime(err) => write!(f, "failed to build server runtime: {err}"),
            ServerError::Spawn(err) => write!(f, "failed to spawn server thread: {err}"),
            ServerError::Client(err) => write!(f, "failed to build http client: {err}"),
        }
    }
}

impl std::error::Error for ServerError {}

/// The embedded UI server.
///
/// One instance is meant to be owned by the host for the lifetime of the process.
/// Start, stop and rebind take `&self` but are expected to come from a single control
/// path. Dropping the server stops it.
#[derive(Default)]
pub struct UiServer {
    running: Mutex<Option<RunningServer>>,
}

struct RunningServer {
    port: u16,
    local_url: String,
    polling_interval: Duration,
    state: SharedState,
    database: DatabaseHandle,
    watcher: Option<Watcher>,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
}

impl UiServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `localhost:<port>` and starts serving. Returns `Ok(false)` when already
    /// running, in which case the server is rebound to `database` instead.
    pub fn start(
        &self,
        settings: &UiSettings,
        database: &Arc<dyn Database>,
    ) -> Result<bool, ServerError> {
        let mut guard = self.running.lock().expect("ui server lock poisoned");
        if let Some(running) = guard.as_mut() {
            running.rebind(database);
            return Ok(false);
        }

        let client = build_client(&settings.http).map_err(ServerError::Client)?;
        let listener = TcpListener::bind(("localhost", settings.local_port)).map_err(|source| {
            ServerError::Bind {
                port: settings.local_port,
                source,
            }
        })?;
        listener.set_nonblocking(true).map_err(ServerError::Runtime)?;
        let port = listener.local_addr().map_err(ServerError::Runtime)?.port();
        let local_url = format!("http://localhost:{port}");

        let dispatcher = Arc::new(EventDispatcher::new());
        let state = SharedState {
            local_url: local_url.clone(),
            remote_url: settings.resolved_remote_url().to_string(),
            ui_version: ui_version().to_string(),
            binding: Arc::new(RwLock::new(EngineBinding::new(database))),
            dispatcher: dispatcher.clone(),
            client,
        };

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("ui-bridge-http")
            .build()
            .map_err(ServerError::Runtime)?;
        let watcher = Watcher::start(
            DatabaseHandle::new(database),
            dispatcher,
            settings.polling_interval,
        )
        .map_err(ServerError::Spawn)?;

        let (shutdown, shutdown_signal) = watch::channel(false);
        let app = build_app(state.clone());
        let thread = std::thread::Builder::new()
            .name("ui-bridge-listener".to_string())
            .spawn(move || {
                runtime.block_on(serve(listener, app, shutdown_signal));
                runtime.shutdown_timeout(Duration::from_secs(1));
            })
            .map_err(ServerError::Spawn)?;

        info!(
            "{} UI server listening on {local_url} remote={}",
            category_server(),
            state.remote_url
        );
        *guard = Some(RunningServer {
            port,
            local_url,
            polling_interval: settings.polling_interval,
            state,
            database: DatabaseHandle::new(database),
            watcher: Some(watcher),
            shutdown,
            thread: Some(thread),
        });
        Ok(true)
    }

    /// Returns `false` when the server was not running.
    pub fn stop(&self) -> bool {
        let running = self
            .running
            .lock()
            .expect("ui server lock poisoned")
            .take();
        let Some(running) = running else {
            return false;
        };
        running.shutdown();
        true
    }

    /// Points a running server at a different engine instance. Returns `false` when not
    /// running or already bound to `database`.
    pub fn rebind(&self, database: &Arc<dyn Database>) -> bool {
        let mut guard = self.running.lock().expect("ui server lock poisoned");
        guard
            .as_mut()
            .map(|running| running.rebind(database))
            .unwrap_or(false)
    }

    pub fn is_started(&self) -> bool {
        self.running
            .lock()
            .expect("ui server lock poisoned")
            .is_some()
    }

    pub fn local_port(&self) -> Option<u16> {
        self.running
            .lock()
            .expect("ui server lock poisoned")
            .as_ref()
            .map(|running| running.port)
    }

    /// The URL to open in a browser, with a trailing slash.
    pub fn local_url(&self) -> Option<String> {
        self.running
            .lock()
            .expect("ui server lock poisoned")
            .as_ref()
            .map(|running| format!("{}/", running.local_url))
    }

    pub fn start_ui_server(
        &self,
        settings: &UiSettings,
        database: &Arc<dyn Database>,
    ) -> Result<String, ServerError> {
        let started = self.start(settings, database)?;
        let url = self.local_url().unwrap_or_default();
        Ok(if started {
            format!("UI server started at {url}")
        } else {
            format!("UI server already started at {url}")
        })
    }

    pub fn stop_ui_server(&self) -> String {
        if self.stop() {
            "UI server stopped".to_string()
        } else {
            "UI server already stopped".to_string()
        }
    }

    /// True when this server is running or something answers `GET /info` on `port`.
    pub async fn is_running_on_machine(&self, port: u16) -> bool {
        if self.is_started() {
            return true;
        }
        let Ok(client) = reqwest::Client::builder().timeout(PROBE_TIMEOUT).build() else {
            return false;
        };
        client
            .get(format!("http://localhost:{port}/info"))
            .send()
            .await
            .map(|response| response.status().is_success())
            .unwrap_or(false)
    }
}

impl Drop for UiServer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl RunningServer {
    fn rebind(&mut self, database: &Arc<dyn Database>) -> bool {
        if self.database.same_as(database) {
            return false;
        }

        *self
            .state
            .binding
            .write()
            .expect("engine binding lock poisoned") = EngineBinding::new(database);
        self.database = DatabaseHandle::new(database);

        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        match Watcher::start(
            self.database.clone(),
            self.state.dispatcher.clone(),
            self.polling_interval,
        ) {
            Ok(watcher) => self.watcher = Some(watcher),
            Err(err) => warn!("{} failed to restart watcher: {err}", category_server()),
        }
        info!("{} rebound to a new database instance", category_server());
        true
    }

    fn shutdown(mut self) {
        self.state.dispatcher.close();
        let _ = self.shutdown.send(true);
        if let Some(watcher) = self.watcher.take() {
            watcher.stop();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("{} listener thread panicked", category_server());
        }
        info!("{} UI server on port {} stopped", category_server(), self.port);
    }
}

async fn serve(listener: TcpListener, app: axum::Router, shutdown: watch::Receiver<bool>) {
    let listener = match tokio::net::TcpListener::from_std(listener) {
        Ok(listener) => listener,
        Err(err) => {
            warn!("{} failed to register listener: {err}", category_server());
            return;
        }
    };

    let mut graceful = shutdown.clone();
    let mut deadline = shutdown;
    let server = async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = graceful.changed().await;
            })
            .await
    };

    tokio::select! {
        result = server => {
            if let Err(err) = result {
                warn!("{} server error: {err}", category_server());
            }
        }
        _ = async move {
            let _ = deadline.changed().await;
            tokio::time::sleep(FORCED_SHUTDOWN_AFTER).await;
        } => {
            warn!("{} in-flight requests did not finish, forcing shutdown", category_server());
        }
    }
}
