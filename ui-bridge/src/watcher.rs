use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        Arc,
        mpsc::{self, RecvTimeoutError},
    },
    thread::JoinHandle,
    time::Duration,
};

use tracing::{debug, info, warn};

use crate::{
    engine::DatabaseHandle,
    events::{Event, EventDispatcher},
    logging::category_events,
};

const MIN_POLLING_INTERVAL: Duration = Duration::from_millis(1);

/// Background poller that turns catalog version changes into events.
pub struct Watcher {
    stop: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl Watcher {
    pub fn start(
        database: DatabaseHandle,
        dispatcher: Arc<EventDispatcher>,
        interval: Duration,
    ) -> std::io::Result<Self> {
        let interval = polling_interval(interval);
        let (stop, stopped) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("ui-bridge-watcher".to_string())
            .spawn(move || run_watcher(database, dispatcher, interval, stopped))?;
        info!(
            "{} watcher started interval={}ms",
            category_events(),
            interval.as_millis()
        );
        Ok(Self {
            stop,
            thread: Some(thread),
        })
    }

    /// Lets an in-flight poll finish, then joins the thread.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        let _ = self.stop.send(());
        if thread.join().is_err() {
            warn!("{} watcher thread panicked", category_events());
        }
        info!("{} watcher stopped", category_events());
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_watcher(
    database: DatabaseHandle,
    dispatcher: Arc<EventDispatcher>,
    interval: Duration,
    stopped: mpsc::Receiver<()>,
) {
    let mut baseline: Option<BTreeMap<String, u64>> = None;
    loop {
        if let Some(snapshot) = poll_catalog(&database) {
            if let Some(previous) = &baseline {
                let changed = changed_databases(previous, &snapshot);
                if !changed.is_empty() {
                    let delivered = dispatcher.publish(Event::catalog_change(&changed));
                    debug!(
                        "{} catalog changed databases={changed:?} delivered={delivered}",
                        category_events()
                    );
                }
            }
            baseline = Some(snapshot);
        }

        match stopped.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn poll_catalog(database: &DatabaseHandle) -> Option<BTreeMap<String, u64>> {
    let database = database.lock()?;
    match database.catalog_snapshot() {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!("{} catalog poll failed: {err}", category_events());
            None
        }
    }
}

fn polling_interval(requested: Duration) -> Duration {
    requested.max(MIN_POLLING_INTERVAL)
}

/// Databases whose catalog version moved, appeared or disappeared.
pub fn changed_databases(
    previous: &BTreeMap<String, u64>,
    current: &BTreeMap<String, u64>,
) -> Vec<String> {
    let names: BTreeSet<&String> = previous.keys().chain(current.keys()).collect();
    names
        .into_iter()
        .filter(|name| previous.get(*name) != current.get(*name))
        .cloned()
        .collect()
}
