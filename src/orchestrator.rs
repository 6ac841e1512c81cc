// src/orchestrator.rs
use log::{error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::adapters::{AdapterError, AdapterSet};
use crate::geolocation::Geolocator;
use crate::models::game::QueryStatus;
use crate::models::server::{ServerInfo, COUNTRY_UNKNOWN};
use crate::storage::memory::{DirectoryStore, StoreError};
use crate::utils::strip_port;

/// Called once with the game id after a refresh has settled.
pub type RefreshCallback = Box<dyn FnOnce(String) + Send + 'static>;

#[derive(Debug)]
pub enum RefreshHandle {
    /// A new query was started; resolves to the final status.
    Started(JoinHandle<QueryStatus>),
    /// A query for this game was already in flight. Nothing was scheduled.
    AlreadyRunning,
}

/// Drives refreshes: picks the game's adapter, runs it in its own task and
/// records the outcome in the store.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<DirectoryStore>,
    adapters: AdapterSet,
    geolocation: Option<Arc<dyn Geolocator>>,
    adapter_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        store: Arc<DirectoryStore>,
        adapters: AdapterSet,
        geolocation: Option<Arc<dyn Geolocator>>,
        adapter_timeout: Duration,
    ) -> Self {
        Self {
            store,
            adapters,
            geolocation,
            adapter_timeout,
        }
    }

    pub fn store(&self) -> &Arc<DirectoryStore> {
        &self.store
    }

    /// Starts a refresh of `game` unless one is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn refresh<F>(&self, game: &str, callback: F) -> Result<RefreshHandle, StoreError>
    where
        F: FnOnce(String) + Send + 'static,
    {
        if !self.store.try_begin_query(game)? {
            info!("[{}] Refresh already in progress", game);
            return Ok(RefreshHandle::AlreadyRunning);
        }

        let this = self.clone();
        let game = game.to_string();
        Ok(RefreshHandle::Started(tokio::spawn(async move {
            let worker = this.clone();
            let id = game.clone();
            let status = match tokio::spawn(async move { worker.run(&id).await }).await {
                Ok(status) => status,
                Err(e) => {
                    error!("[{}] Refresh task crashed: {}", game, e);
                    if let Err(e) = this.store.set_query_status(&game, QueryStatus::Error) {
                        error!("[{}] Failed to record query status: {}", game, e);
                    }
                    QueryStatus::Error
                }
            };
            callback(game);
            status
        })))
    }

    async fn run(&self, game: &str) -> QueryStatus {
        let started = Instant::now();
        info!("[{}] Refreshing server list", game);

        let status = match self.query(game).await {
            Ok(mut servers) => {
                self.geolocate(game, &mut servers).await;
                let count = servers.len();
                match self.store.replace_servers(game, servers) {
                    Ok(()) => {
                        info!(
                            "[{}] Loaded {} servers in {:.2}s",
                            game,
                            count,
                            started.elapsed().as_secs_f64()
                        );
                        QueryStatus::Ready
                    }
                    Err(e) => {
                        error!("[{}] Failed to store servers: {}", game, e);
                        QueryStatus::Error
                    }
                }
            }
            Err(e) => {
                error!("[{}] Refresh failed: {}", game, e);
                QueryStatus::Error
            }
        };

        if let Err(e) = self.store.set_query_status(game, status) {
            error!("[{}] Failed to record query status: {}", game, e);
        }
        status
    }

    async fn query(&self, game: &str) -> Result<Vec<ServerInfo>, RefreshError> {
        let descriptor = self.store.descriptor(game)?;
        let masters = self.store.master_list(game)?;
        let adapter = self
            .adapters
            .get(descriptor.adapter)
            .ok_or(AdapterError::Unavailable(descriptor.adapter))?;

        // the adapter runs in its own task so a panic stays contained
        let task = tokio::spawn(async move { adapter.stat_master(&descriptor, &masters).await });
        let abort = task.abort_handle();
        match tokio::time::timeout(self.adapter_timeout, task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(e)) => Err(AdapterError::Crashed(e.to_string()).into()),
            Err(_) => {
                abort.abort();
                Err(AdapterError::TimedOut(self.adapter_timeout).into())
            }
        }
    }

    /// Labels every server with a country. Lookups run on the blocking pool;
    /// if the geolocator panics every label stays "unknown".
    async fn geolocate(&self, game: &str, servers: &mut [ServerInfo]) {
        let geolocator = match &self.geolocation {
            Some(geolocator) => geolocator.clone(),
            None => return,
        };
        let hosts: Vec<String> = servers
            .iter()
            .map(|s| strip_port(&s.host).to_string())
            .collect();

        let lookup = tokio::task::spawn_blocking(move || {
            hosts
                .iter()
                .map(|host| geolocator.country_code(host))
                .collect::<Vec<Option<String>>>()
        });
        let labels = match lookup.await {
            Ok(labels) => labels,
            Err(e) => {
                warn!("[{}] Geolocation failed: {}", game, e);
                Vec::new()
            }
        };

        for (i, server) in servers.iter_mut().enumerate() {
            server.country = labels
                .get(i)
                .cloned()
                .flatten()
                .unwrap_or_else(|| COUNTRY_UNKNOWN.to_string());
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum RefreshError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Callback that only logs the outcome.
pub fn log_outcome(store: Arc<DirectoryStore>) -> RefreshCallback {
    Box::new(move |game| match store.query_status(&game) {
        Ok(QueryStatus::Ready) => info!("[{}] Refresh complete", game),
        Ok(status) => warn!("[{}] Refresh finished with status {}", game, status),
        Err(e) => warn!("[{}] {}", game, e),
    })
}
