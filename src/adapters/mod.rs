// src/adapters/mod.rs
//! Master-server protocol clients.
//!
//! Each adapter turns one wire format into a list of [`ServerInfo`] for a
//! single game. The scrape and directory adapters tolerate individual
//! masters failing; the probe adapter fails as a whole because a single
//! tool invocation serves every master.

pub mod directory;
pub mod probe;
pub mod scrape;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;
use crate::models::game::{AdapterKind, GameDescriptor};
use crate::models::server::ServerInfo;
use crate::prober::LatencyProbe;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Accessing {uri} failed: {source}")]
    Http {
        uri: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("Error parsing {context}: {message}")]
    Parse { context: String, message: String },
    #[error("Failed to launch {command}: {source}")]
    ToolLaunch {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{command} exited with {status}")]
    ToolExit { command: String, status: String },
    #[error("{command} did not finish within {}s", .timeout.as_secs())]
    ToolTimeout { command: String, timeout: Duration },
    #[error("Missing adapter parameter '{param}' for {game}")]
    MissingParameter { game: String, param: &'static str },
    #[error("No adapter registered for {0}")]
    Unavailable(AdapterKind),
    #[error("Adapter task crashed: {0}")]
    Crashed(String),
    #[error("Adapter did not finish within {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl AdapterError {
    pub fn parse(context: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            context: context.into(),
            message: message.to_string(),
        }
    }
}

/// A client for one master-server protocol.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn kind(&self) -> AdapterKind;

    /// Queries every master in `masters` and returns the servers found for `game`.
    async fn stat_master(
        &self,
        game: &GameDescriptor,
        masters: &[String],
    ) -> Result<Vec<ServerInfo>, AdapterError>;
}

/// Adapters by kind.
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<AdapterKind, Arc<dyn Adapter>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three stock adapters wired to `prober`.
    pub fn standard(config: &Config, prober: Arc<dyn LatencyProbe>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .unwrap_or_else(|e| {
                log::warn!("Falling back to default HTTP client: {}", e);
                reqwest::Client::new()
            });

        Self::new()
            .with(Arc::new(scrape::ScrapeAdapter::new(client.clone(), prober.clone())))
            .with(Arc::new(directory::DirectoryAdapter::new(client, prober)))
            .with(Arc::new(probe::ProbeAdapter::new(
                config.qstat_command.clone(),
                config.qstat_timeout(),
            )))
    }

    pub fn with(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(adapter.kind(), adapter);
        self
    }

    pub fn get(&self, kind: AdapterKind) -> Option<Arc<dyn Adapter>> {
        self.adapters.get(&kind).cloned()
    }
}
