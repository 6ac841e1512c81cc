// src/storage/memory.rs
use dashmap::DashMap;
use log::debug;
use thiserror::Error;

use crate::models::game::{DirectoryEntry, GameDescriptor, GameSettings, QueryStatus};
use crate::models::server::ServerInfo;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Invalid game specified")]
    InvalidGame,
    #[error("Invalid option specified")]
    InvalidOption,
    #[error("Game not found: {0}")]
    UnknownGame(String),
    #[error("Invalid query status transition for {game}: {from} -> {to}")]
    InvalidTransition {
        game: String,
        from: QueryStatus,
        to: QueryStatus,
    },
}

/// Per-game table of descriptors, settings, query status and server lists.
///
/// The set of games is fixed at construction. Every accessor hands out
/// copies; mutations happen under the entry's shard lock so readers see
/// either the old or the new value in full.
pub struct DirectoryStore {
    entries: DashMap<String, DirectoryEntry>,
}

/// The only place a query status is written.
fn transition(game: &str, entry: &mut DirectoryEntry, status: QueryStatus) -> Result<(), StoreError> {
    if !entry.status.can_transition_to(status) {
        return Err(StoreError::InvalidTransition {
            game: game.to_string(),
            from: entry.status,
            to: status,
        });
    }
    debug!("Query status for {}: {} -> {}", game, entry.status, status);
    entry.status = status;
    Ok(())
}

impl DirectoryStore {
    pub fn new(games: Vec<(GameDescriptor, GameSettings)>) -> Self {
        let entries = DashMap::new();
        for (descriptor, settings) in games {
            entries.insert(descriptor.id.clone(), DirectoryEntry::new(descriptor, settings));
        }
        Self { entries }
    }

    pub fn game_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    fn read<T>(&self, game: &str, f: impl FnOnce(&DirectoryEntry) -> T) -> Result<T, StoreError> {
        if game.is_empty() {
            return Err(StoreError::InvalidGame);
        }
        self.entries
            .get(game)
            .map(|entry| f(entry.value()))
            .ok_or_else(|| StoreError::UnknownGame(game.to_string()))
    }

    fn write<T>(
        &self,
        game: &str,
        f: impl FnOnce(&mut DirectoryEntry) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        if game.is_empty() {
            return Err(StoreError::InvalidGame);
        }
        match self.entries.get_mut(game) {
            Some(mut entry) => f(entry.value_mut()),
            None => Err(StoreError::UnknownGame(game.to_string())),
        }
    }

    pub fn entry(&self, game: &str) -> Result<DirectoryEntry, StoreError> {
        self.read(game, |entry| entry.clone())
    }

    pub fn descriptor(&self, game: &str) -> Result<GameDescriptor, StoreError> {
        self.read(game, |entry| entry.descriptor.clone())
    }

    pub fn settings(&self, game: &str) -> Result<GameSettings, StoreError> {
        self.read(game, |entry| entry.settings.clone())
    }

    pub fn set_setting(
        &self,
        game: &str,
        option: &str,
        value: serde_json::Value,
    ) -> Result<(), StoreError> {
        if option.is_empty() {
            return Err(StoreError::InvalidOption);
        }
        self.write(game, |entry| {
            entry.settings.insert(option.to_string(), value);
            Ok(())
        })
    }

    pub fn master_list(&self, game: &str) -> Result<Vec<String>, StoreError> {
        self.read(game, |entry| entry.master_list())
    }

    pub fn query_status(&self, game: &str) -> Result<QueryStatus, StoreError> {
        self.read(game, |entry| entry.status)
    }

    /// Moves the game to `status`, rejecting transitions the state machine forbids.
    pub fn set_query_status(&self, game: &str, status: QueryStatus) -> Result<(), StoreError> {
        self.write(game, |entry| transition(game, entry, status))
    }

    /// Atomically marks the game as working. Returns false if a query is already in flight.
    pub fn try_begin_query(&self, game: &str) -> Result<bool, StoreError> {
        self.write(game, |entry| {
            if entry.status == QueryStatus::Working {
                return Ok(false);
            }
            transition(game, entry, QueryStatus::Working)?;
            Ok(true)
        })
    }

    pub fn servers(&self, game: &str) -> Result<Vec<ServerInfo>, StoreError> {
        self.read(game, |entry| entry.servers.clone())
    }

    pub fn server_count(&self, game: &str) -> Result<usize, StoreError> {
        self.read(game, |entry| entry.servers.len())
    }

    pub fn server(&self, game: &str, host: &str) -> Result<Option<ServerInfo>, StoreError> {
        self.read(game, |entry| {
            entry.servers.iter().find(|s| s.host == host).cloned()
        })
    }

    pub fn replace_servers(&self, game: &str, servers: Vec<ServerInfo>) -> Result<(), StoreError> {
        self.write(game, |entry| {
            entry.servers = servers;
            Ok(())
        })
    }

    pub fn clear_servers(&self, game: &str) -> Result<(), StoreError> {
        self.write(game, |entry| {
            entry.servers.clear();
            Ok(())
        })
    }
}
