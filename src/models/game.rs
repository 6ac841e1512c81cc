// src/models/game.rs
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::models::server::ServerInfo;

/// User-editable per-game settings, keyed by option name.
pub type GameSettings = BTreeMap<String, serde_json::Value>;

/// Setting that overrides the configured master list.
pub const MASTER_URI_SETTING: &str = "master_uri";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    Scrape,
    Directory,
    Probe,
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Scrape => write!(f, "scrape"),
            Self::Directory => write!(f, "directory"),
            Self::Probe => write!(f, "probe"),
        }
    }
}

/// How master hosts are handed to the external query tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeInput {
    #[default]
    Stdin,
    Arguments,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterParams {
    pub protocol_version: Option<String>,
    pub master_type: Option<String>,
    pub server_type: Option<String>,
    pub master_key: Option<String>,
    pub server_game_name: Option<String>,
    pub server_game_type: Option<String>,
    pub probe_input: ProbeInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameDescriptor {
    pub id: String,
    pub name: String,
    pub adapter: AdapterKind,
    pub masters: Vec<String>,
    pub params: AdapterParams,
    /// Launch command template and Steam id. Not read by the engine; they are
    /// served with the descriptor for whatever launches the game client.
    pub launch_pattern: Option<String>,
    pub steam_app_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Empty,
    Working,
    Ready,
    Error,
}

impl QueryStatus {
    pub fn can_transition_to(self, next: QueryStatus) -> bool {
        match next {
            QueryStatus::Working => self != QueryStatus::Working,
            QueryStatus::Ready | QueryStatus::Error => self == QueryStatus::Working,
            QueryStatus::Empty => false,
        }
    }
}

impl fmt::Display for QueryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty"),
            Self::Working => write!(f, "working"),
            Self::Ready => write!(f, "ready"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DirectoryEntry {
    pub descriptor: GameDescriptor,
    pub settings: GameSettings,
    pub status: QueryStatus,
    pub servers: Vec<ServerInfo>,
}

impl DirectoryEntry {
    pub fn new(descriptor: GameDescriptor, settings: GameSettings) -> Self {
        Self {
            descriptor,
            settings,
            status: QueryStatus::Empty,
            servers: Vec::new(),
        }
    }

    /// Masters to query: the `master_uri` setting when set, else the configured list.
    pub fn master_list(&self) -> Vec<String> {
        let from_settings = match self.settings.get(MASTER_URI_SETTING) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(serde_json::Value::String(list)) => list
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        if from_settings.is_empty() {
            self.descriptor.masters.clone()
        } else {
            from_settings
        }
    }
}
