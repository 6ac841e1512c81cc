// src/catalog.rs
use log::info;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::models::game::{
    AdapterKind, AdapterParams, GameDescriptor, GameSettings, ProbeInput, MASTER_URI_SETTING,
};

/// Game table compiled into the binary.
pub const BUILTIN_GAMES: &str = include_str!("../data/games.json");

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read game table {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid game table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Game table contains no games")]
    Empty,
    #[error("Duplicate game id: {0}")]
    Duplicate(String),
    #[error("Game {game} uses the {adapter} adapter but has no '{param}'")]
    MissingParameter {
        game: String,
        adapter: AdapterKind,
        param: &'static str,
    },
}

#[derive(Debug, Deserialize)]
struct GameEntry {
    name: String,
    adapter: AdapterKind,
    #[serde(default)]
    masters: Vec<String>,
    #[serde(flatten)]
    params: AdapterParams,
    #[serde(default)]
    settings: GameSettings,
    launch_pattern: Option<String>,
    steam_app_id: Option<String>,
}

/// Top-level object kept in document order, repeated keys included.
struct GameTable(Vec<(String, GameEntry)>);

impl<'de> Deserialize<'de> for GameTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TableVisitor;

        impl<'de> Visitor<'de> for TableVisitor {
            type Value = GameTable;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of games keyed by id")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<GameTable, A::Error> {
                let mut games = Vec::new();
                while let Some(entry) = map.next_entry::<String, GameEntry>()? {
                    games.push(entry);
                }
                Ok(GameTable(games))
            }
        }

        deserializer.deserialize_map(TableVisitor)
    }
}

fn require(
    id: &str,
    adapter: AdapterKind,
    value: &Option<String>,
    param: &'static str,
) -> Result<(), CatalogError> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(()),
        _ => Err(CatalogError::MissingParameter {
            game: id.to_string(),
            adapter,
            param,
        }),
    }
}

fn validate(id: &str, entry: &GameEntry) -> Result<(), CatalogError> {
    let params = &entry.params;
    match entry.adapter {
        AdapterKind::Scrape => require(id, entry.adapter, &params.protocol_version, "protocol_version"),
        AdapterKind::Directory => Ok(()),
        AdapterKind::Probe => {
            require(id, entry.adapter, &params.master_type, "master_type")?;
            require(id, entry.adapter, &params.server_type, "server_type")?;
            if params.probe_input == ProbeInput::Arguments {
                require(id, entry.adapter, &params.master_key, "master_key")?;
            }
            Ok(())
        }
    }
}

/// Parses and validates a game table, returning each game with its default settings.
pub fn parse(json: &str) -> Result<Vec<(GameDescriptor, GameSettings)>, CatalogError> {
    let GameTable(entries) = serde_json::from_str(json)?;
    if entries.is_empty() {
        return Err(CatalogError::Empty);
    }

    let mut seen = HashSet::new();
    let mut games = Vec::with_capacity(entries.len());
    for (id, entry) in entries {
        if !seen.insert(id.clone()) {
            return Err(CatalogError::Duplicate(id));
        }
        validate(&id, &entry)?;

        let mut settings = entry.settings;
        settings
            .entry(MASTER_URI_SETTING.to_string())
            .or_insert_with(|| serde_json::json!(entry.masters));

        let descriptor = GameDescriptor {
            id,
            name: entry.name,
            adapter: entry.adapter,
            masters: entry.masters,
            params: entry.params,
            launch_pattern: entry.launch_pattern,
            steam_app_id: entry.steam_app_id,
        };
        games.push((descriptor, settings));
    }
    Ok(games)
}

pub fn builtin() -> Result<Vec<(GameDescriptor, GameSettings)>, CatalogError> {
    parse(BUILTIN_GAMES)
}

/// Loads the table at `path`, or the built-in one when no path is given.
pub fn load(path: Option<&Path>) -> Result<Vec<(GameDescriptor, GameSettings)>, CatalogError> {
    let games = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
                path: path.display().to_string(),
                source,
            })?;
            parse(&text)?
        }
        None => builtin()?,
    };
    info!("Loaded {} games", games.len());
    Ok(games)
}
