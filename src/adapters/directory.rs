// src/adapters/directory.rs
use async_trait::async_trait;
use log::{info, warn};
use serde_json::Value;
use std::sync::Arc;

use super::{Adapter, AdapterError};
use crate::models::game::{AdapterKind, GameDescriptor};
use crate::models::server::{Player, ServerInfo};
use crate::prober::{attach_latency, LatencyProbe};

/// Player limit reported when the master does not say.
const UNKNOWN_LIMIT: u32 = 9999;

fn as_u32(value: Option<&Value>) -> Option<u32> {
    match value? {
        Value::Number(n) => n
            .as_u64()
            .map(|n| n.min(u32::MAX as u64) as u32)
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u32)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => crate::utils::parse_flag(s),
        _ => None,
    }
}

fn as_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Pulls the `list` array out of a master's JSON body.
pub fn parse_server_list(body: &str) -> Result<Vec<Value>, AdapterError> {
    let mut json: Value =
        serde_json::from_str(body).map_err(|e| AdapterError::parse("server list", e))?;
    match json.get_mut("list").map(Value::take) {
        Some(Value::Array(entries)) => Ok(entries),
        _ => Err(AdapterError::parse("server list", "missing 'list' array")),
    }
}

/// Converts one master entry. Entries without an address are rejected.
pub fn parse_entry(entry: &Value) -> Option<ServerInfo> {
    let ip = as_text(entry.get("ip"))?;
    let port = as_u32(entry.get("port"))?;

    let mut server = ServerInfo::new(format!("{}:{}", ip, port));
    server.password = as_flag(entry.get("password")).unwrap_or(false);
    server.player_count = as_u32(entry.get("clients")).unwrap_or(0);
    server.player_limit = as_u32(entry.get("proto_max")).unwrap_or(UNKNOWN_LIMIT);
    server.name = as_text(entry.get("name")).unwrap_or_default();
    server.game_type = as_text(entry.get("gameid"));
    server.terrain = String::new();
    server.secure = false;

    if let Some(Value::Array(clients)) = entry.get("clients_list") {
        server.players = clients
            .iter()
            .filter_map(|c| as_text(Some(c)))
            .map(Player::named)
            .collect();
    }

    Some(server)
}

/// Client for masters that publish a JSON list at `<master>/list`.
pub struct DirectoryAdapter {
    client: reqwest::Client,
    prober: Arc<dyn LatencyProbe>,
}

impl DirectoryAdapter {
    pub fn new(client: reqwest::Client, prober: Arc<dyn LatencyProbe>) -> Self {
        Self { client, prober }
    }

    async fn fetch_list(&self, uri: &str) -> Result<Vec<Value>, AdapterError> {
        let http_error = |source| AdapterError::Http {
            uri: uri.to_string(),
            source,
        };
        let body = self
            .client
            .get(uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(http_error)?
            .text()
            .await
            .map_err(http_error)?;

        parse_server_list(&body)
    }
}

pub fn list_uri(master: &str) -> String {
    format!("{}/list", master.trim().trim_end_matches('/'))
}

#[async_trait]
impl Adapter for DirectoryAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Directory
    }

    async fn stat_master(
        &self,
        game: &GameDescriptor,
        masters: &[String],
    ) -> Result<Vec<ServerInfo>, AdapterError> {
        let mut servers = Vec::new();

        for master in masters {
            let uri = list_uri(master);
            let entries = match self.fetch_list(&uri).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("[{}] {}", game.id, e);
                    continue;
                }
            };

            let before = servers.len();
            for entry in &entries {
                match parse_entry(entry) {
                    Some(mut server) => {
                        server.game_id = game.id.clone();
                        server.master = Some(master.clone());
                        servers.push(server);
                    }
                    None => warn!("[{}] Skipping entry without ip/port from {}", game.id, uri),
                }
            }
            info!("[{}] {} servers from {}", game.id, servers.len() - before, uri);
        }

        attach_latency(&mut servers, self.prober.as_ref()).await;
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::game::AdapterParams;
    use crate::models::server::LATENCY_UNKNOWN;
    use crate::prober::testing::FixedProbe;
    use actix_web::{web, App, HttpResponse, HttpServer};
    use serde_json::json;

    const LIST: &str = r#"{"list":[{"ip":"10.0.0.1","port":30000,"clients":3,"proto_max":20,"password":false,"name":"Test","gameid":"mt","clients_list":["A","B","C"]}]}"#;

    fn game() -> GameDescriptor {
        GameDescriptor {
            id: "minetest".to_string(),
            name: "Minetest".to_string(),
            adapter: AdapterKind::Directory,
            masters: Vec::new(),
            params: AdapterParams::default(),
            launch_pattern: None,
            steam_app_id: None,
        }
    }

    #[test]
    fn parses_list_entry() {
        let entries = parse_server_list(LIST).unwrap();
        assert_eq!(entries.len(), 1);

        let server = parse_entry(&entries[0]).unwrap();
        assert_eq!(server.host, "10.0.0.1:30000");
        assert_eq!(server.player_count, 3);
        assert_eq!(server.player_limit, 20);
        assert!(!server.password);
        assert_eq!(server.name, "Test");
        assert_eq!(server.terrain, "");
        assert!(!server.secure);
        assert!(server.rules.is_empty());
        assert_eq!(server.game_type.as_deref(), Some("mt"));
        let names: Vec<&str> = server.players.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert!(server.players.iter().all(|p| p.score.is_none() && p.ping == LATENCY_UNKNOWN));
    }

    #[test]
    fn missing_fields_use_defaults() {
        let server = parse_entry(&json!({"ip": "10.0.0.2", "port": "30001", "proto_max": "lots"})).unwrap();
        assert!(!server.password);
        assert_eq!(server.player_count, 0);
        assert_eq!(server.player_limit, 9999);
        assert_eq!(server.name, "");
        assert!(server.players.is_empty());
    }

    #[test]
    fn entries_without_address_are_rejected() {
        assert!(parse_entry(&json!({"port": 30000})).is_none());
        assert!(parse_entry(&json!({"ip": "10.0.0.1"})).is_none());
    }

    #[test]
    fn malformed_bodies_are_parse_errors() {
        assert!(matches!(parse_server_list("not json"), Err(AdapterError::Parse { .. })));
        assert!(matches!(parse_server_list(r#"{"servers":[]}"#), Err(AdapterError::Parse { .. })));
    }

    #[test]
    fn list_uri_appends_suffix() {
        assert_eq!(list_uri("http://servers.minetest.net/"), "http://servers.minetest.net/list");
    }

    #[actix_web::test]
    async fn bad_master_does_not_abort_others() {
        let server = HttpServer::new(|| {
            App::new()
                .route(
                    "/good/list",
                    web::get().to(|| async { HttpResponse::Ok().body(LIST) }),
                )
                .route(
                    "/broken/list",
                    web::get().to(|| async { HttpResponse::Ok().body("{\"list\": [") }),
                )
        })
        .workers(1)
        .bind(("127.0.0.1", 0))
        .unwrap();
        let addr = server.addrs()[0];
        actix_web::rt::spawn(server.run());

        let probe = Arc::new(FixedProbe::new(15));
        let adapter = DirectoryAdapter::new(reqwest::Client::new(), probe.clone());
        let masters = vec![
            format!("http://{}/broken", addr),
            "http://127.0.0.1:1".to_string(),
            format!("http://{}/good/", addr),
        ];

        let servers = adapter.stat_master(&game(), &masters).await.unwrap();
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].host, "10.0.0.1:30000");
        assert_eq!(servers[0].game_id, "minetest");
        assert_eq!(servers[0].ping, 15);
        assert_eq!(probe.calls(), 1);
    }
}
