// src/handlers/games.rs
use actix_web::{web, HttpResponse};
use log::{debug, info};
use serde::Serialize;

use crate::models::game::{AdapterKind, QueryStatus};
use crate::storage::memory::DirectoryStore;
use crate::utils::RequestError;

#[derive(Serialize)]
struct GameSummary {
    id: String,
    name: String,
    adapter: AdapterKind,
    status: QueryStatus,
    server_count: usize,
}

pub async fn list_games(store: web::Data<DirectoryStore>) -> Result<HttpResponse, RequestError> {
    let games = store
        .game_ids()
        .into_iter()
        .map(|id| -> Result<GameSummary, RequestError> {
            let entry = store.entry(&id)?;
            Ok(GameSummary {
                id,
                name: entry.descriptor.name,
                adapter: entry.descriptor.adapter,
                status: entry.status,
                server_count: entry.servers.len(),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(HttpResponse::Ok().json(games))
}

pub async fn get_game(
    store: web::Data<DirectoryStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, RequestError> {
    let id = path.into_inner();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": id,
        "descriptor": store.descriptor(&id)?,
        "settings": store.settings(&id)?,
        "status": store.query_status(&id)?,
    })))
}

pub async fn get_servers(
    store: web::Data<DirectoryStore>,
    path: web::Path<String>,
) -> Result<HttpResponse, RequestError> {
    let id = path.into_inner();
    let servers = store.servers(&id)?;
    debug!("Serving {} servers for {}", servers.len(), id);
    Ok(HttpResponse::Ok().json(servers))
}

pub async fn get_server(
    store: web::Data<DirectoryStore>,
    path: web::Path<(String, String)>,
) -> Result<HttpResponse, RequestError> {
    let (id, host) = path.into_inner();
    match store.server(&id, &host)? {
        Some(server) => Ok(HttpResponse::Ok().json(server)),
        None => Err(RequestError::ServerNotFound(host)),
    }
}

pub async fn put_setting(
    store: web::Data<DirectoryStore>,
    path: web::Path<(String, String)>,
    value: web::Json<serde_json::Value>,
) -> Result<HttpResponse, RequestError> {
    let (id, option) = path.into_inner();
    store.set_setting(&id, &option, value.into_inner())?;
    info!("[{}] Setting {} updated", id, option);
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "ok" })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::configure;
    use crate::models::game::{AdapterParams, GameDescriptor, GameSettings};
    use crate::models::server::ServerInfo;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn store() -> web::Data<DirectoryStore> {
        let descriptor = GameDescriptor {
            id: "minetest".to_string(),
            name: "Minetest".to_string(),
            adapter: AdapterKind::Directory,
            masters: vec!["http://servers.minetest.net".to_string()],
            params: AdapterParams::default(),
            launch_pattern: None,
            steam_app_id: None,
        };
        let store = DirectoryStore::new(vec![(descriptor, GameSettings::new())]);
        store
            .replace_servers("minetest", vec![ServerInfo::new("10.0.0.1:30000")])
            .unwrap();
        web::Data::new(store)
    }

    #[actix_web::test]
    async fn lists_games_and_servers() {
        let app = test::init_service(App::new().app_data(store()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/games").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["id"], "minetest");
        assert_eq!(body[0]["status"], "empty");
        assert_eq!(body[0]["server_count"], 1);

        let req = test::TestRequest::get().uri("/games/minetest/servers").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body[0]["host"], "10.0.0.1:30000");

        let req = test::TestRequest::get()
            .uri("/games/minetest/servers/10.0.0.1:30000")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn unknown_game_and_server_are_not_found() {
        let app = test::init_service(App::new().app_data(store()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/games/nope/servers").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::get().uri("/games/minetest/servers/10.9.9.9:1").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn descriptor_exposes_launch_fields() {
        let descriptor = GameDescriptor {
            id: "tf2".to_string(),
            name: "Team Fortress 2".to_string(),
            adapter: AdapterKind::Probe,
            masters: Vec::new(),
            params: AdapterParams::default(),
            launch_pattern: Some("steam -applaunch 440 +connect {host}".to_string()),
            steam_app_id: Some("440".to_string()),
        };
        let store = web::Data::new(DirectoryStore::new(vec![(descriptor, GameSettings::new())]));
        let app = test::init_service(App::new().app_data(store).configure(configure)).await;

        let req = test::TestRequest::get().uri("/games/tf2").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["descriptor"]["launch_pattern"], "steam -applaunch 440 +connect {host}");
        assert_eq!(body["descriptor"]["steam_app_id"], "440");
    }

    #[actix_web::test]
    async fn settings_can_be_updated() {
        let store = store();
        let app = test::init_service(App::new().app_data(store.clone()).configure(configure)).await;

        let req = test::TestRequest::put()
            .uri("/games/minetest/settings/master_uri")
            .set_json(json!(["http://other.example"]))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert_eq!(store.master_list("minetest").unwrap(), vec!["http://other.example"]);

        let req = test::TestRequest::get().uri("/games/minetest").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["settings"]["master_uri"][0], "http://other.example");
    }
}
