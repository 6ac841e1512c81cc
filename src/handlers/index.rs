// src/handlers/index.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::storage::memory::DirectoryStore;

pub async fn index(store: web::Data<DirectoryStore>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "games": store.game_ids().len(),
    }))
}
