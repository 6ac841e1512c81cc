// src/handlers/mod.rs
use actix_web::web;
use governor::clock::DefaultClock;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::RateLimiter;
use std::net::IpAddr;

pub mod games;
pub mod index;
pub mod refresh;

pub type IpRateLimiter = RateLimiter<IpAddr, DefaultKeyedStateStore<IpAddr>, DefaultClock>;

/// Registers every route of the HTTP API.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(index::index))
        .route("/games", web::get().to(games::list_games))
        .route("/games/{id}", web::get().to(games::get_game))
        .route("/games/{id}/servers", web::get().to(games::get_servers))
        .route("/games/{id}/servers/{host}", web::get().to(games::get_server))
        .route("/games/{id}/refresh", web::post().to(refresh::refresh_game))
        .route("/games/{id}/settings/{option}", web::put().to(games::put_setting));
}
