// src/handlers/refresh.rs
use actix_web::{web, HttpRequest, HttpResponse};
use log::{debug, error};
use serde_json::json;

use crate::handlers::IpRateLimiter;
use crate::orchestrator::{log_outcome, Orchestrator, RefreshHandle};
use crate::utils::{client_ip, RequestError};

pub async fn refresh_game(
    req: HttpRequest,
    orchestrator: web::Data<Orchestrator>,
    rate_limiter: web::Data<IpRateLimiter>,
    path: web::Path<String>,
) -> Result<HttpResponse, RequestError> {
    let peer_ip = client_ip(&req)?;

    if rate_limiter.check_key(&peer_ip).is_err() {
        error!("Rate limit exceeded for refresh for ip: {}", peer_ip);
        return Err(RequestError::RateLimitExceeded);
    }

    let game = path.into_inner();
    let callback = log_outcome(orchestrator.store().clone());
    match orchestrator.refresh(&game, callback)? {
        RefreshHandle::Started(_) => {
            debug!("[{}] Refresh requested by {}", game, peer_ip);
            Ok(HttpResponse::Accepted().json(json!({ "status": "started" })))
        }
        RefreshHandle::AlreadyRunning => Ok(HttpResponse::Ok().json(json!({ "status": "working" }))),
    }
}
