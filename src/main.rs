// src/main.rs
use actix_web::{web, App, HttpServer};
use env_logger::Env;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;

use serverdir::adapters::AdapterSet;
use serverdir::catalog;
use serverdir::config::Config;
use serverdir::geolocation::{Geolocator, RangeGeolocator};
use serverdir::handlers::{self, IpRateLimiter};
use serverdir::orchestrator::Orchestrator;
use serverdir::prober::{LatencyProbe, Pinger};
use serverdir::storage::memory::DirectoryStore;

fn load_geolocation(config: &Config) -> Option<Arc<dyn Geolocator>> {
    let path = config.geoip_ranges.as_ref()?;
    match RangeGeolocator::from_file(path) {
        Ok(geolocator) => Some(Arc::new(geolocator)),
        Err(e) => {
            warn!("Geolocation disabled, failed to read {}: {}", path, e);
            None
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = Config::from_env();

    let games = match catalog::load(config.games_config.as_deref().map(Path::new)) {
        Ok(games) => games,
        Err(e) => {
            error!("Failed to load game table: {}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()));
        }
    };

    let store = Arc::new(DirectoryStore::new(games));
    let prober: Arc<dyn LatencyProbe> = Arc::new(Pinger::from_config(&config));
    let adapters = AdapterSet::standard(&config, prober);
    let orchestrator = Orchestrator::new(
        store.clone(),
        adapters,
        load_geolocation(&config),
        config.adapter_timeout(),
    );

    let store = web::Data::from(store);
    let orchestrator = web::Data::new(orchestrator);
    let refresh_rate_limiter: web::Data<IpRateLimiter> =
        web::Data::new(IpRateLimiter::keyed(config.refresh_quota()));

    let bind = config.bind();
    info!("Starting server on {}", bind);
    HttpServer::new(move || {
        App::new()
            .app_data(store.clone())
            .app_data(orchestrator.clone())
            .app_data(refresh_rate_limiter.clone())
            .configure(handlers::configure)
    })
    .bind(&bind)?
    .run()
    .await
}
