use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use fashion_backend::config::AppConfig;
use fashion_backend::inference::ModelRegistry;
use fashion_backend::routes::configure_routes;
use fashion_backend::storage::session::SessionStore;
use fashion_backend::trends::{GoogleTrends, RetryPolicy, TrendService};
use std::env;
use std::io;
use std::sync::Arc;

#[cfg(feature = "torch")]
fn load_models(config: &AppConfig) -> ModelRegistry {
    fashion_backend::inference::torch::load_registry(config)
}

#[cfg(not(feature = "torch"))]
fn load_models(_config: &AppConfig) -> ModelRegistry {
    log::warn!("Built without the `torch` feature; vision endpoints will answer 503");
    ModelRegistry::default()
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    if let Ok(current_dir) = env::current_dir() {
        log::info!("Current working directory: {}", current_dir.display());
    }

    let config = AppConfig::load().map_err(|e| {
        log::error!("Failed to load configuration: {}", e);
        io::Error::new(io::ErrorKind::InvalidInput, e.to_string())
    })?;

    std::fs::create_dir_all(&config.storage.uploads_dir)?;
    std::fs::create_dir_all(&config.storage.predictions_dir)?;
    let sessions = SessionStore::new(&config.storage.uploads_dir, &config.storage.predictions_dir);
    if let Err(e) = sessions.sweep_stale() {
        log::warn!("Failed to clean up stale session directories: {}", e);
    }

    let models = load_models(&config);
    log::info!("Models loaded: {}", models.describe());

    let source = GoogleTrends::new(&config.trends).map_err(|e| {
        log::error!("Failed to build trends client: {}", e);
        io::Error::other(e.to_string())
    })?;
    let trends = TrendService::new(
        Arc::new(source),
        RetryPolicy::from(&config.trends),
        config.trends.forecast_periods,
    );

    let bind_address = format!("{}:{}", config.server.host, config.server.port);
    log::info!("Starting server on {}", bind_address);

    let predictions_dir = config.storage.predictions_dir.clone();
    let config = web::Data::new(config);
    let sessions = web::Data::new(sessions);
    let models = web::Data::new(models);
    let trends = web::Data::new(trends);

    HttpServer::new(move || {
        App::new()
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allowed_methods(vec!["GET", "POST", "OPTIONS"])
                    .allowed_headers(vec![
                        actix_web::http::header::ACCEPT,
                        actix_web::http::header::CONTENT_TYPE,
                    ])
                    .max_age(3600),
            )
            .app_data(config.clone())
            .app_data(sessions.clone())
            .app_data(models.clone())
            .app_data(trends.clone())
            .configure(|cfg| configure_routes(cfg, predictions_dir.clone()))
    })
    .bind(&bind_address)?
    .run()
    .await
}
