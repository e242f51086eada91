use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use dotenvy::dotenv;
use std::sync::Arc;

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod service;
mod storage;
mod store;
mod utils;

use config::Config;
use db::init_db;

use crate::docs::ApiDoc;
use crate::service::Services;
use crate::storage::LocalObjectStorage;
use crate::store::MySqlStore;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().map_err(anyhow::Error::msg)?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let pool = init_db(&config.database_url).await?;

    let photos = Arc::new(LocalObjectStorage::new(
        &config.photo_dir,
        &config.jwt_secret,
        &config.public_base_url,
    ));
    let store = Arc::new(MySqlStore::new(pool.clone()));
    let services = Services::new(store, photos, config.tx_timeout);

    if let Some((email, password)) = &config.bootstrap_admin {
        if let Err(e) = services.users.bootstrap_admin(email, password).await {
            warn!(error = %e, "Bootstrap admin was not created");
        }
    }

    let filter_emails = services.emails.clone();
    let pool_for_filter_warmup = pool.clone();
    actix_web::rt::spawn(async move {
        if let Err(e) = filter_emails.filter.warmup(&pool_for_filter_warmup, 100).await {
            error!(error = ?e, "Failed to warm up email filter");
        }
    });

    let cache_emails = services.emails.clone();
    let pool_for_cache_warmup = pool.clone();
    actix_web::rt::spawn(async move {
        // Users active in the last 30 days, in batches of 250
        if let Err(e) = cache_emails.cache.warmup(&pool_for_cache_warmup, 30, 250).await {
            error!(error = ?e, "Failed to warm up email cache");
        }
    });

    let server_addr = config.server_addr.clone();
    let config_data = config.clone();
    let services = Data::new(services);

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                // wildcard {_:.*} so the UI's JS/CSS assets match
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(services.clone())
            .app_data(Data::new(config.clone()))
            // Configure auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, config_data.clone()))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
