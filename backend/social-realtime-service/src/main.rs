use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use social_realtime_service::{
    auth::JwtVerifier,
    config, error, logging, metrics, routes,
    state::AppState,
    store::{ChatStore, MemoryStore, PgStore},
};
use std::sync::Arc;
use tokio::task::JoinHandle;

async fn build_store(cfg: &config::Config) -> anyhow::Result<Arc<dyn ChatStore>> {
    match &cfg.database_url {
        Some(url) => {
            let store = PgStore::connect(url, cfg.database_max_connections)
                .await
                .context("connecting to postgres")?;
            tracing::info!("using postgres store");
            Ok(Arc::new(store))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let store = build_store(&cfg)
        .await
        .map_err(|e| error::AppError::StartServer(format!("store: {e:#}")))?;
    let verifier = Arc::new(JwtVerifier::from_rsa_pem(&cfg.jwt_public_key_pem)?);

    let state = AppState::build(
        store,
        verifier,
        cfg.notification.clone(),
        cfg.websocket.clone(),
    );

    // Expired and long-read notifications
    let gc_notifications = state.gateway.notifications().clone();
    let gc_interval = cfg.notification_gc_interval;
    let _gc_task: JoinHandle<()> = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(gc_interval);
        loop {
            ticker.tick().await;
            if let Err(e) = gc_notifications.purge_expired(chrono::Utc::now()).await {
                tracing::error!(error = %e, "notification purge failed");
            }
        }
    });

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting social-realtime-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(metrics::MetricsMiddleware)
            .app_data(web::Data::new(state.clone()))
            .route("/health", web::get().to(|| async { "OK" }))
            .route("/metrics", web::get().to(metrics::serve_metrics))
            .configure(routes::register_routes)
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("run: {e}")))
}
