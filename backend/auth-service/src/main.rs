//! Process entry point: load configuration, wire up the shared stores and
//! coordinators, and serve the HTTP surface (§6).

use actix_web::{web, App, HttpServer};
use auth_service::config::Config;
use auth_service::registry::CredentialRegistry;
use auth_service::services::{
    login::LoginCoordinator, logout::LogoutCoordinator, profile_cache::ProfileCache,
    refresh::RefreshCoordinator,
};
use auth_service::{handlers, metrics, telemetry, AppState};
use redis_utils::VolatileStore;
use std::sync::Arc;

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            std::process::exit(1);
        }
    };

    telemetry::init(&config.env);
    tracing::info!(service = %config.service_name, env = %config.env, "starting up");

    let pool = db_pool::create_pool(db_pool::DbConfig {
        service_name: config.service_name.clone(),
        database_url: config.database.primary_url.clone(),
        max_connections: config.database.pool_max_size,
        min_connections: config.database.pool_min_size,
        ..db_pool::DbConfig::default()
    })
    .await?;

    let sentinel = config.redis.sentinel_endpoints.clone().map(|endpoints| {
        redis_utils::SentinelConfig::new(endpoints, "mymaster".to_string(), std::time::Duration::from_secs(10))
    });
    let redis_pool = redis_utils::RedisPool::connect(&config.redis.url, sentinel).await?;
    let store: Arc<dyn VolatileStore> = Arc::new(redis_utils::RedisStore::new(redis_pool.manager()));

    let codec = Arc::new(jwt_security::CredentialCodec::from_env()?);
    let access_ttl = config.jwt.access_ttl();

    let registry = CredentialRegistry::new(pool.clone(), store.clone());
    let profiles = ProfileCache::new(pool.clone(), store.clone());

    let login = LoginCoordinator::new(
        pool.clone(),
        store.clone(),
        codec.clone(),
        registry.clone(),
        profiles.clone(),
        config.password.max_failed_attempts,
        config.password.lockout(),
        access_ttl,
    );
    let refresh = RefreshCoordinator::new(pool.clone(), codec.clone(), registry.clone(), profiles.clone(), access_ttl);
    let logout = LogoutCoordinator::new(codec.clone(), registry.clone());

    let app_state = web::Data::new(AppState {
        pool: pool.clone(),
        store: store.clone(),
        codec: codec.clone(),
        registry,
        profiles,
        login,
        refresh,
        logout,
        access_ttl,
    });

    let verification_gate = web::Data::new(actix_middleware::VerificationGate::new(codec, store.clone()));
    let trusted = actix_middleware::TrustedProxies::from_env();
    let trusted_proxies = web::Data::new(trusted.clone());
    let rate_limiter = actix_middleware::RateLimitMiddleware::new(store, actix_middleware::RouteBuckets::default(), trusted);
    let backpressure = actix_middleware::Backpressure::new(config.backpressure.clone());

    auth_service::db::cache_repo::spawn_cleanup_task(pool.clone(), std::time::Duration::from_secs(3600));

    let host = config.server_host.clone();
    let port = config.server_port;
    tracing::info!(%host, port, "listening");

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(verification_gate.clone())
            .app_data(trusted_proxies.clone())
            // actix-web runs `.wrap()` layers in reverse registration order —
            // the last one registered is outermost and sees the request
            // first. Registering rate-limit/backpressure first puts them
            // innermost so a 429/503 shed response still passes back out
            // through CorrelationId/Logging/Metrics (§11: every response,
            // including shed ones, gets observability).
            .wrap(rate_limiter.clone())
            .wrap(backpressure.clone())
            .wrap(actix_middleware::MetricsMiddleware)
            .wrap(actix_middleware::Logging)
            .wrap(actix_middleware::CorrelationIdMiddleware)
            .route("/health", web::get().to(handlers::health))
            .route("/metrics", web::get().to(metrics::metrics_handler))
            .route("/.well-known/jwks.json", web::get().to(handlers::jwks))
            .service(
                web::scope("/api/v1/auth")
                    .route("/login", web::post().to(handlers::login))
                    .route("/refresh", web::post().to(handlers::refresh))
                    .route("/logout", web::post().to(handlers::logout))
                    .route("/verify", web::post().to(handlers::verify))
                    .route("/introspect", web::post().to(handlers::introspect))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions", web::delete().to(handlers::revoke_all_sessions)),
            )
    })
    .bind((host.as_str(), port))?
    .run()
    .await?;

    Ok(())
}
