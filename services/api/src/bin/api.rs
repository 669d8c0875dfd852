//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{assets::UPLOADS_ROUTE, DbAdapter, FirebaseVerifier, FsAssetGateway},
    config::Config,
    error::ApiError,
    web::{create_router, rest::ApiDoc, AppState, SessionSigner},
};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::Router;
use ebook_hub_core::{IdentityResolver, LibraryService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Prepare the Schema ---
    // Lazy, so an unreachable database does not stop the server from starting.
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_lazy(&config.database_url)?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Preparing database schema...");
    if !db_adapter
        .initialize_with_retry(config.db_init_attempts, config.db_init_delay)
        .await
    {
        warn!("Serving without a confirmed schema; store calls may fail.");
    }

    // --- 3. Initialize Service Adapters ---
    let assets = Arc::new(
        FsAssetGateway::new(config.uploads_path.clone(), &config.public_base_url).await?,
    );
    let verifier = Arc::new(FirebaseVerifier::new(config.firebase_api_key.clone())?);

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        library: Arc::new(LibraryService::new(db_adapter.clone(), assets.clone())),
        identity: Arc::new(IdentityResolver::new(
            config.admin.clone(),
            verifier,
            db_adapter,
        )),
        sessions: Arc::new(SessionSigner::new(
            &config.jwt_key,
            &config.jwt_issuer,
            &config.jwt_audience,
            config.session_ttl,
        )),
    });

    // --- 5. Configure CORS ---
    let origins = config
        .allowed_origins
        .iter()
        .map(|origin| {
            origin.parse::<HeaderValue>().map_err(|e| {
                ApiError::Internal(format!("Invalid origin '{}' in ALLOWED_ORIGINS: {}", origin, e))
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // --- 6. Create the Web Router ---
    let app = Router::new()
        .merge(create_router(app_state))
        .nest_service(UPLOADS_ROUTE, ServeDir::new(assets.root()))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
