//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{AlmaClient, DbAdapter},
    config::Config,
    error::ApiError,
    web::{
        availability_handler, calendar_handler, change_state_handler, create_reservation_handler,
        delete_booking_handler, delete_reservation_handler, get_booking_handler, get_reservation_handler,
        middleware::STAFF_HEADER, require_staff, rest::ApiDoc, state::AppState, user_bookings_handler,
    },
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use axum::{
    middleware as axum_middleware,
    routing::{get, post, put},
    Router,
};
use booking_core::ReservationService;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
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

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize the Booking Provider ---
    let alma = AlmaClient::new(config.alma.clone())
        .map_err(|e| ApiError::Internal(format!("Failed to build the Alma client: {}", e)))?;
    info!("Alma client targeting {}", config.alma.base_url);

    // --- 4. Build the Shared AppState ---
    let service = Arc::new(ReservationService::new(db_adapter, Arc::new(alma)));
    let app_state = Arc::new(AppState { service });

    let staff_header = HeaderName::from_static(STAFF_HEADER);
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, staff_header]);
    let cors = match &config.cors_origin {
        Some(origin) => {
            let origin = origin
                .parse::<HeaderValue>()
                .map_err(|e| ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", origin, e)))?;
            cors.allow_origin(origin)
        }
        None => cors.allow_origin(Any),
    };

    // --- 5. Create the Web Router ---
    // Open routes
    let public_routes = Router::new()
        .route("/reservations/{id}", get(get_reservation_handler))
        .route("/bookings/{id}", get(get_booking_handler))
        .route("/availability", post(availability_handler))
        .route("/users/{username}/bookings", get(user_bookings_handler))
        .route("/calendar", get(calendar_handler));

    // Routes that change bookings need a staff member
    let staff_routes = Router::new()
        .route("/reservations", post(create_reservation_handler))
        .route("/reservations/{id}", axum::routing::delete(delete_reservation_handler))
        .route("/bookings/{id}", axum::routing::delete(delete_booking_handler))
        .route("/bookings/{id}/state", put(change_state_handler))
        .layer(axum_middleware::from_fn(require_staff));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(staff_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Could not listen for ctrl-c: {}", e);
                return;
            }
            info!("Shutdown requested, draining connections...");
            shutdown.cancel();
        }
    });

    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped.");
    Ok(())
}
