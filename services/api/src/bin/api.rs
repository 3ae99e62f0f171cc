//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, HttpAnnotationAdapter, OpenAiAnnotationAdapter, OpenAiSttAdapter},
    config::Config,
    error::ApiError,
    web::{
        archive_subject_handler,
        auth::{login_handler, logout_handler, signup_handler},
        clear_draft_handler, create_subject_handler, get_draft_handler, get_subject_handler,
        require_auth,
        rest::ApiDoc,
        state::AppState,
        update_subject_handler, ws_handler,
    },
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use dictanote_core::{
    crypto::KeyDeriver,
    pipeline::GenerationOrchestrator,
    ports::AnnotationService,
    pseudonym::Pseudonymizer,
    subjects::SubjectVault,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
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
    info!(config = ?config, "Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db_adapter = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db_adapter.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);

    let stt_adapter = Arc::new(OpenAiSttAdapter::new(
        openai_client.clone(),
        config.stt_model.clone(),
        config.audio_sample_rate,
    ));

    let primary: Arc<dyn AnnotationService> = match &config.primary_generation_url {
        Some(url) => {
            info!("Primary generation backend: annotation service at {}", url);
            Arc::new(HttpAnnotationAdapter::new(
                url.clone(),
                config.generation_api_token.clone(),
                config.primary_timeout,
            ))
        }
        None => {
            info!("Primary generation backend: {}", config.primary_model);
            Arc::new(OpenAiAnnotationAdapter::new(
                openai_client.clone(),
                config.primary_model.clone(),
                "primary-llm",
            ))
        }
    };
    let fallback = Arc::new(OpenAiAnnotationAdapter::new(
        openai_client,
        config.fallback_model.clone(),
        "fallback-llm",
    ));

    let keys = match &config.key_salt {
        Some(salt) => KeyDeriver::new(salt.as_bytes().to_vec()),
        None => KeyDeriver::default(),
    };

    let orchestrator = Arc::new(GenerationOrchestrator::new(
        stt_adapter,
        primary,
        fallback,
        Pseudonymizer::new(config.pipeline_version.clone()),
        config.pipeline_policy(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        db: db_adapter.clone(),
        draft_storage: db_adapter.clone(),
        config: config.clone(),
        orchestrator,
        vault: Arc::new(SubjectVault::new(db_adapter, keys.clone())),
        keys,
    });

    // --- 5. Create the Web Router ---
    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    // Public routes (no auth required)
    let public_routes = Router::new()
        .route("/auth/signup", post(signup_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/logout", post(logout_handler));

    // Protected routes (auth required)
    let protected_routes = Router::new()
        .route("/subjects", post(create_subject_handler))
        .route(
            "/subjects/{id}",
            get(get_subject_handler)
                .put(update_subject_handler)
                .delete(archive_subject_handler),
        )
        .route("/drafts", get(get_draft_handler).delete(clear_draft_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn_with_state(
            app_state.clone(),
            require_auth,
        ));

    let api_router = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .with_state(app_state);

    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
