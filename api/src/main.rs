use std::net::SocketAddr;

use axum::Router;
use sqlx::postgres::PgPoolOptions;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod auth;
mod error;
mod extract;
mod middleware;
mod routes;
mod snapshot;
mod state;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Hearth API",
        version = "0.1.0",
        description = "Home-system confidence, failure forecasts, recommendations, chat-mode routing and intervention decisions."
    ),
    paths(
        routes::health::health_check,
        routes::homes::create_home,
        routes::homes::list_homes,
        routes::homes::get_confidence,
        routes::homes::record_event,
        routes::homes::record_asset,
        routes::homes::update_outlook,
        routes::systems::list_systems,
        routes::systems::update_install,
        routes::systems::get_forecast,
        routes::recommendations::list_recommendations,
        routes::chat_mode::get_chat_mode,
        routes::chat_mode::post_message,
        routes::interventions::evaluate_interventions,
        routes::interventions::list_interventions,
        routes::interventions::record_decision,
    ),
    components(schemas(
        hearth_core::error::ApiError,
        hearth_core::systems::SystemKind,
        hearth_core::systems::InstallSource,
        hearth_core::systems::SystemStatus,
        hearth_core::systems::HomeSystem,
        hearth_core::systems::UpdateOrigin,
        hearth_core::systems::UpdateOutcome,
        hearth_core::systems::HomeEventKind,
        hearth_core::confidence::SystemSignals,
        hearth_core::confidence::ConfidenceSummary,
        hearth_core::confidence::ConfidenceBreakdown,
        hearth_core::failure::SurvivalEstimate,
        hearth_core::failure::Provenance,
        hearth_core::failure::Multipliers,
        hearth_core::failure::BaselineParams,
        hearth_core::failure::EffectiveParams,
        hearth_core::seasonal::WeatherOutlook,
        hearth_core::seasonal::SeasonalRiskContext,
        hearth_core::seasonal::SeasonalFactor,
        hearth_core::recommendations::Recommendation,
        hearth_core::recommendations::RecommendationType,
        hearth_core::chat_mode::ChatMode,
        hearth_core::chat_mode::SystemState,
        hearth_core::chat_mode::SystemSnapshot,
        hearth_core::chat_mode::ChatModeContext,
        hearth_core::chat_mode::ChatModeSession,
        hearth_core::intervention::Intervention,
        hearth_core::intervention::InterventionStatus,
        hearth_core::intervention::InterventionEvaluation,
        hearth_core::intervention::BlockReason,
        hearth_core::intervention::CloseReason,
        hearth_core::intervention::Decision,
        routes::health::HealthResponse,
        snapshot::Home,
        routes::homes::CreateHomeRequest,
        routes::homes::HomeWithSystems,
        routes::homes::HomeConfidenceResponse,
        routes::homes::RecordEventRequest,
        routes::homes::HomeEventResponse,
        routes::homes::RecordAssetRequest,
        routes::homes::HomeAssetResponse,
        routes::systems::SystemView,
        routes::systems::InstallUpdateRequest,
        routes::systems::InstallUpdateResponse,
        routes::systems::ForecastResponse,
        routes::recommendations::RecommendationsResponse,
        routes::chat_mode::ChatModeResponse,
        routes::chat_mode::ChatMessageRequest,
        routes::chat_mode::ChatMessageResponse,
        routes::interventions::EvaluateResponse,
    )),
    modifiers(&SecurityAddon)
)]
struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            utoipa::openapi::security::SecurityScheme::Http(
                utoipa::openapi::security::Http::new(
                    utoipa::openapi::security::HttpAuthScheme::Bearer,
                ),
            ),
        );
    }
}

fn app(app_state: state::AppState) -> Router {
    use middleware::rate_limit::{evaluate_layer, read_layer, write_layer};

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::homes::read_router().layer(read_layer()))
        .merge(routes::homes::write_router().layer(write_layer()))
        .merge(routes::systems::read_router().layer(read_layer()))
        .merge(routes::systems::write_router().layer(write_layer()))
        .merge(routes::recommendations::router().layer(read_layer()))
        .merge(routes::chat_mode::read_router().layer(read_layer()))
        .merge(routes::chat_mode::write_router().layer(write_layer()))
        .merge(routes::interventions::read_router().layer(read_layer()))
        .merge(routes::interventions::write_router().layer(write_layer()))
        .merge(routes::interventions::evaluate_router().layer(evaluate_layer()))
        .layer(auth::InjectAuthLayer::new(app_state.db.clone()))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(app_state)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hearth_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set")?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await?;

    sqlx::migrate!("../migrations").run(&pool).await?;

    let policy = state::intervention_policy_from_env();
    tracing::info!(
        cooldown_days = policy.cooldown_days,
        timeout_days = policy.timeout_days,
        default_threshold = policy.default_threshold,
        "intervention policy loaded"
    );

    let app = app(state::AppState { db: pool, policy });

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(3000);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Hearth API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
