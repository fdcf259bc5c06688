use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use hearth_core::confidence::{ConfidenceBreakdown, ConfidenceSummary};
use hearth_core::error::ApiError;
use hearth_core::seasonal::WeatherOutlook;
use hearth_core::systems::{HomeEventKind, HomeSystem, SystemKind};

use crate::auth::{
    AuthenticatedUser, SCOPE_EVIDENCE_WRITE, SCOPE_HOMES_READ, SCOPE_HOMES_WRITE, require_scopes,
};
use crate::error::AppError;
use crate::extract::{AppJson, AppPath};
use crate::snapshot::{HOME_COLUMNS, Home, load_home, load_snapshot};
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/homes", get(list_homes))
        .route("/v1/homes/{home_id}/confidence", get(get_confidence))
}

pub fn write_router() -> Router<AppState> {
    Router::new()
        .route("/v1/homes", post(create_home))
        .route("/v1/homes/{home_id}/events", post(record_event))
        .route("/v1/homes/{home_id}/assets", post(record_asset))
        .route("/v1/homes/{home_id}/outlook", put(update_outlook))
}

const EARLIEST_YEAR_BUILT: i32 = 1600;

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct CreateHomeRequest {
    pub address: String,
    /// Two-letter US state code, used for hurricane exposure
    #[serde(default)]
    pub state_code: Option<String>,
    /// IANA timezone name (default `UTC`)
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub year_built: Option<i32>,
    /// 0..=1 (default 0.5)
    #[serde(default)]
    pub climate_stress_index: Option<f64>,
    /// Dollar score above which interventions open (default from server config)
    #[serde(default)]
    pub intervention_threshold: Option<f64>,
}

#[derive(Serialize, ToSchema)]
pub struct HomeWithSystems {
    pub home: Home,
    pub systems: Vec<HomeSystem>,
}

#[derive(Serialize, ToSchema)]
pub struct HomeConfidenceResponse {
    pub home_id: Uuid,
    /// 30..=85
    pub score: u32,
    pub summary: ConfidenceSummary,
    pub label: String,
    pub breakdown: ConfidenceBreakdown,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RecordEventRequest {
    /// Omit for home-wide events
    #[serde(default)]
    pub system_kind: Option<SystemKind>,
    pub kind: HomeEventKind,
    /// Defaults to now; future timestamps are rejected
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, ToSchema)]
pub struct HomeEventResponse {
    pub id: Uuid,
    pub home_id: Uuid,
    pub system_kind: Option<SystemKind>,
    pub kind: HomeEventKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RecordAssetRequest {
    pub system_kind: SystemKind,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub has_photo: bool,
}

#[derive(Serialize, ToSchema)]
pub struct HomeAssetResponse {
    pub id: Uuid,
    pub home_id: Uuid,
    pub system_kind: SystemKind,
    pub material: Option<String>,
    pub has_photo: bool,
}

fn validation(field: &str, message: impl Into<String>, received: serde_json::Value) -> AppError {
    AppError::Validation {
        message: message.into(),
        field: Some(field.to_string()),
        received: Some(received),
        docs_hint: None,
    }
}

fn validate_create_home(req: &CreateHomeRequest, current_year: i32) -> Result<(), AppError> {
    if req.address.trim().is_empty() {
        return Err(validation("address", "address must not be empty", serde_json::json!(req.address)));
    }
    if let Some(code) = &req.state_code {
        let code = code.trim();
        if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(validation(
                "state_code",
                "state_code must be a two-letter code",
                serde_json::json!(code),
            ));
        }
    }
    if let Some(tz) = &req.timezone {
        if tz.parse::<Tz>().is_err() {
            return Err(AppError::Validation {
                message: format!("unknown timezone '{tz}'"),
                field: Some("timezone".to_string()),
                received: Some(serde_json::json!(tz)),
                docs_hint: Some("Use an IANA name such as 'America/Chicago'.".to_string()),
            });
        }
    }
    if let Some(year) = req.year_built {
        if !(EARLIEST_YEAR_BUILT..=current_year).contains(&year) {
            return Err(validation(
                "year_built",
                format!("year_built must be between {EARLIEST_YEAR_BUILT} and {current_year}"),
                serde_json::json!(year),
            ));
        }
    }
    if let Some(index) = req.climate_stress_index {
        if !(0.0..=1.0).contains(&index) {
            return Err(validation(
                "climate_stress_index",
                "climate_stress_index must be within 0..=1",
                serde_json::json!(index),
            ));
        }
    }
    if let Some(threshold) = req.intervention_threshold {
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(validation(
                "intervention_threshold",
                "intervention_threshold must be a non-negative amount",
                serde_json::json!(threshold),
            ));
        }
    }
    Ok(())
}

/// Onboard a home
///
/// Creates the home and one active system per kind. Systems in a home younger
/// than their typical lifespan are assumed original (`inferred`); the rest
/// start as `unknown`.
#[utoipa::path(
    post,
    path = "/v1/homes",
    request_body = CreateHomeRequest,
    responses(
        (status = 201, description = "Home created", body = HomeWithSystems),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "homes"
)]
pub async fn create_home(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppJson(req): AppJson<CreateHomeRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_WRITE], "create home")?;
    let now = Utc::now();
    validate_create_home(&req, now.year())?;

    let home_id = Uuid::now_v7();
    let mut tx = state.db.begin().await?;

    let home = sqlx::query_as::<_, Home>(&format!(
        "INSERT INTO homes (id, user_id, address, state_code, timezone, year_built, \
             climate_stress_index, intervention_threshold, last_interaction_at, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9) \
         RETURNING {HOME_COLUMNS}"
    ))
    .bind(home_id)
    .bind(auth.user_id)
    .bind(req.address.trim())
    .bind(req.state_code.as_deref().map(|c| c.trim().to_uppercase()))
    .bind(req.timezone.as_deref().unwrap_or("UTC"))
    .bind(req.year_built)
    .bind(req.climate_stress_index.unwrap_or(0.5))
    .bind(req.intervention_threshold)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    let mut systems = Vec::with_capacity(SystemKind::ALL.len());
    for kind in SystemKind::ALL {
        let system = HomeSystem::onboarding_default(home_id, kind, req.year_built, now);
        insert_system(&mut tx, &system).await?;
        systems.push(system);
    }

    tx.commit().await?;

    tracing::info!(
        user_id = %auth.user_id,
        home_id = %home_id,
        year_built = ?req.year_built,
        "home onboarded"
    );

    Ok((StatusCode::CREATED, Json(HomeWithSystems { home, systems })))
}

pub(crate) async fn insert_system(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    system: &HomeSystem,
) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO home_systems \
             (id, home_id, kind, install_year, install_source, confidence, material, status, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(system.id)
    .bind(system.home_id)
    .bind(system.kind.as_str())
    .bind(system.install_year)
    .bind(system.install_source.as_str())
    .bind(system.confidence)
    .bind(system.material.as_deref())
    .bind(system.status.as_str())
    .bind(system.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// List the caller's homes
#[utoipa::path(
    get,
    path = "/v1/homes",
    responses(
        (status = 200, description = "Homes owned by the caller", body = Vec<Home>),
        (status = 401, description = "Unauthorized", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "homes"
)]
pub async fn list_homes(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
) -> Result<Json<Vec<Home>>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_READ], "list homes")?;
    let homes = sqlx::query_as::<_, Home>(&format!(
        "SELECT {HOME_COLUMNS} FROM homes WHERE user_id = $1 ORDER BY created_at"
    ))
    .bind(auth.user_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(homes))
}

/// Home confidence score
///
/// Recomputed from current evidence on every call. The stored
/// `confidence_score` column is refreshed as a side effect.
#[utoipa::path(
    get,
    path = "/v1/homes/{home_id}/confidence",
    params(("home_id" = Uuid, Path, description = "Home id")),
    responses(
        (status = 200, description = "Current confidence", body = HomeConfidenceResponse),
        (status = 401, description = "Unauthorized", body = ApiError),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "homes"
)]
pub async fn get_confidence(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
) -> Result<Json<HomeConfidenceResponse>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_READ], "read confidence")?;
    let now = Utc::now();
    let snapshot = load_snapshot(&state.db, auth.user_id, home_id).await?;
    let result = snapshot.confidence(now);

    // Cache only; a failed write does not fail the read.
    if let Err(e) = sqlx::query(
        "UPDATE homes SET confidence_score = $1, confidence_updated_at = $2 WHERE id = $3",
    )
    .bind(result.score as i32)
    .bind(now)
    .bind(home_id)
    .execute(&state.db)
    .await
    {
        tracing::warn!(home_id = %home_id, error = %e, "failed to cache confidence score");
    }

    Ok(Json(HomeConfidenceResponse {
        home_id,
        score: result.score,
        summary: result.summary,
        label: result.summary.label().to_string(),
        breakdown: result.breakdown,
        computed_at: now,
    }))
}

async fn touch_interaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    home_id: Uuid,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    sqlx::query("UPDATE homes SET last_interaction_at = $1 WHERE id = $2")
        .bind(now)
        .bind(home_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Record home activity
///
/// Maintenance, repairs, inspections, uploads, confirmations and anomaly
/// reports. These feed confidence, maintenance score and system state.
#[utoipa::path(
    post,
    path = "/v1/homes/{home_id}/events",
    params(("home_id" = Uuid, Path, description = "Home id")),
    request_body = RecordEventRequest,
    responses(
        (status = 201, description = "Event recorded", body = HomeEventResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "homes"
)]
pub async fn record_event(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
    AppJson(req): AppJson<RecordEventRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_WRITE], "record event")?;
    let now = Utc::now();
    let occurred_at = req.occurred_at.unwrap_or(now);
    if occurred_at > now {
        return Err(validation(
            "occurred_at",
            "occurred_at must not be in the future",
            serde_json::json!(occurred_at),
        ));
    }
    load_home(&state.db, auth.user_id, home_id).await?;

    let id = Uuid::now_v7();
    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO home_events (id, home_id, system_kind, kind, occurred_at) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(home_id)
    .bind(req.system_kind.map(SystemKind::as_str))
    .bind(req.kind.as_str())
    .bind(occurred_at)
    .execute(&mut *tx)
    .await?;
    touch_interaction(&mut tx, home_id, now).await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(HomeEventResponse {
            id,
            home_id,
            system_kind: req.system_kind,
            kind: req.kind,
            occurred_at,
        }),
    ))
}

/// Attach a documented asset to a system
#[utoipa::path(
    post,
    path = "/v1/homes/{home_id}/assets",
    params(("home_id" = Uuid, Path, description = "Home id")),
    request_body = RecordAssetRequest,
    responses(
        (status = 201, description = "Asset recorded", body = HomeAssetResponse),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "homes"
)]
pub async fn record_asset(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
    AppJson(req): AppJson<RecordAssetRequest>,
) -> Result<impl IntoResponse, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_WRITE], "record asset")?;
    let now = Utc::now();
    load_home(&state.db, auth.user_id, home_id).await?;

    let material = req
        .material
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string);

    let id = Uuid::now_v7();
    let mut tx = state.db.begin().await?;
    sqlx::query(
        "INSERT INTO home_assets (id, home_id, system_kind, material, has_photo) \
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(id)
    .bind(home_id)
    .bind(req.system_kind.as_str())
    .bind(material.as_deref())
    .bind(req.has_photo)
    .execute(&mut *tx)
    .await?;
    touch_interaction(&mut tx, home_id, now).await?;
    tx.commit().await?;

    Ok((
        StatusCode::CREATED,
        Json(HomeAssetResponse {
            id,
            home_id,
            system_kind: req.system_kind,
            material,
            has_photo: req.has_photo,
        }),
    ))
}

/// Store the short-range weather outlook
///
/// Written by the weather job. Freeze and heat-wave flags for intervention
/// scoring are derived from these extremes.
#[utoipa::path(
    put,
    path = "/v1/homes/{home_id}/outlook",
    params(("home_id" = Uuid, Path, description = "Home id")),
    request_body = WeatherOutlook,
    responses(
        (status = 200, description = "Outlook stored", body = Home),
        (status = 403, description = "Missing evidence:write scope", body = ApiError),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "homes"
)]
pub async fn update_outlook(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
    AppJson(outlook): AppJson<WeatherOutlook>,
) -> Result<Json<Home>, AppError> {
    require_scopes(&auth, &[SCOPE_EVIDENCE_WRITE], "update outlook")?;
    if let (Some(low), Some(high)) = (outlook.forecast_low_c, outlook.forecast_high_c) {
        if low > high {
            return Err(validation(
                "forecast_low_c",
                "forecast_low_c must not exceed forecast_high_c",
                serde_json::json!(low),
            ));
        }
    }

    let home = sqlx::query_as::<_, Home>(&format!(
        "UPDATE homes SET forecast_low_c = $1, forecast_high_c = $2 \
         WHERE id = $3 AND user_id = $4 \
         RETURNING {HOME_COLUMNS}"
    ))
    .bind(outlook.forecast_low_c)
    .bind(outlook.forecast_high_c)
    .bind(home_id)
    .bind(auth.user_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound {
        resource: format!("home {home_id}"),
    })?;

    Ok(Json(home))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CreateHomeRequest {
        CreateHomeRequest {
            address: "12 Elm St, Tampa".to_string(),
            state_code: Some("fl".to_string()),
            timezone: Some("America/New_York".to_string()),
            year_built: Some(2005),
            climate_stress_index: Some(0.8),
            intervention_threshold: None,
        }
    }

    fn rejected_field(result: Result<(), AppError>) -> Option<String> {
        match result {
            Err(AppError::Validation { field, .. }) => field,
            _ => None,
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_create_home(&request(), 2025).is_ok());
    }

    #[test]
    fn rejects_bad_fields() {
        let mut req = request();
        req.address = "  ".to_string();
        assert_eq!(rejected_field(validate_create_home(&req, 2025)).as_deref(), Some("address"));

        let mut req = request();
        req.timezone = Some("Mars/Olympus".to_string());
        assert_eq!(rejected_field(validate_create_home(&req, 2025)).as_deref(), Some("timezone"));

        let mut req = request();
        req.year_built = Some(2030);
        assert_eq!(rejected_field(validate_create_home(&req, 2025)).as_deref(), Some("year_built"));

        let mut req = request();
        req.climate_stress_index = Some(1.4);
        assert_eq!(
            rejected_field(validate_create_home(&req, 2025)).as_deref(),
            Some("climate_stress_index")
        );

        let mut req = request();
        req.state_code = Some("Florida".to_string());
        assert_eq!(rejected_field(validate_create_home(&req, 2025)).as_deref(), Some("state_code"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_value::<CreateHomeRequest>(serde_json::json!({
            "address": "1 Main St",
            "bedrooms": 3
        }));
        assert!(parsed.is_err());
    }
}
