use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use hearth_core::chat_mode::{SystemState, derive_system_state};
use hearth_core::confidence::SystemSignals;
use hearth_core::error::ApiError;
use hearth_core::failure::{SurvivalEstimate, failure_probability_within};
use hearth_core::intervention::RISK_OUTLOOK_YEARS;
use hearth_core::systems::{
    HomeSystem, InstallSource, InstallUpdate, SystemKind, UpdateOrigin, UpdateOutcome,
};

use crate::auth::{
    AuthenticatedUser, SCOPE_EVIDENCE_WRITE, SCOPE_HOMES_READ, SCOPE_HOMES_WRITE, require_scopes,
};
use crate::error::{AppError, parse_path_tag};
use crate::extract::{AppJson, AppPath};
use crate::routes::homes::insert_system;
use crate::snapshot::{SYSTEM_COLUMNS, SystemRow, load_home, load_snapshot};
use crate::state::AppState;

pub fn read_router() -> Router<AppState> {
    Router::new()
        .route("/v1/homes/{home_id}/systems", get(list_systems))
        .route(
            "/v1/homes/{home_id}/systems/{kind}/forecast",
            get(get_forecast),
        )
}

pub fn write_router() -> Router<AppState> {
    Router::new().route(
        "/v1/homes/{home_id}/systems/{kind}/install",
        post(update_install),
    )
}

#[derive(Serialize, ToSchema)]
pub struct SystemView {
    pub system: HomeSystem,
    pub signals: SystemSignals,
    pub state: SystemState,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct InstallUpdateRequest {
    /// `null` clears the year (user corrections only)
    #[serde(default)]
    pub install_year: Option<i32>,
    pub source: InstallSource,
    #[serde(default)]
    pub material: Option<String>,
    /// `user_correction` (default) or `evidence`
    #[serde(default = "default_origin")]
    pub origin: UpdateOrigin,
    /// The system was physically replaced: supersede the current record
    #[serde(default)]
    pub replaced: bool,
}

fn default_origin() -> UpdateOrigin {
    UpdateOrigin::UserCorrection
}

impl InstallUpdateRequest {
    fn update(&self) -> InstallUpdate {
        InstallUpdate {
            install_year: self.install_year,
            source: self.source,
            material: self.material.clone(),
            origin: self.origin,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct InstallUpdateResponse {
    pub system: HomeSystem,
    pub outcome: UpdateOutcome,
    /// Id of the record this one replaced, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub superseded_id: Option<Uuid>,
}

#[derive(Serialize, ToSchema)]
pub struct ForecastResponse {
    pub home_id: Uuid,
    #[serde(flatten)]
    pub estimate: SurvivalEstimate,
    /// Probability of failure within the next 12 months, given survival so far
    pub failure_probability_12m: f64,
}

fn validate_install_update(req: &InstallUpdateRequest, current_year: i32) -> Result<(), AppError> {
    if let Some(year) = req.install_year {
        if !(1600..=current_year).contains(&year) {
            return Err(AppError::Validation {
                message: format!("install_year must be between 1600 and {current_year}"),
                field: Some("install_year".to_string()),
                received: Some(serde_json::json!(year)),
                docs_hint: None,
            });
        }
    }
    if req.replaced && req.origin == UpdateOrigin::Evidence {
        return Err(AppError::Validation {
            message: "only the homeowner can report a replacement".to_string(),
            field: Some("replaced".to_string()),
            received: Some(serde_json::json!(true)),
            docs_hint: Some("Send origin 'user_correction' with replaced=true.".to_string()),
        });
    }
    Ok(())
}

/// List active systems
#[utoipa::path(
    get,
    path = "/v1/homes/{home_id}/systems",
    params(("home_id" = Uuid, Path, description = "Home id")),
    responses(
        (status = 200, description = "Active systems with evidence and state", body = Vec<SystemView>),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "systems"
)]
pub async fn list_systems(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
) -> Result<Json<Vec<SystemView>>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_READ], "list systems")?;
    let now = Utc::now();
    let snapshot = load_snapshot(&state.db, auth.user_id, home_id).await?;

    let views = snapshot
        .systems
        .iter()
        .zip(snapshot.state_inputs(now))
        .map(|(system, input)| SystemView {
            signals: snapshot.signals(system),
            state: derive_system_state(&input),
            system: system.clone(),
        })
        .collect();
    Ok(Json(views))
}

/// Update install data
///
/// Evidence updates never lower the install-source tier; a lower-tier
/// evidence update is reported as `ignored` and changes nothing. Homeowner
/// corrections always apply.
#[utoipa::path(
    post,
    path = "/v1/homes/{home_id}/systems/{kind}/install",
    params(
        ("home_id" = Uuid, Path, description = "Home id"),
        ("kind" = SystemKind, Path, description = "System kind")
    ),
    request_body = InstallUpdateRequest,
    responses(
        (status = 200, description = "Update applied or ignored", body = InstallUpdateResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 403, description = "Evidence updates need evidence:write", body = ApiError),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "systems"
)]
pub async fn update_install(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath((home_id, kind)): AppPath<(Uuid, String)>,
    AppJson(req): AppJson<InstallUpdateRequest>,
) -> Result<Json<InstallUpdateResponse>, AppError> {
    let kind: SystemKind = parse_path_tag(&kind, "kind")?;
    let required = match req.origin {
        UpdateOrigin::UserCorrection => SCOPE_HOMES_WRITE,
        UpdateOrigin::Evidence => SCOPE_EVIDENCE_WRITE,
    };
    require_scopes(&auth, &[required], "update system install")?;

    let now = Utc::now();
    validate_install_update(&req, now.year())?;
    let home = load_home(&state.db, auth.user_id, home_id).await?;
    let update = req.update();

    let mut tx = state.db.begin().await?;
    let current = sqlx::query_as::<_, SystemRow>(&format!(
        "SELECT {SYSTEM_COLUMNS} FROM home_systems \
         WHERE home_id = $1 AND kind = $2 AND status = 'active' \
         FOR UPDATE"
    ))
    .bind(home_id)
    .bind(kind.as_str())
    .fetch_optional(&mut *tx)
    .await?;

    let mut system = match current {
        Some(row) => row.into_system()?.0,
        None => {
            let system = HomeSystem::onboarding_default(home_id, kind, home.year_built, now);
            insert_system(&mut tx, &system).await?;
            system
        }
    };

    let previous_source = system.install_source;
    let (system, outcome, superseded_id) = if req.replaced {
        let replacement = system.replace_with(&update, now);
        sqlx::query("UPDATE home_systems SET status = $1, updated_at = $2 WHERE id = $3")
            .bind(system.status.as_str())
            .bind(now)
            .bind(system.id)
            .execute(&mut *tx)
            .await?;
        insert_system(&mut tx, &replacement).await?;
        (
            replacement,
            UpdateOutcome::Applied { previous_source },
            Some(system.id),
        )
    } else {
        let outcome = system.apply_install_update(&update, now);
        if let UpdateOutcome::Applied { .. } = outcome {
            sqlx::query(
                "UPDATE home_systems SET install_year = $1, install_source = $2, \
                     confidence = $3, material = $4, updated_at = $5 \
                 WHERE id = $6",
            )
            .bind(system.install_year)
            .bind(system.install_source.as_str())
            .bind(system.confidence)
            .bind(system.material.as_deref())
            .bind(system.updated_at)
            .bind(system.id)
            .execute(&mut *tx)
            .await?;
        }
        (system, outcome, None)
    };

    if update.origin == UpdateOrigin::UserCorrection {
        sqlx::query("UPDATE homes SET last_interaction_at = $1 WHERE id = $2")
            .bind(now)
            .bind(home_id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    match outcome {
        UpdateOutcome::Applied { previous_source } => tracing::info!(
            home_id = %home_id,
            system_kind = kind.as_str(),
            origin = ?update.origin,
            previous_source = previous_source.as_str(),
            new_source = system.install_source.as_str(),
            replaced = superseded_id.is_some(),
            "install update applied"
        ),
        UpdateOutcome::Ignored {
            current_source,
            offered_source,
        } => tracing::info!(
            home_id = %home_id,
            system_kind = kind.as_str(),
            current_source = current_source.as_str(),
            offered_source = offered_source.as_str(),
            "lower-tier evidence ignored"
        ),
    }

    Ok(Json(InstallUpdateResponse {
        system,
        outcome,
        superseded_id,
    }))
}

/// Failure forecast for one system
///
/// p10/p50/p90 failure dates, years remaining, model confidence and the
/// multipliers behind them. Dates are never before today.
#[utoipa::path(
    get,
    path = "/v1/homes/{home_id}/systems/{kind}/forecast",
    params(
        ("home_id" = Uuid, Path, description = "Home id"),
        ("kind" = SystemKind, Path, description = "System kind")
    ),
    responses(
        (status = 200, description = "Forecast", body = ForecastResponse),
        (status = 400, description = "Unknown system kind", body = ApiError),
        (status = 404, description = "Home or system not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "systems"
)]
pub async fn get_forecast(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath((home_id, kind)): AppPath<(Uuid, String)>,
) -> Result<Json<ForecastResponse>, AppError> {
    let kind: SystemKind = parse_path_tag(&kind, "kind")?;
    require_scopes(&auth, &[SCOPE_HOMES_READ], "read forecast")?;
    let now = Utc::now();
    let snapshot = load_snapshot(&state.db, auth.user_id, home_id).await?;
    let system = snapshot.system(kind).ok_or_else(|| AppError::NotFound {
        resource: format!("{kind} system for home {home_id}"),
    })?;

    let estimate = snapshot.forecast(system, now);
    let failure_probability_12m = failure_probability_within(&estimate, RISK_OUTLOOK_YEARS);
    Ok(Json(ForecastResponse {
        home_id,
        estimate,
        failure_probability_12m,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(json: serde_json::Value) -> InstallUpdateRequest {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn origin_defaults_to_user_correction() {
        let req = request(serde_json::json!({"install_year": 2019, "source": "owner_reported"}));
        assert_eq!(req.origin, UpdateOrigin::UserCorrection);
        assert!(!req.replaced);
        assert!(validate_install_update(&req, 2025).is_ok());
    }

    #[test]
    fn future_install_year_is_rejected() {
        let req = request(serde_json::json!({"install_year": 2031, "source": "permit"}));
        assert!(matches!(
            validate_install_update(&req, 2025),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn evidence_cannot_report_replacement() {
        let req = request(serde_json::json!({
            "install_year": 2024,
            "source": "permit",
            "origin": "evidence",
            "replaced": true
        }));
        assert!(validate_install_update(&req, 2025).is_err());
    }
}
