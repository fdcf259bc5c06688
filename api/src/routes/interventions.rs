use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use hearth_core::error::{ApiError, ParseTagError};
use hearth_core::failure::failure_probability_within;
use hearth_core::intervention::{
    CloseReason, Decision, Intervention, InterventionCandidate, InterventionError,
    InterventionEvaluation, InterventionPolicy, InterventionStatus, RISK_OUTLOOK_YEARS,
    evaluate_intervention, gate_for,
};
use hearth_core::seasonal::{SeasonalRiskContext, local_date};

use crate::auth::{AuthenticatedUser, SCOPE_HOMES_READ, SCOPE_HOMES_WRITE, require_scopes};
use crate::error::AppError;
use crate::extract::{AppJson, AppPath};
use crate::snapshot::{load_home, load_snapshot};
use crate::state::AppState;

type Tx<'a> = sqlx::Transaction<'a, sqlx::Postgres>;

pub fn read_router() -> Router<AppState> {
    Router::new().route("/v1/homes/{home_id}/interventions", get(list_interventions))
}

pub fn write_router() -> Router<AppState> {
    Router::new().route("/v1/interventions/{id}/decision", post(record_decision))
}

pub fn evaluate_router() -> Router<AppState> {
    Router::new().route(
        "/v1/homes/{home_id}/interventions/evaluate",
        post(evaluate_interventions),
    )
}

const INTERVENTION_COLUMNS: &str = "id, home_id, system_kind, status, score, threshold, \
     opened_at, closed_at, close_reason, decision, defer_until, cooldown_until";

#[derive(sqlx::FromRow)]
struct InterventionRow {
    id: Uuid,
    home_id: Uuid,
    system_kind: String,
    status: String,
    score: f64,
    threshold: f64,
    opened_at: DateTime<Utc>,
    closed_at: Option<DateTime<Utc>>,
    close_reason: Option<String>,
    decision: Option<String>,
    defer_until: Option<NaiveDate>,
    cooldown_until: Option<DateTime<Utc>>,
}

impl InterventionRow {
    fn into_intervention(self) -> Result<Intervention, ParseTagError> {
        Ok(Intervention {
            id: self.id,
            home_id: self.home_id,
            system_kind: self.system_kind.parse()?,
            status: self.status.parse()?,
            score: self.score,
            threshold: self.threshold,
            opened_at: self.opened_at,
            closed_at: self.closed_at,
            close_reason: self
                .close_reason
                .as_deref()
                .map(str::parse::<CloseReason>)
                .transpose()?,
            decision: self
                .decision
                .as_deref()
                .map(|tag| Decision::from_parts(tag, self.defer_until))
                .transpose()?,
            cooldown_until: self.cooldown_until,
        })
    }
}

#[derive(Serialize, ToSchema)]
pub struct EvaluateResponse {
    pub home_id: Uuid,
    pub evaluated_at: DateTime<Utc>,
    pub seasonal: SeasonalRiskContext,
    pub evaluations: Vec<InterventionEvaluation>,
    /// Interventions opened by this evaluation
    pub opened: Vec<Intervention>,
    /// Open interventions closed by timeout during this evaluation
    pub expired: Vec<Uuid>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListInterventionsQuery {
    /// `open` or `closed`
    #[serde(default)]
    pub status: Option<String>,
}

async fn load_history(tx: &mut Tx<'_>, home_id: Uuid) -> Result<Vec<Intervention>, AppError> {
    let rows = sqlx::query_as::<_, InterventionRow>(&format!(
        "SELECT {INTERVENTION_COLUMNS} FROM interventions \
         WHERE home_id = $1 ORDER BY opened_at DESC FOR UPDATE"
    ))
    .bind(home_id)
    .fetch_all(&mut **tx)
    .await?;
    rows.into_iter()
        .map(|row| row.into_intervention().map_err(AppError::from))
        .collect()
}

async fn persist_closure(tx: &mut Tx<'_>, intervention: &Intervention) -> Result<(), AppError> {
    sqlx::query(
        "UPDATE interventions SET status = $1, closed_at = $2, close_reason = $3, \
             decision = $4, defer_until = $5, cooldown_until = $6 \
         WHERE id = $7",
    )
    .bind(intervention.status.as_str())
    .bind(intervention.closed_at)
    .bind(intervention.close_reason.map(|r| r.as_str()))
    .bind(intervention.decision.map(|d| d.as_str()))
    .bind(intervention.decision.and_then(Decision::defer_until))
    .bind(intervention.cooldown_until)
    .bind(intervention.id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Close every unanswered intervention past its timeout. Returns the ids closed.
async fn expire_due(
    tx: &mut Tx<'_>,
    history: &mut [Intervention],
    policy: &InterventionPolicy,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, AppError> {
    let mut expired = Vec::new();
    for intervention in history.iter_mut() {
        if intervention.expire_if_due(policy, now) {
            persist_closure(tx, intervention).await?;
            tracing::info!(
                intervention_id = %intervention.id,
                home_id = %intervention.home_id,
                system_kind = intervention.system_kind.as_str(),
                close_reason = "timeout",
                "intervention closed"
            );
            expired.push(intervention.id);
        }
    }
    Ok(expired)
}

/// Evaluate every system and open eligible interventions
///
/// An intervention opens only when the score clears the home threshold, the
/// system is out of cooldown and it has no open intervention.
#[utoipa::path(
    post,
    path = "/v1/homes/{home_id}/interventions/evaluate",
    params(("home_id" = Uuid, Path, description = "Home id")),
    responses(
        (status = 200, description = "Evaluations and any interventions opened", body = EvaluateResponse),
        (status = 404, description = "Home not found", body = ApiError),
        (status = 429, description = "Rate limited", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "interventions"
)]
pub async fn evaluate_interventions(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
) -> Result<Json<EvaluateResponse>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_WRITE], "evaluate interventions")?;
    let now = Utc::now();
    let policy = state.policy;
    let snapshot = load_snapshot(&state.db, auth.user_id, home_id).await?;
    let home = &snapshot.home;

    let seasonal = SeasonalRiskContext::derive(
        home.state_code.as_deref(),
        local_date(now, &home.timezone),
        &home.weather(),
    );
    let threshold = home
        .intervention_threshold
        .unwrap_or(policy.default_threshold);

    let mut tx = state.db.begin().await?;
    let mut history = load_history(&mut tx, home_id).await?;
    let expired = expire_due(&mut tx, &mut history, &policy, now).await?;

    let mut evaluations = Vec::with_capacity(snapshot.systems.len());
    let mut opened = Vec::new();
    for system in &snapshot.systems {
        let estimate = snapshot.forecast(system, now);
        let candidate = InterventionCandidate {
            system_kind: system.kind,
            failure_probability: failure_probability_within(&estimate, RISK_OUTLOOK_YEARS),
            costs: snapshot.impact_cost(system.kind),
            threshold,
            seasonal,
        };
        let evaluation = evaluate_intervention(&candidate, gate_for(&history, system.kind, now));

        if evaluation.eligible {
            let intervention = Intervention::open(home_id, &evaluation, now);
            let inserted = sqlx::query(
                "INSERT INTO interventions (id, home_id, system_kind, status, score, threshold, opened_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7) \
                 ON CONFLICT (home_id, system_kind) WHERE status = 'open' DO NOTHING",
            )
            .bind(intervention.id)
            .bind(home_id)
            .bind(intervention.system_kind.as_str())
            .bind(intervention.status.as_str())
            .bind(intervention.score)
            .bind(intervention.threshold)
            .bind(intervention.opened_at)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if inserted == 1 {
                tracing::info!(
                    intervention_id = %intervention.id,
                    home_id = %home_id,
                    system_kind = intervention.system_kind.as_str(),
                    score = intervention.score,
                    threshold = intervention.threshold,
                    aligned_factors = ?evaluation.aligned_factors,
                    "intervention opened"
                );
                history.push(intervention.clone());
                opened.push(intervention);
            }
        } else {
            tracing::debug!(
                home_id = %home_id,
                system_kind = system.kind.as_str(),
                score = evaluation.score,
                blocked_by = ?evaluation.blocked_by,
                "intervention not opened"
            );
        }
        evaluations.push(evaluation);
    }

    tx.commit().await?;

    Ok(Json(EvaluateResponse {
        home_id,
        evaluated_at: now,
        seasonal,
        evaluations,
        opened,
        expired,
    }))
}

/// List interventions for a home
///
/// Unanswered interventions past their timeout are closed before listing.
#[utoipa::path(
    get,
    path = "/v1/homes/{home_id}/interventions",
    params(
        ("home_id" = Uuid, Path, description = "Home id"),
        ListInterventionsQuery
    ),
    responses(
        (status = 200, description = "Interventions, newest first", body = Vec<Intervention>),
        (status = 400, description = "Unknown status filter", body = ApiError),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "interventions"
)]
pub async fn list_interventions(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
    Query(query): Query<ListInterventionsQuery>,
) -> Result<Json<Vec<Intervention>>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_READ], "list interventions")?;
    let status: Option<InterventionStatus> = query
        .status
        .as_deref()
        .map(|raw| crate::error::parse_path_tag(raw, "status"))
        .transpose()?;
    let now = Utc::now();
    load_home(&state.db, auth.user_id, home_id).await?;

    let mut tx = state.db.begin().await?;
    let mut history = load_history(&mut tx, home_id).await?;
    expire_due(&mut tx, &mut history, &state.policy, now).await?;
    tx.commit().await?;

    history.retain(|i| status.is_none_or(|wanted| i.status == wanted));
    Ok(Json(history))
}

/// Record the homeowner's decision
///
/// Closes the intervention and starts the cooldown. A deferral keeps the
/// system quiet at least until the chosen date.
#[utoipa::path(
    post,
    path = "/v1/interventions/{id}/decision",
    params(("id" = Uuid, Path, description = "Intervention id")),
    request_body = Decision,
    responses(
        (status = 200, description = "Intervention closed", body = Intervention),
        (status = 400, description = "Deferral date not in the future", body = ApiError),
        (status = 404, description = "Intervention not found", body = ApiError),
        (status = 409, description = "Intervention already closed", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "interventions"
)]
pub async fn record_decision(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(id): AppPath<Uuid>,
    AppJson(decision): AppJson<Decision>,
) -> Result<Json<Intervention>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_WRITE], "decide intervention")?;
    let now = Utc::now();

    let mut tx = state.db.begin().await?;
    let row = sqlx::query_as::<_, InterventionRow>(
        "SELECT i.id, i.home_id, i.system_kind, i.status, i.score, i.threshold, \
             i.opened_at, i.closed_at, i.close_reason, i.decision, i.defer_until, i.cooldown_until \
         FROM interventions i \
         JOIN homes h ON h.id = i.home_id \
         WHERE i.id = $1 AND h.user_id = $2 \
         FOR UPDATE OF i",
    )
    .bind(id)
    .bind(auth.user_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::NotFound {
        resource: format!("intervention {id}"),
    })?;
    let mut intervention = row.into_intervention()?;

    // A decision arriving after the timeout finds the intervention closed.
    if intervention.expire_if_due(&state.policy, now) {
        persist_closure(&mut tx, &intervention).await?;
        tx.commit().await?;
        tracing::info!(
            intervention_id = %id,
            close_reason = "timeout",
            "intervention closed"
        );
        return Err(InterventionError::AlreadyClosed { id }.into());
    }

    intervention.close(decision, &state.policy, now)?;
    persist_closure(&mut tx, &intervention).await?;
    tx.commit().await?;

    tracing::info!(
        intervention_id = %id,
        home_id = %intervention.home_id,
        system_kind = intervention.system_kind.as_str(),
        decision = decision.as_str(),
        cooldown_until = ?intervention.cooldown_until,
        "intervention closed"
    );

    Ok(Json(intervention))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use hearth_core::systems::SystemKind;

    use super::*;

    fn row() -> InterventionRow {
        InterventionRow {
            id: Uuid::now_v7(),
            home_id: Uuid::now_v7(),
            system_kind: "hvac".to_string(),
            status: "closed".to_string(),
            score: 2400.0,
            threshold: 1500.0,
            opened_at: Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap(),
            closed_at: Some(Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap()),
            close_reason: Some("decision".to_string()),
            decision: Some("defer_with_date".to_string()),
            defer_until: NaiveDate::from_ymd_opt(2025, 9, 1),
            cooldown_until: Some(Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap()),
        }
    }

    #[test]
    fn stored_deferral_rebuilds_decision() {
        let intervention = row().into_intervention().unwrap();
        assert_eq!(intervention.system_kind, SystemKind::Hvac);
        assert_eq!(intervention.close_reason, Some(CloseReason::Decision));
        assert_eq!(
            intervention.decision,
            Some(Decision::DeferWithDate {
                defer_until: NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()
            })
        );
    }

    #[test]
    fn deferral_without_date_is_corrupt() {
        let mut bad = row();
        bad.defer_until = None;
        assert!(bad.into_intervention().is_err());
    }

    #[test]
    fn unknown_status_is_corrupt() {
        let mut bad = row();
        bad.status = "pending".to_string();
        assert!(bad.into_intervention().is_err());
    }
}
