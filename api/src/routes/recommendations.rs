use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use hearth_core::error::ApiError;
use hearth_core::recommendations::{Recommendation, parse_dismissed, visible_recommendations};

use crate::auth::{AuthenticatedUser, SCOPE_HOMES_READ, require_scopes};
use crate::error::AppError;
use crate::extract::AppPath;
use crate::snapshot::load_snapshot;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/v1/homes/{home_id}/recommendations",
        get(list_recommendations),
    )
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct RecommendationsQuery {
    /// Comma-separated recommendation ids the user has dismissed
    #[serde(default)]
    pub dismissed: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct RecommendationsResponse {
    pub home_id: Uuid,
    pub recommendations: Vec<Recommendation>,
}

/// Top recommendations
///
/// Generated fresh from current evidence and system states. Dismissed ids are
/// held by the client and sent back on every call; at most three are returned.
#[utoipa::path(
    get,
    path = "/v1/homes/{home_id}/recommendations",
    params(
        ("home_id" = Uuid, Path, description = "Home id"),
        RecommendationsQuery
    ),
    responses(
        (status = 200, description = "Visible recommendations, highest priority first", body = RecommendationsResponse),
        (status = 404, description = "Home not found", body = ApiError)
    ),
    security(("bearer_auth" = [])),
    tag = "recommendations"
)]
pub async fn list_recommendations(
    State(state): State<AppState>,
    auth: AuthenticatedUser,
    AppPath(home_id): AppPath<Uuid>,
    Query(query): Query<RecommendationsQuery>,
) -> Result<Json<RecommendationsResponse>, AppError> {
    require_scopes(&auth, &[SCOPE_HOMES_READ], "list recommendations")?;
    let now = Utc::now();
    let snapshot = load_snapshot(&state.db, auth.user_id, home_id).await?;

    let dismissed = parse_dismissed(query.dismissed.as_deref());
    let recommendations = visible_recommendations(&snapshot.recommendation_inputs(now), &dismissed);
    Ok(Json(RecommendationsResponse {
        home_id,
        recommendations,
    }))
}
