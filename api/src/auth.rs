use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{FromRequestParts, Request};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use hearth_core::auth::{API_KEY_PREFIX, hash_token};
use tower::{Layer, Service, ServiceExt};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

pub const SCOPE_HOMES_READ: &str = "homes:read";
pub const SCOPE_HOMES_WRITE: &str = "homes:write";
/// Held by permit/enrichment jobs that submit evidence rather than user corrections.
pub const SCOPE_EVIDENCE_WRITE: &str = "evidence:write";

/// Authenticated user extracted from the `Authorization: Bearer <key>` header.
///
/// The auth layer validates the key once and stores the user in request
/// extensions; the extractor reads it back without another DB hit.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub key_id: Uuid,
    pub scopes: Vec<String>,
}

/// `resource:action`, `resource:*` or `*`. Comparison ignores case.
fn scope_matches(granted: &str, required: &str) -> bool {
    let (granted, required) = (granted.trim(), required.trim());
    if granted.is_empty() || required.is_empty() {
        return false;
    }
    if granted == "*" || granted.eq_ignore_ascii_case(required) {
        return true;
    }
    match (granted.split_once(':'), required.split_once(':')) {
        (Some((resource, "*")), Some((wanted, _))) => resource.eq_ignore_ascii_case(wanted),
        _ => false,
    }
}

fn has_any_required_scope(granted_scopes: &[String], required_scopes: &[&str]) -> bool {
    required_scopes.is_empty()
        || required_scopes
            .iter()
            .any(|required| granted_scopes.iter().any(|g| scope_matches(g, required)))
}

/// Reject the request unless the key holds one of `required_scopes`.
pub fn require_scopes(
    auth: &AuthenticatedUser,
    required_scopes: &[&str],
    operation: &str,
) -> Result<(), AppError> {
    let allowed = has_any_required_scope(&auth.scopes, required_scopes);
    tracing::debug!(
        user_id = %auth.user_id,
        key_id = %auth.key_id,
        operation,
        allowed,
        "scope check"
    );
    if allowed {
        return Ok(());
    }

    tracing::warn!(
        user_id = %auth.user_id,
        key_id = %auth.key_id,
        operation,
        required = ?required_scopes,
        granted = ?auth.scopes,
        "key lacks scope"
    );
    let granted = match auth.scopes.as_slice() {
        [] => "none".to_string(),
        scopes => scopes.join(", "),
    };
    Err(AppError::Forbidden {
        message: format!("This API key may not {operation}"),
        docs_hint: Some(format!(
            "Needs one of: {}. Key has: {granted}. Create a key with the right --scope via `hearth admin create-key`.",
            required_scopes.join(", ")
        )),
    })
}

/// Injects `AuthenticatedUser` into request extensions.
/// Continues silently on failure so `/health` and docs stay reachable.
#[derive(Clone)]
pub struct InjectAuthLayer {
    pool: sqlx::PgPool,
}

impl InjectAuthLayer {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

impl<S> Layer<S> for InjectAuthLayer {
    type Service = InjectAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        InjectAuthService {
            inner,
            pool: self.pool.clone(),
        }
    }
}

#[derive(Clone)]
pub struct InjectAuthService<S> {
    inner: S,
    pool: sqlx::PgPool,
}

impl<S> Service<Request> for InjectAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let not_ready = self.inner.clone();
        let ready = std::mem::replace(&mut self.inner, not_ready);
        let pool = self.pool.clone();

        let token = req
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(str::to_owned);

        Box::pin(async move {
            if let Some(token) = token {
                if let Ok(auth_user) = authenticate_api_key(&token, &pool).await {
                    req.extensions_mut().insert(auth_user);
                }
            }
            Ok(ready.oneshot(req).await.into_response())
        })
    }
}

fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthenticatedUser>() {
            return Ok(user.clone());
        }

        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized {
                message: "Missing Authorization header".to_string(),
                docs_hint: Some(format!(
                    "Include 'Authorization: Bearer <key>' with an API key ({API_KEY_PREFIX}...)."
                )),
            })?;

        let token = bearer_token(header).ok_or_else(|| AppError::Unauthorized {
            message: "Authorization header must use Bearer scheme".to_string(),
            docs_hint: Some("Format: 'Authorization: Bearer <key>'".to_string()),
        })?;

        authenticate_api_key(token, &state.db).await
    }
}

async fn authenticate_api_key(
    token: &str,
    pool: &sqlx::PgPool,
) -> Result<AuthenticatedUser, AppError> {
    if !token.starts_with(API_KEY_PREFIX) {
        return Err(AppError::Unauthorized {
            message: "Invalid token format".to_string(),
            docs_hint: Some(format!("API keys start with '{API_KEY_PREFIX}'.")),
        });
    }

    let row = sqlx::query_as::<_, ApiKeyRow>(
        "SELECT ak.id, ak.user_id, ak.scopes, ak.expires_at \
         FROM api_keys ak \
         JOIN users u ON u.id = ak.user_id \
         WHERE ak.key_hash = $1 \
           AND ak.is_revoked = FALSE \
           AND u.is_active = TRUE",
    )
    .bind(hash_token(token))
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::Unauthorized {
        message: "Unknown or revoked API key".to_string(),
        docs_hint: Some(format!(
            "Keys are shown once at creation; issue a new {API_KEY_PREFIX} key if this one was lost."
        )),
    })?;

    if row.expires_at.is_some_and(|expires_at| Utc::now() > expires_at) {
        return Err(AppError::Unauthorized {
            message: "API key has expired".to_string(),
            docs_hint: Some("Create a new key with 'hearth admin create-key'.".to_string()),
        });
    }

    // Usage tracking must not delay the request.
    let touch_pool = pool.clone();
    let key_id = row.id;
    tokio::spawn(async move {
        let touched = sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(key_id)
            .execute(&touch_pool)
            .await;
        if let Err(e) = touched {
            tracing::warn!(key_id = %key_id, error = %e, "last_used_at not updated");
        }
    });

    Ok(AuthenticatedUser {
        user_id: row.user_id,
        key_id: row.id,
        scopes: row.scopes,
    })
}

#[derive(sqlx::FromRow)]
struct ApiKeyRow {
    id: Uuid,
    user_id: Uuid,
    scopes: Vec<String>,
    expires_at: Option<chrono::DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(scopes: &[&str]) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: Uuid::now_v7(),
            key_id: Uuid::now_v7(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn resource_wildcard_covers_every_action() {
        assert!(scope_matches("homes:read", "homes:read"));
        assert!(scope_matches("homes:*", "homes:write"));
        assert!(scope_matches("*", "evidence:write"));
        assert!(!scope_matches("homes:*", "evidence:write"));
        assert!(!scope_matches("homes:read", "homes:write"));
        assert!(!scope_matches("", "homes:read"));
        assert!(scope_matches("Homes:Read", "homes:read"));
    }

    #[test]
    fn missing_scopes_fail_closed() {
        assert!(!has_any_required_scope(&[], &[SCOPE_HOMES_READ]));
        assert!(has_any_required_scope(&[], &[]));
    }

    #[test]
    fn require_scopes_denies_evidence_writes_for_homeowner_keys() {
        let homeowner = user(&["homes:*"]);
        assert!(require_scopes(&homeowner, &[SCOPE_HOMES_WRITE], "update install").is_ok());
        assert!(require_scopes(&homeowner, &[SCOPE_EVIDENCE_WRITE], "submit evidence").is_err());
    }

    #[test]
    fn bearer_token_requires_scheme_and_value() {
        assert_eq!(bearer_token("Bearer hth_sk_abc"), Some("hth_sk_abc"));
        assert_eq!(bearer_token("Bearer   "), None);
        assert_eq!(bearer_token("Basic abc"), None);
    }
}
