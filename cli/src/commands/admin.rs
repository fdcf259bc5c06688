use chrono::{Duration, Utc};
use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use hearth_core::auth::{generate_api_key, key_prefix};

use crate::util::{exit_error, print_json};

const DEFAULT_SCOPES: &[&str] = &["homes:*"];

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Register a homeowner account
    CreateUser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        display_name: Option<String>,
    },
    /// Issue an API key; the key is printed once and only its hash is stored
    CreateKey {
        #[arg(long)]
        user_id: Uuid,
        /// Where the key will be used, e.g. "mobile-app" or "permit-sync"
        #[arg(long)]
        label: String,
        /// Repeatable. Defaults to homes:*; permit jobs need evidence:write
        #[arg(long = "scope")]
        scopes: Vec<String>,
        /// Days until the key stops working (default: never)
        #[arg(long)]
        expires_in_days: Option<i64>,
    },
}

pub async fn run(command: AdminCommands) -> i32 {
    match command {
        AdminCommands::CreateUser {
            email,
            display_name,
        } => create_user(&email, display_name.as_deref()).await,
        AdminCommands::CreateKey {
            user_id,
            label,
            scopes,
            expires_in_days,
        } => create_key(user_id, &label, scopes, expires_in_days).await,
    }
}

/// Admin commands bypass the API and write straight to Postgres.
async fn connect() -> sqlx::PgPool {
    let Ok(database_url) = std::env::var("DATABASE_URL") else {
        exit_error(
            "DATABASE_URL is not set",
            Some("Admin commands need direct database access; run them where the API's DATABASE_URL is available."),
        );
    };
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await
        .unwrap_or_else(|e| exit_error(&format!("Cannot reach the database: {e}"), None))
}

fn database_failure(context: &str, err: sqlx::Error) -> i32 {
    tracing::error!(error = %err, "{context}");
    eprintln!(
        "{}",
        json!({"error": "database_error", "message": format!("{context}: {err}")})
    );
    2
}

fn effective_scopes(requested: Vec<String>) -> Vec<String> {
    let scopes: Vec<String> = requested
        .into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect();
    if scopes.is_empty() {
        DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
    } else {
        scopes
    }
}

async fn create_user(email: &str, display_name: Option<&str>) -> i32 {
    let email = email.trim().to_lowercase();
    if !email.contains('@') {
        exit_error(&format!("Invalid email: {email}"), None);
    }
    let pool = connect().await;
    let user_id = Uuid::now_v7();

    let inserted = sqlx::query("INSERT INTO users (id, email, display_name) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(&email)
        .bind(display_name)
        .execute(&pool)
        .await;
    if let Err(e) = inserted {
        return database_failure("user not created", e);
    }

    print_json(&json!({
        "user_id": user_id,
        "email": email,
        "display_name": display_name
    }));
    0
}

async fn create_key(
    user_id: Uuid,
    label: &str,
    scopes: Vec<String>,
    expires_in_days: Option<i64>,
) -> i32 {
    if label.trim().is_empty() {
        exit_error("--label must not be empty", None);
    }
    if expires_in_days.is_some_and(|d| d <= 0) {
        exit_error("--expires-in-days must be positive", None);
    }
    let pool = connect().await;

    let (full_key, key_hash) = generate_api_key();
    let prefix = key_prefix(&full_key);
    let key_id = Uuid::now_v7();
    let scopes = effective_scopes(scopes);
    let expires_at = expires_in_days.map(|d| Utc::now() + Duration::days(d));

    let inserted = sqlx::query(
        "INSERT INTO api_keys (id, user_id, key_hash, key_prefix, label, scopes, expires_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(key_id)
    .bind(user_id)
    .bind(&key_hash)
    .bind(&prefix)
    .bind(label.trim())
    .bind(&scopes)
    .bind(expires_at)
    .execute(&pool)
    .await;
    if let Err(e) = inserted {
        return database_failure("API key not created", e);
    }

    print_json(&json!({
        "key_id": key_id,
        "api_key": full_key,
        "key_prefix": prefix,
        "label": label,
        "scopes": scopes,
        "expires_at": expires_at,
        "notice": "Copy the key now; only its hash is kept."
    }));
    0
}
