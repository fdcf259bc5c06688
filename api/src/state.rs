use hearth_core::intervention::InterventionPolicy;
use sqlx::PgPool;

/// Read an integer or float setting, keeping the default on absence or parse failure.
fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

pub fn intervention_policy_from_env() -> InterventionPolicy {
    let defaults = InterventionPolicy::default();
    InterventionPolicy {
        cooldown_days: env_or("HEARTH_INTERVENTION_COOLDOWN_DAYS", defaults.cooldown_days).max(0),
        timeout_days: env_or("HEARTH_INTERVENTION_TIMEOUT_DAYS", defaults.timeout_days).max(1),
        default_threshold: env_or(
            "HEARTH_DEFAULT_INTERVENTION_THRESHOLD",
            defaults.default_threshold,
        ),
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub policy: InterventionPolicy,
}
