//! Loads a home and everything the scorers look at in one pass, and turns
//! stored rows into core types. Handlers read the clock once and pass `now`
//! down; nothing here looks at it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;
use uuid::Uuid;

use hearth_core::chat_mode::{ChatModeContext, SystemStateInput, derive_system_state};
use hearth_core::confidence::{
    ConfidenceResult, HomeConfidenceInput, SystemSignals, compute_home_confidence,
};
use hearth_core::error::ParseTagError;
use hearth_core::failure::{FailureInputs, SurvivalEstimate, estimate_survival};
use hearth_core::intervention::EstimatedImpactCost;
use hearth_core::recommendations::RecommendationInput;
use hearth_core::seasonal::WeatherOutlook;
use hearth_core::systems::{
    HomeAssetRecord, HomeEventKind, HomeEventRecord, HomeSystem, InstallSource, SystemKind,
    deviation_detected, maintenance_score,
};

use crate::error::AppError;

pub const HOME_COLUMNS: &str = "id, user_id, address, state_code, timezone, year_built, \
     climate_stress_index, intervention_threshold, forecast_low_c, forecast_high_c, \
     confidence_score, confidence_updated_at, last_interaction_at, created_at";

pub const SYSTEM_COLUMNS: &str = "id, home_id, kind, install_year, install_source, confidence, \
     material, status, estimated_impact_cost, updated_at";

/// A home as returned by the API.
#[derive(Debug, Clone, Serialize, ToSchema, sqlx::FromRow)]
pub struct Home {
    pub id: Uuid,
    pub user_id: Uuid,
    pub address: String,
    pub state_code: Option<String>,
    pub timezone: String,
    pub year_built: Option<i32>,
    /// 0..=1, higher is harsher
    pub climate_stress_index: f64,
    pub intervention_threshold: Option<f64>,
    pub forecast_low_c: Option<f64>,
    pub forecast_high_c: Option<f64>,
    /// Last computed score. Always recomputed on read.
    pub confidence_score: Option<i32>,
    pub confidence_updated_at: Option<DateTime<Utc>>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Home {
    pub fn weather(&self) -> WeatherOutlook {
        WeatherOutlook {
            forecast_low_c: self.forecast_low_c,
            forecast_high_c: self.forecast_high_c,
        }
    }
}

#[derive(sqlx::FromRow)]
pub struct SystemRow {
    id: Uuid,
    home_id: Uuid,
    kind: String,
    install_year: Option<i32>,
    install_source: String,
    confidence: f64,
    material: Option<String>,
    status: String,
    estimated_impact_cost: Option<serde_json::Value>,
    updated_at: DateTime<Utc>,
}

impl SystemRow {
    pub fn into_system(self) -> Result<(HomeSystem, Option<serde_json::Value>), ParseTagError> {
        let system = HomeSystem {
            id: self.id,
            home_id: self.home_id,
            kind: self.kind.parse()?,
            install_year: self.install_year,
            install_source: self.install_source.parse()?,
            confidence: self.confidence,
            material: self.material,
            status: self.status.parse()?,
            updated_at: self.updated_at,
        };
        Ok((system, self.estimated_impact_cost))
    }
}

#[derive(sqlx::FromRow)]
struct AssetRow {
    system_kind: String,
    material: Option<String>,
    has_photo: bool,
}

#[derive(sqlx::FromRow)]
struct EventRow {
    system_kind: Option<String>,
    kind: String,
    occurred_at: DateTime<Utc>,
}

/// Load a home owned by `user_id`. Another user's home is reported as missing.
pub async fn load_home(db: &PgPool, user_id: Uuid, home_id: Uuid) -> Result<Home, AppError> {
    sqlx::query_as::<_, Home>(&format!(
        "SELECT {HOME_COLUMNS} FROM homes WHERE id = $1 AND user_id = $2"
    ))
    .bind(home_id)
    .bind(user_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| AppError::NotFound {
        resource: format!("home {home_id}"),
    })
}

pub async fn load_active_systems(
    db: &PgPool,
    home_id: Uuid,
) -> Result<Vec<(HomeSystem, Option<serde_json::Value>)>, AppError> {
    let rows = sqlx::query_as::<_, SystemRow>(&format!(
        "SELECT {SYSTEM_COLUMNS} FROM home_systems \
         WHERE home_id = $1 AND status = 'active' ORDER BY kind"
    ))
    .bind(home_id)
    .fetch_all(db)
    .await?;

    rows.into_iter()
        .map(|row| row.into_system().map_err(AppError::from))
        .collect()
}

pub struct HomeSnapshot {
    pub home: Home,
    pub systems: Vec<HomeSystem>,
    costs: Vec<Option<serde_json::Value>>,
    pub assets: Vec<HomeAssetRecord>,
    pub events: Vec<HomeEventRecord>,
}

pub async fn load_snapshot(
    db: &PgPool,
    user_id: Uuid,
    home_id: Uuid,
) -> Result<HomeSnapshot, AppError> {
    let home = load_home(db, user_id, home_id).await?;
    let (systems, costs): (Vec<_>, Vec<_>) =
        load_active_systems(db, home_id).await?.into_iter().unzip();

    let assets = sqlx::query_as::<_, AssetRow>(
        "SELECT system_kind, material, has_photo FROM home_assets WHERE home_id = $1",
    )
    .bind(home_id)
    .fetch_all(db)
    .await?
    .into_iter()
    .map(|row| {
        Ok(HomeAssetRecord {
            system_kind: row.system_kind.parse()?,
            material: row.material,
            has_photo: row.has_photo,
        })
    })
    .collect::<Result<Vec<_>, ParseTagError>>()?;

    let events = sqlx::query_as::<_, EventRow>(
        "SELECT system_kind, kind, occurred_at FROM home_events \
         WHERE home_id = $1 ORDER BY occurred_at DESC",
    )
    .bind(home_id)
    .fetch_all(db)
    .await?
    .into_iter()
    .map(|row| {
        Ok(HomeEventRecord {
            system_kind: row
                .system_kind
                .as_deref()
                .map(str::parse::<SystemKind>)
                .transpose()?,
            kind: row.kind.parse()?,
            occurred_at: row.occurred_at,
        })
    })
    .collect::<Result<Vec<_>, ParseTagError>>()?;

    Ok(HomeSnapshot {
        home,
        systems,
        costs,
        assets,
        events,
    })
}

impl HomeSnapshot {
    pub fn system(&self, kind: SystemKind) -> Option<&HomeSystem> {
        self.systems.iter().find(|s| s.kind == kind)
    }

    pub fn impact_cost(&self, kind: SystemKind) -> EstimatedImpactCost {
        let stored = self
            .systems
            .iter()
            .zip(&self.costs)
            .find(|(system, _)| system.kind == kind)
            .and_then(|(_, cost)| cost.as_ref());
        EstimatedImpactCost::from_json(kind, stored)
    }

    pub fn signals(&self, system: &HomeSystem) -> SystemSignals {
        SystemSignals::from_records(system, &self.assets, &self.events)
    }

    pub fn confidence(&self, now: DateTime<Utc>) -> ConfidenceResult {
        let input = HomeConfidenceInput {
            address_known: !self.home.address.trim().is_empty(),
            year_built: self.home.year_built,
            systems: self.systems.iter().map(|s| self.signals(s)).collect(),
            last_interaction_at: self.home.last_interaction_at,
        };
        compute_home_confidence(&input, now)
    }

    pub fn forecast(&self, system: &HomeSystem, now: DateTime<Utc>) -> SurvivalEstimate {
        let inputs = FailureInputs::from_system(
            system,
            &self.signals(system),
            self.home.climate_stress_index,
            maintenance_score(system.kind, &self.events, now),
        );
        estimate_survival(system.kind, &inputs, now)
    }

    pub fn state_inputs(&self, now: DateTime<Utc>) -> Vec<SystemStateInput> {
        self.systems
            .iter()
            .map(|system| {
                let estimate = self.forecast(system, now);
                SystemStateInput {
                    kind: system.kind,
                    confidence: system.confidence,
                    deviation_detected: deviation_detected(system.kind, &self.events, now),
                    months_remaining: Some((estimate.years_remaining_p50 * 12.0).round() as u32),
                }
            })
            .collect()
    }

    /// The homeowner has confirmed at least one system themselves. Evidence
    /// found by enrichment (permits, inspections) does not count.
    pub fn user_confirmed(&self) -> bool {
        self.systems
            .iter()
            .any(|s| s.install_source == InstallSource::OwnerReported)
            || self
            .events
            .iter()
            .any(|e| e.kind == HomeEventKind::OwnerConfirmation)
    }

    pub fn chat_context(&self, now: DateTime<Utc>) -> ChatModeContext {
        ChatModeContext::from_systems(
            self.confidence(now).summary,
            self.user_confirmed(),
            &self.state_inputs(now),
        )
    }

    pub fn recommendation_inputs(&self, now: DateTime<Utc>) -> Vec<RecommendationInput> {
        self.systems
            .iter()
            .zip(self.state_inputs(now))
            .map(|(system, state)| RecommendationInput {
                signals: self.signals(system),
                install_source: system.install_source,
                state: derive_system_state(&state),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use hearth_core::chat_mode::SystemState;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 21, 9, 0, 0).unwrap()
    }

    fn snapshot(systems: Vec<HomeSystem>, events: Vec<HomeEventRecord>) -> HomeSnapshot {
        let home_id = Uuid::now_v7();
        let costs = vec![None; systems.len()];
        HomeSnapshot {
            home: Home {
                id: home_id,
                user_id: Uuid::now_v7(),
                address: "12 Elm St".to_string(),
                state_code: Some("FL".to_string()),
                timezone: "America/New_York".to_string(),
                year_built: Some(2015),
                climate_stress_index: 0.8,
                intervention_threshold: None,
                forecast_low_c: None,
                forecast_high_c: None,
                confidence_score: None,
                confidence_updated_at: None,
                last_interaction_at: Some(now()),
                created_at: now(),
            },
            systems,
            costs,
            assets: Vec::new(),
            events,
        }
    }

    #[test]
    fn onboarded_home_has_states_for_every_system() {
        let home_id = Uuid::now_v7();
        let systems: Vec<HomeSystem> = SystemKind::ALL
            .iter()
            .map(|kind| HomeSystem::onboarding_default(home_id, *kind, Some(2015), now()))
            .collect();
        let snap = snapshot(systems, Vec::new());

        let inputs = snap.state_inputs(now());
        assert_eq!(inputs.len(), SystemKind::ALL.len());
        // a 10-year-old home: hvac and water heater are inferred, not gaps
        let hvac = inputs.iter().find(|i| i.kind == SystemKind::Hvac).unwrap();
        assert_ne!(derive_system_state(hvac), SystemState::DataGap);
        assert!(!snap.user_confirmed());
        assert_eq!(snap.recommendation_inputs(now()).len(), SystemKind::ALL.len());
    }

    #[test]
    fn anomaly_event_marks_system_elevated() {
        let home_id = Uuid::now_v7();
        let mut hvac = HomeSystem::onboarding_default(home_id, SystemKind::Hvac, Some(2015), now());
        hvac.install_source = InstallSource::OwnerReported;
        hvac.confidence = InstallSource::OwnerReported.confidence();
        let events = vec![HomeEventRecord {
            system_kind: Some(SystemKind::Hvac),
            kind: HomeEventKind::AnomalyReported,
            occurred_at: now() - chrono::Duration::days(3),
        }];
        let snap = snapshot(vec![hvac], events);

        let inputs = snap.state_inputs(now());
        assert_eq!(derive_system_state(&inputs[0]), SystemState::Elevated);
        assert!(snap.user_confirmed());
    }

    #[test]
    fn permit_evidence_is_not_a_homeowner_confirmation() {
        let home_id = Uuid::now_v7();
        let mut roof = HomeSystem::onboarding_default(home_id, SystemKind::Roof, Some(2015), now());
        roof.install_source = InstallSource::Permit;
        roof.confidence = InstallSource::Permit.confidence();
        let snap = snapshot(vec![roof.clone()], Vec::new());
        assert!(!snap.user_confirmed());

        let confirmed = snapshot(
            vec![roof],
            vec![HomeEventRecord {
                system_kind: Some(SystemKind::Roof),
                kind: HomeEventKind::OwnerConfirmation,
                occurred_at: now() - chrono::Duration::days(1),
            }],
        );
        assert!(confirmed.user_confirmed());
    }

    #[test]
    fn missing_cost_json_uses_kind_defaults() {
        let home_id = Uuid::now_v7();
        let roof = HomeSystem::onboarding_default(home_id, SystemKind::Roof, Some(2015), now());
        let snap = snapshot(vec![roof], Vec::new());
        assert_eq!(
            snap.impact_cost(SystemKind::Roof),
            EstimatedImpactCost::default_for(SystemKind::Roof)
        );
        assert_eq!(
            snap.impact_cost(SystemKind::Plumbing),
            EstimatedImpactCost::default_for(SystemKind::Plumbing)
        );
    }
}
