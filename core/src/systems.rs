//! Home systems, install-source provenance tiers, and the records that feed
//! the scorers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ParseTagError;
use crate::failure::LifespanBaseline;

/// A structural or mechanical system of a home.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    Hvac,
    Roof,
    WaterHeater,
    Electrical,
    Plumbing,
    Foundation,
    Exterior,
}

impl SystemKind {
    pub const ALL: [SystemKind; 7] = [
        SystemKind::Hvac,
        SystemKind::Roof,
        SystemKind::WaterHeater,
        SystemKind::Electrical,
        SystemKind::Plumbing,
        SystemKind::Foundation,
        SystemKind::Exterior,
    ];

    /// Systems whose coverage decides whether a baseline is established.
    pub const CRITICAL: [SystemKind; 3] =
        [SystemKind::Hvac, SystemKind::Roof, SystemKind::WaterHeater];

    pub fn as_str(self) -> &'static str {
        match self {
            SystemKind::Hvac => "hvac",
            SystemKind::Roof => "roof",
            SystemKind::WaterHeater => "water_heater",
            SystemKind::Electrical => "electrical",
            SystemKind::Plumbing => "plumbing",
            SystemKind::Foundation => "foundation",
            SystemKind::Exterior => "exterior",
        }
    }

    pub fn is_critical(self) -> bool {
        Self::CRITICAL.contains(&self)
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SystemKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "hvac" => Ok(SystemKind::Hvac),
            "roof" => Ok(SystemKind::Roof),
            "water_heater" => Ok(SystemKind::WaterHeater),
            "electrical" => Ok(SystemKind::Electrical),
            "plumbing" => Ok(SystemKind::Plumbing),
            "foundation" => Ok(SystemKind::Foundation),
            "exterior" => Ok(SystemKind::Exterior),
            _ => Err(ParseTagError::new(
                "system kind",
                s,
                "hvac, roof, water_heater, electrical, plumbing, foundation, exterior",
            )),
        }
    }
}

/// Provenance of a system's install date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstallSource {
    Permit,
    Inspection,
    OwnerReported,
    Inferred,
    Heuristic,
    Unknown,
}

impl InstallSource {
    /// Higher tiers are more trustworthy.
    pub fn tier(self) -> u8 {
        match self {
            InstallSource::Permit => 5,
            InstallSource::Inspection => 4,
            InstallSource::OwnerReported => 3,
            InstallSource::Inferred => 2,
            InstallSource::Heuristic => 1,
            InstallSource::Unknown => 0,
        }
    }

    /// Confidence assigned to a system whose install date comes from this source.
    pub fn confidence(self) -> f64 {
        match self {
            InstallSource::Permit => 0.90,
            InstallSource::Inspection => 0.80,
            InstallSource::OwnerReported => 0.70,
            InstallSource::Inferred => 0.40,
            InstallSource::Heuristic => 0.30,
            InstallSource::Unknown => 0.10,
        }
    }

    /// Documentary evidence, as opposed to something a person told us or we guessed.
    pub fn is_verified(self) -> bool {
        matches!(self, InstallSource::Permit | InstallSource::Inspection)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            InstallSource::Permit => "permit",
            InstallSource::Inspection => "inspection",
            InstallSource::OwnerReported => "owner_reported",
            InstallSource::Inferred => "inferred",
            InstallSource::Heuristic => "heuristic",
            InstallSource::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstallSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallSource {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "permit" => Ok(InstallSource::Permit),
            "inspection" => Ok(InstallSource::Inspection),
            "owner_reported" | "owner" | "user" => Ok(InstallSource::OwnerReported),
            "inferred" => Ok(InstallSource::Inferred),
            "heuristic" => Ok(InstallSource::Heuristic),
            "unknown" => Ok(InstallSource::Unknown),
            _ => Err(ParseTagError::new(
                "install source",
                s,
                "permit, inspection, owner_reported, inferred, heuristic, unknown",
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SystemStatus {
    Active,
    Superseded,
}

impl SystemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SystemStatus::Active => "active",
            SystemStatus::Superseded => "superseded",
        }
    }
}

impl FromStr for SystemStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "active" => Ok(SystemStatus::Active),
            "superseded" => Ok(SystemStatus::Superseded),
            _ => Err(ParseTagError::new("system status", s, "active, superseded")),
        }
    }
}

/// A home system as stored. Never hard-deleted; replacements supersede it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HomeSystem {
    pub id: Uuid,
    pub home_id: Uuid,
    pub kind: SystemKind,
    pub install_year: Option<i32>,
    pub install_source: InstallSource,
    /// Confidence in the install data, 0..=1
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub material: Option<String>,
    pub status: SystemStatus,
    pub updated_at: DateTime<Utc>,
}

/// Who is asking to change the install data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum UpdateOrigin {
    /// The homeowner explicitly corrected the record. May lower the tier.
    UserCorrection,
    /// A permit or enrichment job found new evidence. Never lowers the tier.
    Evidence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InstallUpdate {
    pub install_year: Option<i32>,
    pub source: InstallSource,
    #[serde(default)]
    pub material: Option<String>,
    pub origin: UpdateOrigin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    Applied {
        previous_source: InstallSource,
    },
    Ignored {
        current_source: InstallSource,
        offered_source: InstallSource,
    },
}

impl HomeSystem {
    /// Default record created when a home is onboarded.
    ///
    /// If the home is younger than the typical lifespan of this kind of
    /// system, the original install is assumed to still be in place.
    /// Otherwise nothing is known.
    pub fn onboarding_default(
        home_id: Uuid,
        kind: SystemKind,
        year_built: Option<i32>,
        now: DateTime<Utc>,
    ) -> Self {
        let current_year = now.year();
        let median = LifespanBaseline::for_kind(kind).median_years;
        let (install_year, install_source) = match year_built {
            Some(built) if built <= current_year && f64::from(current_year - built) < median => {
                (Some(built), InstallSource::Inferred)
            }
            _ => (None, InstallSource::Unknown),
        };

        Self {
            id: Uuid::now_v7(),
            home_id,
            kind,
            install_year,
            install_source,
            confidence: install_source.confidence(),
            material: None,
            status: SystemStatus::Active,
            updated_at: now,
        }
    }

    /// Apply a change to the install data, honouring the tier rule: only an
    /// explicit user correction may move the install source to a lower tier.
    pub fn apply_install_update(
        &mut self,
        update: &InstallUpdate,
        now: DateTime<Utc>,
    ) -> UpdateOutcome {
        if update.origin == UpdateOrigin::Evidence
            && update.source.tier() < self.install_source.tier()
        {
            return UpdateOutcome::Ignored {
                current_source: self.install_source,
                offered_source: update.source,
            };
        }

        let previous_source = self.install_source;
        if update.install_year.is_some() || update.origin == UpdateOrigin::UserCorrection {
            self.install_year = update.install_year;
        }
        if let Some(material) = update
            .material
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
        {
            self.material = Some(material.to_string());
        }
        self.install_source = update.source;
        self.confidence = update.source.confidence();
        self.updated_at = now;

        UpdateOutcome::Applied { previous_source }
    }

    /// Record a physical replacement: this record is superseded and a fresh
    /// active one carries the new install data. Tiers do not carry over.
    pub fn replace_with(&mut self, update: &InstallUpdate, now: DateTime<Utc>) -> HomeSystem {
        self.status = SystemStatus::Superseded;
        self.updated_at = now;
        HomeSystem {
            id: Uuid::now_v7(),
            home_id: self.home_id,
            kind: self.kind,
            install_year: update.install_year,
            install_source: update.source,
            confidence: update.source.confidence(),
            material: update
                .material
                .as_deref()
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string),
            status: SystemStatus::Active,
            updated_at: now,
        }
    }

    /// Years since install, if the install year is known.
    pub fn age_years(&self, now: DateTime<Utc>) -> Option<i32> {
        self.install_year.map(|year| (now.year() - year).max(0))
    }
}

/// Kinds of homeowner or job activity recorded against a home.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum HomeEventKind {
    Maintenance,
    Repair,
    Inspection,
    PhotoUploaded,
    PermitFound,
    InvoiceUploaded,
    OwnerConfirmation,
    AnomalyReported,
}

impl HomeEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HomeEventKind::Maintenance => "maintenance",
            HomeEventKind::Repair => "repair",
            HomeEventKind::Inspection => "inspection",
            HomeEventKind::PhotoUploaded => "photo_uploaded",
            HomeEventKind::PermitFound => "permit_found",
            HomeEventKind::InvoiceUploaded => "invoice_uploaded",
            HomeEventKind::OwnerConfirmation => "owner_confirmation",
            HomeEventKind::AnomalyReported => "anomaly_reported",
        }
    }

    /// Events that count as upkeep for maintenance scoring.
    pub fn is_upkeep(self) -> bool {
        matches!(
            self,
            HomeEventKind::Maintenance | HomeEventKind::Repair | HomeEventKind::Inspection
        )
    }
}

impl FromStr for HomeEventKind {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "maintenance" => Ok(HomeEventKind::Maintenance),
            "repair" => Ok(HomeEventKind::Repair),
            "inspection" => Ok(HomeEventKind::Inspection),
            "photo_uploaded" => Ok(HomeEventKind::PhotoUploaded),
            "permit_found" => Ok(HomeEventKind::PermitFound),
            "invoice_uploaded" => Ok(HomeEventKind::InvoiceUploaded),
            "owner_confirmation" => Ok(HomeEventKind::OwnerConfirmation),
            "anomaly_reported" => Ok(HomeEventKind::AnomalyReported),
            _ => Err(ParseTagError::new(
                "event kind",
                s,
                "maintenance, repair, inspection, photo_uploaded, permit_found, invoice_uploaded, owner_confirmation, anomaly_reported",
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HomeEventRecord {
    /// None for home-wide events
    pub system_kind: Option<SystemKind>,
    pub kind: HomeEventKind,
    pub occurred_at: DateTime<Utc>,
}

/// A documented asset (photo, nameplate, material note) attached to a system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HomeAssetRecord {
    pub system_kind: SystemKind,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub has_photo: bool,
}

pub const MAINTENANCE_LOOKBACK_DAYS: i64 = 730;
pub const DEVIATION_LOOKBACK_DAYS: i64 = 90;

/// Upkeep score in [0, 1] from recent maintenance, repair and inspection events.
///
/// No history is treated as unknown (0.4), not neglect.
pub fn maintenance_score(
    kind: SystemKind,
    events: &[HomeEventRecord],
    now: DateTime<Utc>,
) -> f64 {
    let since = now - Duration::days(MAINTENANCE_LOOKBACK_DAYS);
    let recent = events
        .iter()
        .filter(|e| e.system_kind == Some(kind) && e.kind.is_upkeep())
        .filter(|e| e.occurred_at >= since && e.occurred_at <= now)
        .count();
    (0.4 + 0.3 * recent as f64).min(1.0)
}

/// Whether an anomaly was reported for this system recently.
pub fn deviation_detected(
    kind: SystemKind,
    events: &[HomeEventRecord],
    now: DateTime<Utc>,
) -> bool {
    let since = now - Duration::days(DEVIATION_LOOKBACK_DAYS);
    events.iter().any(|e| {
        e.system_kind == Some(kind)
            && e.kind == HomeEventKind::AnomalyReported
            && e.occurred_at >= since
            && e.occurred_at <= now
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 21, 12, 0, 0).unwrap()
    }

    fn system(source: InstallSource, year: Option<i32>) -> HomeSystem {
        HomeSystem {
            id: Uuid::nil(),
            home_id: Uuid::nil(),
            kind: SystemKind::Hvac,
            install_year: year,
            install_source: source,
            confidence: source.confidence(),
            material: None,
            status: SystemStatus::Active,
            updated_at: now(),
        }
    }

    #[test]
    fn tiers_follow_documented_order() {
        let ordered = [
            InstallSource::Permit,
            InstallSource::Inspection,
            InstallSource::OwnerReported,
            InstallSource::Inferred,
            InstallSource::Heuristic,
            InstallSource::Unknown,
        ];
        for pair in ordered.windows(2) {
            assert!(pair[0].tier() > pair[1].tier());
            assert!(pair[0].confidence() > pair[1].confidence());
        }
    }

    #[test]
    fn evidence_never_lowers_tier() {
        let mut sys = system(InstallSource::Permit, Some(2015));
        let outcome = sys.apply_install_update(
            &InstallUpdate {
                install_year: Some(2010),
                source: InstallSource::Inferred,
                material: None,
                origin: UpdateOrigin::Evidence,
            },
            now(),
        );
        assert_eq!(
            outcome,
            UpdateOutcome::Ignored {
                current_source: InstallSource::Permit,
                offered_source: InstallSource::Inferred,
            }
        );
        assert_eq!(sys.install_year, Some(2015));
        assert_eq!(sys.install_source, InstallSource::Permit);
    }

    #[test]
    fn user_correction_may_lower_tier() {
        let mut sys = system(InstallSource::Permit, Some(2015));
        let outcome = sys.apply_install_update(
            &InstallUpdate {
                install_year: Some(2019),
                source: InstallSource::OwnerReported,
                material: Some("  heat pump ".to_string()),
                origin: UpdateOrigin::UserCorrection,
            },
            now(),
        );
        assert_eq!(
            outcome,
            UpdateOutcome::Applied {
                previous_source: InstallSource::Permit
            }
        );
        assert_eq!(sys.install_year, Some(2019));
        assert_eq!(sys.material.as_deref(), Some("heat pump"));
        assert!((sys.confidence - 0.70).abs() < 1e-9);
    }

    #[test]
    fn equal_tier_evidence_is_applied() {
        let mut sys = system(InstallSource::Inferred, Some(2001));
        let outcome = sys.apply_install_update(
            &InstallUpdate {
                install_year: Some(2003),
                source: InstallSource::Inferred,
                material: None,
                origin: UpdateOrigin::Evidence,
            },
            now(),
        );
        assert!(matches!(outcome, UpdateOutcome::Applied { .. }));
        assert_eq!(sys.install_year, Some(2003));
    }

    #[test]
    fn onboarding_infers_original_install_for_young_homes() {
        let young = HomeSystem::onboarding_default(Uuid::nil(), SystemKind::Hvac, Some(2018), now());
        assert_eq!(young.install_year, Some(2018));
        assert_eq!(young.install_source, InstallSource::Inferred);

        let old = HomeSystem::onboarding_default(Uuid::nil(), SystemKind::Hvac, Some(1990), now());
        assert_eq!(old.install_year, None);
        assert_eq!(old.install_source, InstallSource::Unknown);

        let unknown = HomeSystem::onboarding_default(Uuid::nil(), SystemKind::Roof, None, now());
        assert_eq!(unknown.install_source, InstallSource::Unknown);
    }

    #[test]
    fn kind_parses_loosely() {
        assert_eq!("Water-Heater".parse::<SystemKind>(), Ok(SystemKind::WaterHeater));
        assert!("boiler".parse::<SystemKind>().is_err());
    }

    #[test]
    fn maintenance_score_counts_recent_upkeep_only() {
        let events = vec![
            HomeEventRecord {
                system_kind: Some(SystemKind::Hvac),
                kind: HomeEventKind::Maintenance,
                occurred_at: now() - Duration::days(100),
            },
            HomeEventRecord {
                system_kind: Some(SystemKind::Hvac),
                kind: HomeEventKind::PhotoUploaded,
                occurred_at: now() - Duration::days(10),
            },
            HomeEventRecord {
                system_kind: Some(SystemKind::Hvac),
                kind: HomeEventKind::Repair,
                occurred_at: now() - Duration::days(MAINTENANCE_LOOKBACK_DAYS + 1),
            },
        ];
        let score = maintenance_score(SystemKind::Hvac, &events, now());
        assert!((score - 0.7).abs() < 1e-9);
        assert!((maintenance_score(SystemKind::Roof, &events, now()) - 0.4).abs() < 1e-9);
    }

    #[test]
    fn deviation_requires_recent_anomaly() {
        let stale = HomeEventRecord {
            system_kind: Some(SystemKind::Roof),
            kind: HomeEventKind::AnomalyReported,
            occurred_at: now() - Duration::days(DEVIATION_LOOKBACK_DAYS + 5),
        };
        assert!(!deviation_detected(SystemKind::Roof, &[stale.clone()], now()));

        let fresh = HomeEventRecord {
            occurred_at: now() - Duration::days(3),
            ..stale
        };
        assert!(deviation_detected(SystemKind::Roof, &[fresh], now()));
    }

    #[test]
    fn replacement_supersedes_and_resets_tier() {
        let mut old = system(InstallSource::Permit, Some(2004));
        old.material = Some("r22 split".to_string());
        let new = old.replace_with(
            &InstallUpdate {
                install_year: Some(2025),
                source: InstallSource::OwnerReported,
                material: None,
                origin: UpdateOrigin::UserCorrection,
            },
            now(),
        );
        assert_eq!(old.status, SystemStatus::Superseded);
        assert_eq!(new.status, SystemStatus::Active);
        assert_ne!(new.id, old.id);
        assert_eq!(new.install_year, Some(2025));
        assert_eq!(new.install_source, InstallSource::OwnerReported);
        assert_eq!(new.material, None);
        assert_eq!(new.age_years(now()), Some(0));
    }
}
