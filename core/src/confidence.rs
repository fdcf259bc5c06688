//! Home confidence scoring.
//!
//! Additive and bounded: a base for a known address, fixed bonuses per
//! present signal, the highest install-evidence tier per system only, and a
//! hard cap so the score never claims full certainty. A brand-new home with no
//! signals is a normal state and simply scores at the base.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::systems::{
    HomeAssetRecord, HomeEventKind, HomeEventRecord, HomeSystem, InstallSource, SystemKind,
};

pub const ADDRESS_KNOWN_POINTS: u32 = 30;
pub const YEAR_BUILT_POINTS: u32 = 5;
pub const PERMIT_OR_INVOICE_POINTS: u32 = 8;
pub const OWNER_CONFIRMATION_POINTS: u32 = 5;
pub const INSTALL_YEAR_POINTS: u32 = 3;
pub const MATERIAL_POINTS: u32 = 1;
pub const PHOTO_POINTS: u32 = 2;
pub const MAINTENANCE_RECORD_POINTS: u32 = 2;
pub const RECENT_ACTIVITY_POINTS: u32 = 5;
pub const WARM_ACTIVITY_POINTS: u32 = 2;
pub const RECENT_ACTIVITY_DAYS: i64 = 30;
pub const WARM_ACTIVITY_DAYS: i64 = 90;
pub const SCORE_CAP: u32 = 85;

pub const MODERATE_THRESHOLD: u32 = 50;
pub const HIGH_THRESHOLD: u32 = 70;

/// Evidence present for one system. Every flag defaults to absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SystemSignals {
    pub kind: SystemKind,
    #[serde(default)]
    pub has_install_year: bool,
    #[serde(default)]
    pub has_material: bool,
    #[serde(default)]
    pub has_photo: bool,
    #[serde(default)]
    pub has_permit_or_invoice: bool,
    #[serde(default)]
    pub has_owner_confirmation: bool,
    #[serde(default)]
    pub has_maintenance_record: bool,
}

/// Highest install-evidence tier present for a system. Only one is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InstallEvidence {
    PermitOrInvoice,
    OwnerConfirmation,
    InstallYear,
    None,
}

impl InstallEvidence {
    pub fn points(self) -> u32 {
        match self {
            InstallEvidence::PermitOrInvoice => PERMIT_OR_INVOICE_POINTS,
            InstallEvidence::OwnerConfirmation => OWNER_CONFIRMATION_POINTS,
            InstallEvidence::InstallYear => INSTALL_YEAR_POINTS,
            InstallEvidence::None => 0,
        }
    }
}

impl SystemSignals {
    pub fn absent(kind: SystemKind) -> Self {
        Self {
            kind,
            has_install_year: false,
            has_material: false,
            has_photo: false,
            has_permit_or_invoice: false,
            has_owner_confirmation: false,
            has_maintenance_record: false,
        }
    }

    /// Derive signals from the stored system row plus its assets and events.
    pub fn from_records(
        system: &HomeSystem,
        assets: &[HomeAssetRecord],
        events: &[HomeEventRecord],
    ) -> Self {
        let kind = system.kind;
        let own_assets = || assets.iter().filter(move |a| a.system_kind == kind);
        let has_event = |wanted: &[HomeEventKind]| {
            events
                .iter()
                .any(|e| e.system_kind == Some(kind) && wanted.contains(&e.kind))
        };

        Self {
            kind,
            has_install_year: system.install_year.is_some(),
            has_material: system.material.is_some() || own_assets().any(|a| a.material.is_some()),
            has_photo: own_assets().any(|a| a.has_photo)
                || has_event(&[HomeEventKind::PhotoUploaded]),
            has_permit_or_invoice: system.install_source == InstallSource::Permit
                || has_event(&[HomeEventKind::PermitFound, HomeEventKind::InvoiceUploaded]),
            has_owner_confirmation: system.install_source == InstallSource::OwnerReported
                || has_event(&[HomeEventKind::OwnerConfirmation]),
            has_maintenance_record: events
                .iter()
                .any(|e| e.system_kind == Some(kind) && e.kind.is_upkeep()),
        }
    }

    pub fn install_evidence(&self) -> InstallEvidence {
        if self.has_permit_or_invoice {
            InstallEvidence::PermitOrInvoice
        } else if self.has_owner_confirmation {
            InstallEvidence::OwnerConfirmation
        } else if self.has_install_year {
            InstallEvidence::InstallYear
        } else {
            InstallEvidence::None
        }
    }

    fn flags(&self) -> [bool; 6] {
        [
            self.has_install_year,
            self.has_material,
            self.has_photo,
            self.has_permit_or_invoice,
            self.has_owner_confirmation,
            self.has_maintenance_record,
        ]
    }

    /// Share of evidence flags present, in [0, 1].
    pub fn completeness(&self) -> f64 {
        let flags = self.flags();
        flags.iter().filter(|f| **f).count() as f64 / flags.len() as f64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct HomeConfidenceInput {
    #[serde(default = "default_address_known")]
    pub address_known: bool,
    #[serde(default)]
    pub year_built: Option<i32>,
    #[serde(default)]
    pub systems: Vec<SystemSignals>,
    #[serde(default)]
    pub last_interaction_at: Option<DateTime<Utc>>,
}

fn default_address_known() -> bool {
    true
}

/// Summary bucket shown next to the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceSummary {
    Early,
    Moderate,
    High,
}

impl ConfidenceSummary {
    pub fn from_score(score: u32) -> Self {
        if score >= HIGH_THRESHOLD {
            ConfidenceSummary::High
        } else if score >= MODERATE_THRESHOLD {
            ConfidenceSummary::Moderate
        } else {
            ConfidenceSummary::Early
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ConfidenceSummary::Early => "Early",
            ConfidenceSummary::Moderate => "Moderate",
            ConfidenceSummary::High => "High",
        }
    }
}

/// Points awarded per factor. `capped_by` is what the cap removed;
/// `floored_by` is what the floor added.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ConfidenceBreakdown {
    pub address_known: u32,
    pub year_built_known: u32,
    pub install_evidence: u32,
    pub documentation: u32,
    pub maintenance_records: u32,
    pub recent_activity: u32,
    pub capped_by: u32,
    pub floored_by: u32,
}

impl ConfidenceBreakdown {
    fn raw_total(&self) -> u32 {
        self.address_known
            + self.year_built_known
            + self.install_evidence
            + self.documentation
            + self.maintenance_records
            + self.recent_activity
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ConfidenceResult {
    /// 30..=85
    pub score: u32,
    pub breakdown: ConfidenceBreakdown,
    pub summary: ConfidenceSummary,
}

impl ConfidenceResult {
    /// Score on the 0..=1 scale used by some callers.
    pub fn score_unit(&self) -> f64 {
        f64::from(self.score) / 100.0
    }
}

/// Score how much we know about a home. Total over its input: never fails.
pub fn compute_home_confidence(input: &HomeConfidenceInput, now: DateTime<Utc>) -> ConfidenceResult {
    let mut breakdown = ConfidenceBreakdown {
        address_known: if input.address_known {
            ADDRESS_KNOWN_POINTS
        } else {
            0
        },
        year_built_known: if input.year_built.is_some() {
            YEAR_BUILT_POINTS
        } else {
            0
        },
        ..ConfidenceBreakdown::default()
    };

    for signals in &input.systems {
        breakdown.install_evidence += signals.install_evidence().points();
        if signals.has_material {
            breakdown.documentation += MATERIAL_POINTS;
        }
        if signals.has_photo {
            breakdown.documentation += PHOTO_POINTS;
        }
        if signals.has_maintenance_record {
            breakdown.maintenance_records += MAINTENANCE_RECORD_POINTS;
        }
    }

    breakdown.recent_activity = match input.last_interaction_at {
        Some(at) => {
            let days = now.signed_duration_since(at).num_days().max(0);
            if days <= RECENT_ACTIVITY_DAYS {
                RECENT_ACTIVITY_POINTS
            } else if days <= WARM_ACTIVITY_DAYS {
                WARM_ACTIVITY_POINTS
            } else {
                0
            }
        }
        None => 0,
    };

    let raw = breakdown.raw_total();
    let score = raw.clamp(ADDRESS_KNOWN_POINTS, SCORE_CAP);
    breakdown.capped_by = raw.saturating_sub(score);
    breakdown.floored_by = score.saturating_sub(raw);

    ConfidenceResult {
        score,
        breakdown,
        summary: ConfidenceSummary::from_score(score),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    use super::*;
    use crate::systems::SystemStatus;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 21, 12, 0, 0).unwrap()
    }

    fn full_signals(kind: SystemKind) -> SystemSignals {
        SystemSignals {
            kind,
            has_install_year: true,
            has_material: true,
            has_photo: true,
            has_permit_or_invoice: true,
            has_owner_confirmation: true,
            has_maintenance_record: true,
        }
    }

    fn empty_input() -> HomeConfidenceInput {
        HomeConfidenceInput {
            address_known: true,
            year_built: None,
            systems: Vec::new(),
            last_interaction_at: None,
        }
    }

    #[test]
    fn new_home_scores_exactly_the_base() {
        let result = compute_home_confidence(&empty_input(), now());
        assert_eq!(result.score, ADDRESS_KNOWN_POINTS);
        assert_eq!(result.summary, ConfidenceSummary::Early);
        assert_eq!(result.breakdown.capped_by, 0);
    }

    #[test]
    fn absent_signals_never_drop_below_base() {
        let input = HomeConfidenceInput {
            systems: SystemKind::ALL.iter().map(|k| SystemSignals::absent(*k)).collect(),
            ..empty_input()
        };
        assert_eq!(compute_home_confidence(&input, now()).score, ADDRESS_KNOWN_POINTS);
    }

    #[test]
    fn unknown_address_is_lifted_to_the_floor() {
        let input = HomeConfidenceInput {
            address_known: false,
            ..empty_input()
        };
        let result = compute_home_confidence(&input, now());
        assert_eq!(result.score, ADDRESS_KNOWN_POINTS);
        assert_eq!(result.breakdown.address_known, 0);
        assert_eq!(result.breakdown.floored_by, ADDRESS_KNOWN_POINTS);
        assert_eq!(result.breakdown.capped_by, 0);
        assert_eq!(result.summary, ConfidenceSummary::Early);
    }

    #[test]
    fn stacked_bonuses_hit_the_cap() {
        let input = HomeConfidenceInput {
            year_built: Some(1998),
            systems: SystemKind::ALL.iter().map(|k| full_signals(*k)).collect(),
            last_interaction_at: Some(now() - Duration::days(2)),
            ..empty_input()
        };
        let result = compute_home_confidence(&input, now());
        assert_eq!(result.score, SCORE_CAP);
        assert_eq!(result.summary, ConfidenceSummary::High);
        assert!(result.breakdown.capped_by > 0);
        assert!(result.score_unit() < 1.0);
    }

    #[test]
    fn install_evidence_tiers_are_exclusive() {
        let signals = full_signals(SystemKind::Hvac);
        assert_eq!(signals.install_evidence(), InstallEvidence::PermitOrInvoice);

        let input = HomeConfidenceInput {
            systems: vec![signals],
            ..empty_input()
        };
        let result = compute_home_confidence(&input, now());
        assert_eq!(result.breakdown.install_evidence, PERMIT_OR_INVOICE_POINTS);

        let owner_only = SystemSignals {
            has_owner_confirmation: true,
            has_install_year: true,
            ..SystemSignals::absent(SystemKind::Roof)
        };
        assert_eq!(owner_only.install_evidence().points(), OWNER_CONFIRMATION_POINTS);
    }

    #[test]
    fn more_signals_score_strictly_higher() {
        let fewer = HomeConfidenceInput {
            systems: vec![SystemSignals {
                has_install_year: true,
                ..SystemSignals::absent(SystemKind::Hvac)
            }],
            ..empty_input()
        };
        let more = HomeConfidenceInput {
            systems: vec![SystemSignals {
                has_install_year: true,
                has_photo: true,
                ..SystemSignals::absent(SystemKind::Hvac)
            }],
            ..empty_input()
        };
        assert!(
            compute_home_confidence(&more, now()).score
                > compute_home_confidence(&fewer, now()).score
        );
    }

    #[test]
    fn recency_decays_in_steps() {
        let at = |days| HomeConfidenceInput {
            last_interaction_at: Some(now() - Duration::days(days)),
            ..empty_input()
        };
        assert_eq!(
            compute_home_confidence(&at(10), now()).breakdown.recent_activity,
            RECENT_ACTIVITY_POINTS
        );
        assert_eq!(
            compute_home_confidence(&at(60), now()).breakdown.recent_activity,
            WARM_ACTIVITY_POINTS
        );
        assert_eq!(compute_home_confidence(&at(400), now()).breakdown.recent_activity, 0);
    }

    #[test]
    fn summary_buckets() {
        assert_eq!(ConfidenceSummary::from_score(49), ConfidenceSummary::Early);
        assert_eq!(ConfidenceSummary::from_score(50), ConfidenceSummary::Moderate);
        assert_eq!(ConfidenceSummary::from_score(70), ConfidenceSummary::High);
    }

    #[test]
    fn signals_from_records_reads_source_and_events() {
        let system = HomeSystem {
            id: Uuid::nil(),
            home_id: Uuid::nil(),
            kind: SystemKind::WaterHeater,
            install_year: Some(2020),
            install_source: InstallSource::OwnerReported,
            confidence: 0.7,
            material: None,
            status: SystemStatus::Active,
            updated_at: now(),
        };
        let assets = vec![HomeAssetRecord {
            system_kind: SystemKind::WaterHeater,
            material: Some("gas".to_string()),
            has_photo: true,
        }];
        let events = vec![HomeEventRecord {
            system_kind: Some(SystemKind::WaterHeater),
            kind: HomeEventKind::Maintenance,
            occurred_at: now() - Duration::days(5),
        }];
        let signals = SystemSignals::from_records(&system, &assets, &events);
        assert!(signals.has_install_year);
        assert!(signals.has_material);
        assert!(signals.has_photo);
        assert!(signals.has_owner_confirmation);
        assert!(!signals.has_permit_or_invoice);
        assert!(signals.has_maintenance_record);
        assert!((signals.completeness() - 5.0 / 6.0).abs() < 1e-9);
    }
}
