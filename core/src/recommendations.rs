//! Recommendations are generated fresh per request from current signals and
//! never queued. Ids are stable (`{type}:{system}`) so a dismissal holds
//! forever, and only the top three survivors are shown.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::chat_mode::SystemState;
use crate::confidence::SystemSignals;
use crate::systems::{InstallSource, SystemKind};

pub const MAX_VISIBLE: usize = 3;
pub const CRITICAL_PRIORITY_BONUS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    ConfirmInstall,
    ScheduleInspection,
    PlanReplacement,
    AddPhoto,
    LogMaintenance,
}

impl RecommendationType {
    pub fn as_str(self) -> &'static str {
        match self {
            RecommendationType::ConfirmInstall => "confirm_install",
            RecommendationType::ScheduleInspection => "schedule_inspection",
            RecommendationType::PlanReplacement => "plan_replacement",
            RecommendationType::AddPhoto => "add_photo",
            RecommendationType::LogMaintenance => "log_maintenance",
        }
    }

    fn base_priority(self) -> u32 {
        match self {
            RecommendationType::ConfirmInstall => 90,
            RecommendationType::ScheduleInspection => 85,
            RecommendationType::PlanReplacement => 80,
            RecommendationType::AddPhoto => 40,
            RecommendationType::LogMaintenance => 30,
        }
    }

    /// Points the home confidence score would gain if acted on.
    fn confidence_delta(self) -> u32 {
        match self {
            RecommendationType::ConfirmInstall => 8,
            RecommendationType::PlanReplacement => 0,
            RecommendationType::ScheduleInspection
            | RecommendationType::AddPhoto
            | RecommendationType::LogMaintenance => 2,
        }
    }

    fn rationale(self, kind: SystemKind) -> String {
        let name = kind.as_str().replace('_', " ");
        match self {
            RecommendationType::ConfirmInstall => {
                format!("Confirming when your {name} was installed sharpens its forecast.")
            }
            RecommendationType::ScheduleInspection => {
                format!("Something about your {name} looked different recently. A quick check can rule things out.")
            }
            RecommendationType::PlanReplacement => {
                format!("Your {name} is entering the later part of its typical life. There is time to plan.")
            }
            RecommendationType::AddPhoto => {
                format!("A photo of your {name} label helps us confirm its details.")
            }
            RecommendationType::LogMaintenance => {
                format!("Logging service on your {name} keeps its history complete.")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Recommendation {
    pub id: String,
    #[serde(rename = "type")]
    pub recommendation_type: RecommendationType,
    pub system_kind: SystemKind,
    pub rationale: String,
    pub confidence_delta: u32,
    pub priority: u32,
    pub route: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecommendationInput {
    pub signals: SystemSignals,
    pub install_source: InstallSource,
    pub state: SystemState,
}

fn build(kind: SystemKind, recommendation_type: RecommendationType) -> Recommendation {
    let bonus = if kind.is_critical() {
        CRITICAL_PRIORITY_BONUS
    } else {
        0
    };
    Recommendation {
        id: format!("{}:{}", recommendation_type.as_str(), kind.as_str()),
        recommendation_type,
        system_kind: kind,
        rationale: recommendation_type.rationale(kind),
        confidence_delta: recommendation_type.confidence_delta(),
        priority: recommendation_type.base_priority() + bonus,
        route: format!("/systems/{}", kind.as_str()),
    }
}

/// Every applicable recommendation, unfiltered and unsorted.
pub fn generate_recommendations(inputs: &[RecommendationInput]) -> Vec<Recommendation> {
    let mut out = Vec::new();
    for input in inputs {
        let kind = input.signals.kind;
        let weak_source = input.install_source.tier() <= InstallSource::Inferred.tier();
        if !input.signals.has_install_year
            || (weak_source
                && !input.signals.has_owner_confirmation
                && !input.signals.has_permit_or_invoice)
        {
            out.push(build(kind, RecommendationType::ConfirmInstall));
        }
        match input.state {
            SystemState::Elevated => out.push(build(kind, RecommendationType::ScheduleInspection)),
            SystemState::PlanningWindow => {
                out.push(build(kind, RecommendationType::PlanReplacement))
            }
            SystemState::DataGap | SystemState::Stable => {}
        }
        if !input.signals.has_photo {
            out.push(build(kind, RecommendationType::AddPhoto));
        }
        if !input.signals.has_maintenance_record {
            out.push(build(kind, RecommendationType::LogMaintenance));
        }
    }
    out
}

/// The recommendations to show: dismissed ids removed, highest priority
/// first (ties by id), at most [`MAX_VISIBLE`].
pub fn visible_recommendations(
    inputs: &[RecommendationInput],
    dismissed: &HashSet<String>,
) -> Vec<Recommendation> {
    let mut recs: Vec<Recommendation> = generate_recommendations(inputs)
        .into_iter()
        .filter(|r| !dismissed.contains(&r.id))
        .collect();
    recs.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
    recs.truncate(MAX_VISIBLE);
    recs
}

/// Parse a comma-separated dismissed-id list as sent by clients.
pub fn parse_dismissed(raw: Option<&str>) -> HashSet<String> {
    raw.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}
