//! Intervention eligibility and lifecycle.
//!
//! `InterventionScore = FailureProbability × EmergencyCost + UrgencyPremium`.
//! A system is eligible only when the score clears the home's threshold AND no
//! cooldown is active AND no intervention is already open for it. The two
//! state checks come from persisted rows; this module never looks them up.

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ParseTagError;
use crate::seasonal::{SeasonalFactor, SeasonalRiskContext};
use crate::systems::SystemKind;

pub const DEFAULT_INTERVENTION_THRESHOLD: f64 = 1500.0;
pub const DEFAULT_COOLDOWN_DAYS: i64 = 30;
pub const DEFAULT_TIMEOUT_DAYS: i64 = 14;
/// Horizon of the risk outlook fed into the score.
pub const RISK_OUTLOOK_YEARS: f64 = 1.0;

/// Dollar estimates for acting now versus waiting for failure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EstimatedImpactCost {
    pub proactive: f64,
    pub emergency: f64,
    pub potential_damage: f64,
}

impl EstimatedImpactCost {
    pub fn default_for(kind: SystemKind) -> Self {
        let (proactive, emergency, potential_damage) = match kind {
            SystemKind::Hvac => (6_500.0, 11_000.0, 2_500.0),
            SystemKind::Roof => (12_000.0, 18_000.0, 15_000.0),
            SystemKind::WaterHeater => (1_800.0, 3_200.0, 6_000.0),
            SystemKind::Electrical => (3_000.0, 6_000.0, 8_000.0),
            SystemKind::Plumbing => (2_500.0, 5_000.0, 12_000.0),
            SystemKind::Foundation => (8_000.0, 20_000.0, 25_000.0),
            SystemKind::Exterior => (5_000.0, 8_000.0, 6_000.0),
        };
        Self {
            proactive,
            emergency,
            potential_damage,
        }
    }

    /// Read the untyped `estimated_impact_cost` JSON column.
    ///
    /// Accepts snake_case or camelCase keys and numbers or numeric strings
    /// (`"$4,200"`). Each missing, negative or unreadable field falls back to
    /// the kind default on its own.
    pub fn from_json(kind: SystemKind, value: Option<&serde_json::Value>) -> Self {
        let defaults = Self::default_for(kind);
        let Some(object) = value.and_then(|v| v.as_object()) else {
            return defaults;
        };

        Self {
            proactive: read_amount(object, &["proactive", "proactive_cost", "proactiveCost"])
                .unwrap_or(defaults.proactive),
            emergency: read_amount(object, &["emergency", "emergency_cost", "emergencyCost"])
                .unwrap_or(defaults.emergency),
            potential_damage: read_amount(
                object,
                &[
                    "potential_damage",
                    "potential_damage_cost",
                    "potentialDamage",
                    "potentialDamageCost",
                ],
            )
            .unwrap_or(defaults.potential_damage),
        }
    }
}

fn read_amount(object: &serde_json::Map<String, serde_json::Value>, keys: &[&str]) -> Option<f64> {
    keys.iter().find_map(|key| {
        let amount = match object.get(*key)? {
            serde_json::Value::Number(n) => n.as_f64()?,
            serde_json::Value::String(s) => s
                .trim()
                .trim_start_matches('$')
                .replace(',', "")
                .parse::<f64>()
                .ok()?,
            _ => return None,
        };
        (amount.is_finite() && amount >= 0.0).then_some(amount)
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct InterventionCandidate {
    pub system_kind: SystemKind,
    /// Probability of failure within the risk outlook, 0..=1
    pub failure_probability: f64,
    pub costs: EstimatedImpactCost,
    /// Home-specific dollar threshold
    pub threshold: f64,
    pub seasonal: SeasonalRiskContext,
}

/// Persisted state looked up by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct InterventionGate {
    pub cooldown_active: bool,
    pub open_intervention: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BlockReason {
    BelowThreshold,
    CooldownActive,
    OpenIntervention,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct InterventionEvaluation {
    pub system_kind: SystemKind,
    pub eligible: bool,
    pub score: f64,
    pub threshold: f64,
    pub failure_probability: f64,
    pub emergency_cost: f64,
    pub urgency_premium: f64,
    pub aligned_factors: Vec<SeasonalFactor>,
    pub blocked_by: Vec<BlockReason>,
}

/// Bonus added when seasonal risk lines up with the system type.
pub fn urgency_premium(
    kind: SystemKind,
    costs: &EstimatedImpactCost,
    seasonal: &SeasonalRiskContext,
) -> (f64, Vec<SeasonalFactor>) {
    let aligned = seasonal.aligned_factors(kind);
    let weight: f64 = aligned.iter().map(|f| f.premium_weight()).sum();
    (weight * costs.potential_damage, aligned)
}

pub fn evaluate_intervention(
    candidate: &InterventionCandidate,
    gate: InterventionGate,
) -> InterventionEvaluation {
    let failure_probability = if candidate.failure_probability.is_nan() {
        0.0
    } else {
        candidate.failure_probability.clamp(0.0, 1.0)
    };
    let threshold = if candidate.threshold.is_finite() && candidate.threshold >= 0.0 {
        candidate.threshold
    } else {
        DEFAULT_INTERVENTION_THRESHOLD
    };

    let (premium, aligned_factors) =
        urgency_premium(candidate.system_kind, &candidate.costs, &candidate.seasonal);
    let score = round_cents(failure_probability * candidate.costs.emergency + premium);

    let mut blocked_by = Vec::new();
    if score < threshold {
        blocked_by.push(BlockReason::BelowThreshold);
    }
    if gate.cooldown_active {
        blocked_by.push(BlockReason::CooldownActive);
    }
    if gate.open_intervention {
        blocked_by.push(BlockReason::OpenIntervention);
    }

    InterventionEvaluation {
        system_kind: candidate.system_kind,
        eligible: blocked_by.is_empty(),
        score,
        threshold,
        failure_probability,
        emergency_cost: candidate.costs.emergency,
        urgency_premium: round_cents(premium),
        aligned_factors,
        blocked_by,
    }
}

fn round_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Cooldown, timeout and default-threshold settings for a deployment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterventionPolicy {
    pub cooldown_days: i64,
    pub timeout_days: i64,
    pub default_threshold: f64,
}

impl Default for InterventionPolicy {
    fn default() -> Self {
        Self {
            cooldown_days: DEFAULT_COOLDOWN_DAYS,
            timeout_days: DEFAULT_TIMEOUT_DAYS,
            default_threshold: DEFAULT_INTERVENTION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Open,
    Closed,
}

impl InterventionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            InterventionStatus::Open => "open",
            InterventionStatus::Closed => "closed",
        }
    }
}

impl FromStr for InterventionStatus {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "open" => Ok(InterventionStatus::Open),
            "closed" => Ok(InterventionStatus::Closed),
            _ => Err(ParseTagError::new("intervention status", s, "open, closed")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Decision,
    Timeout,
}

impl CloseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Decision => "decision",
            CloseReason::Timeout => "timeout",
        }
    }
}

impl FromStr for CloseReason {
    type Err = ParseTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "decision" => Ok(CloseReason::Decision),
            "timeout" => Ok(CloseReason::Timeout),
            _ => Err(ParseTagError::new("close reason", s, "decision, timeout")),
        }
    }
}

/// Homeowner decision that closes an intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    ReplaceNow,
    ScheduleMaintenance,
    DeferWithDate { defer_until: NaiveDate },
    Monitor,
    Dismissed,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::ReplaceNow => "replace_now",
            Decision::ScheduleMaintenance => "schedule_maintenance",
            Decision::DeferWithDate { .. } => "defer_with_date",
            Decision::Monitor => "monitor",
            Decision::Dismissed => "dismissed",
        }
    }

    /// Rebuild from the stored tag and optional deferral date.
    pub fn from_parts(tag: &str, defer_until: Option<NaiveDate>) -> Result<Self, ParseTagError> {
        const EXPECTED: &str =
            "replace_now, schedule_maintenance, defer_with_date, monitor, dismissed";
        match tag.trim() {
            "replace_now" => Ok(Decision::ReplaceNow),
            "schedule_maintenance" => Ok(Decision::ScheduleMaintenance),
            "defer_with_date" => defer_until
                .map(|defer_until| Decision::DeferWithDate { defer_until })
                .ok_or_else(|| ParseTagError::new("decision", tag, EXPECTED)),
            "monitor" => Ok(Decision::Monitor),
            "dismissed" => Ok(Decision::Dismissed),
            _ => Err(ParseTagError::new("decision", tag, EXPECTED)),
        }
    }

    pub fn defer_until(self) -> Option<NaiveDate> {
        match self {
            Decision::DeferWithDate { defer_until } => Some(defer_until),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InterventionError {
    #[error("intervention {id} is already closed")]
    AlreadyClosed { id: Uuid },
    #[error("deferral date {defer_until} is not after {today}")]
    DeferralNotInFuture {
        defer_until: NaiveDate,
        today: NaiveDate,
    },
}

/// An advisory conversation opened by a risk threshold crossing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Intervention {
    pub id: Uuid,
    pub home_id: Uuid,
    pub system_kind: SystemKind,
    pub status: InterventionStatus,
    pub score: f64,
    pub threshold: f64,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Decision>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

impl Intervention {
    pub fn open(home_id: Uuid, evaluation: &InterventionEvaluation, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::now_v7(),
            home_id,
            system_kind: evaluation.system_kind,
            status: InterventionStatus::Open,
            score: evaluation.score,
            threshold: evaluation.threshold,
            opened_at: now,
            closed_at: None,
            close_reason: None,
            decision: None,
            cooldown_until: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == InterventionStatus::Open
    }

    /// Close with a homeowner decision. Deferrals keep the cooldown running at
    /// least until the chosen date.
    pub fn close(
        &mut self,
        decision: Decision,
        policy: &InterventionPolicy,
        now: DateTime<Utc>,
    ) -> Result<(), InterventionError> {
        if !self.is_open() {
            return Err(InterventionError::AlreadyClosed { id: self.id });
        }
        let mut cooldown_until = now + Duration::days(policy.cooldown_days);
        if let Some(defer_until) = decision.defer_until() {
            let today = now.date_naive();
            if defer_until <= today {
                return Err(InterventionError::DeferralNotInFuture { defer_until, today });
            }
            let deferred = defer_until.and_time(chrono::NaiveTime::MIN).and_utc();
            cooldown_until = cooldown_until.max(deferred);
        }

        self.status = InterventionStatus::Closed;
        self.closed_at = Some(now);
        self.close_reason = Some(CloseReason::Decision);
        self.decision = Some(decision);
        self.cooldown_until = Some(cooldown_until);
        Ok(())
    }

    /// Close an intervention nobody answered. Returns true if it was closed.
    pub fn expire_if_due(&mut self, policy: &InterventionPolicy, now: DateTime<Utc>) -> bool {
        if !self.is_open() || now < self.opened_at + Duration::days(policy.timeout_days) {
            return false;
        }
        self.status = InterventionStatus::Closed;
        self.closed_at = Some(now);
        self.close_reason = Some(CloseReason::Timeout);
        self.cooldown_until = Some(now + Duration::days(policy.cooldown_days));
        true
    }

    pub fn cooldown_active(&self, now: DateTime<Utc>) -> bool {
        !self.is_open() && self.cooldown_until.is_some_and(|until| now < until)
    }
}

/// Gate state for one system from its intervention history.
pub fn gate_for(history: &[Intervention], kind: SystemKind, now: DateTime<Utc>) -> InterventionGate {
    let mine = || history.iter().filter(move |i| i.system_kind == kind);
    InterventionGate {
        cooldown_active: mine().any(|i| i.cooldown_active(now)),
        open_intervention: mine().any(Intervention::is_open),
    }
}
