//! Chat-mode selection for the home assistant.
//!
//! Two layers, both first-match-wins:
//! - each system is classified `data_gap` > `elevated` > `planning_window` > `stable`
//! - the home gets one mode from the confidence bucket, critical coverage and
//!   the system states
//!
//! A why/how question from the user switches the session to `interpretive`
//! until it is exited, after which the remembered mode comes back.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::confidence::ConfidenceSummary;
use crate::systems::SystemKind;

/// Below this system confidence, nothing else about the system is trusted.
pub const DATA_GAP_CONFIDENCE: f64 = 0.40;
pub const PLANNING_WINDOW_MONTHS: u32 = 36;
pub const MIN_CRITICAL_COVERAGE: f64 = 0.5;

static INTERPRETIVE_QUESTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(why|how)\b|\b(why|how)\b[^.!]*\?").expect("valid interpretive regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SystemState {
    DataGap,
    Elevated,
    PlanningWindow,
    Stable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SystemStateInput {
    pub kind: SystemKind,
    /// 0..=1
    pub confidence: f64,
    #[serde(default)]
    pub deviation_detected: bool,
    #[serde(default)]
    pub months_remaining: Option<u32>,
}

pub fn derive_system_state(input: &SystemStateInput) -> SystemState {
    if input.confidence.is_nan() || input.confidence < DATA_GAP_CONFIDENCE {
        SystemState::DataGap
    } else if input.deviation_detected {
        SystemState::Elevated
    } else if input
        .months_remaining
        .is_some_and(|months| months <= PLANNING_WINDOW_MONTHS)
    {
        SystemState::PlanningWindow
    } else {
        SystemState::Stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    BaselineEstablishment,
    ElevatedAttention,
    PlanningWindowAdvisory,
    Observational,
    SilentSteward,
    Interpretive,
}

impl ChatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::BaselineEstablishment => "baseline_establishment",
            ChatMode::ElevatedAttention => "elevated_attention",
            ChatMode::PlanningWindowAdvisory => "planning_window_advisory",
            ChatMode::Observational => "observational",
            ChatMode::SilentSteward => "silent_steward",
            ChatMode::Interpretive => "interpretive",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SystemSnapshot {
    pub kind: SystemKind,
    pub state: SystemState,
}

/// Everything the mode selector looks at, derived fresh per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChatModeContext {
    pub confidence: ConfidenceSummary,
    /// Share of critical systems (hvac, roof, water heater) not in `data_gap`
    pub critical_coverage: f64,
    pub user_confirmed: bool,
    pub systems: Vec<SystemSnapshot>,
}

impl ChatModeContext {
    /// Missing critical systems count as uncovered.
    pub fn from_systems(
        confidence: ConfidenceSummary,
        user_confirmed: bool,
        inputs: &[SystemStateInput],
    ) -> Self {
        let systems: Vec<SystemSnapshot> = inputs
            .iter()
            .map(|input| SystemSnapshot {
                kind: input.kind,
                state: derive_system_state(input),
            })
            .collect();

        let covered = SystemKind::CRITICAL
            .iter()
            .filter(|kind| {
                systems
                    .iter()
                    .any(|s| s.kind == **kind && s.state != SystemState::DataGap)
            })
            .count();

        Self {
            confidence,
            critical_coverage: covered as f64 / SystemKind::CRITICAL.len() as f64,
            user_confirmed,
            systems,
        }
    }

    fn any_in(&self, state: SystemState) -> bool {
        self.systems.iter().any(|s| s.state == state)
    }
}

pub fn select_chat_mode(ctx: &ChatModeContext) -> ChatMode {
    let baseline_missing = ctx.critical_coverage < MIN_CRITICAL_COVERAGE
        || (ctx.confidence == ConfidenceSummary::Early && !ctx.user_confirmed);

    if baseline_missing {
        ChatMode::BaselineEstablishment
    } else if ctx.any_in(SystemState::Elevated) {
        ChatMode::ElevatedAttention
    } else if ctx.any_in(SystemState::PlanningWindow) {
        ChatMode::PlanningWindowAdvisory
    } else if ctx.any_in(SystemState::DataGap) {
        ChatMode::Observational
    } else {
        ChatMode::SilentSteward
    }
}

pub fn is_interpretive_question(message: &str) -> bool {
    INTERPRETIVE_QUESTION.is_match(message)
}

/// Ephemeral per-conversation state, round-tripped by the client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChatModeSession {
    #[serde(default)]
    pub interpretive: bool,
    #[serde(default)]
    pub previous_mode: Option<ChatMode>,
}

impl ChatModeSession {
    pub fn effective_mode(&self, derived: ChatMode) -> ChatMode {
        if self.interpretive {
            ChatMode::Interpretive
        } else {
            derived
        }
    }

    /// Keeps the first remembered mode if already interpretive.
    pub fn enter_interpretive(&mut self, current: ChatMode) {
        if !self.interpretive {
            self.previous_mode = Some(current);
            self.interpretive = true;
        }
    }

    /// Leave interpretive mode and return the mode to show next.
    pub fn exit_interpretive(&mut self, derived: ChatMode) -> ChatMode {
        let restored = if self.interpretive {
            self.previous_mode.unwrap_or(derived)
        } else {
            derived
        };
        self.interpretive = false;
        self.previous_mode = None;
        restored
    }

    /// Feed a user message; returns the mode to use for the reply.
    pub fn observe_message(&mut self, message: &str, derived: ChatMode) -> ChatMode {
        if is_interpretive_question(message) {
            self.enter_interpretive(derived);
        }
        self.effective_mode(derived)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(kind: SystemKind, confidence: f64, deviation: bool, months: Option<u32>) -> SystemStateInput {
        SystemStateInput {
            kind,
            confidence,
            deviation_detected: deviation,
            months_remaining: months,
        }
    }

    #[test]
    fn system_state_priority_order() {
        let cases = [
            (input(SystemKind::Hvac, 0.2, true, Some(6)), SystemState::DataGap),
            (input(SystemKind::Hvac, 0.39, false, None), SystemState::DataGap),
            (input(SystemKind::Hvac, 0.7, true, Some(6)), SystemState::Elevated),
            (input(SystemKind::Hvac, 0.7, false, Some(36)), SystemState::PlanningWindow),
            (input(SystemKind::Hvac, 0.7, false, Some(37)), SystemState::Stable),
            (input(SystemKind::Hvac, 0.4, false, None), SystemState::Stable),
            (input(SystemKind::Hvac, f64::NAN, false, None), SystemState::DataGap),
        ];
        for (case, expected) in cases {
            assert_eq!(derive_system_state(&case), expected, "{case:?}");
        }
    }

    fn covered_critical() -> Vec<SystemStateInput> {
        vec![
            input(SystemKind::Hvac, 0.7, false, None),
            input(SystemKind::Roof, 0.7, false, None),
            input(SystemKind::WaterHeater, 0.7, false, None),
        ]
    }

    #[test]
    fn mode_selection_table() {
        let with = |extra: SystemStateInput| {
            let mut v = covered_critical();
            v.push(extra);
            v
        };
        let cases = [
            (ConfidenceSummary::Early, false, covered_critical(), ChatMode::BaselineEstablishment),
            (ConfidenceSummary::Early, true, covered_critical(), ChatMode::SilentSteward),
            (
                ConfidenceSummary::High,
                true,
                vec![input(SystemKind::Hvac, 0.9, false, None)],
                ChatMode::BaselineEstablishment,
            ),
            (
                ConfidenceSummary::Moderate,
                false,
                with(input(SystemKind::Plumbing, 0.8, true, Some(12))),
                ChatMode::ElevatedAttention,
            ),
            (
                ConfidenceSummary::Moderate,
                false,
                with(input(SystemKind::Electrical, 0.8, false, Some(12))),
                ChatMode::PlanningWindowAdvisory,
            ),
            (
                ConfidenceSummary::High,
                false,
                with(input(SystemKind::Foundation, 0.1, true, None)),
                ChatMode::Observational,
            ),
            (ConfidenceSummary::High, false, covered_critical(), ChatMode::SilentSteward),
        ];
        for (confidence, confirmed, systems, expected) in cases {
            let ctx = ChatModeContext::from_systems(confidence, confirmed, &systems);
            assert_eq!(select_chat_mode(&ctx), expected, "{ctx:?}");
        }
    }

    #[test]
    fn data_gap_beats_deviation_at_home_level() {
        let mut systems = covered_critical();
        systems.push(input(SystemKind::Exterior, 0.1, true, Some(3)));
        let ctx = ChatModeContext::from_systems(ConfidenceSummary::High, true, &systems);
        assert_eq!(ctx.systems[3].state, SystemState::DataGap);
        assert_eq!(select_chat_mode(&ctx), ChatMode::Observational);
    }

    #[test]
    fn coverage_counts_missing_critical_systems_as_gaps() {
        let ctx = ChatModeContext::from_systems(
            ConfidenceSummary::High,
            true,
            &[
                input(SystemKind::Hvac, 0.9, false, None),
                input(SystemKind::Roof, 0.1, false, None),
            ],
        );
        assert!((ctx.critical_coverage - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn interpretive_questions_are_detected() {
        assert!(is_interpretive_question("Why is my HVAC flagged?"));
        assert!(is_interpretive_question("how does the score work"));
        assert!(is_interpretive_question("Okay, and how long do roofs last?"));
        assert!(!is_interpretive_question("Thanks, that helps."));
        assert!(!is_interpretive_question("Schedule the inspection for Tuesday"));
    }

    #[test]
    fn interpretive_override_remembers_and_restores() {
        let mut session = ChatModeSession::default();
        assert_eq!(
            session.observe_message("Tell me more", ChatMode::SilentSteward),
            ChatMode::SilentSteward
        );

        assert_eq!(
            session.observe_message("Why is that?", ChatMode::PlanningWindowAdvisory),
            ChatMode::Interpretive
        );
        assert_eq!(session.previous_mode, Some(ChatMode::PlanningWindowAdvisory));

        // a second question keeps the original remembered mode
        session.observe_message("How sure are you?", ChatMode::ElevatedAttention);
        assert_eq!(session.previous_mode, Some(ChatMode::PlanningWindowAdvisory));

        assert_eq!(
            session.exit_interpretive(ChatMode::SilentSteward),
            ChatMode::PlanningWindowAdvisory
        );
        assert_eq!(session, ChatModeSession::default());
    }

    #[test]
    fn exit_without_override_returns_derived() {
        let mut session = ChatModeSession::default();
        assert_eq!(session.exit_interpretive(ChatMode::Observational), ChatMode::Observational);
    }
}
