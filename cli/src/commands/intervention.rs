use chrono::NaiveDate;
use clap::Subcommand;
use uuid::Uuid;

use hearth_core::intervention::{Decision, InterventionStatus};

use crate::util::{api_request, exit_error};

#[derive(Subcommand)]
pub enum InterventionCommands {
    /// Score every system and open interventions that cross the threshold
    Evaluate {
        #[arg(long)]
        home: Uuid,
    },
    /// List interventions for a home
    List {
        #[arg(long)]
        home: Uuid,
        /// open or closed
        #[arg(long)]
        status: Option<InterventionStatus>,
    },
    /// Record the homeowner's decision on an open intervention
    Decide {
        #[arg(long)]
        id: Uuid,
        /// replace_now, schedule_maintenance, defer_with_date, monitor, dismissed
        #[arg(long)]
        decision: String,
        /// Required with defer_with_date (YYYY-MM-DD)
        #[arg(long)]
        defer_until: Option<NaiveDate>,
    },
}

pub async fn run(api_url: &str, token: &str, command: InterventionCommands) -> i32 {
    match command {
        InterventionCommands::Evaluate { home } => {
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/v1/homes/{home}/interventions/evaluate"),
                Some(token),
                None,
                &[],
            )
            .await
        }
        InterventionCommands::List { home, status } => {
            let query: Vec<(String, String)> = status
                .map(|s| vec![("status".to_string(), s.as_str().to_string())])
                .unwrap_or_default();
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/homes/{home}/interventions"),
                Some(token),
                None,
                &query,
            )
            .await
        }
        InterventionCommands::Decide {
            id,
            decision,
            defer_until,
        } => {
            let decision = parse_decision(&decision, defer_until).unwrap_or_else(|e| {
                exit_error(
                    &e,
                    Some("defer_with_date needs --defer-until YYYY-MM-DD."),
                )
            });
            let body = match serde_json::to_value(decision) {
                Ok(body) => body,
                Err(e) => exit_error(&format!("Failed to encode decision: {e}"), None),
            };
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/v1/interventions/{id}/decision"),
                Some(token),
                Some(body),
                &[],
            )
            .await
        }
    }
}

fn parse_decision(tag: &str, defer_until: Option<NaiveDate>) -> Result<Decision, String> {
    let decision = Decision::from_parts(tag, defer_until).map_err(|e| e.to_string())?;
    if defer_until.is_some() && decision.defer_until().is_none() {
        return Err(format!(
            "--defer-until only applies to defer_with_date, not {}",
            decision.as_str()
        ));
    }
    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defer_requires_a_date() {
        assert!(parse_decision("defer_with_date", None).is_err());
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(
            parse_decision("defer_with_date", Some(date)).unwrap(),
            Decision::DeferWithDate { defer_until: date }
        );
    }

    #[test]
    fn stray_defer_date_is_rejected() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert!(parse_decision("monitor", Some(date)).is_err());
        assert_eq!(parse_decision("monitor", None).unwrap(), Decision::Monitor);
    }

    #[test]
    fn decision_body_matches_wire_format() {
        let date = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let body = serde_json::to_value(parse_decision("defer_with_date", Some(date)).unwrap())
            .unwrap();
        assert_eq!(
            body,
            serde_json::json!({"decision": "defer_with_date", "defer_until": "2026-03-01"})
        );
    }
}
