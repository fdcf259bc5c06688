use clap::Subcommand;
use serde_json::json;
use uuid::Uuid;

use hearth_core::systems::{HomeEventKind, SystemKind};

use crate::util::{api_request, exit_error};

#[derive(Subcommand)]
pub enum HomeCommands {
    /// Onboard a home; creates default records for all seven systems
    Create {
        #[arg(long)]
        address: String,
        /// Two-letter state code (hurricane exposure)
        #[arg(long)]
        state: Option<String>,
        /// IANA timezone name (default UTC)
        #[arg(long)]
        timezone: Option<String>,
        #[arg(long)]
        year_built: Option<i32>,
        /// Climate stress index, 0..=1
        #[arg(long)]
        climate_stress: Option<f64>,
        /// Dollar threshold for opening interventions
        #[arg(long)]
        threshold: Option<f64>,
    },
    /// List your homes
    List,
    /// Show the home confidence score and its breakdown
    Confidence {
        #[arg(long)]
        home: Uuid,
    },
    /// Record activity (maintenance, repair, inspection, anomaly_reported, ...)
    Event {
        #[arg(long)]
        home: Uuid,
        #[arg(long)]
        kind: HomeEventKind,
        /// System the event concerns; omit for home-wide events
        #[arg(long)]
        system: Option<SystemKind>,
        /// RFC3339 timestamp (default now)
        #[arg(long)]
        occurred_at: Option<chrono::DateTime<chrono::Utc>>,
    },
    /// Attach a documented asset to a system
    Asset {
        #[arg(long)]
        home: Uuid,
        #[arg(long)]
        system: SystemKind,
        #[arg(long)]
        material: Option<String>,
        /// A photo of the system was taken
        #[arg(long)]
        photo: bool,
    },
}

pub async fn run(api_url: &str, token: &str, command: HomeCommands) -> i32 {
    match command {
        HomeCommands::Create {
            address,
            state,
            timezone,
            year_built,
            climate_stress,
            threshold,
        } => {
            if climate_stress.is_some_and(|c| !(0.0..=1.0).contains(&c)) {
                exit_error("--climate-stress must be within 0..=1", None);
            }
            let mut body = json!({ "address": address });
            if let Some(v) = state {
                body["state_code"] = json!(v);
            }
            if let Some(v) = timezone {
                body["timezone"] = json!(v);
            }
            if let Some(v) = year_built {
                body["year_built"] = json!(v);
            }
            if let Some(v) = climate_stress {
                body["climate_stress_index"] = json!(v);
            }
            if let Some(v) = threshold {
                body["intervention_threshold"] = json!(v);
            }
            api_request(api_url, reqwest::Method::POST, "/v1/homes", Some(token), Some(body), &[])
                .await
        }
        HomeCommands::List => {
            api_request(api_url, reqwest::Method::GET, "/v1/homes", Some(token), None, &[]).await
        }
        HomeCommands::Confidence { home } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/homes/{home}/confidence"),
                Some(token),
                None,
                &[],
            )
            .await
        }
        HomeCommands::Event {
            home,
            kind,
            system,
            occurred_at,
        } => {
            let mut body = json!({ "kind": kind });
            if let Some(system) = system {
                body["system_kind"] = json!(system);
            }
            if let Some(at) = occurred_at {
                body["occurred_at"] = json!(at);
            }
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/v1/homes/{home}/events"),
                Some(token),
                Some(body),
                &[],
            )
            .await
        }
        HomeCommands::Asset {
            home,
            system,
            material,
            photo,
        } => {
            let body = json!({
                "system_kind": system,
                "material": material,
                "has_photo": photo,
            });
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/v1/homes/{home}/assets"),
                Some(token),
                Some(body),
                &[],
            )
            .await
        }
    }
}
