use clap::{Subcommand, ValueEnum};
use serde_json::json;
use uuid::Uuid;

use hearth_core::systems::{InstallSource, SystemKind, UpdateOrigin};

use crate::util::{api_request, exit_error};

#[derive(Clone, Copy, ValueEnum)]
pub enum OriginArg {
    /// The homeowner is correcting the record (may lower the source tier)
    User,
    /// A permit or enrichment job found evidence (never lowers the tier)
    Evidence,
}

impl From<OriginArg> for UpdateOrigin {
    fn from(arg: OriginArg) -> Self {
        match arg {
            OriginArg::User => UpdateOrigin::UserCorrection,
            OriginArg::Evidence => UpdateOrigin::Evidence,
        }
    }
}

#[derive(Subcommand)]
pub enum SystemCommands {
    /// List active systems with their evidence and state
    List {
        #[arg(long)]
        home: Uuid,
    },
    /// Failure forecast for one system
    Forecast {
        #[arg(long)]
        home: Uuid,
        #[arg(long)]
        kind: SystemKind,
    },
    /// Update install year and source
    SetInstall {
        #[arg(long)]
        home: Uuid,
        #[arg(long)]
        kind: SystemKind,
        /// Install year; omit with --clear-year to forget it
        #[arg(long, conflicts_with = "clear_year")]
        year: Option<i32>,
        #[arg(long)]
        clear_year: bool,
        /// permit, inspection, owner_reported, inferred, heuristic, unknown
        #[arg(long, default_value = "owner_reported")]
        source: InstallSource,
        #[arg(long)]
        material: Option<String>,
        #[arg(long, value_enum, default_value = "user")]
        origin: OriginArg,
        /// The system was physically replaced
        #[arg(long)]
        replaced: bool,
    },
}

pub async fn run(api_url: &str, token: &str, command: SystemCommands) -> i32 {
    match command {
        SystemCommands::List { home } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/homes/{home}/systems"),
                Some(token),
                None,
                &[],
            )
            .await
        }
        SystemCommands::Forecast { home, kind } => {
            api_request(
                api_url,
                reqwest::Method::GET,
                &format!("/v1/homes/{home}/systems/{kind}/forecast"),
                Some(token),
                None,
                &[],
            )
            .await
        }
        SystemCommands::SetInstall {
            home,
            kind,
            year,
            clear_year,
            source,
            material,
            origin,
            replaced,
        } => {
            if year.is_none() && !clear_year && material.is_none() {
                exit_error(
                    "Nothing to update",
                    Some("Pass --year, --material, or --clear-year."),
                );
            }
            let body = install_body(year, source, material, origin.into(), replaced);
            api_request(
                api_url,
                reqwest::Method::POST,
                &format!("/v1/homes/{home}/systems/{kind}/install"),
                Some(token),
                Some(body),
                &[],
            )
            .await
        }
    }
}

fn install_body(
    year: Option<i32>,
    source: InstallSource,
    material: Option<String>,
    origin: UpdateOrigin,
    replaced: bool,
) -> serde_json::Value {
    json!({
        "install_year": year,
        "source": source,
        "material": material,
        "origin": origin,
        "replaced": replaced,
    })
}
