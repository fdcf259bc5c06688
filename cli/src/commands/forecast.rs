use chrono::{DateTime, NaiveDate, Utc};
use clap::Args;
use serde_json::json;

use hearth_core::failure::{FailureInputs, estimate_survival, failure_probability_within};
use hearth_core::intervention::RISK_OUTLOOK_YEARS;
use hearth_core::systems::SystemKind;

use crate::util::{exit_error, print_json, read_json_from_file};

/// Run the failure model locally, without the API.
#[derive(Args)]
pub struct ForecastArgs {
    #[arg(long, default_value = "hvac")]
    kind: SystemKind,
    /// Full model inputs as JSON (file path or '-' for stdin); flags override
    #[arg(long)]
    input: Option<String>,
    #[arg(long)]
    install_date: Option<NaiveDate>,
    /// 0 (mild) to 1 (harsh)
    #[arg(long)]
    climate: Option<f64>,
    /// 0 (neglected) to 1 (well kept)
    #[arg(long)]
    maintenance: Option<f64>,
    /// Share of evidence signals present, 0 to 1
    #[arg(long)]
    completeness: Option<f64>,
    /// The install date comes from a permit or inspection
    #[arg(long)]
    verified: bool,
    /// 0 (light use) to 1 (heavy use)
    #[arg(long)]
    usage_index: Option<f64>,
    #[arg(long)]
    environment_index: Option<f64>,
    /// Evaluate as of this instant (RFC 3339); defaults to now
    #[arg(long)]
    now: Option<DateTime<Utc>>,
}

pub fn run(args: ForecastArgs) -> i32 {
    let base = match &args.input {
        Some(source) => {
            let value = read_json_from_file(source).unwrap_or_else(|e| exit_error(&e, None));
            serde_json::from_value(value).unwrap_or_else(|e| {
                exit_error(
                    &format!("Invalid forecast input: {e}"),
                    Some("Fields: install_date, climate_stress_index, maintenance_score, feature_completeness, install_verified, has_usage_signal, usage_index, environment_index."),
                )
            })
        }
        None => default_inputs(),
    };
    let inputs = apply_flags(base, &args);
    let now = args.now.unwrap_or_else(Utc::now);

    let estimate = estimate_survival(args.kind, &inputs, now);
    let probability = failure_probability_within(&estimate, RISK_OUTLOOK_YEARS);
    print_json(&json!({
        "inputs": inputs,
        "estimate": estimate,
        "failure_probability_12m": probability,
    }));
    0
}

fn default_inputs() -> FailureInputs {
    FailureInputs {
        install_date: None,
        climate_stress_index: 0.5,
        maintenance_score: 0.5,
        feature_completeness: 0.0,
        install_verified: false,
        has_usage_signal: false,
        usage_index: None,
        environment_index: None,
    }
}

fn apply_flags(mut inputs: FailureInputs, args: &ForecastArgs) -> FailureInputs {
    if let Some(date) = args.install_date {
        inputs.install_date = Some(date);
    }
    if let Some(climate) = args.climate {
        inputs.climate_stress_index = climate;
    }
    if let Some(maintenance) = args.maintenance {
        inputs.maintenance_score = maintenance;
    }
    if let Some(completeness) = args.completeness {
        inputs.feature_completeness = completeness;
    }
    if args.verified {
        inputs.install_verified = true;
    }
    if let Some(index) = args.usage_index {
        inputs.usage_index = Some(index);
        inputs.has_usage_signal = true;
    }
    if let Some(index) = args.environment_index {
        inputs.environment_index = Some(index);
    }
    inputs
}
