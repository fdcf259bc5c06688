//! System failure / survival forecasting.
//!
//! A baseline lifespan (median, sigma) per kind of system is scaled by a
//! product of input multipliers, clamped to [`MULTIPLIER_MIN`, `MULTIPLIER_MAX`].
//! Low confidence widens sigma. Percentile failure dates are read off a
//! normal lifespan distribution and never fall before `now`.
//!
//! The model version and the HVAC constants are a published contract:
//! golden-value tests depend on them.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::confidence::SystemSignals;
use crate::systems::{HomeSystem, SystemKind};

pub const HVAC_MODEL_VERSION: &str = "hvac_failure_v1";
pub const SYSTEM_MODEL_VERSION: &str = "system_failure_v1";

pub const HVAC_MEDIAN_LIFESPAN_YEARS: f64 = 13.0;
pub const HVAC_SIGMA_YEARS: f64 = 2.5;

pub const MULTIPLIER_MIN: f64 = 0.6;
pub const MULTIPLIER_MAX: f64 = 1.3;

pub const CLIMATE_SLOPE: f64 = 0.18;
pub const MAINTENANCE_FLOOR: f64 = 0.90;
pub const MAINTENANCE_SLOPE: f64 = 0.15;
pub const INSTALL_VERIFIED_MULTIPLIER: f64 = 1.03;
pub const USAGE_CEILING: f64 = 1.10;
pub const USAGE_SLOPE: f64 = 0.25;
pub const ENVIRONMENT_SLOPE: f64 = 0.15;

pub const CONFIDENCE_BASE: f64 = 0.35;
pub const FEATURE_COMPLETENESS_WEIGHT: f64 = 0.25;
pub const INSTALL_VERIFIED_WEIGHT: f64 = 0.20;
pub const USAGE_SIGNAL_WEIGHT: f64 = 0.15;
pub const UNKNOWN_INSTALL_PENALTY: f64 = 0.10;
pub const CONFIDENCE_MIN: f64 = 0.20;
pub const CONFIDENCE_MAX: f64 = 0.95;

/// z-score of the 90th percentile of a standard normal.
const Z_P90: f64 = 1.281_551_565_544_600_4;
const DAYS_PER_YEAR: f64 = 365.25;

/// Baseline lifespan parameters for one kind of system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifespanBaseline {
    pub model_version: &'static str,
    pub median_years: f64,
    pub sigma_years: f64,
}

impl LifespanBaseline {
    pub const HVAC: LifespanBaseline = LifespanBaseline {
        model_version: HVAC_MODEL_VERSION,
        median_years: HVAC_MEDIAN_LIFESPAN_YEARS,
        sigma_years: HVAC_SIGMA_YEARS,
    };

    pub fn for_kind(kind: SystemKind) -> Self {
        let (median_years, sigma_years) = match kind {
            SystemKind::Hvac => return Self::HVAC,
            SystemKind::Roof => (22.0, 4.0),
            SystemKind::WaterHeater => (11.0, 2.0),
            SystemKind::Electrical => (35.0, 6.0),
            SystemKind::Plumbing => (40.0, 7.0),
            SystemKind::Foundation => (75.0, 12.0),
            SystemKind::Exterior => (25.0, 5.0),
        };
        Self {
            model_version: SYSTEM_MODEL_VERSION,
            median_years,
            sigma_years,
        }
    }
}

/// Inputs to the survival model. Indices are clamped to [0, 1] before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct FailureInputs {
    #[serde(default)]
    pub install_date: Option<NaiveDate>,
    #[serde(default = "neutral_index")]
    pub climate_stress_index: f64,
    #[serde(default = "neutral_index")]
    pub maintenance_score: f64,
    #[serde(default)]
    pub feature_completeness: f64,
    #[serde(default)]
    pub install_verified: bool,
    #[serde(default)]
    pub has_usage_signal: bool,
    #[serde(default)]
    pub usage_index: Option<f64>,
    #[serde(default)]
    pub environment_index: Option<f64>,
}

fn neutral_index() -> f64 {
    0.5
}

impl FailureInputs {
    /// Build model inputs for a stored system. A bare install year is placed
    /// mid-year.
    pub fn from_system(
        system: &HomeSystem,
        signals: &SystemSignals,
        climate_stress_index: f64,
        maintenance_score: f64,
    ) -> Self {
        Self {
            install_date: system
                .install_year
                .and_then(|year| NaiveDate::from_ymd_opt(year, 7, 1)),
            climate_stress_index,
            maintenance_score,
            feature_completeness: signals.completeness(),
            install_verified: system.install_source.is_verified(),
            has_usage_signal: false,
            usage_index: None,
            environment_index: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Multipliers {
    pub climate: f64,
    pub maintenance: f64,
    pub install: f64,
    pub usage: f64,
    pub environment: f64,
    /// Product before clamping
    pub total_unclamped: f64,
    /// Product clamped to [0.6, 1.3]
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BaselineParams {
    pub median_years: f64,
    pub sigma_years: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EffectiveParams {
    pub median_years: f64,
    pub sigma_years: f64,
    pub age_years: f64,
    /// True when no install date was known and a mid-life age was assumed
    pub install_date_assumed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Provenance {
    pub model_version: String,
    pub multipliers: Multipliers,
    pub baseline: BaselineParams,
    pub effective: EffectiveParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SurvivalEstimate {
    pub system_kind: SystemKind,
    pub years_remaining_p50: f64,
    pub p10_failure_date: NaiveDate,
    pub p50_failure_date: NaiveDate,
    pub p90_failure_date: NaiveDate,
    pub confidence_0_1: f64,
    pub provenance: Provenance,
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn years_to_days(years: f64) -> Duration {
    Duration::days((years * DAYS_PER_YEAR).round() as i64)
}

pub fn compute_multipliers(inputs: &FailureInputs) -> Multipliers {
    let climate = 1.0 - CLIMATE_SLOPE * clamp_unit(inputs.climate_stress_index);
    let maintenance = MAINTENANCE_FLOOR + MAINTENANCE_SLOPE * clamp_unit(inputs.maintenance_score);
    let install = if inputs.install_verified {
        INSTALL_VERIFIED_MULTIPLIER
    } else {
        1.0
    };
    let usage = match (inputs.has_usage_signal, inputs.usage_index) {
        (true, Some(index)) => USAGE_CEILING - USAGE_SLOPE * clamp_unit(index),
        _ => 1.0,
    };
    let environment = inputs
        .environment_index
        .map(|index| 1.0 - ENVIRONMENT_SLOPE * clamp_unit(index))
        .unwrap_or(1.0);

    let total_unclamped = climate * maintenance * install * usage * environment;
    Multipliers {
        climate,
        maintenance,
        install,
        usage,
        environment,
        total_unclamped,
        total: total_unclamped.clamp(MULTIPLIER_MIN, MULTIPLIER_MAX),
    }
}

/// Confidence in the forecast. Reaches [`CONFIDENCE_MAX`] only with a known
/// install date, full feature completeness, verified install and a usage signal.
pub fn forecast_confidence(inputs: &FailureInputs) -> f64 {
    let usage_present = inputs.has_usage_signal && inputs.usage_index.is_some();
    let mut confidence = CONFIDENCE_BASE
        + FEATURE_COMPLETENESS_WEIGHT * clamp_unit(inputs.feature_completeness);
    if inputs.install_verified {
        confidence += INSTALL_VERIFIED_WEIGHT;
    }
    if usage_present {
        confidence += USAGE_SIGNAL_WEIGHT;
    }
    if inputs.install_date.is_none() {
        confidence -= UNKNOWN_INSTALL_PENALTY;
    }
    round_to(confidence, 6).clamp(CONFIDENCE_MIN, CONFIDENCE_MAX)
}

/// Forecast when a system will fail. Deterministic in `inputs` and `now`.
pub fn estimate_survival(
    kind: SystemKind,
    inputs: &FailureInputs,
    now: DateTime<Utc>,
) -> SurvivalEstimate {
    let baseline = LifespanBaseline::for_kind(kind);
    let today = now.date_naive();

    let multipliers = compute_multipliers(inputs);
    let confidence = forecast_confidence(inputs);

    let median_years = baseline.median_years * multipliers.total;
    let sigma_years = baseline.sigma_years * (1.0 + (CONFIDENCE_MAX - confidence));

    let (install_date, install_date_assumed) = match inputs.install_date {
        Some(date) => (date, false),
        None => (
            today
                .checked_sub_signed(years_to_days(baseline.median_years / 2.0))
                .unwrap_or(NaiveDate::MIN),
            true,
        ),
    };
    let age_years = (today.signed_duration_since(install_date).num_days() as f64 / DAYS_PER_YEAR)
        .max(0.0);

    let spread = Z_P90 * sigma_years;
    let failure_date = |lifespan_years: f64| {
        install_date
            .checked_add_signed(years_to_days(lifespan_years))
            .unwrap_or(if lifespan_years < 0.0 {
                NaiveDate::MIN
            } else {
                NaiveDate::MAX
            })
            .max(today)
    };

    SurvivalEstimate {
        system_kind: kind,
        years_remaining_p50: round_to((median_years - age_years).max(0.0), 1),
        p10_failure_date: failure_date(median_years - spread),
        p50_failure_date: failure_date(median_years),
        p90_failure_date: failure_date(median_years + spread),
        confidence_0_1: round_to(confidence, 3),
        provenance: Provenance {
            model_version: baseline.model_version.to_string(),
            multipliers,
            baseline: BaselineParams {
                median_years: baseline.median_years,
                sigma_years: baseline.sigma_years,
            },
            effective: EffectiveParams {
                median_years,
                sigma_years,
                age_years,
                install_date_assumed,
            },
        },
    }
}

/// HVAC failure window under the published `hvac_failure_v1` constants.
pub fn estimate_hvac_failure(inputs: &FailureInputs, now: DateTime<Utc>) -> SurvivalEstimate {
    estimate_survival(SystemKind::Hvac, inputs, now)
}

/// Probability that the system fails within `horizon_years`, given it has
/// survived to its current age.
pub fn failure_probability_within(estimate: &SurvivalEstimate, horizon_years: f64) -> f64 {
    let effective = &estimate.provenance.effective;
    if effective.sigma_years <= 0.0 {
        return if effective.age_years + horizon_years >= effective.median_years {
            1.0
        } else {
            0.0
        };
    }
    let cdf = |years: f64| normal_cdf((years - effective.median_years) / effective.sigma_years);
    let survived = 1.0 - cdf(effective.age_years);
    if survived < 1e-9 {
        return 1.0;
    }
    let fails = cdf(effective.age_years + horizon_years.max(0.0)) - cdf(effective.age_years);
    clamp_unit(fails / survived)
}

fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26 (|error| < 1.5e-7).
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 21, 0, 0, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn golden_inputs() -> FailureInputs {
        FailureInputs {
            install_date: Some(date(2023, 12, 1)),
            climate_stress_index: 0.8,
            maintenance_score: 0.5,
            feature_completeness: 0.8,
            install_verified: true,
            has_usage_signal: false,
            usage_index: None,
            environment_index: None,
        }
    }

    fn assert_ordered(estimate: &SurvivalEstimate) {
        assert!(estimate.p10_failure_date <= estimate.p50_failure_date);
        assert!(estimate.p50_failure_date <= estimate.p90_failure_date);
    }

    #[test]
    fn extreme_install_dates_saturate_instead_of_overflowing() {
        let today = now().date_naive();
        for install in [NaiveDate::MAX, NaiveDate::MIN] {
            let inputs = FailureInputs {
                install_date: Some(install),
                ..golden_inputs()
            };
            let estimate = estimate_survival(SystemKind::Hvac, &inputs, now());
            assert_ordered(&estimate);
            assert!(estimate.p10_failure_date >= today);
            assert!(estimate.years_remaining_p50 >= 0.0);
        }

        let far_future = FailureInputs {
            install_date: Some(NaiveDate::MAX),
            ..golden_inputs()
        };
        let estimate = estimate_survival(SystemKind::Roof, &far_future, now());
        assert_eq!(estimate.p90_failure_date, NaiveDate::MAX);
        assert_eq!(estimate.provenance.effective.age_years, 0.0);
    }

    #[test]
    fn golden_scenario_matches_published_constants() {
        let estimate = estimate_hvac_failure(&golden_inputs(), now());
        let m = estimate.provenance.multipliers;

        assert!((m.climate - 0.856).abs() < 0.005);
        assert!((m.maintenance - 0.975).abs() < 0.005);
        assert!((m.install - 1.03).abs() < 0.005);
        assert!(estimate.years_remaining_p50 > 5.0 && estimate.years_remaining_p50 < 15.0);
        assert!(estimate.confidence_0_1 > 0.5 && estimate.confidence_0_1 < 0.9);
        assert_eq!(estimate.provenance.model_version, HVAC_MODEL_VERSION);
        assert_eq!(estimate.provenance.baseline.median_years, 13.0);
        assert_eq!(estimate.provenance.baseline.sigma_years, 2.5);
        assert_ordered(&estimate);
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let first = estimate_hvac_failure(&golden_inputs(), now());
        let second = estimate_hvac_failure(&golden_inputs(), now());
        assert_eq!(first, second);
    }

    #[test]
    fn expired_system_reports_zero_remaining_and_no_past_dates() {
        let inputs = FailureInputs {
            install_date: Some(date(1985, 6, 1)),
            ..golden_inputs()
        };
        let estimate = estimate_hvac_failure(&inputs, now());
        let today = now().date_naive();

        assert_eq!(estimate.years_remaining_p50, 0.0);
        assert!(estimate.p10_failure_date >= today);
        assert!(estimate.p50_failure_date >= today);
        assert!(estimate.p90_failure_date >= today);
        assert_ordered(&estimate);
    }

    #[test]
    fn maximum_stress_clamps_to_floor() {
        let inputs = FailureInputs {
            install_date: Some(date(2020, 1, 1)),
            climate_stress_index: 1.0,
            maintenance_score: 0.0,
            feature_completeness: 0.0,
            install_verified: false,
            has_usage_signal: true,
            usage_index: Some(1.0),
            environment_index: Some(1.0),
        };
        let m = compute_multipliers(&inputs);
        assert!(m.total_unclamped < MULTIPLIER_MIN);
        assert_eq!(m.total, MULTIPLIER_MIN);
    }

    #[test]
    fn best_case_keeps_unclamped_product() {
        let inputs = FailureInputs {
            install_date: Some(date(2024, 1, 1)),
            climate_stress_index: 0.0,
            maintenance_score: 1.0,
            feature_completeness: 1.0,
            install_verified: true,
            has_usage_signal: true,
            usage_index: Some(0.0),
            environment_index: Some(0.0),
        };
        let m = compute_multipliers(&inputs);
        assert!(m.total_unclamped < MULTIPLIER_MAX);
        assert_eq!(m.total, m.total_unclamped);
    }

    #[test]
    fn out_of_range_indices_are_clamped() {
        let wild = FailureInputs {
            climate_stress_index: 7.0,
            maintenance_score: -3.0,
            ..golden_inputs()
        };
        let bounded = FailureInputs {
            climate_stress_index: 1.0,
            maintenance_score: 0.0,
            ..golden_inputs()
        };
        assert_eq!(compute_multipliers(&wild), compute_multipliers(&bounded));
    }

    #[test]
    fn confidence_peaks_only_with_every_signal() {
        let full = FailureInputs {
            install_date: Some(date(2020, 1, 1)),
            climate_stress_index: 0.3,
            maintenance_score: 0.7,
            feature_completeness: 1.0,
            install_verified: true,
            has_usage_signal: true,
            usage_index: Some(0.4),
            environment_index: None,
        };
        assert_eq!(forecast_confidence(&full), CONFIDENCE_MAX);

        let without_usage = FailureInputs {
            has_usage_signal: false,
            ..full.clone()
        };
        let without_verification = FailureInputs {
            install_verified: false,
            ..full.clone()
        };
        let partial_features = FailureInputs {
            feature_completeness: 0.5,
            ..full.clone()
        };
        for weaker in [without_usage, without_verification, partial_features] {
            assert!(forecast_confidence(&weaker) < forecast_confidence(&full));
        }
    }

    #[test]
    fn sigma_holds_at_baseline_only_at_peak_confidence() {
        let full = FailureInputs {
            install_date: Some(date(2020, 1, 1)),
            climate_stress_index: 0.0,
            maintenance_score: 1.0,
            feature_completeness: 1.0,
            install_verified: true,
            has_usage_signal: true,
            usage_index: Some(0.0),
            environment_index: Some(0.0),
        };
        let best = estimate_hvac_failure(&full, now());
        assert!((best.provenance.effective.sigma_years - HVAC_SIGMA_YEARS).abs() < 1e-9);

        let weak = estimate_hvac_failure(&golden_inputs(), now());
        assert!(weak.provenance.effective.sigma_years > HVAC_SIGMA_YEARS);
    }

    #[test]
    fn minimal_data_still_produces_low_confidence_forecast() {
        let inputs = FailureInputs {
            install_date: None,
            climate_stress_index: 0.5,
            maintenance_score: 0.5,
            feature_completeness: 0.0,
            install_verified: false,
            has_usage_signal: false,
            usage_index: None,
            environment_index: None,
        };
        let estimate = estimate_survival(SystemKind::Roof, &inputs, now());
        assert!(estimate.provenance.effective.install_date_assumed);
        assert_eq!(estimate.provenance.model_version, SYSTEM_MODEL_VERSION);
        assert!(estimate.confidence_0_1 <= 0.3);
        assert!(estimate.years_remaining_p50 > 0.0);
        assert_ordered(&estimate);
    }

    #[test]
    fn failure_probability_grows_with_age_and_horizon() {
        let young = estimate_hvac_failure(&golden_inputs(), now());
        let old = estimate_hvac_failure(
            &FailureInputs {
                install_date: Some(date(2011, 6, 1)),
                ..golden_inputs()
            },
            now(),
        );

        let p_young = failure_probability_within(&young, 1.0);
        let p_old = failure_probability_within(&old, 1.0);
        assert!(p_young < 0.05);
        assert!(p_old > p_young);
        assert!(failure_probability_within(&old, 3.0) >= p_old);
        assert!((0.0..=1.0).contains(&p_old));
    }

    #[test]
    fn erf_matches_reference_points() {
        assert!(erf(0.0).abs() < 1e-6);
        assert!((erf(1.0) - 0.842_700_79).abs() < 1e-6);
        assert!((normal_cdf(Z_P90) - 0.9).abs() < 1e-6);
    }
}
