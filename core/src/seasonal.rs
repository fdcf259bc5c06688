//! Location-derived seasonal risk flags used for the intervention urgency premium.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::systems::SystemKind;

/// US states and territories with Atlantic or Pacific hurricane exposure.
pub const HURRICANE_EXPOSED_STATES: &[&str] = &[
    "AL", "CT", "DE", "FL", "GA", "HI", "LA", "MA", "MD", "ME", "MS", "NC", "NH", "NJ", "NY", "PR",
    "RI", "SC", "TX", "VA",
];

pub const FREEZE_THRESHOLD_C: f64 = 0.0;
pub const HEAT_WAVE_THRESHOLD_C: f64 = 35.0;

/// Short-range forecast extremes for the home's location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct WeatherOutlook {
    #[serde(default)]
    pub forecast_low_c: Option<f64>,
    #[serde(default)]
    pub forecast_high_c: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SeasonalRiskContext {
    pub hurricane_season: bool,
    pub freeze_warning: bool,
    pub heat_wave: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SeasonalFactor {
    HeatWave,
    FreezeWarning,
    HurricaneSeason,
}

impl SeasonalFactor {
    /// Share of potential damage added to the intervention score when aligned.
    pub fn premium_weight(self) -> f64 {
        match self {
            SeasonalFactor::HeatWave => 0.25,
            SeasonalFactor::FreezeWarning => 0.25,
            SeasonalFactor::HurricaneSeason => 0.20,
        }
    }

    pub fn affects(self, kind: SystemKind) -> bool {
        match self {
            SeasonalFactor::HeatWave => matches!(kind, SystemKind::Hvac | SystemKind::Electrical),
            SeasonalFactor::FreezeWarning => matches!(
                kind,
                SystemKind::Hvac | SystemKind::Plumbing | SystemKind::WaterHeater
            ),
            SeasonalFactor::HurricaneSeason => {
                matches!(kind, SystemKind::Roof | SystemKind::Exterior)
            }
        }
    }
}

impl SeasonalRiskContext {
    pub fn derive(state_code: Option<&str>, local_date: NaiveDate, weather: &WeatherOutlook) -> Self {
        let exposed = state_code
            .map(|code| code.trim().to_uppercase())
            .is_some_and(|code| HURRICANE_EXPOSED_STATES.contains(&code.as_str()));

        Self {
            hurricane_season: exposed && in_hurricane_season(local_date),
            freeze_warning: weather
                .forecast_low_c
                .is_some_and(|low| low <= FREEZE_THRESHOLD_C),
            heat_wave: weather
                .forecast_high_c
                .is_some_and(|high| high >= HEAT_WAVE_THRESHOLD_C),
        }
    }

    pub fn active_factors(&self) -> Vec<SeasonalFactor> {
        let mut factors = Vec::new();
        if self.heat_wave {
            factors.push(SeasonalFactor::HeatWave);
        }
        if self.freeze_warning {
            factors.push(SeasonalFactor::FreezeWarning);
        }
        if self.hurricane_season {
            factors.push(SeasonalFactor::HurricaneSeason);
        }
        factors
    }

    pub fn aligned_factors(&self, kind: SystemKind) -> Vec<SeasonalFactor> {
        self.active_factors()
            .into_iter()
            .filter(|factor| factor.affects(kind))
            .collect()
    }
}

/// June 1 through November 30.
pub fn in_hurricane_season(date: NaiveDate) -> bool {
    (6..=11).contains(&date.month())
}

/// Calendar date at the home. Unknown timezone names fall back to UTC.
pub fn local_date(now: DateTime<Utc>, timezone: &str) -> NaiveDate {
    match timezone.parse::<Tz>() {
        Ok(tz) => now.with_timezone(&tz).date_naive(),
        Err(_) => now.date_naive(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn hurricane_season_needs_exposure_and_month() {
        let calm = WeatherOutlook::default();
        assert!(SeasonalRiskContext::derive(Some("fl"), date(2025, 8, 10), &calm).hurricane_season);
        assert!(!SeasonalRiskContext::derive(Some("FL"), date(2025, 12, 1), &calm).hurricane_season);
        assert!(!SeasonalRiskContext::derive(Some("CO"), date(2025, 8, 10), &calm).hurricane_season);
        assert!(!SeasonalRiskContext::derive(None, date(2025, 8, 10), &calm).hurricane_season);
    }

    #[test]
    fn weather_thresholds_are_inclusive() {
        let weather = WeatherOutlook {
            forecast_low_c: Some(0.0),
            forecast_high_c: Some(35.0),
        };
        let ctx = SeasonalRiskContext::derive(Some("TX"), date(2025, 1, 5), &weather);
        assert!(ctx.freeze_warning);
        assert!(ctx.heat_wave);
        assert!(!ctx.hurricane_season);
    }

    #[test]
    fn aligned_factors_match_system_kind() {
        let ctx = SeasonalRiskContext {
            hurricane_season: true,
            freeze_warning: false,
            heat_wave: true,
        };
        assert_eq!(ctx.aligned_factors(SystemKind::Hvac), vec![SeasonalFactor::HeatWave]);
        assert_eq!(
            ctx.aligned_factors(SystemKind::Roof),
            vec![SeasonalFactor::HurricaneSeason]
        );
        assert!(ctx.aligned_factors(SystemKind::Foundation).is_empty());
    }

    #[test]
    fn local_date_respects_timezone() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 2, 0, 0).unwrap();
        assert_eq!(local_date(now, "America/Chicago"), date(2025, 5, 31));
        assert_eq!(local_date(now, "not/a_zone"), date(2025, 6, 1));
    }
}
