//! Heating setpoint decision.
//!
//! Rules are applied in priority order. Comfort recovery and the
//! extreme-weather floor dominate; price shaping only moves the target
//! within the freedom that remains. The deadband and the lockout together
//! keep the actuator from chattering.

use chrono::Duration;

use super::config::{ComfortBand, EngineConfig};
use super::price::{price_percentile, NEUTRAL_PERCENTILE};
use crate::domain::{ComfortRisk, Decision, DecisionInputs, DecisionReason, HeatingAction, TargetDriver};

/// Recovery target sits this far above the band's upper bound (°C)
pub const RECOVERY_OVERSHOOT_C: f64 = 0.2;
/// Strong preheat target sits this far above the band's upper bound (°C)
pub const STRONG_PREHEAT_OVERSHOOT_C: f64 = 0.25;
pub const STRONG_PREHEAT_MAX_OUTDOOR_C: f64 = 15.0;
pub const MODERATE_PREHEAT_MAX_OUTDOOR_C: f64 = 20.0;
pub const MODERATE_PREHEAT_MAX_PERCENTILE: f64 = 0.50;
/// Moderate preheat aims for this fraction of the band width
pub const MODERATE_PREHEAT_BAND_FRACTION: f64 = 0.75;
pub const COAST_DOWN_MIN_PERCENTILE: f64 = 0.7;
/// Extreme-weather floor applies at or below this outdoor temperature (°C)
pub const EXTREME_WEATHER_OUTDOOR_C: f64 = -15.0;

/// True while the last setpoint change is younger than the configured minimum interval
pub fn lockout_active(cfg: &EngineConfig, inputs: &DecisionInputs) -> bool {
    let min_interval = Duration::minutes(i64::from(cfg.safety.min_setpoint_change_minutes));
    inputs
        .last_setpoint_change
        .map_or(false, |last| inputs.now - last < min_interval)
}

/// Target before clamping, the rule that set it, and whether comfort recovery fired
struct Shaped {
    target: f64,
    driver: TargetDriver,
    recovering: bool,
}

fn shape_target(cfg: &EngineConfig, band: &ComfortBand, p: f64, indoor: f64, outdoor: f64) -> Shaped {
    let mut target = band.lower_c + (1.0 - p) * band.width();
    let mut driver = TargetDriver::BandInterpolation;

    let recovering = indoor < band.lower_c - cfg.safety.deadband_c / 2.0;
    if recovering {
        target = (band.upper_c + RECOVERY_OVERSHOOT_C).min(cfg.max_setpoint_c);
        driver = TargetDriver::ComfortRecovery;
    }

    // while recovering, price shaping may only push the target further up
    let mut apply = |candidate: f64, by: TargetDriver| {
        if !recovering || candidate > target {
            target = candidate;
            driver = by;
        }
    };

    let preheat = &cfg.preheat;
    if preheat.enable
        && p <= preheat.cheap_percentile
        && outdoor < STRONG_PREHEAT_MAX_OUTDOOR_C
        && indoor < band.upper_c - 0.1
    {
        apply(
            (band.upper_c + STRONG_PREHEAT_OVERSHOOT_C).min(cfg.max_setpoint_c),
            TargetDriver::StrongPreheat,
        );
    } else if preheat.enable
        && p > preheat.cheap_percentile
        && p <= MODERATE_PREHEAT_MAX_PERCENTILE
        && outdoor < MODERATE_PREHEAT_MAX_OUTDOOR_C
        && indoor < band.upper_c - 0.3
    {
        apply(
            (band.lower_c + MODERATE_PREHEAT_BAND_FRACTION * band.width()).min(cfg.max_setpoint_c),
            TargetDriver::ModeratePreheat,
        );
    }

    if p >= COAST_DOWN_MIN_PERCENTILE && indoor > band.lower_c + 0.5 {
        target = (band.lower_c + 0.1).max(cfg.min_setpoint_c);
        driver = TargetDriver::CoastDown;
    }

    if let Some(floor) = cfg.safety.extreme_weather_min_c {
        if outdoor <= EXTREME_WEATHER_OUTDOOR_C && floor > target {
            target = floor;
            driver = TargetDriver::ExtremeWeatherFloor;
        }
    }

    Shaped {
        target,
        driver,
        recovering,
    }
}

fn classify_risk(shaped: &Shaped, band: &ComfortBand, indoor: f64) -> ComfortRisk {
    if shaped.recovering || shaped.driver == TargetDriver::ExtremeWeatherFloor {
        ComfortRisk::High
    } else if shaped.driver == TargetDriver::CoastDown || !band.contains(indoor) {
        ComfortRisk::Medium
    } else {
        ComfortRisk::Low
    }
}

fn sign(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Compute the heating setpoint recommendation for one control cycle.
///
/// `cfg` must have passed [`EngineConfig::validated`]. Malformed inputs
/// (no prices, non-finite readings) produce a `no_change` decision with
/// reason `insufficient input` instead of an error.
pub fn compute_heating_decision(cfg: &EngineConfig, inputs: &DecisionInputs) -> Decision {
    let from_c = inputs.telemetry.target_c;

    if !inputs.is_well_formed() {
        return Decision {
            action: HeatingAction::NoChange,
            from_c,
            to_c: from_c,
            reason: DecisionReason::InsufficientInput,
            driver: TargetDriver::BandInterpolation,
            comfort_risk: ComfortRisk::Medium,
            expected_delta_cost_per_hour_sek: 0.0,
            percentile: NEUTRAL_PERCENTILE,
        };
    }

    let band = cfg.band(inputs.occupied);
    let lockout = lockout_active(cfg, inputs);
    let p = price_percentile(
        &inputs.prices,
        inputs.now,
        cfg.preheat.horizon_hours,
        inputs.current_price,
    );
    let indoor = inputs.telemetry.indoor_c;

    let shaped = shape_target(cfg, band, p, indoor, inputs.weather.outdoor_c);
    let comfort_risk = classify_risk(&shaped, band, indoor);
    let target = cfg.clamp_setpoint(shaped.target);

    let delta = target - from_c;
    let outside_limits = from_c < cfg.min_setpoint_c || from_c > cfg.max_setpoint_c;
    let significant = outside_limits || (delta != 0.0 && delta.abs() >= cfg.safety.deadband_c);

    if lockout || !significant {
        let reason = if lockout {
            DecisionReason::Lockout
        } else {
            DecisionReason::WithinDeadband
        };
        return Decision {
            action: HeatingAction::NoChange,
            from_c,
            to_c: from_c,
            reason,
            driver: shaped.driver,
            comfort_risk,
            expected_delta_cost_per_hour_sek: 0.0,
            percentile: p,
        };
    }

    let reason = if delta > 0.0 {
        DecisionReason::CheaperHourRaise
    } else {
        DecisionReason::ExpensiveHourLower
    };

    Decision {
        action: HeatingAction::SetTarget,
        from_c,
        to_c: target,
        reason,
        driver: shaped.driver,
        comfort_risk,
        expected_delta_cost_per_hour_sek: sign(delta) * inputs.current_price,
        percentile: p,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{IndoorTelemetry, PricePoint, WeatherReading};
    use chrono::{DateTime, FixedOffset, TimeZone};
    use proptest::prelude::*;
    use rstest::rstest;

    fn now() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 15, 12, 0, 0)
            .unwrap()
    }

    fn test_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.comfort_occupied = ComfortBand::new(20.0, 23.0);
        cfg.preheat.horizon_hours = 10.0;
        cfg.preheat.cheap_percentile = 0.35;
        cfg.safety.deadband_c = 0.3;
        cfg.safety.min_setpoint_change_minutes = 5;
        cfg.safety.extreme_weather_min_c = Some(21.0);
        cfg.validated().unwrap()
    }

    /// Ten hourly prices 1.0..=10.0 starting now; the percentile of
    /// `current_price = k` is k/10.
    fn inputs(current_price: f64, indoor: f64, target: f64, outdoor: f64) -> DecisionInputs {
        DecisionInputs {
            now: now(),
            occupied: true,
            prices: (0..10)
                .map(|i| PricePoint::new(now() + Duration::hours(i), (i + 1) as f64))
                .collect(),
            current_price,
            telemetry: IndoorTelemetry {
                indoor_c: indoor,
                target_c: target,
            },
            weather: WeatherReading { outdoor_c: outdoor },
            last_setpoint_change: None,
        }
    }

    #[test]
    fn test_band_interpolation_without_preheat() {
        let mut cfg = test_config();
        cfg.preheat.enable = false;
        // p = 0.6 → 20 + 0.4 * 3 = 21.2
        let d = compute_heating_decision(&cfg, &inputs(6.0, 21.0, 20.0, 5.0));
        assert_eq!(d.action, HeatingAction::SetTarget);
        assert!((d.to_c - 21.2).abs() < 1e-9);
        assert_eq!(d.driver, TargetDriver::BandInterpolation);
        assert_eq!(d.reason, DecisionReason::CheaperHourRaise);
        assert_eq!(d.comfort_risk, ComfortRisk::Low);
    }

    #[test]
    fn test_comfort_recovery_dominates_moderate_preheat() {
        // p = 0.4 would select moderate preheat (22.25) but indoor is far below the band
        let d = compute_heating_decision(&test_config(), &inputs(4.0, 19.0, 20.0, 5.0));
        assert_eq!(d.driver, TargetDriver::ComfortRecovery);
        assert!((d.to_c - 23.2).abs() < 1e-9);
        assert_eq!(d.comfort_risk, ComfortRisk::High);
    }

    #[test]
    fn test_strong_preheat_raises_recovery_target() {
        let d = compute_heating_decision(&test_config(), &inputs(2.0, 19.0, 20.0, 5.0));
        assert_eq!(d.driver, TargetDriver::StrongPreheat);
        assert!((d.to_c - 23.25).abs() < 1e-9);
        assert_eq!(d.comfort_risk, ComfortRisk::High);
    }

    #[rstest]
    #[case::strong(2.0, 21.5, 5.0, TargetDriver::StrongPreheat, 23.25)]
    #[case::strong_too_warm_outside(2.0, 21.5, 15.0, TargetDriver::BandInterpolation, 22.4)]
    #[case::moderate(4.0, 21.5, 5.0, TargetDriver::ModeratePreheat, 22.25)]
    #[case::moderate_too_warm_outside(4.0, 21.5, 20.0, TargetDriver::BandInterpolation, 21.8)]
    #[case::coast_down(8.0, 21.5, 5.0, TargetDriver::CoastDown, 20.1)]
    fn test_price_shaping_rules(
        #[case] price: f64,
        #[case] indoor: f64,
        #[case] outdoor: f64,
        #[case] driver: TargetDriver,
        #[case] expected: f64,
    ) {
        let d = compute_heating_decision(&test_config(), &inputs(price, indoor, 18.0, outdoor));
        assert_eq!(d.driver, driver);
        assert!((d.to_c - expected).abs() < 1e-9, "to_c = {}", d.to_c);
    }

    #[test]
    fn test_coast_down_lowers_target() {
        let d = compute_heating_decision(&test_config(), &inputs(9.0, 22.0, 22.0, 5.0));
        assert_eq!(d.action, HeatingAction::SetTarget);
        assert_eq!(d.reason, DecisionReason::ExpensiveHourLower);
        assert!((d.to_c - 20.1).abs() < 1e-9);
        assert_eq!(d.expected_delta_cost_per_hour_sek, -9.0);
        assert_eq!(d.comfort_risk, ComfortRisk::Medium);
    }

    #[test]
    fn test_extreme_weather_floor() {
        // coast-down would go to 20.1, the floor lifts it to 21.0
        let d = compute_heating_decision(&test_config(), &inputs(9.0, 22.0, 22.0, -20.0));
        assert_eq!(d.driver, TargetDriver::ExtremeWeatherFloor);
        assert!((d.to_c - 21.0).abs() < 1e-9);
        assert_eq!(d.comfort_risk, ComfortRisk::High);
    }

    #[test]
    fn test_extreme_weather_floor_only_raises() {
        let d = compute_heating_decision(&test_config(), &inputs(2.0, 21.5, 20.0, -20.0));
        assert_eq!(d.driver, TargetDriver::StrongPreheat);
        assert!(d.to_c >= 21.0);
    }

    #[test]
    fn test_within_deadband_is_no_change() {
        let mut cfg = test_config();
        cfg.preheat.enable = false;
        // p = 0.6 → 21.2, current target 21.1
        let d = compute_heating_decision(&cfg, &inputs(6.0, 21.0, 21.1, 5.0));
        assert_eq!(d.action, HeatingAction::NoChange);
        assert_eq!(d.reason, DecisionReason::WithinDeadband);
        assert_eq!(d.to_c, d.from_c);
        assert_eq!(d.expected_delta_cost_per_hour_sek, 0.0);
    }

    #[test]
    fn test_lockout_blocks_change() {
        let mut i = inputs(2.0, 21.5, 20.0, 5.0);
        i.last_setpoint_change = Some(now() - Duration::minutes(2));
        let d = compute_heating_decision(&test_config(), &i);
        assert_eq!(d.action, HeatingAction::NoChange);
        assert_eq!(d.reason, DecisionReason::Lockout);
        assert_eq!(d.to_c, 20.0);
    }

    #[test]
    fn test_lockout_expires() {
        let mut i = inputs(2.0, 21.5, 20.0, 5.0);
        i.last_setpoint_change = Some(now() - Duration::minutes(5));
        assert!(!lockout_active(&test_config(), &i));
        let d = compute_heating_decision(&test_config(), &i);
        assert_eq!(d.action, HeatingAction::SetTarget);
    }

    #[test]
    fn test_away_band_used_when_unoccupied() {
        let mut cfg = test_config();
        cfg.preheat.enable = false;
        let mut i = inputs(10.0, 19.0, 20.0, 5.0);
        i.occupied = false;
        // p = 1.0 → lower bound of away band (18.0); indoor 19 > 18.5 → coast down to 18.1
        let d = compute_heating_decision(&cfg, &i);
        assert!((d.to_c - 18.1).abs() < 1e-9);
    }

    #[test]
    fn test_insufficient_input() {
        let mut i = inputs(2.0, f64::NAN, 20.0, 5.0);
        let d = compute_heating_decision(&test_config(), &i);
        assert_eq!(d.action, HeatingAction::NoChange);
        assert_eq!(d.reason, DecisionReason::InsufficientInput);

        i.telemetry.indoor_c = 21.0;
        i.prices.clear();
        let d = compute_heating_decision(&test_config(), &i);
        assert_eq!(d.reason, DecisionReason::InsufficientInput);
        assert_eq!(d.percentile, NEUTRAL_PERCENTILE);
    }

    #[test]
    fn test_current_target_outside_limits_is_corrected() {
        let mut cfg = test_config();
        cfg.preheat.enable = false;
        cfg.max_setpoint_c = 23.2;
        let cfg = cfg.validated().unwrap();
        // recovery aims for 23.2 while the appliance holds 23.3, above the limit
        let d = compute_heating_decision(&cfg, &inputs(6.0, 19.0, 23.3, 5.0));
        assert_eq!(d.action, HeatingAction::SetTarget);
        assert!((d.to_c - 23.2).abs() < 1e-9);
    }

    proptest! {
        #[test]
        fn prop_target_within_setpoint_limits(
            price in 0.0f64..12.0,
            indoor in 5.0f64..30.0,
            target in 16.0f64..26.0,
            outdoor in -30.0f64..35.0,
            occupied in any::<bool>(),
        ) {
            let cfg = test_config();
            let mut i = inputs(price, indoor, target, outdoor);
            i.occupied = occupied;
            let d = compute_heating_decision(&cfg, &i);
            prop_assert!(d.to_c >= cfg.min_setpoint_c && d.to_c <= cfg.max_setpoint_c);
        }

        #[test]
        fn prop_lockout_always_no_change(
            price in 0.0f64..12.0,
            indoor in 5.0f64..30.0,
            target in 16.0f64..26.0,
            outdoor in -30.0f64..35.0,
            minutes_ago in 0i64..5,
        ) {
            let mut i = inputs(price, indoor, target, outdoor);
            i.last_setpoint_change = Some(now() - Duration::minutes(minutes_ago));
            let d = compute_heating_decision(&test_config(), &i);
            prop_assert_eq!(d.action, HeatingAction::NoChange);
            prop_assert_eq!(d.reason, DecisionReason::Lockout);
        }

        #[test]
        fn prop_small_delta_is_no_change(
            price in 0.0f64..12.0,
            indoor in 5.0f64..30.0,
            target in 16.0f64..26.0,
            outdoor in -30.0f64..35.0,
        ) {
            let cfg = test_config();
            let i = inputs(price, indoor, target, outdoor);
            let d = compute_heating_decision(&cfg, &i);
            if d.action == HeatingAction::NoChange {
                prop_assert_eq!(d.to_c, d.from_c);
            } else {
                prop_assert!((d.to_c - d.from_c).abs() >= cfg.safety.deadband_c);
            }
        }

        #[test]
        fn prop_extreme_weather_floor_holds(
            price in 0.0f64..12.0,
            indoor in 5.0f64..30.0,
            target in 16.0f64..26.0,
            outdoor in -40.0f64..=-15.0,
        ) {
            let cfg = test_config();
            let d = compute_heating_decision(&cfg, &inputs(price, indoor, target, outdoor));
            if d.action == HeatingAction::SetTarget {
                prop_assert!(d.to_c >= 21.0);
            }
        }
    }
}
