//! Price percentile of "now" against a forward horizon window.
//!
//! Prices equal to the current price count as cheaper-or-equal, so a flat
//! price period reads as relatively expensive.

use chrono::{DateTime, Duration, FixedOffset};

use crate::domain::PricePoint;

/// Percentile reported when there is nothing to compare against
pub const NEUTRAL_PERCENTILE: f64 = 0.5;

/// A price entry closer than this to `now` is taken as the current period
pub const CURRENT_ENTRY_TOLERANCE_MINUTES: i64 = 60;

/// Index of the first entry within the tolerance of `now`, or 0 if none is
pub fn current_index(prices: &[PricePoint], now: DateTime<FixedOffset>) -> usize {
    prices.iter().position(|p| is_current(p, now)).unwrap_or(0)
}

/// Price of the period covering `now`, if the series has one
pub fn current_period_price(prices: &[PricePoint], now: DateTime<FixedOffset>) -> Option<f64> {
    prices.iter().find(|p| is_current(p, now)).map(|p| p.price)
}

fn is_current(point: &PricePoint, now: DateTime<FixedOffset>) -> bool {
    let tolerance = Duration::minutes(CURRENT_ENTRY_TOLERANCE_MINUTES);
    let offset = point.time - now;
    offset < tolerance && offset > -tolerance
}

/// Forward slice of `round(horizon_hours)` entries starting at the current period
pub fn horizon_window(prices: &[PricePoint], now: DateTime<FixedOffset>, horizon_hours: f64) -> &[PricePoint] {
    if prices.is_empty() || !horizon_hours.is_finite() || horizon_hours <= 0.0 {
        return &[];
    }
    let start = current_index(prices, now);
    let len = horizon_hours.round() as usize;
    let end = start.saturating_add(len).min(prices.len());
    &prices[start..end]
}

/// Fraction of the horizon window priced at or below `current_price`.
///
/// 0.0 means the current price is below everything in the window, 1.0 means
/// nothing in the window is more expensive. An empty window, or a
/// non-finite current price, yields [`NEUTRAL_PERCENTILE`].
pub fn price_percentile(
    prices: &[PricePoint],
    now: DateTime<FixedOffset>,
    horizon_hours: f64,
    current_price: f64,
) -> f64 {
    let window = horizon_window(prices, now, horizon_hours);
    if window.is_empty() || !current_price.is_finite() {
        return NEUTRAL_PERCENTILE;
    }
    let at_or_below = window.iter().filter(|p| p.price <= current_price).count();
    at_or_below as f64 / window.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn base() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(3600)
            .unwrap()
            .with_ymd_and_hms(2024, 1, 15, 0, 0, 0)
            .unwrap()
    }

    fn hourly(prices: &[f64]) -> Vec<PricePoint> {
        prices
            .iter()
            .enumerate()
            .map(|(i, &p)| PricePoint::new(base() + Duration::hours(i as i64), p))
            .collect()
    }

    #[test]
    fn test_empty_series_is_neutral() {
        assert_eq!(price_percentile(&[], base(), 12.0, 1.0), NEUTRAL_PERCENTILE);
    }

    #[test]
    fn test_zero_horizon_is_neutral() {
        let prices = hourly(&[1.0, 2.0, 3.0]);
        assert_eq!(price_percentile(&prices, base(), 0.2, 2.0), NEUTRAL_PERCENTILE);
    }

    #[test]
    fn test_non_finite_current_price_is_neutral() {
        let prices = hourly(&[1.0, 2.0, 3.0]);
        assert_eq!(price_percentile(&prices, base(), 3.0, f64::NAN), NEUTRAL_PERCENTILE);
    }

    #[test]
    fn test_cheaper_than_whole_window_is_zero() {
        let prices = hourly(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(price_percentile(&prices, base(), 4.0, 0.5), 0.0);
    }

    #[test]
    fn test_most_expensive_current_period_is_one() {
        // the current period's own entry counts as "at or below"
        let prices = hourly(&[4.0, 1.0, 2.0, 3.0]);
        assert_eq!(price_percentile(&prices, base(), 4.0, 4.0), 1.0);
    }

    #[test]
    fn test_one_dearer_entry_gives_n_minus_one_over_n() {
        let prices = hourly(&[3.0, 1.0, 2.0, 5.0]);
        assert_eq!(price_percentile(&prices, base(), 4.0, 3.0), 0.75);
    }

    #[test]
    fn test_ties_count_as_cheaper() {
        let prices = hourly(&[2.0, 2.0, 2.0, 2.0]);
        assert_eq!(price_percentile(&prices, base(), 4.0, 2.0), 1.0);
    }

    #[test]
    fn test_window_starts_at_current_period() {
        let prices = hourly(&[0.1, 0.1, 5.0, 6.0, 7.0]);
        let now = base() + Duration::minutes(2 * 60 + 20);
        assert_eq!(current_index(&prices, now), 2);
        // window is [5, 6, 7]
        assert!((price_percentile(&prices, now, 3.0, 5.0) - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_no_current_entry_falls_back_to_start() {
        let prices = hourly(&[1.0, 2.0, 3.0]);
        let now = base() + Duration::days(3);
        assert_eq!(current_index(&prices, now), 0);
        assert_eq!(horizon_window(&prices, now, 2.0).len(), 2);
    }

    #[test]
    fn test_exactly_sixty_minutes_is_not_current() {
        let prices = hourly(&[1.0, 2.0]);
        assert_eq!(current_index(&prices, base() + Duration::minutes(60)), 1);
    }

    #[test]
    fn test_current_period_price() {
        let prices = hourly(&[1.0, 2.0, 3.0]);
        assert_eq!(current_period_price(&prices, base() + Duration::minutes(70)), Some(2.0));
        assert_eq!(current_period_price(&prices, base() + Duration::days(1)), None);
    }

    #[test]
    fn test_window_clipped_to_available_length() {
        let prices = hourly(&[1.0, 2.0, 3.0]);
        assert_eq!(horizon_window(&prices, base(), 24.0).len(), 3);
    }

    #[test]
    fn test_horizon_rounds_to_nearest_hour() {
        let prices = hourly(&[1.0; 10]);
        assert_eq!(horizon_window(&prices, base(), 5.5).len(), 6);
        assert_eq!(horizon_window(&prices, base(), 5.4).len(), 5);
    }

    proptest! {
        #[test]
        fn prop_percentile_in_unit_interval(
            prices in prop::collection::vec(-1.0f64..5.0, 1..48),
            current in -1.0f64..5.0,
            horizon in 1.0f64..48.0,
            offset_minutes in 0i64..(48 * 60),
        ) {
            let series = hourly(&prices);
            let now = base() + Duration::minutes(offset_minutes);
            let p = price_percentile(&series, now, horizon, current);
            prop_assert!((0.0..=1.0).contains(&p));
        }
    }
}
