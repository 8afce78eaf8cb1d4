use super::config::EngineConfig;
use super::price::{price_percentile, NEUTRAL_PERCENTILE};
use crate::domain::{DecisionInputs, DhwAction, DhwDecision, DecisionReason};

/// Hot water always looks at least this far ahead (hours)
pub const DHW_MIN_HORIZON_HOURS: f64 = 12.0;
pub const DHW_HEAT_NOW_MAX_PERCENTILE: f64 = 0.25;
pub const DHW_DELAY_MIN_PERCENTILE: f64 = 0.75;

/// Price-driven timing for the domestic hot water tank.
///
/// Depends only on the price percentile; there is no tank temperature
/// feedback. Malformed inputs yield `Maintain` with `InsufficientInput`.
pub fn compute_dhw_decision(cfg: &EngineConfig, inputs: &DecisionInputs) -> DhwDecision {
    if !inputs.is_well_formed() {
        return DhwDecision {
            action: DhwAction::Maintain,
            reason: DecisionReason::InsufficientInput,
            percentile: NEUTRAL_PERCENTILE,
        };
    }

    let horizon = cfg.preheat.horizon_hours.max(DHW_MIN_HORIZON_HOURS);
    let p = price_percentile(&inputs.prices, inputs.now, horizon, inputs.current_price);

    let (action, reason) = if p <= DHW_HEAT_NOW_MAX_PERCENTILE {
        (DhwAction::HeatNow, DecisionReason::CheapWindowHeatNow)
    } else if p >= DHW_DELAY_MIN_PERCENTILE {
        (DhwAction::Delay, DecisionReason::ExpensiveWindowDelay)
    } else {
        (DhwAction::Maintain, DecisionReason::NormalPriceMaintain)
    };

    DhwDecision {
        action,
        reason,
        percentile: p,
    }
}
