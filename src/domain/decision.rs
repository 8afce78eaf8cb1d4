use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};

/// What the heating appliance should do this cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HeatingAction {
    NoChange,
    SetTarget,
}

/// Tri-state domestic hot water timing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DhwAction {
    HeatNow,
    Delay,
    Maintain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ComfortRisk {
    Low,
    Medium,
    High,
}

/// Stable taxonomy of operator-facing reasons.
///
/// Downstream formatters map these phrases to categories, so the strings
/// must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr)]
pub enum DecisionReason {
    #[serde(rename = "insufficient input")]
    #[strum(serialize = "insufficient input")]
    InsufficientInput,
    #[serde(rename = "lockout active")]
    #[strum(serialize = "lockout active")]
    Lockout,
    #[serde(rename = "within deadband")]
    #[strum(serialize = "within deadband")]
    WithinDeadband,
    #[serde(rename = "cheaper hour → raise")]
    #[strum(serialize = "cheaper hour → raise")]
    CheaperHourRaise,
    #[serde(rename = "expensive hour → lower")]
    #[strum(serialize = "expensive hour → lower")]
    ExpensiveHourLower,
    #[serde(rename = "cheap window → heat now")]
    #[strum(serialize = "cheap window → heat now")]
    CheapWindowHeatNow,
    #[serde(rename = "expensive window → delay")]
    #[strum(serialize = "expensive window → delay")]
    ExpensiveWindowDelay,
    #[serde(rename = "normal price → maintain")]
    #[strum(serialize = "normal price → maintain")]
    NormalPriceMaintain,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// The rule that produced the final heating target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetDriver {
    BandInterpolation,
    ComfortRecovery,
    StrongPreheat,
    ModeratePreheat,
    CoastDown,
    ExtremeWeatherFloor,
}

/// Heating setpoint recommendation. Constructed once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: HeatingAction,
    pub from_c: f64,
    pub to_c: f64,
    pub reason: DecisionReason,
    pub driver: TargetDriver,
    pub comfort_risk: ComfortRisk,
    /// First-order heuristic: `sign(delta) * current price`, not a metered cost
    pub expected_delta_cost_per_hour_sek: f64,
    /// Price percentile the decision was based on
    pub percentile: f64,
}

impl Decision {
    pub fn is_change(&self) -> bool {
        self.action == HeatingAction::SetTarget
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {:.2}°C → {:.2}°C: {} ({}, p={:.2}, risk {})",
            self.action, self.from_c, self.to_c, self.reason, self.driver, self.percentile, self.comfort_risk
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DhwDecision {
    pub action: DhwAction,
    pub reason: DecisionReason,
    pub percentile: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_strings_are_stable() {
        assert_eq!(DecisionReason::Lockout.as_str(), "lockout active");
        assert_eq!(DecisionReason::WithinDeadband.to_string(), "within deadband");
        assert_eq!(DecisionReason::CheaperHourRaise.as_str(), "cheaper hour → raise");
        assert_eq!(
            serde_json::to_string(&DecisionReason::ExpensiveHourLower).unwrap(),
            "\"expensive hour → lower\""
        );
    }

    #[test]
    fn test_action_serialization() {
        assert_eq!(serde_json::to_string(&HeatingAction::SetTarget).unwrap(), "\"set_target\"");
        assert_eq!(serde_json::to_string(&DhwAction::HeatNow).unwrap(), "\"heat_now\"");
        assert_eq!(HeatingAction::NoChange.to_string(), "no_change");
    }

    #[test]
    fn test_comfort_risk_ordering() {
        assert!(ComfortRisk::High > ComfortRisk::Medium);
        assert!(ComfortRisk::Medium > ComfortRisk::Low);
    }
}
