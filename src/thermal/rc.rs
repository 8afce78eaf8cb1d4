use serde::{Deserialize, Serialize};

/// Largest Euler step used when predicting over longer horizons (hours)
const MAX_PREDICTION_STEP_H: f64 = 0.25;

/// First-order (single node) RC model of a heated building.
///
/// Physics:
/// - dT_in/dt = K * (T_out - T_in) + S * (T_set - T_in)
///
/// `K` lumps envelope losses (1/(R·C), 1/h). `S` lumps the heating system's
/// pull towards the active setpoint together with passive gains (1/h).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FirstOrderModel {
    pub k_per_hour: f64,
    pub s_per_hour: f64,
}

impl Default for FirstOrderModel {
    fn default() -> Self {
        // Typical Swedish house, ~90 h envelope time constant
        Self {
            k_per_hour: 1.0 / 90.0,
            s_per_hour: 0.1,
        }
    }
}

impl FirstOrderModel {
    pub fn new(k_per_hour: f64, s_per_hour: f64) -> Self {
        Self {
            k_per_hour,
            s_per_hour,
        }
    }

    /// Indoor temperature rate of change (°C/h)
    pub fn derivative(&self, indoor_c: f64, outdoor_c: f64, setpoint_c: f64) -> f64 {
        self.k_per_hour * (outdoor_c - indoor_c) + self.s_per_hour * (setpoint_c - indoor_c)
    }

    /// One explicit Euler step of `dt_hours`
    pub fn step(&self, indoor_c: f64, outdoor_c: f64, setpoint_c: f64, dt_hours: f64) -> f64 {
        if dt_hours <= 0.0 {
            return indoor_c;
        }
        indoor_c + self.derivative(indoor_c, outdoor_c, setpoint_c) * dt_hours
    }

    /// Indoor temperature after `hours` with constant outdoor temperature and setpoint
    pub fn predict(&self, indoor_c: f64, outdoor_c: f64, setpoint_c: f64, hours: f64) -> f64 {
        if hours <= 0.0 || !hours.is_finite() {
            return indoor_c;
        }
        let steps = (hours / MAX_PREDICTION_STEP_H).ceil().max(1.0) as usize;
        let dt = hours / steps as f64;
        (0..steps).fold(indoor_c, |t, _| self.step(t, outdoor_c, setpoint_c, dt))
    }

    /// Temperature the building settles at for a constant outdoor temperature and setpoint
    pub fn equilibrium_c(&self, outdoor_c: f64, setpoint_c: f64) -> f64 {
        let total = self.k_per_hour + self.s_per_hour;
        if total <= 0.0 {
            return outdoor_c;
        }
        (self.k_per_hour * outdoor_c + self.s_per_hour * setpoint_c) / total
    }

    /// Envelope time constant 1/K (hours); infinite for a lossless model
    pub fn time_constant_hours(&self) -> f64 {
        if self.k_per_hour > 0.0 {
            1.0 / self.k_per_hour
        } else {
            f64::INFINITY
        }
    }
}
