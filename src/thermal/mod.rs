//! Adaptive thermal model of the building: a first-order RC model whose
//! heat-loss (K) and gain (S) coefficients are periodically refitted from
//! telemetry.

pub mod calibration;
pub mod model;
pub mod rc;

pub use calibration::{CalibrationError, CalibrationSettings, ThermalFit};
pub use model::{CalibrationReport, ThermalModel, ThermalModelState};
pub use rc::FirstOrderModel;
