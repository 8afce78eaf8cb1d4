//! Price-aware heating controller.
//!
//! The [`engine`] computes setpoint and hot-water decisions from prices,
//! weather and indoor telemetry. The [`thermal`] model is periodically
//! refitted from that telemetry and retunes the engine. Every external
//! provider call goes through a [`resilience::CircuitBreaker`].

pub mod api;
pub mod config;
pub mod controller;
pub mod domain;
pub mod engine;
pub mod providers;
pub mod resilience;
pub mod telemetry;
pub mod thermal;
