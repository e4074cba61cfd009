//! NOSA-Simulation: synthetic biological time-series
//!
//! Seeded fluorescence and electrophysiology traces for tests and demos.

pub mod trace_patterns;
pub mod trace_simulator;

pub use trace_patterns::*;
pub use trace_simulator::*;
