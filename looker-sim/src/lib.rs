//! Headless driver for the Looker engine.
//!
//! Runs the instance cache, the frame stream coordinator and the label
//! rendering pool against synthetic media and reports what they did.

pub mod args;
pub mod simulation;
pub mod synthetic;

pub use simulation::{run, SimulationOptions, SimulationReport};
