pub mod calibration;
pub mod conditions;
pub mod ensemble;
pub mod features;
pub mod kelly;
pub mod models;
pub mod orchestrator;
pub mod patterns;
pub mod roi;

pub use orchestrator::Engine;
