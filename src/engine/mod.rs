//! Control plane: drives the coordinator's poll cycle.

pub mod control;

pub use control::{ControlConfig, ControlPlane};
