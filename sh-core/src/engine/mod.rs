//! Fan control engine modules
//!
//! Contains the temperature curve and the fan state it drives.

mod curve;
mod fan;

pub use curve::FanCurve;
pub use fan::{FanController, FanMode, FanState};
