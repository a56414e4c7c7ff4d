//! Domain models: devices and decoded position reports.

mod device;
mod position;

pub use device::Device;
pub use position::{ExtendedInfo, Position};
