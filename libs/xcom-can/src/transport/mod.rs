//! Bus drivers
//!
//! - `traits`: the [`CanDriver`] seam and the raw [`CanFrame`]
//! - `mock`: in-memory driver for tests and simulations
//! - `socketcan_driver`: Linux SocketCAN driver (feature `can-linux`)

pub mod mock;
#[cfg(all(target_os = "linux", feature = "can-linux"))]
pub mod socketcan_driver;
pub mod traits;

pub use mock::{MockCanDriver, Responder};
#[cfg(all(target_os = "linux", feature = "can-linux"))]
pub use socketcan_driver::SocketCanDriver;
pub use traits::{CanDriver, CanFrame, DriverStats, TransportError};
