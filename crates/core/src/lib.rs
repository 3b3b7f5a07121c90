pub mod device;
pub mod resolve;
pub mod validate;
pub mod workout;

pub use device::DeviceId;
pub use workout::*;

#[cfg(any(test, feature = "testing"))]
pub mod testing;
