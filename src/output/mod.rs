pub mod buffer;
pub mod cpal_device;
pub mod device;
pub mod null;

pub use buffer::OutputBuffer;
pub use cpal_device::CpalDevice;
pub use device::{Device, DeviceCaps, DeviceError};
pub use null::NullDevice;
