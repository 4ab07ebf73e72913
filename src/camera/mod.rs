pub mod capabilities;
pub mod device_enumerator;

pub use device_enumerator::{CameraDevice, DeviceEnumerator};
