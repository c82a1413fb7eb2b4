//! Audio device backend: configuration, enumeration, cpal output
//!
//! The mixer consumes this layer as its device sink. In loopback mode none
//! of it is touched at runtime.

pub mod config;
pub mod cpal_backend;
pub mod device;
pub mod error;

pub use config::{BufferSize, DeviceId};
pub use device::{available_output_devices, OutputDevice};
pub use error::{AudioError, AudioResult};
