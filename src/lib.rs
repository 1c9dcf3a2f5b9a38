//! Safe, leak-free handles for OpenCL platforms, devices, contexts and command queues.
//!
//! All native calls go through a [`Driver`]. [`Runtime::native`] uses the system OpenCL library,
//! [`mock::MockDriver`] simulates one in-process.
//!
//! ```no_run
//! # #[cfg(feature = "opencl")]
//! # fn main() -> Result<(), rust_cl_handles::ClError> {
//! use rust_cl_handles::{Context, DeviceType, QueueProperties, Runtime};
//!
//! let runtime = Runtime::native();
//! let devices = runtime.devices(None, DeviceType::GPU)?;
//! let context = Context::new(&devices)?;
//! let queue = context.create_command_queue(&devices[0], QueueProperties::empty())?;
//! queue.finish()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "opencl"))]
//! # fn main() {}
//! ```
//!
//! Feature flags
//! -------------
//!
//! There are two [feature flags], both disabled by default:
//!
//!  - `opencl`: links against the system OpenCL library and enables [`Runtime::native`].
//!  - `mock`: exports [`mock::MockDriver`] for testing code that builds on this crate.
//!
//! Configuration
//! -------------
//!
//! The number of platforms and devices returned by a single enumeration is capped. The caps
//! default to 16 and 64 and can be changed with the `RUST_CL_HANDLES_MAX_PLATFORMS` and
//! `RUST_CL_HANDLES_MAX_DEVICES` environment variables, see [`Config`].
//!
//! [feature flags]: https://doc.rust-lang.org/cargo/reference/manifest.html#the-features-section

#![warn(missing_docs)]

mod config;
pub mod context;
pub mod device;
pub mod driver;
mod error;
mod handle;
pub mod info;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
#[cfg(feature = "opencl")]
pub mod native;
mod notify;
pub mod platform;
pub mod queue;

pub use config::{Config, MAX_DEVICES_ENV, MAX_PLATFORMS_ENV};
pub use context::{Context, ContextProperties};
pub use device::{
    AffinityDomain, Device, DeviceType, ExecCapabilities, FpConfig, LocalMemType, MemCacheType,
    SubDevice, VectorType,
};
pub use driver::Driver;
pub use error::*;
pub use info::{Info, InfoElement, InfoType};
pub use notify::{registered_callbacks, Notification, Notify, UserData};
pub use platform::{Platform, Runtime};
pub use queue::{CommandQueue, QueueProperties};
