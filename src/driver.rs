//! The native API boundary.
//!
//! [`Driver`] mirrors the OpenCL C entry points this crate needs, one method per function,
//! with the same argument order and the same raw status-code results. Everything above this
//! module only talks to a `dyn Driver`, so the very same lifecycle and query logic runs against
//! the system OpenCL library ([`crate::native::OpenClDriver`]) and against the in-process
//! simulation used in tests.

use std::ffi::c_void;
use std::fmt;
use std::os::raw::c_char;
use std::ptr;

use crate::error::Status;

macro_rules! raw_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[repr(transparent)]
        #[derive(Copy, Clone, Eq, Hash, PartialEq)]
        pub struct $name(pub(crate) *mut c_void);

        impl $name {
            /// The null handle.
            pub const fn null() -> Self {
                Self(ptr::null_mut())
            }

            /// Wraps a pointer obtained from the native library.
            ///
            /// # Safety
            ///
            /// `ptr` must be null or a live object of this type. The handle does not own a
            /// reference, whoever passes it to a [`Driver`] is responsible for its lifetime.
            pub unsafe fn from_raw(ptr: *mut c_void) -> Self {
                Self(ptr)
            }

            /// The native pointer.
            pub fn as_ptr(&self) -> *mut c_void {
                self.0
            }

            /// Returns `true` for the null handle.
            pub fn is_null(&self) -> bool {
                self.0.is_null()
            }

            /// The handle as an integer, e.g. for logging.
            pub fn addr(&self) -> usize {
                self.0 as usize
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::null()
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.addr())
            }
        }

        // Handles are opaque identifiers, the OpenCL runtime is thread-safe for all functions
        // bound here.
        unsafe impl Send for $name {}
        unsafe impl Sync for $name {}
    };
}

raw_handle!(
    /// `cl_platform_id`
    RawPlatform
);
raw_handle!(
    /// `cl_device_id`
    RawDevice
);
raw_handle!(
    /// `cl_context`
    RawContext
);
raw_handle!(
    /// `cl_command_queue`
    RawQueue
);

/// `cl_uint`
pub type ClUint = u32;
/// `cl_ulong`
pub type ClUlong = u64;
/// `cl_bool`
pub type ClBool = u32;
/// `cl_context_properties` and `cl_device_partition_property`
pub type ClProperty = isize;

/// `CL_TRUE`
pub const CL_TRUE: ClBool = 1;
/// `CL_FALSE`
pub const CL_FALSE: ClBool = 0;

/// The context error callback as seen by the native side (`pfn_notify` of `clCreateContext`).
pub type NotifyFn = unsafe extern "C" fn(
    errinfo: *const c_char,
    private_info: *const c_void,
    cb: usize,
    user_data: *mut c_void,
);

/// The OpenCL entry points used by this crate.
///
/// All methods are direct counterparts of the C functions and follow their contracts exactly,
/// including the two-phase size/value protocol of the `*Info` functions: passing a null
/// `value` together with a non-null `size_ret` returns the required byte size.
///
/// # Safety
///
/// All methods are `unsafe`. The caller guarantees that every pointer is either null (where the
/// C API allows it) or valid for the given number of bytes/elements, and that every handle
/// refers to a live object. Retains and releases change the native reference count, so they
/// must be balanced by whoever owns the object; the safe types of this crate do that.
///
/// Safe code cannot give back a reference it does not own:
///
/// ```compile_fail
/// use rust_cl_handles::driver::{Driver, RawContext};
///
/// fn release(driver: &dyn Driver, context: RawContext) {
///     driver.release_context(context);
/// }
/// ```
///
/// nor make up a handle:
///
/// ```compile_fail
/// use rust_cl_handles::driver::RawContext;
///
/// let context = RawContext(0xdead as *mut std::ffi::c_void);
/// ```
pub trait Driver: Send + Sync {
    /// `clGetPlatformIDs`
    unsafe fn get_platform_ids(
        &self,
        num_entries: ClUint,
        platforms: *mut RawPlatform,
        num_platforms: *mut ClUint,
    ) -> Status;

    /// `clGetPlatformInfo`
    unsafe fn get_platform_info(
        &self,
        platform: RawPlatform,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status;

    /// `clGetDeviceIDs`
    unsafe fn get_device_ids(
        &self,
        platform: RawPlatform,
        device_type: ClUlong,
        num_entries: ClUint,
        devices: *mut RawDevice,
        num_devices: *mut ClUint,
    ) -> Status;

    /// `clGetDeviceInfo`
    unsafe fn get_device_info(
        &self,
        device: RawDevice,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status;

    /// `clCreateSubDevices`
    unsafe fn create_sub_devices(
        &self,
        device: RawDevice,
        properties: *const ClProperty,
        num_devices: ClUint,
        out_devices: *mut RawDevice,
        num_devices_ret: *mut ClUint,
    ) -> Status;

    /// `clRetainDevice`
    unsafe fn retain_device(&self, device: RawDevice) -> Status;

    /// `clReleaseDevice`
    unsafe fn release_device(&self, device: RawDevice) -> Status;

    /// `clCreateContext`
    unsafe fn create_context(
        &self,
        properties: *const ClProperty,
        num_devices: ClUint,
        devices: *const RawDevice,
        pfn_notify: Option<NotifyFn>,
        user_data: *mut c_void,
        errcode_ret: *mut Status,
    ) -> RawContext;

    /// `clCreateContextFromType`
    unsafe fn create_context_from_type(
        &self,
        properties: *const ClProperty,
        device_type: ClUlong,
        pfn_notify: Option<NotifyFn>,
        user_data: *mut c_void,
        errcode_ret: *mut Status,
    ) -> RawContext;

    /// `clRetainContext`
    unsafe fn retain_context(&self, context: RawContext) -> Status;

    /// `clReleaseContext`
    unsafe fn release_context(&self, context: RawContext) -> Status;

    /// `clGetContextInfo`
    unsafe fn get_context_info(
        &self,
        context: RawContext,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status;

    /// `clCreateCommandQueue`
    unsafe fn create_command_queue(
        &self,
        context: RawContext,
        device: RawDevice,
        properties: ClUlong,
        errcode_ret: *mut Status,
    ) -> RawQueue;

    /// `clRetainCommandQueue`
    unsafe fn retain_command_queue(&self, queue: RawQueue) -> Status;

    /// `clReleaseCommandQueue`
    unsafe fn release_command_queue(&self, queue: RawQueue) -> Status;

    /// `clGetCommandQueueInfo`
    unsafe fn get_command_queue_info(
        &self,
        queue: RawQueue,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status;

    /// `clFlush`
    unsafe fn flush(&self, queue: RawQueue) -> Status;

    /// `clFinish`
    unsafe fn finish(&self, queue: RawQueue) -> Status;
}
