//! [`Driver`] on top of the system OpenCL library.

use std::ffi::c_void;

use opencl_sys::{
    clCreateCommandQueue, clCreateContext, clCreateContextFromType, clCreateSubDevices, clFinish,
    clFlush, clGetCommandQueueInfo, clGetContextInfo, clGetDeviceIDs, clGetDeviceInfo,
    clGetPlatformIDs, clGetPlatformInfo, clReleaseCommandQueue, clReleaseContext, clReleaseDevice,
    clRetainCommandQueue, clRetainContext, clRetainDevice,
};

use crate::driver::{
    ClProperty, ClUint, ClUlong, Driver, NotifyFn, RawContext, RawDevice, RawPlatform, RawQueue,
};
use crate::error::Status;

/// Calls straight into the OpenCL ICD loader.
///
/// The raw handle types are `#[repr(transparent)]` wrappers of the C handles, so arrays of them
/// are passed through as they are.
#[derive(Clone, Copy, Debug, Default)]
pub struct OpenClDriver;

impl Driver for OpenClDriver {
    unsafe fn get_platform_ids(
        &self,
        num_entries: ClUint,
        platforms: *mut RawPlatform,
        num_platforms: *mut ClUint,
    ) -> Status {
        clGetPlatformIDs(num_entries, platforms.cast(), num_platforms)
    }

    unsafe fn get_platform_info(
        &self,
        platform: RawPlatform,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status {
        clGetPlatformInfo(platform.0, param, size, value, size_ret)
    }

    unsafe fn get_device_ids(
        &self,
        platform: RawPlatform,
        device_type: ClUlong,
        num_entries: ClUint,
        devices: *mut RawDevice,
        num_devices: *mut ClUint,
    ) -> Status {
        clGetDeviceIDs(
            platform.0,
            device_type,
            num_entries,
            devices.cast(),
            num_devices,
        )
    }

    unsafe fn get_device_info(
        &self,
        device: RawDevice,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status {
        clGetDeviceInfo(device.0, param, size, value, size_ret)
    }

    unsafe fn create_sub_devices(
        &self,
        device: RawDevice,
        properties: *const ClProperty,
        num_devices: ClUint,
        out_devices: *mut RawDevice,
        num_devices_ret: *mut ClUint,
    ) -> Status {
        clCreateSubDevices(
            device.0,
            properties,
            num_devices,
            out_devices.cast(),
            num_devices_ret,
        )
    }

    unsafe fn retain_device(&self, device: RawDevice) -> Status {
        clRetainDevice(device.0)
    }

    unsafe fn release_device(&self, device: RawDevice) -> Status {
        clReleaseDevice(device.0)
    }

    unsafe fn create_context(
        &self,
        properties: *const ClProperty,
        num_devices: ClUint,
        devices: *const RawDevice,
        pfn_notify: Option<NotifyFn>,
        user_data: *mut c_void,
        errcode_ret: *mut Status,
    ) -> RawContext {
        RawContext(clCreateContext(
            properties,
            num_devices,
            devices.cast(),
            pfn_notify,
            user_data,
            errcode_ret,
        ))
    }

    unsafe fn create_context_from_type(
        &self,
        properties: *const ClProperty,
        device_type: ClUlong,
        pfn_notify: Option<NotifyFn>,
        user_data: *mut c_void,
        errcode_ret: *mut Status,
    ) -> RawContext {
        RawContext(clCreateContextFromType(
            properties,
            device_type,
            pfn_notify,
            user_data,
            errcode_ret,
        ))
    }

    unsafe fn retain_context(&self, context: RawContext) -> Status {
        clRetainContext(context.0)
    }

    unsafe fn release_context(&self, context: RawContext) -> Status {
        clReleaseContext(context.0)
    }

    unsafe fn get_context_info(
        &self,
        context: RawContext,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status {
        clGetContextInfo(context.0, param, size, value, size_ret)
    }

    // `clCreateCommandQueueWithProperties` needs OpenCL 2.0, this works everywhere.
    #[allow(deprecated)]
    unsafe fn create_command_queue(
        &self,
        context: RawContext,
        device: RawDevice,
        properties: ClUlong,
        errcode_ret: *mut Status,
    ) -> RawQueue {
        RawQueue(clCreateCommandQueue(
            context.0,
            device.0,
            properties,
            errcode_ret,
        ))
    }

    unsafe fn retain_command_queue(&self, queue: RawQueue) -> Status {
        clRetainCommandQueue(queue.0)
    }

    unsafe fn release_command_queue(&self, queue: RawQueue) -> Status {
        clReleaseCommandQueue(queue.0)
    }

    unsafe fn get_command_queue_info(
        &self,
        queue: RawQueue,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status {
        clGetCommandQueueInfo(queue.0, param, size, value, size_ret)
    }

    unsafe fn flush(&self, queue: RawQueue) -> Status {
        clFlush(queue.0)
    }

    unsafe fn finish(&self, queue: RawQueue) -> Status {
        clFinish(queue.0)
    }
}
