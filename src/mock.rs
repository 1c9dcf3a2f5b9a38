//! An in-process stand-in for an OpenCL implementation.
//!
//! [`MockDriver`] keeps real reference counts, attribute tables and callbacks for platforms,
//! devices, sub-devices, contexts and command queues, so that the lifecycle logic of this crate
//! can be tested without any OpenCL library installed. Objects are destroyed exactly when their
//! native reference count drops to zero, which is what the tests observe.

use std::collections::{BTreeMap, HashMap};
use std::ffi::{c_void, CString};
use std::ptr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::context::{
    CL_CONTEXT_DEVICES, CL_CONTEXT_INTEROP_USER_SYNC, CL_CONTEXT_NUM_DEVICES, CL_CONTEXT_PLATFORM,
    CL_CONTEXT_PROPERTIES, CL_CONTEXT_REFERENCE_COUNT,
};
use crate::device::*;
use crate::driver::{
    ClProperty, ClUint, ClUlong, Driver, NotifyFn, RawContext, RawDevice, RawPlatform, RawQueue,
    CL_FALSE, CL_TRUE,
};
use crate::error::*;
use crate::platform::{
    CL_PLATFORM_EXTENSIONS, CL_PLATFORM_NAME, CL_PLATFORM_PROFILE, CL_PLATFORM_VENDOR,
    CL_PLATFORM_VERSION,
};
use crate::queue::{
    QueueProperties, CL_QUEUE_CONTEXT, CL_QUEUE_DEVICE, CL_QUEUE_PROPERTIES,
    CL_QUEUE_REFERENCE_COUNT,
};

/// Writes an attribute value following the two-phase protocol of the `clGet*Info` functions.
///
/// # Safety
///
/// `value` must be null or valid for `size` bytes, `size_ret` must be null or valid.
pub(crate) unsafe fn write_info(
    data: &[u8],
    size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> Status {
    if !value.is_null() {
        if size < data.len() {
            return CL_INVALID_VALUE;
        }
        ptr::copy_nonoverlapping(data.as_ptr(), value.cast::<u8>(), data.len());
    }
    if !size_ret.is_null() {
        *size_ret = data.len();
    }
    CL_SUCCESS
}

/// Returned by ICD loaders when no platform is installed.
const CL_PLATFORM_NOT_FOUND_KHR: Status = -1001;

unsafe fn write_lookup(
    data: Option<&Vec<u8>>,
    size: usize,
    value: *mut c_void,
    size_ret: *mut usize,
) -> Status {
    match data {
        Some(data) => write_info(data, size, value, size_ret),
        None => CL_INVALID_VALUE,
    }
}

unsafe fn set_status(errcode_ret: *mut Status, status: Status) {
    if !errcode_ret.is_null() {
        *errcode_ret = status;
    }
}

/// Reads a zero-terminated key/value property list, the terminator is included.
unsafe fn read_properties(properties: *const ClProperty) -> Vec<ClProperty> {
    let mut list = Vec::new();
    if properties.is_null() {
        return list;
    }
    let mut index = 0;
    loop {
        let key = *properties.add(index);
        list.push(key);
        if key == 0 {
            return list;
        }
        list.push(*properties.add(index + 1));
        index += 2;
    }
}

fn string(value: &str) -> Vec<u8> {
    let mut bytes = value.as_bytes().to_vec();
    bytes.push(0);
    bytes
}

fn uint(value: ClUint) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

fn ulong(value: ClUlong) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

fn size(value: usize) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

fn boolean(value: bool) -> Vec<u8> {
    uint(if value { CL_TRUE } else { CL_FALSE })
}

fn sizes(values: &[usize]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_ne_bytes()).collect()
}

fn properties_bytes(values: &[ClProperty]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_ne_bytes()).collect()
}

/// Work submitted to a simulated command queue.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct QueueWork {
    /// Commands enqueued so far.
    pub enqueued: usize,
    /// Commands handed to the device, by a flush or a finish.
    pub submitted: usize,
    /// Commands completed, only a finish waits for those.
    pub completed: usize,
}

/// Calls to the native API observed by the mock.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Counters {
    /// Calls to any `clRetain*` function.
    pub retains: usize,
    /// Calls to any `clRelease*` function.
    pub releases: usize,
    /// Contexts whose reference count dropped to zero.
    pub destroyed_contexts: usize,
    /// Command queues whose reference count dropped to zero.
    pub destroyed_queues: usize,
    /// Sub-devices whose reference count dropped to zero.
    pub destroyed_devices: usize,
    /// Calls to `clFlush`.
    pub flushes: usize,
    /// Calls to `clFinish`.
    pub finishes: usize,
}

struct MockPlatform {
    id: usize,
    info: HashMap<ClUint, Vec<u8>>,
}

struct MockDevice {
    platform: usize,
    device_type: ClUlong,
    /// `None` for root devices, which are not reference counted.
    refs: Option<u32>,
    info: HashMap<ClUint, Vec<u8>>,
}

struct MockContext {
    refs: u32,
    devices: Vec<usize>,
    properties: Vec<ClProperty>,
    notify: Option<(NotifyFn, usize)>,
}

struct MockQueue {
    refs: u32,
    context: usize,
    device: usize,
    properties: ClUlong,
    work: QueueWork,
}

#[derive(Default)]
struct State {
    next_id: usize,
    platforms: Vec<MockPlatform>,
    devices: BTreeMap<usize, MockDevice>,
    contexts: HashMap<usize, MockContext>,
    queues: HashMap<usize, MockQueue>,
    counters: Counters,
    empty_type_contexts: bool,
    failing_context_info: Option<(ClUint, Status)>,
}

impl State {
    fn alloc(&mut self) -> usize {
        self.next_id += 1;
        // Looks like an aligned pointer and is never null.
        self.next_id << 8
    }

    fn device_u32(&self, device: usize, param: ClUint) -> u32 {
        self.devices
            .get(&device)
            .and_then(|device| device.info.get(&param))
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .map_or(0, u32::from_ne_bytes)
    }

    fn device_u64(&self, device: usize, param: ClUint) -> u64 {
        self.devices
            .get(&device)
            .and_then(|device| device.info.get(&param))
            .and_then(|bytes| bytes.as_slice().try_into().ok())
            .map_or(0, u64::from_ne_bytes)
    }

    /// Drops one reference of a sub-device, root devices are ignored.
    fn unref_device(&mut self, id: usize) {
        let destroyed = match self.devices.get_mut(&id).and_then(|device| device.refs.as_mut()) {
            Some(refs) => {
                *refs -= 1;
                *refs == 0
            }
            None => false,
        };
        if destroyed {
            self.devices.remove(&id);
            self.counters.destroyed_devices += 1;
        }
    }

    fn ref_device(&mut self, id: usize) {
        if let Some(refs) = self.devices.get_mut(&id).and_then(|device| device.refs.as_mut()) {
            *refs += 1;
        }
    }

    fn unref_context(&mut self, id: usize) {
        let destroyed = match self.contexts.get_mut(&id) {
            Some(context) => {
                context.refs -= 1;
                context.refs == 0
            }
            None => false,
        };
        if destroyed {
            if let Some(context) = self.contexts.remove(&id) {
                for device in context.devices {
                    self.unref_device(device);
                }
            }
            self.counters.destroyed_contexts += 1;
        }
    }

    fn unref_queue(&mut self, id: usize) {
        let destroyed = match self.queues.get_mut(&id) {
            Some(queue) => {
                queue.refs -= 1;
                queue.refs == 0
            }
            None => false,
        };
        if destroyed {
            if let Some(queue) = self.queues.remove(&id) {
                self.unref_context(queue.context);
            }
            self.counters.destroyed_queues += 1;
        }
    }

    /// Validates context properties and returns the selected platform, if any.
    fn check_properties(&self, list: &[ClProperty]) -> Result<Option<usize>, Status> {
        let mut platform = None;
        for pair in list.chunks(2) {
            match pair {
                [0] => break,
                [key, value] if *key == CL_CONTEXT_PLATFORM => {
                    let id = *value as usize;
                    if !self.platforms.iter().any(|platform| platform.id == id) {
                        return Err(CL_INVALID_PLATFORM);
                    }
                    platform = Some(id);
                }
                [key, _] if *key == CL_CONTEXT_INTEROP_USER_SYNC => {}
                _ => return Err(CL_INVALID_PROPERTY),
            }
        }
        Ok(platform)
    }

    fn new_context(
        &mut self,
        devices: Vec<usize>,
        properties: Vec<ClProperty>,
        notify: Option<(NotifyFn, usize)>,
    ) -> usize {
        for &device in &devices {
            self.ref_device(device);
        }
        let id = self.alloc();
        self.contexts.insert(
            id,
            MockContext {
                refs: 1,
                devices,
                properties,
                notify,
            },
        );
        id
    }
}

/// A simulated OpenCL implementation, see the [module documentation](self).
#[derive(Default)]
pub struct MockDriver {
    state: Mutex<State>,
}

impl MockDriver {
    /// A driver without any platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver with one platform, a partitionable CPU with 8 compute units and a GPU with 32.
    pub fn with_default_devices() -> Self {
        let mock = Self::new();
        let platform = mock.add_platform("Mock Platform");
        mock.add_device(platform, DeviceType::CPU, "Mock CPU", 8);
        mock.add_device(platform, DeviceType::GPU, "Mock GPU", 32);
        mock
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a platform.
    pub fn add_platform(&self, name: &str) -> RawPlatform {
        let mut state = self.lock();
        let id = state.alloc();
        let info = HashMap::from([
            (CL_PLATFORM_NAME, string(name)),
            (CL_PLATFORM_VENDOR, string("Mock Vendor")),
            (CL_PLATFORM_VERSION, string("OpenCL 1.2 Mock")),
            (CL_PLATFORM_PROFILE, string("FULL_PROFILE")),
            (CL_PLATFORM_EXTENSIONS, string("cl_khr_icd")),
        ]);
        state.platforms.push(MockPlatform { id, info });
        RawPlatform(id as *mut c_void)
    }

    /// Adds a root device with a complete attribute table.
    ///
    /// CPUs can be partitioned into as many sub-devices as they have compute units, other
    /// devices not at all.
    pub fn add_device(
        &self,
        platform: RawPlatform,
        device_type: DeviceType,
        name: &str,
        compute_units: u32,
    ) -> RawDevice {
        let is_cpu = device_type.contains(DeviceType::CPU);
        let fp_config =
            FpConfig::DENORM | FpConfig::INF_NAN | FpConfig::ROUND_TO_NEAREST | FpConfig::FMA;
        let execution = if is_cpu {
            ExecCapabilities::KERNEL | ExecCapabilities::NATIVE_KERNEL
        } else {
            ExecCapabilities::KERNEL
        };
        let (max_sub_devices, affinity) = if is_cpu {
            (
                compute_units,
                AffinityDomain::NUMA | AffinityDomain::NEXT_PARTITIONABLE,
            )
        } else {
            (0, AffinityDomain::empty())
        };
        let local_mem_type = if is_cpu { LocalMemType::Global } else { LocalMemType::Local };

        let mut info = HashMap::from([
            (CL_DEVICE_NAME, string(name)),
            (CL_DEVICE_VENDOR, string("Mock Vendor")),
            (CL_DEVICE_VERSION, string("OpenCL 1.2 Mock")),
            (CL_DRIVER_VERSION, string("1.0.0")),
            (CL_DEVICE_PROFILE, string("FULL_PROFILE")),
            (CL_DEVICE_EXTENSIONS, string("cl_khr_fp64 cl_khr_icd")),
            (CL_DEVICE_OPENCL_C_VERSION, string("OpenCL C 1.2")),
            (CL_DEVICE_BUILT_IN_KERNELS, string("")),
            (CL_DEVICE_PLATFORM, size(platform.addr())),
            (CL_DEVICE_TYPE, ulong(device_type.bits())),
            (CL_DEVICE_VENDOR_ID, uint(0xffff)),
            (CL_DEVICE_MAX_COMPUTE_UNITS, uint(compute_units)),
            (CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS, uint(3)),
            (CL_DEVICE_MAX_WORK_ITEM_SIZES, sizes(&[1024, 1024, 64])),
            (CL_DEVICE_MAX_WORK_GROUP_SIZE, size(1024)),
            (CL_DEVICE_GLOBAL_MEM_SIZE, ulong(4 << 30)),
            (CL_DEVICE_LOCAL_MEM_SIZE, ulong(32 << 10)),
            (CL_DEVICE_LOCAL_MEM_TYPE, uint(local_mem_type as ClUint)),
            (CL_DEVICE_MAX_MEM_ALLOC_SIZE, ulong(1 << 30)),
            (CL_DEVICE_GLOBAL_MEM_CACHE_SIZE, ulong(256 << 10)),
            (CL_DEVICE_GLOBAL_MEM_CACHE_TYPE, uint(MemCacheType::ReadWrite as ClUint)),
            (CL_DEVICE_MAX_CONSTANT_BUFFER_SIZE, ulong(64 << 10)),
            (CL_DEVICE_MAX_CLOCK_FREQUENCY, uint(1500)),
            (CL_DEVICE_ADDRESS_BITS, uint(64)),
            (CL_DEVICE_AVAILABLE, boolean(true)),
            (CL_DEVICE_ENDIAN_LITTLE, boolean(true)),
            (CL_DEVICE_COMPILER_AVAILABLE, boolean(true)),
            (CL_DEVICE_LINKER_AVAILABLE, boolean(true)),
            (CL_DEVICE_IMAGE_SUPPORT, boolean(false)),
            (CL_DEVICE_ERROR_CORRECTION_SUPPORT, boolean(false)),
            (CL_DEVICE_HOST_UNIFIED_MEMORY, boolean(is_cpu)),
            (CL_DEVICE_PREFERRED_INTEROP_USER_SYNC, boolean(true)),
            (CL_DEVICE_PROFILING_TIMER_RESOLUTION, size(1)),
            (CL_DEVICE_SINGLE_FP_CONFIG, ulong(fp_config.bits())),
            (CL_DEVICE_DOUBLE_FP_CONFIG, ulong(fp_config.bits())),
            (CL_DEVICE_EXECUTION_CAPABILITIES, ulong(execution.bits())),
            (
                CL_DEVICE_QUEUE_PROPERTIES,
                ulong(QueueProperties::all().bits()),
            ),
            (CL_DEVICE_PARTITION_MAX_SUB_DEVICES, uint(max_sub_devices)),
            (CL_DEVICE_PARTITION_AFFINITY_DOMAIN, ulong(affinity.bits())),
            (CL_DEVICE_PARENT_DEVICE, size(0)),
            (CL_DEVICE_MAX_READ_IMAGE_ARGS, uint(128)),
            (CL_DEVICE_MAX_WRITE_IMAGE_ARGS, uint(64)),
            (CL_DEVICE_IMAGE2D_MAX_WIDTH, size(16384)),
            (CL_DEVICE_IMAGE2D_MAX_HEIGHT, size(16384)),
            (CL_DEVICE_IMAGE3D_MAX_WIDTH, size(2048)),
            (CL_DEVICE_IMAGE3D_MAX_HEIGHT, size(2048)),
            (CL_DEVICE_IMAGE3D_MAX_DEPTH, size(2048)),
            (CL_DEVICE_IMAGE_MAX_BUFFER_SIZE, size(1 << 16)),
            (CL_DEVICE_IMAGE_MAX_ARRAY_SIZE, size(2048)),
            (CL_DEVICE_MAX_SAMPLERS, uint(16)),
            (CL_DEVICE_MAX_PARAMETER_SIZE, size(1024)),
            (CL_DEVICE_MEM_BASE_ADDR_ALIGN, uint(1024)),
            (CL_DEVICE_MIN_DATA_TYPE_ALIGN_SIZE, uint(128)),
            (
                CL_DEVICE_GLOBAL_MEM_CACHELINE_SIZE,
                uint(if is_cpu { 64 } else { 128 }),
            ),
            (CL_DEVICE_MAX_CONSTANT_ARGS, uint(8)),
            (CL_DEVICE_PRINTF_BUFFER_SIZE, size(1 << 20)),
        ]);
        for (vector, width) in [
            (VectorType::Char, 16),
            (VectorType::Short, 8),
            (VectorType::Int, 4),
            (VectorType::Long, 2),
            (VectorType::Float, 4),
            (VectorType::Double, 2),
            (VectorType::Half, 0),
        ] {
            info.insert(vector.native_param(), uint(width));
            info.insert(vector.preferred_param(), uint(width));
        }

        let mut state = self.lock();
        let id = state.alloc();
        state.devices.insert(
            id,
            MockDevice {
                platform: platform.addr(),
                device_type: device_type.bits(),
                refs: None,
                info,
            },
        );
        RawDevice(id as *mut c_void)
    }

    /// Overrides an attribute of a device.
    pub fn set_device_info(&self, device: RawDevice, param: ClUint, value: Vec<u8>) {
        if let Some(device) = self.lock().devices.get_mut(&device.addr()) {
            device.info.insert(param, value);
        }
    }

    /// Makes an attribute of a device unsupported.
    pub fn remove_device_info(&self, device: RawDevice, param: ClUint) {
        if let Some(device) = self.lock().devices.get_mut(&device.addr()) {
            device.info.remove(&param);
        }
    }

    /// The first root device.
    ///
    /// # Panics
    ///
    /// If there are no devices.
    pub fn default_device(&self) -> RawDevice {
        let state = self.lock();
        let id = state
            .devices
            .iter()
            .find(|(_, device)| device.refs.is_none())
            .map(|(id, _)| *id);
        match id {
            Some(id) => RawDevice(id as *mut c_void),
            None => panic!("The mock driver has no devices."),
        }
    }

    /// Creates a context without going through the wrappers.
    ///
    /// # Panics
    ///
    /// If the context can't be created.
    pub fn create_raw_context(&self, devices: &[RawDevice]) -> RawContext {
        let mut status = CL_SUCCESS;
        let context = unsafe {
            self.create_context(
                ptr::null(),
                devices.len() as ClUint,
                devices.as_ptr(),
                None,
                ptr::null_mut(),
                &mut status,
            )
        };
        assert_eq!(status, CL_SUCCESS, "Cannot create mock context.");
        context
    }

    /// Lets context creation by type succeed with an empty device list.
    pub fn set_empty_type_contexts(&self, empty: bool) {
        self.lock().empty_type_contexts = empty;
    }

    /// Lets every `clGetContextInfo` call for `param` fail with `status`.
    pub fn fail_context_info(&self, param: ClUint, status: Status) {
        self.lock().failing_context_info = Some((param, status));
    }

    /// The native reference count of a context, `None` once destroyed.
    pub fn context_refs(&self, context: RawContext) -> Option<u32> {
        self.lock().contexts.get(&context.addr()).map(|context| context.refs)
    }

    /// The native reference count of a command queue, `None` once destroyed.
    pub fn queue_refs(&self, queue: RawQueue) -> Option<u32> {
        self.lock().queues.get(&queue.addr()).map(|queue| queue.refs)
    }

    /// The native reference count of a sub-device, `None` once destroyed or for root devices.
    pub fn device_refs(&self, device: RawDevice) -> Option<u32> {
        self.lock()
            .devices
            .get(&device.addr())
            .and_then(|device| device.refs)
    }

    /// Number of contexts, command queues and sub-devices that are still alive.
    pub fn live_objects(&self) -> usize {
        let state = self.lock();
        let sub_devices = state
            .devices
            .values()
            .filter(|device| device.refs.is_some())
            .count();
        state.contexts.len() + state.queues.len() + sub_devices
    }

    /// All calls observed so far.
    pub fn counters(&self) -> Counters {
        self.lock().counters
    }

    /// Calls to any `clRetain*` function.
    pub fn retain_calls(&self) -> usize {
        self.counters().retains
    }

    /// Calls to any `clRelease*` function.
    pub fn release_calls(&self) -> usize {
        self.counters().releases
    }

    /// Contexts destroyed so far.
    pub fn destroyed_contexts(&self) -> usize {
        self.counters().destroyed_contexts
    }

    /// Simulates enqueueing `commands` commands.
    pub fn enqueue(&self, queue: RawQueue, commands: usize) {
        if let Some(queue) = self.lock().queues.get_mut(&queue.addr()) {
            queue.work.enqueued += commands;
        }
    }

    /// The work state of a queue, `None` once destroyed.
    pub fn queue_work(&self, queue: RawQueue) -> Option<QueueWork> {
        self.lock().queues.get(&queue.addr()).map(|queue| queue.work)
    }

    /// Reports an error for a context the way a driver does, on the calling thread.
    ///
    /// Returns `false` if the context does not exist or was created without a callback.
    pub fn raise_context_error(
        &self,
        context: RawContext,
        errinfo: &str,
        private_info: &[u8],
    ) -> bool {
        let notify = self
            .lock()
            .contexts
            .get(&context.addr())
            .and_then(|context| context.notify);
        // Never call back into user code with the lock held.
        let (pfn_notify, user_data) = match notify {
            Some(notify) => notify,
            None => return false,
        };
        let errinfo = CString::new(errinfo.replace('\0', " ")).unwrap_or_default();
        unsafe {
            pfn_notify(
                errinfo.as_ptr(),
                private_info.as_ptr().cast(),
                private_info.len(),
                user_data as *mut c_void,
            )
        };
        true
    }
}

impl Driver for MockDriver {
    unsafe fn get_platform_ids(
        &self,
        num_entries: ClUint,
        platforms: *mut RawPlatform,
        num_platforms: *mut ClUint,
    ) -> Status {
        if platforms.is_null() == (num_entries != 0)
            || (platforms.is_null() && num_platforms.is_null())
        {
            return CL_INVALID_VALUE;
        }
        let state = self.lock();
        if state.platforms.is_empty() {
            return CL_PLATFORM_NOT_FOUND_KHR;
        }
        if !platforms.is_null() {
            for (index, platform) in state.platforms.iter().take(num_entries as usize).enumerate() {
                *platforms.add(index) = RawPlatform(platform.id as *mut c_void);
            }
        }
        if !num_platforms.is_null() {
            *num_platforms = state.platforms.len() as ClUint;
        }
        CL_SUCCESS
    }

    unsafe fn get_platform_info(
        &self,
        platform: RawPlatform,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status {
        let state = self.lock();
        match state.platforms.iter().find(|p| p.id == platform.addr()) {
            Some(platform) => write_lookup(platform.info.get(&param), size, value, size_ret),
            None => CL_INVALID_PLATFORM,
        }
    }

    unsafe fn get_device_ids(
        &self,
        platform: RawPlatform,
        device_type: ClUlong,
        num_entries: ClUint,
        devices: *mut RawDevice,
        num_devices: *mut ClUint,
    ) -> Status {
        if devices.is_null() == (num_entries != 0)
            || (devices.is_null() && num_devices.is_null())
        {
            return CL_INVALID_VALUE;
        }
        if device_type == 0 {
            return CL_INVALID_DEVICE_TYPE;
        }
        let state = self.lock();
        // A null platform selects the first one.
        let platform = if platform.is_null() {
            match state.platforms.first() {
                Some(platform) => platform.id,
                None => return CL_INVALID_PLATFORM,
            }
        } else if state.platforms.iter().any(|p| p.id == platform.addr()) {
            platform.addr()
        } else {
            return CL_INVALID_PLATFORM;
        };

        let mut matching: Vec<usize> = state
            .devices
            .iter()
            .filter(|(_, device)| device.refs.is_none() && device.platform == platform)
            .filter(|(_, device)| {
                device_type == DeviceType::ALL.bits() || device.device_type & device_type != 0
            })
            .map(|(id, _)| *id)
            .collect();
        if device_type == DeviceType::DEFAULT.bits() {
            matching = state
                .devices
                .iter()
                .filter(|(_, device)| device.refs.is_none() && device.platform == platform)
                .map(|(id, _)| *id)
                .take(1)
                .collect();
        }
        if matching.is_empty() {
            return CL_DEVICE_NOT_FOUND;
        }
        if !devices.is_null() {
            for (index, id) in matching.iter().take(num_entries as usize).enumerate() {
                *devices.add(index) = RawDevice(*id as *mut c_void);
            }
        }
        if !num_devices.is_null() {
            *num_devices = matching.len() as ClUint;
        }
        CL_SUCCESS
    }

    unsafe fn get_device_info(
        &self,
        device: RawDevice,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status {
        let state = self.lock();
        let device = match state.devices.get(&device.addr()) {
            Some(device) => device,
            None => return CL_INVALID_DEVICE,
        };
        if param == CL_DEVICE_REFERENCE_COUNT {
            return write_info(&uint(device.refs.unwrap_or(1)), size, value, size_ret);
        }
        write_lookup(device.info.get(&param), size, value, size_ret)
    }

    unsafe fn create_sub_devices(
        &self,
        device: RawDevice,
        properties: *const ClProperty,
        num_devices: ClUint,
        out_devices: *mut RawDevice,
        num_devices_ret: *mut ClUint,
    ) -> Status {
        let mut state = self.lock();
        let parent = device.addr();
        if !state.devices.contains_key(&parent) {
            return CL_INVALID_DEVICE;
        }
        if properties.is_null() {
            return CL_INVALID_VALUE;
        }
        let max_sub_devices = state.device_u32(parent, CL_DEVICE_PARTITION_MAX_SUB_DEVICES);
        if max_sub_devices == 0 {
            return CL_DEVICE_PARTITION_FAILED;
        }
        let compute_units = state.device_u32(parent, CL_DEVICE_MAX_COMPUTE_UNITS);

        // Compute units of each sub-device and the list to report as partition type.
        let (units, list): (Vec<u32>, Vec<ClProperty>) = match *properties {
            CL_DEVICE_PARTITION_EQUALLY => {
                let per_device = *properties.add(1);
                if per_device <= 0 || per_device as u32 > compute_units {
                    return CL_INVALID_VALUE;
                }
                let count = compute_units / per_device as u32;
                (
                    vec![per_device as u32; count as usize],
                    vec![CL_DEVICE_PARTITION_EQUALLY, per_device, 0],
                )
            }
            CL_DEVICE_PARTITION_BY_COUNTS => {
                let mut counts = Vec::new();
                let mut index = 1;
                loop {
                    let count = *properties.add(index);
                    if count == CL_DEVICE_PARTITION_BY_COUNTS_LIST_END {
                        break;
                    }
                    if count < 0 {
                        return CL_INVALID_VALUE;
                    }
                    counts.push(count as u32);
                    index += 1;
                }
                if counts.is_empty() {
                    return CL_INVALID_VALUE;
                }
                if counts.len() as u32 > max_sub_devices
                    || counts.iter().sum::<u32>() > compute_units
                {
                    return CL_INVALID_DEVICE_PARTITION_COUNT;
                }
                let mut list = vec![CL_DEVICE_PARTITION_BY_COUNTS];
                list.extend(counts.iter().map(|&count| count as ClProperty));
                list.extend([CL_DEVICE_PARTITION_BY_COUNTS_LIST_END, 0]);
                (counts, list)
            }
            CL_DEVICE_PARTITION_BY_AFFINITY_DOMAIN => {
                let domain = *properties.add(1) as ClUlong;
                let supported = state.device_u64(parent, CL_DEVICE_PARTITION_AFFINITY_DOMAIN);
                if domain == 0 || domain & supported != domain {
                    return CL_INVALID_VALUE;
                }
                // Two NUMA nodes.
                (
                    vec![compute_units / 2; 2],
                    vec![CL_DEVICE_PARTITION_BY_AFFINITY_DOMAIN, domain as ClProperty, 0],
                )
            }
            _ => return CL_INVALID_VALUE,
        };

        if !out_devices.is_null() {
            if (num_devices as usize) < units.len() {
                return CL_INVALID_VALUE;
            }
            let (platform, device_type, template) = match state.devices.get(&parent) {
                Some(device) => (device.platform, device.device_type, device.info.clone()),
                None => return CL_INVALID_DEVICE,
            };
            for (index, &unit) in units.iter().enumerate() {
                let id = state.alloc();
                let mut info = template.clone();
                info.insert(CL_DEVICE_MAX_COMPUTE_UNITS, uint(unit));
                info.insert(CL_DEVICE_PARTITION_MAX_SUB_DEVICES, uint(unit));
                info.insert(CL_DEVICE_PARENT_DEVICE, size(parent));
                info.insert(CL_DEVICE_PARTITION_TYPE, properties_bytes(&list));
                state.devices.insert(
                    id,
                    MockDevice {
                        platform,
                        device_type,
                        refs: Some(1),
                        info,
                    },
                );
                *out_devices.add(index) = RawDevice(id as *mut c_void);
            }
        }
        if !num_devices_ret.is_null() {
            *num_devices_ret = units.len() as ClUint;
        }
        CL_SUCCESS
    }

    unsafe fn retain_device(&self, device: RawDevice) -> Status {
        let mut state = self.lock();
        state.counters.retains += 1;
        match state.devices.get_mut(&device.addr()) {
            Some(device) => {
                if let Some(refs) = device.refs.as_mut() {
                    *refs += 1;
                }
                CL_SUCCESS
            }
            None => CL_INVALID_DEVICE,
        }
    }

    unsafe fn release_device(&self, device: RawDevice) -> Status {
        let mut state = self.lock();
        state.counters.releases += 1;
        if !state.devices.contains_key(&device.addr()) {
            return CL_INVALID_DEVICE;
        }
        state.unref_device(device.addr());
        CL_SUCCESS
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
        if num_devices == 0 || devices.is_null() || (pfn_notify.is_none() && !user_data.is_null()) {
            set_status(errcode_ret, CL_INVALID_VALUE);
            return RawContext::null();
        }
        let mut state = self.lock();
        let list = read_properties(properties);
        if let Err(status) = state.check_properties(&list) {
            set_status(errcode_ret, status);
            return RawContext::null();
        }
        let ids: Vec<usize> = (0..num_devices as usize)
            .map(|index| (*devices.add(index)).addr())
            .collect();
        if ids.iter().any(|id| !state.devices.contains_key(id)) {
            set_status(errcode_ret, CL_INVALID_DEVICE);
            return RawContext::null();
        }
        let notify = pfn_notify.map(|pfn_notify| (pfn_notify, user_data as usize));
        let id = state.new_context(ids, list, notify);
        set_status(errcode_ret, CL_SUCCESS);
        RawContext(id as *mut c_void)
    }

    unsafe fn create_context_from_type(
        &self,
        properties: *const ClProperty,
        device_type: ClUlong,
        pfn_notify: Option<NotifyFn>,
        user_data: *mut c_void,
        errcode_ret: *mut Status,
    ) -> RawContext {
        if pfn_notify.is_none() && !user_data.is_null() {
            set_status(errcode_ret, CL_INVALID_VALUE);
            return RawContext::null();
        }
        let list = read_properties(properties);
        let platform = match self.lock().check_properties(&list) {
            Ok(Some(platform)) => RawPlatform(platform as *mut c_void),
            Ok(None) => RawPlatform::null(),
            Err(status) => {
                set_status(errcode_ret, status);
                return RawContext::null();
            }
        };

        let empty = self.lock().empty_type_contexts;
        let ids = if empty {
            Vec::new()
        } else {
            let mut count = 0;
            let status = self.get_device_ids(platform, device_type, 0, ptr::null_mut(), &mut count);
            if status != CL_SUCCESS {
                set_status(errcode_ret, status);
                return RawContext::null();
            }
            let mut devices = vec![RawDevice::null(); count as usize];
            let status = self.get_device_ids(
                platform,
                device_type,
                count,
                devices.as_mut_ptr(),
                ptr::null_mut(),
            );
            if status != CL_SUCCESS {
                set_status(errcode_ret, status);
                return RawContext::null();
            }
            devices.iter().map(RawDevice::addr).collect()
        };

        let notify = pfn_notify.map(|pfn_notify| (pfn_notify, user_data as usize));
        let id = self.lock().new_context(ids, list, notify);
        set_status(errcode_ret, CL_SUCCESS);
        RawContext(id as *mut c_void)
    }

    unsafe fn retain_context(&self, context: RawContext) -> Status {
        let mut state = self.lock();
        state.counters.retains += 1;
        match state.contexts.get_mut(&context.addr()) {
            Some(context) => {
                context.refs += 1;
                CL_SUCCESS
            }
            None => CL_INVALID_CONTEXT,
        }
    }

    unsafe fn release_context(&self, context: RawContext) -> Status {
        let mut state = self.lock();
        state.counters.releases += 1;
        if !state.contexts.contains_key(&context.addr()) {
            return CL_INVALID_CONTEXT;
        }
        state.unref_context(context.addr());
        CL_SUCCESS
    }

    unsafe fn get_context_info(
        &self,
        context: RawContext,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status {
        let state = self.lock();
        let context = match state.contexts.get(&context.addr()) {
            Some(context) => context,
            None => return CL_INVALID_CONTEXT,
        };
        if let Some((failing, status)) = state.failing_context_info {
            if failing == param {
                return status;
            }
        }
        let data = match param {
            CL_CONTEXT_REFERENCE_COUNT => uint(context.refs),
            CL_CONTEXT_NUM_DEVICES => uint(context.devices.len() as ClUint),
            CL_CONTEXT_DEVICES => sizes(&context.devices),
            CL_CONTEXT_PROPERTIES => properties_bytes(&context.properties),
            _ => return CL_INVALID_VALUE,
        };
        write_info(&data, size, value, size_ret)
    }

    unsafe fn create_command_queue(
        &self,
        context: RawContext,
        device: RawDevice,
        properties: ClUlong,
        errcode_ret: *mut Status,
    ) -> RawQueue {
        let mut state = self.lock();
        let status = match state.contexts.get(&context.addr()) {
            None => CL_INVALID_CONTEXT,
            Some(context) if !context.devices.contains(&device.addr()) => CL_INVALID_DEVICE,
            Some(_) if properties & !QueueProperties::all().bits() != 0 => CL_INVALID_VALUE,
            Some(_) => CL_SUCCESS,
        };
        if status != CL_SUCCESS {
            set_status(errcode_ret, status);
            return RawQueue::null();
        }
        if let Some(context) = state.contexts.get_mut(&context.addr()) {
            // Queues keep their context alive.
            context.refs += 1;
        }
        let id = state.alloc();
        state.queues.insert(
            id,
            MockQueue {
                refs: 1,
                context: context.addr(),
                device: device.addr(),
                properties,
                work: QueueWork::default(),
            },
        );
        set_status(errcode_ret, CL_SUCCESS);
        RawQueue(id as *mut c_void)
    }

    unsafe fn retain_command_queue(&self, queue: RawQueue) -> Status {
        let mut state = self.lock();
        state.counters.retains += 1;
        match state.queues.get_mut(&queue.addr()) {
            Some(queue) => {
                queue.refs += 1;
                CL_SUCCESS
            }
            None => CL_INVALID_COMMAND_QUEUE,
        }
    }

    unsafe fn release_command_queue(&self, queue: RawQueue) -> Status {
        let mut state = self.lock();
        state.counters.releases += 1;
        if !state.queues.contains_key(&queue.addr()) {
            return CL_INVALID_COMMAND_QUEUE;
        }
        state.unref_queue(queue.addr());
        CL_SUCCESS
    }

    unsafe fn get_command_queue_info(
        &self,
        queue: RawQueue,
        param: ClUint,
        size: usize,
        value: *mut c_void,
        size_ret: *mut usize,
    ) -> Status {
        let state = self.lock();
        let queue = match state.queues.get(&queue.addr()) {
            Some(queue) => queue,
            None => return CL_INVALID_COMMAND_QUEUE,
        };
        let data = match param {
            CL_QUEUE_CONTEXT => sizes(&[queue.context]),
            CL_QUEUE_DEVICE => sizes(&[queue.device]),
            CL_QUEUE_REFERENCE_COUNT => uint(queue.refs),
            CL_QUEUE_PROPERTIES => ulong(queue.properties),
            _ => return CL_INVALID_VALUE,
        };
        write_info(&data, size, value, size_ret)
    }

    unsafe fn flush(&self, queue: RawQueue) -> Status {
        let mut state = self.lock();
        state.counters.flushes += 1;
        match state.queues.get_mut(&queue.addr()) {
            Some(queue) => {
                queue.work.submitted = queue.work.enqueued;
                CL_SUCCESS
            }
            None => CL_INVALID_COMMAND_QUEUE,
        }
    }

    unsafe fn finish(&self, queue: RawQueue) -> Status {
        let mut state = self.lock();
        state.counters.finishes += 1;
        match state.queues.get_mut(&queue.addr()) {
            Some(queue) => {
                queue.work.submitted = queue.work.enqueued;
                queue.work.completed = queue.work.enqueued;
                CL_SUCCESS
            }
            None => CL_INVALID_COMMAND_QUEUE,
        }
    }
}
