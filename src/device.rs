//! OpenCL devices, their attributes and partitioning into sub-devices.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::Arc;

use bitflags::bitflags;
use log::debug;

use crate::driver::{ClProperty, ClUint, Driver, RawDevice, RawPlatform};
use crate::error::{check, ClError, ClResult, CL_SUCCESS};
use crate::handle::{DeviceKind, Handle};
use crate::info::{expect_info, query, Info, InfoType};
use crate::platform::{Platform, Runtime};
use crate::queue::QueueProperties;

macro_rules! params {
    ($($name:ident = $value:literal,)*) => {
        $(
            #[allow(missing_docs)]
            pub const $name: ClUint = $value;
        )*
    };
}

params! {
    CL_DEVICE_TYPE = 0x1000,
    CL_DEVICE_VENDOR_ID = 0x1001,
    CL_DEVICE_MAX_COMPUTE_UNITS = 0x1002,
    CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS = 0x1003,
    CL_DEVICE_MAX_WORK_GROUP_SIZE = 0x1004,
    CL_DEVICE_MAX_WORK_ITEM_SIZES = 0x1005,
    CL_DEVICE_PREFERRED_VECTOR_WIDTH_CHAR = 0x1006,
    CL_DEVICE_PREFERRED_VECTOR_WIDTH_SHORT = 0x1007,
    CL_DEVICE_PREFERRED_VECTOR_WIDTH_INT = 0x1008,
    CL_DEVICE_PREFERRED_VECTOR_WIDTH_LONG = 0x1009,
    CL_DEVICE_PREFERRED_VECTOR_WIDTH_FLOAT = 0x100A,
    CL_DEVICE_PREFERRED_VECTOR_WIDTH_DOUBLE = 0x100B,
    CL_DEVICE_MAX_CLOCK_FREQUENCY = 0x100C,
    CL_DEVICE_ADDRESS_BITS = 0x100D,
    CL_DEVICE_MAX_READ_IMAGE_ARGS = 0x100E,
    CL_DEVICE_MAX_WRITE_IMAGE_ARGS = 0x100F,
    CL_DEVICE_MAX_MEM_ALLOC_SIZE = 0x1010,
    CL_DEVICE_IMAGE2D_MAX_WIDTH = 0x1011,
    CL_DEVICE_IMAGE2D_MAX_HEIGHT = 0x1012,
    CL_DEVICE_IMAGE3D_MAX_WIDTH = 0x1013,
    CL_DEVICE_IMAGE3D_MAX_HEIGHT = 0x1014,
    CL_DEVICE_IMAGE3D_MAX_DEPTH = 0x1015,
    CL_DEVICE_IMAGE_SUPPORT = 0x1016,
    CL_DEVICE_MAX_PARAMETER_SIZE = 0x1017,
    CL_DEVICE_MAX_SAMPLERS = 0x1018,
    CL_DEVICE_MEM_BASE_ADDR_ALIGN = 0x1019,
    CL_DEVICE_MIN_DATA_TYPE_ALIGN_SIZE = 0x101A,
    CL_DEVICE_SINGLE_FP_CONFIG = 0x101B,
    CL_DEVICE_GLOBAL_MEM_CACHE_TYPE = 0x101C,
    CL_DEVICE_GLOBAL_MEM_CACHELINE_SIZE = 0x101D,
    CL_DEVICE_GLOBAL_MEM_CACHE_SIZE = 0x101E,
    CL_DEVICE_GLOBAL_MEM_SIZE = 0x101F,
    CL_DEVICE_MAX_CONSTANT_BUFFER_SIZE = 0x1020,
    CL_DEVICE_MAX_CONSTANT_ARGS = 0x1021,
    CL_DEVICE_LOCAL_MEM_TYPE = 0x1022,
    CL_DEVICE_LOCAL_MEM_SIZE = 0x1023,
    CL_DEVICE_ERROR_CORRECTION_SUPPORT = 0x1024,
    CL_DEVICE_PROFILING_TIMER_RESOLUTION = 0x1025,
    CL_DEVICE_ENDIAN_LITTLE = 0x1026,
    CL_DEVICE_AVAILABLE = 0x1027,
    CL_DEVICE_COMPILER_AVAILABLE = 0x1028,
    CL_DEVICE_EXECUTION_CAPABILITIES = 0x1029,
    CL_DEVICE_QUEUE_PROPERTIES = 0x102A,
    CL_DEVICE_NAME = 0x102B,
    CL_DEVICE_VENDOR = 0x102C,
    CL_DRIVER_VERSION = 0x102D,
    CL_DEVICE_PROFILE = 0x102E,
    CL_DEVICE_VERSION = 0x102F,
    CL_DEVICE_EXTENSIONS = 0x1030,
    CL_DEVICE_PLATFORM = 0x1031,
    CL_DEVICE_DOUBLE_FP_CONFIG = 0x1032,
    CL_DEVICE_HALF_FP_CONFIG = 0x1033,
    CL_DEVICE_PREFERRED_VECTOR_WIDTH_HALF = 0x1034,
    CL_DEVICE_HOST_UNIFIED_MEMORY = 0x1035,
    CL_DEVICE_NATIVE_VECTOR_WIDTH_CHAR = 0x1036,
    CL_DEVICE_NATIVE_VECTOR_WIDTH_SHORT = 0x1037,
    CL_DEVICE_NATIVE_VECTOR_WIDTH_INT = 0x1038,
    CL_DEVICE_NATIVE_VECTOR_WIDTH_LONG = 0x1039,
    CL_DEVICE_NATIVE_VECTOR_WIDTH_FLOAT = 0x103A,
    CL_DEVICE_NATIVE_VECTOR_WIDTH_DOUBLE = 0x103B,
    CL_DEVICE_NATIVE_VECTOR_WIDTH_HALF = 0x103C,
    CL_DEVICE_OPENCL_C_VERSION = 0x103D,
    CL_DEVICE_LINKER_AVAILABLE = 0x103E,
    CL_DEVICE_BUILT_IN_KERNELS = 0x103F,
    CL_DEVICE_IMAGE_MAX_BUFFER_SIZE = 0x1040,
    CL_DEVICE_IMAGE_MAX_ARRAY_SIZE = 0x1041,
    CL_DEVICE_PARENT_DEVICE = 0x1042,
    CL_DEVICE_PARTITION_MAX_SUB_DEVICES = 0x1043,
    CL_DEVICE_PARTITION_PROPERTIES = 0x1044,
    CL_DEVICE_PARTITION_AFFINITY_DOMAIN = 0x1045,
    CL_DEVICE_PARTITION_TYPE = 0x1046,
    CL_DEVICE_REFERENCE_COUNT = 0x1047,
    CL_DEVICE_PREFERRED_INTEROP_USER_SYNC = 0x1048,
    CL_DEVICE_PRINTF_BUFFER_SIZE = 0x1049,
}

#[allow(missing_docs)]
pub const CL_DEVICE_PARTITION_EQUALLY: ClProperty = 0x1086;
#[allow(missing_docs)]
pub const CL_DEVICE_PARTITION_BY_COUNTS: ClProperty = 0x1087;
#[allow(missing_docs)]
pub const CL_DEVICE_PARTITION_BY_COUNTS_LIST_END: ClProperty = 0x0;
#[allow(missing_docs)]
pub const CL_DEVICE_PARTITION_BY_AFFINITY_DOMAIN: ClProperty = 0x1088;

bitflags! {
    /// `cl_device_type`
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct DeviceType: u64 {
        /// The default device of the platform.
        const DEFAULT = 1 << 0;
        #[allow(missing_docs)]
        const CPU = 1 << 1;
        #[allow(missing_docs)]
        const GPU = 1 << 2;
        /// Dedicated accelerators, e.g. FPGAs or the IBM CELL Blade.
        const ACCELERATOR = 1 << 3;
        /// Devices without support for OpenCL C programs.
        const CUSTOM = 1 << 4;
        /// Every device of the platform.
        const ALL = 0xFFFF_FFFF;
    }
}

bitflags! {
    /// `cl_device_fp_config`, the floating point capabilities of a device.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct FpConfig: u64 {
        #[allow(missing_docs)]
        const DENORM = 1 << 0;
        #[allow(missing_docs)]
        const INF_NAN = 1 << 1;
        #[allow(missing_docs)]
        const ROUND_TO_NEAREST = 1 << 2;
        #[allow(missing_docs)]
        const ROUND_TO_ZERO = 1 << 3;
        #[allow(missing_docs)]
        const ROUND_TO_INF = 1 << 4;
        #[allow(missing_docs)]
        const FMA = 1 << 5;
        /// Basic operations are implemented in software.
        const SOFT_FLOAT = 1 << 6;
        #[allow(missing_docs)]
        const CORRECTLY_ROUNDED_DIVIDE_SQRT = 1 << 7;
    }
}

bitflags! {
    /// `cl_device_exec_capabilities`
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct ExecCapabilities: u64 {
        /// OpenCL kernels can be executed.
        const KERNEL = 1 << 0;
        /// Native host functions can be executed.
        const NATIVE_KERNEL = 1 << 1;
    }
}

bitflags! {
    /// `cl_device_affinity_domain`
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct AffinityDomain: u64 {
        #[allow(missing_docs)]
        const NUMA = 1 << 0;
        #[allow(missing_docs)]
        const L4_CACHE = 1 << 1;
        #[allow(missing_docs)]
        const L3_CACHE = 1 << 2;
        #[allow(missing_docs)]
        const L2_CACHE = 1 << 3;
        #[allow(missing_docs)]
        const L1_CACHE = 1 << 4;
        /// Split along the next domain level that can be partitioned.
        const NEXT_PARTITIONABLE = 1 << 5;
    }
}

/// Implements decoding and `A|B` rendering for a `cl_bitfield` based flags type.
macro_rules! bitfield {
    ($flags:ty, $empty:literal, [$($flag:ident => $name:literal),* $(,)?]) => {
        impl $crate::info::InfoElement for $flags {
            const WIDTH: usize = <u64 as $crate::info::InfoElement>::WIDTH;

            fn from_ne_slice(bytes: &[u8]) -> Self {
                <$flags>::from_bits_retain(<u64 as $crate::info::InfoElement>::from_ne_slice(bytes))
            }
        }

        impl ::std::fmt::Display for $flags {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                let names: Vec<&str> = [$((<$flags>::$flag, $name)),*]
                    .iter()
                    .filter(|(flag, _)| self.contains(*flag))
                    .map(|(_, name)| *name)
                    .collect();
                if names.is_empty() {
                    f.write_str($empty)
                } else {
                    f.write_str(&names.join("|"))
                }
            }
        }
    };
}

pub(crate) use bitfield;

bitfield!(DeviceType, "None", [
    DEFAULT => "Default",
    CPU => "CPU",
    GPU => "GPU",
    ACCELERATOR => "Accelerator",
    CUSTOM => "Custom",
]);
bitfield!(FpConfig, "None", [
    DENORM => "Denorm",
    INF_NAN => "InfNaN",
    ROUND_TO_NEAREST => "RoundToNearest",
    ROUND_TO_ZERO => "RoundToZero",
    ROUND_TO_INF => "RoundToInf",
    FMA => "FMA",
    SOFT_FLOAT => "SoftFloat",
    CORRECTLY_ROUNDED_DIVIDE_SQRT => "CorrectlyRoundedDivideSqrt",
]);
bitfield!(ExecCapabilities, "None", [
    KERNEL => "Kernel",
    NATIVE_KERNEL => "NativeKernel",
]);
bitfield!(AffinityDomain, "None", [
    NUMA => "NUMA",
    L4_CACHE => "L4Cache",
    L3_CACHE => "L3Cache",
    L2_CACHE => "L2Cache",
    L1_CACHE => "L1Cache",
    NEXT_PARTITIONABLE => "NextPartitionable",
]);

impl DeviceType {
    /// Whether the type selects devices for a context, see
    /// [`crate::Platform::create_context_from_type`].
    pub fn is_selector(&self) -> bool {
        [
            DeviceType::CPU,
            DeviceType::GPU,
            DeviceType::ACCELERATOR,
            DeviceType::DEFAULT,
            DeviceType::ALL,
        ]
        .contains(self)
    }
}

/// `cl_device_local_mem_type`
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LocalMemType {
    /// No local memory.
    None = 0,
    /// Dedicated local memory.
    Local = 1,
    /// Local memory is emulated with global memory.
    Global = 2,
}

impl InfoType for LocalMemType {
    fn decode(bytes: &[u8]) -> ClResult<Self> {
        match ClUint::decode(bytes)? {
            0 => Ok(Self::None),
            1 => Ok(Self::Local),
            2 => Ok(Self::Global),
            _ => Err(ClError::InvalidValue),
        }
    }
}

/// `cl_device_mem_cache_type`
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum MemCacheType {
    #[allow(missing_docs)]
    None = 0,
    #[allow(missing_docs)]
    ReadOnly = 1,
    #[allow(missing_docs)]
    ReadWrite = 2,
}

impl InfoType for MemCacheType {
    fn decode(bytes: &[u8]) -> ClResult<Self> {
        match ClUint::decode(bytes)? {
            0 => Ok(Self::None),
            1 => Ok(Self::ReadOnly),
            2 => Ok(Self::ReadWrite),
            _ => Err(ClError::InvalidValue),
        }
    }
}

/// The scalar types of OpenCL C vectors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[allow(missing_docs)]
pub enum VectorType {
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Half,
}

impl VectorType {
    /// The attribute for the native ISA vector width.
    pub fn native_param(self) -> ClUint {
        match self {
            Self::Char => CL_DEVICE_NATIVE_VECTOR_WIDTH_CHAR,
            Self::Short => CL_DEVICE_NATIVE_VECTOR_WIDTH_SHORT,
            Self::Int => CL_DEVICE_NATIVE_VECTOR_WIDTH_INT,
            Self::Long => CL_DEVICE_NATIVE_VECTOR_WIDTH_LONG,
            Self::Float => CL_DEVICE_NATIVE_VECTOR_WIDTH_FLOAT,
            Self::Double => CL_DEVICE_NATIVE_VECTOR_WIDTH_DOUBLE,
            Self::Half => CL_DEVICE_NATIVE_VECTOR_WIDTH_HALF,
        }
    }

    /// The attribute for the preferred vector width.
    pub fn preferred_param(self) -> ClUint {
        match self {
            Self::Char => CL_DEVICE_PREFERRED_VECTOR_WIDTH_CHAR,
            Self::Short => CL_DEVICE_PREFERRED_VECTOR_WIDTH_SHORT,
            Self::Int => CL_DEVICE_PREFERRED_VECTOR_WIDTH_INT,
            Self::Long => CL_DEVICE_PREFERRED_VECTOR_WIDTH_LONG,
            Self::Float => CL_DEVICE_PREFERRED_VECTOR_WIDTH_FLOAT,
            Self::Double => CL_DEVICE_PREFERRED_VECTOR_WIDTH_DOUBLE,
            Self::Half => CL_DEVICE_PREFERRED_VECTOR_WIDTH_HALF,
        }
    }
}

/// An OpenCL device.
///
/// Root devices live as long as their platform, so for them this is a plain identifier. A view
/// of a sub-device obtained from [`SubDevice::as_device`] shares ownership of the native
/// reference with the [`SubDevice`]: it stays valid after the [`SubDevice`] is dropped, and
/// panics on use once the [`SubDevice`] was explicitly released. Devices returned by info
/// queries, e.g. [`Device::parent_device`], never own a reference.
///
/// Getters for attributes every device has panic if the query fails, as that can only happen for
/// an invalid device. Getters for attributes that depend on the OpenCL version or on extensions
/// return a [`ClResult`].
#[derive(Clone)]
pub struct Device {
    id: RawDevice,
    runtime: Runtime,
    owner: Option<Arc<Handle<DeviceKind>>>,
}

fn query_device<T: InfoType>(
    driver: &dyn Driver,
    id: RawDevice,
    param: ClUint,
) -> ClResult<Info<T>> {
    query(|size, value, size_ret| unsafe {
        driver.get_device_info(id, param, size, value, size_ret)
    })
}

impl Device {
    pub(crate) fn new(id: RawDevice, runtime: Runtime) -> Self {
        Self {
            id,
            runtime,
            owner: None,
        }
    }

    /// Runs `f` with the native device, which cannot be released meanwhile.
    ///
    /// # Panics
    ///
    /// If this views a released sub-device.
    fn with<R>(&self, f: impl FnOnce(&dyn Driver, RawDevice) -> R) -> R {
        match &self.owner {
            Some(owner) => owner.with(f),
            None => f(self.runtime.driver().as_ref(), self.id),
        }
    }

    /// The raw device id.
    ///
    /// # Panics
    ///
    /// If this views a released sub-device.
    pub fn id(&self) -> RawDevice {
        self.with(|_, id| id)
    }

    /// The runtime the device belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Queries any device attribute.
    ///
    /// # Panics
    ///
    /// If this views a released sub-device.
    pub fn info<T: InfoType>(&self, param: ClUint) -> ClResult<Info<T>> {
        self.with(|driver, id| query_device(driver, id, param))
    }

    fn get<T: InfoType>(&self, param: ClUint) -> ClResult<T> {
        self.info(param).map(Info::into_value)
    }

    fn mandatory<T: InfoType>(&self, param: ClUint, name: &str) -> T {
        expect_info(self.get(param), name)
    }

    /// The device name, e.g. `GeForce RTX 3090`.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn name(&self) -> String {
        self.mandatory(CL_DEVICE_NAME, "CL_DEVICE_NAME")
    }

    /// The vendor name.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn vendor(&self) -> String {
        self.mandatory(CL_DEVICE_VENDOR, "CL_DEVICE_VENDOR")
    }

    /// The supported OpenCL version, formatted as `OpenCL <major>.<minor> <vendor specific>`.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn version(&self) -> String {
        self.mandatory(CL_DEVICE_VERSION, "CL_DEVICE_VERSION")
    }

    /// The driver version, formatted as `<major>.<minor>`.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn driver_version(&self) -> String {
        self.mandatory(CL_DRIVER_VERSION, "CL_DRIVER_VERSION")
    }

    /// Either `FULL_PROFILE` or `EMBEDDED_PROFILE`.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn profile(&self) -> String {
        self.mandatory(CL_DEVICE_PROFILE, "CL_DEVICE_PROFILE")
    }

    /// Space separated list of extension names.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn extensions(&self) -> String {
        self.mandatory(CL_DEVICE_EXTENSIONS, "CL_DEVICE_EXTENSIONS")
    }

    /// The platform of the device.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn platform(&self) -> Platform {
        let id: RawPlatform = self.mandatory(CL_DEVICE_PLATFORM, "CL_DEVICE_PLATFORM");
        Platform::new(id, self.runtime.clone())
    }

    /// # Panics
    ///
    /// If the query fails.
    pub fn device_type(&self) -> DeviceType {
        self.mandatory(CL_DEVICE_TYPE, "CL_DEVICE_TYPE")
    }

    /// A unique vendor identifier, typically the PCI vendor ID.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn vendor_id(&self) -> u32 {
        self.mandatory(CL_DEVICE_VENDOR_ID, "CL_DEVICE_VENDOR_ID")
    }

    /// The number of parallel compute units.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn max_compute_units(&self) -> u32 {
        self.mandatory(CL_DEVICE_MAX_COMPUTE_UNITS, "CL_DEVICE_MAX_COMPUTE_UNITS")
    }

    /// # Panics
    ///
    /// If the query fails.
    pub fn max_work_item_dimensions(&self) -> u32 {
        self.mandatory(
            CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS,
            "CL_DEVICE_MAX_WORK_ITEM_DIMENSIONS",
        )
    }

    /// The maximum number of work-items per dimension of a work-group.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn max_work_item_sizes(&self) -> Vec<usize> {
        self.mandatory(CL_DEVICE_MAX_WORK_ITEM_SIZES, "CL_DEVICE_MAX_WORK_ITEM_SIZES")
    }

    /// # Panics
    ///
    /// If the query fails.
    pub fn max_work_group_size(&self) -> usize {
        self.mandatory(CL_DEVICE_MAX_WORK_GROUP_SIZE, "CL_DEVICE_MAX_WORK_GROUP_SIZE")
    }

    /// The size of the global memory in bytes.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn global_mem_size(&self) -> u64 {
        self.mandatory(CL_DEVICE_GLOBAL_MEM_SIZE, "CL_DEVICE_GLOBAL_MEM_SIZE")
    }

    /// The size of the local memory in bytes.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn local_mem_size(&self) -> u64 {
        self.mandatory(CL_DEVICE_LOCAL_MEM_SIZE, "CL_DEVICE_LOCAL_MEM_SIZE")
    }

    /// The largest single allocation in bytes.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn max_mem_alloc_size(&self) -> u64 {
        self.mandatory(CL_DEVICE_MAX_MEM_ALLOC_SIZE, "CL_DEVICE_MAX_MEM_ALLOC_SIZE")
    }

    /// Either 32 or 64.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn address_bits(&self) -> u32 {
        self.mandatory(CL_DEVICE_ADDRESS_BITS, "CL_DEVICE_ADDRESS_BITS")
    }

    /// # Panics
    ///
    /// If the query fails.
    pub fn available(&self) -> bool {
        self.mandatory(CL_DEVICE_AVAILABLE, "CL_DEVICE_AVAILABLE")
    }

    /// # Panics
    ///
    /// If the query fails.
    pub fn endian_little(&self) -> bool {
        self.mandatory(CL_DEVICE_ENDIAN_LITTLE, "CL_DEVICE_ENDIAN_LITTLE")
    }

    /// # Panics
    ///
    /// If the query fails.
    pub fn single_fp_config(&self) -> FpConfig {
        self.mandatory(CL_DEVICE_SINGLE_FP_CONFIG, "CL_DEVICE_SINGLE_FP_CONFIG")
    }

    /// # Panics
    ///
    /// If the query fails.
    pub fn execution_capabilities(&self) -> ExecCapabilities {
        self.mandatory(
            CL_DEVICE_EXECUTION_CAPABILITIES,
            "CL_DEVICE_EXECUTION_CAPABILITIES",
        )
    }

    /// The number of image objects a kernel can read from at the same time.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn max_read_image_args(&self) -> u32 {
        self.mandatory(CL_DEVICE_MAX_READ_IMAGE_ARGS, "CL_DEVICE_MAX_READ_IMAGE_ARGS")
    }

    /// The number of image objects a kernel can write to at the same time.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn max_write_image_args(&self) -> u32 {
        self.mandatory(CL_DEVICE_MAX_WRITE_IMAGE_ARGS, "CL_DEVICE_MAX_WRITE_IMAGE_ARGS")
    }

    /// In pixels.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn image2d_max_width(&self) -> usize {
        self.mandatory(CL_DEVICE_IMAGE2D_MAX_WIDTH, "CL_DEVICE_IMAGE2D_MAX_WIDTH")
    }

    /// In pixels.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn image2d_max_height(&self) -> usize {
        self.mandatory(CL_DEVICE_IMAGE2D_MAX_HEIGHT, "CL_DEVICE_IMAGE2D_MAX_HEIGHT")
    }

    /// In pixels.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn image3d_max_width(&self) -> usize {
        self.mandatory(CL_DEVICE_IMAGE3D_MAX_WIDTH, "CL_DEVICE_IMAGE3D_MAX_WIDTH")
    }

    /// In pixels.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn image3d_max_height(&self) -> usize {
        self.mandatory(CL_DEVICE_IMAGE3D_MAX_HEIGHT, "CL_DEVICE_IMAGE3D_MAX_HEIGHT")
    }

    /// In pixels.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn image3d_max_depth(&self) -> usize {
        self.mandatory(CL_DEVICE_IMAGE3D_MAX_DEPTH, "CL_DEVICE_IMAGE3D_MAX_DEPTH")
    }

    /// The number of pixels of a 1D image created from a buffer.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn image_max_buffer_size(&self) -> usize {
        self.mandatory(CL_DEVICE_IMAGE_MAX_BUFFER_SIZE, "CL_DEVICE_IMAGE_MAX_BUFFER_SIZE")
    }

    /// The number of images in a 1D or 2D image array.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn image_max_array_size(&self) -> usize {
        self.mandatory(CL_DEVICE_IMAGE_MAX_ARRAY_SIZE, "CL_DEVICE_IMAGE_MAX_ARRAY_SIZE")
    }

    /// The number of samplers a kernel can use.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn max_samplers(&self) -> u32 {
        self.mandatory(CL_DEVICE_MAX_SAMPLERS, "CL_DEVICE_MAX_SAMPLERS")
    }

    /// The total size of all kernel arguments in bytes.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn max_parameter_size(&self) -> usize {
        self.mandatory(CL_DEVICE_MAX_PARAMETER_SIZE, "CL_DEVICE_MAX_PARAMETER_SIZE")
    }

    /// The alignment of sub-buffer offsets in bits.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn mem_base_addr_align(&self) -> u32 {
        self.mandatory(CL_DEVICE_MEM_BASE_ADDR_ALIGN, "CL_DEVICE_MEM_BASE_ADDR_ALIGN")
    }

    /// # Panics
    ///
    /// If the query fails.
    pub fn min_data_type_align_size(&self) -> u32 {
        self.mandatory(CL_DEVICE_MIN_DATA_TYPE_ALIGN_SIZE, "CL_DEVICE_MIN_DATA_TYPE_ALIGN_SIZE")
    }

    /// The size of a global memory cache line in bytes.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn global_mem_cacheline_size(&self) -> u32 {
        self.mandatory(CL_DEVICE_GLOBAL_MEM_CACHELINE_SIZE, "CL_DEVICE_GLOBAL_MEM_CACHELINE_SIZE")
    }

    /// The number of `__constant` arguments a kernel can have.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn max_constant_args(&self) -> u32 {
        self.mandatory(CL_DEVICE_MAX_CONSTANT_ARGS, "CL_DEVICE_MAX_CONSTANT_ARGS")
    }

    /// The size of the buffer for `printf` output in bytes.
    ///
    /// # Panics
    ///
    /// If the query fails.
    pub fn printf_buffer_size(&self) -> usize {
        self.mandatory(CL_DEVICE_PRINTF_BUFFER_SIZE, "CL_DEVICE_PRINTF_BUFFER_SIZE")
    }

    /// The highest supported OpenCL C version.
    pub fn opencl_c_version(&self) -> ClResult<String> {
        self.get(CL_DEVICE_OPENCL_C_VERSION)
    }

    /// Semicolon separated list of built-in kernel names.
    pub fn built_in_kernels(&self) -> ClResult<String> {
        self.get(CL_DEVICE_BUILT_IN_KERNELS)
    }

    /// Fails on devices without double precision support.
    pub fn double_fp_config(&self) -> ClResult<FpConfig> {
        self.get(CL_DEVICE_DOUBLE_FP_CONFIG)
    }

    /// Fails on devices without half precision support.
    pub fn half_fp_config(&self) -> ClResult<FpConfig> {
        self.get(CL_DEVICE_HALF_FP_CONFIG)
    }

    /// The native ISA vector width, 0 if the type is not supported.
    pub fn native_vector_width(&self, vector: VectorType) -> ClResult<u32> {
        self.get(vector.native_param())
    }

    /// The preferred vector width, 0 if the type is not supported.
    pub fn preferred_vector_width(&self, vector: VectorType) -> ClResult<u32> {
        self.get(vector.preferred_param())
    }

    /// 0 if the device cannot be partitioned.
    pub fn partition_max_sub_devices(&self) -> ClResult<u32> {
        self.get(CL_DEVICE_PARTITION_MAX_SUB_DEVICES)
    }

    /// The domains usable with [`Device::partition_by_affinity_domain`].
    pub fn partition_affinity_domain(&self) -> ClResult<AffinityDomain> {
        self.get(CL_DEVICE_PARTITION_AFFINITY_DOMAIN)
    }

    /// The property list this sub-device was partitioned with, empty for root devices.
    pub fn partition_type(&self) -> ClResult<Vec<ClProperty>> {
        self.get(CL_DEVICE_PARTITION_TYPE)
    }

    /// The device this sub-device was partitioned from, `None` for root devices.
    pub fn parent_device(&self) -> ClResult<Option<Device>> {
        let parent: RawDevice = self.get(CL_DEVICE_PARENT_DEVICE)?;
        if parent.is_null() {
            Ok(None)
        } else {
            Ok(Some(Device::new(parent, self.runtime.clone())))
        }
    }

    /// The native reference count, always 1 for root devices.
    pub fn reference_count(&self) -> ClResult<u32> {
        self.get(CL_DEVICE_REFERENCE_COUNT)
    }

    /// The command queue properties supported by the device.
    pub fn queue_properties(&self) -> ClResult<QueueProperties> {
        self.get(CL_DEVICE_QUEUE_PROPERTIES)
    }

    /// The size of the global memory cache in bytes.
    pub fn global_mem_cache_size(&self) -> ClResult<u64> {
        self.get(CL_DEVICE_GLOBAL_MEM_CACHE_SIZE)
    }

    /// Whether global memory is cached, and for which accesses.
    pub fn global_mem_cache_type(&self) -> ClResult<MemCacheType> {
        self.get(CL_DEVICE_GLOBAL_MEM_CACHE_TYPE)
    }

    /// Whether the device has dedicated local memory.
    pub fn local_mem_type(&self) -> ClResult<LocalMemType> {
        self.get(CL_DEVICE_LOCAL_MEM_TYPE)
    }

    /// The largest `__constant` buffer in bytes.
    pub fn max_constant_buffer_size(&self) -> ClResult<u64> {
        self.get(CL_DEVICE_MAX_CONSTANT_BUFFER_SIZE)
    }

    /// In MHz.
    pub fn max_clock_frequency(&self) -> ClResult<u32> {
        self.get(CL_DEVICE_MAX_CLOCK_FREQUENCY)
    }

    /// Whether programs can be compiled for the device.
    pub fn compiler_available(&self) -> ClResult<bool> {
        self.get(CL_DEVICE_COMPILER_AVAILABLE)
    }

    /// Whether programs can be linked for the device.
    pub fn linker_available(&self) -> ClResult<bool> {
        self.get(CL_DEVICE_LINKER_AVAILABLE)
    }

    /// Whether images are supported.
    pub fn image_support(&self) -> ClResult<bool> {
        self.get(CL_DEVICE_IMAGE_SUPPORT)
    }

    /// Whether the device memory corrects errors.
    pub fn error_correction_support(&self) -> ClResult<bool> {
        self.get(CL_DEVICE_ERROR_CORRECTION_SUPPORT)
    }

    /// Whether device and host share the memory.
    pub fn host_unified_memory(&self) -> ClResult<bool> {
        self.get(CL_DEVICE_HOST_UNIFIED_MEMORY)
    }

    /// Whether the device prefers the user to synchronize with graphics APIs.
    pub fn preferred_interop_user_sync(&self) -> ClResult<bool> {
        self.get(CL_DEVICE_PREFERRED_INTEROP_USER_SYNC)
    }

    /// The resolution of the device timer in nanoseconds.
    pub fn profiling_timer_resolution(&self) -> ClResult<usize> {
        self.get(CL_DEVICE_PROFILING_TIMER_RESOLUTION)
    }

    /// Splits the device into as many sub-devices as possible with `compute_units` compute
    /// units each.
    pub fn partition_equally(&self, compute_units: u32) -> ClResult<Vec<SubDevice>> {
        if compute_units == 0 {
            return Err(ClError::InvalidValue);
        }
        self.partition(&[CL_DEVICE_PARTITION_EQUALLY, compute_units as ClProperty, 0])
    }

    /// Splits the device into one sub-device per entry, with that many compute units.
    ///
    /// A zero count would end the native list early, so it is rejected.
    pub fn partition_by_counts(&self, counts: &[u32]) -> ClResult<Vec<SubDevice>> {
        if counts.is_empty() || counts.contains(&0) {
            return Err(ClError::InvalidValue);
        }
        let mut properties = Vec::with_capacity(counts.len() + 3);
        properties.push(CL_DEVICE_PARTITION_BY_COUNTS);
        properties.extend(counts.iter().map(|&count| count as ClProperty));
        properties.push(CL_DEVICE_PARTITION_BY_COUNTS_LIST_END);
        properties.push(0);
        self.partition(&properties)
    }

    /// Splits the device along a single affinity domain, e.g. into its NUMA nodes.
    pub fn partition_by_affinity_domain(&self, domain: AffinityDomain) -> ClResult<Vec<SubDevice>> {
        if domain.bits().count_ones() != 1 {
            return Err(ClError::InvalidValue);
        }
        self.partition(&[
            CL_DEVICE_PARTITION_BY_AFFINITY_DOMAIN,
            domain.bits() as ClProperty,
            0,
        ])
    }

    fn partition(&self, properties: &[ClProperty]) -> ClResult<Vec<SubDevice>> {
        self.with(|driver, id| self.partition_raw(driver, id, properties))
    }

    fn partition_raw(
        &self,
        driver: &dyn Driver,
        id: RawDevice,
        properties: &[ClProperty],
    ) -> ClResult<Vec<SubDevice>> {
        // The number of sub-devices isn't known in advance, ask for it first.
        let mut count: ClUint = 0;
        check(unsafe {
            driver.create_sub_devices(
                id,
                properties.as_ptr(),
                0,
                ptr::null_mut(),
                &mut count,
            )
        })?;
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ids = vec![RawDevice::null(); count as usize];
        let mut returned: ClUint = 0;
        check(unsafe {
            driver.create_sub_devices(
                id,
                properties.as_ptr(),
                count,
                ids.as_mut_ptr(),
                &mut returned,
            )
        })?;
        ids.truncate((returned as usize).min(count as usize));

        let has_null = ids.iter().any(RawDevice::is_null);
        let sub_devices: Vec<SubDevice> = ids
            .into_iter()
            .filter(|id| !id.is_null())
            .map(|id| SubDevice::wrap(id, self.runtime.clone()))
            .collect();
        if has_null {
            return Err(ClError::Unknown(CL_SUCCESS));
        }
        debug!(
            "Partitioned device {:?} into {} sub-devices.",
            id,
            sub_devices.len()
        );
        Ok(sub_devices)
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.runtime.same(&other.runtime)
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match &self.owner {
            Some(owner) => {
                owner.try_with(|driver, id| query_device::<String>(driver, id, CL_DEVICE_NAME))
            }
            None => Some(query_device::<String>(
                self.runtime.driver().as_ref(),
                self.id,
                CL_DEVICE_NAME,
            )),
        };
        let name: String = match name {
            Some(Ok(info)) => info.into_value(),
            Some(Err(_)) => String::new(),
            None => "<released>".to_string(),
        };
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("name", &name)
            .finish()
    }
}

/// A device created by partitioning, which owns a native reference.
///
/// Cloning retains the native sub-device. The references are given back once the wrapper and
/// every [`Device`] view of it are dropped.
pub struct SubDevice {
    device: Device,
    handle: Arc<Handle<DeviceKind>>,
}

impl SubDevice {
    fn wrap(id: RawDevice, runtime: Runtime) -> Self {
        let handle = Handle::wrap(runtime.driver().clone(), id);
        Self::with_handle(id, runtime, Arc::new(handle))
    }

    fn with_handle(id: RawDevice, runtime: Runtime, handle: Arc<Handle<DeviceKind>>) -> Self {
        Self {
            device: Device {
                id,
                runtime,
                owner: Some(handle.clone()),
            },
            handle,
        }
    }

    /// The raw device id.
    pub fn id(&self) -> RawDevice {
        self.device.id
    }

    /// The device view, for attribute queries and further partitioning.
    ///
    /// Cloning the view shares this wrapper's native references, see [`Device`].
    pub fn as_device(&self) -> &Device {
        &self.device
    }

    /// Adds a native reference owned by this wrapper.
    pub fn retain(&self) -> ClResult<()> {
        self.handle.retain()
    }

    /// Gives back a native reference, see [`crate::Context::release`]. Once all are given back,
    /// the [`Device`] views of this wrapper panic on use.
    pub fn release(&self) -> ClResult<()> {
        self.handle.release()
    }

    /// Whether this wrapper gave back all of its references.
    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Creates an independent wrapper with its own native reference.
    pub fn try_clone(&self) -> ClResult<Self> {
        let handle = self.handle.try_clone()?;
        Ok(Self::with_handle(
            self.device.id,
            self.device.runtime.clone(),
            Arc::new(handle),
        ))
    }
}

impl Clone for SubDevice {
    /// # Panics
    ///
    /// If the sub-device was released or can't be retained.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(sub_device) => sub_device,
            Err(error) => panic!("Cannot clone sub-device {:?}: {}", self.handle, error),
        }
    }
}

impl fmt::Debug for SubDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubDevice")
            .field("handle", &self.handle)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mock::MockDriver;
    use std::sync::Arc;

    fn setup() -> (Arc<MockDriver>, Device, Device) {
        let mock = Arc::new(MockDriver::with_default_devices());
        let runtime = Runtime::new(mock.clone());
        let mut devices = runtime.devices(None, DeviceType::ALL).unwrap();
        let gpu = devices.remove(1);
        let cpu = devices.remove(0);
        (mock, cpu, gpu)
    }

    #[test]
    fn test_mandatory_attributes() {
        let (_, cpu, gpu) = setup();
        assert_eq!(cpu.name(), "Mock CPU");
        assert_eq!(gpu.name(), "Mock GPU");
        assert_eq!(cpu.vendor(), "Mock Vendor");
        assert_eq!(cpu.version(), "OpenCL 1.2 Mock");
        assert_eq!(cpu.driver_version(), "1.0.0");
        assert_eq!(cpu.profile(), "FULL_PROFILE");
        assert_eq!(cpu.extensions(), "cl_khr_fp64 cl_khr_icd");
        assert_eq!(cpu.platform().name().unwrap(), "Mock Platform");
        assert_eq!(cpu.device_type(), DeviceType::CPU);
        assert_eq!(gpu.device_type(), DeviceType::GPU);
        assert_eq!(cpu.vendor_id(), 0xffff);
        assert_eq!(cpu.max_compute_units(), 8);
        assert_eq!(gpu.max_compute_units(), 32);
        assert_eq!(cpu.max_work_item_dimensions(), 3);
        assert_eq!(cpu.max_work_item_sizes(), vec![1024, 1024, 64]);
        assert_eq!(cpu.max_work_group_size(), 1024);
        assert_eq!(cpu.global_mem_size(), 4 << 30);
        assert_eq!(cpu.local_mem_size(), 32 << 10);
        assert_eq!(cpu.max_mem_alloc_size(), 1 << 30);
        assert_eq!(cpu.address_bits(), 64);
        assert!(cpu.available());
        assert!(cpu.endian_little());
        assert!(cpu.single_fp_config().contains(FpConfig::FMA));
        assert_eq!(
            cpu.execution_capabilities(),
            ExecCapabilities::KERNEL | ExecCapabilities::NATIVE_KERNEL
        );
        assert_eq!(gpu.execution_capabilities(), ExecCapabilities::KERNEL);
    }

    #[test]
    fn test_memory_and_image_limits() {
        let (_, cpu, gpu) = setup();
        assert_eq!(cpu.max_read_image_args(), 128);
        assert_eq!(cpu.max_write_image_args(), 64);
        assert_eq!(cpu.image2d_max_width(), 16384);
        assert_eq!(cpu.image2d_max_height(), 16384);
        assert_eq!(cpu.image3d_max_width(), 2048);
        assert_eq!(cpu.image3d_max_height(), 2048);
        assert_eq!(cpu.image3d_max_depth(), 2048);
        assert_eq!(cpu.image_max_buffer_size(), 1 << 16);
        assert_eq!(cpu.image_max_array_size(), 2048);
        assert_eq!(cpu.max_samplers(), 16);
        assert_eq!(cpu.max_parameter_size(), 1024);
        assert_eq!(cpu.mem_base_addr_align(), 1024);
        assert_eq!(cpu.min_data_type_align_size(), 128);
        assert_eq!(cpu.global_mem_cacheline_size(), 64);
        assert_eq!(gpu.global_mem_cacheline_size(), 128);
        assert_eq!(cpu.max_constant_args(), 8);
        assert_eq!(cpu.printf_buffer_size(), 1 << 20);
    }

    #[test]
    #[should_panic(expected = "CL_DEVICE_PRINTF_BUFFER_SIZE")]
    fn test_missing_limit_panics() {
        let (mock, cpu, _) = setup();
        mock.remove_device_info(cpu.id(), CL_DEVICE_PRINTF_BUFFER_SIZE);
        cpu.printf_buffer_size();
    }

    #[test]
    fn test_optional_attributes() {
        let (_, cpu, gpu) = setup();
        assert_eq!(cpu.opencl_c_version().unwrap(), "OpenCL C 1.2");
        assert_eq!(cpu.built_in_kernels().unwrap(), "");
        assert!(cpu.double_fp_config().unwrap().contains(FpConfig::DENORM));
        assert_eq!(cpu.half_fp_config(), Err(ClError::InvalidValue));
        assert_eq!(cpu.native_vector_width(VectorType::Char).unwrap(), 16);
        assert_eq!(cpu.preferred_vector_width(VectorType::Double).unwrap(), 2);
        assert_eq!(cpu.native_vector_width(VectorType::Half).unwrap(), 0);
        assert_eq!(cpu.partition_max_sub_devices().unwrap(), 8);
        assert_eq!(gpu.partition_max_sub_devices().unwrap(), 0);
        assert!(cpu
            .partition_affinity_domain()
            .unwrap()
            .contains(AffinityDomain::NUMA));
        assert_eq!(cpu.parent_device().unwrap(), None);
        assert_eq!(cpu.reference_count().unwrap(), 1);
        assert_eq!(cpu.queue_properties().unwrap(), QueueProperties::all());
        assert_eq!(cpu.global_mem_cache_size().unwrap(), 256 << 10);
        assert_eq!(cpu.global_mem_cache_type().unwrap(), MemCacheType::ReadWrite);
        assert_eq!(cpu.local_mem_type().unwrap(), LocalMemType::Global);
        assert_eq!(gpu.local_mem_type().unwrap(), LocalMemType::Local);
        assert_eq!(cpu.max_constant_buffer_size().unwrap(), 64 << 10);
        assert_eq!(cpu.max_clock_frequency().unwrap(), 1500);
        assert!(cpu.compiler_available().unwrap());
        assert!(cpu.linker_available().unwrap());
        assert!(!cpu.image_support().unwrap());
        assert!(!cpu.error_correction_support().unwrap());
        assert!(cpu.host_unified_memory().unwrap());
        assert!(!gpu.host_unified_memory().unwrap());
        assert!(cpu.preferred_interop_user_sync().unwrap());
        assert_eq!(cpu.profiling_timer_resolution().unwrap(), 1);
    }

    #[test]
    fn test_generic_info() {
        let (_, cpu, _) = setup();
        let name = cpu.info::<String>(CL_DEVICE_NAME).unwrap();
        assert_eq!(name.value, "Mock CPU");
        assert_eq!(name.size, 9);
        assert_eq!(
            cpu.info::<u32>(CL_DEVICE_NAME),
            Err(ClError::InvalidValue),
            "A string is not a scalar."
        );
    }

    #[test]
    #[should_panic(expected = "CL_DEVICE_NAME")]
    fn test_mandatory_attribute_failure_panics() {
        let (mock, cpu, _) = setup();
        mock.remove_device_info(cpu.id(), CL_DEVICE_NAME);
        cpu.name();
    }

    #[test]
    #[should_panic(expected = "CL_DEVICE_MAX_COMPUTE_UNITS")]
    fn test_mandatory_attribute_with_bad_size_panics() {
        let (mock, cpu, _) = setup();
        mock.set_device_info(cpu.id(), CL_DEVICE_MAX_COMPUTE_UNITS, vec![8, 0]);
        cpu.max_compute_units();
    }

    #[test]
    fn test_display() {
        assert_eq!((DeviceType::CPU | DeviceType::GPU).to_string(), "CPU|GPU");
        assert_eq!(DeviceType::ACCELERATOR.to_string(), "Accelerator");
        assert_eq!(DeviceType::empty().to_string(), "None");
        assert_eq!(
            (FpConfig::DENORM | FpConfig::INF_NAN | FpConfig::FMA).to_string(),
            "Denorm|InfNaN|FMA"
        );
        assert_eq!(ExecCapabilities::KERNEL.to_string(), "Kernel");
        assert_eq!(AffinityDomain::NUMA.to_string(), "NUMA");
    }

    #[test]
    fn test_selectors() {
        assert!(DeviceType::GPU.is_selector());
        assert!(DeviceType::ALL.is_selector());
        assert!(DeviceType::DEFAULT.is_selector());
        assert!(!DeviceType::CUSTOM.is_selector());
        assert!(!(DeviceType::CPU | DeviceType::GPU).is_selector());
        assert!(!DeviceType::empty().is_selector());
    }

    #[test]
    fn test_partition_equally() {
        let (mock, cpu, _) = setup();
        let sub_devices = cpu.partition_equally(2).unwrap();
        assert_eq!(sub_devices.len(), 4);
        for sub_device in &sub_devices {
            let device = sub_device.as_device();
            assert_eq!(device.max_compute_units(), 2);
            assert_eq!(device.parent_device().unwrap(), Some(cpu.clone()));
            assert_eq!(device.reference_count().unwrap(), 1);
            assert_eq!(
                device.partition_type().unwrap(),
                vec![CL_DEVICE_PARTITION_EQUALLY, 2, 0]
            );
        }
        assert_eq!(mock.live_objects(), 4);
        drop(sub_devices);
        assert_eq!(mock.live_objects(), 0);
        assert_eq!(mock.counters().destroyed_devices, 4);
    }

    #[test]
    fn test_partition_by_counts() {
        let (_, cpu, _) = setup();
        let sub_devices = cpu.partition_by_counts(&[3, 5]).unwrap();
        let units: Vec<u32> = sub_devices
            .iter()
            .map(|sub_device| sub_device.as_device().max_compute_units())
            .collect();
        assert_eq!(units, vec![3, 5]);
        assert_eq!(
            sub_devices[0].as_device().partition_type().unwrap(),
            vec![
                CL_DEVICE_PARTITION_BY_COUNTS,
                3,
                5,
                CL_DEVICE_PARTITION_BY_COUNTS_LIST_END,
                0
            ]
        );

        assert_eq!(
            cpu.partition_by_counts(&[6, 6]).err(),
            Some(ClError::InvalidDevicePartitionCount)
        );
    }

    #[test]
    fn test_partition_by_affinity_domain() {
        let (_, cpu, _) = setup();
        let sub_devices = cpu.partition_by_affinity_domain(AffinityDomain::NUMA).unwrap();
        assert_eq!(sub_devices.len(), 2);
        assert_eq!(
            sub_devices[1].as_device().partition_type().unwrap(),
            vec![
                CL_DEVICE_PARTITION_BY_AFFINITY_DOMAIN,
                AffinityDomain::NUMA.bits() as ClProperty,
                0
            ]
        );

        assert_eq!(
            cpu.partition_by_affinity_domain(AffinityDomain::L1_CACHE).err(),
            Some(ClError::InvalidValue),
            "Not supported by the device."
        );
        assert_eq!(
            cpu.partition_by_affinity_domain(AffinityDomain::NUMA | AffinityDomain::L2_CACHE)
                .err(),
            Some(ClError::InvalidValue),
            "Only a single domain."
        );
    }

    #[test]
    fn test_invalid_partitions_are_rejected_early() {
        let (mock, cpu, gpu) = setup();
        assert_eq!(cpu.partition_equally(0).err(), Some(ClError::InvalidValue));
        assert_eq!(cpu.partition_by_counts(&[]).err(), Some(ClError::InvalidValue));
        assert_eq!(
            cpu.partition_by_counts(&[3, 0, 5]).err(),
            Some(ClError::InvalidValue),
            "A zero count is not a list terminator."
        );
        assert_eq!(cpu.partition_by_counts(&[0]).err(), Some(ClError::InvalidValue));
        assert_eq!(
            gpu.partition_equally(4).err(),
            Some(ClError::DevicePartitionFailed)
        );
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_sub_device_lifecycle() {
        let (mock, cpu, _) = setup();
        let mut sub_devices = cpu.partition_equally(4).unwrap();
        let sub_device = sub_devices.remove(0);
        drop(sub_devices);
        let id = sub_device.id();
        assert_eq!(mock.device_refs(id), Some(1));

        let other = sub_device.clone();
        assert_eq!(mock.device_refs(id), Some(2));
        assert_eq!(other.as_device().reference_count().unwrap(), 2);

        sub_device.retain().unwrap();
        assert_eq!(mock.device_refs(id), Some(3));
        sub_device.release().unwrap();
        sub_device.release().unwrap();
        assert!(sub_device.is_released());
        sub_device.release().unwrap();
        assert_eq!(sub_device.retain(), Err(ClError::InvalidDevice));
        assert_eq!(mock.device_refs(id), Some(1));

        drop(other);
        assert_eq!(mock.device_refs(id), None);
        drop(sub_device);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_nested_partitioning() {
        let (mock, cpu, _) = setup();
        let halves = cpu.partition_equally(4).unwrap();
        let quarters = halves[0].as_device().partition_equally(2).unwrap();
        assert_eq!(quarters.len(), 2);
        assert_eq!(
            quarters[0].as_device().parent_device().unwrap(),
            Some(halves[0].as_device().clone())
        );
        drop(halves);
        // The quarters outlive their parent.
        assert_eq!(mock.live_objects(), 2);
        drop(quarters);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    #[should_panic(expected = "Use of a released sub-device")]
    fn test_released_sub_device_panics() {
        let (_, cpu, _) = setup();
        let sub_device = cpu.partition_equally(8).unwrap().remove(0);
        sub_device.release().unwrap();
        sub_device.as_device().name();
    }

    #[test]
    fn test_device_view_outlives_sub_device() {
        let (mock, cpu, _) = setup();
        let sub_device = cpu.partition_equally(8).unwrap().remove(0);
        let id = sub_device.id();
        let view = sub_device.as_device().clone();
        drop(sub_device);

        assert_eq!(mock.live_objects(), 1, "The view keeps the sub-device alive.");
        assert_eq!(view.name(), "Mock CPU");
        assert_eq!(view.max_compute_units(), 8);
        assert_eq!(view.id(), id);
        drop(view);
        assert_eq!(mock.live_objects(), 0);
        assert_eq!(mock.counters().destroyed_devices, 1);
    }

    #[test]
    fn test_device_view_of_released_sub_device() {
        let (mock, cpu, _) = setup();
        let sub_device = cpu.partition_equally(8).unwrap().remove(0);
        let view = sub_device.as_device().clone();
        sub_device.release().unwrap();
        assert_eq!(mock.live_objects(), 0);
        assert!(format!("{:?}", view).contains("<released>"));

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| view.name()));
        let message = result.unwrap_err();
        assert_eq!(
            message.downcast_ref::<String>().map(String::as_str),
            Some("Use of a released sub-device.")
        );
        assert!(std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| view.id())).is_err());
        assert_eq!(mock.counters().destroyed_devices, 1);
    }
}
