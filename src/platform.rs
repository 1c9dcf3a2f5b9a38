//! Platforms and the [`Runtime`] entry point.

use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ptr;
use std::sync::Arc;

use log::debug;

use crate::config::Config;
use crate::context::{Context, ContextProperties};
use crate::device::{Device, DeviceType};
use crate::driver::{ClUint, Driver, RawDevice, RawPlatform};
use crate::error::{check, ClResult};
use crate::info::{query, Info, InfoType};

#[allow(missing_docs)]
pub const CL_PLATFORM_PROFILE: ClUint = 0x0900;
#[allow(missing_docs)]
pub const CL_PLATFORM_VERSION: ClUint = 0x0901;
#[allow(missing_docs)]
pub const CL_PLATFORM_NAME: ClUint = 0x0902;
#[allow(missing_docs)]
pub const CL_PLATFORM_VENDOR: ClUint = 0x0903;
#[allow(missing_docs)]
pub const CL_PLATFORM_EXTENSIONS: ClUint = 0x0904;

/// Access to an OpenCL implementation.
///
/// All objects created through a runtime keep it alive. Cloning is cheap.
#[derive(Clone)]
pub struct Runtime {
    driver: Arc<dyn Driver>,
    config: Config,
}

impl Runtime {
    /// Uses the given implementation, e.g. a [`crate::mock::MockDriver`].
    pub fn new(driver: Arc<dyn Driver>) -> Self {
        Self::with_config(driver, *Config::get())
    }

    /// Uses the given implementation with custom limits instead of the process configuration.
    pub fn with_config(driver: Arc<dyn Driver>, config: Config) -> Self {
        Self { driver, config }
    }

    /// Uses the system OpenCL library.
    #[cfg(feature = "opencl")]
    pub fn native() -> Self {
        Self::new(Arc::new(crate::native::OpenClDriver))
    }

    /// The underlying implementation.
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub(crate) fn same(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.driver, &other.driver)
    }

    /// The limits applied to enumerations.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Lists the available platforms, at most [`Config::max_platforms`].
    pub fn platforms(&self) -> ClResult<Vec<Platform>> {
        let mut count: ClUint = 0;
        check(unsafe { self.driver.get_platform_ids(0, ptr::null_mut(), &mut count) })?;
        let count = (count as usize).min(self.config.max_platforms);
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ids = vec![RawPlatform::null(); count];
        let mut returned: ClUint = 0;
        check(unsafe {
            self.driver
                .get_platform_ids(count as ClUint, ids.as_mut_ptr(), &mut returned)
        })?;
        ids.truncate((returned as usize).min(count));
        debug!("Found {} OpenCL platforms.", ids.len());

        Ok(ids
            .into_iter()
            .map(|id| Platform::new(id, self.clone()))
            .collect())
    }

    /// Lists the devices of the given type, at most [`Config::max_devices`].
    ///
    /// Without a platform the implementation picks its default one.
    pub fn devices(
        &self,
        platform: Option<&Platform>,
        device_type: DeviceType,
    ) -> ClResult<Vec<Device>> {
        let platform = platform.map_or(RawPlatform::null(), |platform| platform.id);
        let mut count: ClUint = 0;
        check(unsafe {
            self.driver
                .get_device_ids(platform, device_type.bits(), 0, ptr::null_mut(), &mut count)
        })?;
        let count = (count as usize).min(self.config.max_devices);
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut ids = vec![RawDevice::null(); count];
        let mut returned: ClUint = 0;
        check(unsafe {
            self.driver.get_device_ids(
                platform,
                device_type.bits(),
                count as ClUint,
                ids.as_mut_ptr(),
                &mut returned,
            )
        })?;
        ids.truncate((returned as usize).min(count));
        debug!("Found {} OpenCL devices of type {}.", ids.len(), device_type);

        Ok(ids
            .into_iter()
            .map(|id| Device::new(id, self.clone()))
            .collect())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Runtime({:p})", Arc::as_ptr(&self.driver) as *const c_void)
    }
}

/// An OpenCL platform, i.e. an installed implementation.
#[derive(Clone)]
pub struct Platform {
    id: RawPlatform,
    runtime: Runtime,
}

impl Platform {
    pub(crate) fn new(id: RawPlatform, runtime: Runtime) -> Self {
        Self { id, runtime }
    }

    /// The raw platform id.
    pub fn id(&self) -> RawPlatform {
        self.id
    }

    /// The runtime the platform was found by.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Queries any platform attribute.
    pub fn info<T: InfoType>(&self, param: ClUint) -> ClResult<Info<T>> {
        query(|size, value, size_ret| unsafe {
            self.runtime
                .driver
                .get_platform_info(self.id, param, size, value, size_ret)
        })
    }

    fn string(&self, param: ClUint) -> ClResult<String> {
        self.info::<String>(param).map(Info::into_value)
    }

    /// The platform name.
    pub fn name(&self) -> ClResult<String> {
        self.string(CL_PLATFORM_NAME)
    }

    /// The platform vendor.
    pub fn vendor(&self) -> ClResult<String> {
        self.string(CL_PLATFORM_VENDOR)
    }

    /// The supported OpenCL version, e.g. `OpenCL 1.2 CUDA 12.0.89`.
    pub fn version(&self) -> ClResult<String> {
        self.string(CL_PLATFORM_VERSION)
    }

    /// Either `FULL_PROFILE` or `EMBEDDED_PROFILE`.
    pub fn profile(&self) -> ClResult<String> {
        self.string(CL_PLATFORM_PROFILE)
    }

    /// Space separated list of extension names.
    pub fn extensions(&self) -> ClResult<String> {
        self.string(CL_PLATFORM_EXTENSIONS)
    }

    /// Lists the devices of this platform.
    pub fn devices(&self, device_type: DeviceType) -> ClResult<Vec<Device>> {
        self.runtime.devices(Some(self), device_type)
    }

    fn properties(&self) -> ContextProperties {
        ContextProperties::new().platform(self)
    }

    /// Creates a context for the given devices of this platform.
    pub fn create_context(&self, devices: &[Device]) -> ClResult<Context> {
        Context::with_properties(devices, self.properties(), None)
    }

    /// Creates a context for all devices of this platform that match the type.
    ///
    /// Only [`DeviceType::CPU`], [`DeviceType::GPU`], [`DeviceType::ACCELERATOR`],
    /// [`DeviceType::DEFAULT`] and [`DeviceType::ALL`] are accepted.
    pub fn create_context_from_type(&self, device_type: DeviceType) -> ClResult<Context> {
        Context::from_type(&self.runtime, device_type, self.properties(), None)
    }
}

impl PartialEq for Platform {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.runtime.same(&other.runtime)
    }
}

impl Eq for Platform {}

impl Hash for Platform {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Platform")
            .field("id", &self.id)
            .field("name", &self.name().unwrap_or_default())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::ClError;
    use crate::mock::MockDriver;
    use temp_env::with_var;

    fn runtime() -> (Arc<MockDriver>, Runtime) {
        let mock = Arc::new(MockDriver::with_default_devices());
        (mock.clone(), Runtime::new(mock))
    }

    #[test]
    fn test_platforms() {
        let (_, runtime) = runtime();
        let platforms = runtime.platforms().unwrap();
        assert_eq!(platforms.len(), 1);
        let platform = &platforms[0];
        assert_eq!(platform.name().unwrap(), "Mock Platform");
        assert_eq!(platform.vendor().unwrap(), "Mock Vendor");
        assert_eq!(platform.version().unwrap(), "OpenCL 1.2 Mock");
        assert_eq!(platform.profile().unwrap(), "FULL_PROFILE");
        assert_eq!(platform.extensions().unwrap(), "cl_khr_icd");
        assert_eq!(platform.info::<String>(CL_PLATFORM_NAME).unwrap().size, 14);
    }

    #[test]
    fn test_platforms_of_different_runtimes_differ() {
        let (_, first) = runtime();
        let (_, second) = runtime();
        let platform = first.platforms().unwrap().remove(0);
        let other = second.platforms().unwrap().remove(0);
        assert_eq!(platform.id(), other.id(), "Both mocks hand out the same ids.");
        assert_ne!(platform, other);
        assert_eq!(platform, first.clone().platforms().unwrap().remove(0));
        assert_eq!(platform, platform.clone());
    }

    #[test]
    fn test_no_platforms() {
        let runtime = Runtime::new(Arc::new(MockDriver::new()));
        assert_eq!(runtime.platforms(), Err(ClError::Unknown(-1001)));
    }

    #[test]
    fn test_devices() {
        let (mock, runtime) = runtime();
        let all = runtime.devices(None, DeviceType::ALL).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id(), mock.default_device());

        let gpus = runtime.devices(None, DeviceType::GPU).unwrap();
        assert_eq!(gpus.len(), 1);
        assert_eq!(gpus[0].name(), "Mock GPU");

        let platform = &runtime.platforms().unwrap()[0];
        assert_eq!(platform.devices(DeviceType::CPU).unwrap()[0].name(), "Mock CPU");
        assert_eq!(
            runtime.devices(None, DeviceType::ACCELERATOR),
            Err(ClError::DeviceNotFound)
        );
    }

    #[test]
    fn test_device_limit() {
        let (mock, runtime) = runtime();
        let platform = runtime.platforms().unwrap().remove(0);
        for index in 0..4 {
            mock.add_device(platform.id(), DeviceType::GPU, &format!("GPU {}", index), 4);
        }
        assert_eq!(runtime.devices(None, DeviceType::ALL).unwrap().len(), 6);

        let limited = with_var(crate::config::MAX_DEVICES_ENV, Some("3"), || {
            Runtime::with_config(mock.clone(), Config::from_env())
        });
        let devices = limited.devices(None, DeviceType::ALL).unwrap();
        assert_eq!(devices.len(), 3);
        assert_eq!(devices[0].id(), mock.default_device());
    }

    #[test]
    fn test_platform_contexts() {
        let (mock, runtime) = runtime();
        let platform = runtime.platforms().unwrap().remove(0);

        let devices = platform.devices(DeviceType::ALL).unwrap();
        let context = platform.create_context(&devices).unwrap();
        assert_eq!(context.devices(), &devices[..]);
        assert_eq!(context.properties().platform_id(), Some(platform.id()));

        let gpus = platform.create_context_from_type(DeviceType::GPU).unwrap();
        assert_eq!(gpus.devices().len(), 1);
        assert_eq!(gpus.devices()[0].name(), "Mock GPU");

        assert_eq!(
            platform.create_context_from_type(DeviceType::CUSTOM).err(),
            Some(ClError::InvalidDevice)
        );

        drop(context);
        drop(gpus);
        assert_eq!(mock.live_objects(), 0);
    }
}
