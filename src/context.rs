//! OpenCL contexts.

use std::fmt;
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::device::{Device, DeviceType};
use crate::driver::{ClProperty, ClUint, NotifyFn, RawContext, RawDevice, RawPlatform};
use crate::error::{ClError, ClResult, CL_SUCCESS};
use crate::handle::{ContextKind, Handle};
use crate::info::{query, Info, InfoType};
use crate::notify::{notify_trampoline, Notify, Registration};
use crate::platform::{Platform, Runtime};
use crate::queue::{CommandQueue, QueueProperties};

#[allow(missing_docs)]
pub const CL_CONTEXT_REFERENCE_COUNT: ClUint = 0x1080;
#[allow(missing_docs)]
pub const CL_CONTEXT_DEVICES: ClUint = 0x1081;
#[allow(missing_docs)]
pub const CL_CONTEXT_PROPERTIES: ClUint = 0x1082;
#[allow(missing_docs)]
pub const CL_CONTEXT_NUM_DEVICES: ClUint = 0x1083;
#[allow(missing_docs)]
pub const CL_CONTEXT_D3D10_PREFER_SHARED_RESOURCES_KHR: ClUint = 0x402C;
#[allow(missing_docs)]
pub const CL_CONTEXT_D3D11_PREFER_SHARED_RESOURCES_KHR: ClUint = 0x402D;

/// Property key selecting the platform of a context.
pub const CL_CONTEXT_PLATFORM: ClProperty = 0x1084;
/// Property key for user-managed synchronization with graphics APIs.
pub const CL_CONTEXT_INTEROP_USER_SYNC: ClProperty = 0x1085;

/// The properties a context is created with.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ContextProperties {
    platform: Option<RawPlatform>,
    interop_user_sync: Option<bool>,
}

impl ContextProperties {
    /// No properties, the implementation chooses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selects the platform.
    pub fn platform(mut self, platform: &Platform) -> Self {
        self.platform = Some(platform.id());
        self
    }

    /// Whether the user takes care of synchronization with graphics APIs.
    pub fn interop_user_sync(mut self, enabled: bool) -> Self {
        self.interop_user_sync = Some(enabled);
        self
    }

    /// The selected platform, if any.
    pub fn platform_id(&self) -> Option<RawPlatform> {
        self.platform
    }

    /// The interop synchronization setting, if set.
    pub fn is_interop_user_sync(&self) -> Option<bool> {
        self.interop_user_sync
    }

    /// The zero-terminated key/value list, empty if no property is set.
    pub fn to_raw(&self) -> Vec<ClProperty> {
        let mut list = Vec::new();
        if let Some(platform) = self.platform {
            list.extend([CL_CONTEXT_PLATFORM, platform.addr() as ClProperty]);
        }
        if let Some(enabled) = self.interop_user_sync {
            list.extend([CL_CONTEXT_INTEROP_USER_SYNC, enabled as ClProperty]);
        }
        if !list.is_empty() {
            list.push(0);
        }
        list
    }

    /// Parses a key/value list as reported by the implementation. Unknown keys are skipped.
    pub fn from_raw(list: &[ClProperty]) -> ClResult<Self> {
        let mut properties = Self::default();
        for pair in list.chunks(2) {
            match *pair {
                [0] | [0, _] => break,
                [CL_CONTEXT_PLATFORM, value] => {
                    properties.platform = Some(RawPlatform(value as *mut _));
                }
                [CL_CONTEXT_INTEROP_USER_SYNC, value] => {
                    properties.interop_user_sync = Some(value != 0);
                }
                [key, _] => debug!("Skipping unknown context property {:#x}.", key),
                // A key without a value.
                _ => return Err(ClError::InvalidValue),
            }
        }
        Ok(properties)
    }
}

#[derive(Clone, Copy)]
enum Selection<'a> {
    Devices(&'a [Device]),
    Type(DeviceType),
}

/// An OpenCL context.
///
/// The wrapper owns native references: [`Context::retain`] adds one, [`Context::release`] gives
/// one back, dropping gives back all that are left. Cloning retains the native context and shares
/// the error callback, which stays registered until the last context or command queue using it
/// is gone.
pub struct Context {
    // Released before the callback is unregistered.
    handle: Handle<ContextKind>,
    runtime: Runtime,
    devices: Vec<Device>,
    properties: ContextProperties,
    registration: Mutex<Option<Arc<Registration>>>,
}

impl Context {
    /// Creates a context for the given devices.
    pub fn new(devices: &[Device]) -> ClResult<Self> {
        Self::with_properties(devices, ContextProperties::new(), None)
    }

    /// Creates a context for the given devices that reports errors to `notify`.
    ///
    /// The callback may be called from any thread, at any time until the context and all its
    /// command queues are released.
    pub fn with_notify(
        devices: &[Device],
        properties: ContextProperties,
        notify: Notify,
    ) -> ClResult<Self> {
        Self::with_properties(devices, properties, Some(notify))
    }

    /// Creates a context for the given devices.
    ///
    /// All devices must belong to the same runtime.
    pub fn with_properties(
        devices: &[Device],
        properties: ContextProperties,
        notify: Option<Notify>,
    ) -> ClResult<Self> {
        let runtime = match devices.first() {
            Some(device) => device.runtime().clone(),
            None => return Err(ClError::InvalidValue),
        };
        if devices.iter().any(|device| !device.runtime().same(&runtime)) {
            return Err(ClError::InvalidDevice);
        }
        Self::create(&runtime, Selection::Devices(devices), properties, notify)
    }

    /// Creates a context for all devices of a type.
    ///
    /// Only [`DeviceType::CPU`], [`DeviceType::GPU`], [`DeviceType::ACCELERATOR`],
    /// [`DeviceType::DEFAULT`] and [`DeviceType::ALL`] are accepted.
    pub fn from_type(
        runtime: &Runtime,
        device_type: DeviceType,
        properties: ContextProperties,
        notify: Option<Notify>,
    ) -> ClResult<Self> {
        if !device_type.is_selector() {
            warn!("Cannot create a context for device type {}.", device_type);
            return Err(ClError::InvalidDevice);
        }
        Self::create(runtime, Selection::Type(device_type), properties, notify)
    }

    fn create(
        runtime: &Runtime,
        selection: Selection<'_>,
        properties: ContextProperties,
        notify: Option<Notify>,
    ) -> ClResult<Self> {
        let raw_properties = properties.to_raw();
        let properties_ptr = if raw_properties.is_empty() {
            ptr::null()
        } else {
            raw_properties.as_ptr()
        };
        let registration = notify.map(Registration::register);
        let (pfn_notify, user_data) = match &registration {
            Some(registration) => (
                Some(notify_trampoline as NotifyFn),
                registration.user_data(),
            ),
            None => (None, ptr::null_mut()),
        };

        let driver = runtime.driver();
        let mut status = CL_SUCCESS;
        let raw = match selection {
            Selection::Devices(devices) => {
                let ids: Vec<RawDevice> = devices.iter().map(Device::id).collect();
                unsafe {
                    driver.create_context(
                        properties_ptr,
                        ids.len() as ClUint,
                        ids.as_ptr(),
                        pfn_notify,
                        user_data,
                        &mut status,
                    )
                }
            }
            Selection::Type(device_type) => unsafe {
                driver.create_context_from_type(
                    properties_ptr,
                    device_type.bits(),
                    pfn_notify,
                    user_data,
                    &mut status,
                )
            },
        };
        let handle = Handle::from_create(driver.clone(), raw, status)?;

        let mut context = Self {
            handle,
            runtime: runtime.clone(),
            devices: Vec::new(),
            properties,
            registration: Mutex::new(registration),
        };
        context.devices = match selection {
            Selection::Devices(devices) => devices.to_vec(),
            Selection::Type(_) => {
                // Dropping `context` on error releases the native context.
                let devices = context.devices_reported()?;
                if devices.is_empty() {
                    return Err(ClError::Unknown(CL_SUCCESS));
                }
                devices
            }
        };
        debug!(
            "Created context {:?} with {} devices.",
            context.handle,
            context.devices.len()
        );
        Ok(context)
    }

    /// Wraps a context that was already retained, e.g. the one of a command queue.
    pub(crate) fn from_retained(
        handle: Handle<ContextKind>,
        runtime: Runtime,
        registration: Option<Arc<Registration>>,
    ) -> ClResult<Self> {
        let mut context = Self {
            handle,
            runtime,
            devices: Vec::new(),
            properties: ContextProperties::default(),
            registration: Mutex::new(registration),
        };
        context.devices = context.devices_reported()?;
        context.properties = context.properties_reported()?;
        Ok(context)
    }

    fn lock_registration(&self) -> MutexGuard<'_, Option<Arc<Registration>>> {
        self.registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registration(&self) -> Option<Arc<Registration>> {
        self.lock_registration().clone()
    }

    pub(crate) fn handle(&self) -> &Handle<ContextKind> {
        &self.handle
    }

    #[cfg(test)]
    pub(crate) fn notify_token(&self) -> Option<u64> {
        self.lock_registration()
            .as_ref()
            .map(|registration| registration.token())
    }

    /// The raw context.
    ///
    /// # Panics
    ///
    /// If the context was released.
    pub fn id(&self) -> RawContext {
        self.handle.with(|_, raw| raw)
    }

    /// The runtime the context was created with.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// The devices of the context, as known at creation.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// The properties the context was created with.
    pub fn properties(&self) -> &ContextProperties {
        &self.properties
    }

    /// Adds a native reference owned by this wrapper.
    pub fn retain(&self) -> ClResult<()> {
        self.handle.retain()
    }

    /// Gives back a native reference owned by this wrapper.
    ///
    /// Once all are given back the wrapper is released, further calls do nothing and any other
    /// use panics.
    pub fn release(&self) -> ClResult<()> {
        let result = self.handle.release();
        if self.handle.is_released() {
            self.lock_registration().take();
        }
        result
    }

    /// Whether this wrapper gave back all of its references.
    pub fn is_released(&self) -> bool {
        self.handle.is_released()
    }

    /// Creates an independent wrapper with its own native reference.
    pub fn try_clone(&self) -> ClResult<Self> {
        Ok(Self {
            handle: self.handle.try_clone()?,
            runtime: self.runtime.clone(),
            devices: self.devices.clone(),
            properties: self.properties,
            registration: Mutex::new(self.registration()),
        })
    }

    /// Queries any context attribute.
    ///
    /// # Panics
    ///
    /// If the context was released.
    pub fn info<T: InfoType>(&self, param: ClUint) -> ClResult<Info<T>> {
        self.handle.with(|driver, raw| {
            query(|size, value, size_ret| unsafe {
                driver.get_context_info(raw, param, size, value, size_ret)
            })
        })
    }

    fn get<T: InfoType>(&self, param: ClUint) -> ClResult<T> {
        self.info(param).map(Info::into_value)
    }

    /// The native reference count, including references held by command queues.
    pub fn reference_count(&self) -> ClResult<u32> {
        self.get(CL_CONTEXT_REFERENCE_COUNT)
    }

    /// The number of devices in the context.
    pub fn num_devices(&self) -> ClResult<u32> {
        self.get(CL_CONTEXT_NUM_DEVICES)
    }

    /// The devices as currently reported by the implementation.
    pub fn devices_reported(&self) -> ClResult<Vec<Device>> {
        let ids: Vec<RawDevice> = self.get(CL_CONTEXT_DEVICES)?;
        Ok(ids
            .into_iter()
            .map(|id| Device::new(id, self.runtime.clone()))
            .collect())
    }

    /// The properties as currently reported by the implementation.
    pub fn properties_reported(&self) -> ClResult<ContextProperties> {
        let list: Vec<ClProperty> = self.get(CL_CONTEXT_PROPERTIES)?;
        ContextProperties::from_raw(&list)
    }

    /// Only available with the `cl_khr_d3d10_sharing` extension.
    pub fn d3d10_prefer_shared_resources(&self) -> ClResult<bool> {
        self.get(CL_CONTEXT_D3D10_PREFER_SHARED_RESOURCES_KHR)
    }

    /// Only available with the `cl_khr_d3d11_sharing` extension.
    pub fn d3d11_prefer_shared_resources(&self) -> ClResult<bool> {
        self.get(CL_CONTEXT_D3D11_PREFER_SHARED_RESOURCES_KHR)
    }

    /// Creates a command queue for one of the devices of this context.
    pub fn create_command_queue(
        &self,
        device: &Device,
        properties: QueueProperties,
    ) -> ClResult<CommandQueue> {
        CommandQueue::create(self, device, properties)
    }
}

impl Clone for Context {
    /// # Panics
    ///
    /// If the context was released or can't be retained.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(context) => context,
            Err(error) => panic!("Cannot clone context {:?}: {}", self.handle, error),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("handle", &self.handle)
            .field("devices", &self.devices)
            .field("properties", &self.properties)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::CL_OUT_OF_RESOURCES;
    use crate::mock::MockDriver;
    use crate::notify::is_registered;
    use std::sync::Arc;
    use std::thread;

    fn setup() -> (Arc<MockDriver>, Runtime, Vec<Device>) {
        let mock = Arc::new(MockDriver::with_default_devices());
        let runtime = Runtime::new(mock.clone());
        let devices = runtime.devices(None, DeviceType::ALL).unwrap();
        (mock, runtime, devices)
    }

    #[test]
    fn test_new() {
        let (mock, _, devices) = setup();
        let context = Context::new(&devices).unwrap();
        assert_eq!(context.devices(), &devices[..]);
        assert_eq!(context.devices_reported().unwrap(), devices);
        assert_eq!(context.num_devices().unwrap(), 2);
        assert_eq!(context.reference_count().unwrap(), 1);
        assert_eq!(context.properties(), &ContextProperties::new());
        assert_eq!(context.properties_reported().unwrap(), ContextProperties::new());
        assert_eq!(context.notify_token(), None);
        assert_eq!(
            context.d3d10_prefer_shared_resources(),
            Err(ClError::InvalidValue)
        );

        let id = context.id();
        drop(context);
        assert_eq!(mock.context_refs(id), None);
    }

    #[test]
    fn test_invalid_device_lists() {
        let (mock, _, devices) = setup();
        assert_eq!(Context::new(&[]).err(), Some(ClError::InvalidValue));

        let other = Runtime::new(Arc::new(MockDriver::with_default_devices()));
        let mut mixed = other.devices(None, DeviceType::GPU).unwrap();
        mixed.push(devices[0].clone());
        assert_eq!(Context::new(&mixed).err(), Some(ClError::InvalidDevice));
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_properties() {
        let (_, runtime, devices) = setup();
        let platform = runtime.platforms().unwrap().remove(0);
        let properties = ContextProperties::new()
            .platform(&platform)
            .interop_user_sync(true);
        assert_eq!(
            properties.to_raw(),
            vec![
                CL_CONTEXT_PLATFORM,
                platform.id().addr() as ClProperty,
                CL_CONTEXT_INTEROP_USER_SYNC,
                1,
                0
            ]
        );
        assert_eq!(ContextProperties::from_raw(&properties.to_raw()), Ok(properties));

        let context = Context::with_properties(&devices, properties, None).unwrap();
        assert_eq!(context.properties_reported().unwrap(), properties);
        assert_eq!(context.properties().platform_id(), Some(platform.id()));
        assert_eq!(context.properties().is_interop_user_sync(), Some(true));
    }

    #[test]
    fn test_properties_from_raw() {
        assert_eq!(ContextProperties::from_raw(&[]), Ok(ContextProperties::new()));
        assert_eq!(ContextProperties::from_raw(&[0]), Ok(ContextProperties::new()));
        assert_eq!(
            ContextProperties::from_raw(&[0x9999, 5, CL_CONTEXT_INTEROP_USER_SYNC, 0, 0]),
            Ok(ContextProperties::new().interop_user_sync(false))
        );
        assert_eq!(
            ContextProperties::from_raw(&[CL_CONTEXT_INTEROP_USER_SYNC, 1, 0, 1234]),
            Ok(ContextProperties::new().interop_user_sync(true)),
            "Nothing after the terminator is read."
        );
        assert_eq!(
            ContextProperties::from_raw(&[CL_CONTEXT_INTEROP_USER_SYNC]),
            Err(ClError::InvalidValue)
        );
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mock, _, devices) = setup();
        let context = Context::new(&devices).unwrap();
        let id = context.id();
        context.retain().unwrap();
        assert_eq!(context.reference_count().unwrap(), 2);

        context.release().unwrap();
        assert!(!context.is_released());
        context.release().unwrap();
        assert!(context.is_released());
        assert_eq!(mock.context_refs(id), None);

        context.release().unwrap();
        assert_eq!(context.retain(), Err(ClError::InvalidContext));
        assert_eq!(mock.destroyed_contexts(), 1);
        drop(context);
        assert_eq!(mock.destroyed_contexts(), 1);
    }

    #[test]
    #[should_panic(expected = "Use of a released context")]
    fn test_query_after_release_panics() {
        let (_, _, devices) = setup();
        let context = Context::new(&devices).unwrap();
        context.release().unwrap();
        let _ = context.reference_count();
    }

    #[test]
    fn test_concurrent_release() {
        let (mock, _, devices) = setup();
        let context = Context::new(&devices).unwrap();
        let id = context.id();
        thread::scope(|scope| {
            for _ in 0..32 {
                scope.spawn(|| context.release().unwrap());
            }
        });
        assert!(context.is_released());
        assert_eq!(mock.context_refs(id), None);
        assert_eq!(mock.destroyed_contexts(), 1);
        assert_eq!(mock.release_calls(), 1);
    }

    #[test]
    fn test_clone() {
        let (mock, _, devices) = setup();
        let context = Context::new(&devices).unwrap();
        let id = context.id();
        let other = context.clone();
        assert_eq!(mock.context_refs(id), Some(2));
        assert_eq!(other.devices(), context.devices());

        context.release().unwrap();
        assert_eq!(other.reference_count().unwrap(), 1);
        drop(other);
        assert_eq!(mock.context_refs(id), None);
    }

    #[test]
    fn test_native_references_are_balanced() {
        let (mock, _, devices) = setup();
        let context = Context::new(&devices).unwrap();
        let clone = context.clone();
        clone.retain().unwrap();
        let queue = context
            .create_command_queue(&devices[0], QueueProperties::empty())
            .unwrap();
        let from_queue = queue.context().unwrap();
        queue.flush().unwrap();
        queue.finish().unwrap();
        context.release().unwrap();
        drop(from_queue);
        drop(queue);
        drop(clone);
        drop(context);

        let counters = mock.counters();
        // One context and one queue were created, each owns one reference from the start.
        assert_eq!(counters.releases, counters.retains + 2);
        assert_eq!(counters.destroyed_contexts, 1);
        assert_eq!(counters.destroyed_queues, 1);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_from_type() {
        let (mock, runtime, devices) = setup();
        let context =
            Context::from_type(&runtime, DeviceType::GPU, ContextProperties::new(), None).unwrap();
        assert_eq!(context.devices(), &devices[1..]);

        let all =
            Context::from_type(&runtime, DeviceType::ALL, ContextProperties::new(), None).unwrap();
        assert_eq!(all.devices(), &devices[..]);

        assert_eq!(
            Context::from_type(&runtime, DeviceType::ACCELERATOR, ContextProperties::new(), None)
                .err(),
            Some(ClError::DeviceNotFound)
        );
        assert_eq!(
            Context::from_type(
                &runtime,
                DeviceType::CPU | DeviceType::GPU,
                ContextProperties::new(),
                None
            )
            .err(),
            Some(ClError::InvalidDevice)
        );
        drop(context);
        drop(all);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_from_type_without_devices() {
        let (mock, runtime, _) = setup();
        mock.set_empty_type_contexts(true);
        let payload = Arc::new(());
        let result = Context::from_type(
            &runtime,
            DeviceType::GPU,
            ContextProperties::new(),
            Some(Notify::new(|_| {}).with_shared_user_data(payload.clone())),
        );
        assert_eq!(result.err(), Some(ClError::Unknown(0)));
        assert_eq!(mock.live_objects(), 0, "The native context was released.");
        assert_eq!(mock.destroyed_contexts(), 1);
        assert_eq!(Arc::strong_count(&payload), 1, "The callback was unregistered.");
    }

    #[test]
    fn test_from_type_device_query_fails() {
        let (mock, runtime, _) = setup();
        mock.fail_context_info(CL_CONTEXT_DEVICES, CL_OUT_OF_RESOURCES);
        let result = Context::from_type(&runtime, DeviceType::ALL, ContextProperties::new(), None);
        assert_eq!(result.err(), Some(ClError::OutOfResources));
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    fn test_notifications_carry_their_own_payload() {
        let (mock, _, devices) = setup();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let notify = |name: &'static str| {
            let seen = seen.clone();
            Notify::new(move |notification| {
                let payload = notification.user_data_as::<&str>().copied();
                let blob = unsafe { notification.private_info() }.to_vec();
                seen.lock()
                    .unwrap()
                    .push((payload, notification.errinfo().to_string(), blob));
            })
            .with_user_data(name)
        };
        let first =
            Context::with_notify(&devices[..1], ContextProperties::new(), notify("first")).unwrap();
        let second = Context::with_notify(&devices[1..], ContextProperties::new(), notify("second"))
            .unwrap();
        assert_ne!(first.notify_token(), second.notify_token());

        // Drivers call back from their own threads.
        let raiser = mock.clone();
        let (first_id, second_id) = (first.id(), second.id());
        thread::spawn(move || {
            assert!(raiser.raise_context_error(second_id, "out of memory", &[7, 7]));
            assert!(raiser.raise_context_error(first_id, "invalid kernel", &[1]));
        })
        .join()
        .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (Some("second"), "out of memory".to_string(), vec![7, 7]),
                (Some("first"), "invalid kernel".to_string(), vec![1]),
            ]
        );
    }

    #[test]
    fn test_callback_lives_as_long_as_the_context() {
        let (mock, _, devices) = setup();
        let calls = Arc::new(Mutex::new(0));
        let counter = calls.clone();
        let notify = Notify::new(move |_| *counter.lock().unwrap() += 1);
        let context = Context::with_notify(&devices, ContextProperties::new(), notify).unwrap();
        let token = context.notify_token().unwrap();
        let id = context.id();

        let clone = context.clone();
        assert_eq!(clone.notify_token(), Some(token), "Clones share the callback.");
        context.release().unwrap();
        assert!(is_registered(token));
        assert!(mock.raise_context_error(id, "still alive", &[]));
        assert_eq!(*calls.lock().unwrap(), 1);

        drop(clone);
        assert!(!is_registered(token));
        assert!(!mock.raise_context_error(id, "gone", &[]));
        assert_eq!(*calls.lock().unwrap(), 1);
        drop(context);
    }

    #[test]
    fn test_failed_creation_unregisters_callback() {
        let (mock, _, devices) = setup();
        let payload = Arc::new(());
        let notify = Notify::new(|_| {}).with_shared_user_data(payload.clone());
        let bogus = ContextProperties {
            platform: Some(RawPlatform(0x10 as *mut _)),
            interop_user_sync: None,
        };
        let result = Context::with_notify(&devices, bogus, notify);
        assert_eq!(result.err(), Some(ClError::InvalidPlatform));
        assert_eq!(Arc::strong_count(&payload), 1, "The registry let go of the callback.");
        assert_eq!(mock.live_objects(), 0);
    }
}
