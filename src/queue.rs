//! OpenCL command queues.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bitflags::bitflags;
use log::debug;

use crate::context::Context;
use crate::device::{bitfield, Device};
use crate::driver::{ClUint, RawContext, RawDevice, RawQueue};
use crate::error::{check, ClError, ClResult, CL_SUCCESS};
use crate::handle::{ContextKind, Handle, QueueKind};
use crate::info::{query, Info, InfoType};
use crate::notify::Registration;
use crate::platform::Runtime;

#[allow(missing_docs)]
pub const CL_QUEUE_CONTEXT: ClUint = 0x1090;
#[allow(missing_docs)]
pub const CL_QUEUE_DEVICE: ClUint = 0x1091;
#[allow(missing_docs)]
pub const CL_QUEUE_REFERENCE_COUNT: ClUint = 0x1092;
#[allow(missing_docs)]
pub const CL_QUEUE_PROPERTIES: ClUint = 0x1093;

bitflags! {
    /// `cl_command_queue_properties`
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct QueueProperties: u64 {
        /// Commands may run in any order.
        const OUT_OF_ORDER_EXEC_MODE_ENABLE = 1 << 0;
        /// Commands record timing information.
        const PROFILING_ENABLE = 1 << 1;
    }
}

bitfield!(QueueProperties, "None", [
    OUT_OF_ORDER_EXEC_MODE_ENABLE => "OutOfOrder",
    PROFILING_ENABLE => "Profiling",
]);

/// A command queue for one device of a [`Context`].
///
/// Ownership works like for [`Context`]. The queue also keeps the error callback of its context
/// registered, as the native queue keeps the native context alive.
pub struct CommandQueue {
    handle: Handle<QueueKind>,
    runtime: Runtime,
    device: Device,
    registration: Mutex<Option<Arc<Registration>>>,
}

impl CommandQueue {
    pub(crate) fn create(
        context: &Context,
        device: &Device,
        properties: QueueProperties,
    ) -> ClResult<Self> {
        if !context.devices().contains(device) {
            return Err(ClError::InvalidDevice);
        }
        let mut status = CL_SUCCESS;
        let raw = context.handle().with(|driver, raw_context| unsafe {
            driver.create_command_queue(raw_context, device.id(), properties.bits(), &mut status)
        });
        let handle = Handle::from_create(context.runtime().driver().clone(), raw, status)?;
        debug!(
            "Created command queue {:?} for device {:?} with {}.",
            handle,
            device.id(),
            properties
        );
        Ok(Self {
            handle,
            runtime: context.runtime().clone(),
            device: device.clone(),
            registration: Mutex::new(context.registration()),
        })
    }

    fn lock_registration(&self) -> MutexGuard<'_, Option<Arc<Registration>>> {
        self.registration
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The raw command queue.
    ///
    /// # Panics
    ///
    /// If the queue was released.
    pub fn id(&self) -> RawQueue {
        self.handle.with(|_, raw| raw)
    }

    /// The device the queue was created for.
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Submits all enqueued commands to the device, without waiting for them.
    ///
    /// # Panics
    ///
    /// If the queue was released.
    pub fn flush(&self) -> ClResult<()> {
        self.handle.with(|driver, raw| check(unsafe { driver.flush(raw) }))
    }

    /// Blocks until all enqueued commands completed.
    ///
    /// The queue can't be released by another thread while this waits.
    ///
    /// # Panics
    ///
    /// If the queue was released.
    pub fn finish(&self) -> ClResult<()> {
        self.handle.with(|driver, raw| check(unsafe { driver.finish(raw) }))
    }

    /// Adds a native reference owned by this wrapper.
    pub fn retain(&self) -> ClResult<()> {
        self.handle.retain()
    }

    /// Gives back a native reference owned by this wrapper, see [`Context::release`].
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
            device: self.device.clone(),
            registration: Mutex::new(self.lock_registration().clone()),
        })
    }

    /// Queries any command queue attribute.
    ///
    /// # Panics
    ///
    /// If the queue was released.
    pub fn info<T: InfoType>(&self, param: ClUint) -> ClResult<Info<T>> {
        self.handle.with(|driver, raw| {
            query(|size, value, size_ret| unsafe {
                driver.get_command_queue_info(raw, param, size, value, size_ret)
            })
        })
    }

    fn get<T: InfoType>(&self, param: ClUint) -> ClResult<T> {
        self.info(param).map(Info::into_value)
    }

    /// The context of the queue, as a new wrapper owning its own reference.
    pub fn context(&self) -> ClResult<Context> {
        let raw: RawContext = self.get(CL_QUEUE_CONTEXT)?;
        let handle = Handle::<ContextKind>::retained(self.runtime.driver().clone(), raw)?;
        Context::from_retained(
            handle,
            self.runtime.clone(),
            self.lock_registration().clone(),
        )
    }

    /// The device as reported by the implementation.
    pub fn device_reported(&self) -> ClResult<Device> {
        let raw: RawDevice = self.get(CL_QUEUE_DEVICE)?;
        Ok(Device::new(raw, self.runtime.clone()))
    }

    /// The native reference count.
    pub fn reference_count(&self) -> ClResult<u32> {
        self.get(CL_QUEUE_REFERENCE_COUNT)
    }

    /// The properties the queue was created with.
    pub fn properties(&self) -> ClResult<QueueProperties> {
        self.get(CL_QUEUE_PROPERTIES)
    }
}

impl Clone for CommandQueue {
    /// # Panics
    ///
    /// If the queue was released or can't be retained.
    fn clone(&self) -> Self {
        match self.try_clone() {
            Ok(queue) => queue,
            Err(error) => panic!("Cannot clone command queue {:?}: {}", self.handle, error),
        }
    }
}

impl fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandQueue")
            .field("handle", &self.handle)
            .field("device", &self.device)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::context::ContextProperties;
    use crate::device::DeviceType;
    use crate::mock::{MockDriver, QueueWork};
    use crate::notify::{is_registered, Notify};
    use std::thread;

    fn setup() -> (Arc<MockDriver>, Context) {
        let mock = Arc::new(MockDriver::with_default_devices());
        let runtime = Runtime::new(mock.clone());
        let devices = runtime.devices(None, DeviceType::ALL).unwrap();
        (mock, Context::new(&devices).unwrap())
    }

    #[test]
    fn test_end_to_end() {
        let mock = Arc::new(MockDriver::with_default_devices());
        let runtime = Runtime::new(mock.clone());

        let devices = runtime.devices(None, DeviceType::ALL).unwrap();
        assert!(!devices.is_empty());
        let context = Context::new(&devices).unwrap();
        let queue = context
            .create_command_queue(&devices[0], QueueProperties::PROFILING_ENABLE)
            .unwrap();
        assert_eq!(queue.properties().unwrap(), QueueProperties::PROFILING_ENABLE);
        let id = queue.id();

        mock.enqueue(id, 3);
        queue.flush().unwrap();
        assert_eq!(
            mock.queue_work(id),
            Some(QueueWork {
                enqueued: 3,
                submitted: 3,
                completed: 0
            }),
            "A flush submits without waiting."
        );
        queue.finish().unwrap();
        assert_eq!(mock.queue_work(id).unwrap().completed, 3);

        queue.release().unwrap();
        context.release().unwrap();
        assert_eq!(mock.live_objects(), 0);
        let counters = mock.counters();
        assert_eq!(counters.flushes, 1);
        assert_eq!(counters.finishes, 1);
        assert_eq!(counters.destroyed_queues, 1);
        assert_eq!(counters.destroyed_contexts, 1);
    }

    #[test]
    fn test_info() {
        let (_, context) = setup();
        let device = context.devices()[1].clone();
        let queue = context
            .create_command_queue(&device, QueueProperties::all())
            .unwrap();
        assert_eq!(queue.device(), &device);
        assert_eq!(queue.device_reported().unwrap(), device);
        assert_eq!(queue.reference_count().unwrap(), 1);
        assert_eq!(queue.properties().unwrap(), QueueProperties::all());
        assert_eq!(context.reference_count().unwrap(), 2, "The queue retains its context.");

        let reported = queue.context().unwrap();
        assert_eq!(reported.id(), context.id());
        assert_eq!(reported.devices(), context.devices());
        assert_eq!(context.reference_count().unwrap(), 3);
        drop(reported);
        assert_eq!(context.reference_count().unwrap(), 2);
    }

    #[test]
    fn test_device_outside_of_context() {
        let mock = Arc::new(MockDriver::with_default_devices());
        let runtime = Runtime::new(mock.clone());
        let devices = runtime.devices(None, DeviceType::ALL).unwrap();
        let context = Context::new(&devices[..1]).unwrap();
        assert_eq!(
            context
                .create_command_queue(&devices[1], QueueProperties::empty())
                .err(),
            Some(ClError::InvalidDevice)
        );
        assert_eq!(mock.counters().destroyed_queues, 0);
        assert_eq!(mock.live_objects(), 1);
    }

    #[test]
    fn test_release() {
        let (mock, context) = setup();
        let queue = context
            .create_command_queue(&context.devices()[0], QueueProperties::empty())
            .unwrap();
        let id = queue.id();
        let other = queue.clone();
        assert_eq!(mock.queue_refs(id), Some(2));

        queue.release().unwrap();
        queue.release().unwrap();
        assert!(queue.is_released());
        assert_eq!(queue.retain(), Err(ClError::InvalidCommandQueue));
        assert_eq!(mock.queue_refs(id), Some(1));
        other.finish().unwrap();

        drop(other);
        assert_eq!(mock.queue_refs(id), None);
        drop(queue);
        drop(context);
        assert_eq!(mock.live_objects(), 0);
    }

    #[test]
    #[should_panic(expected = "Use of a released command queue")]
    fn test_flush_after_release_panics() {
        let (_, context) = setup();
        let queue = context
            .create_command_queue(&context.devices()[0], QueueProperties::empty())
            .unwrap();
        queue.release().unwrap();
        let _ = queue.flush();
    }

    #[test]
    fn test_queue_keeps_callback_registered() {
        let mock = Arc::new(MockDriver::with_default_devices());
        let runtime = Runtime::new(mock.clone());
        let devices = runtime.devices(None, DeviceType::GPU).unwrap();
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let notify = Notify::new(move |notification| {
            sink.lock().unwrap().push(notification.errinfo().to_string());
        });
        let context = Context::with_notify(&devices, ContextProperties::new(), notify).unwrap();
        let token = context.notify_token().unwrap();
        let context_id = context.id();
        let queue = context
            .create_command_queue(&devices[0], QueueProperties::empty())
            .unwrap();

        // The native context lives on through the queue, and so does the callback.
        drop(context);
        assert!(is_registered(token));
        assert!(mock.raise_context_error(context_id, "late failure", &[]));

        // A context obtained from the queue shares the callback.
        let context = queue.context().unwrap();
        assert_eq!(context.notify_token(), Some(token));
        drop(context);

        drop(queue);
        assert!(!is_registered(token));
        assert_eq!(mock.live_objects(), 0);
        assert_eq!(*calls.lock().unwrap(), vec!["late failure".to_string()]);
    }

    #[test]
    fn test_finish_while_releasing() {
        let (mock, context) = setup();
        let queue = context
            .create_command_queue(&context.devices()[0], QueueProperties::empty())
            .unwrap();
        let id = queue.id();
        queue.retain().unwrap();
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| queue.finish().unwrap());
            }
            // Gives back one of two references, the queue stays usable.
            scope.spawn(|| queue.release().unwrap());
        });
        assert_eq!(mock.queue_refs(id), Some(1));
        assert_eq!(mock.counters().finishes, 8);
    }

    #[test]
    fn test_display() {
        assert_eq!(QueueProperties::empty().to_string(), "None");
        assert_eq!(QueueProperties::all().to_string(), "OutOfOrder|Profiling");
    }
}
