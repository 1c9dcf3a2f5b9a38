//! Delivery of native context error notifications to Rust closures.
//!
//! Native code only ever sees a plain integer token as `user_data`. The closure and its payload
//! live in a process-wide registry keyed by that token, and [`notify_trampoline`] looks them up
//! whenever the driver reports an error, from whatever thread the driver chooses.

use std::any::Any;
use std::collections::HashMap;
use std::ffi::{c_void, CStr};
use std::fmt;
use std::os::raw::c_char;
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use log::{debug, warn};
use once_cell::sync::Lazy;

/// User payload attached to a [`Notify`].
pub type UserData = Arc<dyn Any + Send + Sync>;

type Callback = dyn Fn(&Notification<'_>) + Send + Sync;

static REGISTRY: Lazy<RwLock<HashMap<u64, Arc<Notify>>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

// Zero is never handed out, so a null `user_data` can't match a registration.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// An error reported by the driver for a context.
pub struct Notification<'a> {
    errinfo: String,
    private_info: *const c_void,
    cb: usize,
    user_data: Option<&'a UserData>,
}

impl Notification<'_> {
    /// The human readable error description.
    pub fn errinfo(&self) -> &str {
        &self.errinfo
    }

    /// Pointer to implementation specific binary data, only valid during the callback.
    pub fn private_info_ptr(&self) -> *const c_void {
        self.private_info
    }

    /// Length in bytes of the implementation specific binary data.
    pub fn private_info_len(&self) -> usize {
        self.cb
    }

    /// The implementation specific binary data.
    ///
    /// # Safety
    ///
    /// The driver must have passed a pointer valid for [`Self::private_info_len`] bytes, which
    /// the OpenCL API guarantees but cannot be checked.
    pub unsafe fn private_info(&self) -> &[u8] {
        if self.private_info.is_null() || self.cb == 0 {
            return &[];
        }
        slice::from_raw_parts(self.private_info.cast::<u8>(), self.cb)
    }

    /// The payload that was registered together with the callback.
    pub fn user_data(&self) -> Option<&UserData> {
        self.user_data
    }

    /// The payload, if it is of type `T`.
    pub fn user_data_as<T: Any>(&self) -> Option<&T> {
        self.user_data.and_then(|data| data.downcast_ref::<T>())
    }
}

impl fmt::Debug for Notification<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notification")
            .field("errinfo", &self.errinfo)
            .field("private_info_len", &self.cb)
            .field("has_user_data", &self.user_data.is_some())
            .finish()
    }
}

/// A context error callback together with its optional payload.
///
/// ```
/// use rust_cl_handles::Notify;
///
/// let notify = Notify::new(|notification| {
///     let id = notification.user_data_as::<u32>();
///     eprintln!("context {:?} failed: {}", id, notification.errinfo());
/// })
/// .with_user_data(42u32);
/// ```
#[derive(Clone)]
pub struct Notify {
    callback: Arc<Callback>,
    user_data: Option<UserData>,
}

impl Notify {
    /// Wraps a closure. It may be called from any thread, also concurrently.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Notification<'_>) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            user_data: None,
        }
    }

    /// Attaches a payload that is handed to the callback on every invocation.
    pub fn with_user_data<T: Any + Send + Sync>(self, user_data: T) -> Self {
        self.with_shared_user_data(Arc::new(user_data))
    }

    /// Attaches an already shared payload.
    pub fn with_shared_user_data(mut self, user_data: UserData) -> Self {
        self.user_data = Some(user_data);
        self
    }

    fn call(&self, errinfo: String, private_info: *const c_void, cb: usize) {
        let notification = Notification {
            errinfo,
            private_info,
            cb,
            user_data: self.user_data.as_ref(),
        };
        (self.callback)(&notification);
    }
}

impl fmt::Debug for Notify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notify")
            .field("has_user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Keeps a callback registered for as long as it lives.
///
/// It is shared between all wrappers that may still cause native notifications: a context,
/// its clones and its command queues.
#[derive(Debug)]
pub(crate) struct Registration {
    token: u64,
}

impl Registration {
    pub(crate) fn register(notify: Notify) -> Arc<Self> {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        REGISTRY
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token, Arc::new(notify));
        debug!("Registered context callback {}.", token);
        Arc::new(Self { token })
    }

    #[cfg(test)]
    pub(crate) fn token(&self) -> u64 {
        self.token
    }

    /// The value passed to native code as `user_data`.
    pub(crate) fn user_data(&self) -> *mut c_void {
        self.token as usize as *mut c_void
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        REGISTRY
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.token);
        debug!("Unregistered context callback {}.", self.token);
    }
}

/// Number of callbacks currently registered in this process.
pub fn registered_callbacks() -> usize {
    REGISTRY.read().unwrap_or_else(PoisonError::into_inner).len()
}

#[cfg(test)]
pub(crate) fn is_registered(token: u64) -> bool {
    REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&token)
}

/// The `pfn_notify` handed to `clCreateContext`, `user_data` is the registration token.
pub(crate) unsafe extern "C" fn notify_trampoline(
    errinfo: *const c_char,
    private_info: *const c_void,
    cb: usize,
    user_data: *mut c_void,
) {
    let token = user_data as usize as u64;
    // The lock is not held while the callback runs, it may create or drop contexts itself.
    let notify = REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&token)
        .cloned();
    let notify = match notify {
        Some(notify) => notify,
        None => {
            warn!("Notification for unknown callback {} ignored.", token);
            return;
        }
    };

    let errinfo = if errinfo.is_null() {
        String::new()
    } else {
        CStr::from_ptr(errinfo).to_string_lossy().into_owned()
    };

    // Unwinding into the driver is undefined behaviour.
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        notify.call(errinfo, private_info, cb)
    }));
    if result.is_err() {
        warn!("Context callback {} panicked.", token);
    }
}
