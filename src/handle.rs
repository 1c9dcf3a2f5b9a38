//! Ownership of native reference-counted objects.
//!
//! A [`Handle`] owns a number of native references to a single object. It is created owning
//! exactly one, every [`Handle::retain`] adds one and every [`Handle::release`] gives one back.
//! Once no reference is owned anymore the handle is *released*: further releases are no-ops,
//! retains fail and any other use is a bug that panics. Dropping a handle releases whatever it
//! still owns.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};

use crate::driver::{Driver, RawContext, RawDevice, RawQueue};
use crate::error::{check, ClError, ClResult, Status, CL_SUCCESS};

/// The native object types that are reference counted.
pub(crate) trait HandleKind: 'static {
    type Raw: Copy + fmt::Debug + Send + Sync;

    /// Used in log messages and panics.
    const NAME: &'static str;

    /// The error the native side reports for an invalid object of this kind.
    const INVALID: ClError;

    fn is_null(raw: &Self::Raw) -> bool;

    /// # Safety
    ///
    /// `raw` must be a live object of this kind.
    unsafe fn retain(driver: &dyn Driver, raw: Self::Raw) -> Status;

    /// # Safety
    ///
    /// The caller must own the reference it gives back.
    unsafe fn release(driver: &dyn Driver, raw: Self::Raw) -> Status;
}

pub(crate) struct ContextKind;

impl HandleKind for ContextKind {
    type Raw = RawContext;
    const NAME: &'static str = "context";
    const INVALID: ClError = ClError::InvalidContext;

    fn is_null(raw: &RawContext) -> bool {
        raw.is_null()
    }

    unsafe fn retain(driver: &dyn Driver, raw: RawContext) -> Status {
        driver.retain_context(raw)
    }

    unsafe fn release(driver: &dyn Driver, raw: RawContext) -> Status {
        driver.release_context(raw)
    }
}

pub(crate) struct QueueKind;

impl HandleKind for QueueKind {
    type Raw = RawQueue;
    const NAME: &'static str = "command queue";
    const INVALID: ClError = ClError::InvalidCommandQueue;

    fn is_null(raw: &RawQueue) -> bool {
        raw.is_null()
    }

    unsafe fn retain(driver: &dyn Driver, raw: RawQueue) -> Status {
        driver.retain_command_queue(raw)
    }

    unsafe fn release(driver: &dyn Driver, raw: RawQueue) -> Status {
        driver.release_command_queue(raw)
    }
}

/// Only sub-devices are reference counted, root devices are owned by the platform.
pub(crate) struct DeviceKind;

impl HandleKind for DeviceKind {
    type Raw = RawDevice;
    const NAME: &'static str = "sub-device";
    const INVALID: ClError = ClError::InvalidDevice;

    fn is_null(raw: &RawDevice) -> bool {
        raw.is_null()
    }

    unsafe fn retain(driver: &dyn Driver, raw: RawDevice) -> Status {
        driver.retain_device(raw)
    }

    unsafe fn release(driver: &dyn Driver, raw: RawDevice) -> Status {
        driver.release_device(raw)
    }
}

struct Owned<R> {
    raw: R,
    /// Number of native references this handle is responsible for, always at least one.
    refs: AtomicU32,
}

/// Owner of native references to one object.
pub(crate) struct Handle<K: HandleKind> {
    driver: Arc<dyn Driver>,
    /// `None` once released.
    state: RwLock<Option<Owned<K::Raw>>>,
    _kind: PhantomData<K>,
}

impl<K: HandleKind> Handle<K> {
    /// Takes ownership of a reference the caller already holds, e.g. a freshly created object.
    pub(crate) fn wrap(driver: Arc<dyn Driver>, raw: K::Raw) -> Self {
        debug!("Wrapping {} {:?}.", K::NAME, raw);
        Self {
            driver,
            state: RwLock::new(Some(Owned {
                raw,
                refs: AtomicU32::new(1),
            })),
            _kind: PhantomData,
        }
    }

    /// Takes the result of a native create call.
    ///
    /// The object is wrapped before the status is looked at, so that it can never leak. A null
    /// object together with a success status is reported as [`ClError::Unknown`].
    pub(crate) fn from_create(
        driver: Arc<dyn Driver>,
        raw: K::Raw,
        status: Status,
    ) -> ClResult<Self> {
        if K::is_null(&raw) {
            check(status)?;
            return Err(ClError::Unknown(CL_SUCCESS));
        }
        let handle = Self::wrap(driver, raw);
        check(status)?;
        Ok(handle)
    }

    /// Retains an object obtained from somewhere else, e.g. from an info query, and takes
    /// ownership of that new reference.
    pub(crate) fn retained(driver: Arc<dyn Driver>, raw: K::Raw) -> ClResult<Self> {
        if K::is_null(&raw) {
            return Err(K::INVALID);
        }
        // The object is kept alive by whoever handed out `raw`.
        check(unsafe { K::retain(driver.as_ref(), raw) })?;
        Ok(Self::wrap(driver, raw))
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Owned<K::Raw>>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Option<Owned<K::Raw>>> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the raw object. The handle cannot be released while `f` runs.
    ///
    /// # Panics
    ///
    /// If the handle was already released.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&dyn Driver, K::Raw) -> R) -> R {
        match self.try_with(f) {
            Some(result) => result,
            None => panic!("Use of a released {}.", K::NAME),
        }
    }

    /// Like [`Handle::with`], but returns `None` if the handle was already released.
    pub(crate) fn try_with<R>(&self, f: impl FnOnce(&dyn Driver, K::Raw) -> R) -> Option<R> {
        let state = self.read();
        state.as_ref().map(|owned| f(self.driver.as_ref(), owned.raw))
    }

    /// The raw object, or `None` if the handle was released.
    pub(crate) fn raw(&self) -> Option<K::Raw> {
        self.read().as_ref().map(|owned| owned.raw)
    }

    pub(crate) fn is_released(&self) -> bool {
        self.read().is_none()
    }

    /// Number of native references this handle currently owns.
    #[cfg(test)]
    pub(crate) fn owned_refs(&self) -> u32 {
        self.read()
            .as_ref()
            .map_or(0, |owned| owned.refs.load(Ordering::SeqCst))
    }

    /// Adds a native reference owned by this handle.
    pub(crate) fn retain(&self) -> ClResult<()> {
        let state = self.read();
        let owned = match state.as_ref() {
            Some(owned) => owned,
            None => {
                warn!("Cannot retain a released {}.", K::NAME);
                return Err(K::INVALID);
            }
        };
        // The read lock keeps the object from being released meanwhile.
        check(unsafe { K::retain(self.driver.as_ref(), owned.raw) })?;
        let refs = owned.refs.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Retained {} {:?}, owning {} references.", K::NAME, owned.raw, refs);
        Ok(())
    }

    /// Gives back one native reference. Releasing an already released handle does nothing.
    ///
    /// The reference is considered given back even if the native call fails, it is never
    /// released twice.
    pub(crate) fn release(&self) -> ClResult<()> {
        let mut state = self.write();
        let (raw, remaining) = match state.as_ref() {
            Some(owned) => (owned.raw, owned.refs.fetch_sub(1, Ordering::SeqCst) - 1),
            None => return Ok(()),
        };
        if remaining == 0 {
            *state = None;
        }
        // One owned reference was just taken out of the count.
        let status = unsafe { K::release(self.driver.as_ref(), raw) };
        debug!("Released {} {:?}, owning {} references.", K::NAME, raw, remaining);
        check(status)
    }

    /// Creates an independent handle owning a new native reference to the same object.
    pub(crate) fn try_clone(&self) -> ClResult<Self> {
        let raw = match self.raw() {
            Some(raw) => raw,
            None => {
                warn!("Cannot clone a released {}.", K::NAME);
                return Err(K::INVALID);
            }
        };
        Self::retained(self.driver.clone(), raw)
    }
}

impl<K: HandleKind> Drop for Handle<K> {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(owned) = state {
            for _ in 0..owned.refs.into_inner() {
                let status = unsafe { K::release(self.driver.as_ref(), owned.raw) };
                if let Err(error) = check(status) {
                    warn!("Failed to release {} {:?}: {}", K::NAME, owned.raw, error);
                }
            }
            debug!("Dropped {} {:?}.", K::NAME, owned.raw);
        }
    }
}

impl<K: HandleKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.raw() {
            Some(raw) => write!(f, "{:?}", raw),
            None => write!(f, "<released {}>", K::NAME),
        }
    }
}
