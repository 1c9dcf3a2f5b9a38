//! The two-phase attribute query protocol shared by all `clGet*Info` functions.
//!
//! Every query first asks the driver for the size of the value (null destination buffer),
//! then fetches it into a zeroed buffer of exactly that size. The bytes are then decoded by an
//! [`InfoType`]: fixed-size scalars must match their width exactly, strings drop their NUL
//! terminator and arrays must be a whole multiple of their element width.

use std::ffi::c_void;
use std::mem;
use std::ptr;

use crate::driver::{ClBool, RawContext, RawDevice, RawPlatform, RawQueue};
use crate::error::{check, ClError, ClResult, Status};

/// A value decoded from an attribute query, together with the byte count the driver reported.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Info<T> {
    /// The decoded value.
    pub value: T,
    /// The size in bytes the driver reported for the attribute, including e.g. the NUL
    /// terminator of strings.
    pub size: usize,
}

impl<T> Info<T> {
    /// Returns the decoded value, dropping the size.
    pub fn into_value(self) -> T {
        self.value
    }
}

/// Types that can be decoded from the raw bytes of an attribute query.
pub trait InfoType: Sized {
    /// Decodes the complete value as returned by the driver.
    fn decode(bytes: &[u8]) -> ClResult<Self>;
}

/// Fixed-width values that can be used as scalars or as elements of an array attribute.
pub trait InfoElement: Copy {
    /// The width of one value in bytes.
    const WIDTH: usize;

    /// Decodes a single value from exactly [`Self::WIDTH`] native-endian bytes.
    fn from_ne_slice(bytes: &[u8]) -> Self;
}

macro_rules! int_element {
    ($($ty:ty),*) => {
        $(
            impl InfoElement for $ty {
                const WIDTH: usize = mem::size_of::<$ty>();

                fn from_ne_slice(bytes: &[u8]) -> Self {
                    let mut buf = [0u8; mem::size_of::<$ty>()];
                    buf.copy_from_slice(bytes);
                    <$ty>::from_ne_bytes(buf)
                }
            }
        )*
    };
}

int_element!(u32, u64, usize, isize);

macro_rules! handle_element {
    ($($ty:ident),*) => {
        $(
            impl InfoElement for $ty {
                const WIDTH: usize = mem::size_of::<usize>();

                fn from_ne_slice(bytes: &[u8]) -> Self {
                    $ty(usize::from_ne_slice(bytes) as *mut c_void)
                }
            }
        )*
    };
}

handle_element!(RawPlatform, RawDevice, RawContext, RawQueue);

impl<T: InfoElement> InfoType for T {
    fn decode(bytes: &[u8]) -> ClResult<Self> {
        if bytes.len() != T::WIDTH {
            return Err(ClError::InvalidValue);
        }
        Ok(T::from_ne_slice(bytes))
    }
}

/// `cl_bool` is a 32-bit integer on the native side.
impl InfoType for bool {
    fn decode(bytes: &[u8]) -> ClResult<Self> {
        Ok(ClBool::decode(bytes)? != 0)
    }
}

impl InfoType for String {
    fn decode(bytes: &[u8]) -> ClResult<Self> {
        // The reported length includes the NUL terminator.
        let text = match bytes.split_last() {
            Some((_, text)) => text,
            None => &[],
        };
        // Some drivers report more than they write, the buffer is zeroed so cut at the first NUL.
        let text = match text.iter().position(|&byte| byte == 0) {
            Some(end) => &text[..end],
            None => text,
        };
        Ok(String::from_utf8_lossy(text).into_owned())
    }
}

impl<T: InfoElement> InfoType for Vec<T> {
    fn decode(bytes: &[u8]) -> ClResult<Self> {
        if bytes.len() % T::WIDTH != 0 {
            return Err(ClError::InvalidValue);
        }
        Ok(bytes.chunks_exact(T::WIDTH).map(T::from_ne_slice).collect())
    }
}

/// First phase: asks for the size of the attribute.
///
/// `info` must forward its arguments verbatim as `(param_value_size, param_value,
/// param_value_size_ret)` to one of the native `clGet*Info` functions.
pub(crate) fn query_size<F>(info: &F) -> ClResult<usize>
where
    F: Fn(usize, *mut c_void, *mut usize) -> Status,
{
    let mut size = 0;
    check(info(0, ptr::null_mut(), &mut size))?;
    Ok(size)
}

/// Both phases: returns the raw bytes of the attribute, the length is the reported size.
pub(crate) fn query_bytes<F>(info: F) -> ClResult<Vec<u8>>
where
    F: Fn(usize, *mut c_void, *mut usize) -> Status,
{
    let size = query_size(&info)?;
    let mut bytes = vec![0u8; size];
    if size > 0 {
        check(info(size, bytes.as_mut_ptr().cast(), ptr::null_mut()))?;
    }
    Ok(bytes)
}

/// Queries and decodes an attribute.
pub(crate) fn query<T, F>(info: F) -> ClResult<Info<T>>
where
    T: InfoType,
    F: Fn(usize, *mut c_void, *mut usize) -> Status,
{
    let bytes = query_bytes(info)?;
    let value = T::decode(&bytes)?;
    Ok(Info {
        value,
        size: bytes.len(),
    })
}

/// Unwraps the result of a query for an attribute that every valid handle supports.
///
/// A failure means the handle or the driver is in a corrupt state, hence this panics instead
/// of returning an error.
pub(crate) fn expect_info<T>(result: ClResult<T>, attribute: &str) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic!(
            "Querying {} must never fail for a valid handle, got {}",
            attribute, error
        ),
    }
}
