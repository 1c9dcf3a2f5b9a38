//! Translation of OpenCL status codes into [`ClError`].
//!
//! Every fallible native call goes through [`check`] (or [`from_status`]) right at the
//! boundary, so no raw status code reaches the rest of the crate.

/// Raw native status code, `cl_int` in the C API.
pub type Status = i32;

/// The status returned by every successful native call.
pub const CL_SUCCESS: Status = 0;

macro_rules! status_codes {
    ($($(#[doc = $doc:literal])* $konst:ident = $code:literal => $variant:ident,)*) => {
        $(
            #[allow(missing_docs)]
            pub const $konst: Status = $code;
        )*

        /// Error types of this library.
        ///
        /// There is exactly one variant per OpenCL 1.2 status code and a catch-all
        /// [`ClError::Unknown`] for anything else, including "impossible" native results such as
        /// a success status paired with a null handle.
        #[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(missing_docs)]
        pub enum ClError {
            $(
                $(#[doc = $doc])*
                #[error("{} ({})", stringify!($konst), $code)]
                $variant,
            )*
            /// A status code outside of the known set.
            #[error("Unknown OpenCL status ({0})")]
            Unknown(Status),
        }

        /// Translates a native status code.
        ///
        /// Returns `None` for [`CL_SUCCESS`]. The function is total: every other value maps to
        /// exactly one [`ClError`], unrecognized ones to [`ClError::Unknown`].
        pub fn from_status(status: Status) -> Option<ClError> {
            match status {
                CL_SUCCESS => None,
                $($code => Some(ClError::$variant),)*
                other => Some(ClError::Unknown(other)),
            }
        }

        impl ClError {
            /// Returns the native status code this error was translated from.
            pub fn code(&self) -> Status {
                match self {
                    $(ClError::$variant => $code,)*
                    ClError::Unknown(code) => *code,
                }
            }

            /// Returns the mnemonic of the native status, e.g. `CL_INVALID_VALUE`.
            pub fn name(&self) -> &'static str {
                match self {
                    $(ClError::$variant => stringify!($konst),)*
                    ClError::Unknown(_) => "CL_UNKNOWN",
                }
            }
        }

        #[cfg(test)]
        const ALL_CODES: &[Status] = &[$($code,)*];
    };
}

status_codes! {
    CL_DEVICE_NOT_FOUND = -1 => DeviceNotFound,
    CL_DEVICE_NOT_AVAILABLE = -2 => DeviceNotAvailable,
    CL_COMPILER_NOT_AVAILABLE = -3 => CompilerNotAvailable,
    CL_MEM_OBJECT_ALLOCATION_FAILURE = -4 => MemObjectAllocationFailure,
    /// The device ran out of resources while executing the call.
    CL_OUT_OF_RESOURCES = -5 => OutOfResources,
    /// The host ran out of memory while executing the call.
    CL_OUT_OF_HOST_MEMORY = -6 => OutOfHostMemory,
    CL_PROFILING_INFO_NOT_AVAILABLE = -7 => ProfilingInfoNotAvailable,
    CL_MEM_COPY_OVERLAP = -8 => MemCopyOverlap,
    CL_IMAGE_FORMAT_MISMATCH = -9 => ImageFormatMismatch,
    CL_IMAGE_FORMAT_NOT_SUPPORTED = -10 => ImageFormatNotSupported,
    CL_BUILD_PROGRAM_FAILURE = -11 => BuildProgramFailure,
    CL_MAP_FAILURE = -12 => MapFailure,
    CL_MISALIGNED_SUB_BUFFER_OFFSET = -13 => MisalignedSubBufferOffset,
    CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST = -14 => ExecStatusErrorForEventsInWaitList,
    CL_COMPILE_PROGRAM_FAILURE = -15 => CompileProgramFailure,
    CL_LINKER_NOT_AVAILABLE = -16 => LinkerNotAvailable,
    CL_LINK_PROGRAM_FAILURE = -17 => LinkProgramFailure,
    CL_DEVICE_PARTITION_FAILED = -18 => DevicePartitionFailed,
    CL_KERNEL_ARG_INFO_NOT_AVAILABLE = -19 => KernelArgInfoNotAvailable,
    /// An argument, or a size reported back by the driver, is not acceptable.
    CL_INVALID_VALUE = -30 => InvalidValue,
    CL_INVALID_DEVICE_TYPE = -31 => InvalidDeviceType,
    CL_INVALID_PLATFORM = -32 => InvalidPlatform,
    /// The device is not valid, or not valid in this context.
    CL_INVALID_DEVICE = -33 => InvalidDevice,
    /// The context is not valid, e.g. it was already released.
    CL_INVALID_CONTEXT = -34 => InvalidContext,
    CL_INVALID_QUEUE_PROPERTIES = -35 => InvalidQueueProperties,
    /// The command queue is not valid, e.g. it was already released.
    CL_INVALID_COMMAND_QUEUE = -36 => InvalidCommandQueue,
    CL_INVALID_HOST_PTR = -37 => InvalidHostPtr,
    CL_INVALID_MEM_OBJECT = -38 => InvalidMemObject,
    CL_INVALID_IMAGE_FORMAT_DESCRIPTOR = -39 => InvalidImageFormatDescriptor,
    CL_INVALID_IMAGE_SIZE = -40 => InvalidImageSize,
    CL_INVALID_SAMPLER = -41 => InvalidSampler,
    CL_INVALID_BINARY = -42 => InvalidBinary,
    CL_INVALID_BUILD_OPTIONS = -43 => InvalidBuildOptions,
    CL_INVALID_PROGRAM = -44 => InvalidProgram,
    CL_INVALID_PROGRAM_EXECUTABLE = -45 => InvalidProgramExecutable,
    CL_INVALID_KERNEL_NAME = -46 => InvalidKernelName,
    CL_INVALID_KERNEL_DEFINITION = -47 => InvalidKernelDefinition,
    CL_INVALID_KERNEL = -48 => InvalidKernel,
    CL_INVALID_ARG_INDEX = -49 => InvalidArgIndex,
    CL_INVALID_ARG_VALUE = -50 => InvalidArgValue,
    CL_INVALID_ARG_SIZE = -51 => InvalidArgSize,
    CL_INVALID_KERNEL_ARGS = -52 => InvalidKernelArgs,
    CL_INVALID_WORK_DIMENSION = -53 => InvalidWorkDimension,
    CL_INVALID_WORK_GROUP_SIZE = -54 => InvalidWorkGroupSize,
    CL_INVALID_WORK_ITEM_SIZE = -55 => InvalidWorkItemSize,
    CL_INVALID_GLOBAL_OFFSET = -56 => InvalidGlobalOffset,
    CL_INVALID_EVENT_WAIT_LIST = -57 => InvalidEventWaitList,
    CL_INVALID_EVENT = -58 => InvalidEvent,
    CL_INVALID_OPERATION = -59 => InvalidOperation,
    CL_INVALID_GL_OBJECT = -60 => InvalidGlObject,
    CL_INVALID_BUFFER_SIZE = -61 => InvalidBufferSize,
    CL_INVALID_MIP_LEVEL = -62 => InvalidMipLevel,
    CL_INVALID_GLOBAL_WORK_SIZE = -63 => InvalidGlobalWorkSize,
    CL_INVALID_PROPERTY = -64 => InvalidProperty,
    CL_INVALID_IMAGE_DESCRIPTOR = -65 => InvalidImageDescriptor,
    CL_INVALID_COMPILER_OPTIONS = -66 => InvalidCompilerOptions,
    CL_INVALID_LINKER_OPTIONS = -67 => InvalidLinkerOptions,
    CL_INVALID_DEVICE_PARTITION_COUNT = -68 => InvalidDevicePartitionCount,
}

/// Convenience type alias for [`ClError`] based [`Result`]s.
pub type ClResult<T> = std::result::Result<T, ClError>;

/// Turns a native status into a [`ClResult`].
pub fn check(status: Status) -> ClResult<()> {
    match from_status(status) {
        None => Ok(()),
        Some(error) => Err(error),
    }
}
