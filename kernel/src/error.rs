//! Kernel-wide error types.
//!
//! `KernelError` is the Rust-side error currency for every fallible function
//! above the spinlock layer. The syscall dispatcher is the single place that
//! lowers a `Result<_, KernelError>` down to the fixed negative-errno values
//! the syscall ABI exposes to user space.

use core::fmt;

/// Top-level kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Physical or virtual memory exhausted.
    OutOfMemory { requested: usize, available: usize },
    /// An address outside any valid range was used.
    InvalidAddress { addr: usize },
    /// Dereferenced a virtual address with no mapping.
    UnmappedMemory { addr: usize },
    /// A filesystem-layer error; see [`FsError`] for the specific cause.
    FsError(FsError),
    /// A hardware device reported a condition the driver could not recover from.
    HardwareError { device: &'static str, code: u32 },
    /// Caller passed an out-of-range or malformed argument.
    InvalidArgument { name: &'static str, value: &'static str },
    /// Feature recognised but intentionally unimplemented.
    NotImplemented { feature: &'static str },
    /// A data structure's invariant was violated (heap magic mismatch, double free).
    Corruption { structure: &'static str, detail: &'static str },
    /// Subsystem used before its `init()` ran.
    NotInitialized { subsystem: &'static str },
}

/// Filesystem-specific errors, one-to-one with the `-E*` taxonomy the VFS
/// surface exposes to syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    NotADirectory,
    IsADirectory,
    ReadOnly,
    InvalidPath,
    NoRootFs,
    AlreadyMounted,
    NotMounted,
    UnknownFsType,
    IoError,
    DirectoryNotEmpty,
    TooManyOpenFiles,
    BadFileDescriptor,
    NotSupported,
    InvalidArgument,
}

pub type KernelResult<T> = Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested, available } => write!(
                f,
                "out of memory: requested {} bytes, {} available",
                requested, available
            ),
            Self::InvalidAddress { addr } => write!(f, "invalid address 0x{:x}", addr),
            Self::UnmappedMemory { addr } => write!(f, "unmapped memory at 0x{:x}", addr),
            Self::FsError(e) => write!(f, "filesystem error: {:?}", e),
            Self::HardwareError { device, code } => {
                write!(f, "hardware error on {}: code 0x{:x}", device, code)
            }
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::NotImplemented { feature } => write!(f, "not implemented: {}", feature),
            Self::Corruption { structure, detail } => {
                write!(f, "{} corrupted: {}", structure, detail)
            }
            Self::NotInitialized { subsystem } => write!(f, "{} not initialized", subsystem),
        }
    }
}

impl From<FsError> for KernelError {
    fn from(err: FsError) -> Self {
        Self::FsError(err)
    }
}

/// POSIX-ish negative errno values the syscall ABI returns. Only the subset
/// the VFS surface names is needed.
pub mod errno {
    pub const ENOENT: isize = -2;
    pub const EIO: isize = -5;
    pub const EBADF: isize = -9;
    pub const ENOMEM: isize = -12;
    pub const EACCES: isize = -13;
    pub const EEXIST: isize = -17;
    pub const ENOTDIR: isize = -20;
    pub const EISDIR: isize = -21;
    pub const EINVAL: isize = -22;
    pub const ENFILE: isize = -23;
    pub const ENOTEMPTY: isize = -39;
    pub const ENOSYS: isize = -38;
    /// Generic failure for conditions with no closer POSIX match.
    pub const EGENERIC: isize = -1;
}

impl FsError {
    /// Lower to the fixed negative-errno value the syscall ABI returns.
    pub fn to_errno(self) -> isize {
        use errno::*;
        match self {
            Self::NotFound => ENOENT,
            Self::AlreadyExists => EEXIST,
            Self::PermissionDenied => EACCES,
            Self::NotADirectory => ENOTDIR,
            Self::IsADirectory => EISDIR,
            Self::ReadOnly => EACCES,
            Self::InvalidPath => EINVAL,
            Self::NoRootFs => ENOENT,
            Self::AlreadyMounted => EEXIST,
            Self::NotMounted => EINVAL,
            Self::UnknownFsType => EINVAL,
            Self::IoError => EIO,
            Self::DirectoryNotEmpty => ENOTEMPTY,
            Self::TooManyOpenFiles => ENFILE,
            Self::BadFileDescriptor => EBADF,
            Self::NotSupported => ENOSYS,
            Self::InvalidArgument => EINVAL,
        }
    }
}

impl KernelError {
    /// Lower to the fixed negative-errno value the syscall ABI returns.
    pub fn to_errno(self) -> isize {
        match self {
            Self::FsError(e) => e.to_errno(),
            Self::OutOfMemory { .. } => errno::ENOMEM,
            Self::InvalidAddress { .. } | Self::UnmappedMemory { .. } => errno::EINVAL,
            Self::InvalidArgument { .. } => errno::EINVAL,
            Self::NotImplemented { .. } => errno::ENOSYS,
            Self::HardwareError { .. } | Self::Corruption { .. } | Self::NotInitialized { .. } => {
                errno::EGENERIC
            }
        }
    }
}

/// Ergonomic construction, mirroring the shape of the error it builds.
#[macro_export]
macro_rules! kernel_error {
    (InvalidArgument { $name:expr => $value:expr }) => {
        $crate::error::KernelError::InvalidArgument {
            name: $name,
            value: $value,
        }
    };
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
}
