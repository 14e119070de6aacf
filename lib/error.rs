//! Errors reported by vmem.

use thiserror::Error;

/// Every failure vmem can report.
///
/// Failures of the host's memory system calls are always returned to the
/// caller, on every platform. Nothing in this crate aborts the process.
#[derive(Debug, Error)]
pub enum Error {
    /// The host could not find or commit enough address space.
    #[error("Out of address space")]
    OutOfAddressSpace,
    /// The host refused the requested access.
    #[error("Permission denied")]
    PermissionDenied,
    /// The address range is empty, wraps, or is not mapped.
    #[error("Invalid address range")]
    InvalidRange,
    /// The requested alignment is not a power of two.
    #[error("Invalid alignment 0x{0:x}")]
    InvalidAlignment(u64),
    /// The host cannot perform this operation.
    #[error("Unsupported on this host: {0}")]
    Unsupported(&'static str),
    /// A native error code this crate does not classify.
    #[error("Platform error {0}")]
    Platform(i32),
    #[error("Json error: {0}")]
    Json(#[from] serde_json::Error),
}

