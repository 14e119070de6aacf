//! Host system calls.
//!
//! Each backend exposes the same set of items: the `NativeProtection` type
//! and its `PAGE_*` values, page size queries, and raw map/unmap, protect,
//! query and instruction cache calls. Everything above this module is
//! platform independent.

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub(crate) use self::unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub(crate) use self::windows::*;

use crate::Error;
use log::error;
use std::io;

/// Take the calling thread's last OS error, log it against `operation`, and
/// classify it.
pub(crate) fn last_error(operation: &str) -> Error {
    let error = io::Error::last_os_error();
    let code = error.raw_os_error().unwrap_or(0);
    error!("{}() failed: {} (0x{:X})", operation, error, code);
    classify(code)
}
