//! Conversion between `MemoryMode` and the host's native protection values.
//!
//! On unix hosts the native value is a `PROT_*` bitmask, on Windows a
//! `PAGE_*` constant. Both directions are explicit tables. Encoding is total
//! and collapses write-only modes. Decoding is exact for every value
//! `encode` produces, and anything else decodes to `NoAccess`.

use crate::memory::MemoryMode;
use crate::sys;

/// The host's representation of page protection.
pub type NativeProtection = sys::NativeProtection;

/// Encode a `MemoryMode` as native protection.
pub fn encode(mode: MemoryMode) -> NativeProtection {
    match mode {
        MemoryMode::NoAccess => sys::PAGE_NOACCESS,
        MemoryMode::Read => sys::PAGE_READONLY,
        MemoryMode::Write | MemoryMode::ReadWrite => sys::PAGE_READWRITE,
        MemoryMode::Execute => sys::PAGE_EXECUTE,
        MemoryMode::ExecuteRead => sys::PAGE_EXECUTE_READ,
        MemoryMode::ExecuteWrite | MemoryMode::ExecuteReadWrite => sys::PAGE_EXECUTE_READWRITE,
    }
}

/// Decode native protection into a `MemoryMode`.
///
/// Values with modifier bits (guard pages, caching attributes) or without a
/// counterpart decode to `NoAccess`.
pub fn decode(native: NativeProtection) -> MemoryMode {
    match native {
        sys::PAGE_NOACCESS => MemoryMode::NoAccess,
        sys::PAGE_READONLY => MemoryMode::Read,
        sys::PAGE_READWRITE => MemoryMode::ReadWrite,
        sys::PAGE_EXECUTE => MemoryMode::Execute,
        sys::PAGE_EXECUTE_READ => MemoryMode::ExecuteRead,
        sys::PAGE_EXECUTE_READWRITE => MemoryMode::ExecuteReadWrite,
        _ => MemoryMode::NoAccess,
    }
}
