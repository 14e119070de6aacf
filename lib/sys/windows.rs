//! `VirtualAlloc`/`VirtualProtect` backend.

use crate::page::{align_down, align_up};
use crate::Error;
use std::ffi::c_void;
use std::mem;
use std::ptr;
use windows_sys::Win32::Foundation::{
    ERROR_ACCESS_DENIED, ERROR_COMMITMENT_LIMIT, ERROR_INVALID_ADDRESS, ERROR_INVALID_PARAMETER,
    ERROR_NOT_ENOUGH_MEMORY,
};
use windows_sys::Win32::System::Diagnostics::Debug::FlushInstructionCache;
use windows_sys::Win32::System::Memory::{
    MemExtendedParameterAddressRequirements, VirtualAlloc, VirtualAlloc2, VirtualFree,
    VirtualProtect, VirtualQuery, MEMORY_BASIC_INFORMATION, MEM_ADDRESS_REQUIREMENTS, MEM_COMMIT,
    MEM_EXTENDED_PARAMETER, MEM_FREE, MEM_RELEASE, MEM_RESERVE,
};
use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};
use windows_sys::Win32::System::Threading::GetCurrentProcess;

pub type NativeProtection = u32;

pub(crate) const PAGE_NOACCESS: NativeProtection = windows_sys::Win32::System::Memory::PAGE_NOACCESS;
pub(crate) const PAGE_READONLY: NativeProtection = windows_sys::Win32::System::Memory::PAGE_READONLY;
pub(crate) const PAGE_READWRITE: NativeProtection =
    windows_sys::Win32::System::Memory::PAGE_READWRITE;
pub(crate) const PAGE_EXECUTE: NativeProtection = windows_sys::Win32::System::Memory::PAGE_EXECUTE;
pub(crate) const PAGE_EXECUTE_READ: NativeProtection =
    windows_sys::Win32::System::Memory::PAGE_EXECUTE_READ;
pub(crate) const PAGE_EXECUTE_READWRITE: NativeProtection =
    windows_sys::Win32::System::Memory::PAGE_EXECUTE_READWRITE;

pub(crate) fn classify(code: i32) -> Error {
    match code as u32 {
        ERROR_NOT_ENOUGH_MEMORY | ERROR_COMMITMENT_LIMIT => Error::OutOfAddressSpace,
        ERROR_ACCESS_DENIED => Error::PermissionDenied,
        ERROR_INVALID_ADDRESS | ERROR_INVALID_PARAMETER => Error::InvalidRange,
        _ => Error::Platform(code),
    }
}

fn system_info() -> SYSTEM_INFO {
    // SAFETY: SYSTEM_INFO is plain data, and GetSystemInfo fills all of it.
    unsafe {
        let mut info: SYSTEM_INFO = mem::zeroed();
        GetSystemInfo(&mut info);
        info
    }
}

pub(crate) fn page_size() -> usize {
    system_info().dwPageSize as usize
}

pub(crate) fn allocation_granularity() -> usize {
    system_info().dwAllocationGranularity as usize
}

/// Reserve and commit `size` bytes, using `address` as a hint only.
pub(crate) unsafe fn map(
    address: u64,
    size: usize,
    protection: NativeProtection,
) -> Result<u64, Error> {
    let ptr = unsafe {
        VirtualAlloc(
            address as usize as *const c_void,
            size,
            MEM_COMMIT | MEM_RESERVE,
            protection,
        )
    };
    if !ptr.is_null() {
        return Ok(ptr as usize as u64);
    }
    if address == 0 {
        return Err(super::last_error("VirtualAlloc"));
    }

    // VirtualAlloc treats the address as a demand, not a hint.
    log::debug!(
        "VirtualAlloc() could not place 0x{:x} bytes at 0x{:x}, retrying anywhere",
        size,
        address
    );
    unsafe { map(0, size, protection) }
}

/// Reserve and commit `size` bytes starting at a multiple of `alignment`
/// inside `[lowest, highest)`.
pub(crate) unsafe fn map_aligned(
    lowest: u64,
    highest: u64,
    size: usize,
    protection: NativeProtection,
    alignment: usize,
) -> Result<u64, Error> {
    let granularity = allocation_granularity() as u64;

    // Alignments below the allocation granularity are implied.
    let alignment = if (alignment as u64) <= granularity {
        0
    } else {
        alignment
    };

    let mut requirements = MEM_ADDRESS_REQUIREMENTS {
        LowestStartingAddress: align_up(lowest, granularity) as usize as *mut c_void,
        HighestEndingAddress: (align_down(highest, granularity) - 1) as usize as *mut c_void,
        Alignment: alignment,
    };

    // SAFETY: MEM_EXTENDED_PARAMETER is plain data.
    let mut parameter: MEM_EXTENDED_PARAMETER = unsafe { mem::zeroed() };
    parameter.Anonymous1._bitfield = MemExtendedParameterAddressRequirements as u64;
    parameter.Anonymous2.Pointer = &mut requirements as *mut MEM_ADDRESS_REQUIREMENTS as *mut c_void;

    let ptr = unsafe {
        VirtualAlloc2(
            GetCurrentProcess(),
            ptr::null(),
            size,
            MEM_COMMIT | MEM_RESERVE,
            protection,
            &mut parameter,
            1,
        )
    };
    if ptr.is_null() {
        return Err(super::last_error("VirtualAlloc2"));
    }
    Ok(ptr as usize as u64)
}

/// Release a whole allocation. Windows releases by base address alone.
pub(crate) unsafe fn unmap(address: u64, _size: usize) -> Result<(), Error> {
    if unsafe { VirtualFree(address as usize as *mut c_void, 0, MEM_RELEASE) } == 0 {
        return Err(super::last_error("VirtualFree"));
    }
    Ok(())
}

pub(crate) unsafe fn protect(
    address: u64,
    size: usize,
    protection: NativeProtection,
) -> Result<Option<NativeProtection>, Error> {
    let mut old_protection: NativeProtection = 0;
    if unsafe {
        VirtualProtect(
            address as usize as *const c_void,
            size,
            protection,
            &mut old_protection,
        )
    } == 0
    {
        return Err(super::last_error("VirtualProtect"));
    }
    Ok(Some(old_protection))
}

pub(crate) fn query(address: u64) -> Result<NativeProtection, Error> {
    // SAFETY: VirtualQuery only inspects the address space, and the buffer
    // is sized for exactly one MEMORY_BASIC_INFORMATION.
    let info = unsafe {
        let mut info: MEMORY_BASIC_INFORMATION = mem::zeroed();
        let written = VirtualQuery(
            address as usize as *const c_void,
            &mut info,
            mem::size_of::<MEMORY_BASIC_INFORMATION>(),
        );
        if written == 0 {
            return Err(super::last_error("VirtualQuery"));
        }
        info
    };

    if info.State == MEM_FREE {
        return Err(Error::InvalidRange);
    }
    Ok(info.Protect)
}

pub(crate) unsafe fn flush_icache(address: u64, size: usize) -> Result<(), Error> {
    if unsafe {
        FlushInstructionCache(
            GetCurrentProcess(),
            address as usize as *const c_void,
            size,
        )
    } == 0
    {
        return Err(super::last_error("FlushInstructionCache"));
    }
    Ok(())
}

/// Windows has no per-thread write-xor-execute toggle.
pub(crate) fn jit_write_protect(_enabled: bool) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_win32_errors() {
        assert!(matches!(
            classify(ERROR_NOT_ENOUGH_MEMORY as i32),
            Error::OutOfAddressSpace
        ));
        assert!(matches!(
            classify(ERROR_ACCESS_DENIED as i32),
            Error::PermissionDenied
        ));
        assert!(matches!(
            classify(ERROR_INVALID_ADDRESS as i32),
            Error::InvalidRange
        ));
    }

    #[test]
    fn granularity_is_a_page_multiple() {
        assert_eq!(allocation_granularity() % page_size(), 0);
    }
}
