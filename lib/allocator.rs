//! Reserving, committing and releasing address space.
//!
//! Every allocation reserves and commits in one step, with the requested
//! protection applied from the start. Address hints are requests only: when
//! the host cannot honour a hint, the allocation is placed elsewhere.
//!
//! The host rounds sizes up to its page or allocation granularity, so the
//! span actually reserved may be larger than `size`.

use crate::memory::{codec, MemoryMode};
use crate::page::{self, checked_align_up, is_aligned};
use crate::window::AddressWindow;
use crate::{sys, Error};
use log::{debug, error};

fn check_size(address: u64, size: u64) -> Result<usize, Error> {
    if size == 0 || address.checked_add(size).is_none() {
        return Err(Error::InvalidRange);
    }
    usize::try_from(size).map_err(|_| Error::InvalidRange)
}

/// Reserve and commit `size` bytes with protection `mode`.
///
/// An `address` of zero lets the host choose. Any other value asks for that
/// exact address, without any guarantee of getting it.
pub fn allocate(address: u64, size: u64, mode: MemoryMode) -> Result<u64, Error> {
    let length = check_size(address, size)?;
    let result = unsafe { sys::map(address, length, codec::encode(mode))? };

    debug!(
        "Allocated 0x{:x} bytes at 0x{:x} ({}), hint 0x{:x}",
        size, result, mode, address
    );
    Ok(result)
}

/// Reserve and commit `size` bytes with protection `mode`, starting at a
/// multiple of `alignment`, inside the default `AddressWindow`.
///
/// See `allocate_aligned_in`.
pub fn allocate_aligned(
    address: u64,
    size: u64,
    mode: MemoryMode,
    alignment: u64,
) -> Result<u64, Error> {
    allocate_aligned_in(&AddressWindow::default(), address, size, mode, alignment)
}

/// Reserve and commit `size` bytes with protection `mode`, starting at a
/// multiple of `alignment`, inside `window`.
///
/// The search starts at `window.min()` when `address` is zero, and at
/// `address` rounded up to `alignment` otherwise. The result is never below
/// that starting point. `alignment` must be zero or a power of two;
/// alignments up to the page size are always met, and zero asks for page
/// alignment only. The returned range always lies inside `window`, or the
/// allocation fails with `OutOfAddressSpace`. A `size` which cannot be
/// rounded up to whole pages fails with `OutOfAddressSpace` too.
pub fn allocate_aligned_in(
    window: &AddressWindow,
    address: u64,
    size: u64,
    mode: MemoryMode,
    alignment: u64,
) -> Result<u64, Error> {
    if alignment != 0 && !alignment.is_power_of_two() {
        return Err(Error::InvalidAlignment(alignment));
    }
    check_size(address, size)?;

    let page_size = page::page_size() as u64;
    let alignment = alignment.max(page_size);

    let lowest = if address == 0 {
        window.min()
    } else {
        checked_align_up(address, alignment).ok_or(Error::InvalidRange)?
    };
    let size = checked_align_up(size, page_size).ok_or(Error::OutOfAddressSpace)?;
    if size.checked_add(alignment).is_none() || !window.contains(lowest, size) {
        error!(
            "No room for 0x{:x} bytes at 0x{:x} in window 0x{:x}..0x{:x}",
            size,
            lowest,
            window.min(),
            window.max()
        );
        return Err(Error::OutOfAddressSpace);
    }

    let length = usize::try_from(size).map_err(|_| Error::InvalidRange)?;
    let alignment_bytes = usize::try_from(alignment).map_err(|_| Error::InvalidAlignment(alignment))?;
    let result = unsafe {
        sys::map_aligned(
            lowest,
            window.max(),
            length,
            codec::encode(mode),
            alignment_bytes,
        )?
    };

    if result < lowest || !window.contains(result, size) || !is_aligned(result, alignment) {
        error!(
            "Aligned allocation at 0x{:x} falls outside 0x{:x}..0x{:x}",
            result,
            lowest,
            window.max()
        );
        unsafe { sys::unmap(result, length)? };
        return Err(Error::OutOfAddressSpace);
    }

    debug!(
        "Allocated 0x{:x} bytes at 0x{:x} ({}), alignment 0x{:x}",
        size, result, mode, alignment
    );
    Ok(result)
}

/// Release a range created by `allocate` or `allocate_aligned`.
///
/// # Safety
///
/// `address` and `size` must describe exactly one allocation made by this
/// crate, and nothing may use that memory afterwards.
pub unsafe fn deallocate(address: u64, size: u64) -> Result<(), Error> {
    let length = check_size(address, size)?;
    unsafe { sys::unmap(address, length)? };
    debug!("Released 0x{:x} bytes at 0x{:x}", size, address);
    Ok(())
}
