//! Page size and alignment helpers.

use crate::sys;
use std::sync::OnceLock;

/// The host's page size in bytes. Queried once.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(sys::page_size)
}

/// The granularity at which the host places new mappings. This is the page
/// size on unix hosts and 64 KiB on Windows.
pub fn allocation_granularity() -> usize {
    static GRANULARITY: OnceLock<usize> = OnceLock::new();
    *GRANULARITY.get_or_init(sys::allocation_granularity)
}

/// Round `address` up to a multiple of `align`. An `align` of zero leaves
/// `address` unchanged.
///
/// `align` must be zero or a power of two.
pub fn align_up(address: u64, align: u64) -> u64 {
    if align == 0 {
        address
    } else {
        (address + (align - 1)) & !(align - 1)
    }
}

/// Round `address` up to a multiple of `align`, or `None` if the result does
/// not fit in a `u64`.
///
/// `align` must be zero or a power of two.
pub fn checked_align_up(address: u64, align: u64) -> Option<u64> {
    if align == 0 {
        Some(address)
    } else {
        address
            .checked_add(align - 1)
            .map(|end| end & !(align - 1))
    }
}

/// Round `address` down to a multiple of `align`. An `align` of zero leaves
/// `address` unchanged.
pub fn align_down(address: u64, align: u64) -> u64 {
    if align == 0 {
        address
    } else {
        address & !(align - 1)
    }
}

pub fn is_aligned(address: u64, align: u64) -> bool {
    align_down(address, align) == address
}

/// The page-aligned range covering `[address, address + size)`.
pub(crate) fn page_span(address: u64, size: u64) -> (u64, u64) {
    let page = page_size() as u64;
    let start = align_down(address, page);
    let end = align_up(address + size, page);
    (start, end - start)
}
