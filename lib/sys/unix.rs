//! `mmap`/`mprotect` backend.

use crate::page::align_up;
use crate::Error;
use libc::{c_int, c_void};

pub type NativeProtection = c_int;

pub(crate) const PAGE_NOACCESS: NativeProtection = libc::PROT_NONE;
pub(crate) const PAGE_READONLY: NativeProtection = libc::PROT_READ;
pub(crate) const PAGE_READWRITE: NativeProtection = libc::PROT_READ | libc::PROT_WRITE;
pub(crate) const PAGE_EXECUTE: NativeProtection = libc::PROT_EXEC;
pub(crate) const PAGE_EXECUTE_READ: NativeProtection = libc::PROT_EXEC | libc::PROT_READ;
pub(crate) const PAGE_EXECUTE_READWRITE: NativeProtection =
    libc::PROT_EXEC | libc::PROT_READ | libc::PROT_WRITE;

pub(crate) fn classify(code: i32) -> Error {
    match code {
        libc::ENOMEM => Error::OutOfAddressSpace,
        libc::EACCES | libc::EPERM => Error::PermissionDenied,
        libc::EINVAL => Error::InvalidRange,
        code => Error::Platform(code),
    }
}

pub(crate) fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Mappings on unix are placed at page granularity.
pub(crate) fn allocation_granularity() -> usize {
    page_size()
}

#[cfg(target_vendor = "apple")]
fn map_flags(protection: NativeProtection) -> c_int {
    let flags = libc::MAP_PRIVATE | libc::MAP_ANON;
    if protection & libc::PROT_EXEC != 0 {
        flags | libc::MAP_JIT
    } else {
        flags
    }
}

#[cfg(not(target_vendor = "apple"))]
fn map_flags(_protection: NativeProtection) -> c_int {
    libc::MAP_PRIVATE | libc::MAP_ANON
}

/// Reserve and commit `size` bytes, using `address` as a hint only.
pub(crate) unsafe fn map(
    address: u64,
    size: usize,
    protection: NativeProtection,
) -> Result<u64, Error> {
    let ptr = unsafe {
        libc::mmap(
            address as usize as *mut c_void,
            size,
            protection,
            map_flags(protection),
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(super::last_error("mmap"));
    }
    Ok(ptr as usize as u64)
}

/// Reserve and commit `size` bytes starting at a multiple of `alignment`,
/// searching upward from `lowest`.
///
/// `size` must be a multiple of the page size and `alignment` a power of two
/// no smaller than the page size. The mapping is over-reserved by
/// `alignment` bytes, then the unaligned head and the tail are returned to
/// the host.
///
/// `mmap` treats the address as a hint and places the mapping elsewhere when
/// the hint is taken, which may be below `lowest`. Such a mapping is released
/// and the next attempt asks for a higher address, stepping further each
/// time, until the span would pass `highest`.
pub(crate) unsafe fn map_aligned(
    lowest: u64,
    highest: u64,
    size: usize,
    protection: NativeProtection,
    alignment: usize,
) -> Result<u64, Error> {
    let span = size.checked_add(alignment).ok_or(Error::OutOfAddressSpace)?;
    let mut hint = lowest;
    let mut step = span as u64;

    loop {
        match hint.checked_add(span as u64) {
            Some(end) if end <= highest => {}
            _ => return Err(Error::OutOfAddressSpace),
        }

        let base = unsafe { map(hint, span, protection)? };
        if base >= lowest && base + span as u64 <= highest {
            return trim_aligned(base, span, size, alignment, |address, length| unsafe {
                unmap(address, length)
            });
        }

        log::debug!(
            "Mapping landed at 0x{:x}, below 0x{:x} or past 0x{:x}, retrying",
            base,
            lowest,
            highest
        );
        unsafe { unmap(base, span)? };
        hint = hint.checked_add(step).ok_or(Error::OutOfAddressSpace)?;
        step = step.saturating_mul(2);
    }
}

/// Cut `[base, base + span)` down to the `size` bytes starting at its first
/// multiple of `alignment`, handing the rest to `release`.
///
/// If a release fails, whatever is still mapped is released as well before
/// the error is returned.
fn trim_aligned<F>(
    base: u64,
    span: usize,
    size: usize,
    alignment: usize,
    mut release: F,
) -> Result<u64, Error>
where
    F: FnMut(u64, usize) -> Result<(), Error>,
{
    let aligned = align_up(base, alignment as u64);
    let head = (aligned - base) as usize;
    let tail = span - head - size;

    if head > 0 {
        if let Err(e) = release(base, head) {
            if release(base, span).is_err() {
                log::warn!("Leaking 0x{:x} bytes at 0x{:x}", span, base);
            }
            return Err(e);
        }
    }
    if tail > 0 {
        if let Err(e) = release(aligned + size as u64, tail) {
            if release(aligned, size + tail).is_err() {
                log::warn!("Leaking 0x{:x} bytes at 0x{:x}", size + tail, aligned);
            }
            return Err(e);
        }
    }

    Ok(aligned)
}

pub(crate) unsafe fn unmap(address: u64, size: usize) -> Result<(), Error> {
    if unsafe { libc::munmap(address as usize as *mut c_void, size) } != 0 {
        return Err(super::last_error("munmap"));
    }
    Ok(())
}

/// Change protection. `mprotect` does not report the previous protection, so
/// this always returns `None`; use `query` beforehand.
pub(crate) unsafe fn protect(
    address: u64,
    size: usize,
    protection: NativeProtection,
) -> Result<Option<NativeProtection>, Error> {
    if unsafe { libc::mprotect(address as usize as *mut c_void, size, protection) } != 0 {
        return Err(match super::last_error("mprotect") {
            // mprotect reports an unmapped range as ENOMEM
            Error::OutOfAddressSpace => Error::InvalidRange,
            error => error,
        });
    }
    Ok(None)
}

/// Find the protection of the mapping holding `address` in `/proc/self/maps`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) fn query(address: u64) -> Result<NativeProtection, Error> {
    let maps = std::fs::read_to_string("/proc/self/maps").map_err(|error| {
        log::error!("Failed to read /proc/self/maps: {}", error);
        Error::Platform(error.raw_os_error().unwrap_or(0))
    })?;

    for line in maps.lines() {
        if let Some((start, end, protection)) = parse_maps_line(line) {
            if start <= address && address < end {
                return Ok(protection);
            }
        }
    }

    Err(Error::InvalidRange)
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn query(_address: u64) -> Result<NativeProtection, Error> {
    Err(Error::Unsupported("querying page protection"))
}

/// Parse `start-end perms ...` into the range and its protection.
#[cfg(any(target_os = "linux", target_os = "android", test))]
fn parse_maps_line(line: &str) -> Option<(u64, u64, NativeProtection)> {
    let mut fields = line.split_whitespace();
    let (start, end) = fields.next()?.split_once('-')?;
    let start = u64::from_str_radix(start, 16).ok()?;
    let end = u64::from_str_radix(end, 16).ok()?;
    let perms = fields.next()?.as_bytes();
    if perms.len() < 3 {
        return None;
    }

    let mut protection = libc::PROT_NONE;
    if perms[0] == b'r' {
        protection |= libc::PROT_READ;
    }
    if perms[1] == b'w' {
        protection |= libc::PROT_WRITE;
    }
    if perms[2] == b'x' {
        protection |= libc::PROT_EXEC;
    }
    Some((start, end, protection))
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub(crate) unsafe fn flush_icache(_address: u64, _size: usize) -> Result<(), Error> {
    // Instruction fetch is coherent with data writes on x86.
    Ok(())
}

#[cfg(all(
    target_vendor = "apple",
    not(any(target_arch = "x86", target_arch = "x86_64"))
))]
pub(crate) unsafe fn flush_icache(address: u64, size: usize) -> Result<(), Error> {
    extern "C" {
        fn sys_icache_invalidate(start: *mut c_void, len: usize);
    }
    unsafe { sys_icache_invalidate(address as usize as *mut c_void, size) };
    Ok(())
}

#[cfg(not(any(
    target_vendor = "apple",
    target_arch = "x86",
    target_arch = "x86_64"
)))]
pub(crate) unsafe fn flush_icache(address: u64, size: usize) -> Result<(), Error> {
    extern "C" {
        fn __clear_cache(start: *mut libc::c_char, end: *mut libc::c_char);
    }
    let start = address as usize as *mut libc::c_char;
    unsafe { __clear_cache(start, start.add(size)) };
    Ok(())
}

/// Toggle write-xor-execute enforcement for `MAP_JIT` memory on the calling
/// thread.
#[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
pub(crate) fn jit_write_protect(enabled: bool) {
    extern "C" {
        fn pthread_jit_write_protect_np(enabled: c_int);
    }
    // SAFETY: only affects the calling thread's view of MAP_JIT pages.
    unsafe { pthread_jit_write_protect_np(enabled as c_int) };
}

#[cfg(not(all(target_vendor = "apple", target_arch = "aarch64")))]
pub(crate) fn jit_write_protect(_enabled: bool) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_maps() {
        let line = "7f2c4a000000-7f2c4a021000 r-xp 00000000 00:00 0 ";
        assert_eq!(
            parse_maps_line(line),
            Some((0x7f2c4a000000, 0x7f2c4a021000, PAGE_EXECUTE_READ))
        );

        let line = "55d0c5a00000-55d0c5a01000 ---p 00000000 00:00 0";
        assert_eq!(
            parse_maps_line(line),
            Some((0x55d0c5a00000, 0x55d0c5a01000, PAGE_NOACCESS))
        );

        assert_eq!(parse_maps_line("garbage"), None);
    }

    #[test]
    fn trim_releases_head_and_tail() {
        let mut released = Vec::new();
        let aligned = trim_aligned(0x1_3000, 0x1_2000, 0x2000, 0x1_0000, |address, length| {
            released.push((address, length));
            Ok(())
        })
        .unwrap();
        assert_eq!(aligned, 0x2_0000);
        assert_eq!(released, vec![(0x1_3000, 0xd000), (0x2_2000, 0x3000)]);
    }

    #[test]
    fn trim_releases_everything_when_head_release_fails() {
        let mut released = Vec::new();
        let result = trim_aligned(0x1_3000, 0x1_2000, 0x2000, 0x1_0000, |address, length| {
            released.push((address, length));
            if released.len() == 1 {
                Err(Error::Platform(libc::EINVAL))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(Error::Platform(libc::EINVAL))));
        assert_eq!(released, vec![(0x1_3000, 0xd000), (0x1_3000, 0x1_2000)]);
    }

    #[test]
    fn trim_releases_aligned_part_when_tail_release_fails() {
        let mut released = Vec::new();
        let result = trim_aligned(0x1_3000, 0x1_2000, 0x2000, 0x1_0000, |address, length| {
            released.push((address, length));
            if released.len() == 2 {
                Err(Error::Platform(libc::EINVAL))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(Error::Platform(libc::EINVAL))));
        assert_eq!(
            released,
            vec![(0x1_3000, 0xd000), (0x2_2000, 0x3000), (0x2_0000, 0x5000)]
        );
    }

    #[test]
    fn classify_errno() {
        assert!(matches!(classify(libc::ENOMEM), Error::OutOfAddressSpace));
        assert!(matches!(classify(libc::EACCES), Error::PermissionDenied));
        assert!(matches!(classify(libc::EINVAL), Error::InvalidRange));
        assert!(matches!(classify(libc::EIO), Error::Platform(code) if code == libc::EIO));
    }
}
