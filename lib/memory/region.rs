//! An owned region of host memory.

use crate::allocator;
use crate::icache;
use crate::memory::MemoryMode;
use crate::page::{align_up, page_size};
use crate::patcher::{self, WriteProtectGuard, WORD_SIZE};
use crate::protector;
use crate::Error;
use log::warn;
use std::fmt;
use std::ptr;
use std::slice;

/// A contiguous range of memory, with uniform protection, owned by this
/// handle.
///
/// The region is released when the handle is dropped. The handle records the
/// region's address, size and mode, so operations on it do not need them
/// passed again.
pub struct Region {
    address: u64,
    len: usize,
    mode: MemoryMode,
}

impl Region {
    /// Reserve and commit a region of at least `size` bytes anywhere.
    pub fn allocate(size: u64, mode: MemoryMode) -> Result<Region, Error> {
        Region::allocate_at(0, size, mode)
    }

    /// Reserve and commit a region of at least `size` bytes, asking for
    /// `address` without requiring it.
    pub fn allocate_at(address: u64, size: u64, mode: MemoryMode) -> Result<Region, Error> {
        let address = allocator::allocate(address, size, mode)?;
        Ok(Region {
            address,
            len: size as usize,
            mode,
        })
    }

    /// Reserve and commit a region of at least `size` bytes whose address is
    /// a multiple of `alignment`. See `allocator::allocate_aligned`.
    pub fn allocate_aligned(
        address: u64,
        size: u64,
        mode: MemoryMode,
        alignment: u64,
    ) -> Result<Region, Error> {
        let address = allocator::allocate_aligned(address, size, mode, alignment)?;
        Ok(Region {
            address,
            len: align_up(size, page_size() as u64) as usize,
            mode,
        })
    }

    /// Take ownership of a region created by `allocator`.
    ///
    /// # Safety
    ///
    /// `address` and `len` must describe one allocation made by this crate,
    /// currently protected as `mode`, and nothing else may own it.
    pub unsafe fn from_raw(address: u64, len: usize, mode: MemoryMode) -> Region {
        Region { address, len, mode }
    }

    /// Give up ownership of this region without releasing it, returning its
    /// address and length.
    pub fn into_raw(self) -> (u64, usize) {
        let raw = (self.address, self.len);
        std::mem::forget(self);
        raw
    }

    /// Get the address of this region
    pub fn address(&self) -> u64 {
        self.address
    }

    /// Get the length of this region in bytes
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Get the mode currently applied to this region
    pub fn mode(&self) -> MemoryMode {
        self.mode
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.address as usize as *const u8
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.address as usize as *mut u8
    }

    /// Returns `true` if `address` lies inside this region.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.address && address - self.address < self.len as u64
    }

    /// The contents of this region, if its mode allows reading.
    pub fn as_slice(&self) -> Option<&[u8]> {
        if !self.mode.is_readable() {
            return None;
        }
        Some(unsafe { slice::from_raw_parts(self.as_ptr(), self.len) })
    }

    /// The contents of this region for writing, if its mode allows it.
    ///
    /// Executable regions are not handed out this way. Writes to them must
    /// go through `write` or `patch`, which handle write-xor-execute and the
    /// instruction cache.
    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        if !self.mode.is_writable() || self.mode.contains_execute() {
            return None;
        }
        Some(unsafe { slice::from_raw_parts_mut(self.as_mut_ptr(), self.len) })
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<u64, Error> {
        match offset.checked_add(len) {
            Some(end) if end <= self.len => Ok(self.address + offset as u64),
            _ => Err(Error::InvalidRange),
        }
    }

    /// Copy `bytes` into this region at `offset`.
    ///
    /// The region must be writable. If it is executable, the written range is
    /// flushed from the instruction cache before returning.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), Error> {
        let address = self.check_range(offset, bytes.len())?;
        if !self.mode.is_writable() {
            return Err(Error::PermissionDenied);
        }

        {
            let _guard = WriteProtectGuard::acquire();
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), address as usize as *mut u8, bytes.len())
            };
        }

        if self.mode.contains_execute() {
            unsafe { icache::flush(address, bytes.len() as u64)? };
        }
        Ok(())
    }

    /// Overwrite the 8-byte word at `offset` with `value`, returning `true`
    /// if it changed.
    ///
    /// Write protection is lifted around the store if this region's mode
    /// lacks it, and executable regions are flushed afterwards.
    pub fn patch(&mut self, offset: usize, value: u64) -> Result<bool, Error> {
        let address = self.check_range(offset, WORD_SIZE as usize)?;
        unsafe { patcher::patch_protected(address, value, self.mode) }
    }

    /// Apply `mode` to the whole region, returning the mode it replaced.
    pub fn protect(&mut self, mode: MemoryMode) -> Result<MemoryMode, Error> {
        unsafe { protector::protect(self.address, self.len as u64, mode, None)? };
        Ok(std::mem::replace(&mut self.mode, mode))
    }

    /// Flush the whole region from the instruction cache.
    pub fn flush(&self) -> Result<(), Error> {
        unsafe { icache::flush(self.address, self.len as u64) }
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        if let Err(e) = unsafe { allocator::deallocate(self.address, self.len as u64) } {
            warn!(
                "Leaking 0x{:x} bytes at 0x{:x}: {}",
                self.len, self.address, e
            );
        }
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Region")
            .field("address", &format_args!("0x{:x}", self.address))
            .field("len", &format_args!("0x{:x}", self.len))
            .field("mode", &self.mode)
            .finish()
    }
}

// Region only exposes its memory through `&self`/`&mut self` borrows.
unsafe impl Send for Region {}
unsafe impl Sync for Region {}
