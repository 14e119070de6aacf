//! Changing and inspecting the protection of mapped memory.

use crate::memory::{codec, MemoryMode};
use crate::{sys, Error};
use log::{debug, warn};

/// Change the protection of `[address, address + size)` to `mode`.
///
/// When `old_mode` is given it receives the mode the first page of the range
/// had before the change. Windows reports this directly. Linux reads it from
/// `/proc/self/maps` before the change. Other hosts cannot report it, and
/// fail with `Unsupported` before changing anything.
///
/// # Safety
///
/// The range must be memory this process mapped, and no live reference into
/// it may rely on access the new mode removes.
pub unsafe fn protect(
    address: u64,
    size: u64,
    mode: MemoryMode,
    old_mode: Option<&mut MemoryMode>,
) -> Result<(), Error> {
    if size == 0 || address.checked_add(size).is_none() {
        return Err(Error::InvalidRange);
    }
    let length = usize::try_from(size).map_err(|_| Error::InvalidRange)?;

    let queried = if old_mode.is_some() && cfg!(unix) {
        Some(sys::query(address)?)
    } else {
        None
    };

    let previous = unsafe { sys::protect(address, length, codec::encode(mode))? }.or(queried);

    debug!(
        "Protected 0x{:x} bytes at 0x{:x} as {}",
        size, address, mode
    );

    if let (Some(old_mode), Some(previous)) = (old_mode, previous) {
        *old_mode = codec::decode(previous);
    }
    Ok(())
}

/// Get the current mode of the page holding `address`.
///
/// Supported on Windows and Linux. Fails with `InvalidRange` if nothing is
/// mapped at `address`.
pub fn query(address: u64) -> Result<MemoryMode, Error> {
    sys::query(address).map(codec::decode)
}

/// Applies a protection mode to a range for as long as it lives, then puts
/// back the mode it was told to restore.
///
/// Call `restore` to put the mode back and learn whether that worked. A
/// guard which is only dropped, for example while unwinding, cannot report a
/// failed restore, so it is logged.
#[must_use]
#[derive(Debug)]
pub struct ProtectGuard {
    address: u64,
    size: u64,
    restore: MemoryMode,
}

impl ProtectGuard {
    /// Protect `[address, address + size)` as `mode` until the guard is
    /// dropped, then protect it as `restore`.
    ///
    /// # Safety
    ///
    /// The same as `protect`, for both `mode` and `restore`.
    pub unsafe fn new(
        address: u64,
        size: u64,
        mode: MemoryMode,
        restore: MemoryMode,
    ) -> Result<ProtectGuard, Error> {
        unsafe { protect(address, size, mode, None)? };
        Ok(ProtectGuard {
            address,
            size,
            restore,
        })
    }

    /// Get the mode this guard restores when dropped
    pub fn restore_mode(&self) -> MemoryMode {
        self.restore
    }

    /// Put back the mode this guard restores, consuming it.
    pub fn restore(self) -> Result<(), Error> {
        // SAFETY: the creator of the guard vouched for `restore`.
        let result = unsafe { protect(self.address, self.size, self.restore, None) };
        std::mem::forget(self);
        result
    }
}

impl Drop for ProtectGuard {
    fn drop(&mut self) {
        // SAFETY: the creator of the guard vouched for `restore`.
        if let Err(e) = unsafe { protect(self.address, self.size, self.restore, None) } {
            warn!(
                "Could not restore 0x{:x} bytes at 0x{:x} to {}: {}",
                self.size, self.address, self.restore, e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{allocate, deallocate};

    #[test]
    fn protect_rejects_empty_range() {
        assert!(matches!(
            unsafe { protect(0x1000, 0, MemoryMode::Read, None) },
            Err(Error::InvalidRange)
        ));
    }

    #[cfg(any(target_os = "linux", windows))]
    #[test]
    fn protect_reports_previous_mode() {
        let address = allocate(0, 0x1000, MemoryMode::ReadWrite).unwrap();

        unsafe { protect(address, 0x1000, MemoryMode::NoAccess, None).unwrap() };
        assert_eq!(query(address).unwrap(), MemoryMode::NoAccess);

        let mut old = MemoryMode::ExecuteReadWrite;
        unsafe { protect(address, 0x1000, MemoryMode::ReadWrite, Some(&mut old)).unwrap() };
        assert_eq!(old, MemoryMode::NoAccess);
        assert_eq!(query(address).unwrap(), MemoryMode::ReadWrite);

        // access is back
        unsafe {
            let ptr = address as usize as *mut u64;
            ptr.write(0x1122_3344_5566_7788);
            assert_eq!(ptr.read(), 0x1122_3344_5566_7788);
        }

        unsafe { deallocate(address, 0x1000).unwrap() };
    }

    #[cfg(any(target_os = "linux", windows))]
    #[test]
    fn protect_write_only_reads_back_read_write() {
        let address = allocate(0, 0x1000, MemoryMode::Read).unwrap();
        let mut old = MemoryMode::NoAccess;
        unsafe { protect(address, 0x1000, MemoryMode::Write, Some(&mut old)).unwrap() };
        assert_eq!(old, MemoryMode::Read);
        assert_eq!(query(address).unwrap(), MemoryMode::ReadWrite);
        unsafe { deallocate(address, 0x1000).unwrap() };
    }

    #[cfg(any(target_os = "linux", windows))]
    #[test]
    fn guard_restores_mode() {
        let address = allocate(0, 0x1000, MemoryMode::Read).unwrap();
        {
            let guard =
                unsafe { ProtectGuard::new(address, 0x1000, MemoryMode::ReadWrite, MemoryMode::Read) }
                    .unwrap();
            assert_eq!(guard.restore_mode(), MemoryMode::Read);
            assert_eq!(query(address).unwrap(), MemoryMode::ReadWrite);
            unsafe { (address as usize as *mut u8).write(0xcc) };
        }
        assert_eq!(query(address).unwrap(), MemoryMode::Read);
        assert_eq!(unsafe { (address as usize as *const u8).read() }, 0xcc);
        unsafe { deallocate(address, 0x1000).unwrap() };
    }

    #[cfg(any(target_os = "linux", windows))]
    #[test]
    fn guard_restore_explicitly() {
        let address = allocate(0, 0x1000, MemoryMode::ExecuteRead).unwrap();
        let guard = unsafe {
            ProtectGuard::new(
                address,
                0x1000,
                MemoryMode::ExecuteReadWrite,
                MemoryMode::ExecuteRead,
            )
        }
        .unwrap();
        assert_eq!(query(address).unwrap(), MemoryMode::ExecuteReadWrite);
        guard.restore().unwrap();
        assert_eq!(query(address).unwrap(), MemoryMode::ExecuteRead);
        unsafe { deallocate(address, 0x1000).unwrap() };
    }

    #[test]
    fn guard_restore_reports_failure() {
        // nothing is ever mapped at the null page
        let guard = ProtectGuard {
            address: 0,
            size: 0x1000,
            restore: MemoryMode::Read,
        };
        assert!(guard.restore().is_err());
    }

    #[cfg(any(target_os = "linux", windows))]
    #[test]
    fn query_unmapped_address() {
        assert!(matches!(query(0), Err(Error::InvalidRange)));
    }
}
