//! Instruction cache synchronization.
//!
//! After bytes are written to memory which will be executed, the CPU may
//! still fetch stale instructions for that range. `flush` must run after the
//! write and before any thread executes the new code.
//!
//! x86 keeps instruction fetch coherent with data writes, so `flush` does
//! nothing there except on Windows, where `FlushInstructionCache` is always
//! called.

use crate::{sys, Error};
use log::trace;

/// Make the bytes written to `[address, address + size)` visible to
/// instruction fetch.
///
/// # Safety
///
/// The range must be mapped.
pub unsafe fn flush(address: u64, size: u64) -> Result<(), Error> {
    if size == 0 {
        return Ok(());
    }
    if address.checked_add(size).is_none() {
        return Err(Error::InvalidRange);
    }
    let length = usize::try_from(size).map_err(|_| Error::InvalidRange)?;

    trace!("Flushing instruction cache 0x{:x}..0x{:x}", address, address + size);
    unsafe { sys::flush_icache(address, length) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::{allocate, deallocate};
    use crate::memory::MemoryMode;

    #[test]
    fn flush_executable_range() {
        let address = allocate(0, 4096, MemoryMode::ExecuteReadWrite).unwrap();
        unsafe {
            flush(address, 4096).unwrap();
            flush(address + 8, 8).unwrap();
            deallocate(address, 4096).unwrap();
        }
    }

    #[test]
    fn flush_empty_range_is_a_no_op() {
        unsafe { flush(0, 0).unwrap() };
    }

    #[test]
    fn flush_rejects_wrapping_range() {
        assert!(matches!(
            unsafe { flush(u64::MAX, 2) },
            Err(Error::InvalidRange)
        ));
    }
}
