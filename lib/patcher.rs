//! Hot-patching single words of live memory.
//!
//! A patch overwrites one 8-byte word, possibly while other threads execute
//! the code around it. Naturally aligned words are swapped atomically, so a
//! concurrent reader sees either the old or the new word. Unaligned words
//! have no such guarantee; callers patching code that is running must keep
//! their patch sites aligned.
//!
//! On hosts which enforce write-xor-execute per thread (Apple silicon
//! `MAP_JIT` memory), every store is bracketed by a `WriteProtectGuard`.

use crate::icache;
use crate::memory::MemoryMode;
use crate::page::page_span;
use crate::protector::ProtectGuard;
use crate::{sys, Error};
use log::trace;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// The size of a patched word in bytes.
pub const WORD_SIZE: u64 = 8;

thread_local! {
    static WRITE_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Lifts write-xor-execute enforcement for the calling thread while it
/// lives.
///
/// Guards nest: enforcement is lifted by the first guard on a thread and
/// restored when the last one drops. Other threads are never affected, which
/// is why the guard cannot be sent between threads. On hosts without such
/// enforcement this does nothing.
///
/// The host offers no way to read the thread's current setting, so the last
/// guard to drop always turns enforcement back on, even if the thread had it
/// off before the first guard. Threads which manage the setting themselves
/// must switch it off again after using a guard.
#[must_use]
#[derive(Debug)]
pub struct WriteProtectGuard {
    _thread: PhantomData<*const ()>,
}

impl WriteProtectGuard {
    pub fn acquire() -> WriteProtectGuard {
        WRITE_DEPTH.with(|depth| {
            if depth.get() == 0 {
                sys::jit_write_protect(false);
            }
            depth.set(depth.get() + 1);
        });
        WriteProtectGuard {
            _thread: PhantomData,
        }
    }

    /// Returns `true` if a guard is live on the calling thread.
    pub fn is_held() -> bool {
        WRITE_DEPTH.with(|depth| depth.get() > 0)
    }
}

impl Drop for WriteProtectGuard {
    fn drop(&mut self) {
        WRITE_DEPTH.with(|depth| {
            let remaining = depth.get() - 1;
            depth.set(remaining);
            if remaining == 0 {
                sys::jit_write_protect(true);
            }
        });
    }
}

/// Store `value` at `address` and return the word it replaced.
///
/// # Safety
///
/// `[address, address + 8)` must be mapped and writable.
unsafe fn store(address: u64, value: u64) -> u64 {
    let _guard = WriteProtectGuard::acquire();
    let ptr = address as usize as *mut u64;
    if address % WORD_SIZE == 0 {
        let word = unsafe { AtomicU64::from_ptr(ptr) };
        word.swap(value, Ordering::AcqRel)
    } else {
        let old = unsafe { ptr.read_unaligned() };
        unsafe { ptr.write_unaligned(value) };
        old
    }
}

fn check_word(address: u64) -> Result<(), Error> {
    match address.checked_add(WORD_SIZE) {
        Some(_) if address != 0 => Ok(()),
        _ => Err(Error::InvalidRange),
    }
}

/// Overwrite the 8-byte word at `address` with `value`.
///
/// Returns `true` if the word changed. A changed word is flushed from the
/// instruction cache, since this function has no record of whether the
/// memory is executable.
///
/// # Safety
///
/// `[address, address + 8)` must be mapped and already writable. Patching
/// memory the host will not let this thread write is a fatal fault, not an
/// error. Use `patch_protected` to patch memory that is not writable.
pub unsafe fn patch(address: u64, value: u64) -> Result<bool, Error> {
    check_word(address)?;

    let old = unsafe { store(address, value) };
    let changed = old != value;
    trace!("Patched 0x{:x}: 0x{:x} -> 0x{:x}", address, old, value);

    if changed {
        unsafe { icache::flush(address, WORD_SIZE)? };
    }
    Ok(changed)
}

/// Overwrite the 8-byte word at `address` with `value`, lifting write
/// protection around the store when `mode` lacks it.
///
/// `mode` is the caller's record of the mode currently applied to the pages
/// holding the word. If it is not writable, those pages are switched to
/// `mode.with_write()` for the store and back to `mode` right after. If
/// `mode` contains execute, the word is flushed from the instruction cache.
///
/// Returns `true` if the word changed. If `mode` cannot be put back after the
/// store, that error is returned and the pages may be left as
/// `mode.with_write()`.
///
/// # Safety
///
/// `[address, address + 8)` must be mapped with protection `mode`, and every
/// page it touches must be protected as `mode`. No other thread may change
/// the protection of those pages during the call.
pub unsafe fn patch_protected(address: u64, value: u64, mode: MemoryMode) -> Result<bool, Error> {
    check_word(address)?;

    let old = if mode.is_writable() {
        unsafe { store(address, value) }
    } else {
        let (start, size) = page_span(address, WORD_SIZE);
        let relaxed = unsafe { ProtectGuard::new(start, size, mode.with_write(), mode)? };
        let old = unsafe { store(address, value) };
        relaxed.restore()?;
        old
    };
    let changed = old != value;
    trace!(
        "Patched 0x{:x} ({}): 0x{:x} -> 0x{:x}",
        address,
        mode,
        old,
        value
    );

    if mode.contains_execute() {
        unsafe { icache::flush(address, WORD_SIZE)? };
    }
    Ok(changed)
}
