//! vmem: virtual memory control for runtime code generators.
//!
//! JITs and emulators which generate machine code at runtime need a small,
//! fixed set of virtual memory primitives, with the same meaning on every
//! host:
//!
//! * Reserve and commit memory with a protection mode, optionally aligned
//!   and inside a window of the user address space. See `allocator`.
//! * Change the protection of memory they own. See `protector`.
//! * Make freshly written code visible to instruction fetch. See `icache`.
//! * Patch one 8-byte word of live memory in place. See `patcher`.
//!
//! Protection is always described with `MemoryMode`, which `memory::codec`
//! translates to and from the host's native values. `memory::Region` ties
//! these together in a handle which owns its memory and releases it when
//! dropped.
//!
//! Every failure is returned as an `Error`, and the native error code behind
//! it is logged through the `log` crate. vmem never installs a logger.
//!
//! ```
//! use vmem::{MemoryMode, Region};
//!
//! let mut region = Region::allocate(4096, MemoryMode::ReadWrite).unwrap();
//! region.write(0, &[0xc3]).unwrap();
//! assert!(region.patch(8, 0x1122_3344_5566_7788).unwrap());
//! let old = region.protect(MemoryMode::ExecuteRead).unwrap();
//! assert_eq!(old, MemoryMode::ReadWrite);
//! ```

pub mod allocator;
mod error;
pub mod icache;
pub mod memory;
pub mod page;
pub mod patcher;
pub mod protector;
mod sys;
#[cfg(test)]
mod tests;
pub mod window;

pub use crate::allocator::{allocate, allocate_aligned, allocate_aligned_in, deallocate};
pub use crate::error::Error;
pub use crate::icache::flush;
pub use crate::memory::codec::NativeProtection;
pub use crate::memory::{MemoryMode, MemoryPermissions, Region};
pub use crate::patcher::{patch, patch_protected, WriteProtectGuard};
pub use crate::protector::{protect, query, ProtectGuard};
pub use crate::window::AddressWindow;
