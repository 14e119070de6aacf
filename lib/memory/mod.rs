//! Protection modes and owned regions of host memory.
//!
//! vmem describes page protection with a single abstract vocabulary,
//! `MemoryMode`, independent of how the host encodes it. The `codec` module
//! maps that vocabulary onto the host's native protection values, and
//! `Region` owns a mapping for as long as it lives.
//!
//! Write-only protection does not exist on the supported hosts. `Write`
//! behaves exactly like `ReadWrite`, and `ExecuteWrite` exactly like
//! `ExecuteReadWrite`. `MemoryMode::canonical` makes that collapse explicit.

pub mod codec;
pub mod region;

pub use self::region::Region;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// RWX permissions for memory.
    #[derive(Deserialize, Serialize)]
    pub struct MemoryPermissions: u32 {
        const NONE    = 0b000;
        const READ    = 0b001;
        const WRITE   = 0b010;
        const EXECUTE = 0b100;
        const ALL     = 0b111;
    }
}

/// An abstract protection mode for a range of memory.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum MemoryMode {
    #[default]
    NoAccess,
    Read,
    Write,
    ReadWrite,
    Execute,
    ExecuteRead,
    ExecuteWrite,
    ExecuteReadWrite,
}

impl MemoryMode {
    /// Every protection mode, including the ones which collapse.
    pub const ALL: [MemoryMode; 8] = [
        MemoryMode::NoAccess,
        MemoryMode::Read,
        MemoryMode::Write,
        MemoryMode::ReadWrite,
        MemoryMode::Execute,
        MemoryMode::ExecuteRead,
        MemoryMode::ExecuteWrite,
        MemoryMode::ExecuteReadWrite,
    ];

    /// Get the RWX permissions this mode asks for.
    pub fn permissions(self) -> MemoryPermissions {
        match self {
            MemoryMode::NoAccess => MemoryPermissions::NONE,
            MemoryMode::Read => MemoryPermissions::READ,
            MemoryMode::Write => MemoryPermissions::WRITE,
            MemoryMode::ReadWrite => MemoryPermissions::READ | MemoryPermissions::WRITE,
            MemoryMode::Execute => MemoryPermissions::EXECUTE,
            MemoryMode::ExecuteRead => MemoryPermissions::EXECUTE | MemoryPermissions::READ,
            MemoryMode::ExecuteWrite => MemoryPermissions::EXECUTE | MemoryPermissions::WRITE,
            MemoryMode::ExecuteReadWrite => MemoryPermissions::ALL,
        }
    }

    /// Create the mode matching a set of RWX permissions exactly.
    pub fn from_permissions(permissions: MemoryPermissions) -> MemoryMode {
        let read = permissions.contains(MemoryPermissions::READ);
        let write = permissions.contains(MemoryPermissions::WRITE);
        let execute = permissions.contains(MemoryPermissions::EXECUTE);
        match (execute, read, write) {
            (false, false, false) => MemoryMode::NoAccess,
            (false, true, false) => MemoryMode::Read,
            (false, false, true) => MemoryMode::Write,
            (false, true, true) => MemoryMode::ReadWrite,
            (true, false, false) => MemoryMode::Execute,
            (true, true, false) => MemoryMode::ExecuteRead,
            (true, false, true) => MemoryMode::ExecuteWrite,
            (true, true, true) => MemoryMode::ExecuteReadWrite,
        }
    }

    /// The representative of this mode's equivalence class.
    ///
    /// Write-only modes are granted read access as well, since no supported
    /// host can express them.
    pub fn canonical(self) -> MemoryMode {
        match self {
            MemoryMode::Write => MemoryMode::ReadWrite,
            MemoryMode::ExecuteWrite => MemoryMode::ExecuteReadWrite,
            mode => mode,
        }
    }

    /// Returns `true` if both modes produce the same host protection.
    pub fn is_equivalent(self, other: MemoryMode) -> bool {
        self.canonical() == other.canonical()
    }

    /// Returns `true` if memory in this mode can be read.
    ///
    /// Write-only modes collapse to their readable counterparts, so they
    /// count as readable.
    pub fn is_readable(self) -> bool {
        self.canonical()
            .permissions()
            .contains(MemoryPermissions::READ)
    }

    pub fn is_writable(self) -> bool {
        self.permissions().contains(MemoryPermissions::WRITE)
    }

    /// Returns `true` if memory in this mode can be executed, and therefore
    /// needs an instruction cache flush after it is written.
    pub fn contains_execute(self) -> bool {
        self.permissions().contains(MemoryPermissions::EXECUTE)
    }

    /// This mode with write access added.
    pub fn with_write(self) -> MemoryMode {
        MemoryMode::from_permissions(self.permissions() | MemoryPermissions::WRITE).canonical()
    }
}

impl From<MemoryMode> for MemoryPermissions {
    fn from(mode: MemoryMode) -> MemoryPermissions {
        mode.permissions()
    }
}

impl From<MemoryPermissions> for MemoryMode {
    fn from(permissions: MemoryPermissions) -> MemoryMode {
        MemoryMode::from_permissions(permissions)
    }
}

impl fmt::Display for MemoryMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let permissions = self.permissions();
        write!(
            f,
            "{}{}{}",
            if permissions.contains(MemoryPermissions::READ) {
                "r"
            } else {
                "-"
            },
            if permissions.contains(MemoryPermissions::WRITE) {
                "w"
            } else {
                "-"
            },
            if permissions.contains(MemoryPermissions::EXECUTE) {
                "x"
            } else {
                "-"
            }
        )
    }
}
