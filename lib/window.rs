//! The user address window searched by aligned allocations.

use crate::Error;
use serde::{Deserialize, Serialize};

/// The lowest address aligned allocations search from by default.
pub const USER_MIN: u64 = 0x0000_0000_0001_0000;

/// The end of the default search window, exclusive. This is the top of the
/// 47-bit user address space, less the guard region hosts keep below it.
pub const USER_MAX: u64 = 0x0000_7fff_ffff_0000;

/// A `[min, max)` window of user address space in which aligned
/// allocations are placed.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct AddressWindow {
    min: u64,
    max: u64,
}

impl AddressWindow {
    /// Create a new window. Fails with `InvalidRange` if `min >= max`.
    pub fn new(min: u64, max: u64) -> Result<AddressWindow, Error> {
        AddressWindow { min, max }.validate()
    }

    /// Parse a window from json. Fields which are not given keep their
    /// defaults.
    ///
    /// ```
    /// let window = vmem::AddressWindow::from_json(r#"{"min": 1048576}"#).unwrap();
    /// assert_eq!(window.min(), 0x10_0000);
    /// assert_eq!(window.max(), vmem::window::USER_MAX);
    /// ```
    pub fn from_json(json: &str) -> Result<AddressWindow, Error> {
        let window: AddressWindow = serde_json::from_str(json)?;
        window.validate()
    }

    /// Get the lowest address of this window
    pub fn min(&self) -> u64 {
        self.min
    }

    /// Get the end of this window, exclusive
    pub fn max(&self) -> u64 {
        self.max
    }

    /// Set the lowest address of this window
    pub fn with_min(mut self, min: u64) -> Result<AddressWindow, Error> {
        self.min = min;
        self.validate()
    }

    /// Set the end of this window
    pub fn with_max(mut self, max: u64) -> Result<AddressWindow, Error> {
        self.max = max;
        self.validate()
    }

    /// Returns `true` if `[address, address + size)` lies inside this window.
    pub fn contains(&self, address: u64, size: u64) -> bool {
        match address.checked_add(size) {
            Some(end) => address >= self.min && end <= self.max,
            None => false,
        }
    }

    fn validate(self) -> Result<AddressWindow, Error> {
        if self.min >= self.max {
            return Err(Error::InvalidRange);
        }
        Ok(self)
    }
}

impl Default for AddressWindow {
    fn default() -> AddressWindow {
        AddressWindow {
            min: USER_MIN,
            max: USER_MAX,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_window() {
        let window = AddressWindow::default();
        assert_eq!(window.min(), USER_MIN);
        assert_eq!(window.max(), USER_MAX);
        assert!(window.contains(USER_MIN, 0x1000));
        assert!(!window.contains(USER_MAX - 0x1000, 0x2000));
        assert!(!window.contains(u64::MAX, 2));
    }

    #[test]
    fn rejects_empty_window() {
        assert!(matches!(
            AddressWindow::new(0x2000, 0x1000),
            Err(Error::InvalidRange)
        ));
        assert!(matches!(
            AddressWindow::default().with_max(USER_MIN),
            Err(Error::InvalidRange)
        ));
    }

    #[test]
    fn json_window() {
        let window =
            AddressWindow::from_json(r#"{"min": 268435456, "max": 1099511627776}"#).unwrap();
        assert_eq!(window, AddressWindow::new(0x1000_0000, 0x100_0000_0000).unwrap());

        let window = AddressWindow::from_json("{}").unwrap();
        assert_eq!(window, AddressWindow::default());

        assert!(matches!(
            AddressWindow::from_json(r#"{"min": "low"}"#),
            Err(Error::Json(_))
        ));
        assert!(matches!(
            AddressWindow::from_json(r#"{"min": 16, "max": 16}"#),
            Err(Error::InvalidRange)
        ));
    }

    #[test]
    fn json_round_trip() {
        let window = AddressWindow::new(0x10_0000, 0x1000_0000).unwrap();
        let json = serde_json::to_string(&window).unwrap();
        assert_eq!(AddressWindow::from_json(&json).unwrap(), window);
    }
}
