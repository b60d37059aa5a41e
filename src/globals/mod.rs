// SPDX-License-Identifier: MIT OR Apache-2.0

//! The fixed 256-slot global array.


use crate::error::VmError;
use crate::value::Value;

/// Number of addressable global slots (one byte indexes them).
pub const GLOBAL_COUNT: usize = 256;

/// Fixed global-variable array, each slot tracking whether it has been set.
pub struct Globals {
    slots: Box<[Option<Value>; GLOBAL_COUNT]>,
}

impl Default for Globals {
    fn default() -> Self {
        Self::new()
    }
}

impl Globals {
    /// Create an array of 256 unset globals.
    #[must_use]
    pub fn new() -> Self {
        Self { slots: Box::new([None; GLOBAL_COUNT]) }
    }

    /// Write a global, marking it present.
    pub fn set(&mut self, index: u8, value: Value) {
        self.slots[index as usize] = Some(value);
    }

    /// Read a global, failing with `UndefinedGlobal` if never set.
    pub fn get(&self, index: u8) -> Result<Value, VmError> {
        self.slots[index as usize].ok_or(VmError::UndefinedGlobal(index))
    }
}
