//! Record locators
//!
//! A [`RecordLocator`] names a physical record slot. It is a handle, not a
//! pointer: the record store resolves it by slot index and checks the
//! generation, so a locator whose record was freed or relocated resolves to
//! nothing instead of to whatever now occupies the slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Physical address of a stored document
///
/// Validity is bounded by the most recent yield or mutation of the owning
/// collection. Holders must revalidate through the store before use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordLocator {
    slot: u32,
    generation: u32,
}

impl RecordLocator {
    /// Create a locator for a slot at a given generation
    pub fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Slot index in the record store
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Generation of the slot when this locator was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for RecordLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.slot, self.generation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_equality_includes_generation() {
        assert_eq!(RecordLocator::new(4, 0), RecordLocator::new(4, 0));
        assert_ne!(RecordLocator::new(4, 0), RecordLocator::new(4, 1));
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(RecordLocator::new(12, 3).to_string(), "12:3");
    }
}
