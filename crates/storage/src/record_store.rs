//! RecordStore: slot-addressed record heap with relocation
//!
//! Records live in a vector of slots. Each slot carries a generation that is
//! bumped when its record is freed, so a [`RecordLocator`] issued for an
//! earlier occupant no longer resolves.
//!
//! # Design Notes
//!
//! - **Padding**: a record is allocated `encoded_len * padding_factor` bytes of
//!   capacity. A rewrite that fits the capacity stays in its slot.
//! - **Relocation**: a rewrite that does not fit frees the slot and appends a
//!   new one at the end. Freed slots are not reused, so a relocated record
//!   always lands *after* every live slot, where a forward scan will meet it
//!   again.
//! - **Residency**: each record has a resident flag standing in for "its page
//!   is in physical memory". `evict` clears it, `touch` sets it.

use pagoda_core::{Error, RecordLocator, Result};

/// One stored record
#[derive(Debug, Clone)]
struct Record {
    bytes: Vec<u8>,
    capacity: usize,
    resident: bool,
}

#[derive(Debug, Clone, Default)]
struct Slot {
    generation: u32,
    record: Option<Record>,
}

/// Outcome of a rewrite
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Record was rewritten in its existing slot
    Stayed(RecordLocator),
    /// Record did not fit and moved to a new slot
    Moved {
        /// Locator before the write (now stale)
        from: RecordLocator,
        /// Locator after the write
        to: RecordLocator,
    },
}

impl WriteOutcome {
    /// Locator of the record after the write
    pub fn locator(&self) -> RecordLocator {
        match self {
            WriteOutcome::Stayed(loc) => *loc,
            WriteOutcome::Moved { to, .. } => *to,
        }
    }
}

/// Slot-addressed record heap
#[derive(Debug)]
pub struct RecordStore {
    slots: Vec<Slot>,
    padding_factor: f64,
    live: usize,
    moves: u64,
}

impl RecordStore {
    /// Create an empty store
    ///
    /// `padding_factor` below 1.0 is clamped to 1.0.
    pub fn new(padding_factor: f64) -> Self {
        Self {
            slots: Vec::new(),
            padding_factor: padding_factor.max(1.0),
            live: 0,
            moves: 0,
        }
    }

    fn capacity_for(&self, len: usize) -> usize {
        ((len as f64) * self.padding_factor).ceil() as usize
    }

    fn record(&self, loc: RecordLocator) -> Option<&Record> {
        let slot = self.slots.get(loc.slot() as usize)?;
        if slot.generation != loc.generation() {
            return None;
        }
        slot.record.as_ref()
    }

    fn record_mut(&mut self, loc: RecordLocator) -> Result<&mut Record> {
        self.slots
            .get_mut(loc.slot() as usize)
            .filter(|slot| slot.generation == loc.generation())
            .and_then(|slot| slot.record.as_mut())
            .ok_or(Error::StaleLocator(loc))
    }

    /// Append a record in a new slot
    pub fn insert(&mut self, bytes: Vec<u8>) -> Result<RecordLocator> {
        let slot_index = u32::try_from(self.slots.len())
            .map_err(|_| Error::StorageError("record store is full".to_string()))?;
        let capacity = self.capacity_for(bytes.len());
        self.slots.push(Slot {
            generation: 0,
            record: Some(Record {
                bytes,
                capacity,
                resident: true,
            }),
        });
        self.live += 1;
        Ok(RecordLocator::new(slot_index, 0))
    }

    /// Bytes of a live record
    pub fn get(&self, loc: RecordLocator) -> Option<&[u8]> {
        self.record(loc).map(|r| r.bytes.as_slice())
    }

    /// True if the locator names a live record
    pub fn contains(&self, loc: RecordLocator) -> bool {
        self.record(loc).is_some()
    }

    /// Overwrite a record's bytes keeping its size and slot
    ///
    /// # Errors
    ///
    /// Fails with `StorageError` if the new bytes differ in length.
    pub fn write_in_place(&mut self, loc: RecordLocator, bytes: &[u8]) -> Result<()> {
        let record = self.record_mut(loc)?;
        if record.bytes.len() != bytes.len() {
            return Err(Error::StorageError(format!(
                "in-place write of {} bytes over a {} byte record",
                bytes.len(),
                record.bytes.len()
            )));
        }
        record.bytes.copy_from_slice(bytes);
        Ok(())
    }

    /// Rewrite a record, moving it to a new slot if it outgrew its capacity
    pub fn update(&mut self, loc: RecordLocator, bytes: Vec<u8>) -> Result<WriteOutcome> {
        let record = self.record_mut(loc)?;
        if bytes.len() <= record.capacity {
            record.bytes = bytes;
            return Ok(WriteOutcome::Stayed(loc));
        }
        self.free(loc)?;
        let to = self.insert(bytes)?;
        self.moves += 1;
        Ok(WriteOutcome::Moved { from: loc, to })
    }

    /// Remove a record, returning its bytes
    pub fn remove(&mut self, loc: RecordLocator) -> Result<Vec<u8>> {
        self.free(loc)
    }

    fn free(&mut self, loc: RecordLocator) -> Result<Vec<u8>> {
        let slot = self
            .slots
            .get_mut(loc.slot() as usize)
            .filter(|slot| slot.generation == loc.generation())
            .ok_or(Error::StaleLocator(loc))?;
        let record = slot.record.take().ok_or(Error::StaleLocator(loc))?;
        slot.generation = slot.generation.wrapping_add(1);
        self.live -= 1;
        Ok(record.bytes)
    }

    /// First live record in a slot strictly after `after` (or from the start)
    pub fn next_live(&self, after: Option<u32>) -> Option<RecordLocator> {
        let start = after.map_or(0, |s| s as usize + 1);
        self.slots
            .iter()
            .enumerate()
            .skip(start)
            .find(|(_, slot)| slot.record.is_some())
            .map(|(i, slot)| RecordLocator::new(i as u32, slot.generation))
    }

    /// Locators of all live records in slot order
    pub fn locators(&self) -> Vec<RecordLocator> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.record.is_some())
            .map(|(i, slot)| RecordLocator::new(i as u32, slot.generation))
            .collect()
    }

    /// True if the record is resident (stale locators count as resident)
    pub fn is_resident(&self, loc: RecordLocator) -> bool {
        self.record(loc).map_or(true, |r| r.resident)
    }

    /// Mark a record resident
    pub fn touch(&mut self, loc: RecordLocator) {
        if let Ok(record) = self.record_mut(loc) {
            record.resident = true;
        }
    }

    /// Mark a record not resident
    pub fn evict(&mut self, loc: RecordLocator) {
        if let Ok(record) = self.record_mut(loc) {
            record.resident = false;
        }
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.live
    }

    /// True if no records are live
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of relocations performed
    pub fn moves(&self) -> u64 {
        self.moves
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new(1.0)
    }
}
