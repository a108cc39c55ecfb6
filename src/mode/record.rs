//! Append-only history of operating-mode transitions.
//!
//! Each accepted transition produces one [`ModeRecord`]. Records are never
//! mutated; a later record corrects an earlier one by pointing at it with
//! `reference_id`. Records are stored postcard-encoded in the `modes`
//! namespace of a [`StoragePort`]:
//!
//! ```text
//!  modes/head ──▶ next id (u32 LE)
//!  modes/r0   ──▶ ModeRecord { id: 0, .. }
//!  modes/r1   ──▶ ModeRecord { id: 1, reference_id: Some(0), .. }
//! ```

use core::fmt::Write as _;

use serde::{Deserialize, Serialize};

use crate::app::ports::{StorageError, StoragePort};

use super::OperatingMode;

const NAMESPACE: &str = "modes";
const HEAD_KEY: &str = "head";
/// Room for the reasons string.
pub const REASON_CAPACITY: usize = 96;
const RECORD_BUF: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeRecord {
    pub id: u32,
    pub timestamp_ms: i64,
    pub utc_offset_ms: i64,
    pub mode: OperatingMode,
    /// 0 for non-temporary modes.
    pub planned_duration_ms: i64,
    /// Set by the system rather than a person.
    pub auto_forced: bool,
    pub reasons: heapless::String<REASON_CAPACITY>,
    /// A dangling record from an earlier failed write that this one supersedes.
    pub reference_id: Option<u32>,
}

impl ModeRecord {
    /// End of the planned duration, for temporary modes.
    pub fn end_ms(&self) -> Option<i64> {
        self.mode
            .must_be_temporary()
            .then_some(self.timestamp_ms + self.planned_duration_ms)
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.end_ms().is_some_and(|end| now_ms >= end)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        postcard::to_allocvec(self).map_err(|_| StorageError::Corrupted)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        postcard::from_bytes(bytes).map_err(|_| StorageError::Corrupted)
    }
}

/// Truncate `text` on a character boundary to fit the reasons field.
pub fn reasons_from(text: &str) -> heapless::String<REASON_CAPACITY> {
    let mut out = heapless::String::new();
    for ch in text.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

/// Arena of mode records with monotonically increasing ids.
pub trait ModeHistory {
    /// Reserve the next id. Ids are never reused, even when the write
    /// that follows fails.
    fn allocate_id(&mut self) -> u32;

    fn append(&mut self, record: &ModeRecord) -> Result<(), StorageError>;

    fn get(&self, id: u32) -> Option<ModeRecord>;

    /// Most recent stored record.
    fn latest(&self) -> Option<ModeRecord>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// [`ModeHistory`] over a [`StoragePort`].
pub struct StorageModeHistory<S: StoragePort> {
    store: S,
    next_id: u32,
}

impl<S: StoragePort> StorageModeHistory<S> {
    /// Open the arena, resuming id allocation after the stored head.
    pub fn open(store: S) -> Self {
        let mut buf = [0u8; 4];
        let next_id = match store.read(NAMESPACE, HEAD_KEY, &mut buf) {
            Ok(4) => u32::from_le_bytes(buf),
            _ => 0,
        };
        Self { store, next_id }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Every stored record, oldest first.
    pub fn records(&self) -> Vec<ModeRecord> {
        (0..self.next_id).filter_map(|id| self.get(id)).collect()
    }

    fn record_key(id: u32) -> heapless::String<16> {
        let mut s = heapless::String::new();
        let _ = write!(s, "r{}", id);
        s
    }
}

impl<S: StoragePort> ModeHistory for StorageModeHistory<S> {
    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        id
    }

    /// Head first, then the record: a failure at either step leaves no
    /// record behind and the id stays consumed after reopening.
    fn append(&mut self, record: &ModeRecord) -> Result<(), StorageError> {
        let bytes = record.to_bytes()?;
        self.store
            .write(NAMESPACE, HEAD_KEY, &self.next_id.to_le_bytes())?;
        self.store
            .write(NAMESPACE, &Self::record_key(record.id), &bytes)
    }

    fn get(&self, id: u32) -> Option<ModeRecord> {
        let mut buf = [0u8; RECORD_BUF];
        let len = self
            .store
            .read(NAMESPACE, &Self::record_key(id), &mut buf)
            .ok()?;
        ModeRecord::from_bytes(&buf[..len]).ok()
    }

    fn latest(&self) -> Option<ModeRecord> {
        (0..self.next_id).rev().find_map(|id| self.get(id))
    }

    fn len(&self) -> usize {
        (0..self.next_id)
            .filter(|id| self.store.exists(NAMESPACE, &Self::record_key(*id)))
            .count()
    }
}
