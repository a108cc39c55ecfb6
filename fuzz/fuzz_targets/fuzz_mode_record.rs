//! Fuzz target: `ModeRecord` decoding and the record arena
//!
//! Feeds arbitrary bytes to the postcard decoder, then plants them as a
//! stored record and reopens the arena, verifying:
//! - No panics under arbitrary byte inputs
//! - Anything that decodes re-encodes to an equal record
//! - A corrupted slot is skipped, never returned as garbage
//!
//! cargo fuzz run fuzz_mode_record

#![no_main]

use apscore::adapters::mem_store::MemStore;
use apscore::app::ports::StoragePort;
use apscore::mode::{ModeHistory, ModeRecord, StorageModeHistory};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(record) = ModeRecord::from_bytes(data) {
        let bytes = record.to_bytes().expect("decoded record re-encodes");
        assert_eq!(ModeRecord::from_bytes(&bytes).ok(), Some(record));
    }

    let mut store = MemStore::new();
    let _ = store.write("modes", "r0", data);
    let _ = store.write("modes", "head", &1u32.to_le_bytes());
    let history = StorageModeHistory::open(store);
    match (history.get(0), ModeRecord::from_bytes(data)) {
        (Some(stored), Ok(decoded)) => assert_eq!(stored, decoded),
        (None, _) => {}
        (Some(stored), Err(_)) => panic!("corrupted slot returned {stored:?}"),
    }
});
