//! Snapshot persistence for the matching engine
//!
//! A framed, checksummed byte codec for engine snapshots plus a
//! directory-backed store with atomic writes. Reloading a snapshot and
//! replaying the same request sequence reproduces identical trades and
//! book state; the `state_hash` helper exists to assert exactly that.

pub mod codec;
pub mod store;

pub use codec::{decode, encode, state_hash, CodecError, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
pub use store::{SnapshotStore, StoreError};
