//! vbatch-state: persistence layer for vbatch
//!
//! Everything vbatch keeps between processes goes through one narrow
//! interface, [`StateStore`]: JSON documents addressed by slash-separated keys.
//!
//! ## Key Components
//!
//! - `StateStore`: async `get`/`set`/`keys` over JSON values
//! - `FileStateStore`: production backend, one `<key>.json` file per key,
//!   written atomically
//! - `fakes::MemoryStateStore`: in-memory backend for tests
//!
//! Typed access goes through [`load`] and [`save`].

mod error;
pub mod fakes;
pub mod file_store;
pub mod store;

pub use error::StorageError;
pub use file_store::FileStateStore;
pub use store::{load, save, validate_key, StateStore, StorageResult};
