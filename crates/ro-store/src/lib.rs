//! # ro-store
//!
//! Durable, lock-free storage of immutable result records for randopt.
//!
//! Every record is one JSON file under `<root>/<experiment>/`. Any number of
//! workers may append concurrently; readers scan the directory and skip files
//! they cannot parse (for example a record caught mid-write).

pub mod aggregate;
pub mod config;
pub mod objectives;
pub mod query;
pub mod record;
pub mod store;

pub use aggregate::{FieldStat, RecordList};
pub use config::StoreConfig;
pub use record::{Record, RecordId};
pub use store::{RecordDraft, RecordStore, Scan, ScanStats, ATTACHMENT_DIR};
