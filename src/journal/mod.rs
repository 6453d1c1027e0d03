//! Event journal
//!
//! Writes committed events to Parquet for offline analysis

mod parquet;

pub use self::parquet::{journal_schema, EventJournal, JournalReader, JournalRow};
