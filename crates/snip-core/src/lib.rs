//! Core types and traits for the snip URL shortener.
//!
//! This crate provides the storage contract shared by every backend, the
//! error taxonomy, the base62 alphabet used for short keys, and the channel
//! plumbing used by batch deletion.

pub mod base62;
pub mod error;
pub mod pipeline;
pub mod storage;

pub use error::{Result, StorageError};
pub use pipeline::{DeleteReceiver, DeleteRequest, DeleteSender};
pub use storage::{BatchEntry, Storage, StorageStats, UrlRecord};
