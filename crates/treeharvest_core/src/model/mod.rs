//! Record model for the linked-data catalog.
//!
//! # Responsibility
//! - Define the storage read models consumed by tree assembly.
//! - Keep timestamps in one representation (epoch milliseconds, UTC).
//!
//! # Invariants
//! - Record ids are opaque strings owned by the catalog.
//! - Deletion is a tombstone flag; deleted records remain harvestable.

pub mod record;
