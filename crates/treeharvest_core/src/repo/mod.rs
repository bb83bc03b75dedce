//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the read contracts tree assembly consumes: point lookup,
//!   identifier resolution, candidate scan and scoped store acquisition.
//! - Isolate SQLite query details from traversal and emission.
//!
//! # Invariants
//! - Repository APIs report absence as `None`, never as an error.
//! - Only transport failures and corrupt persisted state are errors.

pub mod record_repo;
