//! Record-tree assembly and merge.
//!
//! # Responsibility
//! - Expand a root record into the tree of records it links to.
//! - Bound the expansion with a visited set and the authority guard.
//! - Merge a tree into one exportable JSON-LD document.
//! - Decide tree membership in a modification window.
//!
//! # Invariants
//! - A record id is included at most once per tree.
//! - Node order is depth-first pre-order of first discovery, root first.
//! - Modification bounds only reflect records included in the tree.

pub mod builder;
pub mod links;
pub mod merge;
pub mod window;

pub use builder::{ModificationBounds, RecordTree, TreeBuilder, TreeError, TreeResult};
pub use merge::{merge, MergedDocument};
pub use window::{format_datestamp, ModificationWindow, WindowError};
