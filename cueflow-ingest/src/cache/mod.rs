//! Optimistic-diff persistence caches
//!
//! The unit-of-work pattern: load a query result once, mutate the
//! in-memory copy with dirty tracking, then persist only the net change.
//! Nothing touches the document store until a save is requested, so a
//! rejected operation leaves no partial state behind.

pub mod changes;
pub mod collection;
pub mod doc;
pub mod object;

pub use changes::{changes_for, diff_docs, ChangeTracker, DocDiff, DocumentChanges, WriteOp};
pub use collection::{ReadCollection, WriteCollection};
pub use doc::{docs_equal, CacheDoc};
pub use object::WriteOptionalObject;
