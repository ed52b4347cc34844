//! Document store layer
//!
//! SQLite persistence for the document collections: one table per
//! collection, each row holding the serde_json document plus the index
//! columns the load queries filter on.

pub mod init;
pub mod store;

pub use store::{DocQuery, DocStore, StoreDoc};
