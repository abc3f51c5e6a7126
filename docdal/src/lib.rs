//! Main docdal crate: a data access layer for document stores.
//!
//! This crate is the primary entry point. It re-exports the core types from the sub-crates and
//! provides access to the storage backends.
//!
//! # Features
//!
//! - **One facade** - [`DataAccess`](access::DataAccess) covers listing, existence checks,
//!   paginated reads, counts, index management and conditional writes
//! - **Cursor pooling** - Consecutive page requests reuse live cursors instead of re-scanning
//! - **Optimistic concurrency** - Properties writes are checked against entity tags atomically
//! - **Multiple backends** - In-memory and MongoDB storage behind the same trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docdal::{prelude::*, memory::InMemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = DataAccessConfig::load_from("docdal.toml")?;
//!     let access = DataAccess::with_config(InMemoryStore::new(), config);
//!
//!     // create a collection and remember its tag
//!     let created = access
//!         .upsert_collection("shop", "orders", doc! { "description": "orders" }, None, false, false, false)
//!         .await?;
//!     let etag = created.etag().map(|etag| etag.to_string());
//!
//!     // patch it, but only if nobody changed it in the meantime
//!     let patched = access
//!         .upsert_collection("shop", "orders", doc! { "owner": "sales" }, etag.as_deref(), true, true, true)
//!         .await?;
//!     assert_eq!(patched.status(), StatusCode::Updated);
//!
//!     // walk the pages forward; each page after the first comes from a pooled cursor
//!     let query = QueryDescriptor::builder().sort_by("-qty").build()?;
//!     for page in 1..=3 {
//!         let documents = access
//!             .get_collection_data("shop", "orders", PageWindow::new(page, 10)?, &query, AllocationPolicy::EagerLinear)
//!             .await?;
//!         println!("page {page}: {} documents", documents.len());
//!     }
//!
//!     access.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - `mongodb` - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docdal_core::{
    access, backend, concurrency, config, error, metadata, page, parse, pool, query,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docdal_memory::{InMemoryCursor, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docdal_mongodb::{MongoDbCursor, MongoDbStore, MongoDbStoreBuilder};
}
