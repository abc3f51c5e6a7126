//! In-memory document storage backend for docdal.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and atomic conditional writes behind an async-aware RwLock
//! - **Explicit properties** - Database and collection properties are stored apart from data documents
//! - **Full query support** - Filtering on dotted paths, multi-key sorting, projection and skipping
//! - **Snapshot cursors** - A cursor sees the collection as it was when the cursor was opened
//!
//! # Quick Start
//!
//! ```ignore
//! use docdal::{memory::InMemoryStore, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder()
//!         .with_documents("shop", "orders", vec![doc! { "_id": 1, "qty": 5 }])
//!         .build()
//!         .await?;
//!     let access = DataAccess::new(backend);
//!
//!     let page = access
//!         .get_collection_data("shop", "orders", PageWindow::default(), &QueryDescriptor::empty(), AllocationPolicy::None)
//!         .await?;
//!     assert_eq!(page.len(), 1);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docdal_memory;

pub mod evaluator;
pub mod store;

pub use store::{InMemoryCursor, InMemoryStore, InMemoryStoreBuilder};
