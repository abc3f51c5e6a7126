//! MongoDB backend implementation for docdal.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Paginated
//! reads run on live server-side cursors, and conditional property writes are single
//! `_etag`-filtered operations, so the check and the write cannot be separated by a
//! concurrent writer.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docdal = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Storage layout
//!
//! Properties documents keep their established layout: `_id: "_properties"` inside the
//! collection they describe, or inside the `_properties` collection for database properties.
//! Both are filtered out of every data read, count and listing.
//!
//! # Example
//!
//! ```ignore
//! use docdal::{backend::StoreBackendBuilder, mongodb::MongoDbStore, prelude::*};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017")
//!         .app_name("orders-api")
//!         .build()
//!         .await?;
//!     let access = DataAccess::new(store);
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docdal_mongodb;

pub mod query;
pub mod store;

pub use store::{MongoDbCursor, MongoDbStore, MongoDbStoreBuilder};
