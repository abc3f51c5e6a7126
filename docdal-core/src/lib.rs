//! A data access layer between request handlers and a document store.
//!
//! This crate is the core of the docdal project and provides:
//!
//! - **Data access facade** ([`access`]) - Listing, paginated reads, counts and conditional writes
//! - **Store backend abstraction** ([`backend`]) - Traits for implementing different storage backends
//! - **Cursor pool** ([`pool`]) - Reuse of live cursors across consecutive page requests
//! - **Optimistic concurrency** ([`concurrency`]) - ETag-checked writes and their outcomes
//! - **Metadata convention** ([`metadata`]) - Resource identities, properties and entity tags
//! - **Query descriptors** ([`query`], [`parse`]) - Validated filters, sort keys and projections
//! - **Page windows** ([`page`]) - 1-indexed pagination
//! - **Configuration** ([`config`]) - Figment-based settings
//! - **Error handling** ([`error`]) - Error and result types
//!
//! Store implementations live in their own crates (`docdal-memory`, `docdal-mongodb`).

#[allow(unused_extern_crates)]
extern crate self as docdal_core;

pub mod access;
pub mod backend;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod metadata;
pub mod page;
pub mod parse;
pub mod pool;
pub mod query;
