//! Storage backend abstraction for the data access layer.
//!
//! This module defines the traits that abstract over document stores, so the
//! [`DataAccess`](crate::access::DataAccess) facade never issues driver calls directly.
//!
//! # Traits
//!
//! - [`StoreBackend`]: The core trait for storage backends
//! - [`StoreCursor`]: A live, forward-only iteration handle opened by a backend
//! - [`StoreBackendBuilder`]: Factory trait for creating backend instances
//!
//! # Conditional writes
//!
//! [`StoreBackend::write_properties`] and [`StoreBackend::delete_resource`] receive a
//! [`WriteCondition`] and must evaluate it atomically with the write they guard: either the
//! condition holds and the whole write is applied, or nothing changes.

use async_trait::async_trait;
use bson::Document;
use std::fmt::Debug;

use crate::{
    concurrency::{PropertiesWrite, WriteCondition, WriteOutcome},
    error::DataAccessResult,
    metadata::{CollectionId, ETag, Properties, Resource},
    query::{Expr, QueryDescriptor},
};

/// A server-side iteration handle positioned somewhere in an ordered result set.
///
/// Cursors only move forward. Each call to [`StoreCursor::next_batch`] returns the next
/// documents in the order fixed when the cursor was opened.
#[async_trait]
pub trait StoreCursor: Send {
    /// Reads up to `max` documents. Fewer than `max` documents means the cursor is exhausted.
    async fn next_batch(&mut self, max: u64) -> DataAccessResult<Vec<Document>>;
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must be thread-safe and support concurrent access from multiple
/// async tasks.
///
/// # Properties documents
///
/// Backends keep each resource's [`Properties`] apart from its data: they are returned only by
/// [`StoreBackend::get_properties`] and never by cursors, counts or collection listings.
///
/// # Error Handling
///
/// Store connectivity failures are reported as
/// [`DataAccessError::Transport`](crate::error::DataAccessError::Transport); a filter or sort
/// the store refuses is reported as
/// [`DataAccessError::QueryParameter`](crate::error::DataAccessError::QueryParameter).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// The cursor type returned by [`StoreBackend::open_cursor`].
    type Cursor: StoreCursor + 'static;

    /// Lists the names of all databases, excluding the store's internal ones.
    async fn list_databases(&self) -> DataAccessResult<Vec<String>>;

    /// Lists the collections of a database, excluding reserved collections.
    async fn list_collections(&self, database: &str) -> DataAccessResult<Vec<String>>;

    /// Returns `true` if the database exists, with or without properties.
    async fn database_exists(&self, database: &str) -> DataAccessResult<bool>;

    /// Returns `true` if the collection exists, with or without properties.
    async fn collection_exists(&self, collection: &CollectionId) -> DataAccessResult<bool>;

    /// Returns the resource's properties, or `None` if it has none (or does not exist).
    async fn get_properties(&self, resource: &Resource) -> DataAccessResult<Option<Properties>>;

    /// Atomically checks `condition` and, if it holds, stores the properties computed by
    /// `write` stamped with `etag`, creating the resource if needed.
    async fn write_properties(
        &self,
        resource: &Resource,
        condition: &WriteCondition,
        write: PropertiesWrite,
        etag: ETag,
    ) -> DataAccessResult<WriteOutcome>;

    /// Atomically checks `condition` and, if it holds, drops the resource with all its data.
    async fn delete_resource(
        &self,
        resource: &Resource,
        condition: &WriteCondition,
    ) -> DataAccessResult<WriteOutcome>;

    /// Opens a cursor over the collection's data documents matching every filter of `query`,
    /// ordered by its sort keys, projected to its keys, with the first `skip` documents
    /// already skipped.
    async fn open_cursor(
        &self,
        collection: &CollectionId,
        query: &QueryDescriptor,
        skip: u64,
    ) -> DataAccessResult<Self::Cursor>;

    /// Counts the collection's data documents matching every filter.
    async fn count_documents(
        &self,
        collection: &CollectionId,
        filters: &[Expr],
    ) -> DataAccessResult<u64>;

    /// Creates an index described by `keys` (e.g. `{ "name": 1 }`) and store-native `options`.
    async fn create_index(
        &self,
        collection: &CollectionId,
        keys: Document,
        options: Document,
    ) -> DataAccessResult<()>;

    /// Drops the named index. Returns `false` if there was no such index.
    async fn drop_index(&self, collection: &CollectionId, index: &str) -> DataAccessResult<bool>;

    /// Lists the collection's index definitions.
    async fn list_indexes(&self, collection: &CollectionId) -> DataAccessResult<Vec<Document>>;

    /// Cleanly shuts down the backend, releasing all resources.
    ///
    /// The default implementation is a no-op, but backends with external connections
    /// should override this.
    async fn shutdown(self) -> DataAccessResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DataAccessResult<Self::Backend>;
}
