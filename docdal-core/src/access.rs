//! The data access facade.
//!
//! [`DataAccess`] is the single entry point request handlers talk to. It wraps a
//! [`StoreBackend`], routes paginated reads through the [`CursorPool`], turns the
//! `updating`/`patching`/`check_etag` flags of a write into a conditional backend operation, and
//! invalidates pooled cursors after every successful write.
//!
//! # Example
//!
//! ```ignore
//! use docdal::prelude::*;
//!
//! let access = DataAccess::new(InMemoryStore::new());
//! access
//!     .upsert_collection("shop", "orders", doc! { "description": "orders" }, None, false, false, false)
//!     .await?;
//!
//! let query = QueryDescriptor::builder().sort_by("-qty").build()?;
//! let page = access
//!     .get_collection_data("shop", "orders", PageWindow::new(1, 10)?, &query, AllocationPolicy::EagerLinear)
//!     .await?;
//! ```

use bson::Document;

use crate::{
    backend::StoreBackend,
    concurrency::{OperationResult, PropertiesWrite, StatusCode, WriteCondition, WriteOutcome},
    config::DataAccessConfig,
    error::{DataAccessError, DataAccessResult},
    metadata::{CollectionId, ETag, Properties, Resource, is_reserved_collection_name},
    page::PageWindow,
    pool::{AllocationPolicy, CursorPool, PoolStats},
    query::QueryDescriptor,
};

/// Data access layer over a document store backend.
///
/// `DataAccess` is `Send + Sync` whenever the backend is, and is meant to be shared (e.g. in an
/// `Arc`) by all request-handling tasks.
#[derive(Debug)]
pub struct DataAccess<B: StoreBackend> {
    backend: B,
    pool: CursorPool<B::Cursor>,
    config: DataAccessConfig,
}

impl<B: StoreBackend> DataAccess<B> {
    /// Creates a data access layer with the default configuration.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, DataAccessConfig::default())
    }

    pub fn with_config(backend: B, config: DataAccessConfig) -> Self {
        Self {
            pool: CursorPool::new(&config.cursor_pool),
            backend,
            config,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &DataAccessConfig {
        &self.config
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Number of cursors currently held by the pool.
    pub fn pooled_cursors(&self) -> usize {
        self.pool.len()
    }

    /// Lists database names.
    pub async fn get_database_names(&self) -> DataAccessResult<Vec<String>> {
        self.backend.list_databases().await
    }

    /// Lists the collection names of a database. Reserved collections are never listed.
    pub async fn get_collection_names(&self, database: &str) -> DataAccessResult<Vec<String>> {
        self.backend.list_collections(database).await
    }

    pub async fn does_db_exist(&self, database: &str) -> DataAccessResult<bool> {
        self.backend.database_exists(database).await
    }

    pub async fn does_collection_exist(
        &self,
        database: &str,
        collection: &str,
    ) -> DataAccessResult<bool> {
        self.backend
            .collection_exists(&CollectionId::new(database, collection))
            .await
    }

    /// Returns the database's properties, or `None` if it has none.
    pub async fn get_database_properties(
        &self,
        database: &str,
    ) -> DataAccessResult<Option<Properties>> {
        self.backend
            .get_properties(&Resource::Database(database.to_string()))
            .await
    }

    /// Returns the collection's properties, or `None` if it has none.
    pub async fn get_collection_properties(
        &self,
        database: &str,
        collection: &str,
    ) -> DataAccessResult<Option<Properties>> {
        self.backend
            .get_properties(&Resource::Collection(CollectionId::new(database, collection)))
            .await
    }

    /// Returns one page of a collection's data documents.
    ///
    /// # Errors
    ///
    /// - [`DataAccessError::IllegalQueryParameter`] if the page size exceeds `max_pagesize`
    /// - [`DataAccessError::QueryParameter`] if the store rejects a filter or sort clause
    pub async fn get_collection_data(
        &self,
        database: &str,
        collection: &str,
        window: PageWindow,
        query: &QueryDescriptor,
        policy: AllocationPolicy,
    ) -> DataAccessResult<Vec<Document>> {
        window.ensure_pagesize_at_most(self.config.max_pagesize)?;

        self.pool
            .acquire(
                &self.backend,
                &CollectionId::new(database, collection),
                query,
                window,
                policy,
            )
            .await
    }

    /// Counts the data documents matching the query's filters. Sort keys and projection are
    /// ignored and pooled cursors are never used.
    pub async fn get_collection_size(
        &self,
        database: &str,
        collection: &str,
        query: &QueryDescriptor,
    ) -> DataAccessResult<u64> {
        self.backend
            .count_documents(&CollectionId::new(database, collection), query.filters())
            .await
    }

    /// Number of collections in a database.
    pub async fn get_db_size(&self, database: &str) -> DataAccessResult<u64> {
        Ok(self.backend.list_collections(database).await?.len() as u64)
    }

    /// Reads the same page of each listed collection and concatenates the results in the
    /// order the collections are given.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::IllegalQueryParameter`] if the page size exceeds
    /// `max_pagesize`; nothing is read in that case.
    pub async fn get_database_data(
        &self,
        database: &str,
        collections: &[String],
        window: PageWindow,
    ) -> DataAccessResult<Vec<Document>> {
        window.ensure_pagesize_at_most(self.config.max_pagesize)?;

        let query = QueryDescriptor::empty();
        let mut documents = Vec::new();
        for collection in collections {
            documents.extend(
                self.pool
                    .acquire(
                        &self.backend,
                        &CollectionId::new(database, collection.as_str()),
                        &query,
                        window,
                        AllocationPolicy::None,
                    )
                    .await?,
            );
        }

        Ok(documents)
    }

    /// Creates or updates a database's properties.
    ///
    /// See [`crate::concurrency`] for how the flags map to the returned status.
    pub async fn upsert_database(
        &self,
        database: &str,
        content: Document,
        request_etag: Option<&str>,
        updating: bool,
        patching: bool,
        check_etag: bool,
    ) -> DataAccessResult<OperationResult> {
        validate_name("database", database)?;

        self.upsert(
            Resource::Database(database.to_string()),
            content,
            request_etag,
            updating,
            patching,
            check_etag,
        )
        .await
    }

    /// Creates or updates a collection's properties, creating the database if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::InvalidName`] for empty or reserved collection names.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_collection(
        &self,
        database: &str,
        collection: &str,
        content: Document,
        request_etag: Option<&str>,
        updating: bool,
        patching: bool,
        check_etag: bool,
    ) -> DataAccessResult<OperationResult> {
        validate_name("database", database)?;
        validate_name("collection", collection)?;
        if is_reserved_collection_name(collection) {
            return Err(DataAccessError::InvalidName(format!(
                "collection name {collection:?} is reserved"
            )));
        }

        self.upsert(
            Resource::Collection(CollectionId::new(database, collection)),
            content,
            request_etag,
            updating,
            patching,
            check_etag,
        )
        .await
    }

    /// Drops a database with all its collections.
    pub async fn delete_database(
        &self,
        database: &str,
        request_etag: Option<&str>,
        check_etag: bool,
    ) -> DataAccessResult<OperationResult> {
        self.delete(
            Resource::Database(database.to_string()),
            request_etag,
            check_etag,
        )
        .await
    }

    /// Drops a collection with all its documents.
    pub async fn delete_collection(
        &self,
        database: &str,
        collection: &str,
        request_etag: Option<&str>,
        check_etag: bool,
    ) -> DataAccessResult<OperationResult> {
        self.delete(
            Resource::Collection(CollectionId::new(database, collection)),
            request_etag,
            check_etag,
        )
        .await
    }

    pub async fn create_index(
        &self,
        database: &str,
        collection: &str,
        keys: Document,
        options: Document,
    ) -> DataAccessResult<()> {
        self.backend
            .create_index(&CollectionId::new(database, collection), keys, options)
            .await
    }

    /// Drops an index by name. Returns [`StatusCode::NotFound`] if there was no such index.
    pub async fn delete_index(
        &self,
        database: &str,
        collection: &str,
        index: &str,
    ) -> DataAccessResult<StatusCode> {
        let dropped = self
            .backend
            .drop_index(&CollectionId::new(database, collection), index)
            .await?;

        Ok(if dropped {
            StatusCode::Deleted
        } else {
            StatusCode::NotFound
        })
    }

    pub async fn get_collection_indexes(
        &self,
        database: &str,
        collection: &str,
    ) -> DataAccessResult<Vec<Document>> {
        self.backend
            .list_indexes(&CollectionId::new(database, collection))
            .await
    }

    /// Discards pooled cursors over a collection whose data was changed outside this layer.
    pub fn invalidate_collection(&self, database: &str, collection: &str) {
        self.pool
            .invalidate(&CollectionId::new(database, collection));
    }

    /// Shuts down the backend.
    pub async fn shutdown(self) -> DataAccessResult<()> {
        self.backend.shutdown().await
    }

    async fn upsert(
        &self,
        resource: Resource,
        content: Document,
        request_etag: Option<&str>,
        updating: bool,
        patching: bool,
        check_etag: bool,
    ) -> DataAccessResult<OperationResult> {
        let condition = WriteCondition::for_upsert(updating, check_etag, request_etag);
        let etag = ETag::generate();

        let outcome = self
            .backend
            .write_properties(
                &resource,
                &condition,
                PropertiesWrite::new(content, patching),
                etag,
            )
            .await?;
        if outcome == WriteOutcome::Applied {
            match &resource {
                Resource::Database(name) => self.pool.invalidate_database(name),
                Resource::Collection(id) => self.pool.invalidate(id),
            }
        }
        tracing::debug!(resource = %resource, ?outcome, "conditional upsert");

        let applied = if updating {
            StatusCode::Updated
        } else {
            StatusCode::Created
        };
        Ok(outcome.into_result(applied, Some(etag)))
    }

    async fn delete(
        &self,
        resource: Resource,
        request_etag: Option<&str>,
        check_etag: bool,
    ) -> DataAccessResult<OperationResult> {
        let condition = WriteCondition::for_delete(check_etag, request_etag);

        let outcome = self
            .backend
            .delete_resource(&resource, &condition)
            .await?;
        if outcome == WriteOutcome::Applied {
            match &resource {
                Resource::Database(name) => self.pool.forget_database(name),
                Resource::Collection(id) => self.pool.forget(id),
            }
        }
        tracing::debug!(resource = %resource, ?outcome, "conditional delete");

        Ok(outcome.into_result(StatusCode::Deleted, None))
    }
}

fn validate_name(kind: &str, name: &str) -> DataAccessResult<()> {
    if name.is_empty() {
        return Err(DataAccessError::InvalidName(format!(
            "{kind} name must not be empty"
        )));
    }
    if name.contains(['\0', '$']) {
        return Err(DataAccessError::InvalidName(format!(
            "{kind} name {name:?} contains a forbidden character"
        )));
    }

    Ok(())
}
