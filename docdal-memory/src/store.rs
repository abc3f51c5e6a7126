//! In-memory storage implementation for the data access layer.
//!
//! Databases and collections are plain maps behind one async-aware read-write lock. Properties
//! are an explicit field of each database and collection entry, so they can never leak into
//! data reads.

use async_trait::async_trait;
use bson::{Bson, Document};
use mea::rwlock::RwLock;
use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use docdal_core::{
    backend::{StoreBackend, StoreBackendBuilder, StoreCursor},
    concurrency::{PropertiesWrite, ResourceState, WriteCondition, WriteOutcome},
    error::{DataAccessError, DataAccessResult},
    metadata::{CollectionId, ETag, Properties, Resource, is_properties_document},
    query::{Expr, QueryDescriptor},
};

use crate::evaluator::{DocumentEvaluator, compare_documents, project};

#[derive(Debug, Default)]
struct CollectionEntry {
    properties: Option<Properties>,
    /// Data documents in insertion order.
    documents: Vec<Document>,
    indexes: Vec<Document>,
}

#[derive(Debug, Default)]
struct DatabaseEntry {
    properties: Option<Properties>,
    collections: HashMap<String, CollectionEntry>,
}

type StoreMap = HashMap<String, DatabaseEntry>;

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing it to be
/// safely shared across async tasks. Multiple clones of the same instance share the same
/// underlying data.
///
/// Every conditional write runs inside a single write-lock critical section, so the check and
/// the write it guards can never interleave with another writer.
///
/// # Example
///
/// ```ignore
/// use docdal_memory::InMemoryStore;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// store.insert_documents("shop", "orders", vec![doc! { "_id": 1, "qty": 5 }]).await?;
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    /// Appends data documents to a collection, creating the database and collection if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::InvalidDocument`] if a document uses the reserved properties
    /// identifier; nothing is inserted in that case.
    pub async fn insert_documents(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> DataAccessResult<()> {
        if documents.iter().any(is_properties_document) {
            return Err(DataAccessError::InvalidDocument(format!(
                "data documents of {database}/{collection} must not use the properties identifier"
            )));
        }

        let mut store = self.store.write().await;
        store
            .entry(database.to_string())
            .or_default()
            .collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .extend(documents);

        Ok(())
    }

    /// Removes every data document of a collection matching all `filters`. Returns the number
    /// of removed documents.
    pub async fn delete_documents(
        &self,
        collection: &CollectionId,
        filters: &[Expr],
    ) -> DataAccessResult<u64> {
        let mut store = self.store.write().await;
        let Some(entry) = store
            .get_mut(collection.database())
            .and_then(|database| database.collections.get_mut(collection.collection()))
        else {
            return Ok(0);
        };

        let before = entry.documents.len();
        entry
            .documents
            .retain(|document| !DocumentEvaluator::matches_all(document, filters));

        Ok((before - entry.documents.len()) as u64)
    }
}

fn current_properties<'a>(store: &'a StoreMap, resource: &Resource) -> Option<&'a Properties> {
    match resource {
        Resource::Database(name) => store.get(name)?.properties.as_ref(),
        Resource::Collection(id) => store
            .get(id.database())?
            .collections
            .get(id.collection())?
            .properties
            .as_ref(),
    }
}

fn resource_state<'a>(store: &'a StoreMap, resource: &Resource) -> ResourceState<'a> {
    let exists = match resource {
        Resource::Database(name) => store.contains_key(name),
        Resource::Collection(id) => store
            .get(id.database())
            .is_some_and(|database| database.collections.contains_key(id.collection())),
    };

    if exists {
        ResourceState::Present {
            etag: current_properties(store, resource).and_then(Properties::etag),
        }
    } else {
        ResourceState::Absent
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    type Cursor = InMemoryCursor;

    async fn list_databases(&self) -> DataAccessResult<Vec<String>> {
        let mut names = self
            .store
            .read()
            .await
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    async fn list_collections(&self, database: &str) -> DataAccessResult<Vec<String>> {
        let store = self.store.read().await;
        let mut names = store
            .get(database)
            .map(|entry| entry.collections.keys().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        names.sort();

        Ok(names)
    }

    async fn database_exists(&self, database: &str) -> DataAccessResult<bool> {
        Ok(self.store.read().await.contains_key(database))
    }

    async fn collection_exists(&self, collection: &CollectionId) -> DataAccessResult<bool> {
        Ok(self
            .store
            .read()
            .await
            .get(collection.database())
            .is_some_and(|database| database.collections.contains_key(collection.collection())))
    }

    async fn get_properties(&self, resource: &Resource) -> DataAccessResult<Option<Properties>> {
        let store = self.store.read().await;
        Ok(current_properties(&store, resource).cloned())
    }

    async fn write_properties(
        &self,
        resource: &Resource,
        condition: &WriteCondition,
        write: PropertiesWrite,
        etag: ETag,
    ) -> DataAccessResult<WriteOutcome> {
        let mut store = self.store.write().await;

        let outcome = condition.check(resource_state(&store, resource));
        if outcome != WriteOutcome::Applied {
            return Ok(outcome);
        }

        let properties = write.apply(current_properties(&store, resource), etag);
        let database = store.entry(resource.database().to_string()).or_default();
        match resource {
            Resource::Database(_) => database.properties = Some(properties),
            Resource::Collection(id) => {
                database
                    .collections
                    .entry(id.collection().to_string())
                    .or_default()
                    .properties = Some(properties);
            }
        }

        Ok(WriteOutcome::Applied)
    }

    async fn delete_resource(
        &self,
        resource: &Resource,
        condition: &WriteCondition,
    ) -> DataAccessResult<WriteOutcome> {
        let mut store = self.store.write().await;

        let outcome = condition.check(resource_state(&store, resource));
        if outcome != WriteOutcome::Applied {
            return Ok(outcome);
        }

        match resource {
            Resource::Database(name) => {
                store.remove(name);
            }
            Resource::Collection(id) => {
                if let Some(database) = store.get_mut(id.database()) {
                    database.collections.remove(id.collection());
                }
            }
        }

        Ok(WriteOutcome::Applied)
    }

    async fn open_cursor(
        &self,
        collection: &CollectionId,
        query: &QueryDescriptor,
        skip: u64,
    ) -> DataAccessResult<Self::Cursor> {
        let store = self.store.read().await;
        let Some(entry) = store
            .get(collection.database())
            .and_then(|database| database.collections.get(collection.collection()))
        else {
            return Ok(InMemoryCursor::default());
        };

        let mut matched = entry
            .documents
            .iter()
            .filter(|document| DocumentEvaluator::matches_all(document, query.filters()))
            .collect::<Vec<_>>();
        // stable, so ties keep insertion order
        matched.sort_by(|a, b| compare_documents(a, b, query.sort_by()));

        Ok(InMemoryCursor {
            remaining: matched
                .into_iter()
                .skip(usize::try_from(skip).unwrap_or(usize::MAX))
                .map(|document| project(document, query.keys()))
                .collect(),
        })
    }

    async fn count_documents(
        &self,
        collection: &CollectionId,
        filters: &[Expr],
    ) -> DataAccessResult<u64> {
        let store = self.store.read().await;

        Ok(store
            .get(collection.database())
            .and_then(|database| database.collections.get(collection.collection()))
            .map(|entry| {
                entry
                    .documents
                    .iter()
                    .filter(|document| DocumentEvaluator::matches_all(document, filters))
                    .count() as u64
            })
            .unwrap_or_default())
    }

    async fn create_index(
        &self,
        collection: &CollectionId,
        keys: Document,
        options: Document,
    ) -> DataAccessResult<()> {
        if keys.is_empty() {
            return Err(DataAccessError::InvalidDocument(
                "index keys must not be empty".to_string(),
            ));
        }

        let name = match options.get_str("name") {
            Ok(name) => name.to_string(),
            Err(_) => default_index_name(&keys),
        };

        let mut store = self.store.write().await;
        let entry = store
            .entry(collection.database().to_string())
            .or_default()
            .collections
            .entry(collection.collection().to_string())
            .or_default();

        let mut definition = options;
        definition.insert("v", 2);
        definition.insert("key", keys);
        definition.insert("name", name.as_str());

        entry
            .indexes
            .retain(|index| index.get_str("name").ok() != Some(name.as_str()));
        entry.indexes.push(definition);

        Ok(())
    }

    async fn drop_index(&self, collection: &CollectionId, index: &str) -> DataAccessResult<bool> {
        let mut store = self.store.write().await;
        let Some(entry) = store
            .get_mut(collection.database())
            .and_then(|database| database.collections.get_mut(collection.collection()))
        else {
            return Ok(false);
        };

        let before = entry.indexes.len();
        entry
            .indexes
            .retain(|definition| definition.get_str("name").ok() != Some(index));

        Ok(entry.indexes.len() < before)
    }

    async fn list_indexes(&self, collection: &CollectionId) -> DataAccessResult<Vec<Document>> {
        let store = self.store.read().await;

        Ok(store
            .get(collection.database())
            .and_then(|database| database.collections.get(collection.collection()))
            .map(|entry| entry.indexes.clone())
            .unwrap_or_default())
    }
}

/// `{a: 1, b: -1}` is named `a_1_b_-1`, like the store the MongoDB backend talks to.
fn default_index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, direction)| match direction {
            Bson::String(kind) => format!("{field}_{kind}"),
            other => format!("{field}_{other}"),
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// A cursor over a snapshot of the matching documents taken when it was opened.
///
/// Writes after the cursor was opened are not visible through it.
#[derive(Debug, Default)]
pub struct InMemoryCursor {
    remaining: VecDeque<Document>,
}

#[async_trait]
impl StoreCursor for InMemoryCursor {
    async fn next_batch(&mut self, max: u64) -> DataAccessResult<Vec<Document>> {
        let count = usize::try_from(max)
            .unwrap_or(usize::MAX)
            .min(self.remaining.len());

        Ok(self.remaining.drain(..count).collect())
    }
}

/// Builder for constructing [`InMemoryStore`] instances, optionally pre-seeded with data.
///
/// # Example
///
/// ```ignore
/// use docdal_memory::InMemoryStore;
/// use docdal::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder()
///     .with_documents("shop", "orders", vec![doc! { "_id": 1 }])
///     .build()
///     .await?;
/// ```
#[derive(Default)]
pub struct InMemoryStoreBuilder {
    seed: Vec<(String, String, Vec<Document>)>,
}

impl InMemoryStoreBuilder {
    pub fn with_documents(
        mut self,
        database: impl Into<String>,
        collection: impl Into<String>,
        documents: Vec<Document>,
    ) -> Self {
        self.seed
            .push((database.into(), collection.into(), documents));
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DataAccessResult<Self::Backend> {
        let store = InMemoryStore::new();
        for (database, collection, documents) in self.seed {
            store
                .insert_documents(&database, &collection, documents)
                .await?;
        }

        tracing::debug!("in-memory store ready");
        Ok(store)
    }
}
