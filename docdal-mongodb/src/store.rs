use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, Cursor, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, FindOptions, IndexOptions},
};
use std::time::Duration;

use docdal_core::{
    backend::{StoreBackend, StoreBackendBuilder, StoreCursor},
    concurrency::{PropertiesWrite, ResourceState, WriteCondition, WriteOutcome},
    error::{DataAccessError, DataAccessResult},
    metadata::{
        CollectionId, DATABASE_PROPERTIES_COLLECTION, ETAG_FIELD, ETag, ID_FIELD, PROPERTIES_ID,
        Properties, Resource, is_reserved_collection_name,
    },
    query::{Expr, QueryDescriptor},
};

use crate::query::MongoQueryTranslator;

/// Databases the server manages itself.
const INTERNAL_DATABASES: [&str; 3] = ["admin", "local", "config"];

const DUPLICATE_KEY: i32 = 11000;
const BAD_VALUE: i32 = 2;
const FAILED_TO_PARSE: i32 = 9;
const NAMESPACE_NOT_FOUND: i32 = 26;
const INDEX_NOT_FOUND: i32 = 27;

/// Update attempts before a properties write racing with other creators gives up.
const PROPERTIES_WRITE_ATTEMPTS: usize = 3;

/// MongoDB backend.
///
/// Properties keep the layout existing deployments rely on: a collection's properties are the
/// document with `_id: "_properties"` inside that collection, and a database's properties are
/// the same document inside its `_properties` collection.
#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
}

impl MongoDbStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn builder(dsn: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn)
    }

    fn get_collection(&self, collection: &CollectionId) -> MongoCollection<Document> {
        self.client
            .database(collection.database())
            .collection(collection.collection())
    }

    /// The collection holding the resource's properties document.
    fn properties_collection(&self, resource: &Resource) -> MongoCollection<Document> {
        match resource {
            Resource::Database(name) => self
                .client
                .database(name)
                .collection(DATABASE_PROPERTIES_COLLECTION),
            Resource::Collection(id) => self.get_collection(id),
        }
    }

    async fn exists(&self, resource: &Resource) -> DataAccessResult<bool> {
        match resource {
            Resource::Database(name) => self.database_exists(name).await,
            Resource::Collection(id) => self.collection_exists(id).await,
        }
    }

    async fn stored_etag(&self, resource: &Resource) -> DataAccessResult<Option<ETag>> {
        Ok(self
            .get_properties(resource)
            .await?
            .and_then(|properties| properties.etag().copied()))
    }

    /// Re-reads the resource to explain why a conditional operation matched nothing.
    async fn classify_miss(&self, resource: &Resource) -> DataAccessResult<WriteOutcome> {
        Ok(if self.exists(resource).await? {
            WriteOutcome::EtagMismatch
        } else {
            WriteOutcome::Missing
        })
    }

    async fn shutdown(self) -> DataAccessResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

/// Next step of a properties update that matched no properties document.
#[derive(Debug, PartialEq, Eq)]
enum UnmatchedWrite {
    Outcome(WriteOutcome),
    /// The resource exists without a properties document.
    InsertProperties,
}

fn unmatched_write(condition: &WriteCondition, exists: bool) -> UnmatchedWrite {
    match (condition, exists) {
        (_, false) => UnmatchedWrite::Outcome(WriteOutcome::Missing),
        (WriteCondition::Present, true) => UnmatchedWrite::InsertProperties,
        (WriteCondition::Absent, true) => UnmatchedWrite::Outcome(WriteOutcome::Exists),
        (WriteCondition::EtagMatches(_), true) => {
            UnmatchedWrite::Outcome(WriteOutcome::EtagMismatch)
        }
    }
}

/// Maps driver errors: rejected queries become [`DataAccessError::QueryParameter`], everything
/// else is a transport failure.
fn store_error(err: MongoError) -> DataAccessError {
    match *err.kind {
        ErrorKind::Command(ref command) if matches!(command.code, BAD_VALUE | FAILED_TO_PARSE) => {
            DataAccessError::query_parameter("query", command.message.clone())
        }
        _ => DataAccessError::Transport(err.to_string()),
    }
}

fn has_code(err: &MongoError, code: i32) -> bool {
    match *err.kind {
        ErrorKind::Command(ref command) => command.code == code,
        ErrorKind::Write(WriteFailure::WriteError(ref write)) => write.code == code,
        _ => false,
    }
}

/// Builds driver index options from a store-native options document.
fn index_options(options: &Document) -> DataAccessResult<IndexOptions> {
    let invalid = |field: &str| {
        DataAccessError::InvalidDocument(format!("index option {field:?} has the wrong type"))
    };

    let mut index = IndexOptions::default();
    for (key, value) in options {
        match (key.as_str(), value) {
            ("name", Bson::String(name)) => index.name = Some(name.clone()),
            ("unique", Bson::Boolean(flag)) => index.unique = Some(*flag),
            ("sparse", Bson::Boolean(flag)) => index.sparse = Some(*flag),
            ("hidden", Bson::Boolean(flag)) => index.hidden = Some(*flag),
            ("expireAfterSeconds", seconds) => {
                let seconds = seconds.as_i64().or_else(|| seconds.as_i32().map(i64::from));
                match seconds {
                    Some(seconds) if seconds >= 0 => {
                        index.expire_after = Some(Duration::from_secs(seconds as u64))
                    }
                    _ => return Err(invalid(key.as_str())),
                }
            }
            ("partialFilterExpression", Bson::Document(filter)) => {
                index.partial_filter_expression = Some(filter.clone())
            }
            ("name" | "unique" | "sparse" | "hidden" | "partialFilterExpression", _) => {
                return Err(invalid(key.as_str()));
            }
            _ => {
                return Err(DataAccessError::InvalidDocument(format!(
                    "unsupported index option {key:?}"
                )));
            }
        }
    }

    Ok(index)
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    type Cursor = MongoDbCursor;

    async fn list_databases(&self) -> DataAccessResult<Vec<String>> {
        Ok(self
            .client
            .list_database_names()
            .await
            .map_err(store_error)?
            .into_iter()
            .filter(|name| !INTERNAL_DATABASES.contains(&name.as_str()))
            .collect())
    }

    async fn list_collections(&self, database: &str) -> DataAccessResult<Vec<String>> {
        let mut names = self
            .client
            .database(database)
            .list_collection_names()
            .await
            .map_err(store_error)?
            .into_iter()
            .filter(|name| !is_reserved_collection_name(name))
            .collect::<Vec<_>>();
        names.sort();

        Ok(names)
    }

    async fn database_exists(&self, database: &str) -> DataAccessResult<bool> {
        Ok(self
            .client
            .list_database_names()
            .await
            .map_err(store_error)?
            .iter()
            .any(|name| name == database))
    }

    async fn collection_exists(&self, collection: &CollectionId) -> DataAccessResult<bool> {
        Ok(self
            .client
            .database(collection.database())
            .list_collection_names()
            .await
            .map_err(store_error)?
            .iter()
            .any(|name| name == collection.collection()))
    }

    async fn get_properties(&self, resource: &Resource) -> DataAccessResult<Option<Properties>> {
        self.properties_collection(resource)
            .find_one(doc! { ID_FIELD: PROPERTIES_ID })
            .await
            .map_err(store_error)?
            .map(Properties::from_document)
            .transpose()
    }

    async fn write_properties(
        &self,
        resource: &Resource,
        condition: &WriteCondition,
        write: PropertiesWrite,
        etag: ETag,
    ) -> DataAccessResult<WriteOutcome> {
        let exists = self.exists(resource).await?;
        let stored = self.stored_etag(resource).await?;
        let state = if exists {
            ResourceState::Present { etag: stored.as_ref() }
        } else {
            ResourceState::Absent
        };

        let outcome = condition.check(state);
        if outcome != WriteOutcome::Applied {
            return Ok(outcome);
        }

        let target = self.properties_collection(resource);

        if let WriteCondition::Absent = condition {
            let properties = write.apply(None, etag);
            return match target.insert_one(properties.to_document()).await {
                Ok(_) => Ok(WriteOutcome::Applied),
                Err(err) if has_code(&err, DUPLICATE_KEY) => Ok(WriteOutcome::Exists),
                Err(err) => Err(store_error(err)),
            };
        }

        // the tag filter makes the check and the write one server-side operation
        let filter = match condition {
            WriteCondition::EtagMatches(Some(expected)) => {
                doc! { ID_FIELD: PROPERTIES_ID, ETAG_FIELD: *expected }
            }
            _ => doc! { ID_FIELD: PROPERTIES_ID },
        };

        for _ in 0..PROPERTIES_WRITE_ATTEMPTS {
            let result = match &write {
                PropertiesWrite::Merge(patch) => {
                    let mut set = Properties::new(patch.clone()).fields().clone();
                    set.insert(ETAG_FIELD, etag);
                    target.update_one(filter.clone(), doc! { "$set": set }).await
                }
                PropertiesWrite::Replace(content) => {
                    target
                        .replace_one(
                            filter.clone(),
                            Properties::new(content.clone()).with_etag(etag).to_document(),
                        )
                        .await
                }
            }
            .map_err(store_error)?;

            if result.matched_count > 0 {
                return Ok(WriteOutcome::Applied);
            }

            let exists = self.exists(resource).await?;
            match unmatched_write(condition, exists) {
                UnmatchedWrite::Outcome(outcome) => return Ok(outcome),
                UnmatchedWrite::InsertProperties => {
                    match target
                        .insert_one(write.clone().apply(None, etag).to_document())
                        .await
                    {
                        Ok(_) => return Ok(WriteOutcome::Applied),
                        // another writer created the properties first; update those
                        Err(err) if has_code(&err, DUPLICATE_KEY) => continue,
                        Err(err) => return Err(store_error(err)),
                    }
                }
            }
        }

        self.classify_miss(resource).await
    }

    async fn delete_resource(
        &self,
        resource: &Resource,
        condition: &WriteCondition,
    ) -> DataAccessResult<WriteOutcome> {
        let exists = self.exists(resource).await?;
        let stored = self.stored_etag(resource).await?;
        let state = if exists {
            ResourceState::Present { etag: stored.as_ref() }
        } else {
            ResourceState::Absent
        };

        let outcome = condition.check(state);
        if outcome != WriteOutcome::Applied {
            return Ok(outcome);
        }

        if let WriteCondition::EtagMatches(Some(expected)) = condition {
            let deleted = self
                .properties_collection(resource)
                .delete_one(doc! { ID_FIELD: PROPERTIES_ID, ETAG_FIELD: *expected })
                .await
                .map_err(store_error)?;

            if deleted.deleted_count == 0 {
                return self.classify_miss(resource).await;
            }
        }

        match resource {
            Resource::Database(name) => self.client.database(name).drop().await,
            Resource::Collection(id) => self.get_collection(id).drop().await,
        }
        .map_err(store_error)?;

        tracing::debug!(resource = %resource, "dropped");
        Ok(WriteOutcome::Applied)
    }

    async fn open_cursor(
        &self,
        collection: &CollectionId,
        query: &QueryDescriptor,
        skip: u64,
    ) -> DataAccessResult<Self::Cursor> {
        let mut options = FindOptions::default();
        options.sort = MongoQueryTranslator::sort(query.sort_by());
        options.projection = MongoQueryTranslator::projection(query);
        if skip > 0 {
            options.skip = Some(skip);
        }

        let cursor = self
            .get_collection(collection)
            .find(MongoQueryTranslator::data_filter(query.filters())?)
            .with_options(options)
            .await
            .map_err(store_error)?;

        Ok(MongoDbCursor { inner: cursor })
    }

    async fn count_documents(
        &self,
        collection: &CollectionId,
        filters: &[Expr],
    ) -> DataAccessResult<u64> {
        self.get_collection(collection)
            .count_documents(MongoQueryTranslator::data_filter(filters)?)
            .await
            .map_err(store_error)
    }

    async fn create_index(
        &self,
        collection: &CollectionId,
        keys: Document,
        options: Document,
    ) -> DataAccessResult<()> {
        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(keys)
                    .options(index_options(&options)?)
                    .build(),
            )
            .await
            .map_err(store_error)?;

        Ok(())
    }

    async fn drop_index(&self, collection: &CollectionId, index: &str) -> DataAccessResult<bool> {
        match self.get_collection(collection).drop_index(index).await {
            Ok(()) => Ok(true),
            Err(err) if has_code(&err, INDEX_NOT_FOUND) || has_code(&err, NAMESPACE_NOT_FOUND) => {
                Ok(false)
            }
            Err(err) => Err(store_error(err)),
        }
    }

    async fn list_indexes(&self, collection: &CollectionId) -> DataAccessResult<Vec<Document>> {
        let reply = match self
            .client
            .database(collection.database())
            .run_command(doc! { "listIndexes": collection.collection() })
            .await
        {
            Ok(reply) => reply,
            Err(err) if has_code(&err, NAMESPACE_NOT_FOUND) => return Ok(Vec::new()),
            Err(err) => return Err(store_error(err)),
        };

        let batch = reply
            .get_document("cursor")
            .and_then(|cursor| cursor.get_array("firstBatch"))
            .map_err(|e| DataAccessError::Serialization(e.to_string()))?;

        Ok(batch
            .iter()
            .filter_map(|index| index.as_document().cloned())
            .collect())
    }

    async fn shutdown(self) -> DataAccessResult<()> {
        self.shutdown().await
    }
}

/// A live server-side cursor.
pub struct MongoDbCursor {
    inner: Cursor<Document>,
}

#[async_trait]
impl StoreCursor for MongoDbCursor {
    async fn next_batch(&mut self, max: u64) -> DataAccessResult<Vec<Document>> {
        let mut batch = Vec::new();
        while (batch.len() as u64) < max {
            match self.inner.try_next().await.map_err(store_error)? {
                Some(document) => batch.push(document),
                None => break,
            }
        }

        Ok(batch)
    }
}

pub struct MongoDbStoreBuilder {
    dsn: String,
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            app_name: None,
        }
    }

    /// Name reported to the server in the connection handshake.
    pub fn app_name(mut self, app_name: &str) -> Self {
        self.app_name = Some(app_name.to_string());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DataAccessResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DataAccessError::Initialization(e.to_string()))?;
        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }

        let client = Client::with_options(options)
            .map_err(|e| DataAccessError::Initialization(e.to_string()))?;
        tracing::info!("MongoDB client initialized");

        Ok(MongoDbStore::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_options_from_document() {
        let options = index_options(&doc! {
            "name": "by_qty",
            "unique": true,
            "expireAfterSeconds": 60,
        })
        .unwrap();

        assert_eq!(options.name.as_deref(), Some("by_qty"));
        assert_eq!(options.unique, Some(true));
        assert_eq!(options.expire_after, Some(Duration::from_secs(60)));
    }

    #[test]
    fn unmatched_updates_never_recreate_missing_resources() {
        assert_eq!(
            unmatched_write(&WriteCondition::Present, false),
            UnmatchedWrite::Outcome(WriteOutcome::Missing)
        );
        assert_eq!(
            unmatched_write(&WriteCondition::EtagMatches(Some(ETag::generate())), false),
            UnmatchedWrite::Outcome(WriteOutcome::Missing)
        );
        assert_eq!(
            unmatched_write(&WriteCondition::Present, true),
            UnmatchedWrite::InsertProperties
        );
        assert_eq!(
            unmatched_write(&WriteCondition::EtagMatches(Some(ETag::generate())), true),
            UnmatchedWrite::Outcome(WriteOutcome::EtagMismatch)
        );
    }

    #[test]
    fn unknown_index_options_are_rejected() {
        assert!(matches!(
            index_options(&doc! { "weights": { "a": 1 } }),
            Err(DataAccessError::InvalidDocument(_))
        ));
        assert!(matches!(
            index_options(&doc! { "unique": "yes" }),
            Err(DataAccessError::InvalidDocument(_))
        ));
    }
}
