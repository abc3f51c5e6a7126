//! Resource identities and the properties-document convention.
//!
//! Every database and collection may carry one [`Properties`] document holding its structural
//! settings. Backends that must stay compatible with an existing store layout persist it as an
//! ordinary document whose `_id` is [`PROPERTIES_ID`]; in memory it is an explicit field on the
//! resource. Either way, properties never show up among data documents.

use bson::{Bson, Document, oid::ObjectId};
use std::fmt;

use crate::error::{DataAccessError, DataAccessResult};

/// The reserved `_id` of a stored properties document.
pub const PROPERTIES_ID: &str = "_properties";

/// Field of a stored properties document holding its [`ETag`].
pub const ETAG_FIELD: &str = "_etag";

/// Identifier field of every stored document.
pub const ID_FIELD: &str = "_id";

/// Collection holding database-level properties in stores that persist them as documents.
pub const DATABASE_PROPERTIES_COLLECTION: &str = "_properties";

/// Returns `true` if a collection name is reserved for internal use and must never be listed
/// or created by callers.
pub fn is_reserved_collection_name(name: &str) -> bool {
    name == DATABASE_PROPERTIES_COLLECTION || name.starts_with("system.")
}

/// Returns `true` if the document carries the reserved properties identifier.
pub fn is_properties_document(document: &Document) -> bool {
    matches!(document.get(ID_FIELD), Some(Bson::String(id)) if id == PROPERTIES_ID)
}

/// Identity of a collection: the owning database plus the collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionId {
    database: String,
    collection: String,
}

impl CollectionId {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }
}

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.database, self.collection)
    }
}

/// A resource addressed by the optimistic concurrency protocol.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Database(String),
    Collection(CollectionId),
}

impl Resource {
    /// Name of the database the resource lives in.
    pub fn database(&self) -> &str {
        match self {
            Resource::Database(name) => name,
            Resource::Collection(id) => id.database(),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Database(name) => write!(f, "{name}"),
            Resource::Collection(id) => write!(f, "{id}"),
        }
    }
}

/// Entity tag identifying one version of a resource's properties.
///
/// Tags wrap a BSON `ObjectId`, so a freshly generated tag always differs from (and sorts
/// after) the tags generated before it in the same process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ETag(ObjectId);

impl ETag {
    /// Generates a new, never before issued tag.
    pub fn generate() -> Self {
        ETag(ObjectId::new())
    }

    /// Parses a caller-supplied token. Returns `None` for anything that is not a valid tag,
    /// which therefore can never match a stored one.
    pub fn parse(token: &str) -> Option<Self> {
        ObjectId::parse_str(token.trim_matches('"')).ok().map(ETag)
    }

    /// Reads a tag out of its stored BSON representation.
    pub fn from_bson(value: &Bson) -> Option<Self> {
        match value {
            Bson::ObjectId(oid) => Some(ETag(*oid)),
            Bson::String(token) => Self::parse(token),
            _ => None,
        }
    }

    pub fn as_object_id(&self) -> ObjectId {
        self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_hex())
    }
}

impl From<ETag> for Bson {
    fn from(etag: ETag) -> Self {
        Bson::ObjectId(etag.0)
    }
}

/// Structural properties of a database or collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties {
    fields: Document,
    etag: Option<ETag>,
}

impl Properties {
    /// Builds properties from caller content. Reserved keys (`_id`, `_etag`) are dropped.
    pub fn new(fields: Document) -> Self {
        Self {
            fields: strip_reserved(fields),
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: ETag) -> Self {
        self.etag = Some(etag);
        self
    }

    pub fn fields(&self) -> &Document {
        &self.fields
    }

    pub fn etag(&self) -> Option<&ETag> {
        self.etag.as_ref()
    }

    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.fields.get(key)
    }

    /// Shallow merge: every top-level field of `patch` overwrites the current one.
    pub fn merged(&self, patch: Document) -> Self {
        let mut fields = self.fields.clone();
        for (key, value) in strip_reserved(patch) {
            fields.insert(key, value);
        }

        Self {
            fields,
            etag: self.etag,
        }
    }

    /// Renders the stored form: the fields plus the sentinel `_id` and the `_etag`.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert(ID_FIELD, PROPERTIES_ID);
        for (key, value) in &self.fields {
            document.insert(key.clone(), value.clone());
        }
        if let Some(etag) = self.etag {
            document.insert(ETAG_FIELD, etag);
        }
        document
    }

    /// Parses a stored properties document.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::InvalidDocument`] if the document does not carry the
    /// sentinel identifier.
    pub fn from_document(document: Document) -> DataAccessResult<Self> {
        if !is_properties_document(&document) {
            return Err(DataAccessError::InvalidDocument(format!(
                "expected a document with {ID_FIELD} = {PROPERTIES_ID:?}"
            )));
        }

        let etag = document.get(ETAG_FIELD).and_then(ETag::from_bson);

        Ok(Self {
            fields: strip_reserved(document),
            etag,
        })
    }
}

fn strip_reserved(mut document: Document) -> Document {
    document.remove(ID_FIELD);
    document.remove(ETAG_FIELD);
    document
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn stored_form_round_trips_fields_and_etag() {
        let etag = ETag::generate();
        let properties = Properties::new(doc! { "description": "orders", "_id": "ignored" })
            .with_etag(etag);

        let stored = properties.to_document();
        assert_eq!(stored.get_str(ID_FIELD).unwrap(), PROPERTIES_ID);
        assert_eq!(stored.get_object_id(ETAG_FIELD).unwrap(), etag.as_object_id());

        let parsed = Properties::from_document(stored).unwrap();
        assert_eq!(parsed, properties);
        assert_eq!(parsed.fields(), &doc! { "description": "orders" });
    }

    #[test]
    fn from_document_rejects_data_documents() {
        let result = Properties::from_document(doc! { "_id": 1, "a": 1 });
        assert!(matches!(result, Err(DataAccessError::InvalidDocument(_))));
    }

    #[test]
    fn merge_overwrites_shallowly() {
        let base = Properties::new(doc! { "a": 1, "b": { "x": 1, "y": 2 } });
        let merged = base.merged(doc! { "b": { "x": 5 }, "c": 3 });

        assert_eq!(merged.fields(), &doc! { "a": 1, "b": { "x": 5 }, "c": 3 });
    }

    #[test]
    fn etags_are_distinct_and_parseable() {
        let first = ETag::generate();
        let second = ETag::generate();

        assert_ne!(first, second);
        assert!(second > first);
        assert_eq!(ETag::parse(&first.to_string()), Some(first));
        assert_eq!(ETag::parse(&format!("\"{first}\"")), Some(first));
        assert_eq!(ETag::parse("not-a-tag"), None);
    }

    #[test]
    fn reserved_collection_names() {
        assert!(is_reserved_collection_name("_properties"));
        assert!(is_reserved_collection_name("system.indexes"));
        assert!(!is_reserved_collection_name("orders"));
    }
}
