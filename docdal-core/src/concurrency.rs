//! Optimistic concurrency control for database and collection properties.
//!
//! Callers describe a write with three flags (`updating`, `patching`, `check_etag`) and an
//! optional request tag. This module turns them into a single [`WriteCondition`] that the
//! backend checks and applies atomically, then maps the backend's [`WriteOutcome`] to an
//! [`OperationResult`]:
//!
//! | updating | existing | check_etag | tag      | status               |
//! |----------|----------|------------|----------|----------------------|
//! | false    | absent   |            |          | `Created`            |
//! | false    | present  |            |          | `Conflict`           |
//! | true     | absent   |            |          | `NotFound`           |
//! | true     | present  | false      |          | `Updated`            |
//! | true     | present  | true       | match    | `Updated`            |
//! | true     | present  | true       | mismatch | `PreconditionFailed` |

use bson::Document;
use std::fmt;

use crate::metadata::{ETag, Properties};

/// The state a resource must be in for a write to be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// The resource must not exist yet.
    Absent,
    /// The resource must exist; its tag is not compared.
    Present,
    /// The resource must exist and its stored tag must equal the given one.
    /// `None` (no usable request tag) never matches.
    EtagMatches(Option<ETag>),
}

/// What a backend observed about a resource at write time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceState<'a> {
    Absent,
    Present { etag: Option<&'a ETag> },
}

impl WriteCondition {
    /// Condition for an upsert, following the decision table in the module docs.
    pub fn for_upsert(updating: bool, check_etag: bool, request_etag: Option<&str>) -> Self {
        match (updating, check_etag) {
            (false, _) => WriteCondition::Absent,
            (true, false) => WriteCondition::Present,
            (true, true) => WriteCondition::EtagMatches(request_etag.and_then(ETag::parse)),
        }
    }

    /// Condition for a delete.
    pub fn for_delete(check_etag: bool, request_etag: Option<&str>) -> Self {
        if check_etag {
            WriteCondition::EtagMatches(request_etag.and_then(ETag::parse))
        } else {
            WriteCondition::Present
        }
    }

    /// Checks the condition against the current state.
    ///
    /// Backends call this inside the same critical section (or as the same conditional store
    /// operation) that applies the write.
    pub fn check(&self, state: ResourceState<'_>) -> WriteOutcome {
        match (self, state) {
            (WriteCondition::Absent, ResourceState::Absent) => WriteOutcome::Applied,
            (WriteCondition::Absent, ResourceState::Present { .. }) => WriteOutcome::Exists,
            (_, ResourceState::Absent) => WriteOutcome::Missing,
            (WriteCondition::Present, ResourceState::Present { .. }) => WriteOutcome::Applied,
            (WriteCondition::EtagMatches(expected), ResourceState::Present { etag }) => {
                match (expected, etag) {
                    (Some(expected), Some(stored)) if expected == stored => WriteOutcome::Applied,
                    _ => WriteOutcome::EtagMismatch,
                }
            }
        }
    }
}

/// How the new properties relate to the stored ones.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertiesWrite {
    /// Replace every field (the sentinel identifier is kept).
    Replace(Document),
    /// Shallow merge: top-level fields of the patch overwrite the stored ones.
    Merge(Document),
}

impl PropertiesWrite {
    pub fn new(content: Document, patching: bool) -> Self {
        if patching {
            PropertiesWrite::Merge(content)
        } else {
            PropertiesWrite::Replace(content)
        }
    }

    /// Computes the properties to store, stamped with `etag`.
    pub fn apply(self, current: Option<&Properties>, etag: ETag) -> Properties {
        match (self, current) {
            (PropertiesWrite::Merge(patch), Some(current)) => current.merged(patch).with_etag(etag),
            (PropertiesWrite::Merge(content), None) | (PropertiesWrite::Replace(content), _) => {
                Properties::new(content).with_etag(etag)
            }
        }
    }
}

/// Result of a conditional write as reported by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The condition held and the write was applied.
    Applied,
    /// The resource does not exist; nothing was written.
    Missing,
    /// The resource already exists; nothing was written.
    Exists,
    /// The stored tag differs from the request tag; nothing was written.
    EtagMismatch,
}

impl WriteOutcome {
    /// Maps the outcome to the caller-facing result. `applied` is the status of a successful
    /// write and `etag` the tag it stored, if any.
    pub fn into_result(self, applied: StatusCode, etag: Option<ETag>) -> OperationResult {
        match self {
            WriteOutcome::Applied => OperationResult::new(applied, etag),
            WriteOutcome::Missing => OperationResult::new(StatusCode::NotFound, None),
            WriteOutcome::Exists => OperationResult::new(StatusCode::Conflict, None),
            WriteOutcome::EtagMismatch => OperationResult::new(StatusCode::PreconditionFailed, None),
        }
    }
}

/// Outcome of a mutating operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Created,
    Updated,
    Deleted,
    Conflict,
    NotFound,
    PreconditionFailed,
}

impl StatusCode {
    /// The HTTP status conventionally used for this outcome.
    pub fn http_status(&self) -> u16 {
        match self {
            StatusCode::Created => 201,
            StatusCode::Updated => 200,
            StatusCode::Deleted => 204,
            StatusCode::Conflict => 409,
            StatusCode::NotFound => 404,
            StatusCode::PreconditionFailed => 412,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, StatusCode::Created | StatusCode::Updated | StatusCode::Deleted)
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusCode::Created => "CREATED",
            StatusCode::Updated => "UPDATED",
            StatusCode::Deleted => "DELETED",
            StatusCode::Conflict => "CONFLICT",
            StatusCode::NotFound => "NOT_FOUND",
            StatusCode::PreconditionFailed => "PRECONDITION_FAILED",
        };
        f.write_str(name)
    }
}

/// Status of an upsert or delete, plus the tag issued by a successful upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationResult {
    status: StatusCode,
    etag: Option<ETag>,
}

impl OperationResult {
    pub fn new(status: StatusCode, etag: Option<ETag>) -> Self {
        Self { status, etag }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The freshly issued tag; `None` unless the write created or updated properties.
    pub fn etag(&self) -> Option<ETag> {
        self.etag
    }
}
