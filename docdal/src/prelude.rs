//! Convenient re-exports of commonly used types from docdal.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docdal::prelude::*;
//! ```

pub use bson::{Document, doc};

pub use docdal_core::{
    access::DataAccess,
    backend::{StoreBackend, StoreBackendBuilder, StoreCursor},
    concurrency::{OperationResult, StatusCode},
    config::{CursorPoolConfig, DataAccessConfig},
    error::{DataAccessError, DataAccessResult},
    metadata::{CollectionId, ETag, Properties, Resource},
    page::PageWindow,
    pool::{AllocationPolicy, PoolStats},
    query::{Expr, FieldOp, Filter, QueryDescriptor, QueryVisitor, Sort, SortDirection},
};
