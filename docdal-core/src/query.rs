//! Query descriptors: ordered sort keys, ordered filter clauses and ordered projection keys.
//!
//! A [`QueryDescriptor`] is built once per request and passed through the stack untouched.
//! The order of its sort keys, filters and projection keys is preserved end-to-end, both in
//! what the store receives and in the descriptor's [`QueryFingerprint`].
//!
//! # Query Building
//!
//! ```ignore
//! use docdal::query::{QueryDescriptor, Filter};
//!
//! let query = QueryDescriptor::builder()
//!     .filter(Filter::eq("status", "shipped"))
//!     .filter_json(r#"{"qty": {"$gt": 5}}"#)
//!     .sort_by("-created_at")
//!     .key("qty")
//!     .build()?;
//! ```
//!
//! # Filter Expression API
//!
//! The [`Filter`] struct provides a collection of static methods for building filter expressions:
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `not_contains`
//! - Existence: `exists`, `not_exists`
//! - Array: `any_of`, `none_of`
//! - Logical: `and`, `or`
//!
//! Store-native JSON clauses are parsed into the same expressions by [`crate::parse`].

use bson::Bson;
use std::fmt;

use crate::{
    error::{DataAccessError, DataAccessResult},
    parse,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

/// One sort key: which field to sort by and in which direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Sort {
    /// The field name to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Asc }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Sort { field: field.into(), direction: SortDirection::Desc }
    }
}

impl fmt::Display for Sort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.direction {
            SortDirection::Asc => write!(f, "+{}", self.field),
            SortDirection::Desc => write!(f, "-{}", self.field),
        }
    }
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldOp {
    /// Equal to (exact match).
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// String or array contains value.
    Contains,
    /// String or array does not contain value.
    NotContains,
    /// String starts with value.
    StartsWith,
    /// String ends with value.
    EndsWith,
    /// Field equals (or array field contains) any of the values.
    AnyOf,
    /// Field equals (or array field contains) none of the values.
    NoneOf,
}

impl FieldOp {
    /// Stable operator name used in fingerprints and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            FieldOp::Eq => "$eq",
            FieldOp::Ne => "$ne",
            FieldOp::Gt => "$gt",
            FieldOp::Gte => "$gte",
            FieldOp::Lt => "$lt",
            FieldOp::Lte => "$lte",
            FieldOp::Contains => "contains",
            FieldOp::NotContains => "not_contains",
            FieldOp::StartsWith => "starts_with",
            FieldOp::EndsWith => "ends_with",
            FieldOp::AnyOf => "$in",
            FieldOp::NoneOf => "$nin",
        }
    }
}

/// A filter expression for querying documents.
///
/// Expressions can be combined using logical operators (`And`, `Or`, `Not`)
/// to build complex filter predicates.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Checks if a field exists or doesn't exist.
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// The field name (dotted paths address nested fields).
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// The value to compare against.
        value: Bson,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines this expression with another using logical AND.
    ///
    /// If this expression is already an AND, the other expression is appended
    /// to the list. Otherwise, a new AND expression is created.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines this expression with another using logical OR.
    ///
    /// If this expression is already an OR, the other expression is appended
    /// to the list. Otherwise, a new OR expression is created.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    /// Negates this expression (logical NOT).
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// Helper struct for constructing filter expressions.
///
/// All methods accept field names and values as `Into<String>` and `Into<Bson>` for ergonomics.
pub struct Filter;

impl Filter {
    /// Matches documents where the field equals the specified value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Matches documents where the field does not equal the specified value.
    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Matches documents where the string field starts with the specified value.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Matches documents where the string field ends with the specified value.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Matches documents where the field (string or array) contains the specified value.
    pub fn contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    pub fn not_contains(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches documents where the field equals any of the values in the given array.
    pub fn any_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, value.into())
    }

    /// Matches documents where the field equals none of the values in the given array.
    pub fn none_of(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, value.into())
    }
}

/// Canonical text form of a [`QueryDescriptor`], used to key pooled cursors.
///
/// Two descriptors have the same fingerprint iff they carry the same clauses in the same order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryFingerprint(String);

impl QueryFingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QueryFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An immutable, validated description of how to select, order and shape documents.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryDescriptor {
    sort_by: Vec<Sort>,
    filters: Vec<Expr>,
    keys: Vec<String>,
    fingerprint: QueryFingerprint,
}

impl QueryDescriptor {
    /// A descriptor with no sort keys, filters or projection.
    pub fn empty() -> Self {
        Self::assemble(Vec::new(), Vec::new(), Vec::new())
    }

    /// Creates a new builder for fluent construction.
    pub fn builder() -> QueryDescriptorBuilder {
        QueryDescriptorBuilder::new()
    }

    /// Sort keys, most significant first.
    pub fn sort_by(&self) -> &[Sort] {
        &self.sort_by
    }

    /// Filter clauses; a document must match all of them.
    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    /// Projection keys; empty means whole documents.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn fingerprint(&self) -> &QueryFingerprint {
        &self.fingerprint
    }

    fn assemble(sort_by: Vec<Sort>, filters: Vec<Expr>, keys: Vec<String>) -> Self {
        let fingerprint = QueryFingerprint(format!(
            "sort=[{}];filter=[{}];keys=[{}]",
            sort_by
                .iter()
                .map(|sort| match sort.direction {
                    SortDirection::Asc => format!("+{:?}", sort.field),
                    SortDirection::Desc => format!("-{:?}", sort.field),
                })
                .collect::<Vec<_>>()
                .join(","),
            filters
                .iter()
                .map(|expr| CanonicalRenderer.render(expr))
                .collect::<Vec<_>>()
                .join(","),
            keys.iter()
                .map(|key| format!("{key:?}"))
                .collect::<Vec<_>>()
                .join(","),
        ));

        Self {
            sort_by,
            filters,
            keys,
            fingerprint,
        }
    }
}

impl Default for QueryDescriptor {
    fn default() -> Self {
        Self::empty()
    }
}

#[derive(Debug, Clone)]
enum PendingSort {
    Parsed(Sort),
    Raw(String),
}

#[derive(Debug, Clone)]
enum PendingFilter {
    Parsed(Expr),
    Raw(String),
}

/// Collects clauses in call order; [`QueryDescriptorBuilder::build`] validates them.
#[derive(Debug, Clone, Default)]
pub struct QueryDescriptorBuilder {
    sort_by: Vec<PendingSort>,
    filters: Vec<PendingFilter>,
    keys: Vec<String>,
}

impl QueryDescriptorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a typed filter expression.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.filters.push(PendingFilter::Parsed(filter));
        self
    }

    /// Appends a store-native JSON filter clause, e.g. `{"qty": {"$gt": 5}}`.
    pub fn filter_json(mut self, clause: impl Into<String>) -> Self {
        self.filters.push(PendingFilter::Raw(clause.into()));
        self
    }

    /// Appends several store-native JSON filter clauses, keeping their order.
    pub fn filters_json<I, S>(mut self, clauses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.filters
            .extend(clauses.into_iter().map(|clause| PendingFilter::Raw(clause.into())));
        self
    }

    /// Appends a sort key.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by.push(PendingSort::Parsed(Sort { field: field.into(), direction }));
        self
    }

    /// Appends a sort specification: `"field"`, `"+field"`, `"-field"` or a JSON object such as
    /// `{"a": 1, "b": -1}`.
    pub fn sort_by(mut self, spec: impl Into<String>) -> Self {
        self.sort_by.push(PendingSort::Raw(spec.into()));
        self
    }

    /// Appends a projection key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Parses and validates every clause and returns the immutable descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DataAccessError::QueryParameter`] naming the first malformed clause.
    pub fn build(self) -> DataAccessResult<QueryDescriptor> {
        let mut sort_by = Vec::with_capacity(self.sort_by.len());
        for (index, pending) in self.sort_by.into_iter().enumerate() {
            let clause = format!("sort[{index}]");
            match pending {
                PendingSort::Parsed(sort) => {
                    parse::validate_field_name(&sort.field)
                        .map_err(|reason| DataAccessError::query_parameter(&clause, reason))?;
                    sort_by.push(sort);
                }
                PendingSort::Raw(spec) => sort_by.extend(
                    parse::parse_sort(&spec).map_err(|reason| {
                        DataAccessError::query_parameter(format!("{clause} {spec}"), reason)
                    })?,
                ),
            }
        }

        let mut filters = Vec::with_capacity(self.filters.len());
        for (index, pending) in self.filters.into_iter().enumerate() {
            let clause = format!("filter[{index}]");
            let expr = match pending {
                PendingFilter::Parsed(expr) => Some(expr),
                PendingFilter::Raw(json) => parse::parse_filter(&json).map_err(|reason| {
                    DataAccessError::query_parameter(format!("{clause} {json}"), reason)
                })?,
            };

            if let Some(expr) = expr {
                ClauseValidator
                    .visit_expr(&expr)
                    .map_err(|reason| DataAccessError::query_parameter(&clause, reason))?;
                filters.push(expr);
            }
        }

        for (index, key) in self.keys.iter().enumerate() {
            parse::validate_field_name(key).map_err(|reason| {
                DataAccessError::query_parameter(format!("keys[{index}] {key}"), reason)
            })?;
        }

        Ok(QueryDescriptor::assemble(sort_by, filters, self.keys))
    }
}

/// Walks a filter expression tree. Backends implement it to translate or evaluate filters.
pub trait QueryVisitor {
    type Output;
    type Error;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(
        &mut self,
        field: &str,
        should_exist: bool,
    ) -> Result<Self::Output, Self::Error>;
    fn visit_field(
        &mut self,
        field: &str,
        op: &FieldOp,
        value: &Bson,
    ) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

/// Rejects expressions no backend can execute consistently.
struct ClauseValidator;

impl QueryVisitor for ClauseValidator {
    type Output = ();
    type Error = String;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<(), String> {
        if exprs.is_empty() {
            return Err("$and requires at least one expression".to_string());
        }
        exprs.iter().try_for_each(|expr| self.visit_expr(expr))
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<(), String> {
        if exprs.is_empty() {
            return Err("$or requires at least one expression".to_string());
        }
        exprs.iter().try_for_each(|expr| self.visit_expr(expr))
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<(), String> {
        self.visit_expr(expr)
    }

    fn visit_exists(&mut self, field: &str, _should_exist: bool) -> Result<(), String> {
        parse::validate_field_name(field)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<(), String> {
        parse::validate_field_name(field)?;

        let accepted = match op {
            FieldOp::StartsWith | FieldOp::EndsWith => matches!(value, Bson::String(_)),
            FieldOp::Contains | FieldOp::NotContains => {
                matches!(value, Bson::String(_) | Bson::Array(_))
            }
            FieldOp::AnyOf | FieldOp::NoneOf => matches!(value, Bson::Array(_)),
            _ => true,
        };

        if accepted {
            Ok(())
        } else {
            Err(format!("{} does not accept {value}", op.name()))
        }
    }
}

/// Renders an expression into its canonical fingerprint text.
struct CanonicalRenderer;

impl CanonicalRenderer {
    fn render(&mut self, expr: &Expr) -> String {
        match self.visit_expr(expr) {
            Ok(text) => text,
            Err(never) => match never {},
        }
    }

    fn render_list(&mut self, exprs: &[Expr]) -> String {
        exprs
            .iter()
            .map(|expr| self.render(expr))
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl QueryVisitor for CanonicalRenderer {
    type Output = String;
    type Error = std::convert::Infallible;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<String, Self::Error> {
        Ok(format!("and({})", self.render_list(exprs)))
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<String, Self::Error> {
        Ok(format!("or({})", self.render_list(exprs)))
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<String, Self::Error> {
        Ok(format!("not({})", self.render(expr)))
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<String, Self::Error> {
        Ok(format!("{field:?} $exists {should_exist}"))
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<String, Self::Error> {
        Ok(format!("{field:?} {} {value:?}", op.name()))
    }
}
