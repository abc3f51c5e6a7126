//! Query expression evaluation for in-memory document filtering.
//!
//! This module evaluates filter expressions against BSON documents, orders documents by sort
//! keys and applies projections. Field names may be dotted paths into nested documents.
//! Semantics follow the document store the MongoDB backend talks to, so both backends return
//! the same documents for the same query.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use std::cmp::Ordering;

use docdal_core::{
    metadata::ID_FIELD,
    query::{Expr, FieldOp, QueryVisitor, Sort, SortDirection},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numbers are normalized to `f64`. Types without a meaningful ordering collapse to `Null`.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    ObjectId(ObjectId),
    String(&'a str),
    Array(Vec<Comparable<'a>>),
    /// Fields in document order.
    Map(Vec<(&'a str, Comparable<'a>)>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null,
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position of the value's type in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting; values of different types order by type.
    pub(crate) fn total_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Ordering::Equal,
            (Comparable::Bool(a), Comparable::Bool(b)) => a.cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.total_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.cmp(b),
            (Comparable::Array(a), Comparable::Array(b)) => a
                .iter()
                .zip(b.iter())
                .map(|(x, y)| x.total_cmp(y))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            (Comparable::Map(a), Comparable::Map(b)) => a
                .iter()
                .zip(b.iter())
                .map(|((ka, va), (kb, vb))| ka.cmp(kb).then_with(|| va.total_cmp(vb)))
                .find(|ordering| ordering.is_ne())
                .unwrap_or_else(|| a.len().cmp(&b.len())),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    /// Range comparisons only match values of the same type.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Resolves a dotted path such as `customer.address.city`. Numeric segments index arrays.
pub(crate) fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Compares two documents by the given sort keys, most significant first. Missing fields sort
/// as null.
pub(crate) fn compare_documents(left: &Document, right: &Document, sort_by: &[Sort]) -> Ordering {
    for sort in sort_by {
        let l = lookup(left, &sort.field)
            .map(Comparable::from)
            .unwrap_or(Comparable::Null);
        let r = lookup(right, &sort.field)
            .map(Comparable::from)
            .unwrap_or(Comparable::Null);

        let ordering = match sort.direction {
            SortDirection::Asc => l.total_cmp(&r),
            SortDirection::Desc => r.total_cmp(&l),
        };
        if ordering.is_ne() {
            return ordering;
        }
    }

    Ordering::Equal
}

/// Keeps `_id` plus the listed keys. An empty key list keeps the whole document.
pub(crate) fn project(document: &Document, keys: &[String]) -> Document {
    if keys.is_empty() {
        return document.clone();
    }

    let mut projected = Document::new();
    if let Some(id) = document.get(ID_FIELD) {
        projected.insert(ID_FIELD, id.clone());
    }
    for key in keys {
        if let Some(value) = lookup(document, key) {
            insert_path(&mut projected, key, value.clone());
        }
    }

    projected
}

fn insert_path(target: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            target.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(target.get(head), Some(Bson::Document(_))) {
                target.insert(head, Document::new());
            }
            if let Ok(inner) = target.get_document_mut(head) {
                insert_path(inner, rest, value);
            }
        }
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> bool {
        match self.visit_expr(expr) {
            Ok(matched) => matched,
            Err(never) => match never {},
        }
    }

    /// Returns `true` if the document matches every expression.
    pub fn matches_all(document: &'a Document, exprs: &[Expr]) -> bool {
        let mut evaluator = DocumentEvaluator::new(document);
        exprs.iter().all(|expr| evaluator.evaluate(expr))
    }

    fn equals(field_value: &Bson, value: &Bson) -> bool {
        let expected = Comparable::from(value);
        match Comparable::from(field_value) {
            // an array field matches if the whole array or any element equals the value
            Comparable::Array(items) => {
                items.iter().any(|item| item == &expected)
                    || Comparable::from(field_value) == expected
            }
            actual => actual == expected,
        }
    }

    fn compare(field_value: &Bson, op: &FieldOp, value: &Bson) -> bool {
        let expected = Comparable::from(value);
        let holds = |actual: &Comparable<'_>| match actual.partial_cmp(&expected) {
            Some(ordering) => match op {
                FieldOp::Gt => ordering == Ordering::Greater,
                FieldOp::Gte => ordering != Ordering::Less,
                FieldOp::Lt => ordering == Ordering::Less,
                FieldOp::Lte => ordering != Ordering::Greater,
                _ => false,
            },
            None => false,
        };

        match Comparable::from(field_value) {
            Comparable::Array(items) => items.iter().any(holds),
            actual => holds(&actual),
        }
    }

    fn contains(field_value: &Bson, value: &Bson) -> bool {
        match (Comparable::from(field_value), Comparable::from(value)) {
            (Comparable::Array(items), Comparable::Array(values)) => {
                values.iter().all(|value| items.contains(value))
            }
            (Comparable::Array(items), single) => items.contains(&single),
            (Comparable::String(left), Comparable::String(right)) => left.contains(right),
            _ => false,
        }
    }

    fn any_of(field_value: Option<&Bson>, values: &Bson) -> bool {
        let Bson::Array(values) = values else {
            return false;
        };

        match field_value {
            Some(field_value) => values.iter().any(|value| Self::equals(field_value, value)),
            None => values.iter().any(|value| matches!(value, Bson::Null)),
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = std::convert::Infallible;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = lookup(self.document, field);

        // a missing field behaves like null for equality
        let matched = match op {
            FieldOp::Eq => match field_value {
                Some(field_value) => Self::equals(field_value, value),
                None => matches!(value, Bson::Null),
            },
            FieldOp::Ne => match field_value {
                Some(field_value) => !Self::equals(field_value, value),
                None => !matches!(value, Bson::Null),
            },
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                field_value.is_some_and(|field_value| Self::compare(field_value, op, value))
            }
            FieldOp::Contains => {
                field_value.is_some_and(|field_value| Self::contains(field_value, value))
            }
            FieldOp::NotContains => {
                !field_value.is_some_and(|field_value| Self::contains(field_value, value))
            }
            FieldOp::StartsWith => matches!(
                (field_value, value),
                (Some(Bson::String(left)), Bson::String(right)) if left.starts_with(right.as_str())
            ),
            FieldOp::EndsWith => matches!(
                (field_value, value),
                (Some(Bson::String(left)), Bson::String(right)) if left.ends_with(right.as_str())
            ),
            FieldOp::AnyOf => Self::any_of(field_value, value),
            FieldOp::NoneOf => !Self::any_of(field_value, value),
        };

        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docdal_core::query::Filter;

    fn order() -> Document {
        doc! {
            "_id": 7,
            "status": "shipped",
            "qty": 12,
            "tags": ["priority", "gift"],
            "customer": { "name": "Ada", "address": { "city": "Turin" } },
        }
    }

    #[test]
    fn dotted_paths_resolve_nested_fields() {
        let order = order();

        assert_eq!(lookup(&order, "customer.address.city"), Some(&Bson::String("Turin".into())));
        assert_eq!(lookup(&order, "tags.1"), Some(&Bson::String("gift".into())));
        assert_eq!(lookup(&order, "customer.phone"), None);
    }

    #[test]
    fn field_operators() {
        let order = order();
        let cases = [
            (Filter::eq("status", "shipped"), true),
            (Filter::eq("tags", "gift"), true),
            (Filter::gt("qty", 10), true),
            (Filter::lte("qty", 11), false),
            (Filter::gt("status", 3), false),
            (Filter::ne("missing", 1), true),
            (Filter::eq("missing", Bson::Null), true),
            (Filter::any_of("status", vec!["open", "shipped"]), true),
            (Filter::none_of("tags", vec!["gift"]), false),
            (Filter::starts_with("customer.name", "A"), true),
            (Filter::exists("customer.address"), true),
            (Filter::not_exists("customer.phone"), true),
        ];

        for (expr, expected) in cases {
            assert_eq!(
                DocumentEvaluator::new(&order).evaluate(&expr),
                expected,
                "{expr:?}"
            );
        }
    }

    #[test]
    fn logical_operators() {
        let order = order();
        let expr = Filter::or([Filter::eq("status", "open"), Filter::gte("qty", 12)]);

        assert!(DocumentEvaluator::new(&order).evaluate(&expr));
        assert!(!DocumentEvaluator::new(&order).evaluate(&expr.not()));
        assert!(DocumentEvaluator::matches_all(&order, &[]));
    }

    #[test]
    fn sort_is_multi_key_and_orders_across_types() {
        let sort_by = [Sort::asc("group"), Sort::desc("n")];
        let mut documents = vec![
            doc! { "group": "b", "n": 1 },
            doc! { "group": "a", "n": 1 },
            doc! { "group": "a", "n": 2 },
            doc! { "n": 9 },
        ];

        documents.sort_by(|a, b| compare_documents(a, b, &sort_by));

        assert_eq!(
            documents,
            vec![
                doc! { "n": 9 },
                doc! { "group": "a", "n": 2 },
                doc! { "group": "a", "n": 1 },
                doc! { "group": "b", "n": 1 },
            ]
        );
    }

    #[test]
    fn projection_keeps_id_and_nested_keys() {
        let projected = project(&order(), &["qty".to_string(), "customer.address.city".to_string()]);

        assert_eq!(
            projected,
            doc! { "_id": 7, "qty": 12, "customer": { "address": { "city": "Turin" } } }
        );
    }
}
