//! Query translation from docdal expressions to MongoDB query syntax.
//!
//! This module translates query descriptors into the filter, sort and projection documents
//! the MongoDB query engine executes.

use bson::{Bson, Document, doc};

use docdal_core::{
    error::{DataAccessError, DataAccessResult},
    metadata::{ID_FIELD, PROPERTIES_ID},
    query::{Expr, FieldOp, QueryDescriptor, QueryVisitor, Sort, SortDirection},
};

/// Translates docdal query expressions into MongoDB query documents.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Builds the filter for a data read: every filter of the query, and never the properties
    /// document.
    pub fn data_filter(filters: &[Expr]) -> DataAccessResult<Document> {
        let mut clauses = vec![Bson::Document(doc! { ID_FIELD: { "$ne": PROPERTIES_ID } })];
        for (index, expr) in filters.iter().enumerate() {
            let translated = MongoQueryTranslator.visit_expr(expr).map_err(|reason| {
                DataAccessError::query_parameter(format!("filter[{index}]"), reason)
            })?;
            clauses.push(Bson::Document(translated));
        }

        Ok(doc! { "$and": clauses })
    }

    /// Sort keys in significance order, or `None` for natural order.
    pub fn sort(sort_by: &[Sort]) -> Option<Document> {
        if sort_by.is_empty() {
            return None;
        }

        let mut sort = Document::new();
        for key in sort_by {
            sort.insert(
                key.field.clone(),
                match key.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                },
            );
        }
        Some(sort)
    }

    /// Inclusion projection of the query keys, or `None` for whole documents.
    pub fn projection(query: &QueryDescriptor) -> Option<Document> {
        if query.keys().is_empty() {
            return None;
        }

        let mut projection = Document::new();
        for key in query.keys() {
            projection.insert(key.clone(), 1);
        }
        Some(projection)
    }
}

fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = String;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    // top-level $not does not exist; $nor of one expression negates it
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => doc! { "$regex": escape_regex(s) },
                    Bson::Array(arr) => doc! { "$all": arr },
                    _ => return Err(format!("{} requires a string or array value", op.name())),
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": { "$regex": escape_regex(s) } },
                    Bson::Array(arr) => doc! { "$not": { "$all": arr } },
                    _ => return Err(format!("{} requires a string or array value", op.name())),
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("^{}", escape_regex(s)) },
                    _ => return Err(format!("{} requires a string value", op.name())),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => doc! { "$regex": format!("{}$", escape_regex(s)) },
                    _ => return Err(format!("{} requires a string value", op.name())),
                },
                FieldOp::AnyOf => doc! { "$in": value },
                FieldOp::NoneOf => doc! { "$nin": value },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docdal_core::query::Filter;

    #[test]
    fn data_filter_excludes_properties_and_keeps_order() {
        let filter = MongoQueryTranslator::data_filter(&[
            Filter::eq("status", "open"),
            Filter::gt("qty", 5).not(),
        ])
        .unwrap();

        assert_eq!(
            filter,
            doc! {
                "$and": [
                    { "_id": { "$ne": "_properties" } },
                    { "status": { "$eq": "open" } },
                    { "$nor": [{ "qty": { "$gt": 5 } }] },
                ]
            }
        );
    }

    #[test]
    fn regex_operators_escape_their_operand() {
        let translated = MongoQueryTranslator
            .visit_expr(&Filter::starts_with("sku", "a.b"))
            .unwrap();

        assert_eq!(translated, doc! { "sku": { "$regex": "^a\\.b" } });
    }

    #[test]
    fn sort_and_projection_documents() {
        let query = QueryDescriptor::builder()
            .sort_by("-created")
            .sort_by("name")
            .keys(["qty"])
            .build()
            .unwrap();

        assert_eq!(
            MongoQueryTranslator::sort(query.sort_by()),
            Some(doc! { "created": -1, "name": 1 })
        );
        assert_eq!(MongoQueryTranslator::projection(&query), Some(doc! { "qty": 1 }));
        assert_eq!(MongoQueryTranslator::sort(&[]), None);
    }
}
