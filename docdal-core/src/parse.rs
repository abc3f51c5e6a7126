//! Parsing of store-native (MongoDB-style JSON) filter and sort clauses.
//!
//! Supported filter operators: `$and`, `$or`, `$nor`, `$not`, `$eq`, `$ne`, `$gt`, `$gte`,
//! `$lt`, `$lte`, `$in`, `$nin`, `$exists`. Extended JSON `{"$oid": "..."}` values are read as
//! object ids. Errors are plain reasons; the caller attaches the clause position.

use bson::{Bson, Document, oid::ObjectId};
use serde_json::{Map, Value};

use crate::query::{Expr, FieldOp, Sort, SortDirection};

pub(crate) fn validate_field_name(field: &str) -> Result<(), String> {
    if field.is_empty() {
        return Err("field name must not be empty".to_string());
    }
    if field.starts_with('$') {
        return Err(format!("field name {field:?} must not start with '$'"));
    }
    if field.split('.').any(str::is_empty) {
        return Err(format!("field name {field:?} has an empty path segment"));
    }
    Ok(())
}

/// Parses a sort specification into one or more sort keys.
///
/// Accepts `"field"`, `"+field"`, `"-field"` or a JSON object of `field: 1 | -1` pairs.
pub fn parse_sort(spec: &str) -> Result<Vec<Sort>, String> {
    let spec = spec.trim();

    if spec.starts_with('{') {
        let object = match serde_json::from_str::<Value>(spec).map_err(|e| e.to_string())? {
            Value::Object(object) => object,
            _ => return Err("sort specification must be a JSON object".to_string()),
        };

        return object
            .into_iter()
            .map(|(field, direction)| {
                validate_field_name(&field)?;
                match direction.as_i64() {
                    Some(1) => Ok(Sort::asc(field)),
                    Some(-1) => Ok(Sort::desc(field)),
                    _ => Err(format!("sort direction for {field:?} must be 1 or -1")),
                }
            })
            .collect();
    }

    let (field, direction) = match spec.strip_prefix('-') {
        Some(field) => (field, SortDirection::Desc),
        None => (spec.strip_prefix('+').unwrap_or(spec), SortDirection::Asc),
    };
    validate_field_name(field)?;

    Ok(vec![Sort { field: field.to_string(), direction }])
}

/// Parses one JSON filter clause.
///
/// Returns `Ok(None)` for the empty object, which matches every document.
pub fn parse_filter(json: &str) -> Result<Option<Expr>, String> {
    match serde_json::from_str::<Value>(json).map_err(|e| e.to_string())? {
        Value::Object(object) if object.is_empty() => Ok(None),
        Value::Object(object) => parse_document(object).map(Some),
        _ => Err("filter must be a JSON object".to_string()),
    }
}

fn parse_document(object: Map<String, Value>) -> Result<Expr, String> {
    let mut exprs = Vec::with_capacity(object.len());

    for (key, value) in object {
        exprs.push(match key.as_str() {
            "$and" => Expr::And(parse_list(&key, value)?),
            "$or" => Expr::Or(parse_list(&key, value)?),
            "$nor" => Expr::Or(parse_list(&key, value)?).not(),
            op if op.starts_with('$') => return Err(format!("unsupported operator {op}")),
            _ => {
                validate_field_name(&key)?;
                parse_field(&key, value)?
            }
        });
    }

    Ok(collapse(exprs))
}

fn parse_list(op: &str, value: Value) -> Result<Vec<Expr>, String> {
    let Value::Array(items) = value else {
        return Err(format!("{op} requires an array"));
    };
    if items.is_empty() {
        return Err(format!("{op} requires at least one expression"));
    }

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(object) if !object.is_empty() => parse_document(object),
            _ => Err(format!("{op} entries must be non-empty objects")),
        })
        .collect()
}

fn parse_field(field: &str, value: Value) -> Result<Expr, String> {
    let operators = match value {
        Value::Object(object) if is_operator_object(&object) => object,
        Value::Object(object) if object.keys().any(|k| k.starts_with('$')) && !is_extended_json(&object) => {
            return Err(format!("{field:?} mixes operators and plain fields"));
        }
        other => return Ok(Expr::field(field.to_string(), FieldOp::Eq, json_to_bson(other))),
    };

    let mut exprs = Vec::with_capacity(operators.len());
    for (op, operand) in operators {
        let op = match op.as_str() {
            "$eq" => FieldOp::Eq,
            "$ne" => FieldOp::Ne,
            "$gt" => FieldOp::Gt,
            "$gte" => FieldOp::Gte,
            "$lt" => FieldOp::Lt,
            "$lte" => FieldOp::Lte,
            "$in" | "$nin" => {
                if !operand.is_array() {
                    return Err(format!("{op} on {field:?} requires an array"));
                }
                if op == "$in" { FieldOp::AnyOf } else { FieldOp::NoneOf }
            }
            "$exists" => {
                let should_exist = match &operand {
                    Value::Bool(flag) => *flag,
                    Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
                    _ => return Err(format!("$exists on {field:?} requires a boolean")),
                };
                exprs.push(Expr::Exists(field.to_string(), should_exist));
                continue;
            }
            "$not" => {
                let Value::Object(inner) = operand else {
                    return Err(format!("$not on {field:?} requires an operator object"));
                };
                if !is_operator_object(&inner) {
                    return Err(format!("$not on {field:?} requires an operator object"));
                }
                exprs.push(parse_field(field, Value::Object(inner))?.not());
                continue;
            }
            other => return Err(format!("unsupported operator {other} on {field:?}")),
        };

        exprs.push(Expr::field(field.to_string(), op, json_to_bson(operand)));
    }

    Ok(collapse(exprs))
}

fn collapse(mut exprs: Vec<Expr>) -> Expr {
    if exprs.len() == 1 {
        exprs.remove(0)
    } else {
        Expr::And(exprs)
    }
}

fn is_operator_object(object: &Map<String, Value>) -> bool {
    !object.is_empty() && object.keys().all(|k| k.starts_with('$')) && !is_extended_json(object)
}

fn is_extended_json(object: &Map<String, Value>) -> bool {
    object.len() == 1 && matches!(object.get("$oid"), Some(Value::String(_)))
}

/// Converts a JSON value into BSON. Integers keep the narrowest integer type that fits.
pub(crate) fn json_to_bson(value: Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(flag),
        Value::Number(number) => match number.as_i64() {
            Some(int) => match i32::try_from(int) {
                Ok(small) => Bson::Int32(small),
                Err(_) => Bson::Int64(int),
            },
            None => Bson::Double(number.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(text) => Bson::String(text),
        Value::Array(items) => Bson::Array(items.into_iter().map(json_to_bson).collect()),
        Value::Object(object) => {
            if let Some(Value::String(hex)) = object.get("$oid") {
                if object.len() == 1 {
                    if let Ok(oid) = ObjectId::parse_str(hex) {
                        return Bson::ObjectId(oid);
                    }
                }
            }

            let mut document = Document::new();
            for (key, value) in object {
                document.insert(key, json_to_bson(value));
            }
            Bson::Document(document)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use bson::doc;

    #[test]
    fn plain_values_are_equality() {
        assert_eq!(
            parse_filter(r#"{"status": "open"}"#).unwrap(),
            Some(Filter::eq("status", "open"))
        );
        assert_eq!(
            parse_filter(r#"{"address": {"city": "Rome"}}"#).unwrap(),
            Some(Filter::eq("address", doc! { "city": "Rome" }))
        );
    }

    #[test]
    fn operator_objects_become_conjunctions() {
        let expr = parse_filter(r#"{"qty": {"$gte": 5, "$lt": 10}}"#).unwrap().unwrap();

        assert_eq!(expr, Filter::and([Filter::gte("qty", 5), Filter::lt("qty", 10)]));
    }

    #[test]
    fn logical_operators() {
        let expr = parse_filter(r#"{"$or": [{"a": 1}, {"b": {"$in": [1, 2]}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            expr,
            Filter::or([Filter::eq("a", 1), Filter::any_of("b", vec![Bson::Int32(1), Bson::Int32(2)])])
        );

        let expr = parse_filter(r#"{"$nor": [{"a": 1}]}"#).unwrap().unwrap();
        assert_eq!(expr, Filter::or([Filter::eq("a", 1)]).not());

        let expr = parse_filter(r#"{"a": {"$not": {"$gt": 3}}}"#).unwrap().unwrap();
        assert_eq!(expr, Filter::gt("a", 3).not());

        let expr = parse_filter(r#"{"a": {"$exists": false}}"#).unwrap().unwrap();
        assert_eq!(expr, Filter::not_exists("a"));
    }

    #[test]
    fn object_ids_are_recognised() {
        let oid = ObjectId::new();
        let expr = parse_filter(&format!(r#"{{"_id": {{"$oid": "{}"}}}}"#, oid.to_hex()))
            .unwrap()
            .unwrap();

        assert_eq!(expr, Filter::eq("_id", oid));
    }

    #[test]
    fn malformed_clauses_are_rejected() {
        assert!(parse_filter("[1, 2]").is_err());
        assert!(parse_filter(r#"{"a": {"$regex": "x"}}"#).is_err());
        assert!(parse_filter(r#"{"$where": "1"}"#).is_err());
        assert!(parse_filter(r#"{"a": {"$in": 3}}"#).is_err());
        assert!(parse_filter(r#"{"$and": []}"#).is_err());
        assert!(parse_filter(r#"{"a": {"$gt": 1, "b": 2}}"#).is_err());
        assert!(parse_filter(r#"{"a": "#).is_err());
    }

    #[test]
    fn sort_specifications() {
        assert_eq!(parse_sort("name").unwrap(), vec![Sort::asc("name")]);
        assert_eq!(parse_sort("+name").unwrap(), vec![Sort::asc("name")]);
        assert_eq!(parse_sort("-created").unwrap(), vec![Sort::desc("created")]);
        assert_eq!(parse_sort(r#"{"a": -1}"#).unwrap(), vec![Sort::desc("a")]);
        assert!(parse_sort(r#"{"a": 2}"#).is_err());
        assert!(parse_sort("").is_err());
    }

    #[test]
    fn sort_objects_keep_their_key_order() {
        assert_eq!(
            parse_sort(r#"{"b": 1, "a": -1}"#).unwrap(),
            vec![Sort::asc("b"), Sort::desc("a")]
        );
    }

    #[test]
    fn embedded_documents_keep_their_key_order() {
        let expr = parse_filter(r#"{"size": {"w": 21, "h": 14, "uom": "cm"}}"#)
            .unwrap()
            .unwrap();

        let Expr::Field { value: Bson::Document(size), .. } = expr else {
            panic!("expected an equality on an embedded document, got {expr:?}");
        };
        assert_eq!(size.keys().collect::<Vec<_>>(), ["w", "h", "uom"]);
    }

    #[test]
    fn large_integers_widen() {
        assert_eq!(json_to_bson(serde_json::json!(7)), Bson::Int32(7));
        assert_eq!(json_to_bson(serde_json::json!(5_000_000_000i64)), Bson::Int64(5_000_000_000));
        assert_eq!(json_to_bson(serde_json::json!(1.5)), Bson::Double(1.5));
    }
}
