use regex::{Regex, RegexBuilder};
use serde_json::Value as JsonValue;

use crate::document::field_ref;
use crate::error::{Error, Result};
use crate::value::IndexValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

// ---------------------------------------------------------------------------
// Query AST
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum QueryOp {
    Eq(IndexValue),
    Ne(IndexValue),
    Gt(IndexValue),
    Gte(IndexValue),
    Lt(IndexValue),
    Lte(IndexValue),
    In(Vec<IndexValue>),
    Exists(bool),
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub enum Query {
    Field { field: String, op: QueryOp },
    And(Vec<Query>),
    Or(Vec<Query>),
    All,
}

// ---------------------------------------------------------------------------
// Parsing: JSON → Query AST
// ---------------------------------------------------------------------------

pub fn parse_query(query: &JsonValue) -> Result<Query> {
    let obj = query
        .as_object()
        .ok_or_else(|| Error::InvalidQuery("query must be a JSON object".into()))?;

    let mut conditions: Vec<Query> = Vec::new();

    for (key, value) in obj {
        match key.as_str() {
            "$and" | "$or" => {
                let arr = value
                    .as_array()
                    .ok_or_else(|| Error::InvalidQuery(format!("{key} must be an array")))?;
                if arr.is_empty() {
                    return Err(Error::InvalidQuery(format!("{key} must not be empty")));
                }
                let subs = arr.iter().map(parse_query).collect::<Result<Vec<_>>>()?;
                conditions.push(if key == "$and" {
                    Query::And(subs)
                } else {
                    Query::Or(subs)
                });
            }
            field => match value.as_object() {
                Some(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                    for (op_key, op_val) in ops {
                        if op_key == "$options" {
                            continue;
                        }
                        let op = parse_op(op_key, op_val, ops.get("$options"))?;
                        conditions.push(Query::Field {
                            field: field.to_string(),
                            op,
                        });
                    }
                }
                _ => conditions.push(Query::Field {
                    field: field.to_string(),
                    op: QueryOp::Eq(IndexValue::from_json(value)),
                }),
            },
        }
    }

    Ok(match conditions.len() {
        0 => Query::All,
        1 => conditions.remove(0),
        _ => Query::And(conditions),
    })
}

fn parse_op(op_key: &str, op_val: &JsonValue, options: Option<&JsonValue>) -> Result<QueryOp> {
    match op_key {
        "$eq" => Ok(QueryOp::Eq(IndexValue::from_json(op_val))),
        "$ne" => Ok(QueryOp::Ne(IndexValue::from_json(op_val))),
        "$gt" => Ok(QueryOp::Gt(IndexValue::from_json(op_val))),
        "$gte" => Ok(QueryOp::Gte(IndexValue::from_json(op_val))),
        "$lt" => Ok(QueryOp::Lt(IndexValue::from_json(op_val))),
        "$lte" => Ok(QueryOp::Lte(IndexValue::from_json(op_val))),
        "$in" => {
            let arr = op_val
                .as_array()
                .ok_or_else(|| Error::InvalidQuery("$in must be an array".into()))?;
            Ok(QueryOp::In(arr.iter().map(IndexValue::from_json).collect()))
        }
        "$exists" => {
            let b = op_val
                .as_bool()
                .ok_or_else(|| Error::InvalidQuery("$exists must be a boolean".into()))?;
            Ok(QueryOp::Exists(b))
        }
        "$regex" => {
            let pattern = op_val
                .as_str()
                .ok_or_else(|| Error::InvalidQuery("$regex must be a string".into()))?;
            let flags = options.and_then(JsonValue::as_str).unwrap_or("");
            let regex = RegexBuilder::new(pattern)
                .case_insensitive(flags.contains('i'))
                .multi_line(flags.contains('m'))
                .build()
                .map_err(|e| Error::InvalidQuery(format!("bad $regex: {e}")))?;
            Ok(QueryOp::Regex(regex))
        }
        _ => Err(Error::InvalidQuery(format!("unknown operator: {op_key}"))),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

pub fn matches_value(query: &Query, data: &JsonValue) -> bool {
    match query {
        Query::All => true,
        Query::Field { field, op } => {
            let field_val = field_ref(data, field);
            match op {
                QueryOp::Exists(expected) => field_val.is_some() == *expected,
                QueryOp::Regex(re) => field_val
                    .and_then(JsonValue::as_str)
                    .is_some_and(|s| re.is_match(s)),
                _ => {
                    let Some(val) = field_val else {
                        return false;
                    };
                    let iv = IndexValue::from_json(val);
                    match op {
                        QueryOp::Eq(v) => iv == *v,
                        QueryOp::Ne(v) => iv != *v,
                        QueryOp::Gt(v) => iv > *v,
                        QueryOp::Gte(v) => iv >= *v,
                        QueryOp::Lt(v) => iv < *v,
                        QueryOp::Lte(v) => iv <= *v,
                        QueryOp::In(vals) => vals.contains(&iv),
                        QueryOp::Exists(_) | QueryOp::Regex(_) => false,
                    }
                }
            }
        }
        Query::And(subs) => subs.iter().all(|s| matches_value(s, data)),
        Query::Or(subs) => subs.iter().any(|s| matches_value(s, data)),
    }
}
