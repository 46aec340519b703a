use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::document::{number_to_value, parent_is_object, remove_field, resolve_field, set_field};
use crate::error::{Error, Result};
use crate::query::{self, Query, SortOrder};
use crate::value::IndexValue;

// ---------------------------------------------------------------------------
// Expression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Expression {
    Literal(Value),
    FieldRef(String),
    /// `$sum`: numbers are summed, arrays are flattened one level first.
    Sum(Vec<Expression>),
    Size(Box<Expression>),
}

// ---------------------------------------------------------------------------
// Pipeline stages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Stage {
    Match(Query),
    /// Only `$sum` accumulators are supported.
    Group {
        key: Option<Expression>,
        sums: Vec<(String, Expression)>,
    },
    Sort(Vec<(String, SortOrder)>),
    Skip(u64),
    Limit(u64),
    Project {
        include: bool,
        fields: Vec<String>,
    },
    Count(String),
    Unwind {
        path: String,
        preserve_null: bool,
    },
    AddFields(Vec<(String, Expression)>),
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    Facet(Vec<(String, Pipeline)>),
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

fn to_f64(v: &Value) -> Option<f64> {
    v.as_f64()
}

fn stage_object<'a>(name: &str, body: &'a Value) -> Result<&'a Map<String, Value>> {
    body.as_object()
        .ok_or_else(|| Error::InvalidPipeline(format!("{name} must be an object")))
}

fn required_str<'a>(obj: &'a Map<String, Value>, stage: &str, key: &str) -> Result<&'a str> {
    obj.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidPipeline(format!("{stage} requires '{key}' string")))
}

// ---------------------------------------------------------------------------
// Expression parsing & evaluation
// ---------------------------------------------------------------------------

fn parse_expression(val: &Value) -> Result<Expression> {
    match val {
        Value::String(s) if s.starts_with('$') => Ok(Expression::FieldRef(s[1..].to_string())),
        Value::Object(map) if map.len() == 1 => {
            let Some((key, arg)) = map.iter().next() else {
                return Ok(Expression::Literal(val.clone()));
            };
            match key.as_str() {
                "$sum" => {
                    let exprs = match arg {
                        Value::Array(items) => items
                            .iter()
                            .map(parse_expression)
                            .collect::<Result<Vec<_>>>()?,
                        other => vec![parse_expression(other)?],
                    };
                    Ok(Expression::Sum(exprs))
                }
                "$size" => Ok(Expression::Size(Box::new(parse_expression(arg)?))),
                op if op.starts_with('$') => Err(Error::InvalidPipeline(format!(
                    "unknown expression operator: {op}"
                ))),
                _ => Ok(Expression::Literal(val.clone())),
            }
        }
        _ => Ok(Expression::Literal(val.clone())),
    }
}

impl Expression {
    fn eval(&self, doc: &Value) -> Value {
        match self {
            Expression::Literal(v) => v.clone(),
            Expression::FieldRef(path) => resolve_field(doc, path),
            Expression::Sum(exprs) => {
                let mut sum = 0.0_f64;
                for e in exprs {
                    match e.eval(doc) {
                        Value::Array(items) => sum += items.iter().filter_map(to_f64).sum::<f64>(),
                        other => sum += to_f64(&other).unwrap_or(0.0),
                    }
                }
                number_to_value(sum)
            }
            Expression::Size(inner) => match inner.eval(doc) {
                Value::Array(items) => json!(items.len()),
                _ => Value::Null,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Stage parsing helpers
// ---------------------------------------------------------------------------

fn parse_accumulator(val: &Value) -> Result<Expression> {
    let obj = val
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| Error::InvalidPipeline("accumulator must have exactly one operator".into()))?;
    let Some((op, arg)) = obj.iter().next() else {
        return Err(Error::InvalidPipeline("empty accumulator".into()));
    };
    match op.as_str() {
        "$sum" => parse_expression(arg),
        _ => Err(Error::InvalidPipeline(format!("unknown accumulator: {op}"))),
    }
}

fn parse_group_stage(val: &Value) -> Result<Stage> {
    let obj = stage_object("$group", val)?;
    let id_val = obj
        .get("_id")
        .ok_or_else(|| Error::InvalidPipeline("$group requires '_id' field".into()))?;
    let key = match id_val {
        Value::Null => None,
        other => Some(parse_expression(other)?),
    };

    let mut sums = Vec::new();
    for (name, spec) in obj {
        if name != "_id" {
            sums.push((name.clone(), parse_accumulator(spec)?));
        }
    }
    Ok(Stage::Group { key, sums })
}

fn parse_sort(val: &Value) -> Result<Vec<(String, SortOrder)>> {
    let obj = stage_object("$sort", val)?;
    let mut fields = Vec::new();
    for (field, dir) in obj {
        let order = match dir.as_i64() {
            Some(1) => SortOrder::Asc,
            Some(-1) => SortOrder::Desc,
            _ => {
                return Err(Error::InvalidPipeline(
                    "sort direction must be 1 or -1".into(),
                ));
            }
        };
        fields.push((field.clone(), order));
    }
    Ok(fields)
}

fn parse_project(val: &Value) -> Result<Stage> {
    let obj = stage_object("$project", val)?;
    let mut include = None;
    let mut fields = Vec::new();
    for (field, spec) in obj {
        let this = match spec {
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_i64() != Some(0),
            _ => {
                return Err(Error::InvalidPipeline(format!(
                    "$project value for '{field}' must be 0/1 or a boolean"
                )));
            }
        };
        match include {
            None => include = Some(this),
            Some(mode) if mode != this => {
                return Err(Error::InvalidPipeline(
                    "$project cannot mix inclusion and exclusion".into(),
                ));
            }
            Some(_) => {}
        }
        fields.push(field.clone());
    }
    Ok(Stage::Project {
        include: include.unwrap_or(false),
        fields,
    })
}

fn parse_unwind(val: &Value) -> Result<(String, bool)> {
    let (path, preserve) = match val {
        Value::String(s) => (s.as_str(), false),
        Value::Object(obj) => {
            let path = required_str(obj, "$unwind", "path")?;
            let preserve = obj
                .get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            (path, preserve)
        }
        _ => {
            return Err(Error::InvalidPipeline(
                "$unwind must be a string or object".into(),
            ));
        }
    };
    let path = path
        .strip_prefix('$')
        .ok_or_else(|| Error::InvalidPipeline("$unwind path must start with $".into()))?;
    Ok((path.to_string(), preserve))
}

fn parse_lookup(val: &Value) -> Result<Stage> {
    let obj = stage_object("$lookup", val)?;
    Ok(Stage::Lookup {
        from: required_str(obj, "$lookup", "from")?.to_string(),
        local_field: required_str(obj, "$lookup", "localField")?.to_string(),
        foreign_field: required_str(obj, "$lookup", "foreignField")?.to_string(),
        as_field: required_str(obj, "$lookup", "as")?.to_string(),
    })
}

fn parse_facet(val: &Value) -> Result<Stage> {
    let obj = stage_object("$facet", val)?;
    if obj.is_empty() {
        return Err(Error::InvalidPipeline("$facet requires at least one output".into()));
    }
    let mut outputs = Vec::with_capacity(obj.len());
    for (name, sub) in obj {
        let sub = Pipeline::parse(sub)?;
        if sub.stages.iter().any(|s| matches!(s, Stage::Facet(_))) {
            return Err(Error::InvalidPipeline("$facet cannot be nested".into()));
        }
        outputs.push((name.clone(), sub));
    }
    Ok(Stage::Facet(outputs))
}

// ---------------------------------------------------------------------------
// Stage execution
// ---------------------------------------------------------------------------

fn exec_match(docs: Vec<Value>, query: &Query) -> Vec<Value> {
    docs.into_iter()
        .filter(|doc| query::matches_value(query, doc))
        .collect()
}

fn exec_group(
    docs: Vec<Value>,
    key: Option<&Expression>,
    sums: &[(String, Expression)],
) -> Vec<Value> {
    let mut groups: HashMap<String, (Value, Vec<f64>)> = HashMap::new();
    let mut insertion_order: Vec<String> = Vec::new();

    for doc in &docs {
        let key_val = key.map_or(Value::Null, |expr| expr.eval(doc));
        let key_str = key_val.to_string();

        let (_, totals) = groups.entry(key_str.clone()).or_insert_with(|| {
            insertion_order.push(key_str);
            (key_val, vec![0.0; sums.len()])
        });
        for ((_, expr), total) in sums.iter().zip(totals.iter_mut()) {
            if let Some(n) = to_f64(&expr.eval(doc)) {
                *total += n;
            }
        }
    }

    let mut results = Vec::with_capacity(insertion_order.len());
    for key_str in &insertion_order {
        let Some((key_val, totals)) = groups.remove(key_str) else {
            continue;
        };
        let mut doc = Map::new();
        doc.insert("_id".to_string(), key_val);
        for ((name, _), total) in sums.iter().zip(totals) {
            doc.insert(name.clone(), number_to_value(total));
        }
        results.push(Value::Object(doc));
    }
    results
}

/// Stable sort, so documents equal on every key keep their input order.
fn exec_sort(mut docs: Vec<Value>, sort_fields: &[(String, SortOrder)]) -> Vec<Value> {
    docs.sort_by(|a, b| {
        for (field, order) in sort_fields {
            let aiv = IndexValue::from_json(&resolve_field(a, field));
            let biv = IndexValue::from_json(&resolve_field(b, field));
            let cmp = match order {
                SortOrder::Asc => aiv.cmp(&biv),
                SortOrder::Desc => biv.cmp(&aiv),
            };
            if cmp.is_ne() {
                return cmp;
            }
        }
        std::cmp::Ordering::Equal
    });
    docs
}

fn exec_project(docs: Vec<Value>, include: bool, fields: &[String]) -> Vec<Value> {
    docs.into_iter()
        .map(|mut doc| {
            if !include {
                for name in fields {
                    remove_field(&mut doc, name);
                }
                return doc;
            }
            let mut result = json!({});
            if let Some(id) = doc.get("_id") {
                set_field(&mut result, "_id", id.clone());
            }
            for name in fields {
                let val = resolve_field(&doc, name);
                if !val.is_null() {
                    set_field(&mut result, name, val);
                }
            }
            result
        })
        .collect()
}

/// Emits nothing for an empty input, like MongoDB's `$count`.
fn exec_count(docs: Vec<Value>, field_name: &str) -> Vec<Value> {
    if docs.is_empty() {
        Vec::new()
    } else {
        vec![json!({ field_name: docs.len() })]
    }
}

fn exec_unwind(docs: Vec<Value>, path: &str, preserve_null: bool) -> Vec<Value> {
    let mut result = Vec::new();
    for mut doc in docs {
        match resolve_field(&doc, path) {
            Value::Array(arr) if arr.is_empty() => {
                if preserve_null {
                    remove_field(&mut doc, path);
                    result.push(doc);
                }
            }
            Value::Array(arr) => {
                for item in arr {
                    let mut new_doc = doc.clone();
                    set_field(&mut new_doc, path, item);
                    result.push(new_doc);
                }
            }
            Value::Null => {
                if preserve_null {
                    result.push(doc);
                }
            }
            // Non-array, non-null: pass through unchanged
            _ => result.push(doc),
        }
    }
    result
}

fn exec_add_fields(docs: Vec<Value>, fields: &[(String, Expression)]) -> Vec<Value> {
    docs.into_iter()
        .map(|mut doc| {
            for (name, expr) in fields {
                let val = expr.eval(&doc);
                set_field(&mut doc, name, val);
            }
            doc
        })
        .collect()
}

fn exec_lookup<F>(
    docs: Vec<Value>,
    from: &str,
    local_field: &str,
    foreign_field: &str,
    as_field: &str,
    lookup_fn: &F,
) -> Result<Vec<Value>>
where
    F: Fn(&str, &Value) -> Result<Vec<Value>>,
{
    let mut result = Vec::with_capacity(docs.len());
    for mut doc in docs {
        // A relation nested under a missing parent (e.g. `order.customer`
        // with no order) stays missing instead of conjuring an empty parent.
        if !parent_is_object(&doc, as_field) {
            result.push(doc);
            continue;
        }
        let foreign_docs = match resolve_field(&doc, local_field) {
            Value::Null => Vec::new(),
            Value::Array(ids) if ids.is_empty() => Vec::new(),
            Value::Array(ids) => lookup_fn(from, &json!({ foreign_field: { "$in": ids } }))?,
            local_val => lookup_fn(from, &json!({ foreign_field: local_val }))?,
        };
        set_field(&mut doc, as_field, Value::Array(foreign_docs));
        result.push(doc);
    }
    Ok(result)
}

fn exec_facet<F>(docs: Vec<Value>, outputs: &[(String, Pipeline)], lookup_fn: &F) -> Result<Vec<Value>>
where
    F: Fn(&str, &Value) -> Result<Vec<Value>>,
{
    let mut out = Map::new();
    for (name, sub) in outputs {
        let docs = sub.execute_from(0, docs.clone(), lookup_fn)?;
        out.insert(name.clone(), Value::Array(docs));
    }
    Ok(vec![Value::Object(out)])
}

// ---------------------------------------------------------------------------
// Pipeline parsing & execution
// ---------------------------------------------------------------------------

impl Pipeline {
    pub fn parse(pipeline_json: &Value) -> Result<Self> {
        let arr = pipeline_json
            .as_array()
            .ok_or_else(|| Error::InvalidPipeline("pipeline must be an array".into()))?;

        let mut stages = Vec::with_capacity(arr.len());
        for stage_val in arr {
            let obj = stage_val
                .as_object()
                .filter(|o| o.len() == 1)
                .ok_or_else(|| {
                    Error::InvalidPipeline("each stage must be an object with one key".into())
                })?;
            let Some((stage_name, stage_body)) = obj.iter().next() else {
                continue;
            };

            let stage = match stage_name.as_str() {
                "$match" => Stage::Match(query::parse_query(stage_body)?),
                "$group" => parse_group_stage(stage_body)?,
                "$sort" => Stage::Sort(parse_sort(stage_body)?),
                "$skip" => Stage::Skip(stage_body.as_u64().ok_or_else(|| {
                    Error::InvalidPipeline("$skip must be a non-negative integer".into())
                })?),
                "$limit" => {
                    let n = stage_body.as_u64().filter(|n| *n > 0).ok_or_else(|| {
                        Error::InvalidPipeline("$limit must be a positive integer".into())
                    })?;
                    Stage::Limit(n)
                }
                "$project" => parse_project(stage_body)?,
                "$count" => {
                    let field = stage_body.as_str().filter(|s| !s.is_empty()).ok_or_else(|| {
                        Error::InvalidPipeline("$count must be a non-empty string".into())
                    })?;
                    Stage::Count(field.to_string())
                }
                "$unwind" => {
                    let (path, preserve_null) = parse_unwind(stage_body)?;
                    Stage::Unwind { path, preserve_null }
                }
                "$addFields" => {
                    let obj = stage_object("$addFields", stage_body)?;
                    let fields = obj
                        .iter()
                        .map(|(k, v)| Ok((k.clone(), parse_expression(v)?)))
                        .collect::<Result<Vec<_>>>()?;
                    Stage::AddFields(fields)
                }
                "$lookup" => parse_lookup(stage_body)?,
                "$facet" => parse_facet(stage_body)?,
                _ => {
                    return Err(Error::InvalidPipeline(format!(
                        "unknown stage: {stage_name}"
                    )));
                }
            };
            stages.push(stage);
        }

        Ok(Pipeline { stages })
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// If the first stage is `$match`, return its query and the index to
    /// resume execution from, so the collection scan can apply it directly.
    pub fn take_leading_match(&self) -> (Option<&Query>, usize) {
        match self.stages.first() {
            Some(Stage::Match(q)) => (Some(q), 1),
            _ => (None, 0),
        }
    }

    /// Execute stages starting from `start`. `lookup_fn` resolves `$lookup`
    /// against another collection with a query document.
    pub fn execute_from<F>(&self, start: usize, docs: Vec<Value>, lookup_fn: &F) -> Result<Vec<Value>>
    where
        F: Fn(&str, &Value) -> Result<Vec<Value>>,
    {
        let mut current = docs;
        for stage in &self.stages[start.min(self.stages.len())..] {
            current = match stage {
                Stage::Match(q) => exec_match(current, q),
                Stage::Group { key, sums } => exec_group(current, key.as_ref(), sums),
                Stage::Sort(fields) => exec_sort(current, fields),
                Stage::Skip(n) => current.into_iter().skip(*n as usize).collect(),
                Stage::Limit(n) => current.into_iter().take(*n as usize).collect(),
                Stage::Project { include, fields } => exec_project(current, *include, fields),
                Stage::Count(field) => exec_count(current, field),
                Stage::Unwind { path, preserve_null } => exec_unwind(current, path, *preserve_null),
                Stage::AddFields(fields) => exec_add_fields(current, fields),
                Stage::Lookup {
                    from,
                    local_field,
                    foreign_field,
                    as_field,
                } => exec_lookup(current, from, local_field, foreign_field, as_field, lookup_fn)?,
                Stage::Facet(outputs) => exec_facet(current, outputs, lookup_fn)?,
            };
        }
        Ok(current)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
