//! Filter compilation, projection/sort/skip/limit, and query planning
//! (spec.md §4.3).
//!
//! The planner itself lives on `Collection` (it needs to see the index
//! catalogue); this module owns the filter AST, its evaluation against a
//! document, and the result-shaping stages the executor runs after
//! candidates are fetched.

use corvid_core::error::{CorvidError, CorvidResult};
use corvid_core::value::{Document, Value};
use std::collections::HashSet;

/// A comparison operator a filter leaf may use.
#[derive(Debug, Clone, PartialEq)]
pub enum CompareOp {
    /// `$eq` (or a bare value, which is sugar for `$eq`).
    Eq,
    /// `$ne`.
    Ne,
    /// `$gt`.
    Gt,
    /// `$gte`.
    Gte,
    /// `$lt`.
    Lt,
    /// `$lte`.
    Lte,
    /// `$in`.
    In,
    /// `$nin`.
    Nin,
    /// `$regex` (a simple substring/prefix match — no full regex engine).
    Regex,
    /// `$exists`.
    Exists,
    /// `$type`.
    Type,
}

/// A node in the compiled filter tree.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// `{path: {op: value}}` or `{path: value}` (sugar for `Eq`).
    Compare {
        /// Dotted field path.
        path: String,
        /// Which comparison to run.
        op: CompareOp,
        /// The operator's argument.
        value: Value,
    },
    /// `$and` of sub-predicates (also the implicit top-level conjunction of
    /// a filter document's fields).
    And(Vec<Predicate>),
    /// `$or` of sub-predicates.
    Or(Vec<Predicate>),
    /// `$not` of one sub-predicate.
    Not(Box<Predicate>),
    /// Matches every document (an empty filter).
    MatchAll,
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

fn compare_values(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Timestamp(x), Value::Timestamp(y)) => Some(x.cmp(y)),
        _ => numeric_cmp(a, b),
    }
}

/// Equality used by filter comparisons: numeric coercion first, then exact
/// match (spec.md §4.4's array-operator equality chain, reused here since
/// filter `$eq` needs the same forgiving semantics).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    match (a, b) {
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        _ => a == b,
    }
}

fn type_tag(value: &Value) -> &'static str {
    value.type_name()
}

/// Compile a filter document into a predicate tree. Top-level fields are
/// implicitly AND-ed; `$and`/`$or`/`$not` are recognized as logical
/// combinators wherever they appear as a field name.
pub fn compile(filter: &Document) -> CorvidResult<Predicate> {
    if filter.is_empty() {
        return Ok(Predicate::MatchAll);
    }
    let mut clauses = Vec::new();
    for (path, value) in filter.iter() {
        clauses.push(compile_field(path, value)?);
    }
    if clauses.len() == 1 {
        Ok(clauses.into_iter().next().unwrap())
    } else {
        Ok(Predicate::And(clauses))
    }
}

fn compile_field(path: &str, value: &Value) -> CorvidResult<Predicate> {
    match path {
        "$and" => Ok(Predicate::And(compile_predicate_list(value)?)),
        "$or" => Ok(Predicate::Or(compile_predicate_list(value)?)),
        "$not" => {
            let Value::Document(inner) = value else {
                return Err(CorvidError::invalid_argument("$not requires a filter document"));
            };
            Ok(Predicate::Not(Box::new(compile(inner)?)))
        }
        _ => compile_leaf(path, value),
    }
}

fn compile_predicate_list(value: &Value) -> CorvidResult<Vec<Predicate>> {
    let Value::Array(items) = value else {
        return Err(CorvidError::invalid_argument("$and/$or require an array of filter documents"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Document(doc) => compile(doc),
            _ => Err(CorvidError::invalid_argument("$and/$or elements must be documents")),
        })
        .collect()
}

fn compile_leaf(path: &str, value: &Value) -> CorvidResult<Predicate> {
    match value {
        Value::Document(ops) if ops.iter().all(|(k, _)| k.starts_with('$')) && !ops.is_empty() => {
            let mut clauses = Vec::new();
            for (op_name, arg) in ops.iter() {
                let op = parse_op(op_name)?;
                clauses.push(Predicate::Compare {
                    path: path.to_string(),
                    op,
                    value: arg.clone(),
                });
            }
            if clauses.len() == 1 {
                Ok(clauses.into_iter().next().unwrap())
            } else {
                Ok(Predicate::And(clauses))
            }
        }
        _ => Ok(Predicate::Compare {
            path: path.to_string(),
            op: CompareOp::Eq,
            value: value.clone(),
        }),
    }
}

fn parse_op(name: &str) -> CorvidResult<CompareOp> {
    Ok(match name {
        "$eq" => CompareOp::Eq,
        "$ne" => CompareOp::Ne,
        "$gt" => CompareOp::Gt,
        "$gte" => CompareOp::Gte,
        "$lt" => CompareOp::Lt,
        "$lte" => CompareOp::Lte,
        "$in" => CompareOp::In,
        "$nin" => CompareOp::Nin,
        "$regex" => CompareOp::Regex,
        "$exists" => CompareOp::Exists,
        "$type" => CompareOp::Type,
        other => return Err(CorvidError::invalid_argument(format!("unknown operator {other}"))),
    })
}

/// Evaluate a compiled predicate against a document.
pub fn matches(predicate: &Predicate, doc: &Document) -> bool {
    match predicate {
        Predicate::MatchAll => true,
        Predicate::And(clauses) => clauses.iter().all(|c| matches(c, doc)),
        Predicate::Or(clauses) => clauses.iter().any(|c| matches(c, doc)),
        Predicate::Not(inner) => !matches(inner, doc),
        Predicate::Compare { path, op, value } => eval_compare(doc.get_path(path), op, value),
    }
}

fn eval_compare(found: Option<&Value>, op: &CompareOp, arg: &Value) -> bool {
    match op {
        CompareOp::Exists => {
            let want = matches!(arg, Value::Bool(true));
            found.is_some() == want
        }
        CompareOp::Type => found.map(type_tag) == arg.as_str(),
        _ => {
            let Some(found) = found else {
                return matches!(op, CompareOp::Ne | CompareOp::Nin);
            };
            match op {
                CompareOp::Eq => values_equal(found, arg),
                CompareOp::Ne => !values_equal(found, arg),
                CompareOp::Gt => compare_values(found, arg) == Some(std::cmp::Ordering::Greater),
                CompareOp::Gte => matches!(
                    compare_values(found, arg),
                    Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
                ),
                CompareOp::Lt => compare_values(found, arg) == Some(std::cmp::Ordering::Less),
                CompareOp::Lte => matches!(
                    compare_values(found, arg),
                    Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                ),
                CompareOp::In => match arg {
                    Value::Array(items) => items.iter().any(|v| values_equal(found, v)),
                    _ => false,
                },
                CompareOp::Nin => match arg {
                    Value::Array(items) => !items.iter().any(|v| values_equal(found, v)),
                    _ => true,
                },
                CompareOp::Regex => match (found, arg) {
                    (Value::String(s), Value::String(pattern)) => s.contains(pattern.as_str()),
                    _ => false,
                },
                CompareOp::Exists | CompareOp::Type => unreachable!(),
            }
        }
    }
}

/// Which fields a result document retains.
#[derive(Debug, Clone)]
pub enum Projection {
    /// Keep only these fields (`_id` is added unless explicitly excluded
    /// via a separate `Exclude`).
    Include(HashSet<String>),
    /// Drop these fields, keep everything else.
    Exclude(HashSet<String>),
}

/// Apply a projection to a document, producing a new one.
pub fn apply_projection(doc: &Document, projection: &Projection) -> Document {
    match projection {
        Projection::Include(fields) => {
            let mut out = Document::new();
            if let Some(id) = doc.get("_id") {
                out.set("_id", id.clone());
            }
            for (path, value) in doc.iter() {
                if path != "_id" && fields.contains(path) {
                    out.set(path, value.clone());
                }
            }
            out
        }
        Projection::Exclude(fields) => {
            let mut out = Document::new();
            for (path, value) in doc.iter() {
                if !fields.contains(path) {
                    out.set(path, value.clone());
                }
            }
            out
        }
    }
}

/// Ascending or descending sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Sort documents in place by an ordered list of (field path, direction).
pub fn sort_documents(docs: &mut [Document], sort: &[(String, SortDir)]) {
    if sort.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for (path, dir) in sort {
            let av = a.get_path(path);
            let bv = b.get_path(path);
            let ord = match (av, bv) {
                (Some(x), Some(y)) => compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Greater,
                (None, Some(_)) => std::cmp::Ordering::Less,
                (None, None) => std::cmp::Ordering::Equal,
            };
            let ord = if *dir == SortDir::Desc { ord.reverse() } else { ord };
            if ord != std::cmp::Ordering::Equal {
                return ord;
            }
        }
        std::cmp::Ordering::Equal
    });
}

/// Options accompanying a `find`/`count` call.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Field projection.
    pub projection: Option<Projection>,
    /// Ordered sort keys.
    pub sort: Vec<(String, SortDir)>,
    /// Number of leading matches to skip.
    pub skip: usize,
    /// Maximum number of matches to return.
    pub limit: Option<usize>,
}

/// Apply sort, skip, limit, and projection, in that order, to an already
/// filtered result set (spec.md §4.3's final executor stage).
pub fn shape_results(mut docs: Vec<Document>, options: &QueryOptions) -> Vec<Document> {
    sort_documents(&mut docs, &options.sort);
    let skipped: Vec<Document> = docs.into_iter().skip(options.skip).collect();
    let limited: Vec<Document> = match options.limit {
        Some(limit) => skipped.into_iter().take(limit).collect(),
        None => skipped,
    };
    match &options.projection {
        Some(projection) => limited.iter().map(|d| apply_projection(d, projection)).collect(),
        None => limited,
    }
}

/// Top-level equality bindings a predicate guarantees, for the planner's
/// index-seek fast path. Only `Compare { op: Eq, .. }` clauses directly
/// under the implicit top-level `And` are collected — clauses under `Or`
/// or `Not` don't guarantee the binding holds for every matching document,
/// so they're left out rather than risk a false seek.
pub fn equality_bindings(predicate: &Predicate) -> std::collections::HashMap<String, Value> {
    let mut out = std::collections::HashMap::new();
    let clauses: Vec<&Predicate> = match predicate {
        Predicate::And(clauses) => clauses.iter().collect(),
        other => vec![other],
    };
    for clause in clauses {
        if let Predicate::Compare { path, op: CompareOp::Eq, value } = clause {
            out.insert(path.clone(), value.clone());
        }
    }
    out
}

/// A chosen execution plan, returned by `Collection::explain`.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Name of the index chosen, if any (`None` means full scan).
    pub index_used: Option<String>,
    /// Whether every field used by the filter, sort, and projection is
    /// present in the chosen index's key, so the source document never
    /// needs to be fetched.
    pub covered: bool,
    /// Estimated number of candidate documents this plan will examine.
    pub estimated_cost: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use corvid_core::value::Value;

    fn doc_with(path: &str, value: Value) -> Document {
        let mut d = Document::new();
        d.set(path, value);
        d
    }

    #[test]
    fn bare_value_compiles_to_eq() {
        let mut filter = Document::new();
        filter.set("age", Value::I64(30));
        let pred = compile(&filter).unwrap();
        assert!(matches(&pred, &doc_with("age", Value::I64(30))));
        assert!(!matches(&pred, &doc_with("age", Value::I64(31))));
    }

    #[test]
    fn gte_operator_compiles_and_matches() {
        let mut ops = Document::new();
        ops.set("$gte", Value::I64(28));
        let mut filter = Document::new();
        filter.set("age", Value::Document(ops));
        let pred = compile(&filter).unwrap();
        assert!(matches(&pred, &doc_with("age", Value::I64(30))));
        assert!(!matches(&pred, &doc_with("age", Value::I64(20))));
    }

    #[test]
    fn and_of_top_level_fields() {
        let mut filter = Document::new();
        filter.set("a", Value::I64(1));
        filter.set("b", Value::I64(2));
        let pred = compile(&filter).unwrap();
        let mut doc = Document::new();
        doc.set("a", Value::I64(1));
        doc.set("b", Value::I64(2));
        assert!(matches(&pred, &doc));
        doc.set("b", Value::I64(3));
        assert!(!matches(&pred, &doc));
    }

    #[test]
    fn or_combinator() {
        let mut left = Document::new();
        left.set("a", Value::I64(1));
        let mut right = Document::new();
        right.set("a", Value::I64(2));
        let mut filter = Document::new();
        filter.set("$or", Value::Array(vec![Value::Document(left), Value::Document(right)]));
        let pred = compile(&filter).unwrap();
        assert!(matches(&pred, &doc_with("a", Value::I64(2))));
        assert!(!matches(&pred, &doc_with("a", Value::I64(3))));
    }

    #[test]
    fn exists_false_matches_missing_field() {
        let mut ops = Document::new();
        ops.set("$exists", Value::Bool(false));
        let mut filter = Document::new();
        filter.set("a", Value::Document(ops));
        let pred = compile(&filter).unwrap();
        assert!(matches(&pred, &Document::new()));
        assert!(!matches(&pred, &doc_with("a", Value::I64(1))));
    }

    #[test]
    fn skip_beyond_results_yields_empty() {
        let docs = vec![doc_with("a", Value::I64(1)), doc_with("a", Value::I64(2))];
        let options = QueryOptions {
            skip: 5,
            ..Default::default()
        };
        assert!(shape_results(docs, &options).is_empty());
    }

    #[test]
    fn equality_bindings_collects_top_level_eq_only() {
        let mut filter = Document::new();
        filter.set("status", Value::String("active".into()));
        filter.set("age", Value::Document({
            let mut ops = Document::new();
            ops.set("$gt", Value::I64(18));
            ops
        }));
        let pred = compile(&filter).unwrap();
        let bindings = equality_bindings(&pred);
        assert_eq!(bindings.get("status"), Some(&Value::String("active".into())));
        assert!(!bindings.contains_key("age"));
    }

    #[test]
    fn equality_bindings_ignores_or_clauses() {
        let mut left = Document::new();
        left.set("a", Value::I64(1));
        let mut right = Document::new();
        right.set("a", Value::I64(2));
        let mut filter = Document::new();
        filter.set("$or", Value::Array(vec![Value::Document(left), Value::Document(right)]));
        let pred = compile(&filter).unwrap();
        assert!(equality_bindings(&pred).is_empty());
    }

    #[test]
    fn sort_descending_orders_correctly() {
        let docs = vec![doc_with("n", Value::I64(1)), doc_with("n", Value::I64(3)), doc_with("n", Value::I64(2))];
        let options = QueryOptions {
            sort: vec![("n".to_string(), SortDir::Desc)],
            ..Default::default()
        };
        let shaped = shape_results(docs, &options);
        let values: Vec<i64> = shaped.iter().map(|d| d.get("n").unwrap().as_f64().unwrap() as i64).collect();
        assert_eq!(values, vec![3, 2, 1]);
    }
}
