//! Filter, sort and paginate over serialized entities
//!
//! Conditions address fields by dotted camelCase path as persisted
//! (`source.parentId`, `evaluation.effortEstimate.value`). Numeric array
//! segments index into arrays.

use crate::error::{StoreError, StoreResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

/// Comparison operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    StartsWith,
    EndsWith,
    /// `value` is a boolean: whether the field must be present and non-null
    Exists,
    /// `value` is a regular expression
    Matches,
}

/// Filter tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Filter {
    /// Single field condition
    Condition {
        /// Dotted field path
        field: String,
        /// Operator
        op: FilterOp,
        /// Operand
        #[serde(default)]
        value: Value,
    },
    /// Every child matches
    And(Vec<Filter>),
    /// At least one child matches
    Or(Vec<Filter>),
    /// Child does not match
    Not(Box<Filter>),
}

impl Filter {
    /// Field condition
    pub fn condition(field: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        Self::Condition {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field == value`
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::condition(field, FilterOp::Eq, value)
    }

    /// Negation
    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    fn compile(&self) -> StoreResult<Compiled<'_>> {
        Ok(match self {
            Self::Condition { field, op, value } => {
                let regex = if *op == FilterOp::Matches {
                    let pattern = value.as_str().ok_or_else(|| {
                        StoreError::validation(format!("matches on '{field}' needs a string pattern"))
                    })?;
                    Some(Regex::new(pattern).map_err(|e| {
                        StoreError::validation(format!("invalid pattern for '{field}': {e}"))
                    })?)
                } else {
                    None
                };
                if matches!(op, FilterOp::In | FilterOp::NotIn) && !value.is_array() {
                    return Err(StoreError::validation(format!(
                        "{op:?} on '{field}' needs an array operand"
                    )));
                }
                Compiled::Condition {
                    path: field.split('.').collect(),
                    op: *op,
                    value,
                    regex,
                }
            }
            Self::And(children) => Compiled::And(children.iter().map(Self::compile).collect::<StoreResult<_>>()?),
            Self::Or(children) => Compiled::Or(children.iter().map(Self::compile).collect::<StoreResult<_>>()?),
            Self::Not(child) => Compiled::Not(Box::new(child.compile()?)),
        })
    }
}

enum Compiled<'a> {
    Condition {
        path: Vec<&'a str>,
        op: FilterOp,
        value: &'a Value,
        regex: Option<Regex>,
    },
    And(Vec<Compiled<'a>>),
    Or(Vec<Compiled<'a>>),
    Not(Box<Compiled<'a>>),
}

impl Compiled<'_> {
    fn matches(&self, doc: &Value) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.matches(doc)),
            Self::Or(children) => children.iter().any(|c| c.matches(doc)),
            Self::Not(child) => !child.matches(doc),
            Self::Condition {
                path,
                op,
                value,
                regex,
            } => {
                let field = lookup(doc, path).filter(|v| !v.is_null());
                match op {
                    FilterOp::Exists => field.is_some() == value.as_bool().unwrap_or(true),
                    FilterOp::Eq => field.is_some_and(|f| loosely_equal(f, value)),
                    FilterOp::Ne => !field.is_some_and(|f| loosely_equal(f, value)),
                    FilterOp::Gt => compare(field, value) == Some(Ordering::Greater),
                    FilterOp::Gte => matches!(compare(field, value), Some(Ordering::Greater | Ordering::Equal)),
                    FilterOp::Lt => compare(field, value) == Some(Ordering::Less),
                    FilterOp::Lte => matches!(compare(field, value), Some(Ordering::Less | Ordering::Equal)),
                    FilterOp::In => field.is_some_and(|f| member_of(f, value)),
                    FilterOp::NotIn => !field.is_some_and(|f| member_of(f, value)),
                    FilterOp::Contains => field.is_some_and(|f| match (f, value) {
                        (Value::String(s), Value::String(needle)) => s.contains(needle.as_str()),
                        (Value::Array(items), needle) => items.iter().any(|i| loosely_equal(i, needle)),
                        _ => false,
                    }),
                    FilterOp::StartsWith => string_pair(field, value).is_some_and(|(s, p)| s.starts_with(p)),
                    FilterOp::EndsWith => string_pair(field, value).is_some_and(|(s, p)| s.ends_with(p)),
                    FilterOp::Matches => match (field, regex) {
                        (Some(Value::String(s)), Some(re)) => re.is_match(s),
                        _ => false,
                    },
                }
            }
        }
    }
}

/// Resolve a dotted path inside a document
#[must_use]
pub fn lookup<'v>(doc: &'v Value, path: &[&str]) -> Option<&'v Value> {
    path.iter().try_fold(doc, |current, segment| match current {
        Value::Object(map) => map.get(*segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn member_of(field: &Value, set: &Value) -> bool {
    let Value::Array(candidates) = set else {
        return false;
    };
    match field {
        Value::Array(items) => items
            .iter()
            .any(|item| candidates.iter().any(|c| loosely_equal(item, c))),
        single => candidates.iter().any(|c| loosely_equal(single, c)),
    }
}

fn string_pair<'a>(field: Option<&'a Value>, operand: &'a Value) -> Option<(&'a str, &'a str)> {
    Some((field?.as_str()?, operand.as_str()?))
}

fn compare(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (field?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[allow(missing_docs)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// One sort key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    /// Dotted field path
    pub field: String,
    /// Direction
    #[serde(default)]
    pub direction: SortDirection,
}

impl SortField {
    /// Ascending key
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    /// Descending key
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Offset/limit window
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Items to skip
    #[serde(default)]
    pub offset: usize,
    /// Maximum items to return; `None` returns the rest
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Pagination {
    /// Window of `limit` items after `offset`
    #[must_use]
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }
}

/// Filter, sort and pagination for one query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySpec {
    /// Filter tree; `None` matches everything
    pub filter: Option<Filter>,
    /// Sort keys, most significant first
    pub sort: Vec<SortField>,
    /// Window
    pub pagination: Pagination,
}

impl QuerySpec {
    /// Match everything
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With filter
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Add a sort key
    #[must_use]
    pub fn sort_by(mut self, key: SortField) -> Self {
        self.sort.push(key);
        self
    }

    /// With window
    #[must_use]
    pub fn paginate(mut self, offset: usize, limit: usize) -> Self {
        self.pagination = Pagination::new(offset, limit);
        self
    }
}

/// One page of query results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult<T> {
    /// Items in the window
    pub items: Vec<T>,
    /// Matches before pagination
    pub total: usize,
    /// Applied offset
    pub offset: usize,
    /// Applied limit
    pub limit: Option<usize>,
    /// Whether matches exist past this window
    pub has_more: bool,
}

/// Run `spec` over `items`
pub fn apply<T: Serialize>(items: Vec<T>, spec: &QuerySpec) -> StoreResult<QueryResult<T>> {
    let compiled = spec.filter.as_ref().map(Filter::compile).transpose()?;

    let mut matched = Vec::with_capacity(items.len());
    for item in items {
        let doc = serde_json::to_value(&item)?;
        if compiled.as_ref().map_or(true, |f| f.matches(&doc)) {
            matched.push((doc, item));
        }
    }

    if !spec.sort.is_empty() {
        let keys: Vec<(Vec<&str>, SortDirection)> = spec
            .sort
            .iter()
            .map(|s| (s.field.split('.').collect(), s.direction))
            .collect();
        matched.sort_by(|(a, _), (b, _)| {
            keys.iter()
                .map(|(path, direction)| {
                    let ord = sort_order(lookup(a, path), lookup(b, path));
                    match direction {
                        SortDirection::Asc => ord,
                        SortDirection::Desc => ord.reverse(),
                    }
                })
                .find(|ord| *ord != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    let total = matched.len();
    let Pagination { offset, limit } = spec.pagination;
    let items: Vec<T> = matched
        .into_iter()
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .map(|(_, item)| item)
        .collect();
    let has_more = offset.saturating_add(items.len()) < total;

    Ok(QueryResult {
        items,
        total,
        offset,
        limit,
        has_more,
    })
}

/// Total order for sorting; missing and null sort last
fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Bool(_) => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Array(_) => 3,
            Value::Object(_) => 4,
            Value::Null => 5,
        }
    }
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
