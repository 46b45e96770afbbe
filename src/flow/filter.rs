//! Flow Filter Predicates
//!
//! A small boolean predicate language over `Flow::field`. Filters are plain
//! data (serde-friendly) so they can arrive from a query request and be
//! evaluated per record without compilation.

use crate::flow::Flow;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A field value borrowed from a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue<'a> {
    Str(&'a str),
    Int(i64),
}

impl FieldValue<'_> {
    /// Total order used by sorting: integers before strings
    pub fn compare(&self, other: &FieldValue<'_>) -> Ordering {
        match (self, other) {
            (FieldValue::Int(a), FieldValue::Int(b)) => a.cmp(b),
            (FieldValue::Str(a), FieldValue::Str(b)) => a.cmp(b),
            (FieldValue::Int(_), FieldValue::Str(_)) => Ordering::Less,
            (FieldValue::Str(_), FieldValue::Int(_)) => Ordering::Greater,
        }
    }

    /// Owned string form, used as a dedup key
    pub fn to_key(&self) -> String {
        match self {
            FieldValue::Str(s) => (*s).to_string(),
            FieldValue::Int(i) => i.to_string(),
        }
    }
}

/// Right-hand side of a term comparison
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TermValue {
    Int(i64),
    String(String),
}

impl From<&str> for TermValue {
    fn from(s: &str) -> Self {
        TermValue::String(s.to_string())
    }
}

impl From<String> for TermValue {
    fn from(s: String) -> Self {
        TermValue::String(s)
    }
}

impl From<i64> for TermValue {
    fn from(i: i64) -> Self {
        TermValue::Int(i)
    }
}

/// Boolean predicate over flow fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// All sub-filters match (empty matches everything)
    And(Vec<Filter>),
    /// Any sub-filter matches (empty matches nothing)
    Or(Vec<Filter>),
    Not(Box<Filter>),
    /// Field equals value
    Term { key: String, value: TermValue },
    Gt { key: String, value: i64 },
    Gte { key: String, value: i64 },
    Lt { key: String, value: i64 },
    Lte { key: String, value: i64 },
    /// String field starts with value
    Prefix { key: String, value: String },
    /// Field is absent or an empty string
    Null { key: String },
}

impl Filter {
    pub fn term(key: &str, value: impl Into<TermValue>) -> Self {
        Filter::Term {
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn gt(key: &str, value: i64) -> Self {
        Filter::Gt {
            key: key.to_string(),
            value,
        }
    }

    pub fn gte(key: &str, value: i64) -> Self {
        Filter::Gte {
            key: key.to_string(),
            value,
        }
    }

    pub fn lt(key: &str, value: i64) -> Self {
        Filter::Lt {
            key: key.to_string(),
            value,
        }
    }

    pub fn lte(key: &str, value: i64) -> Self {
        Filter::Lte {
            key: key.to_string(),
            value,
        }
    }

    pub fn prefix(key: &str, value: &str) -> Self {
        Filter::Prefix {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    /// Flows that were active at some point in `[from, to]`
    pub fn active_between(from: i64, to: i64) -> Self {
        Filter::And(vec![Filter::gte("Last", from), Filter::lte("Start", to)])
    }

    /// Evaluate against one flow
    pub fn eval(&self, flow: &Flow) -> bool {
        match self {
            Filter::And(filters) => filters.iter().all(|f| f.eval(flow)),
            Filter::Or(filters) => filters.iter().any(|f| f.eval(flow)),
            Filter::Not(inner) => !inner.eval(flow),
            Filter::Term { key, value } => match (flow.field(key), value) {
                (Some(FieldValue::Str(s)), TermValue::String(v)) => s == v.as_str(),
                (Some(FieldValue::Int(i)), TermValue::Int(v)) => i == *v,
                (Some(FieldValue::Int(i)), TermValue::String(v)) => v.parse::<i64>().ok() == Some(i),
                (Some(FieldValue::Str(s)), TermValue::Int(v)) => s.parse::<i64>().ok() == Some(*v),
                (None, _) => false,
            },
            Filter::Gt { key, value } => int_field(flow, key).is_some_and(|i| i > *value),
            Filter::Gte { key, value } => int_field(flow, key).is_some_and(|i| i >= *value),
            Filter::Lt { key, value } => int_field(flow, key).is_some_and(|i| i < *value),
            Filter::Lte { key, value } => int_field(flow, key).is_some_and(|i| i <= *value),
            Filter::Prefix { key, value } => match flow.field(key) {
                Some(FieldValue::Str(s)) => s.starts_with(value.as_str()),
                _ => false,
            },
            Filter::Null { key } => match flow.field(key) {
                None => true,
                Some(FieldValue::Str(s)) => s.is_empty(),
                Some(FieldValue::Int(_)) => false,
            },
        }
    }
}

fn int_field(flow: &Flow, key: &str) -> Option<i64> {
    match flow.field(key)? {
        FieldValue::Int(i) => Some(i),
        FieldValue::Str(s) => s.parse().ok(),
    }
}

/// Anything that can decide whether a flow belongs to a result set
pub trait FlowPredicate: Send + Sync {
    fn matches(&self, flow: &Flow) -> bool;
}

impl FlowPredicate for Filter {
    fn matches(&self, flow: &Flow) -> bool {
        self.eval(flow)
    }
}

impl<F> FlowPredicate for F
where
    F: Fn(&Flow) -> bool + Send + Sync,
{
    fn matches(&self, flow: &Flow) -> bool {
        self(flow)
    }
}
