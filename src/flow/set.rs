//! Flow Sets and Search Queries
//!
//! `SearchQuery` evaluation order: filter, sort, dedup, paginate.

use crate::flow::{Filter, Flow, FlowPredicate};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

/// Half-open window `[from, to)` over the sorted result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub from: usize,
    pub to: usize,
}

/// Structural search over flows
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchQuery {
    /// Records must match this filter (no filter matches everything)
    pub filter: Option<Filter>,
    /// Field to sort on, e.g. `Last`
    pub sort_by: Option<String>,
    pub sort_order: SortOrder,
    /// Keep only the first record per `dedup_by` value
    pub dedup: bool,
    /// Dedup key, `UUID` when unset
    pub dedup_by: Option<String>,
    pub pagination: Option<Pagination>,
}

impl SearchQuery {
    /// Query with only a filter
    pub fn with_filter(filter: Filter) -> Self {
        SearchQuery {
            filter: Some(filter),
            ..SearchQuery::default()
        }
    }
}

/// Unordered collection of decoded flows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowSet {
    pub flows: Vec<Flow>,
}

impl FlowSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    /// Append another batch of flows
    pub fn extend(&mut self, flows: Vec<Flow>) {
        self.flows.extend(flows);
    }

    /// Keep flows matching the predicate
    pub fn filter<P: FlowPredicate + ?Sized>(self, predicate: &P) -> FlowSet {
        FlowSet {
            flows: self
                .flows
                .into_iter()
                .filter(|f| predicate.matches(f))
                .collect(),
        }
    }

    /// Evaluate a full search query
    pub fn search_query(self, query: &SearchQuery) -> FlowSet {
        let mut set = match &query.filter {
            Some(filter) => self.filter(filter),
            None => self,
        };

        if let Some(sort_by) = &query.sort_by {
            set.sort_by_field(sort_by, query.sort_order);
        }

        if query.dedup {
            set.dedup_by_field(query.dedup_by.as_deref().unwrap_or("UUID"));
        }

        if let Some(Pagination { from, to }) = query.pagination {
            let end = to.min(set.flows.len());
            let start = from.min(end);
            set.flows.truncate(end);
            set.flows.drain(..start);
        }

        set
    }

    /// Stable sort; flows missing the field sort first
    pub fn sort_by_field(&mut self, key: &str, order: SortOrder) {
        self.flows.sort_by(|a, b| {
            let ord = match (a.field(key), b.field(key)) {
                (Some(x), Some(y)) => x.compare(&y),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            match order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            }
        });
    }

    /// Keep the first flow for each distinct value of `key`
    pub fn dedup_by_field(&mut self, key: &str) {
        let mut seen = HashSet::new();
        self.flows.retain(|f| match f.field(key) {
            Some(v) => seen.insert(v.to_key()),
            None => true,
        });
    }
}

impl From<Vec<Flow>> for FlowSet {
    fn from(flows: Vec<Flow>) -> Self {
        FlowSet { flows }
    }
}

impl IntoIterator for FlowSet {
    type Item = Flow;
    type IntoIter = std::vec::IntoIter<Flow>;

    fn into_iter(self) -> Self::IntoIter {
        self.flows.into_iter()
    }
}
