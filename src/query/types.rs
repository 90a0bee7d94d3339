use crate::document::types::{Filter, Sort};

/// A query against a model.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub filter: Filter,
    pub sort: Option<Sort>,
    /// Honoured only when the query resolves to a single collection.
    pub offset: Option<usize>,
    pub limit: Option<usize>,
    /// Never route through a secondary shard.
    pub force_primary: bool,
}

impl QueryRequest {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sort: None,
            offset: None,
            limit: None,
            force_primary: false,
        }
    }

    pub fn all() -> Self {
        Self::new(Filter::All)
    }

    pub fn sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn force_primary(mut self) -> Self {
        self.force_primary = true;
        self
    }
}

/// Which copy of the documents a sub-query reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuerySource {
    Primary,
    /// Secondary shard keyed on this attribute; results need rehydration.
    Secondary(String),
}
