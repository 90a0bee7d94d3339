use super::types::{QueryRequest, QuerySource};
use crate::document::driver::Collection;
use crate::document::types::{Filter, Sort};
use crate::model::Model;

use std::sync::Arc;

/// One branch of a (possibly disjunctive) query and the collections it reads.
pub struct SubQuery {
    pub filter: Filter,
    pub source: QuerySource,
    pub collections: Vec<Arc<dyn Collection>>,
    /// No shard key was pinned; every primary node is scanned.
    pub full_scan: bool,
}

pub struct QueryPlan {
    pub sub_queries: Vec<SubQuery>,
}

impl QueryPlan {
    pub fn collection_count(&self) -> usize {
        self.sub_queries.iter().map(|sub| sub.collections.len()).sum()
    }

    pub fn needs_rehydration(&self) -> bool {
        self.sub_queries
            .iter()
            .any(|sub| matches!(sub.source, QuerySource::Secondary(_)))
    }
}

/// Splits a top-level disjunction and routes each branch: primary shards first, then the
/// first covering secondary shard, then a scan of every primary node.
pub fn plan(model: &Model, request: &QueryRequest) -> QueryPlan {
    let branches = match &request.filter {
        Filter::Or(branches) if !branches.is_empty() => branches.clone(),
        other => vec![other.clone()],
    };
    let sub_queries = branches
        .into_iter()
        .map(|filter| plan_branch(model, filter, request.sort.as_ref(), request.force_primary))
        .collect();
    QueryPlan { sub_queries }
}

fn plan_branch(model: &Model, filter: Filter, sort: Option<&Sort>, force_primary: bool) -> SubQuery {
    if let Some(collections) = model.router().get_collections_to_query(&filter, sort) {
        return SubQuery {
            filter,
            source: QuerySource::Primary,
            collections,
            full_scan: false,
        };
    }

    if !force_primary {
        for shard in model.secondary_shards() {
            if let Some(collections) = shard
                .model()
                .router()
                .get_collections_to_query(&filter, sort)
            {
                tracing::debug!("Query on {} served by secondary shard {}", model.name(), shard.key());
                return SubQuery {
                    filter,
                    source: QuerySource::Secondary(shard.key().to_string()),
                    collections,
                    full_scan: false,
                };
            }
        }
    }

    let router = model.router();
    tracing::warn!(
        "Query on {} pins no shard key; scanning all {} node(s)",
        model.name(),
        router.nodes().len()
    );
    SubQuery {
        filter,
        source: QuerySource::Primary,
        collections: router
            .nodes()
            .iter()
            .map(|node| router.collection_on(node))
            .collect(),
        full_scan: true,
    }
}
