use super::merge::{HeapMerge, SourceItem};
use super::planner;
use super::types::{QueryRequest, QuerySource};
use crate::document::driver::Collection;
use crate::document::types::{Document, Filter, FindOptions};
use crate::error::{OdmError, Result};
use crate::model::{Instance, Model};

use futures::{Stream, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Plans `request` and starts one worker per resolved collection.
pub fn execute(model: Arc<Model>, request: QueryRequest) -> Result<QueryCursor> {
    let plan = planner::plan(&model, &request);
    let collections = plan.collection_count();

    let skip = match request.offset {
        Some(offset) if offset > 0 && collections > 1 => {
            tracing::warn!(
                "Offset {} ignored: query on {} spans {} collections",
                offset,
                model.name(),
                collections
            );
            None
        }
        other => other,
    };
    let options = FindOptions {
        sort: request.sort.clone(),
        skip,
        limit: request.limit,
    };

    let buffer = model.settings().query.fanout_buffer.max(1);
    let mut receivers = Vec::with_capacity(collections);
    let mut kinds = Vec::with_capacity(collections);
    let mut workers = Vec::with_capacity(collections);
    for sub in &plan.sub_queries {
        for collection in &sub.collections {
            let (tx, rx) = mpsc::channel(buffer);
            workers.push(spawn_worker(
                collection.clone(),
                sub.filter.clone(),
                options.clone(),
                tx,
            ));
            receivers.push(rx);
            kinds.push(sub.source.clone());
        }
    }
    tracing::debug!(
        "Query on {} fanned out to {} collection(s) in {} branch(es)",
        model.name(),
        collections,
        plan.sub_queries.len()
    );

    let rehydrate = plan.needs_rehydration();
    let dedupe = plan.sub_queries.len() > 1;
    let settings = &model.settings().query;
    let batch_size = if rehydrate {
        settings.rehydrate_batch_size.max(1)
    } else {
        1
    };
    let scan_guard = request
        .limit
        .is_none()
        .then_some(settings.max_unbounded_scan);

    Ok(QueryCursor {
        merge: HeapMerge::new(receivers, request.sort.clone()),
        filter: request.filter,
        model,
        kinds,
        workers,
        ready: VecDeque::new(),
        seen: dedupe.then(HashSet::new),
        limit: request.limit,
        yielded: 0,
        scanned: 0,
        scan_guard,
        batch_size,
        exhausted: false,
    })
}

/// Streams one collection's ordered results into the merge. Stops when the cursor is gone.
fn spawn_worker(
    collection: Arc<dyn Collection>,
    filter: Filter,
    options: FindOptions,
    tx: mpsc::Sender<SourceItem>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stream = match collection.find(&filter, &options, None).await {
            Ok(stream) => stream,
            Err(e) => {
                let _ = tx.send(Err(e)).await;
                return;
            }
        };
        while let Some(item) = stream.next().await {
            let failed = item.is_err();
            if tx.send(item).await.is_err() {
                tracing::trace!("Cursor dropped; stopping worker on {}", collection.namespace());
                break;
            }
            if failed {
                break;
            }
        }
    })
}

enum Slot {
    Ready(Document),
    /// Secondary copy awaiting its primary document.
    Hydrate(Document),
}

/// Lazy, ordered results of a query.
///
/// Dropping the cursor aborts its workers; sources are never read ahead of demand beyond
/// their channel capacity.
pub struct QueryCursor {
    model: Arc<Model>,
    filter: Filter,
    merge: HeapMerge,
    /// Source index -> which copy it reads.
    kinds: Vec<QuerySource>,
    workers: Vec<JoinHandle<()>>,
    ready: VecDeque<Instance>,
    /// Identities already returned, when branches may overlap.
    seen: Option<HashSet<String>>,
    limit: Option<usize>,
    yielded: usize,
    scanned: usize,
    scan_guard: Option<usize>,
    batch_size: usize,
    exhausted: bool,
}

impl QueryCursor {
    pub async fn next(&mut self) -> Result<Option<Instance>> {
        loop {
            if let Some(limit) = self.limit
                && self.yielded >= limit
            {
                return Ok(None);
            }
            if let Some(instance) = self.ready.pop_front() {
                self.yielded += 1;
                return Ok(Some(instance));
            }
            if self.exhausted {
                return Ok(None);
            }
            self.fill().await?;
        }
    }

    pub async fn try_collect(mut self) -> Result<Vec<Instance>> {
        let mut out = Vec::new();
        while let Some(instance) = self.next().await? {
            out.push(instance);
        }
        Ok(out)
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Instance>> {
        futures::stream::unfold(self, |mut cursor| async move {
            match cursor.next().await {
                Ok(Some(instance)) => Some((Ok(instance), cursor)),
                Ok(None) => None,
                Err(e) => {
                    cursor.exhausted = true;
                    cursor.ready.clear();
                    Some((Err(e), cursor))
                }
            }
        })
    }

    /// Pulls the next batch from the merge into `ready`.
    async fn fill(&mut self) -> Result<()> {
        let mut slots = Vec::new();
        while slots.len() < self.batch_size {
            let Some((source, doc)) = self.merge.next().await? else {
                self.exhausted = true;
                break;
            };
            self.scanned += 1;
            if let Some(guard) = self.scan_guard
                && self.scanned > guard
            {
                self.exhausted = true;
                return Err(OdmError::ScanAborted {
                    model: self.model.name().to_string(),
                    scanned: self.scanned,
                });
            }
            if let Some(seen) = &mut self.seen
                && let Some(identity) = self.model.identity_of(&doc)
                && !seen.insert(Model::identity_key(&identity))
            {
                continue;
            }
            match self.kinds[source] {
                QuerySource::Primary => slots.push(Slot::Ready(doc)),
                QuerySource::Secondary(_) => slots.push(Slot::Hydrate(doc)),
            }
        }
        self.rehydrate(slots).await
    }

    /// Replaces secondary copies by their primary documents, keeping order.
    async fn rehydrate(&mut self, slots: Vec<Slot>) -> Result<()> {
        let mut by_collection: BTreeMap<String, (Arc<dyn Collection>, Vec<Filter>)> = BTreeMap::new();
        for slot in &slots {
            if let Slot::Hydrate(copy) = slot
                && let Some(identity) = self.model.identity_of(copy)
            {
                let node = self.model.router().node_for_doc(&identity);
                by_collection
                    .entry(node.name())
                    .or_insert_with(|| (self.model.router().collection_on(node), Vec::new()))
                    .1
                    .push(self.model.identity_filter(&identity));
            }
        }

        let mut primaries: HashMap<String, Document> = HashMap::new();
        for (collection, filters) in by_collection.into_values() {
            let found: Vec<Document> = collection
                .find(&Filter::or(filters), &FindOptions::default(), None)
                .await?
                .try_collect()
                .await?;
            for doc in found {
                if let Some(identity) = self.model.identity_of(&doc) {
                    primaries.insert(Model::identity_key(&identity), doc);
                }
            }
        }

        for slot in slots {
            let doc = match slot {
                Slot::Ready(doc) => doc,
                Slot::Hydrate(copy) => {
                    let key = self
                        .model
                        .identity_of(&copy)
                        .map(|identity| Model::identity_key(&identity));
                    match key.and_then(|key| primaries.remove(&key)) {
                        Some(doc) if self.filter.matches(&doc) => doc,
                        Some(_) => {
                            tracing::debug!("Secondary copy in {} is stale; skipping", self.model.name());
                            continue;
                        }
                        None => {
                            tracing::warn!(
                                "Secondary copy in {} has no primary document; dropping it",
                                self.model.name()
                            );
                            continue;
                        }
                    }
                }
            };
            self.model.cache_put(&doc);
            self.ready.push_back(self.model.instance_from_doc(doc));
        }
        Ok(())
    }
}

impl Drop for QueryCursor {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}
