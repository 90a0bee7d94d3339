//! In-process document store.
//!
//! Implements the full driver contract on top of per-collection ordered maps so that nodes,
//! routing, transactions and concurrency can run without an external server. Each
//! [`MemoryStore`] plays one physical node; a [`MemoryConnector`] hands out one store per
//! distinct node address, so two topology entries pointing at the same hosts share data.
//!
//! Transactions keep an undo journal per session. Writes are applied immediately and rolled
//! back on abort (or on an injected commit failure).

use super::driver::{Collection, DocStream, DocumentStore, DriverError, Session};
use super::types::{Document, Filter, FindOptions, ID_FIELD, IndexSpec, UpdateDoc};
use super::value::{apply_update, get_path, values_equal};
use crate::node::types::{Connector, NodeConfig};

use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// One physical node.
pub struct MemoryStore {
    id: String,
    /// Structure: `<db>.<collection> -> collection`.
    collections: DashMap<String, Arc<MemoryCollection>>,
    journal: Arc<TxnJournal>,
    faults: Arc<Faults>,
}

#[derive(Default)]
struct Faults {
    fail_commits: AtomicUsize,
    read_only: AtomicBool,
}

/// Session id -> undo entries of its open transaction.
#[derive(Default)]
struct TxnJournal {
    active: DashMap<String, Vec<UndoEntry>>,
}

struct UndoEntry {
    state: Arc<RwLock<CollectionState>>,
    seq: u64,
    /// `None` means the write was an insert.
    previous: Option<Document>,
}

struct CollectionState {
    /// Insertion sequence -> document.
    docs: BTreeMap<u64, Document>,
    next_seq: u64,
    indexes: Vec<IndexSpec>,
}

impl CollectionState {
    fn new() -> Self {
        Self {
            docs: BTreeMap::new(),
            next_seq: 0,
            indexes: vec![IndexSpec {
                name: "_id_".to_string(),
                keys: vec![ID_FIELD.to_string()],
                unique: true,
            }],
        }
    }

    fn first_match(&self, filter: &Filter) -> Option<u64> {
        self.docs
            .iter()
            .find(|(_, doc)| filter.matches(doc))
            .map(|(seq, _)| *seq)
    }

    fn check_unique(&self, candidate: &Document, skip: Option<u64>) -> Result<(), DriverError> {
        for index in self.indexes.iter().filter(|index| index.unique) {
            let key = index_key(index, candidate);
            for (seq, doc) in &self.docs {
                if Some(*seq) == skip {
                    continue;
                }
                let other = index_key(index, doc);
                if key.iter().zip(other.iter()).all(|(a, b)| values_equal(a, b)) {
                    return Err(DriverError::DuplicateKey {
                        index: index.name.clone(),
                        key: Value::Array(key).to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn index_key(index: &IndexSpec, doc: &Document) -> Vec<Value> {
    index
        .keys
        .iter()
        .map(|key| get_path(doc, key).cloned().unwrap_or(Value::Null))
        .collect()
}

impl MemoryStore {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            collections: DashMap::new(),
            journal: Arc::new(TxnJournal::default()),
            faults: Arc::new(Faults::default()),
        })
    }

    /// The next `n` transaction commits fail with a transient error and roll back.
    pub fn fail_next_commits(&self, n: usize) {
        self.faults.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Every write fails while set.
    pub fn set_read_only(&self, read_only: bool) {
        self.faults.read_only.store(read_only, Ordering::SeqCst);
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.collections
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn open_transactions(&self) -> usize {
        self.journal.active.len()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn collection(&self, db: &str, name: &str) -> Arc<dyn Collection> {
        let namespace = format!("{}.{}", db, name);
        let collection = self
            .collections
            .entry(namespace.clone())
            .or_insert_with(|| {
                Arc::new(MemoryCollection {
                    namespace,
                    state: Arc::new(RwLock::new(CollectionState::new())),
                    journal: self.journal.clone(),
                    faults: self.faults.clone(),
                })
            })
            .clone();
        collection
    }

    async fn start_session(&self) -> Result<Arc<dyn Session>, DriverError> {
        Ok(Arc::new(MemorySession {
            id: Uuid::new_v4().to_string(),
            journal: self.journal.clone(),
            faults: self.faults.clone(),
        }))
    }
}

pub struct MemorySession {
    id: String,
    journal: Arc<TxnJournal>,
    faults: Arc<Faults>,
}

impl MemorySession {
    async fn rollback(&self) {
        if let Some((_, entries)) = self.journal.active.remove(&self.id) {
            for entry in entries.into_iter().rev() {
                let mut state = entry.state.write().await;
                match entry.previous {
                    Some(doc) => {
                        state.docs.insert(entry.seq, doc);
                    }
                    None => {
                        state.docs.remove(&entry.seq);
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn start_transaction(&self) -> Result<(), DriverError> {
        if self.journal.active.contains_key(&self.id) {
            return Err(DriverError::Other("transaction already in progress".to_string()));
        }
        self.journal.active.insert(self.id.clone(), Vec::new());
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), DriverError> {
        if !self.journal.active.contains_key(&self.id) {
            return Err(DriverError::Other("no transaction in progress".to_string()));
        }
        let injected = self
            .faults
            .fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            self.rollback().await;
            return Err(DriverError::Transient("write conflict during commit".to_string()));
        }
        self.journal.active.remove(&self.id);
        Ok(())
    }

    async fn abort_transaction(&self) -> Result<(), DriverError> {
        self.rollback().await;
        Ok(())
    }
}

pub struct MemoryCollection {
    namespace: String,
    state: Arc<RwLock<CollectionState>>,
    journal: Arc<TxnJournal>,
    faults: Arc<Faults>,
}

impl MemoryCollection {
    fn ensure_writable(&self) -> Result<(), DriverError> {
        if self.faults.read_only.load(Ordering::SeqCst) {
            return Err(DriverError::Other(format!("{} is read-only", self.namespace)));
        }
        Ok(())
    }

    fn record(&self, session: Option<&dyn Session>, seq: u64, previous: Option<Document>) {
        if let Some(session) = session
            && let Some(mut entries) = self.journal.active.get_mut(session.id())
        {
            entries.push(UndoEntry {
                state: self.state.clone(),
                seq,
                previous,
            });
        }
    }

    fn insert_locked(
        &self,
        state: &mut CollectionState,
        mut doc: Document,
        session: Option<&dyn Session>,
    ) -> Result<(), DriverError> {
        if !doc.contains_key(ID_FIELD) {
            doc.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        state.check_unique(&doc, None)?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.docs.insert(seq, doc);
        self.record(session, seq, None);
        Ok(())
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn find(
        &self,
        filter: &Filter,
        options: &FindOptions,
        _session: Option<&dyn Session>,
    ) -> Result<DocStream, DriverError> {
        let state = self.state.read().await;
        let mut docs: Vec<Document> = state
            .docs
            .values()
            .filter(|doc| filter.matches(doc))
            .cloned()
            .collect();
        drop(state);

        if let Some(sort) = &options.sort {
            docs.sort_by(|a, b| sort.compare(a, b));
        }
        let docs: Vec<Document> = docs
            .into_iter()
            .skip(options.skip.unwrap_or(0))
            .take(options.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(futures::stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &UpdateDoc,
        session: Option<&dyn Session>,
    ) -> Result<Option<Document>, DriverError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        let Some(seq) = state.first_match(filter) else {
            return Ok(None);
        };
        let previous = state.docs[&seq].clone();
        let mut updated = previous.clone();
        apply_update(&mut updated, update)?;
        if updated.get(ID_FIELD) != previous.get(ID_FIELD) {
            return Err(DriverError::Other("the _id field is immutable".to_string()));
        }
        state.check_unique(&updated, Some(seq))?;
        state.docs.insert(seq, updated.clone());
        self.record(session, seq, Some(previous));
        Ok(Some(updated))
    }

    async fn insert_one(&self, doc: Document, session: Option<&dyn Session>) -> Result<(), DriverError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        self.insert_locked(&mut state, doc, session)
    }

    async fn replace_one(
        &self,
        filter: &Filter,
        mut doc: Document,
        upsert: bool,
        session: Option<&dyn Session>,
    ) -> Result<bool, DriverError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        match state.first_match(filter) {
            Some(seq) => {
                let previous = state.docs[&seq].clone();
                if let Some(id) = previous.get(ID_FIELD) {
                    doc.insert(ID_FIELD.to_string(), id.clone());
                }
                state.check_unique(&doc, Some(seq))?;
                state.docs.insert(seq, doc);
                self.record(session, seq, Some(previous));
                Ok(true)
            }
            None if upsert => {
                self.insert_locked(&mut state, doc, session)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_one(&self, filter: &Filter, session: Option<&dyn Session>) -> Result<bool, DriverError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        let Some(seq) = state.first_match(filter) else {
            return Ok(false);
        };
        let previous = state.docs.remove(&seq);
        self.record(session, seq, previous);
        Ok(true)
    }

    async fn delete_many(&self, filter: &Filter, session: Option<&dyn Session>) -> Result<u64, DriverError> {
        self.ensure_writable()?;
        let mut state = self.state.write().await;
        let seqs: Vec<u64> = state
            .docs
            .iter()
            .filter(|(_, doc)| filter.matches(doc))
            .map(|(seq, _)| *seq)
            .collect();
        for seq in &seqs {
            let previous = state.docs.remove(seq);
            self.record(session, *seq, previous);
        }
        Ok(seqs.len() as u64)
    }

    async fn count_documents(&self, filter: &Filter, _session: Option<&dyn Session>) -> Result<u64, DriverError> {
        let state = self.state.read().await;
        Ok(state.docs.values().filter(|doc| filter.matches(doc)).count() as u64)
    }

    async fn list_indexes(&self) -> Result<Vec<IndexSpec>, DriverError> {
        Ok(self.state.read().await.indexes.clone())
    }

    async fn create_index(&self, spec: &IndexSpec) -> Result<(), DriverError> {
        let mut state = self.state.write().await;
        if state.indexes.iter().any(|index| index.name == spec.name) {
            return Ok(());
        }
        state.indexes.push(spec.clone());
        tracing::debug!("Created index {} on {}", spec.name, self.namespace);
        Ok(())
    }
}

/// Resolves node configs to in-process stores, one store per distinct address.
#[derive(Default)]
pub struct MemoryConnector {
    stores: DashMap<String, Arc<MemoryStore>>,
}

impl MemoryConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The store behind `address` (see [`NodeConfig::address`]), if one was ever connected.
    pub fn store(&self, address: &str) -> Option<Arc<MemoryStore>> {
        self.stores.get(address).map(|entry| entry.value().clone())
    }

    pub fn store_count(&self) -> usize {
        self.stores.len()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, config: &NodeConfig) -> Result<Arc<dyn DocumentStore>, DriverError> {
        let address = config.address();
        let store = self
            .stores
            .entry(address.clone())
            .or_insert_with(|| MemoryStore::new(address))
            .clone();
        Ok(store)
    }
}
