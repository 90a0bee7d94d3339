use super::transaction::{TxnScope, session_in};
use crate::config::CommitSettings;
use crate::document::types::{Document, Filter, ID_FIELD, UpdateDoc, VERSION_FIELD, now_us};
use crate::document::value::apply_update;
use crate::error::{OdmError, Result};
use crate::model::{HookContext, HookEvent, Instance, Model};
use crate::node::DatabaseNode;

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Per-call knobs for a commit.
#[derive(Clone, Default)]
pub struct CommitOptions {
    /// On a duplicate identity, adopt the stored document and update it instead.
    pub force: bool,
    /// Extra predicate the stored document must satisfy for the update to apply.
    pub conditions: Option<Filter>,
    /// Explicit operations applied ahead of the pending changes.
    pub update: UpdateDoc,
    /// Caller-owned transaction. The caller commits or aborts it.
    pub txn: Option<Arc<TxnScope>>,
}

impl CommitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn conditions(mut self, filter: Filter) -> Self {
        self.conditions = Some(filter);
        self
    }

    pub fn update(mut self, update: UpdateDoc) -> Self {
        self.update = update;
        self
    }

    pub fn txn(mut self, scope: Arc<TxnScope>) -> Self {
        self.txn = Some(scope);
        self
    }
}

/// A write that reached the primary shard.
struct Written {
    created: bool,
    before: Option<Document>,
    after: Document,
}

/// Persists `instance`. Returns `Ok(false)` when the caller's conditions did not hold.
pub async fn commit(instance: &mut Instance, options: CommitOptions) -> Result<bool> {
    let model = instance.model().clone();
    if !instance.is_new()
        && !instance.is_dirty()
        && options.update.is_empty()
        && options.conditions.is_none()
    {
        tracing::trace!("Nothing to commit on {}", model.name());
        return Ok(true);
    }

    let event = if instance.is_new() {
        HookEvent::BeforeCreate
    } else {
        HookEvent::BeforeUpdate
    };
    if model.hooks().has_handlers(event) {
        model
            .hooks()
            .fire(HookContext {
                event,
                model: model.name().to_string(),
                identity: model.identity_of(instance.values()).unwrap_or_default(),
                before: instance.original_doc().cloned(),
                after: Some(instance.values().clone()),
            })
            .await?;
    }

    let written = match options.txn.clone() {
        Some(scope) => commit_in(instance, &options, Some(scope.as_ref())).await?,
        None if model.secondary_shards().is_empty() => commit_in(instance, &options, None).await?,
        None => commit_in_transaction(instance, &options).await?,
    };
    let Some(written) = written else {
        return Ok(false);
    };
    finish(instance, written).await;
    Ok(true)
}

/// Runs one commit inside a call-scoped transaction, retrying the whole transaction on
/// transient driver errors.
async fn commit_in_transaction(
    instance: &mut Instance,
    options: &CommitOptions,
) -> Result<Option<Written>> {
    let model = instance.model().clone();
    let settings = &model.settings().commit;
    let max_attempts = settings.max_txn_retries.max(1);
    let mut delay_ms = settings.backoff_base_ms.max(1);

    for attempt in 1..=max_attempts {
        let snapshot = instance.clone();
        let scope = TxnScope::new();
        let result = match commit_in(instance, options, Some(scope.as_ref())).await {
            Ok(written) => scope.commit().await.map(|()| written),
            Err(e) => {
                scope.abort().await;
                Err(e)
            }
        };
        match result {
            Ok(written) => return Ok(written),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tracing::warn!(
                    "Transaction on {} aborted ({}); retry {}/{}",
                    model.name(),
                    e,
                    attempt,
                    max_attempts
                );
                *instance = snapshot;
                backoff(&mut delay_ms, settings).await;
            }
            Err(e) => {
                tracing::error!("Transaction on {} aborted: {}", model.name(), e);
                return Err(e);
            }
        }
    }

    Err(OdmError::CommitConflict {
        model: model.name().to_string(),
        attempts: max_attempts,
    })
}

async fn commit_in(
    instance: &mut Instance,
    options: &CommitOptions,
    scope: Option<&TxnScope>,
) -> Result<Option<Written>> {
    if instance.is_new() {
        match insert(instance, options, scope).await {
            Ok(written) => return Ok(Some(written)),
            Err(e @ OdmError::DuplicateKey { .. }) if options.force => {
                let model = instance.model().clone();
                let identity = instance.identity()?;
                let node = model.router().node_for_doc(&identity);
                let session = session_in(scope, node).await?;
                let Some(existing) = model
                    .router()
                    .collection_on(node)
                    .find_one(&model.identity_filter(&identity), session.as_deref())
                    .await?
                else {
                    return Err(e);
                };
                tracing::debug!(
                    "{} already exists in {}; adopting it",
                    Model::identity_key(&identity),
                    model.name()
                );
                instance.adopt(existing)?;
            }
            Err(e) => return Err(e),
        }
    }
    update(instance, options, scope).await
}

async fn insert(
    instance: &mut Instance,
    options: &CommitOptions,
    scope: Option<&TxnScope>,
) -> Result<Written> {
    let model = instance.model().clone();
    let mut doc = instance.pending().to_insert_document()?;
    apply_update(&mut doc, &options.update)?;
    if !doc.contains_key(ID_FIELD) {
        doc.insert(ID_FIELD.to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    doc.insert(VERSION_FIELD.to_string(), Value::from(now_us()));

    let identity = model.identity_of(&doc).ok_or_else(|| {
        OdmError::validation(format!(
            "cannot insert into {}: identity attributes {:?} must be set",
            model.name(),
            model.schema().pk_attrs
        ))
    })?;

    let node = model.router().node_for_doc(&doc);
    let collection = model.router().collection_on(node);
    let session = session_in(scope, node).await?;
    match collection.insert_one(doc.clone(), session.as_deref()).await {
        Ok(()) => {}
        Err(e) if e.is_duplicate_key() => {
            return Err(OdmError::DuplicateKey {
                collection: collection.namespace().to_string(),
                detail: e.to_string(),
            });
        }
        Err(e) => return Err(e.into()),
    }
    tracing::debug!(
        "Inserted {} into {}",
        Model::identity_key(&identity),
        collection.namespace()
    );

    propagate(&model, None, Some(&doc), scope).await?;
    Ok(Written {
        created: true,
        before: None,
        after: doc,
    })
}

/// Conditional update guarded by the last known version, rebasing and retrying while other
/// writers keep moving it.
async fn update(
    instance: &mut Instance,
    options: &CommitOptions,
    scope: Option<&TxnScope>,
) -> Result<Option<Written>> {
    let model = instance.model().clone();
    let settings = &model.settings().commit;
    let identity = match instance.persisted_identity() {
        Some(identity) => identity,
        None => instance.identity()?,
    };
    let node = model.router().node_for_doc(&identity);
    let collection = model.router().collection_on(node);
    let session = session_in(scope, node).await?;
    let identity_filter = model.identity_filter(&identity);

    let max_attempts = settings.max_retries.max(1);
    let mut delay_ms = settings.backoff_base_ms.max(1);
    for attempt in 1..=max_attempts {
        let current = instance.version();
        let mut payload = options.update.clone();
        payload.extend(instance.pending().to_update(false));
        let version = next_version(current, now_us());
        let payload = payload.set(VERSION_FIELD, version);

        let version_guard = match current {
            Some(v) => Filter::eq(VERSION_FIELD, v),
            None => Filter::exists(VERSION_FIELD, false),
        };
        let mut clauses = vec![identity_filter.clone(), version_guard];
        clauses.extend(options.conditions.clone());

        if let Some(after) = collection
            .find_one_and_update(&Filter::and(clauses), &payload, session.as_deref())
            .await?
        {
            let before = instance.original_doc().cloned();
            let target = model.router().node_for_doc(&after);
            if target.name() != node.name() {
                migrate(&model, node, target, &after, scope).await?;
            }
            propagate(&model, before.as_ref(), Some(&after), scope).await?;
            return Ok(Some(Written {
                created: false,
                before,
                after,
            }));
        }

        let Some(stored) = collection
            .find_one(&identity_filter, session.as_deref())
            .await?
        else {
            return Err(OdmError::DocumentMissing {
                model: model.name().to_string(),
                identity: Model::identity_key(&identity),
            });
        };
        let stored_version = stored.get(VERSION_FIELD).and_then(Value::as_i64);
        if stored_version == current {
            tracing::debug!(
                "Commit conditions on {} no longer hold for {}",
                model.name(),
                Model::identity_key(&identity)
            );
            return Ok(None);
        }

        tracing::debug!(
            "Version of {} moved ({:?} -> {:?}); rebasing, attempt {}/{}",
            Model::identity_key(&identity),
            current,
            stored_version,
            attempt,
            max_attempts
        );
        instance.rebase(stored)?;
        if attempt < max_attempts {
            backoff(&mut delay_ms, settings).await;
        }
    }

    Err(OdmError::CommitConflict {
        model: model.name().to_string(),
        attempts: max_attempts,
    })
}

/// Strictly above both the stored version and the clock.
pub(crate) fn next_version(current: Option<i64>, now: i64) -> i64 {
    match current {
        Some(v) => v.max(now) + 1,
        None => now,
    }
}

/// Moves a document whose shard key now routes elsewhere: insert on the new node, then delete
/// from the old one. The two steps are not atomic across nodes.
async fn migrate(
    model: &Model,
    from: &DatabaseNode,
    to: &DatabaseNode,
    doc: &Document,
    scope: Option<&TxnScope>,
) -> Result<()> {
    let Some(id) = doc.get(ID_FIELD).cloned() else {
        return Err(OdmError::validation(format!(
            "cannot migrate a {} document without {}",
            model.name(),
            ID_FIELD
        )));
    };

    let session = session_in(scope, to).await?;
    model
        .router()
        .collection_on(to)
        .insert_one(doc.clone(), session.as_deref())
        .await?;

    let session = session_in(scope, from).await?;
    model
        .router()
        .collection_on(from)
        .delete_one(&Filter::eq(ID_FIELD, id), session.as_deref())
        .await?;

    tracing::info!(
        "Migrated {} document from {} to {}",
        model.name(),
        from.name(),
        to.name()
    );
    Ok(())
}

/// Brings every affected secondary shard in line. Only transient failures are returned so the
/// enclosing transaction can retry; anything else is logged.
async fn propagate(
    model: &Model,
    before: Option<&Document>,
    after: Option<&Document>,
    scope: Option<&TxnScope>,
) -> Result<()> {
    for shard in model.secondary_shards() {
        if !shard.projection_changed(before, after) {
            continue;
        }
        if let Err(e) = shard.propagate(before, after, scope).await {
            if e.is_transient() {
                return Err(e);
            }
            tracing::warn!(
                "Secondary shard {} of {} not updated: {}",
                shard.key(),
                model.name(),
                e
            );
        }
    }
    Ok(())
}

async fn finish(instance: &mut Instance, written: Written) {
    let model = instance.model().clone();
    if let Some(old) = written.before.as_ref().and_then(|doc| model.identity_of(doc)) {
        model.cache_evict(&old);
    }
    model.cache_put(&written.after);
    instance.mark_persisted(written.after.clone());

    let event = if written.created {
        HookEvent::AfterCreate
    } else {
        HookEvent::AfterUpdate
    };
    for event in [event, HookEvent::StorageUpdated] {
        if !model.hooks().has_handlers(event) {
            continue;
        }
        let ctx = HookContext {
            event,
            model: model.name().to_string(),
            identity: model.identity_of(&written.after).unwrap_or_default(),
            before: written.before.clone(),
            after: Some(written.after.clone()),
        };
        if let Err(e) = model.hooks().fire(ctx).await {
            tracing::warn!("{} hook on {} failed: {}", event, model.name(), e);
        }
    }
}

async fn backoff(delay_ms: &mut u64, settings: &CommitSettings) {
    // Jitter keeps contending writers from retrying in lockstep
    let jitter = rand::random::<u64>() % 50;
    tokio::time::sleep(Duration::from_millis(*delay_ms + jitter)).await;
    *delay_ms = (*delay_ms * 2).min(settings.backoff_cap_ms.max(1));
}

impl Instance {
    /// Inserts or updates the document. See [`commit`].
    pub async fn commit(&mut self) -> Result<bool> {
        commit(self, CommitOptions::default()).await
    }

    pub async fn commit_with(&mut self, options: CommitOptions) -> Result<bool> {
        commit(self, options).await
    }

    /// Applies explicit operations together with any pending changes.
    pub async fn update(&mut self, update: UpdateDoc) -> Result<bool> {
        commit(self, CommitOptions::new().update(update)).await
    }

    /// Replaces local state with the stored document.
    pub async fn reload(&mut self) -> Result<()> {
        let model = self.model().clone();
        model.reload(self).await
    }
}
