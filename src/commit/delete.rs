use crate::error::{OdmError, Result};
use crate::model::{HookContext, HookEvent, Instance, Model};

/// Removes the stored document and its secondary copies. Returns whether the primary document
/// was still there.
///
/// Secondary copies are removed after the primary; a copy that survives a failure here is
/// dropped at query time because it no longer rehydrates.
pub async fn delete(instance: &mut Instance) -> Result<bool> {
    let model = instance.model().clone();
    let Some(before) = instance.original_doc().cloned() else {
        return Err(OdmError::validation(format!(
            "cannot delete a {} instance that was never stored",
            model.name()
        )));
    };
    let identity = model.identity_of(&before).ok_or_else(|| {
        OdmError::validation(format!(
            "stored {} document is missing identity attributes {:?}",
            model.name(),
            model.schema().pk_attrs
        ))
    })?;

    let ctx = |event| HookContext {
        event,
        model: model.name().to_string(),
        identity: identity.clone(),
        before: Some(before.clone()),
        after: None,
    };
    model.hooks().fire(ctx(HookEvent::BeforeDelete)).await?;

    let collection = model.collection_for(&identity);
    let removed = collection
        .delete_one(&model.identity_filter(&identity), None)
        .await?;
    if removed {
        tracing::debug!(
            "Deleted {} from {}",
            Model::identity_key(&identity),
            collection.namespace()
        );
    } else {
        tracing::warn!(
            "{} was already gone from {}",
            Model::identity_key(&identity),
            collection.namespace()
        );
    }

    for shard in model.secondary_shards() {
        if let Err(e) = shard.propagate(Some(&before), None, None).await {
            tracing::warn!(
                "Secondary copy in {} of {} not removed: {}",
                shard.key(),
                model.name(),
                e
            );
        }
    }

    model.cache_evict(&identity);
    if let Err(e) = model.hooks().fire(ctx(HookEvent::AfterDelete)).await {
        tracing::warn!("after_delete hook on {} failed: {}", model.name(), e);
    }
    instance.mark_deleted();
    Ok(removed)
}

impl Instance {
    /// Deletes the document. The instance becomes new again and can be re-committed.
    pub async fn delete(&mut self) -> Result<bool> {
        delete(self).await
    }
}
