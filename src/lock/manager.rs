use crate::document::types::{Document, Filter, LOCKS_FIELD, UpdateDoc, now_ms};
use crate::error::{OdmError, Result};
use crate::model::{Instance, Model};

use dashmap::mapref::entry::Entry;
use serde_json::json;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

/// Proof of a held lock, needed to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    name: String,
    token: String,
    /// Held in process memory because the instance was not stored yet.
    local: bool,
}

impl LockToken {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn is_local(&self) -> bool {
        self.local
    }
}

/// Overrides for a single acquisition. Unset fields fall back to the lock settings.
#[derive(Debug, Clone, Default)]
pub struct LockOptions {
    pub timeout: Option<Duration>,
    pub lease: Option<Duration>,
    /// Give up with `Ok(None)` instead of `LockTimeout`.
    pub silent: bool,
}

impl LockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') || name.starts_with('$') {
        return Err(OdmError::validation(format!("invalid lock name '{}'", name)));
    }
    Ok(())
}

fn local_key(instance: &Instance, name: &str) -> String {
    format!("{}/{}", instance.local_id(), name)
}

fn stored_identity(instance: &Instance) -> Result<Document> {
    instance.persisted_identity().ok_or_else(|| {
        OdmError::validation(format!(
            "stored {} document is missing identity attributes",
            instance.model().name()
        ))
    })
}

/// One attempt on the stored document: claim `_locks.<name>` if it is free or its lease ran
/// out.
async fn try_claim(instance: &Instance, name: &str, token: &str, lease_ms: u64) -> Result<bool> {
    let model = instance.model();
    let identity = stored_identity(instance)?;
    let field = format!("{}.{}", LOCKS_FIELD, name);
    let now = now_ms();
    let filter = Filter::and([
        model.identity_filter(&identity),
        Filter::or([
            Filter::exists(field.clone(), false),
            Filter::lt(format!("{}.until", field), now),
        ]),
    ]);
    let update = UpdateDoc::new().set(field, json!({ "until": now + lease_ms, "token": token }));

    let collection = model.collection_for(&identity);
    if collection.find_one_and_update(&filter, &update, None).await?.is_some() {
        return Ok(true);
    }
    if collection
        .find_one(&model.identity_filter(&identity), None)
        .await?
        .is_none()
    {
        return Err(OdmError::DocumentMissing {
            model: model.name().to_string(),
            identity: Model::identity_key(&identity),
        });
    }
    Ok(false)
}

fn try_claim_local(instance: &Instance, name: &str, token: &str) -> bool {
    match instance.model().local_locks.entry(local_key(instance, name)) {
        Entry::Occupied(_) => false,
        Entry::Vacant(slot) => {
            slot.insert(token.to_string());
            true
        }
    }
}

/// Spins on the lock with linear backoff until it is taken or the timeout passes.
pub async fn acquire(instance: &Instance, name: &str, options: &LockOptions) -> Result<Option<LockToken>> {
    check_name(name)?;
    let settings = &instance.model().settings().lock;
    let timeout = options
        .timeout
        .unwrap_or(Duration::from_millis(settings.timeout_ms));
    let lease_ms = options
        .lease
        .map_or(settings.lease_ms, |lease| lease.as_millis() as u64);
    let local = instance.is_new();
    let token = Uuid::new_v4().to_string();
    let deadline = Instant::now() + timeout;

    let mut attempt = 0u64;
    loop {
        attempt += 1;
        let claimed = if local {
            try_claim_local(instance, name, &token)
        } else {
            try_claim(instance, name, &token, lease_ms).await?
        };
        if claimed {
            tracing::debug!(
                "Lock '{}' on {} taken after {} attempt(s)",
                name,
                instance.model().name(),
                attempt
            );
            return Ok(Some(LockToken {
                name: name.to_string(),
                token,
                local,
            }));
        }

        if Instant::now() >= deadline {
            if options.silent {
                tracing::debug!("Lock '{}' on {} still held; giving up", name, instance.model().name());
                return Ok(None);
            }
            return Err(OdmError::LockTimeout {
                name: name.to_string(),
            });
        }
        let delay = (settings.backoff_step_ms * attempt)
            .min(settings.backoff_cap_ms)
            .max(1);
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

/// Clears the lock if `token` still holds it, or unconditionally when `token` is `None`.
async fn clear(instance: &Instance, name: &str, token: Option<&str>, local: bool) -> Result<bool> {
    check_name(name)?;
    let model = instance.model();
    if local {
        let key = local_key(instance, name);
        let removed = match token {
            Some(token) => model.local_locks.remove_if(&key, |_, held| held == token),
            None => model.local_locks.remove(&key),
        };
        return Ok(removed.is_some());
    }

    let identity = stored_identity(instance)?;
    let field = format!("{}.{}", LOCKS_FIELD, name);
    let guard = match token {
        Some(token) => Filter::eq(format!("{}.token", field), token),
        None => Filter::exists(field.clone(), true),
    };
    let filter = Filter::and([model.identity_filter(&identity), guard]);
    let released = model
        .collection_for(&identity)
        .find_one_and_update(&filter, &UpdateDoc::new().unset(field), None)
        .await?
        .is_some();
    if !released {
        tracing::debug!("Lock '{}' on {} was not held by this token", name, model.name());
    }
    Ok(released)
}

pub async fn release(instance: &Instance, token: &LockToken) -> Result<bool> {
    clear(instance, &token.name, Some(&token.token), token.local).await
}

pub async fn force_release(instance: &Instance, name: &str) -> Result<bool> {
    clear(instance, name, None, instance.is_new()).await
}

impl Instance {
    /// Takes the named lock with the configured timeout, failing with `LockTimeout`.
    pub async fn lock(&self, name: &str) -> Result<LockToken> {
        acquire(self, name, &LockOptions::default())
            .await?
            .ok_or_else(|| OdmError::LockTimeout {
                name: name.to_string(),
            })
    }

    pub async fn lock_with(&self, name: &str, options: LockOptions) -> Result<Option<LockToken>> {
        acquire(self, name, &options).await
    }

    /// Returns whether the lock was still held by `token`.
    pub async fn unlock(&self, token: &LockToken) -> Result<bool> {
        release(self, token).await
    }

    pub async fn force_unlock(&self, name: &str) -> Result<bool> {
        force_release(self, name).await
    }
}
