//! Runtime settings for the mapper.
//!
//! Defaults are embedded; a host application can deserialize its own copy (JSON) or apply
//! environment overrides with the `ODM__` prefix:
//! - `ODM__PRODUCTION=true`
//! - `ODM__COMMIT__MAX_RETRIES=20`
//! - `ODM__QUERY__MAX_UNBOUNDED_SCAN=100000`
//! - `ODM__LOCK__TIMEOUT_MS=10000`

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// In production, missing indexes are only reported, never created.
    pub production: bool,
    /// Keep a best-effort per-model identity cache for `get_by_id`.
    pub identity_cache: bool,
    pub commit: CommitSettings,
    pub query: QuerySettings,
    pub lock: LockSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            production: false,
            identity_cache: true,
            commit: CommitSettings::default(),
            query: QuerySettings::default(),
            lock: LockSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitSettings {
    /// Version-conflict retries before giving up with `CommitConflict`.
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    /// Whole-transaction retries on transient driver errors.
    pub max_txn_retries: u32,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            max_retries: 25,
            backoff_base_ms: 5,
            backoff_cap_ms: 400,
            max_txn_retries: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    /// Secondary-shard results are re-fetched from the primary in batches of this size.
    pub rehydrate_batch_size: usize,
    /// Unbounded queries abort once they have yielded this many documents.
    pub max_unbounded_scan: usize,
    /// Capacity of each per-collection worker channel.
    pub fanout_buffer: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            rehydrate_batch_size: 200,
            max_unbounded_scan: 50_000,
            fanout_buffer: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LockSettings {
    /// How long a held lock stays valid before others may take it over.
    pub lease_ms: u64,
    pub timeout_ms: u64,
    pub backoff_step_ms: u64,
    pub backoff_cap_ms: u64,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            lease_ms: 30_000,
            timeout_ms: 5_000,
            backoff_step_ms: 10,
            backoff_cap_ms: 250,
        }
    }
}

impl Settings {
    /// Defaults with `ODM__*` environment overrides applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env_overrides();
        settings
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        let mut settings: Settings = serde_json::from_str(raw)?;
        settings.apply_env_overrides();
        Ok(settings)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ODM__PRODUCTION") {
            self.production = val.to_lowercase() == "true" || val == "1";
        }
        if let Ok(val) = std::env::var("ODM__IDENTITY_CACHE") {
            self.identity_cache = val.to_lowercase() == "true" || val == "1";
        }
        override_parsed("ODM__COMMIT__MAX_RETRIES", &mut self.commit.max_retries);
        override_parsed("ODM__COMMIT__BACKOFF_BASE_MS", &mut self.commit.backoff_base_ms);
        override_parsed("ODM__COMMIT__BACKOFF_CAP_MS", &mut self.commit.backoff_cap_ms);
        override_parsed("ODM__COMMIT__MAX_TXN_RETRIES", &mut self.commit.max_txn_retries);
        override_parsed(
            "ODM__QUERY__REHYDRATE_BATCH_SIZE",
            &mut self.query.rehydrate_batch_size,
        );
        override_parsed("ODM__QUERY__MAX_UNBOUNDED_SCAN", &mut self.query.max_unbounded_scan);
        override_parsed("ODM__QUERY__FANOUT_BUFFER", &mut self.query.fanout_buffer);
        override_parsed("ODM__LOCK__LEASE_MS", &mut self.lock.lease_ms);
        override_parsed("ODM__LOCK__TIMEOUT_MS", &mut self.lock.timeout_ms);
        override_parsed("ODM__LOCK__BACKOFF_STEP_MS", &mut self.lock.backoff_step_ms);
        override_parsed("ODM__LOCK__BACKOFF_CAP_MS", &mut self.lock.backoff_cap_ms);
    }
}

fn override_parsed<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(val) = std::env::var(var)
        && let Ok(parsed) = val.parse()
    {
        *slot = parsed;
    }
}
