//! In-memory object store with failure injection
//!
//! Test double for the sync executor: holds objects in a map and can be
//! configured to fail specific operations a fixed number of times before
//! succeeding, or permanently. Mirrors the failure-injection approach used
//! for exercising retry and partial-failure paths.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{ObjectStore, RemoteObject, StoreError};

/// Store operation selector for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    List,
    Put,
    Delete,
}

/// Failure configuration for one operation
#[derive(Debug, Clone)]
pub struct FailurePlan {
    /// Message carried by the injected error
    pub message: String,
    /// Inject a transient (retryable) error instead of a permanent one
    pub transient: bool,
    /// Number of times to fail before succeeding (None = always fail)
    pub fail_count: Option<u32>,
    /// Restrict the injection to one key (None = every key)
    pub only_key: Option<String>,
}

impl FailurePlan {
    /// A transient failure injected `count` times, then success
    pub fn transient(count: u32) -> Self {
        Self {
            message: "injected transient failure".to_string(),
            transient: true,
            fail_count: Some(count),
            only_key: None,
        }
    }

    /// A permanent failure on every call
    pub fn permanent() -> Self {
        Self {
            message: "injected permanent failure".to_string(),
            transient: false,
            fail_count: None,
            only_key: None,
        }
    }

    /// Restrict this plan to a single key
    pub fn for_key(mut self, key: impl Into<String>) -> Self {
        self.only_key = Some(key.into());
        self
    }
}

#[derive(Debug, Clone)]
struct StoredObject {
    size: u64,
    sha256: Option<String>,
    modified_at: DateTime<Utc>,
}

/// In-memory store
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failures: Mutex<HashMap<StoreOp, FailurePlan>>,
    call_counts: Mutex<HashMap<(StoreOp, Option<String>), u32>>,
    put_log: Mutex<Vec<String>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing failure injection
    pub fn seed(&self, key: &str, data: &[u8], sha256: &str) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                key.to_string(),
                StoredObject {
                    size: data.len() as u64,
                    sha256: Some(sha256.to_string()),
                    modified_at: Utc::now(),
                },
            );
        }
    }

    /// Insert an object that reports no digest (as some backends do)
    pub fn seed_without_hash(&self, key: &str, size: u64, modified_at: DateTime<Utc>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                key.to_string(),
                StoredObject {
                    size,
                    sha256: None,
                    modified_at,
                },
            );
        }
    }

    /// Configure failure injection for an operation
    pub fn inject_failure(&self, op: StoreOp, plan: FailurePlan) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(op, plan);
        }
    }

    /// Keys currently stored
    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of successful puts, per key, in call order
    pub fn put_log(&self) -> Vec<String> {
        self.put_log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    /// True when `key` exists
    pub fn contains(&self, key: &str) -> bool {
        self.objects
            .lock()
            .map(|objects| objects.contains_key(key))
            .unwrap_or(false)
    }

    fn check_failure(&self, op: StoreOp, key: Option<&str>) -> Result<(), StoreError> {
        let plan = match self.failures.lock() {
            Ok(failures) => match failures.get(&op) {
                Some(plan) => plan.clone(),
                None => return Ok(()),
            },
            Err(_) => return Ok(()),
        };

        if let Some(ref only) = plan.only_key {
            if key != Some(only.as_str()) {
                return Ok(());
            }
        }

        let count_key = (op, key.map(str::to_string));
        let calls = {
            let mut counts = match self.call_counts.lock() {
                Ok(counts) => counts,
                Err(_) => return Ok(()),
            };
            let entry = counts.entry(count_key).or_insert(0);
            *entry += 1;
            *entry
        };

        if let Some(limit) = plan.fail_count {
            if calls > limit {
                return Ok(());
            }
        }

        if plan.transient {
            Err(StoreError::Api {
                status: 503,
                message: plan.message,
            })
        } else {
            Err(StoreError::Api {
                status: 400,
                message: plan.message,
            })
        }
    }
}

impl ObjectStore for MemoryStore {
    fn list(&self, prefix: &str) -> Result<Vec<RemoteObject>, StoreError> {
        self.check_failure(StoreOp::List, None)?;

        let objects = self
            .objects
            .lock()
            .map_err(|_| StoreError::Protocol("store poisoned".to_string()))?;
        let match_prefix = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.trim_end_matches('/'))
        };

        Ok(objects
            .iter()
            .filter(|(key, _)| match_prefix.is_empty() || key.starts_with(&match_prefix))
            .map(|(key, object)| RemoteObject {
                key: key.clone(),
                size: object.size,
                sha256: object.sha256.clone(),
                modified_at: Some(object.modified_at),
            })
            .collect())
    }

    fn put(&self, key: &str, source: &Path, sha256: &str) -> Result<(), StoreError> {
        self.check_failure(StoreOp::Put, Some(key))?;

        let metadata = std::fs::metadata(source)?;
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StoreError::Protocol("store poisoned".to_string()))?;
        objects.insert(
            key.to_string(),
            StoredObject {
                size: metadata.len(),
                sha256: Some(sha256.to_string()),
                modified_at: Utc::now(),
            },
        );
        if let Ok(mut log) = self.put_log.lock() {
            log.push(key.to_string());
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.check_failure(StoreOp::Delete, Some(key))?;

        let mut objects = self
            .objects
            .lock()
            .map_err(|_| StoreError::Protocol("store poisoned".to_string()))?;
        objects.remove(key);
        Ok(())
    }
}
