//! Natural-key resolution and idempotent upserts.
//!
//! Every create goes through [`EntityResolver::upsert`]: look the entity up
//! by its natural key, create it only when absent, and recover a conflicting
//! create by looking it up again. Upserts of the same key are serialized so
//! two in-flight tasks can never both create it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::concurrency::RetryPolicy;
use crate::error::AppError;

/// Whether an upsert found the entity or created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Upserted<T> {
    Existing(T),
    Created(T),
}

impl<T> Upserted<T> {
    pub fn into_inner(self) -> T {
        match self {
            Upserted::Existing(value) | Upserted::Created(value) => value,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Upserted::Existing(value) | Upserted::Created(value) => value,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Upserted::Created(_))
    }
}

/// One async lock per natural key.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The lock guarding `key`, created on first use.
    pub fn get(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

pub struct EntityResolver {
    retry: RetryPolicy,
    locks: KeyedLocks,
}

impl EntityResolver {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            retry,
            locks: KeyedLocks::new(),
        }
    }

    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Holds `key` exclusively until the guard drops. Must not be called
    /// with a key the same task is upserting.
    pub async fn hold(&self, key: &str) -> OwnedMutexGuard<()> {
        self.locks.get(key).lock_owned().await
    }

    /// Looks an entity up by natural key.
    pub async fn resolve<T, F, Fut>(&self, key: &str, find: F) -> Result<Option<T>, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, AppError>>,
    {
        self.retry.run(&format!("find {}", key), find).await
    }

    /// Returns the existing entity for `key` or creates it.
    ///
    /// `key` must be namespaced by resource (`product:<handle>`) since the
    /// lock table is shared. A create rejected as a conflict is answered by
    /// a second lookup; any other create error is returned as is.
    pub async fn upsert<T, F, Fut, C, CFut>(
        &self,
        key: &str,
        mut find: F,
        create: C,
    ) -> Result<Upserted<T>, AppError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>, AppError>>,
        C: FnMut() -> CFut,
        CFut: Future<Output = Result<T, AppError>>,
    {
        let lock = self.locks.get(key);
        let _guard = lock.lock().await;

        if let Some(existing) = self.resolve(key, &mut find).await? {
            return Ok(Upserted::Existing(existing));
        }

        match self.retry.run(&format!("create {}", key), create).await {
            Ok(created) => Ok(Upserted::Created(created)),
            Err(err) if err.is_conflict() => {
                tracing::debug!(key, error = %err, "create conflicted, looking up again");
                match self.resolve(key, &mut find).await? {
                    Some(existing) => Ok(Upserted::Existing(existing)),
                    None => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }
}
