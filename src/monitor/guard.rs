//! Sweep Guard
//!
//! Serializes store-mutating jobs. Two layers:
//! - an in-process "already running" flag (a second caller returns at once)
//! - a lease lock with a TTL, renewed every third of the TTL while held
//!
//! Neither layer queues: a caller that loses either race is skipped.

use async_trait::async_trait;
use chrono::Utc;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{LockError, SweepError};
use crate::store::{LeaseRecord, PeerStore};

/// Renewable mutual-exclusion lease
#[async_trait]
pub trait LeaseLock: Send + Sync {
    /// Take the lease if it is free, expired or already ours
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Extend a lease we hold. False if it was lost.
    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError>;

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError>;
}

/// Lease kept as a record in the peer store
pub struct StoreLeaseLock {
    store: Arc<RwLock<PeerStore>>,
}

impl StoreLeaseLock {
    pub fn new(store: Arc<RwLock<PeerStore>>) -> Self {
        Self { store }
    }
}

fn expiry(ttl: Duration) -> chrono::DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60));
    Utc::now() + ttl
}

#[async_trait]
impl LeaseLock for StoreLeaseLock {
    async fn try_acquire(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        // Write lock makes check-and-set atomic
        let store = self.store.write().await;

        if let Some(current) = store.lease(key)? {
            if current.owner != owner && !current.is_expired(Utc::now()) {
                debug!("Lease {} held by {}", key, current.owner);
                return Ok(false);
            }
        }

        store.put_lease(
            key,
            &LeaseRecord {
                owner: owner.to_string(),
                expires_at: expiry(ttl),
            },
        )?;
        Ok(true)
    }

    async fn renew(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool, LockError> {
        let store = self.store.write().await;

        match store.lease(key)? {
            Some(current) if current.owner == owner => {
                store.put_lease(
                    key,
                    &LeaseRecord {
                        owner: owner.to_string(),
                        expires_at: expiry(ttl),
                    },
                )?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        let store = self.store.write().await;

        if let Some(current) = store.lease(key)? {
            if current.owner == owner {
                store.delete_lease(key)?;
            }
        }
        Ok(())
    }
}

/// Resets the running flag however the guarded job ends
struct RunningReset<'a>(&'a AtomicBool);

impl Drop for RunningReset<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SweepGuard {
    running: AtomicBool,
    lock: Arc<dyn LeaseLock>,
    key: String,
    owner: String,
    ttl: Duration,
}

impl SweepGuard {
    pub fn new(lock: Arc<dyn LeaseLock>, key: &str, ttl: Duration) -> Self {
        let owner = format!(
            "{}-{}",
            std::process::id(),
            hex::encode(rand::random::<[u8; 4]>())
        );

        Self {
            running: AtomicBool::new(false),
            lock,
            key: key.to_string(),
            owner,
            ttl,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run `job` under the guard. `Ok(None)` means it was skipped.
    pub async fn run<F, Fut, T>(&self, name: &str, job: F) -> Result<Option<T>, SweepError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, SweepError>>,
    {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("{} skipped: already running", name);
            return Ok(None);
        }
        let _reset = RunningReset(&self.running);

        if !self.lock.try_acquire(&self.key, &self.owner, self.ttl).await? {
            warn!("{} skipped: lock {:?} is held elsewhere", name, self.key);
            return Ok(None);
        }

        let renewer = self.spawn_renewer();
        let result = job().await;
        renewer.abort();

        if let Err(e) = self.lock.release(&self.key, &self.owner).await {
            warn!("Failed to release lock {:?}: {}", self.key, e);
        }

        result.map(Some)
    }

    fn spawn_renewer(&self) -> JoinHandle<()> {
        let lock = self.lock.clone();
        let key = self.key.clone();
        let owner = self.owner.clone();
        let ttl = self.ttl;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval((ttl / 3).max(Duration::from_secs(1)));
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                match lock.renew(&key, &owner, ttl).await {
                    Ok(true) => debug!("Lease {:?} renewed", key),
                    Ok(false) => warn!("Lease {:?} was lost while running", key),
                    Err(e) => warn!("Failed to renew lease {:?}: {}", key, e),
                }
            }
        })
    }
}
