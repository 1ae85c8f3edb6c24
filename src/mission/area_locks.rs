use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// One async mutex per area key. Admission decisions for an area run while
/// holding its guard; different areas never contend.
#[derive(Debug, Default)]
pub struct AreaLocks {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl AreaLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, area_key: &str) -> OwnedMutexGuard<()> {
        let existing = self.locks.read().await.get(area_key).cloned();
        let lock = match existing {
            Some(lock) => lock,
            None => self
                .locks
                .write()
                .await
                .entry(area_key.to_string())
                .or_default()
                .clone(),
        };
        lock.lock_owned().await
    }
}
