use crate::utils::error::{RegistryError, Result};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// 依鍵序列化寫入者的鎖表；每個鍵一把非同步互斥鎖，取得時帶逾時
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
    timeout: Duration,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone + Display,
{
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    fn slot(&self, key: &K) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // 清掉已無人持有的鎖
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    pub async fn acquire(&self, key: &K) -> Result<OwnedMutexGuard<()>> {
        let slot = self.slot(key);
        match tokio::time::timeout(self.timeout, slot.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!("Lock wait on {} exceeded {:?}", key, self.timeout);
                Err(RegistryError::LockTimeout {
                    resource: key.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// 依排序後的順序取得多把鎖，避免兩個請求互相等待
    pub async fn acquire_all(&self, keys: &[K]) -> Result<Vec<OwnedMutexGuard<()>>>
    where
        K: Ord,
    {
        let mut sorted: Vec<&K> = keys.iter().collect();
        sorted.sort();
        sorted.dedup();

        let mut guards = Vec::with_capacity(sorted.len());
        for key in sorted {
            guards.push(self.acquire(key).await?);
        }
        Ok(guards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_times_out_while_held() {
        let locks = KeyedLocks::new(Duration::from_millis(20));
        let _held = locks.acquire(&"team-a/dev/HTTP_API".to_string()).await.unwrap();

        let err = locks
            .acquire(&"team-a/dev/HTTP_API".to_string())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::LockTimeout { timeout_ms: 20, .. }));
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new(Duration::from_millis(20));
        let _a = locks.acquire(&"a".to_string()).await.unwrap();
        tokio_test::assert_ok!(locks.acquire(&"b".to_string()).await);
    }

    #[tokio::test]
    async fn test_lock_is_reusable_after_release() {
        let locks = KeyedLocks::new(Duration::from_millis(20));
        {
            let _guard = locks.acquire(&"a".to_string()).await.unwrap();
        }
        tokio_test::assert_ok!(locks.acquire(&"a".to_string()).await);
    }

    #[tokio::test]
    async fn test_acquire_all_dedups_keys() {
        let locks = KeyedLocks::new(Duration::from_millis(20));
        let keys = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let guards = locks.acquire_all(&keys).await.unwrap();
        assert_eq!(guards.len(), 2);
    }
}
