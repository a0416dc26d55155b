//! 内存版 Outbox 仓储（InMemoryOutboxRepository）
//!
//! 以进程内结构模拟行级锁与事务：
//! - 每个事务独立暂存插入与更新，提交时一次性落入共享存储；
//! - `get_unprocessed_messages` 对选中行加锁，其他事务持有的行直接跳过（skip-locked）；
//! - 提交、回滚或丢弃事务句柄都会释放该事务持有的全部行锁。
//!
//! 典型用途：测试环境、示例与本地开发。
//!
use crate::error::{DomainError, DomainResult as Result};
use crate::message::OutboxMessage;
use crate::persist::OutboxRepository;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

#[derive(Default)]
struct Store {
    /// 已提交的行，按插入顺序
    rows: Vec<OutboxMessage>,
    /// 行 ID -> 持有锁的事务 ID
    locks: HashMap<Uuid, u64>,
}

impl Store {
    fn release(&mut self, tx_id: u64) {
        self.locks.retain(|_, owner| *owner != tx_id);
    }

    fn find(&self, id: Uuid) -> Option<&OutboxMessage> {
        self.rows.iter().find(|row| row.id() == id)
    }
}

fn lock(store: &Mutex<Store>) -> MutexGuard<'_, Store> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Clone, Default)]
pub struct InMemoryOutboxRepository {
    store: Arc<Mutex<Store>>,
    next_tx: Arc<AtomicU64>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已提交的全部消息（按插入顺序）
    pub fn messages(&self) -> Vec<OutboxMessage> {
        lock(&self.store).rows.clone()
    }

    pub fn get(&self, id: Uuid) -> Option<OutboxMessage> {
        lock(&self.store).find(id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.store).rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_owner(&self, tx: &InMemoryTx) -> Result<()> {
        if Arc::ptr_eq(&self.store, &tx.store) {
            return Ok(());
        }
        Err(DomainError::repository(
            "transaction was started by another repository",
        ))
    }
}

/// 内存事务句柄
pub struct InMemoryTx {
    id: u64,
    store: Arc<Mutex<Store>>,
    inserts: Vec<OutboxMessage>,
    updates: HashMap<Uuid, OutboxMessage>,
    finished: bool,
}

impl InMemoryTx {
    /// 本事务可见的行：已提交数据叠加本事务未提交的写入
    fn current(&self, store: &Store, id: Uuid) -> Option<OutboxMessage> {
        if let Some(own) = self.inserts.iter().find(|m| m.id() == id) {
            return Some(own.clone());
        }
        if let Some(updated) = self.updates.get(&id) {
            return Some(updated.clone());
        }
        store.find(id).cloned()
    }

    fn stage(&mut self, message: OutboxMessage) {
        if let Some(own) = self.inserts.iter_mut().find(|m| m.id() == message.id()) {
            *own = message;
        } else {
            self.updates.insert(message.id(), message);
        }
    }
}

impl Drop for InMemoryTx {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.store).release(self.id);
        }
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    type Tx = InMemoryTx;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(InMemoryTx {
            id: self.next_tx.fetch_add(1, Ordering::Relaxed) + 1,
            store: self.store.clone(),
            inserts: Vec::new(),
            updates: HashMap::new(),
            finished: false,
        })
    }

    async fn commit(&self, mut tx: Self::Tx) -> Result<()> {
        self.check_owner(&tx)?;
        let inserts = std::mem::take(&mut tx.inserts);
        let updates = std::mem::take(&mut tx.updates);

        let mut store = lock(&self.store);
        store.rows.extend(inserts);
        for (id, updated) in updates {
            if let Some(row) = store.rows.iter_mut().find(|row| row.id() == id) {
                *row = updated;
            }
        }
        store.release(tx.id);
        tx.finished = true;
        Ok(())
    }

    async fn rollback(&self, mut tx: Self::Tx) -> Result<()> {
        self.check_owner(&tx)?;
        lock(&self.store).release(tx.id);
        tx.finished = true;
        Ok(())
    }

    async fn create(&self, tx: &mut Self::Tx, message: &OutboxMessage) -> Result<()> {
        self.check_owner(tx)?;
        let duplicate = {
            let store = lock(&self.store);
            store.find(message.id()).is_some()
                || tx.inserts.iter().any(|m| m.id() == message.id())
        };
        if duplicate {
            return Err(DomainError::Database {
                reason: format!(
                    "duplicate key value violates unique constraint: id={}",
                    message.id()
                ),
            });
        }
        tx.inserts.push(message.clone());
        Ok(())
    }

    async fn get_unprocessed_messages(
        &self,
        tx: &mut Self::Tx,
        limit: usize,
    ) -> Result<Vec<OutboxMessage>> {
        self.check_owner(tx)?;
        let mut store = lock(&self.store);
        let Store { rows, locks } = &mut *store;

        let mut claimed: Vec<OutboxMessage> = Vec::new();
        for row in rows.iter() {
            if claimed.len() >= limit {
                break;
            }
            if matches!(locks.get(&row.id()), Some(owner) if *owner != tx.id) {
                continue;
            }
            let visible = tx.updates.get(&row.id()).unwrap_or(row);
            if visible.is_pending() {
                claimed.push(visible.clone());
            }
        }
        for own in tx.inserts.iter().filter(|m| m.is_pending()) {
            if claimed.len() >= limit {
                break;
            }
            claimed.push(own.clone());
        }

        for message in &claimed {
            locks.insert(message.id(), tx.id);
        }
        Ok(claimed)
    }

    async fn save_processed_messages(
        &self,
        tx: &mut Self::Tx,
        messages: &[OutboxMessage],
    ) -> Result<()> {
        self.check_owner(tx)?;
        let now = Utc::now();
        for message in messages {
            let current = {
                let store = lock(&self.store);
                tx.current(&store, message.id())
            };
            // 与 `WHERE status = 'pending'` 一致：终态行保持不变
            let Some(mut current) = current.filter(OutboxMessage::is_pending) else {
                continue;
            };
            current.mark_processed(now)?;
            tx.stage(current);
        }
        Ok(())
    }

    async fn save_failed_messages(
        &self,
        tx: &mut Self::Tx,
        messages: &[OutboxMessage],
    ) -> Result<()> {
        self.check_owner(tx)?;
        for message in messages {
            let pending = {
                let store = lock(&self.store);
                tx.current(&store, message.id())
                    .is_some_and(|current| current.is_pending())
            };
            if pending {
                tx.stage(message.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{DEFAULT_MAX_RETRIES, MessageStatus, NewMessage};
    use std::collections::HashSet;

    fn message(n: i64) -> OutboxMessage {
        let new = NewMessage::builder()
            .aggregate_id(n)
            .aggregate_type("fruit")
            .payload(format!("{{\"n\":{n}}}").into_bytes())
            .build();
        OutboxMessage::pending("fruit.events", new, DEFAULT_MAX_RETRIES)
    }

    async fn seed(repo: &InMemoryOutboxRepository, n: i64) -> Vec<Uuid> {
        let mut tx = repo.begin().await.unwrap();
        let mut ids = Vec::new();
        for i in 1..=n {
            let m = message(i);
            ids.push(m.id());
            repo.create(&mut tx, &m).await.unwrap();
        }
        repo.commit(tx).await.unwrap();
        ids
    }

    #[tokio::test]
    async fn uncommitted_insert_is_invisible_and_rollback_discards_it() {
        let repo = InMemoryOutboxRepository::new();
        let mut producer = repo.begin().await.unwrap();
        repo.create(&mut producer, &message(1)).await.unwrap();

        let mut worker = repo.begin().await.unwrap();
        assert!(repo.get_unprocessed_messages(&mut worker, 10).await.unwrap().is_empty());
        repo.rollback(worker).await.unwrap();

        repo.rollback(producer).await.unwrap();
        assert!(repo.is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_is_reported_as_database_error() {
        let repo = InMemoryOutboxRepository::new();
        let m = message(1);
        let mut tx = repo.begin().await.unwrap();
        repo.create(&mut tx, &m).await.unwrap();
        let err = repo.create(&mut tx, &m).await.unwrap_err();
        assert!(matches!(err, DomainError::Database { .. }));
    }

    #[tokio::test]
    async fn fetch_never_exceeds_limit() {
        let repo = InMemoryOutboxRepository::new();
        seed(&repo, 10).await;

        let mut tx = repo.begin().await.unwrap();
        assert_eq!(repo.get_unprocessed_messages(&mut tx, 4).await.unwrap().len(), 4);
        repo.rollback(tx).await.unwrap();

        let mut tx = repo.begin().await.unwrap();
        assert!(repo.get_unprocessed_messages(&mut tx, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_transactions_claim_disjoint_batches() {
        let repo = InMemoryOutboxRepository::new();
        let ids: HashSet<Uuid> = seed(&repo, 10).await.into_iter().collect();

        let mut a = repo.begin().await.unwrap();
        let mut b = repo.begin().await.unwrap();
        let batch_a = repo.get_unprocessed_messages(&mut a, 5).await.unwrap();
        let batch_b = repo.get_unprocessed_messages(&mut b, 5).await.unwrap();

        let set_a: HashSet<Uuid> = batch_a.iter().map(|m| m.id()).collect();
        let set_b: HashSet<Uuid> = batch_b.iter().map(|m| m.id()).collect();
        assert_eq!(set_a.len(), 5);
        assert_eq!(set_b.len(), 5);
        assert!(set_a.is_disjoint(&set_b));
        assert_eq!(&set_a | &set_b, ids);

        // 第三个事务此时拿不到任何行
        let mut c = repo.begin().await.unwrap();
        assert!(repo.get_unprocessed_messages(&mut c, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropping_a_transaction_releases_its_locks() {
        let repo = InMemoryOutboxRepository::new();
        seed(&repo, 3).await;

        {
            let mut tx = repo.begin().await.unwrap();
            assert_eq!(repo.get_unprocessed_messages(&mut tx, 3).await.unwrap().len(), 3);
        }

        let mut tx = repo.begin().await.unwrap();
        assert_eq!(repo.get_unprocessed_messages(&mut tx, 3).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn processed_and_failed_rows_leave_the_pending_set() {
        let repo = InMemoryOutboxRepository::new();
        seed(&repo, 2).await;

        let mut tx = repo.begin().await.unwrap();
        let mut batch = repo.get_unprocessed_messages(&mut tx, 2).await.unwrap();
        let mut poisoned = batch.pop().unwrap();
        for _ in 0..DEFAULT_MAX_RETRIES {
            poisoned.record_failure("boom").unwrap();
        }
        repo.save_processed_messages(&mut tx, &batch).await.unwrap();
        repo.save_failed_messages(&mut tx, &[poisoned.clone()]).await.unwrap();
        repo.commit(tx).await.unwrap();

        let processed = repo.get(batch[0].id()).unwrap();
        assert_eq!(processed.status(), MessageStatus::Processed);
        assert!(processed.processed_at().is_some());

        let failed = repo.get(poisoned.id()).unwrap();
        assert_eq!(failed.status(), MessageStatus::Failed);
        assert_eq!(failed.retry_count(), DEFAULT_MAX_RETRIES);
        assert_eq!(failed.last_error(), "boom");

        let mut tx = repo.begin().await.unwrap();
        assert!(repo.get_unprocessed_messages(&mut tx, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn processed_update_skips_terminal_rows() {
        let repo = InMemoryOutboxRepository::new();
        seed(&repo, 1).await;

        let mut tx = repo.begin().await.unwrap();
        let batch = repo.get_unprocessed_messages(&mut tx, 1).await.unwrap();
        let mut failed = batch[0].clone();
        for _ in 0..DEFAULT_MAX_RETRIES {
            failed.record_failure("boom").unwrap();
        }
        repo.save_failed_messages(&mut tx, &[failed.clone()]).await.unwrap();
        repo.save_processed_messages(&mut tx, &batch).await.unwrap();
        repo.commit(tx).await.unwrap();

        assert_eq!(repo.get(failed.id()).unwrap().status(), MessageStatus::Failed);
    }

    #[tokio::test]
    async fn stale_attempt_does_not_rewrite_terminal_rows() {
        let repo = InMemoryOutboxRepository::new();
        seed(&repo, 1).await;

        let mut tx = repo.begin().await.unwrap();
        let batch = repo.get_unprocessed_messages(&mut tx, 1).await.unwrap();
        repo.save_processed_messages(&mut tx, &batch).await.unwrap();
        repo.commit(tx).await.unwrap();

        let mut stale = batch[0].clone();
        stale.record_failure("late failure").unwrap();
        let mut tx = repo.begin().await.unwrap();
        repo.save_failed_messages(&mut tx, &[stale.clone()]).await.unwrap();
        repo.commit(tx).await.unwrap();

        let row = repo.get(stale.id()).unwrap();
        assert_eq!(row.status(), MessageStatus::Processed);
        assert_eq!(row.retry_count(), 0);
        assert_eq!(row.last_error(), "");
    }

    #[tokio::test]
    async fn foreign_transaction_is_rejected() {
        let repo = InMemoryOutboxRepository::new();
        let other = InMemoryOutboxRepository::new();
        let tx = other.begin().await.unwrap();
        assert!(repo.commit(tx).await.is_err());
    }
}
