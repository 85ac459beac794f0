//! The storage orchestrator: routes requests to the WAL and the engine,
//! enforces the master/slave admission rule, and replays recovered or
//! pulled mutations into the engine.
//!
//! A single struct owns the engine plus a background replay task, with a
//! simple read/write/replay contract: writes are sequenced through the
//! WAL before they touch the engine, and replay paths skip the WAL.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::protocol::{Request, RequestKind};
use crate::store::{fnv1a_32, Engine};
use crate::wal::{Batch, WalCoordinator, WalCoordinatorError};

/// This node's role in replication, if any. `None` means standalone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Master,
    Slave,
}

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("slave role requires a replay channel")]
    SlaveRequiresReplayChannel,
}

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("slave node is read-only")]
    ReadOnly,
    #[error("incorrect request type")]
    IncorrectRequestType,
    #[error(transparent)]
    Wal(#[from] WalCoordinatorError),
}

/// Sequences WAL writes, engine mutation, read/write classification, and
/// role-based admission. Owns the engine; the WAL coordinator and replica
/// role are both optional, covering standalone, master, and slave operation.
pub struct Orchestrator {
    engine: Arc<Engine>,
    wal: Option<Arc<WalCoordinator>>,
    role: Option<Role>,
    /// One mutation guard per engine partition, so a write's WAL append and
    /// its engine mutation can never be observed out of order by a racing
    /// writer to the same key.
    mutation_locks: Vec<Mutex<()>>,
}

impl Orchestrator {
    /// Construct the orchestrator. `recovered` is the batch already read
    /// from on-disk WAL segments (via [`WalCoordinator::recover`]), applied
    /// before this call returns and before the caller starts accepting
    /// connections. `replay_rx` is the slave's pulled-segment channel; it
    /// is required exactly when `role` is [`Role::Slave`].
    pub fn new(
        engine: Arc<Engine>,
        wal: Option<Arc<WalCoordinator>>,
        role: Option<Role>,
        replay_rx: Option<mpsc::Receiver<Batch>>,
        recovered: Option<Batch>,
    ) -> Result<Arc<Self>, OrchestratorError> {
        if role == Some(Role::Slave) && replay_rx.is_none() {
            return Err(OrchestratorError::SlaveRequiresReplayChannel);
        }

        let num_partitions = engine.num_partitions();
        let orchestrator = Arc::new(Self {
            engine,
            wal,
            role,
            mutation_locks: (0..num_partitions).map(|_| Mutex::new(())).collect(),
        });

        if let Some(batch) = recovered {
            if !batch.is_empty() {
                info!(
                    count = batch.len(),
                    "replaying recovered WAL segments before accepting connections"
                );
                for req in batch.items() {
                    orchestrator.recover_one(req);
                }
            }
        }

        if let Some(mut rx) = replay_rx {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                while let Some(batch) = rx.recv().await {
                    debug!(count = batch.len(), "replaying pulled segment batch");
                    for req in batch.items() {
                        orchestrator.recover_one(req);
                    }
                }
                debug!("replay channel closed; orchestrator replay task stopping");
            });
        }

        Ok(orchestrator)
    }

    /// Classify the request, admit or reject it by role, persist it, apply it.
    pub async fn handle_request(&self, req: &Request) -> Result<String, HandleError> {
        if self.role == Some(Role::Slave) && req.kind.is_mutation() {
            return Err(HandleError::ReadOnly);
        }

        match req.kind {
            RequestKind::Get => {
                let (value, found) = self.engine.get(req.key());
                Ok(if found {
                    value.unwrap()
                } else {
                    "NOT FOUND".to_string()
                })
            }
            RequestKind::Set | RequestKind::Del => {
                self.durable_mutate(req).await?;
                Ok("SUCCESS".to_string())
            }
            RequestKind::Invalid => Err(HandleError::IncorrectRequestType),
        }
    }

    /// Write-ahead-log then engine, guarded per-partition so the two steps
    /// cannot interleave with a racing write to the same key.
    async fn durable_mutate(&self, req: &Request) -> Result<(), HandleError> {
        let guard_idx = self.partition_of(req.key());
        let _guard = self.mutation_locks[guard_idx].lock().await;

        let writes_wal = self.wal.is_some() && self.role != Some(Role::Slave);
        if writes_wal {
            self.wal.as_ref().unwrap().write(req.clone()).await?;
        }

        self.apply(req);
        Ok(())
    }

    /// Recovery path: applies a mutation without touching the WAL or
    /// admission. Used for startup replay and for replica replay of pulled
    /// segments.
    fn recover_one(&self, req: &Request) {
        if req.kind.is_mutation() {
            self.apply(req);
        } else {
            warn!(kind = ?req.kind, "recovery path skipped a non-mutation request");
        }
    }

    fn apply(&self, req: &Request) {
        match req.kind {
            RequestKind::Set => self.engine.set(req.key(), req.value()),
            RequestKind::Del => self.engine.del(req.key()),
            RequestKind::Get | RequestKind::Invalid => {}
        }
    }

    fn partition_of(&self, key: &str) -> usize {
        (fnv1a_32(key.as_bytes()) as usize) % self.mutation_locks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Request;

    fn standalone() -> Arc<Orchestrator> {
        Orchestrator::new(Arc::new(Engine::new(4)), None, None, None, None).unwrap()
    }

    #[tokio::test]
    async fn get_on_empty_store_returns_not_found() {
        let o = standalone();
        let resp = o.handle_request(&Request::get("missing")).await.unwrap();
        assert_eq!(resp, "NOT FOUND");
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let o = standalone();
        assert_eq!(
            o.handle_request(&Request::set("k", "v")).await.unwrap(),
            "SUCCESS"
        );
        assert_eq!(o.handle_request(&Request::get("k")).await.unwrap(), "v");
    }

    #[tokio::test]
    async fn del_then_get_is_not_found() {
        let o = standalone();
        o.handle_request(&Request::set("k", "v")).await.unwrap();
        assert_eq!(
            o.handle_request(&Request::del("k")).await.unwrap(),
            "SUCCESS"
        );
        assert_eq!(o.handle_request(&Request::get("k")).await.unwrap(), "NOT FOUND");
    }

    #[tokio::test]
    async fn slave_construction_without_replay_channel_fails() {
        let result = Orchestrator::new(Arc::new(Engine::new(1)), None, Some(Role::Slave), None, None);
        assert!(matches!(
            result,
            Err(OrchestratorError::SlaveRequiresReplayChannel)
        ));
    }

    #[tokio::test]
    async fn slave_rejects_client_mutations() {
        let (_tx, rx) = mpsc::channel(1);
        let o = Orchestrator::new(Arc::new(Engine::new(1)), None, Some(Role::Slave), Some(rx), None).unwrap();
        let err = o.handle_request(&Request::set("k", "v")).await.unwrap_err();
        assert!(matches!(err, HandleError::ReadOnly));
    }

    #[tokio::test]
    async fn slave_still_serves_reads() {
        let (_tx, rx) = mpsc::channel(1);
        let o = Orchestrator::new(Arc::new(Engine::new(1)), None, Some(Role::Slave), Some(rx), None).unwrap();
        let resp = o.handle_request(&Request::get("k")).await.unwrap();
        assert_eq!(resp, "NOT FOUND");
    }

    #[tokio::test]
    async fn slave_replays_pulled_batches_without_admission() {
        let (tx, rx) = mpsc::channel(1);
        let o = Orchestrator::new(Arc::new(Engine::new(1)), None, Some(Role::Slave), Some(rx), None).unwrap();

        let mut batch = Batch::new(1024);
        batch.add(Request::set("x", "1"));
        batch.add(Request::del("x"));
        batch.add(Request::set("y", "3"));
        tx.send(batch).await.unwrap();
        drop(tx);

        // give the spawned replay task a chance to drain the channel
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        assert_eq!(o.handle_request(&Request::get("x")).await.unwrap(), "NOT FOUND");
        assert_eq!(o.handle_request(&Request::get("y")).await.unwrap(), "3");
    }

    #[tokio::test]
    async fn recovered_batch_is_applied_before_returning() {
        let mut recovered = Batch::new(1024);
        recovered.add(Request::set("a", "1"));
        recovered.add(Request::set("b", "2"));
        recovered.add(Request::del("a"));

        let o = Orchestrator::new(Arc::new(Engine::new(4)), None, None, None, Some(recovered)).unwrap();

        assert_eq!(o.handle_request(&Request::get("a")).await.unwrap(), "NOT FOUND");
        assert_eq!(o.handle_request(&Request::get("b")).await.unwrap(), "2");
    }

    #[tokio::test]
    async fn invalid_request_kind_is_an_error() {
        let o = standalone();
        let req = Request {
            kind: RequestKind::Invalid,
            args: vec![],
        };
        let err = o.handle_request(&req).await.unwrap_err();
        assert!(matches!(err, HandleError::IncorrectRequestType));
    }
}
