pub mod handshake;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{mpsc, watch, Mutex, RwLock};

use crate::redis::resp::encoding;

const REPLICATION_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Generates the 40-character `[a-z0-9]` primary replication ID (spec.md §3).
pub fn generate_replication_id() -> String {
    let mut rng = rand::rng();
    (0..40)
        .map(|_| {
            let idx = rng.random_range(0..REPLICATION_ID_ALPHABET.len());
            REPLICATION_ID_ALPHABET[idx] as char
        })
        .collect()
}

struct ReplicaHandle {
    write_half: Arc<Mutex<OwnedWriteHalf>>,
    acked_tx: watch::Sender<u64>,
}

struct Inner {
    replication_id: String,
    propagation_offset: u64,
    replicas: HashMap<String, ReplicaHandle>,
}

/// Primary-side replication bookkeeping (spec.md §4.6): connected replicas,
/// the propagation offset, and the `WAIT` barrier protocol. A replica
/// process still carries one of these (with an empty replica map) so the
/// handler code can treat both roles uniformly for `INFO`/`REPLCONF`.
#[derive(Clone)]
pub struct ReplicationState {
    inner: Arc<RwLock<Inner>>,
}

impl ReplicationState {
    pub fn new(replication_id: String) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                replication_id,
                propagation_offset: 0,
                replicas: HashMap::new(),
            })),
        }
    }

    pub async fn replication_id(&self) -> String {
        self.inner.read().await.replication_id.clone()
    }

    pub async fn propagation_offset(&self) -> u64 {
        self.inner.read().await.propagation_offset
    }

    pub async fn replica_count(&self) -> usize {
        self.inner.read().await.replicas.len()
    }

    pub async fn add_replica(&self, addr: String, write_half: OwnedWriteHalf) {
        let (acked_tx, _) = watch::channel(0u64);
        let handle = ReplicaHandle {
            write_half: Arc::new(Mutex::new(write_half)),
            acked_tx,
        };
        self.inner.write().await.replicas.insert(addr, handle);
    }

    /// Removes a replica's record, e.g. when its handler task exits
    /// (spec.md §9's replica-cleanup correction).
    pub async fn remove_replica(&self, addr: &str) {
        self.inner.write().await.replicas.remove(addr);
    }

    pub async fn ack_replica(&self, addr: &str, offset: u64) {
        let guard = self.inner.read().await;
        if let Some(handle) = guard.replicas.get(addr) {
            let _ = handle.acked_tx.send(offset);
        }
    }

    async fn advance_propagation(&self, n: u64) -> u64 {
        let mut guard = self.inner.write().await;
        guard.propagation_offset += n;
        guard.propagation_offset
    }

    /// Advances the propagation offset by `bytes`'s wire length and writes
    /// it to every registered replica (spec.md §4.7 step 3). A replica whose
    /// write fails is dropped rather than retried.
    pub async fn propagate(&self, bytes: &Bytes) {
        self.advance_propagation(bytes.len() as u64).await;

        let targets: Vec<(String, Arc<Mutex<OwnedWriteHalf>>)> = {
            let guard = self.inner.read().await;
            guard
                .replicas
                .iter()
                .map(|(addr, handle)| (addr.clone(), handle.write_half.clone()))
                .collect()
        };

        let mut dead = Vec::new();
        for (addr, write_half) in targets {
            let mut guard = write_half.lock().await;
            if guard.write_all(bytes).await.is_err() {
                dead.push(addr);
            }
        }
        for addr in dead {
            self.remove_replica(&addr).await;
        }
    }

    /// `WAIT n timeout_ms` (spec.md §4.7). Snapshots the current
    /// propagation offset as the target, sends `REPLCONF GETACK *` to every
    /// replica not yet caught up, then blocks until `min(|to_wait|, n)` of
    /// them ack an offset `>= target` or `timeout_ms` elapses — whichever
    /// comes first (spec.md §9's corrected, snapshot-matched barrier).
    pub async fn wait(&self, n: u32, timeout_ms: u64) -> usize {
        let (target, to_wait, total) = {
            let guard = self.inner.read().await;
            let target = guard.propagation_offset;
            let total = guard.replicas.len();
            let to_wait: Vec<(String, Arc<Mutex<OwnedWriteHalf>>, watch::Receiver<u64>)> = guard
                .replicas
                .iter()
                .filter(|(_, handle)| *handle.acked_tx.borrow() < target)
                .map(|(addr, handle)| {
                    (addr.clone(), handle.write_half.clone(), handle.acked_tx.subscribe())
                })
                .collect();
            (target, to_wait, total)
        };

        if to_wait.is_empty() {
            return total;
        }

        let barrier_target = to_wait.len().min(n as usize);
        let getack = encoding::replconf_get_ack();

        let mut dead = Vec::new();
        let mut receivers = Vec::new();
        for (addr, write_half, receiver) in to_wait {
            let mut guard = write_half.lock().await;
            let sent = guard.write_all(&getack).await.is_ok();
            drop(guard);
            if sent {
                receivers.push(receiver);
            } else {
                dead.push(addr);
            }
        }
        for addr in &dead {
            self.remove_replica(addr).await;
        }
        self.advance_propagation(getack.len() as u64).await;

        let (tx, mut rx) = mpsc::channel::<()>(receivers.len().max(1));
        for mut receiver in receivers {
            let tx = tx.clone();
            tokio::spawn(async move {
                if receiver.wait_for(|value| *value >= target).await.is_ok() {
                    let _ = tx.send(()).await;
                }
            });
        }
        drop(tx);

        let sleep = tokio::time::sleep(Duration::from_millis(timeout_ms));
        tokio::pin!(sleep);
        let mut acked = 0usize;
        while acked < barrier_target {
            tokio::select! {
                _ = &mut sleep => break,
                received = rx.recv() => match received {
                    Some(()) => acked += 1,
                    None => break,
                },
            }
        }

        self.synced_replica_count(target).await
    }

    /// Replicas whose last-acked offset is at or beyond `target`. Spec.md
    /// §4.6 phrases this as strict equality to the primary's *current*
    /// offset; §8's testable property instead requires `>= T` against the
    /// snapshot taken at `WAIT` time, which is what callers need since the
    /// primary's offset keeps advancing while the barrier is outstanding
    /// (the `GETACK` itself advances it). This implementation follows §8.
    pub async fn synced_replica_count(&self, target: u64) -> usize {
        self.inner
            .read()
            .await
            .replicas
            .values()
            .filter(|handle| *handle.acked_tx.borrow() >= target)
            .count()
    }
}
