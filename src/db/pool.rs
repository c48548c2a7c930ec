//! Pool Manager (spec §4.4): a fixed-size set of workers with per-worker
//! idle/busy status, a FIFO waiter queue for callers that arrive when
//! everything is busy, and a supervision policy that replaces a worker
//! whose task dies.
//!
//! Modeled as a single serializing agent task (spec §9, "pool-as-agent"):
//! all bookkeeping happens on one task reading from one channel, so the
//! release-to-waiter hand-off is naturally atomic with the state
//! transition — a concurrent acquirer can never steal a worker out from
//! under a waiter that is about to receive it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use super::worker::{self, WorkerHandle};
use crate::config::DbConfig;

pub type WorkerId = u64;

enum Slot {
  Starting,
  Idle(WorkerHandle),
  Busy,
}

/// Messages the pool agent task reacts to.
pub enum PoolMsg {
  Acquire(oneshot::Sender<WorkerHandle>),
  Release(WorkerHandle),
  /// A worker finished startup and is ready to serve.
  Spawned(WorkerHandle),
  /// A worker failed startup; the pool will spawn a fresh one immediately.
  SpawnFailed(WorkerId),
  /// A running worker's service loop ended fatally.
  Died(WorkerId),
}

/// Handle to the running pool agent. Cheap to clone; every clone talks to
/// the same underlying task.
#[derive(Clone)]
pub struct Pool {
  tx: mpsc::Sender<PoolMsg>,
}

impl Pool {
  /// Starts `size` workers and blocks until each has either finished
  /// startup or failed once and been queued for replacement (spec §4.5).
  pub async fn start(db: DbConfig, size: usize, prepare_plans: Vec<String>) -> Self {
    let (tx, rx) = mpsc::channel(256);
    let next_id = AtomicU64::new(0);

    let mut ready_rx = Vec::with_capacity(size);
    let mut pending_ready = HashMap::with_capacity(size);
    let mut workers = HashMap::with_capacity(size);

    for _ in 0..size {
      let id = next_id.fetch_add(1, Ordering::Relaxed);
      workers.insert(id, Slot::Starting);
      let (ready_tx, ready_rx_one) = oneshot::channel();
      pending_ready.insert(id, ready_tx);
      ready_rx.push(ready_rx_one);
      worker::spawn(id, db.clone(), prepare_plans.clone(), tx.clone());
    }

    tokio::spawn(run(workers, VecDeque::new(), rx, tx.clone(), db, prepare_plans, next_id, pending_ready));

    for rx in ready_rx {
      let _ = rx.await;
    }

    Self { tx }
  }

  /// Acquire protocol (spec §4.4): returns immediately with an idle worker
  /// if one exists, otherwise suspends on the FIFO waiter queue until one
  /// is released or a replacement finishes startup.
  pub async fn acquire(&self) -> WorkerHandle {
    let (reply_tx, reply_rx) = oneshot::channel();
    // The pool task never exits while any `Pool` handle is alive, so these
    // sends/awaits cannot fail in practice.
    self.tx.send(PoolMsg::Acquire(reply_tx)).await.ok();
    reply_rx.await.expect("pool agent task is gone")
  }

  /// Release protocol (spec §4.4): hands the worker directly to the head
  /// waiter if one is queued, otherwise marks it idle.
  pub async fn release(&self, handle: WorkerHandle) {
    self.tx.send(PoolMsg::Release(handle)).await.ok();
  }
}

#[allow(clippy::too_many_arguments)]
async fn run(
  mut workers: HashMap<WorkerId, Slot>,
  mut waiters: VecDeque<oneshot::Sender<WorkerHandle>>,
  mut rx: mpsc::Receiver<PoolMsg>,
  pool_tx: mpsc::Sender<PoolMsg>,
  db: DbConfig,
  prepare_plans: Vec<String>,
  next_id: AtomicU64,
  mut pending_ready: HashMap<WorkerId, oneshot::Sender<()>>,
) {
  while let Some(msg) = rx.recv().await {
    match msg {
      PoolMsg::Acquire(reply) => {
        let idle_id = workers
          .iter()
          .find(|(_, slot)| matches!(slot, Slot::Idle(_)))
          .map(|(id, _)| *id);

        match idle_id {
          Some(id) => {
            let handle = match workers.insert(id, Slot::Busy) {
              Some(Slot::Idle(handle)) => handle,
              _ => unreachable!("idle_id was just observed to be Idle"),
            };
            let _ = reply.send(handle);
          }
          None => waiters.push_back(reply),
        }
      }

      // The service facade always releases, even after a failed query. The
      // worker sends `Died` before replying to a failed query (worker.rs),
      // so by the time a `Release` for that id reaches this loop, `Died`
      // has already removed it from `workers` — drop the stale handle
      // instead of resurrecting the slot or handing a corpse to a waiter.
      PoolMsg::Release(handle) if !workers.contains_key(&handle.id) => {}

      PoolMsg::Release(handle) => match waiters.pop_front() {
        // Handed straight to the next waiter, remaining Busy the whole
        // time — the invariant in spec §4.4 that prevents a concurrent
        // acquirer from stealing the worker between release and wakeup.
        Some(waiter) => {
          let _ = waiter.send(handle);
        }
        None => {
          workers.insert(handle.id, Slot::Idle(handle));
        }
      },

      PoolMsg::Spawned(handle) => {
        let id = handle.id;
        if let Some(ready) = pending_ready.remove(&id) {
          let _ = ready.send(());
        }
        match waiters.pop_front() {
          Some(waiter) => {
            workers.insert(id, Slot::Busy);
            let _ = waiter.send(handle);
          }
          None => {
            workers.insert(id, Slot::Idle(handle));
          }
        }
      }

      PoolMsg::SpawnFailed(id) => {
        if let Some(ready) = pending_ready.remove(&id) {
          let _ = ready.send(());
        }
        workers.remove(&id);
        respawn(&mut workers, &next_id, &db, &prepare_plans, &pool_tx);
      }

      PoolMsg::Died(id) => {
        tracing::warn!(worker_id = id, "replacing dead worker");
        workers.remove(&id);
        respawn(&mut workers, &next_id, &db, &prepare_plans, &pool_tx);
      }
    }
  }
}

fn respawn(
  workers: &mut HashMap<WorkerId, Slot>,
  next_id: &AtomicU64,
  db: &DbConfig,
  prepare_plans: &[String],
  pool_tx: &mpsc::Sender<PoolMsg>,
) {
  let id = next_id.fetch_add(1, Ordering::Relaxed);
  workers.insert(id, Slot::Starting);
  worker::spawn(id, db.clone(), prepare_plans.to_vec(), pool_tx.clone());
}
