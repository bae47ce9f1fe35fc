//! The invocation worker pool: zero resident workers, direct hand-off, and
//! idle retirement.
//!
//! Invocations are bursty and short. Keeping no baseline threads avoids
//! thread hoarding between bursts while still allowing parallelism up to
//! the core count; a rendezvous channel gives the direct hand-off (a submit
//! blocks only until some worker accepts the job or a new one is spawned).

use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use crossbeam_channel::{
    RecvTimeoutError,
    SendTimeoutError,
    TrySendError,
};
use parking_lot::Mutex;

type Job = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    name: &'static str,
    max_workers: usize,
    idle_timeout: Duration,
    tx: crossbeam_channel::Sender<Job>,
    rx: crossbeam_channel::Receiver<Job>,
    state: Mutex<PoolState>,
}

#[derive(Default)]
struct PoolState {
    alive: usize,
    spawned: u64,
}

/// Resolve the worker-count knob: 0 means max(core count, 2).
pub fn resolve_max_workers(knob: usize) -> usize {
    if knob > 0 {
        return knob;
    }
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cores.max(2)
}

impl WorkerPool {
    pub fn new(name: &'static str, max_workers: usize, idle_timeout: Duration) -> Self {
        assert!(max_workers > 0, "pool needs at least one worker slot");
        // Zero capacity: a send completes only when a worker is blocked in
        // recv, which is exactly the hand-off semantics we want.
        let (tx, rx) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(PoolInner {
                name,
                max_workers,
                idle_timeout,
                tx,
                rx,
                state: Mutex::new(PoolState::default()),
            }),
        }
    }

    /// Run `f` on a pool worker and return its result. Blocks (the async
    /// way) while all workers are busy and the pool is at capacity.
    pub async fn execute<R, F>(&self, f: F) -> anyhow::Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (result_tx, result_rx) = tokio::sync::oneshot::channel();
        let job: Job = Box::new(move || {
            let _ = result_tx.send(f());
        });
        self.submit(job).await?;
        result_rx
            .await
            .context("invocation worker dropped its result")
    }

    async fn submit(&self, job: Job) -> anyhow::Result<()> {
        // Fast path: an idle worker is already waiting.
        let job = match self.inner.tx.try_send(job) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(job)) => job,
            Err(TrySendError::Disconnected(_)) => anyhow::bail!("worker pool is shut down"),
        };
        // Slow path: spawn a worker if capacity remains, then hand off.
        // Workers can retire (or die to a panicking job) between the spawn
        // check and the send, so the hand-off retries the spawn check on a
        // short cadence instead of blocking indefinitely. Runs off the
        // async runtime since the send itself blocks.
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let mut job = job;
            loop {
                inner.maybe_spawn_worker();
                match inner.tx.send_timeout(job, Duration::from_millis(50)) {
                    Ok(()) => return Ok(()),
                    Err(SendTimeoutError::Timeout(returned)) => job = returned,
                    Err(SendTimeoutError::Disconnected(_)) => {
                        anyhow::bail!("worker pool is shut down")
                    },
                }
            }
        })
        .await
        .context("hand-off task panicked")?
    }

    #[cfg(test)]
    fn alive_workers(&self) -> usize {
        self.inner.state.lock().alive
    }
}

impl PoolInner {
    fn maybe_spawn_worker(self: &Arc<Self>) {
        let worker_id = {
            let mut state = self.state.lock();
            if state.alive >= self.max_workers {
                return;
            }
            state.alive += 1;
            state.spawned += 1;
            state.spawned
        };
        let inner = self.clone();
        let thread_name = format!("{}-{worker_id}", self.name);
        // Detached: workers never prevent process shutdown.
        let spawned = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker_loop(inner));
        if let Err(e) = spawned {
            self.state.lock().alive -= 1;
            tracing::error!("failed to spawn invocation worker: {e}");
        }
    }
}

fn worker_loop(inner: Arc<PoolInner>) {
    // Decrement on every exit path, including a panicking job unwinding the
    // thread; the pool then spawns a replacement on demand.
    struct AliveGuard(Arc<PoolInner>);
    impl Drop for AliveGuard {
        fn drop(&mut self) {
            self.0.state.lock().alive -= 1;
        }
    }
    let _guard = AliveGuard(inner.clone());

    loop {
        match inner.rx.recv_timeout(inner.idle_timeout) {
            Ok(job) => job(),
            Err(RecvTimeoutError::Timeout) => {
                tracing::debug!("retiring idle {} worker", inner.name);
                return;
            },
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}
