use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use uuid::Uuid;

use crate::execution::tick_runner::{self, TickContext};

/// A unit of scheduled work: one tick for one task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickJob {
    pub task_id: Uuid,
}

/// Per-tick retry policy: attempts and base backoff. The schedule itself
/// redelivers every period, so a drained retry budget just drops the tick.
const TICK_ATTEMPTS: u32 = 3;
const TICK_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Periodic, at-least-once tick delivery for every running task.
///
/// Each scheduled task owns a repeating timer feeding a bounded queue; a
/// worker pool drains the queue. A full queue drops the tick — the next
/// period fires again, which is exactly the redelivery the contract wants.
pub struct Scheduler {
    entries: Mutex<HashMap<Uuid, JoinHandle<()>>>,
    tick_tx: std::sync::Mutex<Option<mpsc::Sender<TickJob>>>,
    tick_interval: Duration,
}

impl Scheduler {
    /// Build the scheduler and the receiving end of its tick queue.
    pub fn new(tick_interval_ms: u64, queue_capacity: usize) -> (Self, mpsc::Receiver<TickJob>) {
        let (tick_tx, tick_rx) = mpsc::channel(queue_capacity);
        (
            Self {
                entries: Mutex::new(HashMap::new()),
                tick_tx: std::sync::Mutex::new(Some(tick_tx)),
                tick_interval: Duration::from_millis(tick_interval_ms),
            },
            tick_rx,
        )
    }

    /// Start a repeating tick for a task. Idempotent: a live entry for the
    /// same task is left untouched.
    pub async fn schedule(&self, task_id: Uuid) {
        let mut entries = self.entries.lock().await;

        if let Some(handle) = entries.get(&task_id) {
            if !handle.is_finished() {
                tracing::debug!(task_id = %task_id, "Task already scheduled");
                return;
            }
        }

        let Some(tx) = self.tick_tx.lock().expect("scheduler mutex poisoned").clone() else {
            tracing::warn!(task_id = %task_id, "Scheduler is shut down; not scheduling");
            return;
        };

        let period = self.tick_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                match tx.try_send(TickJob { task_id }) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        counter!("ticks_failed_total").increment(1);
                        tracing::warn!(
                            task_id = %task_id,
                            "Tick queue full; dropping tick until next period"
                        );
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => break,
                }
            }
        });

        entries.insert(task_id, handle);
        gauge!("scheduled_tasks").set(entries.len() as f64);
        tracing::info!(task_id = %task_id, interval = ?period, "Task scheduled");
    }

    /// Remove a task's repeating entry.
    pub async fn unschedule(&self, task_id: Uuid) {
        let mut entries = self.entries.lock().await;
        if let Some(handle) = entries.remove(&task_id) {
            handle.abort();
            tracing::info!(task_id = %task_id, "Task unscheduled");
        }
        gauge!("scheduled_tasks").set(entries.len() as f64);
    }

    /// Remove every entry. Run at startup to purge zombie entries from a
    /// prior instance, and again on shutdown.
    pub async fn clear_all(&self) {
        let mut entries = self.entries.lock().await;
        for (_, handle) in entries.drain() {
            handle.abort();
        }
        gauge!("scheduled_tasks").set(0.0);
    }

    pub async fn scheduled_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Stop producing ticks: abort all entries and close the queue so
    /// workers drain what remains and exit.
    pub async fn shutdown(&self) {
        self.clear_all().await;
        self.tick_tx.lock().expect("scheduler mutex poisoned").take();
        tracing::info!("Scheduler shut down");
    }
}

/// Spawn the worker pool that drains the tick queue.
pub fn spawn_workers(
    concurrency: usize,
    tick_rx: mpsc::Receiver<TickJob>,
    ctx: Arc<TickContext>,
) -> Vec<JoinHandle<()>> {
    let rx = Arc::new(Mutex::new(tick_rx));

    (0..concurrency)
        .map(|worker_id| {
            let rx = Arc::clone(&rx);
            let ctx = Arc::clone(&ctx);
            tokio::spawn(worker_loop(worker_id, rx, ctx))
        })
        .collect()
}

async fn worker_loop(worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<TickJob>>>, ctx: Arc<TickContext>) {
    tracing::debug!(worker_id, "Tick worker started");

    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        run_with_retry(&ctx, job).await;
    }

    tracing::debug!(worker_id, "Tick worker stopped");
}

/// Bounded retry with exponential backoff; exhausting it drops the tick and
/// lets the next period redeliver.
async fn run_with_retry(ctx: &TickContext, job: TickJob) {
    for attempt in 0..TICK_ATTEMPTS {
        let started = std::time::Instant::now();
        match tick_runner::run_tick(ctx, job.task_id).await {
            Ok(result) => {
                histogram!("tick_latency_seconds").record(started.elapsed().as_secs_f64());
                tracing::debug!(task_id = %job.task_id, ?result, "Tick finished");
                return;
            }
            Err(e) => {
                counter!("ticks_failed_total").increment(1);
                let backoff = TICK_BACKOFF_BASE * 2u32.pow(attempt);
                tracing::warn!(
                    task_id = %job.task_id,
                    attempt = attempt + 1,
                    error = %e,
                    "Tick failed"
                );
                if attempt + 1 < TICK_ATTEMPTS {
                    sleep(backoff).await;
                }
            }
        }
    }

    tracing::error!(
        task_id = %job.task_id,
        attempts = TICK_ATTEMPTS,
        "Tick dropped after retries; next period will redeliver"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schedule_is_idempotent() {
        let (scheduler, _rx) = Scheduler::new(60_000, 16);
        let id = Uuid::new_v4();

        scheduler.schedule(id).await;
        scheduler.schedule(id).await;
        assert_eq!(scheduler.scheduled_count().await, 1);

        scheduler.unschedule(id).await;
        assert_eq!(scheduler.scheduled_count().await, 0);
    }

    #[tokio::test]
    async fn clear_all_purges_every_entry() {
        let (scheduler, _rx) = Scheduler::new(60_000, 16);
        for _ in 0..4 {
            scheduler.schedule(Uuid::new_v4()).await;
        }
        assert_eq!(scheduler.scheduled_count().await, 4);

        scheduler.clear_all().await;
        assert_eq!(scheduler.scheduled_count().await, 0);
    }

    #[tokio::test]
    async fn shutdown_closes_the_queue_and_rejects_new_entries() {
        let (scheduler, mut rx) = Scheduler::new(60_000, 16);
        scheduler.schedule(Uuid::new_v4()).await;
        scheduler.shutdown().await;

        // Queue closed: any already-buffered ticks drain, then None.
        let drained = tokio::time::timeout(Duration::from_secs(1), async {
            while rx.recv().await.is_some() {}
        })
        .await;
        assert!(drained.is_ok());

        // New schedule calls are ignored after shutdown.
        scheduler.schedule(Uuid::new_v4()).await;
        assert_eq!(scheduler.scheduled_count().await, 0);
    }

    #[tokio::test]
    async fn scheduled_entry_delivers_ticks() {
        let (scheduler, mut rx) = Scheduler::new(10, 16);
        let id = Uuid::new_v4();
        scheduler.schedule(id).await;

        let job = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("tick within a second")
            .expect("queue open");
        assert_eq!(job.task_id, id);

        scheduler.shutdown().await;
    }
}
