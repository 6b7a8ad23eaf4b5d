use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep_until, Instant};

use crate::error::SiteToSiteError;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[async_trait]
/// Periodic work handed to the [KeepAliveScheduler], typically extending
/// the TTL of an open transaction.
pub trait KeepAliveTask: Send + Sync + 'static {
    async fn keep_alive(&self) -> Result<(), SiteToSiteError>;
}

enum Event {
    Schedule {
        id: u64,
        interval: Duration,
        task: Arc<dyn KeepAliveTask>,
    },
    Cancel(u64),
    Shutdown,
}

#[derive(Clone)]
/// A single background worker running keep-alive tasks.
///
/// The worker is a detached tokio task so it never holds the runtime open,
/// but it keeps running until [KeepAliveScheduler::shutdown] is called or
/// every scheduler and handle has been dropped.
pub struct KeepAliveScheduler {
    tx: flume::Sender<Event>,
    next_id: Arc<AtomicU64>,
    is_shutdown: Arc<AtomicBool>,
}

impl KeepAliveScheduler {
    /// Spawns the worker.
    ///
    /// This must be called from within a tokio runtime.
    pub fn start() -> Self {
        let (tx, rx) = flume::unbounded();
        tokio::spawn(run_scheduler(rx));

        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
            is_shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Runs `task` every `interval` until the returned handle is cancelled
    /// or dropped.
    ///
    /// The first run happens one `interval` after scheduling.
    pub fn schedule(
        &self,
        interval: Duration,
        task: Arc<dyn KeepAliveTask>,
    ) -> KeepAliveHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        if self.is_shutdown() {
            warn!(job_id = id, "Keep-alive scheduler is shut down, task will not run.");
            return KeepAliveHandle { id, tx: None };
        }

        let event = Event::Schedule {
            id,
            interval: interval.max(MIN_INTERVAL),
            task,
        };
        if self.tx.send(event).is_err() {
            warn!(job_id = id, "Keep-alive worker has stopped, task will not run.");
            return KeepAliveHandle { id, tx: None };
        }

        KeepAliveHandle {
            id,
            tx: Some(self.tx.clone()),
        }
    }

    /// Stops the worker, no scheduled tasks will run afterwards.
    pub fn shutdown(&self) {
        if self.is_shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        debug!("Shutting down keep-alive scheduler.");
        let _ = self.tx.send(Event::Shutdown);
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }
}

/// A registration of a task on the [KeepAliveScheduler].
///
/// The task is unregistered when the handle is dropped.
pub struct KeepAliveHandle {
    id: u64,
    tx: Option<flume::Sender<Event>>,
}

impl KeepAliveHandle {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns if the task was accepted by a running worker.
    pub fn is_active(&self) -> bool {
        self.tx.is_some()
    }

    /// Stops any further runs of the task.
    pub fn cancel(mut self) {
        self.unregister();
    }

    fn unregister(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Event::Cancel(self.id));
        }
    }
}

impl Drop for KeepAliveHandle {
    fn drop(&mut self) {
        self.unregister();
    }
}

struct Job {
    interval: Duration,
    next_run: Instant,
    task: Arc<dyn KeepAliveTask>,
    running: Arc<AtomicBool>,
}

async fn run_scheduler(events: flume::Receiver<Event>) {
    let mut jobs = HashMap::<u64, Job>::new();

    loop {
        let next_deadline = jobs.values().map(|job| job.next_run).min();

        let event = match next_deadline {
            None => Some(events.recv_async().await),
            Some(deadline) => {
                tokio::select! {
                    event = events.recv_async() => Some(event),
                    _ = sleep_until(deadline) => None,
                }
            },
        };

        match event {
            Some(Ok(Event::Schedule { id, interval, task })) => {
                trace!(job_id = id, interval = ?interval, "Scheduled keep-alive task.");
                let job = Job {
                    interval,
                    next_run: Instant::now() + interval,
                    task,
                    running: Arc::new(AtomicBool::new(false)),
                };
                jobs.insert(id, job);
            },
            Some(Ok(Event::Cancel(id))) => {
                trace!(job_id = id, "Cancelled keep-alive task.");
                jobs.remove(&id);
            },
            Some(Ok(Event::Shutdown)) | Some(Err(_)) => break,
            None => run_due_jobs(&mut jobs),
        }
    }

    debug!(num_jobs = jobs.len(), "Keep-alive scheduler stopped.");
}

/// Starts every job which is due.
///
/// Each run is spawned so a slow task never holds up the worker. A job
/// whose previous run is still in flight is skipped until its next tick.
fn run_due_jobs(jobs: &mut HashMap<u64, Job>) {
    let now = Instant::now();

    for (id, job) in jobs.iter_mut() {
        if job.next_run > now {
            continue;
        }
        job.next_run = now + job.interval;

        if job.running.swap(true, Ordering::SeqCst) {
            trace!(job_id = *id, "Keep-alive task is still running, skipping.");
            continue;
        }

        let id = *id;
        let task = job.task.clone();
        let running = job.running.clone();
        tokio::spawn(async move {
            if let Err(e) = task.keep_alive().await {
                warn!(job_id = id, error = ?e, "Keep-alive task failed.");
            }
            running.store(false, Ordering::SeqCst);
        });
    }
}
