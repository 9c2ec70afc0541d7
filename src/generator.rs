//! Background image generation with request coalescing.
//!
//! [`ImageCacheGenerator`] owns a single worker thread that drains a FIFO
//! task queue. Concurrent requests for the same key merge into one task -
//! only one collector invocation runs per key, and every waiter receives
//! that result:
//!
//! ```text
//! Request A ─┐
//!            │
//! Request B ─┼──► task queue ──► worker thread ──► collector
//!            │      (merge           │
//! Request C ─┘       by key)         ▼
//!                              [A, B, C all notified,
//!                               result persisted]
//! ```
//!
//! The worker sleeps after an idle timeout and is respawned transparently
//! by the next request. A task stays at the front of the queue while its
//! collector call runs, so requests arriving mid-generation still merge
//! into it; the task is popped once the collector completes.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::collector::{CollectedImages, ImageCollector};
use crate::config::DEFAULT_IDLE_TIMEOUT;
use crate::storage::ImageCacheStorage;
use crate::types::{AbortCallback, AbortReason, AuxiliaryData, CacheKey, TimeStamp};

/// Completion callback receiving the full generated variant triple.
///
/// Fan-out callbacks for a coalesced task all borrow the same result.
pub type ImagesCaptureCallback = Box<dyn FnOnce(&CollectedImages) + Send>;

/// Counters for monitoring generator behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GeneratorStats {
    /// Tasks enqueued (one per distinct in-flight key).
    pub tasks_enqueued: u64,
    /// Requests merged into an existing task.
    pub tasks_merged: u64,
    /// Collector runs that produced at least one variant.
    pub images_collected: u64,
    /// Collector runs that produced nothing (failure cached).
    pub generations_failed: u64,
    /// Requests aborted by `clean()` or shutdown.
    pub requests_aborted: u64,
}

impl GeneratorStats {
    /// Ratio of merged requests to all requests (0.0 to 1.0).
    pub fn coalescing_ratio(&self) -> f64 {
        let total = self.tasks_enqueued + self.tasks_merged;
        if total == 0 {
            0.0
        } else {
            self.tasks_merged as f64 / total as f64
        }
    }
}

struct GenerationTask {
    id: u64,
    key: CacheKey,
    name: String,
    extra_id: String,
    auxiliary: AuxiliaryData,
    timestamp: TimeStamp,
    capture_callbacks: Vec<ImagesCaptureCallback>,
    abort_callbacks: Vec<AbortCallback>,
}

struct QueueState {
    tasks: VecDeque<GenerationTask>,
    stopping: bool,
    running: bool,
    next_task_id: u64,
}

struct Shared {
    state: Mutex<QueueState>,
    condvar: Condvar,
    storage: Arc<ImageCacheStorage>,
    collector: Arc<dyn ImageCollector>,
    idle_timeout: Duration,
    stats: Mutex<GeneratorStats>,
}

/// Deduplicating background image generator.
///
/// Owns the worker thread for its entire lifetime; dropping the generator
/// joins the thread after its current task and aborts whatever is still
/// queued.
pub struct ImageCacheGenerator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ImageCacheGenerator {
    /// Create a generator over the given collector and store.
    pub fn new(collector: Arc<dyn ImageCollector>, storage: Arc<ImageCacheStorage>) -> Self {
        Self::with_idle_timeout(collector, storage, DEFAULT_IDLE_TIMEOUT)
    }

    /// Create a generator with a custom worker idle timeout.
    pub fn with_idle_timeout(
        collector: Arc<dyn ImageCollector>,
        storage: Arc<ImageCacheStorage>,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    tasks: VecDeque::new(),
                    stopping: false,
                    running: false,
                    next_task_id: 0,
                }),
                condvar: Condvar::new(),
                storage,
                collector,
                idle_timeout,
                stats: Mutex::new(GeneratorStats::default()),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Enqueue a generation request, merging with any in-flight task for
    /// the same key.
    ///
    /// Returns as soon as the task is enqueued or merged; the callbacks
    /// fire later on the worker thread. A merged task's timestamp is
    /// raised to the latest enqueue.
    pub fn generate_image(
        &self,
        name: &str,
        extra_id: &str,
        timestamp: TimeStamp,
        on_capture: ImagesCaptureCallback,
        on_abort: AbortCallback,
        auxiliary: AuxiliaryData,
    ) {
        let key = CacheKey::new(name, extra_id);

        // Lock order: worker slot before queue state, matching
        // wait_for_finished().
        let mut worker = self.worker.lock().unwrap();
        let mut state = self.shared.state.lock().unwrap();

        if let Some(task) = state.tasks.iter_mut().find(|task| task.key == key) {
            task.timestamp = task.timestamp.max(timestamp);
            task.capture_callbacks.push(on_capture);
            task.abort_callbacks.push(on_abort);
            self.shared.stats.lock().unwrap().tasks_merged += 1;
            debug!(key = %key, "Merged request into in-flight task");
        } else {
            let id = state.next_task_id;
            state.next_task_id += 1;
            state.tasks.push_back(GenerationTask {
                id,
                key: key.clone(),
                name: name.to_owned(),
                extra_id: extra_id.to_owned(),
                auxiliary,
                timestamp,
                capture_callbacks: vec![on_capture],
                abort_callbacks: vec![on_abort],
            });
            self.shared.stats.lock().unwrap().tasks_enqueued += 1;
            debug!(key = %key, queued = state.tasks.len(), "Enqueued generation task");
        }

        if !state.running {
            state.running = true;
            drop(state);
            // A previous worker that hit its idle timeout has exited;
            // reap it before spawning the replacement.
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
            let shared = Arc::clone(&self.shared);
            *worker = Some(
                thread::Builder::new()
                    .name("image-cache-generator".into())
                    .spawn(move || worker_loop(shared))
                    .expect("failed to spawn generator worker thread"),
            );
        } else {
            drop(state);
        }
        drop(worker);

        self.shared.condvar.notify_one();
    }

    /// Drain and discard all pending tasks, aborting every waiter with
    /// [`AbortReason::Abort`].
    ///
    /// Distinguishes "cache is shutting down / explicitly flushed" from a
    /// collector failure. The result of a collector call already running
    /// is discarded and not persisted.
    pub fn clean(&self) {
        let drained: Vec<GenerationTask> = {
            let mut state = self.shared.state.lock().unwrap();
            state.tasks.drain(..).collect()
        };
        self.abort_tasks(drained);
    }

    /// Stop the worker after its current task and block until it exits.
    ///
    /// Tasks still queued afterwards are aborted with
    /// [`AbortReason::Abort`] exactly once. No callback runs after this
    /// returns.
    pub fn wait_for_finished(&self) {
        let mut worker = self.worker.lock().unwrap();
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = true;
        }
        self.shared.condvar.notify_all();

        if let Some(handle) = worker.take() {
            let _ = handle.join();
        }

        let drained: Vec<GenerationTask> = {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = false;
            state.tasks.drain(..).collect()
        };
        drop(worker);
        self.abort_tasks(drained);
    }

    /// Snapshot of the generator counters.
    pub fn stats(&self) -> GeneratorStats {
        *self.shared.stats.lock().unwrap()
    }

    /// Number of tasks currently queued (including the in-flight one).
    pub fn queued_task_count(&self) -> usize {
        self.shared.state.lock().unwrap().tasks.len()
    }

    fn abort_tasks(&self, tasks: Vec<GenerationTask>) {
        let mut aborted = 0u64;
        for task in tasks {
            debug!(key = %task.key, waiters = task.abort_callbacks.len(), "Aborting task");
            for abort in task.abort_callbacks {
                abort(AbortReason::Abort);
                aborted += 1;
            }
        }
        if aborted > 0 {
            self.shared.stats.lock().unwrap().requests_aborted += aborted;
        }
    }
}

impl Drop for ImageCacheGenerator {
    fn drop(&mut self) {
        self.wait_for_finished();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    debug!("Generator worker started");
    loop {
        let mut state = shared.state.lock().unwrap();
        loop {
            if state.stopping {
                state.running = false;
                debug!("Generator worker stopping");
                return;
            }
            if !state.tasks.is_empty() {
                break;
            }
            let (guard, timeout) = shared
                .condvar
                .wait_timeout(state, shared.idle_timeout)
                .unwrap();
            state = guard;
            if timeout.timed_out() && state.tasks.is_empty() && !state.stopping {
                state.running = false;
                debug!("Generator worker idle, sleeping");
                return;
            }
        }

        // The task stays at the front while the collector runs so that
        // concurrent requests merge into it.
        let front = state.tasks.front().expect("queue checked non-empty");
        let task_id = front.id;
        let name = front.name.clone();
        let extra_id = front.extra_id.clone();
        let auxiliary = front.auxiliary.clone();
        drop(state);

        let result = shared.collector.collect(&name, &extra_id, &auxiliary);

        let mut state = shared.state.lock().unwrap();
        let task = match state.tasks.front() {
            // clean() may have drained the queue mid-collection; in that
            // case the waiters were already aborted and the result is
            // discarded.
            Some(front) if front.id == task_id => state.tasks.pop_front(),
            _ => None,
        };
        let queue_drained = state.tasks.is_empty();
        drop(state);

        if let Some(task) = task {
            finish_task(&shared, task, result);
        }

        if queue_drained {
            if let Err(err) = shared.storage.wal_checkpoint_full() {
                warn!(error = %err, "WAL checkpoint failed");
            }
        }
    }
}

fn finish_task(shared: &Shared, task: GenerationTask, result: Option<CollectedImages>) {
    let images = result.unwrap_or_default();

    if images.is_null() {
        debug!(key = %task.key, "Generation failed, caching null entry");
        shared.stats.lock().unwrap().generations_failed += 1;
        for abort in task.abort_callbacks {
            abort(AbortReason::Failed);
        }
    } else {
        shared.stats.lock().unwrap().images_collected += 1;
        for capture in task.capture_callbacks {
            capture(&images);
        }
    }

    // Persisted even on failure so the key is not retried until the
    // source timestamp changes.
    if let Err(err) = shared.storage.store_image(
        &task.key,
        task.timestamp,
        &images.image,
        &images.mid_size,
        &images.small,
    ) {
        warn!(key = %task.key, error = %err, "Failed to persist generated images");
    }
}
