//! FIFO request queue with a dedicated dispatcher thread.
//!
//! Requests are pushed from caller threads and dispatched in enqueue order
//! on the queue's own thread. `clean()` drains pending entries through the
//! clean-up handler; dropping the queue stops the dispatcher after its
//! current entry and drains the rest the same way, so every entry is
//! handed to exactly one of the two handlers.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

struct QueueInner<T> {
    entries: VecDeque<T>,
    stopping: bool,
}

struct QueueShared<T> {
    state: Mutex<QueueInner<T>>,
    condvar: Condvar,
    clean_up: Box<dyn Fn(T) + Send + Sync>,
}

pub(crate) struct TaskQueue<T: Send + 'static> {
    shared: Arc<QueueShared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Create a queue whose dispatcher thread runs `dispatch` per entry.
    ///
    /// `clean_up` receives entries discarded by `clean()` or teardown.
    pub(crate) fn new<D, C>(name: &str, dispatch: D, clean_up: C) -> Self
    where
        D: Fn(T) + Send + 'static,
        C: Fn(T) + Send + Sync + 'static,
    {
        let shared = Arc::new(QueueShared {
            state: Mutex::new(QueueInner {
                entries: VecDeque::new(),
                stopping: false,
            }),
            condvar: Condvar::new(),
            clean_up: Box::new(clean_up),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || loop {
                let entry = {
                    let mut state = worker_shared.state.lock().unwrap();
                    loop {
                        if state.stopping {
                            return;
                        }
                        if let Some(entry) = state.entries.pop_front() {
                            break entry;
                        }
                        state = worker_shared.condvar.wait(state).unwrap();
                    }
                };
                dispatch(entry);
            })
            .expect("failed to spawn request dispatcher thread");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Enqueue an entry for dispatch.
    ///
    /// An entry pushed during teardown goes straight to the clean-up
    /// handler.
    pub(crate) fn push(&self, entry: T) {
        let mut state = self.shared.state.lock().unwrap();
        if state.stopping {
            drop(state);
            (self.shared.clean_up)(entry);
            return;
        }
        state.entries.push_back(entry);
        drop(state);
        self.shared.condvar.notify_one();
    }

    /// Drain all pending entries through the clean-up handler.
    pub(crate) fn clean(&self) {
        let drained: Vec<T> = {
            let mut state = self.shared.state.lock().unwrap();
            state.entries.drain(..).collect()
        };
        for entry in drained {
            (self.shared.clean_up)(entry);
        }
    }

    /// Number of entries waiting for dispatch.
    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.shared.state.lock().unwrap().entries.len()
    }
}

impl<T: Send + 'static> Drop for TaskQueue<T> {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            state.stopping = true;
        }
        self.shared.condvar.notify_all();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.clean();
    }
}
