//! Single-threaded task queue
//!
//! Each processor owns one worker thread draining a FIFO queue. Scheduling a
//! task equal to one already queued is a no-op. The worker hands every task
//! a fresh [`Cancellation`] that `cancel_pending` and `stop` trip.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Cancellation, Stage, StageError};

struct QueueState<T> {
    queue: VecDeque<T>,
    running: bool,
    stopped: bool,
    current: Option<Cancellation>,
}

impl<T> QueueState<T> {
    fn is_idle(&self) -> bool {
        !self.running && self.queue.is_empty()
    }
}

struct Shared<T> {
    stage: Stage,
    state: Mutex<QueueState<T>>,
    wake: Condvar,
    idle: Condvar,
    worker: OnceLock<ThreadId>,
}

impl<T: PartialEq + fmt::Debug> Shared<T> {
    fn schedule(&self, task: T) -> bool {
        let mut state = self.state.lock();
        if state.stopped || state.queue.contains(&task) {
            return false;
        }
        debug!(stage = %self.stage, ?task, "Scheduled");
        state.queue.push_back(task);
        self.wake.notify_one();
        true
    }

    fn retain(&self, keep: impl FnMut(&T) -> bool) {
        let mut state = self.state.lock();
        state.queue.retain(keep);
        if state.is_idle() {
            self.idle.notify_all();
        }
    }
}

impl<T> Shared<T> {
    fn on_worker(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    fn wait_for_completion(&self) {
        if self.on_worker() {
            return;
        }
        let mut state = self.state.lock();
        while !state.is_idle() && !state.stopped {
            self.idle.wait(&mut state);
        }
    }
}

/// Schedules onto a processor without owning it
pub struct TaskHandle<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T: PartialEq + fmt::Debug> TaskHandle<T> {
    pub fn schedule(&self, task: T) -> bool {
        self.shared.schedule(task)
    }

    /// Drops queued tasks for which `keep` returns false
    pub fn retain(&self, keep: impl FnMut(&T) -> bool) {
        self.shared.retain(keep);
    }

    /// See [`TaskProcessor::wait_for_completion`]
    pub fn wait_for_completion(&self) {
        self.shared.wait_for_completion();
    }
}

pub struct TaskProcessor<T> {
    shared: Arc<Shared<T>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl<T> TaskProcessor<T>
where
    T: PartialEq + fmt::Debug + Send + 'static,
{
    /// Starts the worker thread.
    ///
    /// `handler` runs every task; `on_failure` receives tasks whose handler
    /// failed or panicked, with a message. Cancelled tasks are only logged.
    pub fn spawn<H, F>(stage: Stage, mut handler: H, mut on_failure: F) -> std::io::Result<Self>
    where
        H: FnMut(&T, &Cancellation) -> Result<(), StageError> + Send + 'static,
        F: FnMut(&T, &str) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            stage,
            state: Mutex::new(QueueState {
                queue: VecDeque::new(),
                running: false,
                stopped: false,
                current: None,
            }),
            wake: Condvar::new(),
            idle: Condvar::new(),
            worker: OnceLock::new(),
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("buildtree-{}", stage))
            .spawn(move || {
                let _ = worker.worker.set(thread::current().id());
                while let Some((task, cancel)) = next_task(&worker) {
                    match catch_unwind(AssertUnwindSafe(|| handler(&task, &cancel))) {
                        Ok(Ok(())) => {}
                        Ok(Err(StageError::Cancelled)) => {
                            debug!(stage = %worker.stage, ?task, "Task cancelled");
                        }
                        Ok(Err(e)) => {
                            warn!(stage = %worker.stage, ?task, error = %e, "Task failed");
                            on_failure(&task, &e.to_string());
                        }
                        Err(panic) => {
                            let message = panic_message(panic.as_ref());
                            warn!(stage = %worker.stage, ?task, %message, "Task panicked");
                            on_failure(&task, &message);
                        }
                    }
                    worker.state.lock().current = None;
                }
            })?;

        Ok(Self {
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn stage(&self) -> Stage {
        self.shared.stage
    }

    pub fn handle(&self) -> TaskHandle<T> {
        TaskHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Queues a task unless an equal one is already pending
    pub fn schedule(&self, task: T) -> bool {
        self.shared.schedule(task)
    }

    pub fn schedule_all(&self, tasks: impl IntoIterator<Item = T>) {
        for task in tasks {
            self.shared.schedule(task);
        }
    }

    pub fn retain(&self, keep: impl FnMut(&T) -> bool) {
        self.shared.retain(keep);
    }

    /// Drops queued tasks and cancels the running one
    pub fn cancel_pending(&self) {
        let mut state = self.shared.state.lock();
        state.queue.clear();
        if let Some(cancel) = &state.current {
            cancel.cancel();
        }
        if state.is_idle() {
            self.shared.idle.notify_all();
        }
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().is_idle()
    }

    /// Blocks until the queue is drained. Returns at once on the worker thread.
    pub fn wait_for_completion(&self) {
        self.shared.wait_for_completion();
    }

    /// Like [`wait_for_completion`](Self::wait_for_completion); false on timeout
    pub fn wait_for_completion_timeout(&self, timeout: Duration) -> bool {
        if self.shared.on_worker() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_idle() && !state.stopped {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }
}

impl<T> TaskProcessor<T> {
    /// Cancels everything and joins the worker
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock();
            state.stopped = true;
            state.queue.clear();
            if let Some(cancel) = &state.current {
                cancel.cancel();
            }
            self.shared.wake.notify_all();
            self.shared.idle.notify_all();
        }
        if self.shared.on_worker() {
            return;
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.join().is_err() {
                warn!(stage = %self.shared.stage, "Worker thread exited abnormally");
            }
        }
    }
}

impl<T> Drop for TaskProcessor<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn next_task<T>(shared: &Shared<T>) -> Option<(T, Cancellation)> {
    let mut state = shared.state.lock();
    loop {
        if state.stopped {
            state.running = false;
            shared.idle.notify_all();
            return None;
        }
        if let Some(task) = state.queue.pop_front() {
            let cancel = Cancellation::new();
            state.running = true;
            state.current = Some(cancel.clone());
            return Some((task, cancel));
        }
        state.running = false;
        shared.idle.notify_all();
        shared.wake.wait(&mut state);
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: Arc<AtomicUsize>) -> TaskProcessor<u32> {
        TaskProcessor::spawn(
            Stage::Read,
            move |_task: &u32, _cancel: &Cancellation| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            |_task: &u32, _message: &str| {},
        )
        .unwrap()
    }

    #[test]
    fn runs_scheduled_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let processor = counting(Arc::clone(&counter));

        processor.schedule_all([1, 2, 3]);
        processor.wait_for_completion();

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(processor.is_idle());
    }

    #[test]
    fn equal_pending_tasks_are_deduplicated() {
        let gate = Arc::new(Mutex::new(()));
        let counter = Arc::new(AtomicUsize::new(0));
        let held = gate.lock();

        let (g, c) = (Arc::clone(&gate), Arc::clone(&counter));
        let processor = TaskProcessor::spawn(
            Stage::ResolveDependencies,
            move |_task: &u32, _cancel: &Cancellation| {
                let _guard = g.lock();
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            |_task: &u32, _message: &str| {},
        )
        .unwrap();

        // the first task blocks on the gate, the rest queue up behind it
        processor.schedule(0);
        while processor.pending() > 0 {
            thread::yield_now();
        }
        assert!(processor.schedule(7));
        assert!(!processor.schedule(7));
        assert_eq!(processor.pending(), 1);

        drop(held);
        processor.wait_for_completion();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn panics_are_reported_as_failures() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let f = Arc::clone(&failures);
        let processor = TaskProcessor::spawn(
            Stage::ResolvePlugins,
            |task: &u32, _cancel: &Cancellation| {
                if *task == 2 {
                    panic!("boom");
                }
                Ok(())
            },
            move |task: &u32, message: &str| f.lock().push((*task, message.to_string())),
        )
        .unwrap();

        processor.schedule_all([1, 2, 3]);
        processor.wait_for_completion();

        assert_eq!(*failures.lock(), vec![(2, "boom".to_string())]);
    }

    #[test]
    fn cancelled_tasks_are_not_failures() {
        let failures = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&failures);
        let processor = TaskProcessor::spawn(
            Stage::ResolveFolders,
            |_task: &u32, _cancel: &Cancellation| Err(StageError::Cancelled),
            move |_task: &u32, _message: &str| {
                f.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();

        processor.schedule(1);
        processor.wait_for_completion();
        assert_eq!(failures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_pending_trips_running_task() {
        let processor = TaskProcessor::spawn(
            Stage::DownloadArtifacts,
            |_task: &u32, cancel: &Cancellation| {
                while !cancel.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(StageError::Cancelled)
            },
            |_task: &u32, _message: &str| {},
        )
        .unwrap();

        processor.schedule(1);
        processor.schedule(2);
        assert!(!processor.wait_for_completion_timeout(Duration::from_millis(50)));

        processor.cancel_pending();
        assert!(processor.wait_for_completion_timeout(Duration::from_secs(5)));
        assert_eq!(processor.pending(), 0);
    }

    #[test]
    fn stop_rejects_new_tasks() {
        let counter = Arc::new(AtomicUsize::new(0));
        let processor = counting(Arc::clone(&counter));
        processor.stop();

        assert!(!processor.schedule(1));
        processor.wait_for_completion();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn tasks_can_schedule_follow_ups() {
        let slot: Arc<OnceLock<TaskHandle<u32>>> = Arc::new(OnceLock::new());
        let done = Arc::new(AtomicUsize::new(0));

        let (s, d) = (Arc::clone(&slot), Arc::clone(&done));
        let processor = TaskProcessor::spawn(
            Stage::Read,
            move |task: &u32, _cancel: &Cancellation| {
                if *task == 1 {
                    if let Some(handle) = s.get() {
                        handle.schedule(2);
                    }
                }
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            |_task: &u32, _message: &str| {},
        )
        .unwrap();
        let _ = slot.set(processor.handle());

        processor.schedule(1);
        processor.wait_for_completion();
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn waiting_from_inside_a_task_does_not_deadlock() {
        let slot: Arc<OnceLock<TaskHandle<u32>>> = Arc::new(OnceLock::new());
        let done = Arc::new(AtomicUsize::new(0));

        let (s, d) = (Arc::clone(&slot), Arc::clone(&done));
        let processor = TaskProcessor::spawn(
            Stage::Read,
            move |task: &u32, _cancel: &Cancellation| {
                if let Some(handle) = s.get() {
                    if *task == 1 {
                        handle.schedule(2);
                    }
                    handle.wait_for_completion();
                }
                d.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            |_task: &u32, _message: &str| {},
        )
        .unwrap();
        let _ = slot.set(processor.handle());

        processor.schedule(1);
        assert!(processor.wait_for_completion_timeout(Duration::from_secs(10)));
        assert_eq!(done.load(Ordering::SeqCst), 2);
        assert!(processor.is_idle());
    }
}
