//! The runloop is the concurrency primitive everything else stands on: a
//! dedicated OS thread which owns one state value and executes posted tasks
//! against it, one at a time, with no preemption. All cross-thread traffic
//! is a task; the state itself never leaves its thread, so nothing in a
//! state type needs a lock.
//!
//! Two queues feed the loop. The general queue carries mailbox traffic and
//! lifecycle work; the proxy queue carries [`crate::EnvProxy`] notifies and
//! is also drained while lock mode is held, when general traffic is not.

use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// A unit of work executed on the loop thread with exclusive state access.
pub type Task<S> = Box<dyn FnOnce(&mut S) + Send>;

/// Identifies one scheduled timer for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

enum Item<S> {
    Task(Task<S>),
    Schedule(TimerId, Instant, Task<S>),
    Cancel(TimerId),
    LockMode(bool, Option<oneshot::Sender<()>>),
    Shutdown,
}

/// Handle posts work to a runloop. Handles are cheap to clone and Send;
/// posting to a loop which has already shut down silently drops the task,
/// so closures must be side-effect-safe to drop.
pub struct Handle<S> {
    general: mpsc::UnboundedSender<Item<S>>,
    proxy: mpsc::UnboundedSender<Item<S>>,
    next_timer: Arc<AtomicU64>,
    // Set by the loop thread itself, before it runs its first task.
    thread_id: Arc<std::sync::OnceLock<thread::ThreadId>>,
}

impl<S> Clone for Handle<S> {
    fn clone(&self) -> Self {
        Self {
            general: self.general.clone(),
            proxy: self.proxy.clone(),
            next_timer: self.next_timer.clone(),
            thread_id: self.thread_id.clone(),
        }
    }
}

impl<S: 'static> Handle<S> {
    /// Post a task onto the general queue.
    pub fn post(&self, task: impl FnOnce(&mut S) + Send + 'static) {
        let _ = self.general.send(Item::Task(Box::new(task)));
    }

    /// Post a task onto the proxy queue. Proxy tasks posted by one thread
    /// run in posting order, and keep running while lock mode is held.
    pub fn post_proxy(&self, task: impl FnOnce(&mut S) + Send + 'static) {
        let _ = self.proxy.send(Item::Task(Box::new(task)));
    }

    /// Run `task` after `delay`. The task fires at most once.
    pub fn schedule_after(
        &self,
        delay: Duration,
        task: impl FnOnce(&mut S) + Send + 'static,
    ) -> TimerId {
        let id = TimerId(self.next_timer.fetch_add(1, Ordering::Relaxed));
        let _ = self.general.send(Item::Schedule(
            id,
            Instant::now() + delay,
            Box::new(task),
        ));
        id
    }

    /// Cancel a scheduled timer. A timer which already fired is gone; the
    /// cancel is then a no-op.
    pub fn cancel_timer(&self, id: TimerId) {
        let _ = self.general.send(Item::Cancel(id));
    }

    /// Enter lock mode: until released, the loop drains only the proxy
    /// queue (and due timers). Blocks until the loop has acknowledged, and
    /// must therefore be called from a plain thread, never from a runloop.
    pub fn acquire_lock_mode(&self) {
        let (tx, rx) = oneshot::channel();
        let _ = self.proxy.send(Item::LockMode(true, Some(tx)));
        let _ = rx.blocking_recv();
    }

    pub fn release_lock_mode(&self) {
        let _ = self.proxy.send(Item::LockMode(false, None));
    }

    /// Stop the loop after the tasks already queued ahead of this call.
    /// The state is dropped on the loop's own thread.
    pub fn shutdown(&self) {
        let _ = self.general.send(Item::Shutdown);
    }

    /// Whether the calling thread is the loop's own thread.
    pub fn on_own_thread(&self) -> bool {
        self.thread_id.get() == Some(&thread::current().id())
    }
}

struct TimerEntry<S> {
    deadline: Instant,
    seq: u64,
    id: TimerId,
    task: Task<S>,
}

// BinaryHeap is a max-heap; order entries by reversed deadline so the
// soonest pops first. `seq` breaks ties in schedule order.
impl<S> Ord for TimerEntry<S> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}
impl<S> PartialOrd for TimerEntry<S> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<S> PartialEq for TimerEntry<S> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}
impl<S> Eq for TimerEntry<S> {}

/// Spawn a named runloop thread. `init` runs first, on the loop thread,
/// with a Handle it may clone into its state.
pub fn spawn<S: 'static>(
    name: &str,
    init: impl FnOnce(&Handle<S>) -> S + Send + 'static,
) -> Handle<S> {
    let (general_tx, general_rx) = mpsc::unbounded_channel();
    let (proxy_tx, proxy_rx) = mpsc::unbounded_channel();

    let handle = Handle {
        general: general_tx,
        proxy: proxy_tx,
        next_timer: Arc::new(AtomicU64::new(1)),
        thread_id: Arc::new(std::sync::OnceLock::new()),
    };

    {
        let handle = handle.clone();

        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = handle.thread_id.set(thread::current().id());

                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("building current-thread runtime");

                let state = init(&handle);
                runtime.block_on(serve(state, general_rx, proxy_rx));
            })
            .expect("spawning runloop thread");
    }

    handle
}

async fn serve<S>(
    mut state: S,
    mut general_rx: mpsc::UnboundedReceiver<Item<S>>,
    mut proxy_rx: mpsc::UnboundedReceiver<Item<S>>,
) {
    let mut timers: BinaryHeap<TimerEntry<S>> = BinaryHeap::new();
    let mut next_seq = 0u64;
    let mut lock_mode = false;
    let mut general_open = true;
    let mut proxy_open = true;

    loop {
        // Fire every due timer before waiting again.
        let now = Instant::now();
        while timers.peek().is_some_and(|entry| entry.deadline <= now) {
            let entry = timers.pop().unwrap();
            (entry.task)(&mut state);
        }

        if !general_open && !proxy_open && timers.is_empty() {
            return; // Every handle is gone and nothing is pending.
        }

        let next_deadline = timers.peek().map(|entry| entry.deadline);

        let item = tokio::select! {
            biased;

            item = proxy_rx.recv(), if proxy_open => {
                match item {
                    Some(item) => item,
                    None => {
                        proxy_open = false;
                        continue;
                    }
                }
            }
            item = general_rx.recv(), if general_open && !lock_mode => {
                match item {
                    Some(item) => item,
                    None => {
                        general_open = false;
                        continue;
                    }
                }
            }
            _ = sleep_until(next_deadline), if next_deadline.is_some() => continue,
        };

        match item {
            Item::Task(task) => task(&mut state),
            Item::Schedule(id, deadline, task) => {
                timers.push(TimerEntry {
                    deadline,
                    seq: next_seq,
                    id,
                    task,
                });
                next_seq += 1;
            }
            Item::Cancel(id) => {
                timers.retain(|entry| entry.id != id);
            }
            Item::LockMode(held, ack) => {
                lock_mode = held;
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
            }
            Item::Shutdown => return,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => {
            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Mutex;

    fn drain<S: Send + 'static>(handle: &Handle<S>) {
        // Wait for everything queued ahead of us to run.
        let (tx, rx) = oneshot::channel();
        handle.post(move |_| {
            let _ = tx.send(());
        });
        rx.blocking_recv().unwrap();
    }

    #[test]
    fn test_tasks_run_in_order_with_exclusive_state() {
        let handle = spawn("test-loop", |_| Vec::<u32>::new());

        for ind in 0..100 {
            handle.post(move |state| state.push(ind));
        }

        let (tx, rx) = oneshot::channel();
        handle.post(move |state| {
            let _ = tx.send(state.clone());
        });
        let seen = rx.blocking_recv().unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());

        handle.shutdown();
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let handle = spawn("test-timers", |_| Vec::<&'static str>::new());

        handle.schedule_after(Duration::from_millis(40), |state| state.push("late"));
        handle.schedule_after(Duration::from_millis(10), |state| state.push("early"));
        let cancelled =
            handle.schedule_after(Duration::from_millis(20), |state| state.push("never"));
        handle.cancel_timer(cancelled);

        std::thread::sleep(Duration::from_millis(80));

        let (tx, rx) = oneshot::channel();
        handle.post(move |state| {
            let _ = tx.send(state.clone());
        });
        assert_eq!(rx.blocking_recv().unwrap(), vec!["early", "late"]);

        handle.shutdown();
    }

    #[test]
    fn test_lock_mode_defers_general_traffic() {
        let handle = spawn("test-lock", |_| Vec::<&'static str>::new());
        let log = Arc::new(Mutex::new(Vec::new()));

        handle.acquire_lock_mode();

        let general_log = log.clone();
        handle.post(move |state| {
            state.push("general");
            general_log.lock().unwrap().push("general");
        });

        // Proxy traffic still runs while locked; general traffic waits.
        let (tx, rx) = oneshot::channel();
        let proxy_log = log.clone();
        handle.post_proxy(move |state| {
            state.push("proxy");
            proxy_log.lock().unwrap().push("proxy");
            let _ = tx.send(());
        });
        rx.blocking_recv().unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["proxy"]);

        handle.release_lock_mode();
        drain(&handle);
        assert_eq!(log.lock().unwrap().clone(), vec!["proxy", "general"]);

        handle.shutdown();
    }

    #[test]
    fn test_post_after_shutdown_is_dropped() {
        let handle = spawn("test-shutdown", |_| ());
        handle.shutdown();
        std::thread::sleep(Duration::from_millis(20));

        // Nothing to assert beyond "does not panic or block".
        handle.post(|_| panic!("must not run"));
        handle.schedule_after(Duration::from_millis(1), |_| panic!("must not run"));
        std::thread::sleep(Duration::from_millis(20));
    }
}
