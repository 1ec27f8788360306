//! `DeltaQueue<T>` — a paused-by-default, single-consumer async FIFO with
//! a backpressure-capable pause/resume interface.
//!
//! Generalizes a per-shard ingress pattern — an `mpsc` channel feeding a
//! single worker loop gated by a semaphore — into a reusable queue type
//! shared by the manager's three op/signal streams.

use crate::core::Result;
use crate::events::EventBus;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex, Notify};
use tokio::task::JoinHandle;

/// Events a [`DeltaQueue`] publishes about its own draining state.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// Draining has resumed after being fully paused; fires before the
    /// first item is dequeued.
    Resume,
    /// The worker returned an error while processing an item. The queue
    /// halts (stops draining) but retains any remaining queued items.
    Error(String),
}

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type Worker<T> = Arc<dyn Fn(T) -> BoxFuture<Result<()>> + Send + Sync>;

struct State<T> {
    queue: VecDeque<T>,
    paused: bool,
    system_paused: bool,
    halted: bool,
    closed: bool,
}

impl<T> State<T> {
    fn draining(&self) -> bool {
        !self.paused && !self.system_paused && !self.halted && !self.closed
    }
}

/// A paused-by-default async FIFO queue, parameterized by an async worker
/// `W(item) -> Result<()>`. Exactly one invocation of the worker is in
/// flight at a time.
pub struct DeltaQueue<T: Send + 'static> {
    state: Arc<Mutex<State<T>>>,
    notify: Arc<Notify>,
    events: Arc<EventBus<QueueEvent>>,
    worker_task: JoinHandle<()>,
}

impl<T: Send + 'static> DeltaQueue<T> {
    /// Create a new queue, paused by default, draining `worker` as items
    /// arrive once resumed.
    pub fn new<F, Fut>(worker: F) -> Self
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let worker: Worker<T> = Arc::new(move |item| Box::pin(worker(item)));
        let state = Arc::new(Mutex::new(State {
            queue: VecDeque::new(),
            paused: true,
            system_paused: false,
            halted: false,
            closed: false,
        }));
        let notify = Arc::new(Notify::new());
        let events: Arc<EventBus<QueueEvent>> = Arc::new(EventBus::default());

        let worker_task = tokio::spawn(Self::run(state.clone(), notify.clone(), events.clone(), worker));

        Self {
            state,
            notify,
            events,
            worker_task,
        }
    }

    async fn run(
        state: Arc<Mutex<State<T>>>,
        notify: Arc<Notify>,
        events: Arc<EventBus<QueueEvent>>,
        worker: Worker<T>,
    ) {
        loop {
            let item = {
                let mut guard = state.lock().await;
                loop {
                    if guard.closed {
                        return;
                    }
                    if guard.draining() {
                        if let Some(item) = guard.queue.pop_front() {
                            break item;
                        }
                    }
                    drop(guard);
                    notify.notified().await;
                    guard = state.lock().await;
                }
            };

            if let Err(e) = worker(item).await {
                let mut guard = state.lock().await;
                guard.halted = true;
                drop(guard);
                tracing::error!("delta queue worker error: {e}");
                events.publish(QueueEvent::Error(e.to_string()));
            }
        }
    }

    /// Push an item onto the queue. A no-op once [`DeltaQueue::clear`] has
    /// been called after close.
    pub async fn push(&self, item: T) {
        let mut guard = self.state.lock().await;
        if guard.closed {
            return;
        }
        guard.queue.push_back(item);
        drop(guard);
        self.notify.notify_one();
    }

    /// Discard queued items. Does not interrupt an in-flight worker
    /// invocation.
    pub async fn clear(&self) {
        let mut guard = self.state.lock().await;
        guard.queue.clear();
    }

    /// Clear the user-level pause flag synchronously. Only safe to call
    /// right after construction, before the queue has been shared with
    /// any other task — an owner that wants its queue gated purely by
    /// `system_pause`/`system_resume` from then on uses this instead of
    /// an async `resume()` call.
    pub(crate) fn resume_sync(&self) {
        let mut guard = self.state.try_lock().expect("queue must be uncontended immediately after construction");
        guard.paused = false;
    }

    /// User-facing pause. Survives connection churn (use
    /// [`DeltaQueue::system_pause`] for reconnect-driven pausing instead).
    pub async fn pause(&self) {
        self.set_paused(true).await;
    }

    /// Internal pause, used by the connection state machine around
    /// reconnect/NACK.
    pub async fn system_pause(&self) {
        self.set_system_paused(true).await;
    }

    /// Clear the user-facing pause flag.
    pub async fn resume(&self) {
        self.set_paused(false).await;
    }

    /// Clear the internal pause flag.
    pub async fn system_resume(&self) {
        self.set_system_paused(false).await;
    }

    async fn set_paused(&self, paused: bool) {
        let mut guard = self.state.lock().await;
        let was_draining = guard.draining();
        guard.paused = paused;
        let now_draining = guard.draining();
        drop(guard);
        if !was_draining && now_draining {
            self.events.publish(QueueEvent::Resume);
        }
        self.notify.notify_one();
    }

    async fn set_system_paused(&self, paused: bool) {
        let mut guard = self.state.lock().await;
        let was_draining = guard.draining();
        guard.system_paused = paused;
        let now_draining = guard.draining();
        drop(guard);
        if !was_draining && now_draining {
            self.events.publish(QueueEvent::Resume);
        }
        self.notify.notify_one();
    }

    /// Subscribe to `resume`/`error` events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.events.subscribe()
    }

    /// Whether the queue is currently draining (neither paused flag set,
    /// not halted by a prior worker error, not closed).
    pub async fn is_draining(&self) -> bool {
        self.state.lock().await.draining()
    }

    /// Number of items currently queued (not including an in-flight item).
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Terminal: clear all items, mark closed, and stop the worker task.
    /// `close()` is always safe to call.
    pub async fn close(&self) {
        let mut guard = self.state.lock().await;
        guard.queue.clear();
        guard.closed = true;
        drop(guard);
        self.notify.notify_one();
        self.worker_task.abort();
    }
}
