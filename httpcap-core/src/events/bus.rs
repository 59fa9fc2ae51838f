//! Bounded transaction dispatcher.
//!
//! Transaction pairs publish into one bounded queue. A full queue blocks the
//! publisher, throttling the whole capture pipeline behind slow handlers.
//! The queue is drained either by a fixed pool of worker threads calling a
//! user handler, or by the application through an [`EventReceiver`].
//!
//! Many publishers share the queue, so closing it cannot rely on dropping
//! senders. Closing is a separate one-shot signal owned by
//! [`DispatcherShutdown`]; workers only observe it.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, select, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::bridge::AbortHandle;
use crate::error::DispatchError;
use crate::events::http::TransactionEvent;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

pub type TransactionHandler = Arc<dyn Fn(&TransactionEvent) + Send + Sync>;

pub enum DeliveryMode {
    /// `workers` threads call `handler`. Zero workers disables delivery.
    Callback {
        workers: usize,
        handler: TransactionHandler,
    },
    /// The application drains the queue itself.
    Queue,
    /// Events are accepted and discarded.
    Disabled,
}

/// What happened to a published event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Published {
    Queued,
    Discarded,
    /// The publisher's abort signal fired first; the event was dropped.
    Abandoned,
}

/// One-shot close of the dispatcher queue. Clones share the same signal.
#[derive(Clone)]
pub struct DispatcherShutdown {
    trigger: Arc<Mutex<Option<Sender<()>>>>,
}

impl DispatcherShutdown {
    /// Closes the queue. Only the first call has an effect; it returns `true`.
    pub fn close(&self) -> bool {
        let closed = self.trigger.lock().take().is_some();
        if closed {
            info!("Event dispatcher closed");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.trigger.lock().is_none()
    }
}

/// Producer handle, cloned into every transaction pair.
#[derive(Clone)]
pub struct EventPublisher {
    tx: Option<Sender<TransactionEvent>>,
    closed: Receiver<()>,
}

impl EventPublisher {
    /// Queues `event`, blocking while the queue is full. Fails only once the
    /// dispatcher is closed.
    pub fn publish(&self, event: TransactionEvent) -> Result<Published, DispatchError> {
        if is_signalled(&self.closed) {
            return Err(DispatchError::Closed);
        }
        let Some(tx) = &self.tx else {
            return Ok(Published::Discarded);
        };
        select! {
            send(tx, event) -> res => res.map(|_| Published::Queued).map_err(|_| DispatchError::Closed),
            recv(self.closed) -> _ => Err(DispatchError::Closed),
        }
    }

    /// Like [`EventPublisher::publish`], but gives up once `abort` fires,
    /// including while blocked on a full queue.
    pub fn publish_unless(
        &self,
        event: TransactionEvent,
        abort: &AbortHandle,
    ) -> Result<Published, DispatchError> {
        if is_signalled(&self.closed) {
            return Err(DispatchError::Closed);
        }
        if abort.is_aborted() {
            return Ok(Published::Abandoned);
        }
        let Some(tx) = &self.tx else {
            return Ok(Published::Discarded);
        };
        select! {
            send(tx, event) -> res => res.map(|_| Published::Queued).map_err(|_| DispatchError::Closed),
            recv(self.closed) -> _ => Err(DispatchError::Closed),
            recv(abort.signal()) -> _ => Ok(Published::Abandoned),
        }
    }

    pub fn is_closed(&self) -> bool {
        is_signalled(&self.closed)
    }
}

/// Application-side queue handle for [`DeliveryMode::Queue`].
///
/// After the dispatcher closes, events still queued are handed out before
/// `recv` reports the end.
#[derive(Clone)]
pub struct EventReceiver {
    rx: Receiver<TransactionEvent>,
    closed: Receiver<()>,
}

impl EventReceiver {
    /// Blocks for the next event; `None` once closed and drained.
    pub fn recv(&self) -> Option<TransactionEvent> {
        select! {
            recv(self.rx) -> event => event.ok(),
            recv(self.closed) -> _ => self.rx.try_recv().ok(),
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Result<TransactionEvent, DispatchError> {
        if is_signalled(&self.closed) {
            return self.rx.try_recv().map_err(|_| DispatchError::Closed);
        }
        select! {
            recv(self.rx) -> event => event.map_err(|_| DispatchError::Closed),
            recv(self.closed) -> _ => self.rx.try_recv().map_err(|_| DispatchError::Closed),
            default(timeout) => Err(DispatchError::Timeout),
        }
    }

    pub fn try_recv(&self) -> Option<TransactionEvent> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Iterator for EventReceiver {
    type Item = TransactionEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

pub struct EventDispatcher {
    publisher: EventPublisher,
    shutdown: DispatcherShutdown,
    receiver: Option<EventReceiver>,
    workers: Vec<JoinHandle<()>>,
}

impl EventDispatcher {
    /// Builds the queue and, for callback delivery, spawns the workers.
    pub fn new(capacity: usize, mode: DeliveryMode) -> Result<Self, std::io::Error> {
        let (mut dispatcher, receiver) = Self::build(capacity);

        match mode {
            DeliveryMode::Callback { workers, handler } if workers > 0 => {
                for id in 0..workers {
                    let receiver = receiver.clone();
                    let handler = handler.clone();
                    let handle = thread::Builder::new()
                        .name(format!("dispatch-{id}"))
                        .spawn(move || run_worker(id, receiver, handler))?;
                    dispatcher.workers.push(handle);
                }
                info!(workers, capacity, "Event dispatcher started");
            }
            DeliveryMode::Queue => {
                dispatcher.receiver = Some(receiver);
                info!(capacity, "Event dispatcher started in queue mode");
            }
            DeliveryMode::Callback { .. } | DeliveryMode::Disabled => {
                dispatcher.publisher.tx = None;
                info!("Event delivery disabled");
            }
        }
        Ok(dispatcher)
    }

    /// Queue delivery, handing the receiver straight back.
    pub fn with_queue(capacity: usize) -> (Self, EventReceiver) {
        let (dispatcher, receiver) = Self::build(capacity);
        info!(capacity, "Event dispatcher started in queue mode");
        (dispatcher, receiver)
    }

    fn build(capacity: usize) -> (Self, EventReceiver) {
        let (trigger, closed) = channel::bounded::<()>(0);
        let (tx, rx) = channel::bounded(capacity.max(1));
        let dispatcher = Self {
            publisher: EventPublisher {
                tx: Some(tx),
                closed: closed.clone(),
            },
            shutdown: DispatcherShutdown {
                trigger: Arc::new(Mutex::new(Some(trigger))),
            },
            receiver: None,
            workers: Vec::new(),
        };
        (dispatcher, EventReceiver { rx, closed })
    }

    pub fn publisher(&self) -> EventPublisher {
        self.publisher.clone()
    }

    pub fn shutdown_handle(&self) -> DispatcherShutdown {
        self.shutdown.clone()
    }

    /// The queue handle, available once in [`DeliveryMode::Queue`].
    pub fn take_receiver(&mut self) -> Option<EventReceiver> {
        self.receiver.take()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Closes the queue (if no one has yet) and waits for workers to drain
    /// what is left.
    pub fn shutdown(mut self) {
        self.shutdown.close();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Dispatcher worker panicked");
            }
        }
    }
}

fn run_worker(id: usize, receiver: EventReceiver, handler: TransactionHandler) {
    debug!(worker = id, "Dispatcher worker started");
    let mut delivered = 0u64;
    while let Some(event) = receiver.recv() {
        delivered += 1;
        if panic::catch_unwind(AssertUnwindSafe(|| handler(&event))).is_err() {
            error!(worker = id, seq = event.seq(), "Transaction handler panicked");
        }
    }
    debug!(worker = id, delivered, "Dispatcher worker stopped");
}

fn is_signalled(closed: &Receiver<()>) -> bool {
    matches!(closed.try_recv(), Err(TryRecvError::Disconnected))
}
