//! Per-connection inbound queues.
//!
//! The transport may deliver from any task. Each connection gets one
//! unbounded channel and one worker task, so its events (the close event
//! included) reach the handler in delivery order while different
//! connections proceed in parallel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::domain::{ConnectionId, LesError};
use crate::ports::SubProtocolHandler;

/// Resolves to the handler's result once the event has been processed.
pub type Completion = oneshot::Receiver<Result<(), LesError>>;

enum Job {
    Connected,
    Message { message_type: u8, payload: Vec<u8> },
    Closed,
}

struct Envelope {
    job: Job,
    done: oneshot::Sender<Result<(), LesError>>,
}

/// Sending half of a connection's queue. `generation` tells a retiring
/// worker apart from one started later for the same id.
#[derive(Clone)]
struct Queue {
    generation: u64,
    tx: mpsc::UnboundedSender<Envelope>,
}

type Queues = DashMap<ConnectionId, Queue>;

pub struct InboundDispatcher<H: SubProtocolHandler + 'static> {
    handler: Arc<H>,
    queues: Arc<Queues>,
    generations: AtomicU64,
}

impl<H: SubProtocolHandler + 'static> InboundDispatcher<H> {
    pub fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            queues: Arc::new(DashMap::new()),
            generations: AtomicU64::new(0),
        }
    }

    pub fn handler(&self) -> &Arc<H> {
        &self.handler
    }

    /// Connections with a live queue.
    pub fn active_queues(&self) -> usize {
        self.queues.len()
    }

    /// Queue the "new peer connection" event.
    pub fn connected(&self, connection_id: &ConnectionId) -> Completion {
        self.submit(connection_id, Job::Connected)
    }

    /// Queue one inbound message.
    pub fn deliver(
        &self,
        connection_id: &ConnectionId,
        message_type: u8,
        payload: Vec<u8>,
    ) -> Completion {
        self.submit(
            connection_id,
            Job::Message {
                message_type,
                payload,
            },
        )
    }

    /// Queue the "connection closed" event behind everything already
    /// delivered for the connection. The queue is retired once the handler
    /// has processed it.
    pub fn closed(&self, connection_id: &ConnectionId) -> Completion {
        self.submit(connection_id, Job::Closed)
    }

    /// Stop the handler and retire every queue.
    ///
    /// Events still queued run afterwards against an empty table.
    pub async fn stop(&self) -> Result<(), LesError> {
        self.queues.clear();
        self.handler.stop().await
    }

    fn submit(&self, connection_id: &ConnectionId, job: Job) -> Completion {
        let (done, completion) = oneshot::channel();
        let queue = self
            .queues
            .entry(connection_id.clone())
            .or_insert_with(|| self.spawn_worker(connection_id.clone()))
            .clone();

        // A worker only exits once every sender is gone; if it died anyway,
        // dropping `done` closes the completion.
        let _ = queue.tx.send(Envelope { job, done });
        completion
    }

    fn spawn_worker(&self, connection_id: ConnectionId) -> Queue {
        let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let handler = Arc::clone(&self.handler);
        let queues = Arc::clone(&self.queues);

        tokio::spawn(async move {
            while let Some(Envelope { job, done }) = rx.recv().await {
                let result = match job {
                    Job::Connected => handler.handle_new_peer_connection(&connection_id).await,
                    Job::Message {
                        message_type,
                        payload,
                    } => handler.handle(&connection_id, message_type, &payload).await,
                    Job::Closed => {
                        let result = handler.handle_connection_closed(&connection_id).await;
                        // Later submits start a fresh queue; anything that
                        // raced onto this one still drains below.
                        queues.remove_if(&connection_id, |_, queue| {
                            queue.generation == generation
                        });
                        result
                    }
                };
                // The caller may not be waiting
                let _ = done.send(result);
            }
            tracing::debug!(connection_id = %connection_id, "[les] Inbound queue drained");
        });

        Queue { generation, tx }
    }
}
