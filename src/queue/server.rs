//! Remote queue service
//!
//! The service owns the two FIFO queues (job and result) and serves them
//! over TCP to any number of concurrent remote processes. Every connection
//! must open with a `Hello` handshake carrying the shared secret; after
//! that, each request is answered with exactly one response.
//!
//! The service is an explicitly constructed instance with a handle-based
//! lifecycle: `start` binds and serves, `shutdown` stops the listener and
//! aborts connection handlers, after which in-flight client calls fail.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::{JoinHandle, JoinSet};

use crate::queue::protocol::*;

/// One FIFO queue with a notifier for bounded-wait pops
///
/// Pushes never block and never fail; pops are either immediate or wait on
/// the notifier up to a caller-supplied timeout. FIFO order holds per
/// queue; interleaving across concurrent consumers is not ordered.
pub struct SharedQueue {
    items: Mutex<VecDeque<Payload>>,
    notify: Notify,
}

impl SharedQueue {
    fn new() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    /// Append to the tail and wake one waiting consumer
    pub fn push(&self, item: Payload) {
        self.items.lock().unwrap().push_back(item);
        self.notify.notify_one();
    }

    /// Dequeue the head, or `None` if the queue is empty right now
    pub fn try_pop(&self) -> Option<Payload> {
        self.items.lock().unwrap().pop_front()
    }

    /// Dequeue the head, waiting up to `timeout` for an item to arrive
    pub async fn pop_timeout(&self, timeout: Duration) -> Option<Payload> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            // Arm the notifier before checking, so a push between the check
            // and the await is not lost.
            let notified = self.notify.notified();
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_pop();
            }
        }
    }
}

/// State shared by all connection handlers
struct ServiceState {
    job_queue: SharedQueue,
    result_queue: SharedQueue,
    credential: String,
}

impl ServiceState {
    fn queue(&self, name: QueueName) -> &SharedQueue {
        match name {
            QueueName::Job => &self.job_queue,
            QueueName::Result => &self.result_queue,
        }
    }
}

/// Handle to a running queue service
pub struct QueueService {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

impl QueueService {
    /// Bind `addr` and begin serving the queue pair
    ///
    /// Fails if the address is already in use. The credential is the shared
    /// secret every client must present in its handshake.
    pub async fn start(addr: &str, credential: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind queue service on {}", addr))?;
        let local_addr = listener.local_addr()?;

        let state = Arc::new(ServiceState {
            job_queue: SharedQueue::new(),
            result_queue: SharedQueue::new(),
            credential: credential.to_string(),
        });

        let accept_task = tokio::spawn(async move {
            let mut handlers = JoinSet::new();
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        handlers.spawn(async move {
                            if let Err(e) = handle_connection(stream, state).await {
                                eprintln!("Queue connection from {} failed: {:#}", peer, e);
                            }
                        });
                    }
                    Err(e) => {
                        eprintln!("Failed to accept queue connection: {}", e);
                    }
                }
                // Reap finished handlers so the set does not grow unbounded
                while handlers.try_join_next().is_some() {}
            }
        });

        println!("Queue service started on {}", local_addr);

        Ok(Self {
            local_addr,
            accept_task,
        })
    }

    /// Address the service is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop serving
    ///
    /// The listener and all connection handlers are torn down; in-flight
    /// calls from connected clients fail thereafter. Queue contents
    /// (including a recycled poison pill) are discarded with the service.
    pub async fn shutdown(self) {
        self.accept_task.abort();
        let _ = self.accept_task.await;
        println!("Queue service on {} stopped", self.local_addr);
    }
}

/// Serve one client connection: handshake, then request/response loop
///
/// Connection handlers run as children of the accept task, so aborting the
/// accept task on shutdown tears them down too.
async fn handle_connection(mut stream: TcpStream, state: Arc<ServiceState>) -> Result<()> {
    let hello: Request = read_frame(&mut stream).await.context("Failed to read handshake")?;

    match hello {
        Request::Hello {
            protocol_version,
            credential,
        } => {
            if protocol_version != PROTOCOL_VERSION {
                let reason = format!(
                    "Protocol version mismatch: client={}, service={}",
                    protocol_version, PROTOCOL_VERSION
                );
                write_frame(&mut stream, &Response::Denied { reason: reason.clone() }).await?;
                anyhow::bail!(reason);
            }
            if credential != state.credential {
                write_frame(
                    &mut stream,
                    &Response::Denied {
                        reason: "Invalid credential".to_string(),
                    },
                )
                .await?;
                anyhow::bail!("Rejected connection with invalid credential");
            }
            write_frame(&mut stream, &Response::HelloAck).await?;
        }
        other => anyhow::bail!("Expected Hello handshake, got {:?}", other),
    }

    loop {
        let request: Request = match read_frame(&mut stream).await {
            Ok(request) => request,
            // Client hung up; a clean close is not an error
            Err(_) => return Ok(()),
        };

        let response = match request {
            Request::Push { queue, item } => {
                state.queue(queue).push(item);
                Response::PushAck
            }
            Request::TryPop { queue } => match state.queue(queue).try_pop() {
                Some(item) => Response::Item(item),
                None => Response::Empty,
            },
            Request::Pop { queue, timeout_ms } => {
                let timeout = Duration::from_millis(timeout_ms);
                match state.queue(queue).pop_timeout(timeout).await {
                    Some(item) => Response::Item(item),
                    None => Response::Empty,
                }
            }
            Request::Hello { .. } => anyhow::bail!("Unexpected second handshake"),
        };

        write_frame(&mut stream, &response).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_start_reports_bound_address() {
        let service = QueueService::start("127.0.0.1:0", "secret").await.unwrap();
        assert_ne!(service.local_addr().port(), 0);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_fails_when_address_in_use() {
        let service = QueueService::start("127.0.0.1:0", "secret").await.unwrap();
        let addr = service.local_addr().to_string();

        assert!(QueueService::start(&addr, "secret").await.is_err());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_shared_queue_is_fifo() {
        let queue = SharedQueue::new();
        queue.push(Payload::PoisonPill);
        queue.push(Payload::Result(JobResult {
            job: Job {
                id: 0,
                function: "read_file".to_string(),
                chunk: crate::fastq::Chunk {
                    index: 0,
                    path: "x.fastq".into(),
                    start: 0,
                    end: 1,
                },
            },
            outcome: JobOutcome::Unresolved,
        }));

        assert_eq!(queue.try_pop(), Some(Payload::PoisonPill));
        assert!(matches!(queue.try_pop(), Some(Payload::Result(_))));
        assert_eq!(queue.try_pop(), None);
    }

    #[tokio::test]
    async fn test_pop_timeout_returns_none_on_empty_queue() {
        let queue = SharedQueue::new();

        let start = Instant::now();
        let item = queue.pop_timeout(Duration::from_millis(50)).await;
        assert!(item.is_none());
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_pop_timeout_wakes_on_push() {
        let queue = Arc::new(SharedQueue::new());

        let pusher = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            pusher.push(Payload::PoisonPill);
        });

        let item = queue.pop_timeout(Duration::from_secs(5)).await;
        assert_eq!(item, Some(Payload::PoisonPill));
    }
}
