//! Remote queue client
//!
//! Client-side access to a running queue service: `connect` validates the
//! address and credential up front, then hands out per-queue proxies whose
//! operations are forwarded to the service over a dedicated connection.

use anyhow::{Context, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::queue::protocol::*;

/// Open and authenticate one connection to the queue service
async fn open(addr: &str, credential: &str) -> Result<TcpStream> {
    let mut stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("Failed to connect to queue service at {}", addr))?;

    let hello = Request::Hello {
        protocol_version: PROTOCOL_VERSION,
        credential: credential.to_string(),
    };
    write_frame(&mut stream, &hello).await?;

    match read_frame(&mut stream).await.context("Handshake failed")? {
        Response::HelloAck => Ok(stream),
        Response::Denied { reason } => {
            anyhow::bail!("Queue service at {} refused connection: {}", addr, reason)
        }
        other => anyhow::bail!("Unexpected handshake response: {:?}", other),
    }
}

/// Connection factory for queue proxies
#[derive(Debug)]
pub struct QueueClient {
    addr: String,
    credential: String,
}

impl QueueClient {
    /// Attach to a running queue service
    ///
    /// Performs a probe handshake so an unreachable address or a credential
    /// mismatch fails here, at startup, rather than on first use.
    pub async fn connect(addr: &str, credential: &str) -> Result<Self> {
        let probe = open(addr, credential).await?;
        drop(probe);

        Ok(Self {
            addr: addr.to_string(),
            credential: credential.to_string(),
        })
    }

    /// Proxy for the job queue
    pub async fn job_queue(&self) -> Result<QueueProxy> {
        self.queue(QueueName::Job).await
    }

    /// Proxy for the result queue
    pub async fn result_queue(&self) -> Result<QueueProxy> {
        self.queue(QueueName::Result).await
    }

    async fn queue(&self, name: QueueName) -> Result<QueueProxy> {
        let stream = open(&self.addr, &self.credential).await?;
        Ok(QueueProxy {
            stream: Mutex::new(stream),
            name,
        })
    }
}

/// Handle to one remote queue
///
/// Operations are forwarded to the service regardless of which process
/// holds the proxy. Each proxy owns one authenticated connection; requests
/// on it are strictly request/response.
pub struct QueueProxy {
    stream: Mutex<TcpStream>,
    name: QueueName,
}

impl QueueProxy {
    /// Append to the tail of the queue; never blocks on queue capacity
    pub async fn enqueue(&self, item: Payload) -> Result<()> {
        match self.call(Request::Push { queue: self.name, item }).await? {
            Response::PushAck => Ok(()),
            other => anyhow::bail!("Unexpected response to push: {:?}", other),
        }
    }

    /// Dequeue the head of the queue; returns immediately
    pub async fn try_dequeue(&self) -> Result<Option<Payload>> {
        match self.call(Request::TryPop { queue: self.name }).await? {
            Response::Item(item) => Ok(Some(item)),
            Response::Empty => Ok(None),
            other => anyhow::bail!("Unexpected response to pop: {:?}", other),
        }
    }

    /// Dequeue the head of the queue, waiting up to `timeout` for an item
    ///
    /// The wait happens on the service, so an idle consumer holds one
    /// pending request instead of polling.
    pub async fn dequeue_timeout(&self, timeout: Duration) -> Result<Option<Payload>> {
        let request = Request::Pop {
            queue: self.name,
            timeout_ms: timeout.as_millis() as u64,
        };
        match self.call(request).await? {
            Response::Item(item) => Ok(Some(item)),
            Response::Empty => Ok(None),
            other => anyhow::bail!("Unexpected response to pop: {:?}", other),
        }
    }

    async fn call(&self, request: Request) -> Result<Response> {
        let mut stream = self.stream.lock().await;
        write_frame(&mut stream, &request)
            .await
            .with_context(|| format!("Queue call failed on {} queue", self.name))?;
        read_frame(&mut stream)
            .await
            .with_context(|| format!("Queue call failed on {} queue", self.name))
    }
}
