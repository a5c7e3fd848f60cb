//! Remote queue wire protocol
//!
//! This module defines the protocol spoken between the queue service and its
//! clients (coordinator and workers), serialized with MessagePack
//! (rmp-serde) for compact binary framing with full serde feature support.
//!
//! # Message Flow
//!
//! ```text
//! Client                          Queue service
//!   |                                  |
//!   |-------- Hello(secret) --------->|
//!   |<------- HelloAck / Denied ------|
//!   |                                  |
//!   |-------- Push(queue, item) ----->|
//!   |<------- PushAck ----------------|
//!   |                                  |
//!   |-------- Pop(queue, timeout) --->|
//!   |<------- Item / Empty -----------|
//! ```
//!
//! # Message Framing
//!
//! Each message is prefixed with a 4-byte length field (little-endian u32):
//!
//! ```text
//! [4 bytes: message length][N bytes: MessagePack-serialized message]
//! ```

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::fastq::{Chunk, PositionMetric};

/// Protocol version
///
/// Increment this when making breaking changes to the protocol.
/// Service and clients must have matching protocol versions.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum accepted frame size
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// One unit of work: a named job function applied to one chunk
///
/// The function field is a registry name resolved on the worker at
/// execution time; a name the worker cannot resolve produces an
/// error-marker result instead of a crash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Job identifier (submission order)
    pub id: u64,

    /// Registry name of the function to execute
    pub function: String,

    /// The chunk the function is applied to
    pub chunk: Chunk,
}

/// Outcome of executing a job on a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// The computed per-position metric
    Metric(PositionMetric),

    /// Error marker: the job's function name was not in the registry
    Unresolved,
}

/// A job paired with its execution outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job: Job,
    pub outcome: JobOutcome,
}

/// Value carried by the queues
///
/// The poison pill is a dedicated variant distinct from any job: it signals
/// that no more jobs will ever be enqueued. Workers that dequeue it
/// re-enqueue it before retiring, so every worker eventually observes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    Job(Job),
    Result(JobResult),
    PoisonPill,
}

/// Queue selector carried in requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueName {
    /// Coordinator -> workers
    Job,
    /// Workers -> coordinator
    Result,
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueName::Job => write!(f, "job"),
            QueueName::Result => write!(f, "result"),
        }
    }
}

/// Client -> service messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Connection handshake; must be the first message on a connection
    Hello {
        protocol_version: u32,
        credential: String,
    },

    /// Append an item to the tail of a queue
    Push { queue: QueueName, item: Payload },

    /// Dequeue the head of a queue; returns immediately
    TryPop { queue: QueueName },

    /// Dequeue the head of a queue, waiting up to `timeout_ms` for an item
    ///
    /// The bounded wait happens service-side on the queue's notifier, so
    /// idle clients do not busy-poll over the network.
    Pop { queue: QueueName, timeout_ms: u64 },
}

/// Service -> client messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    /// Handshake accepted
    HelloAck,

    /// Handshake rejected; the connection is closed afterwards
    Denied { reason: String },

    /// Push accepted
    PushAck,

    /// A dequeued item
    Item(Payload),

    /// The queue was empty (for the whole bounded wait, if any)
    Empty,
}

/// Serialize a message to bytes with a 4-byte length prefix
pub fn encode_frame<T: Serialize>(msg: &T) -> Result<Vec<u8>> {
    let body = rmp_serde::to_vec(msg).context("Failed to serialize message")?;

    let len = body.len() as u32;
    let mut framed = Vec::with_capacity(4 + body.len());
    framed.extend_from_slice(&len.to_le_bytes());
    framed.extend_from_slice(&body);

    Ok(framed)
}

/// Deserialize a length-prefixed message from a byte buffer
///
/// Returns the message and the number of bytes consumed, including the
/// length prefix.
pub fn decode_frame<T: DeserializeOwned>(buf: &[u8]) -> Result<(T, usize)> {
    if buf.len() < 4 {
        anyhow::bail!(
            "Buffer too small for message length (need 4 bytes, got {})",
            buf.len()
        );
    }

    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        anyhow::bail!("Incomplete message (need {} bytes, got {})", 4 + len, buf.len());
    }

    let msg = rmp_serde::from_slice(&buf[4..4 + len]).context("Failed to deserialize message")?;
    Ok((msg, 4 + len))
}

/// Read a complete message from a TCP stream
pub async fn read_frame<T: DeserializeOwned>(stream: &mut TcpStream) -> Result<T> {
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .context("Failed to read message length")?;

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_BYTES {
        anyhow::bail!("Message too large: {} bytes (max {})", len, MAX_FRAME_BYTES);
    }

    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .context("Failed to read message body")?;

    rmp_serde::from_slice(&body).context("Failed to deserialize message")
}

/// Write a message to a TCP stream with length prefix and flush
pub async fn write_frame<T: Serialize>(stream: &mut TcpStream, msg: &T) -> Result<()> {
    let framed = encode_frame(msg)?;

    stream
        .write_all(&framed)
        .await
        .context("Failed to write message")?;
    stream.flush().await.context("Failed to flush stream")?;

    Ok(())
}
