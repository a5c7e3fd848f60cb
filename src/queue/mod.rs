//! Remote queue service
//!
//! This module implements the network-reachable job/result queue pair that
//! mediates all coordination between the coordinator and its workers.
//!
//! # Architecture
//!
//! - **Service**: owns the two FIFO queues and serves them over TCP,
//!   gated by a shared secret
//! - **Client**: attaches to a running service and hands out queue proxies
//! - **Protocol**: message definitions and MessagePack framing
//!
//! The queues are the only shared mutable state in the system; neither the
//! coordinator nor any worker holds an explicit lock.

pub mod client;
pub mod protocol;
pub mod server;

// Re-export key types
pub use client::{QueueClient, QueueProxy};
pub use protocol::{
    Job, JobOutcome, JobResult, Payload, QueueName, Request, Response, PROTOCOL_VERSION,
};
pub use server::QueueService;
