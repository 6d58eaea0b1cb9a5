//! # Connection
//! This module provides uniform interfaces over transports capable of one-sided writes.
//!
//! [`Transport`] describes how a channel is established, [`RmaConnector`] is the data path of an
//! established channel.
pub mod local;
#[cfg(feature = "rdma")]
pub mod rdma;
pub mod side_channel;
pub mod tracker;
#[cfg(feature = "ucx")]
pub mod ucx;
use std::io::Result;

/// Result of issuing an asynchronous operation
#[derive(Debug, PartialEq, Eq)]
pub enum Issued<R> {
    /// Completed immediately, there is nothing to wait for
    Done,
    /// In flight. The token has to be driven to completion and released exactly once
    Pending(R),
}

/// State of an issued operation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Status {
    InProgress,
    Ok,
    Failed(String),
}

impl Status {
    pub fn is_in_progress(&self) -> bool {
        *self == Status::InProgress
    }
}

/// Data path of an established one-sided write channel.
///
/// Nothing happens in the background: operations only advance when `progress` is called.
pub trait RmaConnector {
    /// Local memory that puts are issued from
    type Buffer: AsRef<[u8]> + AsMut<[u8]>;
    /// Token of an in-flight operation
    type Request;

    /// Allocate a local buffer of exactly `size` bytes
    fn allocate(&mut self, size: usize) -> Result<Self::Buffer>;

    /// Write the whole buffer into the remote region at `offset` from its base.
    /// An error means the transport refused to issue the operation at all.
    fn put(&mut self, buf: &Self::Buffer, offset: usize) -> Result<Issued<Self::Request>>;

    /// Issue a flush: once complete, every previously issued put is complete and visible
    fn flush(&mut self) -> Result<Issued<Self::Request>>;

    /// Advance the transport by one step. Returns the number of operations completed by this step.
    fn progress(&mut self) -> usize;

    /// Current state of an in-flight operation
    fn status(&self, req: &Self::Request) -> Status;

    /// Release the resources of a request
    fn release(&mut self, req: Self::Request);

    /// Size of the remote region puts may target
    fn remote_len(&self) -> usize;
}

/// Steps of establishing a channel with a transport. Every resource is an owned value, its `Drop`
/// is the matching teardown.
///
/// See [`crate::setup::establish`] for the order the steps are performed in.
pub trait Transport: Sized {
    /// Transport context together with a single threaded worker
    type Worker;
    type Endpoint;
    /// Registered destination memory
    type Memory;
    /// Unpacked key authorizing writes into the remote memory
    type RemoteKey;
    type Connector: RmaConnector;

    fn create_worker(&mut self) -> Result<Self::Worker>;

    /// Addressing token of the worker, to be handed to the peer
    fn worker_address(&mut self, worker: &mut Self::Worker) -> Result<Vec<u8>>;

    /// Out-of-band exchange of opaque tokens with the peer
    fn exchange(&mut self, local: &[u8]) -> Result<Vec<u8>>;

    fn create_endpoint(&mut self, worker: &mut Self::Worker, remote: &[u8]) -> Result<Self::Endpoint>;

    fn map_memory(&mut self, worker: &mut Self::Worker, len: usize) -> Result<Self::Memory>;

    fn pack_rkey(&mut self, memory: &Self::Memory) -> Result<Vec<u8>>;

    fn unpack_rkey(&mut self, endpoint: &Self::Endpoint, packed: &[u8]) -> Result<Self::RemoteKey>;

    /// Build the connector out of the established resources
    fn connect(self, channel: crate::setup::Channel<Self>) -> Self::Connector;
}
