//! # RDMA
//! This module is responsible for RDMA connections over a reliable connected queue pair.
//! Addresses and remote keys are exchanged over a TCP side channel with the peer.
use crate::connection::side_channel::{Peer, SideChannel};
use crate::connection::tracker::{WriteRequest, WriteTracker};
use crate::connection::{Issued, RmaConnector, Status, Transport};
use crate::setup::Channel;
use ibverbs;
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::{Error, ErrorKind, Result};
use std::sync::Arc;

const CQ_POLL_BATCH: usize = 16;

pub struct RdmaTransport {
    side: SideChannel,
}

impl RdmaTransport {
    pub fn new(side: SideChannel) -> RdmaTransport {
        RdmaTransport { side }
    }
}

// field order matters!!! Otherwise will panic on drop.
pub struct RdmaWorker {
    qp: Option<ibverbs::PreparedQueuePair>,
    cq: Arc<ibverbs::CompletionQueue>,
    pd: Arc<ibverbs::ProtectionDomain>,
    ctx: Arc<ibverbs::Context>,
}

pub struct RdmaEndpoint {
    qp: Arc<ibverbs::QueuePair>,
}

pub struct RdmaRegion {
    mr: ibverbs::MemoryRegion<u8>,
}

/// Packed remote key: where the peer's region is and how to access it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdmaKey {
    raddr: u64,
    rkey: u32,
    len: usize,
}

fn aquire_ctx() -> Result<Arc<ibverbs::Context>> {
    let dev_list = ibverbs::devices().map_err(|e| {
        Error::new(
            ErrorKind::Other,
            format!("ERROR: cannot get device list: {}", e),
        )
    })?;

    // Get the first device
    let dev = dev_list
        .get(0)
        .ok_or_else(|| Error::new(ErrorKind::NotFound, "ERROR: No RDMA devices in list"))?;

    // Here the device is opened. Port (1) and GID are queried automaticaly
    dev.open().map_err(|e| {
        Error::new(
            ErrorKind::Other,
            format!("ERROR: aquiring RDMA context failed: {}", e),
        )
    })
}

impl Transport for RdmaTransport {
    type Worker = RdmaWorker;
    type Endpoint = RdmaEndpoint;
    type Memory = RdmaRegion;
    type RemoteKey = RdmaKey;
    type Connector = RdmaRmaConnector;

    fn create_worker(&mut self) -> Result<RdmaWorker> {
        let ctx = aquire_ctx()?;
        let pd = ctx.alloc_pd().map(Arc::new).map_err(|_| {
            Error::new(
                ErrorKind::Other,
                "ERROR: allocating Protection Domain failed",
            )
        })?;
        let dev_attr = ctx.query_device().map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("ERROR: cannot get device attributes: {}", e),
            )
        })?;
        let cq = ctx.create_cq(dev_attr.max_cqe, 0).map(Arc::new).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("ERROR: creating Completion Queue failed: {}", e),
            )
        })?;

        let qp = {
            let mut qp_builder = pd.create_qp(&cq, &cq, ibverbs::ibv_qp_type::IBV_QPT_RC);
            qp_builder.allow_remote_rw();
            qp_builder.build().map_err(|e| {
                Error::new(
                    ErrorKind::Other,
                    format!("ERROR: failed to initialize Queue Pair: {}", e),
                )
            })?
        };

        Ok(RdmaWorker {
            qp: Some(qp),
            cq,
            pd,
            ctx,
        })
    }

    fn worker_address(&mut self, worker: &mut RdmaWorker) -> Result<Vec<u8>> {
        let qp = worker
            .qp
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::Other, "ERROR: Queue Pair already connected"))?;
        let msg = ibverbs::EndpointMsg::from(qp.endpoint());

        bincode::serialize(&msg).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    fn exchange(&mut self, local: &[u8]) -> Result<Vec<u8>> {
        self.side.exchange(local)
    }

    fn create_endpoint(&mut self, worker: &mut RdmaWorker, remote: &[u8]) -> Result<RdmaEndpoint> {
        let rmsg: ibverbs::EndpointMsg =
            bincode::deserialize(remote).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
        let qp_init = worker
            .qp
            .take()
            .ok_or_else(|| Error::new(ErrorKind::Other, "ERROR: Queue Pair already connected"))?;

        match qp_init.handshake(rmsg.into()) {
            Ok(qp) => Ok(RdmaEndpoint { qp: Arc::new(qp) }),
            Err(e) => Err(Error::new(
                ErrorKind::Other,
                format!("ERROR: failed to handshake: {}", e),
            )),
        }
    }

    fn map_memory(&mut self, worker: &mut RdmaWorker, len: usize) -> Result<RdmaRegion> {
        // here we need to allocate memory and register a memory region just for RDMA porposes
        match worker.pd.allocate::<u8>(len) {
            Ok(mr) => Ok(RdmaRegion { mr }),
            Err(e) => Err(Error::new(
                ErrorKind::Other,
                format!("ERROR: registering Memory Region failed: {}", e),
            )),
        }
    }

    fn pack_rkey(&mut self, memory: &RdmaRegion) -> Result<Vec<u8>> {
        let key = RdmaKey {
            raddr: memory.mr.as_ptr() as u64,
            rkey: memory.mr.rkey().0,
            len: memory.mr.len(),
        };

        bincode::serialize(&key).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    fn unpack_rkey(&mut self, _endpoint: &RdmaEndpoint, packed: &[u8]) -> Result<RdmaKey> {
        bincode::deserialize(packed).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    fn connect(self, channel: Channel<Self>) -> RdmaRmaConnector {
        RdmaRmaConnector {
            channel,
            side: self.side,
            tracker: WriteTracker::new(),
            completions: vec![ibverbs::ibv_wc::default(); CQ_POLL_BATCH],
        }
    }
}

/// Registered local memory that puts are issued from
pub struct RegisteredBuffer(ibverbs::MemoryRegion<u8>);

impl AsRef<[u8]> for RegisteredBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

impl AsMut<[u8]> for RegisteredBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.0[..]
    }
}

/// Holds all of the context for a single connection
pub struct RdmaRmaConnector {
    channel: Channel<RdmaTransport>,
    side: SideChannel,
    tracker: WriteTracker,
    completions: Vec<ibverbs::ibv_wc>,
}

impl Peer for RdmaRmaConnector {
    fn side_channel(&mut self) -> &mut SideChannel {
        &mut self.side
    }
}

impl RmaConnector for RdmaRmaConnector {
    type Buffer = RegisteredBuffer;
    type Request = WriteRequest;

    fn allocate(&mut self, size: usize) -> Result<RegisteredBuffer> {
        match self.channel.worker.pd.allocate::<u8>(size) {
            Ok(mr) => Ok(RegisteredBuffer(mr)),
            Err(e) => Err(Error::new(
                ErrorKind::Other,
                format!("ERROR: registering Memory Region failed: {}", e),
            )),
        }
    }

    fn put(&mut self, buf: &RegisteredBuffer, offset: usize) -> Result<Issued<WriteRequest>> {
        let key = self.channel.rkey;
        if offset.saturating_add(buf.0.len()) > key.len {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "ERROR: put of {} bytes at offset {} exceeds remote region of {} bytes",
                    buf.0.len(),
                    offset,
                    key.len
                ),
            ));
        }

        let qp = &self.channel.endpoint.qp;
        let req = self.tracker.issue_put(|wr_id| unsafe {
            qp.post_write_single(&buf.0, key.raddr + offset as u64, key.rkey, wr_id, true)
        })?;

        Ok(Issued::Pending(req))
    }

    fn flush(&mut self) -> Result<Issued<WriteRequest>> {
        // completions of a reliable connection arrive in order, so once every signaled write has
        // its completion, everything before the flush is visible at the target
        Ok(match self.tracker.issue_flush() {
            Some(req) => Issued::Pending(req),
            None => Issued::Done,
        })
    }

    fn progress(&mut self) -> usize {
        if self.tracker.is_poisoned() {
            return 0;
        }

        let completed = match self.channel.worker.cq.poll(&mut self.completions) {
            Ok(c) => c,
            Err(_) => {
                let e = Error::last_os_error();
                warn!("rdma: could not poll CQ: {}", e);
                self.tracker.poison(format!("CQ poll failed: {}", e));
                return 0;
            }
        };

        for wc in completed.iter() {
            let outcome = match wc.error() {
                Some((status, vendor_err)) => {
                    Err(format!("{:?} (vendor_err: {:?})", status, vendor_err))
                }
                None => Ok(()),
            };
            self.tracker.complete(wc.wr_id(), outcome);
        }

        completed.len()
    }

    fn status(&self, req: &WriteRequest) -> Status {
        self.tracker.status(req)
    }

    fn release(&mut self, req: WriteRequest) {
        self.tracker.release(req)
    }

    fn remote_len(&self) -> usize {
        self.channel.rkey.len
    }
}
