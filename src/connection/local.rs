//! # Loopback
//! In-process transport. The worker connects to its own address and puts land in its own mapped
//! region, the same way a single process benchmark targets itself.
//! Operations stay in flight for a configured number of progress steps.
use crate::connection::{Issued, RmaConnector, Status, Transport};
use crate::error::Op;
use crate::setup::Channel;
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};
use std::process;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LocalConfig {
    /// Progress steps an operation needs before it completes. Zero completes at issue.
    pub completion_steps: usize,
}

impl LocalConfig {
    pub fn new(completion_steps: usize) -> LocalConfig {
        LocalConfig { completion_steps }
    }
}

pub struct LocalTransport {
    conf: LocalConfig,
}

impl LocalTransport {
    pub fn new(conf: LocalConfig) -> LocalTransport {
        LocalTransport { conf }
    }
}

pub struct LocalWorker {
    addr: Vec<u8>,
}

impl Drop for LocalWorker {
    fn drop(&mut self) {
        debug!("teardown: loopback worker");
    }
}

pub struct LocalEndpoint;

impl Drop for LocalEndpoint {
    fn drop(&mut self) {
        debug!("teardown: loopback endpoint");
    }
}

pub struct LocalRegion {
    bytes: Vec<u8>,
}

impl Drop for LocalRegion {
    fn drop(&mut self) {
        debug!("teardown: loopback region of {} bytes", self.bytes.len());
    }
}

/// Packed and unpacked form of the loopback remote key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalKey {
    base: u64,
    len: usize,
}

impl Transport for LocalTransport {
    type Worker = LocalWorker;
    type Endpoint = LocalEndpoint;
    type Memory = LocalRegion;
    type RemoteKey = LocalKey;
    type Connector = LocalRmaConnector;

    fn create_worker(&mut self) -> Result<LocalWorker> {
        Ok(LocalWorker {
            addr: format!("loopback:{}", process::id()).into_bytes(),
        })
    }

    fn worker_address(&mut self, worker: &mut LocalWorker) -> Result<Vec<u8>> {
        Ok(worker.addr.clone())
    }

    fn exchange(&mut self, local: &[u8]) -> Result<Vec<u8>> {
        // the only peer is ourselves
        Ok(local.to_vec())
    }

    fn create_endpoint(&mut self, worker: &mut LocalWorker, remote: &[u8]) -> Result<LocalEndpoint> {
        if remote != worker.addr.as_slice() {
            return Err(Error::new(
                ErrorKind::ConnectionRefused,
                "ERROR: loopback worker can only connect to itself",
            ));
        }

        Ok(LocalEndpoint)
    }

    fn map_memory(&mut self, _worker: &mut LocalWorker, len: usize) -> Result<LocalRegion> {
        Ok(LocalRegion {
            bytes: vec![0u8; len],
        })
    }

    fn pack_rkey(&mut self, memory: &LocalRegion) -> Result<Vec<u8>> {
        let key = LocalKey {
            base: memory.bytes.as_ptr() as u64,
            len: memory.bytes.len(),
        };

        bincode::serialize(&key).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    fn unpack_rkey(&mut self, _endpoint: &LocalEndpoint, packed: &[u8]) -> Result<LocalKey> {
        bincode::deserialize(packed).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    fn connect(self, channel: Channel<Self>) -> LocalRmaConnector {
        LocalRmaConnector {
            channel,
            steps: self.conf.completion_steps,
            pending: BTreeMap::new(),
            next_id: 0,
        }
    }
}

/// Token of an in-flight loopback operation
#[derive(Debug, PartialEq, Eq)]
pub struct LocalRequest(u64);

struct InFlight {
    op: Op,
    remaining: usize,
    status: Status,
}

pub struct LocalRmaConnector {
    channel: Channel<LocalTransport>,
    steps: usize,
    // ordered by issue, so a flush sees the puts issued before it
    pending: BTreeMap<u64, InFlight>,
    next_id: u64,
}

impl LocalRmaConnector {
    /// Contents of the destination region
    pub fn region(&self) -> &[u8] {
        &self.channel.memory.bytes
    }

    /// Number of issued operations not yet released
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    fn issue(&mut self, op: Op) -> Issued<LocalRequest> {
        let id = self.next_id;
        self.next_id += 1;
        self.pending.insert(
            id,
            InFlight {
                op,
                remaining: self.steps,
                status: Status::InProgress,
            },
        );
        trace!("loopback: issued {} #{}", op, id);

        Issued::Pending(LocalRequest(id))
    }

    fn puts_in_progress(&self) -> bool {
        self.pending
            .values()
            .any(|f| f.op == Op::Put && f.status.is_in_progress())
    }
}

impl RmaConnector for LocalRmaConnector {
    type Buffer = Vec<u8>;
    type Request = LocalRequest;

    fn allocate(&mut self, size: usize) -> Result<Vec<u8>> {
        Ok(vec![0u8; size])
    }

    fn put(&mut self, buf: &Vec<u8>, offset: usize) -> Result<Issued<LocalRequest>> {
        let key = self.channel.rkey;
        let region = &mut self.channel.memory.bytes;
        // the key grants `len` bytes from `base`, translated back into the mapped region
        let start = key
            .base
            .checked_add(offset as u64)
            .and_then(|addr| addr.checked_sub(region.as_ptr() as u64))
            .map(|i| i as usize);
        let end = start
            .and_then(|s| s.checked_add(buf.len()))
            .filter(|&end| offset.saturating_add(buf.len()) <= key.len && end <= region.len());
        let (start, end) = match (start, end) {
            (Some(s), Some(e)) => (s, e),
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!(
                        "ERROR: put of {} bytes at offset {} exceeds remote region of {} bytes",
                        buf.len(),
                        offset,
                        key.len
                    ),
                ))
            }
        };
        region[start..end].copy_from_slice(buf);

        if self.steps == 0 {
            return Ok(Issued::Done);
        }

        Ok(self.issue(Op::Put))
    }

    fn flush(&mut self) -> Result<Issued<LocalRequest>> {
        if self.steps == 0 && !self.puts_in_progress() {
            return Ok(Issued::Done);
        }

        Ok(self.issue(Op::Flush))
    }

    fn progress(&mut self) -> usize {
        let mut completed = 0;
        let mut puts_left = false;

        for f in self.pending.values_mut() {
            if !f.status.is_in_progress() {
                continue;
            }
            f.remaining = f.remaining.saturating_sub(1);

            let done = match f.op {
                Op::Put => f.remaining == 0,
                Op::Flush => f.remaining == 0 && !puts_left,
            };
            if done {
                f.status = Status::Ok;
                completed += 1;
            } else if f.op == Op::Put {
                puts_left = true;
            }
        }

        completed
    }

    fn status(&self, req: &LocalRequest) -> Status {
        match self.pending.get(&req.0) {
            Some(f) => f.status.clone(),
            None => Status::Failed(format!("unknown request #{}", req.0)),
        }
    }

    fn release(&mut self, req: LocalRequest) {
        if self.pending.remove(&req.0).is_some() {
            trace!("loopback: released #{}", req.0);
        }
    }

    fn remote_len(&self) -> usize {
        self.channel.rkey.len
    }
}
