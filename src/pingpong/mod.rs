//! # Ping-pong
//! Latency of (put, flush) cycles over an established connector.
//!
//! Every iteration issues one put of the whole local buffer, waits for it, then issues a flush and
//! waits for that too, so exactly one operation is in flight at a time. The reported latency is
//! the mean over all iterations of a size; no warm-up is done and no outliers are dropped.
mod clock;

pub use clock::{Clock, MonotonicClock};

use crate::completion::resolve;
use crate::connection::{Issued, RmaConnector, Status};
use crate::error::{Error, Op, Result};
use crate::output::Record;
use crate::params::SweepParams;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean latency of a single message size
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub msg_size: usize,
    pub latency_ms: f64,
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Message size: {} bytes, latency: {:.2} ms",
            self.msg_size, self.latency_ms
        )
    }
}

/// What to do when an issued operation completes with a failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionPolicy {
    /// Log the failure and keep measuring
    Log,
    /// Abort the run
    Fatal,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::Log
    }
}

pub struct PingPong<'a, C: RmaConnector, K: Clock = MonotonicClock> {
    conn: &'a mut C,
    params: SweepParams,
    policy: CompletionPolicy,
    clock: K,
}

impl<'a, C: RmaConnector> PingPong<'a, C> {
    pub fn new(conn: &'a mut C, params: SweepParams) -> PingPong<'a, C> {
        Self::with_clock(conn, params, MonotonicClock::new())
    }
}

impl<'a, C: RmaConnector, K: Clock> PingPong<'a, C, K> {
    pub fn with_clock(conn: &'a mut C, params: SweepParams, clock: K) -> PingPong<'a, C, K> {
        PingPong {
            conn,
            params,
            policy: Default::default(),
            clock,
        }
    }

    pub fn policy(mut self, policy: CompletionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Measures every size of the sweep, recording each sample as soon as it is taken.
    /// # Fails
    /// On invalid parameters before anything is measured, otherwise on the first failing size;
    /// samples of the sizes before it are already recorded.
    pub fn sweep<R: Record<Sample>>(&mut self, sink: &mut R) -> Result<()> {
        self.params.validate()?;
        let largest = self.params.sizes().last().unwrap_or(self.params.min_size);
        if largest > self.conn.remote_len() {
            return Err(Error::Config(format!(
                "largest message of {} bytes exceeds the remote region of {} bytes",
                largest,
                self.conn.remote_len()
            )));
        }

        info!(
            "sweep: {} .. {} bytes, {} iterations per size",
            self.params.min_size, self.params.max_size, self.params.iterations
        );
        for msg_size in self.params.sizes() {
            let sample = self.measure(msg_size)?;
            sink.record(sample)?;
        }
        info!("sweep: done");

        Ok(())
    }

    /// Mean latency of a (put, flush) cycle with messages of `msg_size` bytes
    pub fn measure(&mut self, msg_size: usize) -> Result<Sample> {
        if msg_size > self.conn.remote_len() {
            return Err(Error::Config(format!(
                "message of {} bytes does not fit the remote region of {} bytes",
                msg_size,
                self.conn.remote_len()
            )));
        }
        let iterations = self.params.iterations.max(1);

        let mut buf = self.conn.allocate(msg_size)?;
        buf.as_mut().fill(0);

        let start = self.clock.now();
        for _ in 0..iterations {
            self.cycle(&buf)?;
        }
        let elapsed = self.clock.now().checked_sub(start).unwrap_or_default();

        Ok(Sample {
            msg_size,
            latency_ms: elapsed.as_secs_f64() * 1000.0 / iterations as f64,
        })
    }

    fn cycle(&mut self, buf: &C::Buffer) -> Result<()> {
        let issued = self.conn.put(buf, 0).map_err(Error::rejected(Op::Put))?;
        self.complete(Op::Put, issued)?;

        let issued = self.conn.flush().map_err(Error::rejected(Op::Flush))?;
        self.complete(Op::Flush, issued)
    }

    fn complete(&mut self, op: Op, issued: Issued<C::Request>) -> Result<()> {
        match resolve(&mut *self.conn, issued) {
            Status::Failed(reason) => match self.policy {
                CompletionPolicy::Log => {
                    warn!("{} failed with status {}", op, reason);
                    Ok(())
                }
                CompletionPolicy::Fatal => Err(Error::Completion { op, reason }),
            },
            _ => Ok(()),
        }
    }
}
