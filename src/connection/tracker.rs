//! # Write tracker
//! Bookkeeping of signaled writes on a queue pair whose completions arrive in issue order.
//!
//! A put is done once its own work completion is seen. A flush is done once no signaled write is
//! left without a completion; it reports the first failed write seen since the last flush.
//! A completion queue that cannot be polled poisons the tracker: every pending request fails with
//! the poll error and no further writes are accepted.
use crate::connection::Status;
use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};

/// Token of an in-flight write or flush
#[derive(Debug, PartialEq, Eq)]
pub enum WriteRequest {
    Put(u64),
    Flush,
}

#[derive(Debug, Default)]
pub struct WriteTracker {
    next_wr_id: u64,
    // signaled writes without a work completion yet
    outstanding: usize,
    completed: HashMap<u64, Status>,
    failure: Option<String>,
    poisoned: Option<String>,
}

impl WriteTracker {
    pub fn new() -> WriteTracker {
        Default::default()
    }

    /// Posts a write with a fresh work request id. Nothing is tracked if posting fails.
    pub fn issue_put<F>(&mut self, post: F) -> Result<WriteRequest>
    where
        F: FnOnce(u64) -> Result<()>,
    {
        if let Some(ref reason) = self.poisoned {
            return Err(Error::new(
                ErrorKind::BrokenPipe,
                format!("ERROR: completion queue is unusable: {}", reason),
            ));
        }

        let wr_id = self.next_wr_id;
        post(wr_id)?;
        self.next_wr_id += 1;
        self.outstanding += 1;

        Ok(WriteRequest::Put(wr_id))
    }

    /// `None` when a flush would have nothing to wait for
    pub fn issue_flush(&self) -> Option<WriteRequest> {
        if self.outstanding == 0 && self.failure.is_none() && self.poisoned.is_none() {
            return None;
        }

        Some(WriteRequest::Flush)
    }

    /// Accounts a work completion, `Err` carrying the reason of a failed one
    pub fn complete(&mut self, wr_id: u64, outcome: std::result::Result<(), String>) {
        let status = match outcome {
            Ok(()) => Status::Ok,
            Err(reason) => {
                self.failure.get_or_insert_with(|| reason.clone());
                Status::Failed(reason)
            }
        };
        self.outstanding = self.outstanding.saturating_sub(1);
        self.completed.insert(wr_id, status);
    }

    /// Fails everything that is pending now or issued later
    pub fn poison(&mut self, reason: String) {
        self.poisoned.get_or_insert(reason);
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn status(&self, req: &WriteRequest) -> Status {
        match req {
            WriteRequest::Put(wr_id) => match self.completed.get(wr_id) {
                Some(status) => status.clone(),
                None => match self.poisoned {
                    Some(ref reason) => Status::Failed(reason.clone()),
                    None => Status::InProgress,
                },
            },
            WriteRequest::Flush => {
                if let Some(ref reason) = self.poisoned {
                    return Status::Failed(reason.clone());
                }
                if self.outstanding > 0 {
                    return Status::InProgress;
                }
                match self.failure {
                    Some(ref reason) => Status::Failed(reason.clone()),
                    None => Status::Ok,
                }
            }
        }
    }

    pub fn release(&mut self, req: WriteRequest) {
        match req {
            WriteRequest::Put(wr_id) => {
                self.completed.remove(&wr_id);
            }
            WriteRequest::Flush => self.failure = None,
        }
    }
}
