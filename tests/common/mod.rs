#![allow(dead_code)]

use putlat::connection::{Issued, RmaConnector, Status};
use putlat::pingpong::Clock;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::{Error, ErrorKind, Result};
use std::rc::Rc;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Alloc(usize),
    Put { len: usize },
    /// First put out of a freshly allocated buffer
    FirstPut { zeroed: bool },
    Flush,
    Progress,
    Status(u64),
    Release(u64),
}

/// Time only moves when the fake channel says so
#[derive(Clone, Default)]
pub struct SimClock(pub Rc<Cell<Duration>>);

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.0.get()
    }
}

pub struct FakeBuffer {
    bytes: Vec<u8>,
    fresh: Cell<bool>,
    drops: Rc<Cell<usize>>,
}

impl AsRef<[u8]> for FakeBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl AsMut<[u8]> for FakeBuffer {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }
}

impl Drop for FakeBuffer {
    fn drop(&mut self) {
        self.drops.set(self.drops.get() + 1);
    }
}

#[derive(Debug)]
pub struct FakeRequest(u64);

struct InFlight {
    is_flush: bool,
    polls_left: usize,
}

/// Instrumented channel: records every call, completes requests after a fixed number of status
/// checks, and advances a simulated clock by `cycle` with every flush.
pub struct FakeChannel {
    pub polls_before_done: usize,
    pub cycle: Duration,
    pub clock: SimClock,
    pub reject_put_at: Option<usize>,
    pub reject_flush: bool,
    pub fail_flushes: bool,
    pub buffer_drops: Rc<Cell<usize>>,
    pub region_len: usize,
    events: RefCell<Vec<Event>>,
    in_flight: RefCell<HashMap<u64, InFlight>>,
    puts: usize,
    next_id: u64,
}

impl FakeChannel {
    pub fn new(polls_before_done: usize) -> FakeChannel {
        FakeChannel {
            polls_before_done,
            cycle: Duration::from_millis(1),
            clock: SimClock::default(),
            reject_put_at: None,
            reject_flush: false,
            fail_flushes: false,
            buffer_drops: Rc::new(Cell::new(0)),
            region_len: 16 * 1024 * 1024,
            events: RefCell::new(Vec::new()),
            in_flight: RefCell::new(HashMap::new()),
            puts: 0,
            next_id: 0,
        }
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.borrow().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.borrow().iter().filter(|e| pred(e)).count()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.borrow().len()
    }

    fn log(&self, e: Event) {
        self.events.borrow_mut().push(e);
    }

    fn issue(&mut self, is_flush: bool) -> Issued<FakeRequest> {
        if self.polls_before_done == 0 {
            return Issued::Done;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.in_flight.borrow_mut().insert(
            id,
            InFlight {
                is_flush,
                polls_left: self.polls_before_done,
            },
        );

        Issued::Pending(FakeRequest(id))
    }
}

impl RmaConnector for FakeChannel {
    type Buffer = FakeBuffer;
    type Request = FakeRequest;

    fn allocate(&mut self, size: usize) -> Result<FakeBuffer> {
        self.log(Event::Alloc(size));
        // garbage on purpose, the driver has to zero it
        Ok(FakeBuffer {
            bytes: vec![0xa5; size],
            fresh: Cell::new(true),
            drops: self.buffer_drops.clone(),
        })
    }

    fn put(&mut self, buf: &FakeBuffer, _offset: usize) -> Result<Issued<FakeRequest>> {
        let idx = self.puts;
        self.puts += 1;
        if self.reject_put_at == Some(idx) {
            return Err(Error::new(ErrorKind::BrokenPipe, "endpoint is gone"));
        }
        if buf.fresh.replace(false) {
            self.log(Event::FirstPut {
                zeroed: buf.bytes.iter().all(|&b| b == 0),
            });
        }
        self.log(Event::Put {
            len: buf.bytes.len(),
        });

        Ok(self.issue(false))
    }

    fn flush(&mut self) -> Result<Issued<FakeRequest>> {
        if self.reject_flush {
            return Err(Error::new(ErrorKind::BrokenPipe, "worker is gone"));
        }
        self.log(Event::Flush);
        let t = self.clock.0.get();
        self.clock.0.set(t + self.cycle);

        Ok(self.issue(true))
    }

    fn progress(&mut self) -> usize {
        self.log(Event::Progress);
        0
    }

    fn status(&self, req: &FakeRequest) -> Status {
        self.log(Event::Status(req.0));
        let mut in_flight = self.in_flight.borrow_mut();
        let f = in_flight
            .get_mut(&req.0)
            .unwrap_or_else(|| panic!("status of released request #{}", req.0));

        if f.polls_left > 0 {
            f.polls_left -= 1;
            return Status::InProgress;
        }
        if f.is_flush && self.fail_flushes {
            return Status::Failed("UCS_ERR_ENDPOINT_TIMEOUT".into());
        }

        Status::Ok
    }

    fn release(&mut self, req: FakeRequest) {
        self.log(Event::Release(req.0));
        assert!(
            self.in_flight.borrow_mut().remove(&req.0).is_some(),
            "request #{} released twice",
            req.0
        );
    }

    fn remote_len(&self) -> usize {
        self.region_len
    }
}
