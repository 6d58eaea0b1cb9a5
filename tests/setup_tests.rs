use putlat::connection::local::{LocalConfig, LocalRmaConnector, LocalTransport};
use putlat::connection::{Issued, RmaConnector, Status, Transport};
use putlat::setup::{establish, Channel};
use putlat::{Error, Step};
use std::cell::RefCell;
use std::io::{self, ErrorKind};
use std::rc::Rc;

type Log = Rc<RefCell<Vec<&'static str>>>;

/// Resource that records its teardown
struct Res {
    name: &'static str,
    log: Log,
}

impl Drop for Res {
    fn drop(&mut self) {
        self.log.borrow_mut().push(self.name);
    }
}

struct FakeTransport {
    fail_at: Option<Step>,
    log: Log,
}

impl FakeTransport {
    fn new(fail_at: Option<Step>) -> (FakeTransport, Log) {
        let log = Log::default();
        (
            FakeTransport {
                fail_at,
                log: log.clone(),
            },
            log,
        )
    }

    fn step(&self, step: Step, name: &'static str) -> io::Result<Res> {
        if self.fail_at == Some(step) {
            return Err(io::Error::new(ErrorKind::Other, format!("{} refused", name)));
        }
        Ok(Res {
            name,
            log: self.log.clone(),
        })
    }
}

/// Connector over the fake resources, puts complete immediately
struct FakeConnector {
    _channel: Channel<FakeTransport>,
}

impl RmaConnector for FakeConnector {
    type Buffer = Vec<u8>;
    type Request = ();

    fn allocate(&mut self, size: usize) -> io::Result<Vec<u8>> {
        Ok(vec![0; size])
    }

    fn put(&mut self, _buf: &Vec<u8>, _offset: usize) -> io::Result<Issued<()>> {
        Ok(Issued::Done)
    }

    fn flush(&mut self) -> io::Result<Issued<()>> {
        Ok(Issued::Done)
    }

    fn progress(&mut self) -> usize {
        0
    }

    fn status(&self, _req: &()) -> Status {
        Status::Ok
    }

    fn release(&mut self, _req: ()) {}

    fn remote_len(&self) -> usize {
        0
    }
}

impl Transport for FakeTransport {
    type Worker = Res;
    type Endpoint = Res;
    type Memory = Res;
    type RemoteKey = Res;
    type Connector = FakeConnector;

    fn create_worker(&mut self) -> io::Result<Res> {
        self.step(Step::Worker, "worker")
    }

    fn worker_address(&mut self, _worker: &mut Res) -> io::Result<Vec<u8>> {
        if self.fail_at == Some(Step::Address) {
            return Err(io::Error::new(ErrorKind::Other, "no address"));
        }
        Ok(b"fake".to_vec())
    }

    fn exchange(&mut self, local: &[u8]) -> io::Result<Vec<u8>> {
        Ok(local.to_vec())
    }

    fn create_endpoint(&mut self, _worker: &mut Res, _remote: &[u8]) -> io::Result<Res> {
        self.step(Step::Endpoint, "endpoint")
    }

    fn map_memory(&mut self, _worker: &mut Res, _len: usize) -> io::Result<Res> {
        self.step(Step::MemoryMap, "memory")
    }

    fn pack_rkey(&mut self, _memory: &Res) -> io::Result<Vec<u8>> {
        Ok(b"key".to_vec())
    }

    fn unpack_rkey(&mut self, _endpoint: &Res, _packed: &[u8]) -> io::Result<Res> {
        self.step(Step::RkeyUnpack, "rkey")
    }

    fn connect(self, channel: Channel<Self>) -> FakeConnector {
        FakeConnector { _channel: channel }
    }
}

#[test]
fn endpoint_failure_tears_down_worker_only() {
    let (t, log) = FakeTransport::new(Some(Step::Endpoint));

    let err = establish(t, 4096).err().expect("Setup should fail");

    assert!(err.to_string().starts_with("endpoint create failed"), "{}", err);
    match err {
        Error::Setup { step, .. } => assert_eq!(step, Step::Endpoint),
        e => panic!("Unexpected error: {}", e),
    }
    assert_eq!(*log.borrow(), vec!["worker"]);
}

#[test]
fn worker_failure_tears_down_nothing() {
    let (t, log) = FakeTransport::new(Some(Step::Worker));

    assert!(establish(t, 4096).is_err());
    assert!(log.borrow().is_empty());
}

#[test]
fn rkey_failure_tears_down_in_reverse_order() {
    let (t, log) = FakeTransport::new(Some(Step::RkeyUnpack));

    let err = establish(t, 4096).err().expect("Setup should fail");

    assert!(matches!(err, Error::Setup { step: Step::RkeyUnpack, .. }));
    assert_eq!(*log.borrow(), vec!["memory", "endpoint", "worker"]);
}

#[test]
fn established_channel_tears_down_in_reverse_order() {
    let (t, log) = FakeTransport::new(None);

    let conn = establish(t, 4096).ok().expect("Setup should succeed");
    assert!(log.borrow().is_empty());

    drop(conn);
    assert_eq!(*log.borrow(), vec!["rkey", "memory", "endpoint", "worker"]);
}

#[test]
fn loopback_setup_and_measure() {
    let mut conn: LocalRmaConnector =
        establish(LocalTransport::new(LocalConfig::new(2)), 1 << 12).unwrap();

    let issued = conn.put(&vec![9u8; 1 << 12], 0).unwrap();
    assert!(matches!(issued, Issued::Pending(_)));
    assert_eq!(putlat::completion::resolve(&mut conn, issued), Status::Ok);
    assert!(conn.region().iter().all(|&b| b == 9));
}
