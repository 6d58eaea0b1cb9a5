//! # UCX
//! One-sided puts through UCP, the protocol layer of UCX.
//!
//! The context only asks for the RMA feature and the worker is single threaded, so nothing
//! advances unless `ucp_worker_progress` is called. `ucp_put_nbx` and `ucp_worker_flush_nbx`
//! return either an encoded error, NULL for an operation that is already done, or a request that
//! has to be checked with `ucp_request_check_status` and freed once it is complete.
use crate::connection::side_channel::{Peer, SideChannel};
use crate::connection::{Issued, RmaConnector, Status, Transport};
use crate::setup::Channel;
use log::debug;
use serde::{Deserialize, Serialize};
use std::ffi::{c_void, CStr};
use std::io::{Error, ErrorKind, Result};
use std::{mem, ptr, slice};

#[allow(
    non_upper_case_globals,
    non_camel_case_types,
    non_snake_case,
    dead_code,
    clippy::all
)]
mod sys {
    include!(concat!(env!("OUT_DIR"), "/ucx_bindings.rs"));
}

fn status_string(status: sys::ucs_status_t) -> String {
    unsafe { CStr::from_ptr(sys::ucs_status_string(status)) }
        .to_string_lossy()
        .into_owned()
}

fn failure(status: sys::ucs_status_t, what: &str) -> Error {
    Error::new(
        ErrorKind::Other,
        format!("ERROR: {} failed: {}", what, status_string(status)),
    )
}

fn check(status: sys::ucs_status_t, what: &str) -> Result<()> {
    if status == sys::ucs_status_t_UCS_OK {
        return Ok(());
    }

    Err(failure(status, what))
}

/// What a non-blocking call handed back
#[derive(Debug, PartialEq, Eq)]
enum Returned {
    Done,
    Request,
    Failed(sys::ucs_status_t),
}

// UCS_PTR_IS_ERR: the topmost addresses encode error statuses
fn classify(ptr: sys::ucs_status_ptr_t) -> Returned {
    if ptr.is_null() {
        Returned::Done
    } else if ptr as usize >= sys::ucs_status_t_UCS_ERR_LAST as isize as usize {
        Returned::Failed(ptr as isize as sys::ucs_status_t)
    } else {
        Returned::Request
    }
}

fn issued(ptr: sys::ucs_status_ptr_t, what: &str) -> Result<Issued<UcxRequest>> {
    match classify(ptr) {
        Returned::Done => Ok(Issued::Done),
        Returned::Request => Ok(Issued::Pending(UcxRequest(ptr))),
        Returned::Failed(status) => Err(failure(status, what)),
    }
}

fn to_status(status: sys::ucs_status_t) -> Status {
    match status {
        sys::ucs_status_t_UCS_INPROGRESS => Status::InProgress,
        sys::ucs_status_t_UCS_OK => Status::Ok,
        s => Status::Failed(status_string(s)),
    }
}

pub struct UcxTransport {
    side: SideChannel,
}

impl UcxTransport {
    pub fn new(side: SideChannel) -> UcxTransport {
        UcxTransport { side }
    }
}

struct UcxContext(sys::ucp_context_h);

impl Drop for UcxContext {
    fn drop(&mut self) {
        unsafe { sys::ucp_cleanup(self.0) };
        debug!("teardown: ucp context");
    }
}

// the worker is destroyed before its context, which is dropped as a field afterwards
pub struct UcxWorker {
    handle: sys::ucp_worker_h,
    context: UcxContext,
}

impl Drop for UcxWorker {
    fn drop(&mut self) {
        unsafe { sys::ucp_worker_destroy(self.handle) };
        debug!("teardown: ucp worker");
    }
}

pub struct UcxEndpoint {
    handle: sys::ucp_ep_h,
}

impl Drop for UcxEndpoint {
    fn drop(&mut self) {
        unsafe { sys::ucp_ep_destroy(self.handle) };
        debug!("teardown: ucp endpoint");
    }
}

/// Destination memory mapped for remote access
pub struct UcxRegion {
    memh: sys::ucp_mem_h,
    context: sys::ucp_context_h,
    bytes: Vec<u8>,
}

impl Drop for UcxRegion {
    fn drop(&mut self) {
        unsafe { sys::ucp_mem_unmap(self.context, self.memh) };
        debug!("teardown: ucp region of {} bytes", self.bytes.len());
    }
}

/// What the peer needs to write into our region
#[derive(Debug, Serialize, Deserialize)]
struct PackedKey {
    raddr: u64,
    len: usize,
    rkey: Vec<u8>,
}

pub struct UcxRemoteKey {
    handle: sys::ucp_rkey_h,
    raddr: u64,
    len: usize,
}

impl Drop for UcxRemoteKey {
    fn drop(&mut self) {
        unsafe { sys::ucp_rkey_destroy(self.handle) };
        debug!("teardown: ucp rkey");
    }
}

impl Transport for UcxTransport {
    type Worker = UcxWorker;
    type Endpoint = UcxEndpoint;
    type Memory = UcxRegion;
    type RemoteKey = UcxRemoteKey;
    type Connector = UcxRmaConnector;

    fn create_worker(&mut self) -> Result<UcxWorker> {
        let mut config: *mut sys::ucp_config_t = ptr::null_mut();
        check(
            unsafe { sys::ucp_config_read(ptr::null(), ptr::null(), &mut config) },
            "ucp_config_read",
        )?;

        let params = sys::ucp_params_t {
            field_mask: sys::ucp_params_field_UCP_PARAM_FIELD_FEATURES as u64,
            features: sys::ucp_feature_UCP_FEATURE_RMA as u64,
            ..unsafe { mem::zeroed() }
        };

        let mut context: sys::ucp_context_h = ptr::null_mut();
        let status = unsafe {
            sys::ucp_init_version(
                sys::UCP_API_MAJOR,
                sys::UCP_API_MINOR,
                &params,
                config,
                &mut context,
            )
        };
        unsafe { sys::ucp_config_release(config) };
        check(status, "ucp_init")?;
        let context = UcxContext(context);

        let worker_params = sys::ucp_worker_params_t {
            field_mask: sys::ucp_worker_params_field_UCP_WORKER_PARAM_FIELD_THREAD_MODE as u64,
            thread_mode: sys::ucs_thread_mode_t_UCS_THREAD_MODE_SINGLE,
            ..unsafe { mem::zeroed() }
        };

        let mut handle: sys::ucp_worker_h = ptr::null_mut();
        check(
            unsafe { sys::ucp_worker_create(context.0, &worker_params, &mut handle) },
            "ucp_worker_create",
        )?;

        Ok(UcxWorker { handle, context })
    }

    fn worker_address(&mut self, worker: &mut UcxWorker) -> Result<Vec<u8>> {
        let mut addr: *mut sys::ucp_address_t = ptr::null_mut();
        let mut len: usize = 0;
        check(
            unsafe { sys::ucp_worker_get_address(worker.handle, &mut addr, &mut len) },
            "ucp_worker_get_address",
        )?;

        let token = unsafe { slice::from_raw_parts(addr as *const u8, len) }.to_vec();
        unsafe { sys::ucp_worker_release_address(worker.handle, addr) };

        Ok(token)
    }

    fn exchange(&mut self, local: &[u8]) -> Result<Vec<u8>> {
        self.side.exchange(local)
    }

    fn create_endpoint(&mut self, worker: &mut UcxWorker, remote: &[u8]) -> Result<UcxEndpoint> {
        let params = sys::ucp_ep_params_t {
            field_mask: sys::ucp_ep_params_field_UCP_EP_PARAM_FIELD_REMOTE_ADDRESS as u64,
            address: remote.as_ptr() as *const sys::ucp_address_t,
            ..unsafe { mem::zeroed() }
        };

        let mut handle: sys::ucp_ep_h = ptr::null_mut();
        check(
            unsafe { sys::ucp_ep_create(worker.handle, &params, &mut handle) },
            "ucp_ep_create",
        )?;

        Ok(UcxEndpoint { handle })
    }

    fn map_memory(&mut self, worker: &mut UcxWorker, len: usize) -> Result<UcxRegion> {
        let mut bytes = vec![0u8; len];
        let params = sys::ucp_mem_map_params_t {
            field_mask: (sys::ucp_mem_map_params_field_UCP_MEM_MAP_PARAM_FIELD_ADDRESS
                | sys::ucp_mem_map_params_field_UCP_MEM_MAP_PARAM_FIELD_LENGTH)
                as u64,
            address: bytes.as_mut_ptr() as *mut c_void,
            length: len,
            ..unsafe { mem::zeroed() }
        };

        let mut memh: sys::ucp_mem_h = ptr::null_mut();
        check(
            unsafe { sys::ucp_mem_map(worker.context.0, &params, &mut memh) },
            "ucp_mem_map",
        )?;

        Ok(UcxRegion {
            memh,
            context: worker.context.0,
            bytes,
        })
    }

    fn pack_rkey(&mut self, memory: &UcxRegion) -> Result<Vec<u8>> {
        let mut buf: *mut c_void = ptr::null_mut();
        let mut len: usize = 0;
        check(
            unsafe { sys::ucp_rkey_pack(memory.context, memory.memh, &mut buf, &mut len) },
            "ucp_rkey_pack",
        )?;

        let rkey = unsafe { slice::from_raw_parts(buf as *const u8, len) }.to_vec();
        unsafe { sys::ucp_rkey_buffer_release(buf) };

        let key = PackedKey {
            raddr: memory.bytes.as_ptr() as u64,
            len: memory.bytes.len(),
            rkey,
        };
        bincode::serialize(&key).map_err(|e| Error::new(ErrorKind::InvalidData, e))
    }

    fn unpack_rkey(&mut self, endpoint: &UcxEndpoint, packed: &[u8]) -> Result<UcxRemoteKey> {
        let key: PackedKey =
            bincode::deserialize(packed).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;

        let mut handle: sys::ucp_rkey_h = ptr::null_mut();
        check(
            unsafe {
                sys::ucp_ep_rkey_unpack(
                    endpoint.handle,
                    key.rkey.as_ptr() as *const c_void,
                    &mut handle,
                )
            },
            "ucp_ep_rkey_unpack",
        )?;

        Ok(UcxRemoteKey {
            handle,
            raddr: key.raddr,
            len: key.len,
        })
    }

    fn connect(self, channel: Channel<Self>) -> UcxRmaConnector {
        UcxRmaConnector {
            channel,
            side: self.side,
            // no callbacks, no flags: completion is only ever checked by polling
            params: unsafe { mem::zeroed() },
        }
    }
}

/// Request handed out by UCP, freed on release
#[derive(Debug)]
pub struct UcxRequest(*mut c_void);

pub struct UcxRmaConnector {
    channel: Channel<UcxTransport>,
    side: SideChannel,
    params: sys::ucp_request_param_t,
}

impl Peer for UcxRmaConnector {
    fn side_channel(&mut self) -> &mut SideChannel {
        &mut self.side
    }
}

impl RmaConnector for UcxRmaConnector {
    type Buffer = Vec<u8>;
    type Request = UcxRequest;

    fn allocate(&mut self, size: usize) -> Result<Vec<u8>> {
        Ok(vec![0u8; size])
    }

    fn put(&mut self, buf: &Vec<u8>, offset: usize) -> Result<Issued<UcxRequest>> {
        let key = &self.channel.rkey;
        if offset.saturating_add(buf.len()) > key.len {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "ERROR: put of {} bytes at offset {} exceeds remote region of {} bytes",
                    buf.len(),
                    offset,
                    key.len
                ),
            ));
        }

        let ptr = unsafe {
            sys::ucp_put_nbx(
                self.channel.endpoint.handle,
                buf.as_ptr() as *const c_void,
                buf.len(),
                key.raddr + offset as u64,
                key.handle,
                &self.params,
            )
        };
        issued(ptr, "ucp_put_nbx")
    }

    fn flush(&mut self) -> Result<Issued<UcxRequest>> {
        let ptr = unsafe { sys::ucp_worker_flush_nbx(self.channel.worker.handle, &self.params) };
        issued(ptr, "ucp_worker_flush_nbx")
    }

    fn progress(&mut self) -> usize {
        unsafe { sys::ucp_worker_progress(self.channel.worker.handle) as usize }
    }

    fn status(&self, req: &UcxRequest) -> Status {
        to_status(unsafe { sys::ucp_request_check_status(req.0) })
    }

    fn release(&mut self, req: UcxRequest) {
        unsafe { sys::ucp_request_free(req.0) }
    }

    fn remote_len(&self) -> usize {
        self.channel.rkey.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoded(status: sys::ucs_status_t) -> sys::ucs_status_ptr_t {
        status as isize as sys::ucs_status_ptr_t
    }

    #[test]
    fn null_pointer_is_an_immediate_completion() {
        assert_eq!(classify(ptr::null_mut()), Returned::Done);
        assert!(matches!(issued(ptr::null_mut(), "put"), Ok(Issued::Done)));
    }

    #[test]
    fn encoded_status_is_an_error() {
        let ptr = encoded(sys::ucs_status_t_UCS_ERR_NO_MEMORY);
        assert_eq!(classify(ptr), Returned::Failed(sys::ucs_status_t_UCS_ERR_NO_MEMORY));

        let ptr = encoded(sys::ucs_status_t_UCS_ERR_LAST);
        assert_eq!(classify(ptr), Returned::Failed(sys::ucs_status_t_UCS_ERR_LAST));

        let err = issued(encoded(sys::ucs_status_t_UCS_ERR_UNREACHABLE), "ucp_put_nbx").unwrap_err();
        assert!(err.to_string().contains("ucp_put_nbx"), "{}", err);
    }

    #[test]
    fn anything_else_is_a_request() {
        let mut slot = 0u64;
        let ptr = &mut slot as *mut u64 as sys::ucs_status_ptr_t;

        assert_eq!(classify(ptr), Returned::Request);
    }

    #[test]
    fn request_status_mapping() {
        assert_eq!(to_status(sys::ucs_status_t_UCS_INPROGRESS), Status::InProgress);
        assert_eq!(to_status(sys::ucs_status_t_UCS_OK), Status::Ok);
        assert!(matches!(
            to_status(sys::ucs_status_t_UCS_ERR_ENDPOINT_TIMEOUT),
            Status::Failed(_)
        ));
    }
}
