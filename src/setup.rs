//! # Setup
//! Establishing a one-sided write channel out of the steps a [`Transport`] provides.
//!
//! Each step produces an owned resource. When a step fails, the resources created before it are
//! dropped in reverse creation order, which is their teardown; nothing created later exists yet.
use crate::connection::Transport;
use crate::error::{Error, Result, Step};
use log::debug;

/// Resources of an established channel.
// field order matters: fields are dropped top to bottom, which must be the reverse of creation
pub struct Channel<T: Transport> {
    pub rkey: T::RemoteKey,
    pub memory: T::Memory,
    pub endpoint: T::Endpoint,
    pub worker: T::Worker,
}

/// Creates worker, endpoint, destination memory and remote key, then hands them to the transport
/// to build its connector. `region_len` is the size of the destination memory region.
pub fn establish<T: Transport>(mut transport: T, region_len: usize) -> Result<T::Connector> {
    debug!("setup: {}", Step::Worker);
    let mut worker = transport
        .create_worker()
        .map_err(Error::setup(Step::Worker))?;

    debug!("setup: {}", Step::Address);
    let local_addr = transport
        .worker_address(&mut worker)
        .map_err(Error::setup(Step::Address))?;

    debug!("setup: {} ({} bytes)", Step::AddressExchange, local_addr.len());
    let remote_addr = transport
        .exchange(&local_addr)
        .map_err(Error::setup(Step::AddressExchange))?;

    debug!("setup: {}", Step::Endpoint);
    let endpoint = transport
        .create_endpoint(&mut worker, &remote_addr)
        .map_err(Error::setup(Step::Endpoint))?;

    debug!("setup: {} ({} bytes)", Step::MemoryMap, region_len);
    let memory = transport
        .map_memory(&mut worker, region_len)
        .map_err(Error::setup(Step::MemoryMap))?;

    debug!("setup: {}", Step::RkeyPack);
    let packed = transport
        .pack_rkey(&memory)
        .map_err(Error::setup(Step::RkeyPack))?;

    debug!("setup: {}", Step::RkeyExchange);
    let remote_packed = transport
        .exchange(&packed)
        .map_err(Error::setup(Step::RkeyExchange))?;

    debug!("setup: {}", Step::RkeyUnpack);
    let rkey = transport
        .unpack_rkey(&endpoint, &remote_packed)
        .map_err(Error::setup(Step::RkeyUnpack))?;

    let channel = Channel {
        rkey,
        memory,
        endpoint,
        worker,
    };

    Ok(transport.connect(channel))
}
