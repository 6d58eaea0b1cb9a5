//! # Side channel
//! Out-of-band TCP link with the peer. During setup it swaps addressing tokens and packed remote
//! keys; afterwards the initiator uses it to tell the target that the measurements are over.
use log::debug;
use std::io::{Error, ErrorKind, Result};
use std::net::{SocketAddr, TcpListener, TcpStream};

/// Which side of the side channel this process is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// No peer: the process connects to its own worker and writes into its own memory
    Loopback,
    /// Connects to the peer and issues the puts
    Initiator(SocketAddr),
    /// Waits for the peer to connect and exposes its memory
    Target(SocketAddr),
}

/// Connectors that keep talking to their peer after setup
pub trait Peer {
    fn side_channel(&mut self) -> &mut SideChannel;
}

pub struct SideChannel {
    role: Role,
    listener: Option<TcpListener>,
    stream: Option<TcpStream>,
}

impl SideChannel {
    /// A target binds its address right away, the peer connection itself is made on first use
    pub fn new(role: Role) -> Result<SideChannel> {
        let listener = match role {
            Role::Target(addr) => Some(TcpListener::bind(addr).map_err(|e| {
                Error::new(
                    e.kind(),
                    format!("ERROR: failed to listen on {}: {}", addr, e),
                )
            })?),
            _ => None,
        };

        Ok(SideChannel {
            role,
            listener,
            stream: None,
        })
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Address a target is listening on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Sends our token and returns the peer's. A loopback channel gets its own token back.
    pub fn exchange(&mut self, local: &[u8]) -> Result<Vec<u8>> {
        let stream = match self.stream()? {
            Some(s) => s,
            None => return Ok(local.to_vec()),
        };

        bincode::serialize_into(&mut *stream, &local.to_vec()).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("ERROR: failed to transmit serialized message: {}", e),
            )
        })?;

        bincode::deserialize_from(&mut *stream).map_err(|e| {
            Error::new(
                ErrorKind::Other,
                format!("ERROR: failed to recieve data: {}", e),
            )
        })
    }

    /// Tells the target that the measurements are over
    pub fn finish(&mut self) -> Result<()> {
        match self.stream()? {
            Some(stream) => {
                bincode::serialize_into(stream, &true).map_err(|e| Error::new(ErrorKind::Other, e))
            }
            None => Ok(()),
        }
    }

    /// Keeps the exposed memory alive until the initiator is done with it
    pub fn serve(&mut self) -> Result<()> {
        if let Some(stream) = self.stream()? {
            let _: bool =
                bincode::deserialize_from(stream).map_err(|e| Error::new(ErrorKind::Other, e))?;
            debug!("side channel: initiator finished");
        }

        Ok(())
    }

    fn stream(&mut self) -> Result<Option<&mut TcpStream>> {
        if self.stream.is_none() {
            let stream = match self.role {
                Role::Loopback => return Ok(None),
                Role::Initiator(addr) => TcpStream::connect(addr).map_err(|e| {
                    Error::new(
                        e.kind(),
                        format!("ERROR: failed to connect to peer {}: {}", addr, e),
                    )
                })?,
                Role::Target(_) => {
                    let listener = self.listener.as_ref().ok_or_else(|| {
                        Error::new(ErrorKind::NotConnected, "ERROR: not listening")
                    })?;
                    let (stream, peer) = listener.accept()?;
                    debug!("side channel: peer {} connected", peer);
                    stream
                }
            };
            stream.set_nodelay(true)?;
            self.stream = Some(stream);
        }

        Ok(self.stream.as_mut())
    }
}
