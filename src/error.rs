//! # Errors
//! Failures of a benchmark run. Every variant aborts the run; nothing is retried.
use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// An asynchronous operation issued on a connector
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Put,
    Flush,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Put => write!(f, "put"),
            Op::Flush => write!(f, "flush"),
        }
    }
}

/// A step of channel establishment, in the order they are performed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    Worker,
    Address,
    AddressExchange,
    Endpoint,
    MemoryMap,
    RkeyPack,
    RkeyExchange,
    RkeyUnpack,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Worker => "worker create",
            Step::Address => "worker get address",
            Step::AddressExchange => "address exchange",
            Step::Endpoint => "endpoint create",
            Step::MemoryMap => "memory map",
            Step::RkeyPack => "rkey pack",
            Step::RkeyExchange => "rkey exchange",
            Step::RkeyUnpack => "rkey unpack",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    /// Channel establishment failed. Whatever was created before `step` is already torn down.
    #[error("{step} failed: {source}")]
    Setup {
        step: Step,
        #[source]
        source: io::Error,
    },

    /// The transport refused to issue an operation
    #[error("{op} rejected by transport: {source}")]
    Rejected {
        op: Op,
        #[source]
        source: io::Error,
    },

    /// An issued operation completed with a failure status
    #[error("{op} failed with status {reason}")]
    Completion { op: Op, reason: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn setup(step: Step) -> impl FnOnce(io::Error) -> Error {
        move |source| Error::Setup { step, source }
    }

    pub(crate) fn rejected(op: Op) -> impl FnOnce(io::Error) -> Error {
        move |source| Error::Rejected { op, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failing_operation() {
        let e = Error::setup(Step::Endpoint)(io::Error::new(io::ErrorKind::Other, "no route"));
        assert_eq!(e.to_string(), "endpoint create failed: no route");
        assert!(matches!(e, Error::Setup { step: Step::Endpoint, .. }));

        let e = Error::rejected(Op::Flush)(io::Error::new(io::ErrorKind::Other, "ep closed"));
        assert_eq!(e.to_string(), "flush rejected by transport: ep closed");
        assert!(matches!(e, Error::Rejected { op: Op::Flush, .. }));
    }
}
