//! # putlat
//! Round-trip latency of one-sided RMA puts over a sweep of message sizes.
//!
//! A measurement is a sequence of (put, flush) cycles on an established
//! [`connection::RmaConnector`], every in-flight operation being driven to
//! completion by [`completion::wait`].
pub mod completion;
pub mod connection;
pub mod error;
pub mod output;
pub mod params;
pub mod pingpong;
pub mod setup;

pub use error::{Error, Op, Result, Step};
pub use pingpong::{CompletionPolicy, PingPong, Sample};
