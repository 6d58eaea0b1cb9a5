//! # Completion
//! Driving in-flight operations to completion by cooperative polling.
use crate::connection::{Issued, RmaConnector, Status};
use log::trace;

/// Spins on the connector's progress step until `req` leaves the in-progress state, then releases
/// it. Returns the terminal status; a failure is left to the caller.
///
/// There is no timeout: an operation that never completes blocks forever.
/// Progressing may complete other pending operations on the same connector as well.
pub fn wait<C: RmaConnector + ?Sized>(conn: &mut C, req: C::Request) -> Status {
    let mut spins: u64 = 0;
    let status = loop {
        match conn.status(&req) {
            Status::InProgress => {
                conn.progress();
                spins += 1;
            }
            done => break done,
        }
    };
    conn.release(req);
    trace!("completion: {:?} after {} progress calls", status, spins);

    status
}

/// Completion of an issued operation: immediate ones succeeded already, pending ones are waited on
pub fn resolve<C: RmaConnector + ?Sized>(conn: &mut C, issued: Issued<C::Request>) -> Status {
    match issued {
        Issued::Done => Status::Ok,
        Issued::Pending(req) => wait(conn, req),
    }
}
