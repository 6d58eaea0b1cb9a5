//! # Output module
//!
//! Provides functionality for saving measurements, gathered by `PingPong`

use std::io::Result;

/// Provides interface for recording a result in the underlying storage
pub trait Record<T> {
    /// Saves data to the underlying storage
    fn record(&mut self, data: T) -> Result<()>;
}

/// Records into both storages
impl<T: Clone, A: Record<T>, B: Record<T>> Record<T> for (A, B) {
    fn record(&mut self, data: T) -> Result<()> {
        self.0.record(data.clone())?;
        self.1.record(data)
    }
}

/// Records only if there is a storage
impl<T, R: Record<T>> Record<T> for Option<R> {
    fn record(&mut self, data: T) -> Result<()> {
        match self {
            Some(r) => r.record(data),
            None => Ok(()),
        }
    }
}

impl<T, R: Record<T> + ?Sized> Record<T> for &mut R {
    fn record(&mut self, data: T) -> Result<()> {
        (**self).record(data)
    }
}

pub mod report {
    //! Human readable lines

    use super::Record;
    use std::fmt::Display;
    use std::io::{Result, Write};

    /// Writes one line per record and flushes it right away
    pub struct Report<W: Write>(pub W);

    impl<T: Display, W: Write> Record<T> for Report<W> {
        fn record(&mut self, data: T) -> Result<()> {
            writeln!(self.0, "{}", data)?;
            self.0.flush()
        }
    }
}

pub mod file {
    //! Functionality for saving results into a file

    use super::Record;
    use serde::ser::Serialize;
    use serde_json::to_writer;
    use std::io::{Error, ErrorKind, Result, Write};

    /// Writes json-serialized data, one object per line
    pub struct JsonLines<W: Write>(pub W);

    impl<T: Serialize, W: Write> Record<T> for JsonLines<W> {
        fn record(&mut self, data: T) -> Result<()> {
            to_writer(&mut self.0, &data).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
            self.0.write_all(b"\n")
        }
    }
}

pub mod vec {
    use super::Record;
    use std::io::Result;

    /// Just pushes the data to a vector
    impl<T> Record<T> for Vec<T> {
        fn record(&mut self, data: T) -> Result<()> {
            self.push(data);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::file::JsonLines;
    use super::report::Report;
    use super::*;
    use crate::pingpong::Sample;

    #[test]
    fn report_and_json_tee() {
        let mut sink = (Report(Vec::new()), JsonLines(Vec::new()));
        sink.record(Sample {
            msg_size: 8,
            latency_ms: 1.5,
        })
        .unwrap();

        let (Report(lines), JsonLines(json)) = sink;
        assert_eq!(
            String::from_utf8(lines).unwrap(),
            "Message size: 8 bytes, latency: 1.50 ms\n"
        );

        let back: Sample = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.msg_size, 8);
        assert_eq!(json.last(), Some(&b'\n'));
    }
}
