use crate::error::{Error, Result};

pub const MIN_MSG_SIZE: usize = 8;
pub const MAX_MSG_SIZE: usize = 10 * 1024 * 1024; // 10 MiB
pub const GROWTH_FACTOR: usize = 2;
pub const ITERATIONS: usize = 100;

/// Parameters of a message size sweep.
/// The defaults are the benchmark's fixed methodology; other values are meant for scaled-down runs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepParams {
    pub min_size: usize,
    pub max_size: usize,
    pub growth: usize,
    pub iterations: usize,
}

impl SweepParams {
    pub fn new(min_size: usize, max_size: usize, growth: usize, iterations: usize) -> SweepParams {
        SweepParams {
            min_size,
            max_size,
            growth,
            iterations,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_size == 0 {
            return Err(Error::Config("minimum message size must be positive".into()));
        }
        if self.max_size < self.min_size {
            return Err(Error::Config(format!(
                "maximum message size {} is below the minimum {}",
                self.max_size, self.min_size
            )));
        }
        if self.growth < 2 {
            return Err(Error::Config(format!("growth factor {} would not advance", self.growth)));
        }
        if self.iterations == 0 {
            return Err(Error::Config("at least one iteration per size is required".into()));
        }

        Ok(())
    }

    /// Message sizes in increasing order, the upper bound included
    pub fn sizes(&self) -> Sizes {
        Sizes {
            next: Some(self.min_size),
            max: self.max_size,
            growth: self.growth,
        }
    }
}

impl Default for SweepParams {
    fn default() -> Self {
        SweepParams::new(MIN_MSG_SIZE, MAX_MSG_SIZE, GROWTH_FACTOR, ITERATIONS)
    }
}

/// Geometric sequence of message sizes
#[derive(Clone, Debug)]
pub struct Sizes {
    next: Option<usize>,
    max: usize,
    growth: usize,
}

impl Iterator for Sizes {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let cur = self.next.filter(|&s| s <= self.max)?;
        // overflow ends the sequence
        self.next = cur.checked_mul(self.growth);
        Some(cur)
    }
}
