use std::time::{Duration, SystemTime};

use crate::Operation;

/// One timed, outcome-tagged measurement of a single operation invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub operation: Operation,
    pub latency: Duration,
    pub succeeded: bool,
    /// Wall-clock time at which the request was issued.
    pub timestamp: SystemTime,
}

impl Sample {
    #[must_use]
    pub fn new(operation: Operation, latency: Duration, succeeded: bool) -> Self {
        Self {
            operation,
            latency,
            succeeded,
            timestamp: SystemTime::now(),
        }
    }

    #[must_use]
    pub fn at(mut self, timestamp: SystemTime) -> Self {
        self.timestamp = timestamp;
        self
    }
}
