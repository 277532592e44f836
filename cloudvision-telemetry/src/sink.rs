//! Accumulator interface receiving grouped measurements.

use cloudvision_common::Measurement;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::error::Error;

/// Downstream sink for measurements and out-of-band errors.
pub trait Accumulator: Send + Sync {
    /// Accept one grouped measurement.
    fn add_measurement(&self, measurement: Measurement);

    /// Report a non-fatal error.
    fn add_error(&self, error: &Error);
}

/// Accumulator forwarding measurements to a channel drained by the output task.
#[derive(Debug, Clone)]
pub struct ChannelAccumulator {
    tx: mpsc::UnboundedSender<Measurement>,
}

impl ChannelAccumulator {
    /// Create an accumulator and the receiving end of its channel.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Measurement>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Accumulator for ChannelAccumulator {
    fn add_measurement(&self, measurement: Measurement) {
        if self.tx.send(measurement).is_err() {
            warn!("Output channel closed, dropping measurement");
        }
    }

    fn add_error(&self, error: &Error) {
        error!(error = %error, "Collector error");
    }
}

/// Accumulator keeping everything in memory.
#[derive(Debug, Default)]
pub struct MemoryAccumulator {
    measurements: Mutex<Vec<Measurement>>,
    errors: Mutex<Vec<String>>,
}

impl MemoryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Measurements received so far.
    pub fn measurements(&self) -> Vec<Measurement> {
        self.measurements.lock().clone()
    }

    /// Rendered errors received so far.
    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().clone()
    }
}

impl Accumulator for MemoryAccumulator {
    fn add_measurement(&self, measurement: Measurement) {
        self.measurements.lock().push(measurement);
    }

    fn add_error(&self, error: &Error) {
        self.errors.lock().push(error.to_string());
    }
}
