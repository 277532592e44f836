//! Measurement output for the collector binary
//!
//! Measurements are buffered from the accumulator channel and flushed on a
//! timer, either to Zenoh or to stdout as InfluxDB line protocol.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use cloudvision_common::{Format, KeyExprBuilder, Measurement, encode};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Publishes measurements to Zenoh under `<prefix>/<host>/<measurement>`.
#[derive(Clone, Debug)]
pub struct ZenohPublisher {
    session: Arc<zenoh::Session>,
    keys: KeyExprBuilder,
    format: Format,
}

impl ZenohPublisher {
    pub fn new(session: Arc<zenoh::Session>, key_prefix: impl Into<String>, format: Format) -> Self {
        Self {
            session,
            keys: KeyExprBuilder::new(key_prefix),
            format,
        }
    }

    /// Key expression a measurement is published on.
    pub fn key_for(&self, measurement: &Measurement) -> String {
        self.keys.build(publish_host(measurement), &measurement.name)
    }

    pub async fn publish(&self, measurement: &Measurement) -> cloudvision_common::Result<()> {
        let key = self.key_for(measurement);
        let payload = encode(measurement, self.format)?;
        self.session.put(&key, payload).await?;
        Ok(())
    }
}

/// Host chunk of the key: the device FQDN, else its target id.
fn publish_host(measurement: &Measurement) -> &str {
    measurement
        .host()
        .filter(|h| !h.is_empty())
        .or_else(|| measurement.tags.get("host-id").map(String::as_str))
        .unwrap_or_default()
}

/// Where flushed measurements go.
#[derive(Clone, Debug)]
pub enum Output {
    /// InfluxDB line protocol on stdout
    Stdout,
    /// Zenoh publications
    Zenoh(ZenohPublisher),
}

impl Output {
    /// Write a batch, counting successes and failures.
    pub async fn flush(&self, batch: &[Measurement]) -> PublishStats {
        let mut stats = PublishStats::default();

        match self {
            Output::Stdout => {
                let mut stdout = std::io::stdout().lock();
                for measurement in batch {
                    let written = match measurement.to_line_protocol() {
                        Some(line) => writeln!(stdout, "{}", line).is_ok(),
                        None => false,
                    };
                    stats.record(written);
                }
                if stdout.flush().is_err() {
                    warn!("Failed to flush stdout");
                }
            }
            Output::Zenoh(publisher) => {
                for measurement in batch {
                    match publisher.publish(measurement).await {
                        Ok(()) => stats.record(true),
                        Err(e) => {
                            stats.record(false);
                            warn!(error = %e, measurement = %measurement.name, "Failed to publish measurement");
                        }
                    }
                }
            }
        }

        stats
    }
}

/// Statistics from flushing measurements.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishStats {
    /// Number of measurements written.
    pub success: usize,
    /// Number of measurements dropped.
    pub failed: usize,
}

impl PublishStats {
    pub fn total(&self) -> usize {
        self.success + self.failed
    }

    fn record(&mut self, ok: bool) {
        if ok {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }
}

impl std::ops::AddAssign for PublishStats {
    fn add_assign(&mut self, other: Self) {
        self.success += other.success;
        self.failed += other.failed;
    }
}

/// Buffer measurements from `rx` and flush them every `flush_interval`.
///
/// Stops on cancellation or when every sender is gone, flushing whatever is
/// still buffered. Returns the totals over the whole run.
pub async fn run(
    output: Output,
    mut rx: mpsc::UnboundedReceiver<Measurement>,
    flush_interval: Duration,
    cancel: CancellationToken,
) -> PublishStats {
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut buffer = Vec::new();
    let mut totals = PublishStats::default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = rx.recv() => match received {
                Some(measurement) => buffer.push(measurement),
                None => break,
            },
            _ = ticker.tick() => {
                if !buffer.is_empty() {
                    let stats = output.flush(&buffer).await;
                    debug!(success = stats.success, failed = stats.failed, "Flushed measurements");
                    totals += stats;
                    buffer.clear();
                }
            }
        }
    }

    while let Ok(measurement) = rx.try_recv() {
        buffer.push(measurement);
    }
    totals += output.flush(&buffer).await;

    info!(
        total = totals.total(),
        failed = totals.failed,
        "Output stopped"
    );
    totals
}
