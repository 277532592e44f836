//! gNMI subscription stream for one target

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Result, TransportError};
use crate::gnmi::SubscribeRequest;
use crate::handler::ResponseHandler;
use crate::sink::Accumulator;
use crate::transport::Transport;

/// How a subscription session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    /// The server closed the response stream.
    Closed,
    /// The collector is stopping.
    Cancelled,
}

/// Streams one subscribe request and redials on failure.
pub struct StreamSubscriber {
    target: String,
    request: SubscribeRequest,
    transport: Transport,
    handler: ResponseHandler,
    accumulator: Arc<dyn Accumulator>,
    redial: Duration,
}

impl StreamSubscriber {
    pub fn new(
        target: impl Into<String>,
        request: SubscribeRequest,
        transport: Transport,
        handler: ResponseHandler,
        accumulator: Arc<dyn Accumulator>,
        redial: Duration,
    ) -> Self {
        Self {
            target: target.into(),
            request,
            transport,
            handler,
            accumulator,
            redial,
        }
    }

    /// Run until `cancel` fires.
    ///
    /// Failed sessions are reported to the accumulator. Every session end
    /// other than cancellation is followed by a redial after the configured
    /// delay.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            target = %self.target,
            address = %self.transport.address(),
            tls = self.transport.is_tls(),
            "Starting gNMI subscription"
        );

        loop {
            match self.subscribe_once(&cancel).await {
                Ok(SessionEnd::Cancelled) => break,
                Ok(SessionEnd::Closed) => {
                    info!(target = %self.target, "Subscription closed by server");
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    error!(
                        target = %self.target,
                        error = %e,
                        redial_ms = self.redial.as_millis() as u64,
                        "Subscription failed"
                    );
                    self.accumulator.add_error(&e);
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.redial) => {}
            }
        }

        debug!(target = %self.target, "Subscription task stopped");
    }

    async fn subscribe_once(&self, cancel: &CancellationToken) -> Result<SessionEnd> {
        let mut client = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            client = self.transport.connect() => client?,
        };

        // The request stream stays open until this session ends.
        let (tx, rx) = mpsc::channel(1);
        if tx.send(self.request.clone()).await.is_err() {
            warn!(target = %self.target, "Request stream closed before sending");
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
            response = client.subscribe(ReceiverStream::new(rx)) => {
                response.map_err(TransportError::Subscribe)?
            }
        };
        let mut stream = response.into_inner();

        info!(target = %self.target, "Connection to gNMI device established");

        loop {
            let message = tokio::select! {
                _ = cancel.cancelled() => return Ok(SessionEnd::Cancelled),
                message = stream.message() => message,
            };

            match message {
                Ok(Some(response)) => {
                    self.handler
                        .handle(&self.target, response, self.accumulator.as_ref());
                }
                Ok(None) => return Ok(SessionEnd::Closed),
                Err(status) => return Err(TransportError::Receive(status).into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CloudVisionSettings;
    use crate::discovery::DeviceMap;
    use crate::lookup::LookupTable;
    use crate::path::Aliases;
    use crate::sink::MemoryAccumulator;

    fn subscriber(address: &str, acc: Arc<MemoryAccumulator>) -> StreamSubscriber {
        let transport = Transport::from_settings(&CloudVisionSettings::new(address)).unwrap();
        let handler = ResponseHandler::new(
            Arc::new(Aliases::new()),
            Arc::new(LookupTable::new()),
            Arc::new(DeviceMap::new()),
            "arista_cloudvision_telemetry",
        );
        StreamSubscriber::new(
            "JPE1",
            SubscribeRequest::default(),
            transport,
            handler,
            acc,
            Duration::from_millis(20),
        )
    }

    #[tokio::test]
    async fn test_cancelled_before_dial() {
        let acc = Arc::new(MemoryAccumulator::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(
            Duration::from_secs(5),
            subscriber("127.0.0.1:1", acc.clone()).run(cancel),
        )
        .await
        .unwrap();
        assert!(acc.errors().is_empty());
    }

    #[tokio::test]
    async fn test_dial_failures_are_reported_and_retried() {
        let acc = Arc::new(MemoryAccumulator::new());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(subscriber("127.0.0.1:1", acc.clone()).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();

        let errors = acc.errors();
        assert!(errors.len() >= 2, "expected retries, got {:?}", errors);
        assert!(errors[0].contains("127.0.0.1:1"));
        assert!(acc.measurements().is_empty());
    }
}
