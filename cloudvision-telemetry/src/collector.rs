//! Collector lifecycle
//!
//! `start` validates the configuration, resets shared state and spawns the
//! discovery task. Discovery polls the inventory and spawns one subscriber
//! per newly streaming device. `stop` cancels every task and waits for them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::CloudVisionSettings;
use crate::discovery::{DeviceDiscovery, DeviceMap};
use crate::error::{Error, Result};
use crate::handler::ResponseHandler;
use crate::lookup::LookupTable;
use crate::path;
use crate::planner::{self, RequestOptions};
use crate::sink::Accumulator;
use crate::subscriber::StreamSubscriber;
use crate::transport::Transport;

/// CloudVision telemetry collector.
pub struct Collector<D: DeviceDiscovery> {
    settings: Arc<CloudVisionSettings>,
    discovery: Arc<D>,
    lookup: Arc<LookupTable>,
    devices: Arc<DeviceMap>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    running: bool,
}

impl<D: DeviceDiscovery> Collector<D> {
    pub fn new(settings: CloudVisionSettings, discovery: D) -> Self {
        Self {
            settings: Arc::new(settings),
            discovery: Arc::new(discovery),
            lookup: Arc::new(LookupTable::new()),
            devices: Arc::new(DeviceMap::new()),
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: false,
        }
    }

    /// Devices discovered so far.
    pub fn devices(&self) -> Arc<DeviceMap> {
        self.devices.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Validate the configuration and spawn the discovery task.
    ///
    /// Returns once the task is spawned. Only configuration errors are
    /// returned; everything later is reported to `acc`. Must be called from
    /// within a Tokio runtime.
    pub fn start(&mut self, acc: Arc<dyn Accumulator>) -> Result<()> {
        if self.running {
            warn!("Collector already started");
            return Ok(());
        }

        let settings = &self.settings;
        settings.validate()?;
        let redial = settings.redial()?;
        let interval = settings.discovery_interval()?;

        // Planning with no targets checks every path, mode and the encoding.
        planner::build(&settings.subscriptions, &[], RequestOptions::from(settings.as_ref()))?;

        let aliases = path::build_aliases(&settings.subscriptions, &settings.aliases)?;
        let transport = Transport::from_settings(settings)?;

        self.lookup.reset(settings.tag_only_names());
        self.devices.clear();

        let handler = ResponseHandler::new(
            Arc::new(aliases),
            self.lookup.clone(),
            self.devices.clone(),
            settings.measurement.clone(),
        );

        self.cancel = CancellationToken::new();
        self.tracker = TaskTracker::new();

        let task = DiscoveryTask {
            settings: settings.clone(),
            discovery: self.discovery.clone(),
            devices: self.devices.clone(),
            handler,
            transport,
            accumulator: acc,
            redial,
            interval,
            cancel: self.cancel.clone(),
            tracker: self.tracker.clone(),
        };
        self.tracker.spawn(task.run());
        self.running = true;

        info!(
            address = %settings.address,
            subscriptions = settings.subscriptions.len(),
            "Collector started"
        );
        Ok(())
    }

    /// Cancel all tasks and wait for them to finish.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        if self.running {
            info!("Collector stopped");
        }
        self.running = false;
    }
}

struct DiscoveryTask<D> {
    settings: Arc<CloudVisionSettings>,
    discovery: Arc<D>,
    devices: Arc<DeviceMap>,
    handler: ResponseHandler,
    transport: Transport,
    accumulator: Arc<dyn Accumulator>,
    redial: Duration,
    interval: Duration,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl<D: DeviceDiscovery> DiscoveryTask<D> {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let discovered = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.discovery.discover() => result,
            };

            match discovered {
                Ok(devices) => self.subscribe_new(&devices),
                Err(e) => {
                    warn!(error = %e, "Device discovery failed");
                    self.accumulator.add_error(&Error::Discovery(e));
                }
            }
        }

        debug!("Discovery task stopped");
    }

    /// Spawn subscribers for targets not seen before.
    fn subscribe_new(&self, discovered: &HashMap<String, String>) {
        let targets = self.devices.merge(discovered);
        if targets.is_empty() {
            return;
        }

        let requests = match planner::build(
            &self.settings.subscriptions,
            &targets,
            RequestOptions::from(self.settings.as_ref()),
        ) {
            Ok(requests) => requests,
            Err(e) => {
                error!(error = %e, "Cannot build subscribe requests");
                self.accumulator.add_error(&e);
                return;
            }
        };

        info!(count = targets.len(), "Subscribing to new devices");

        for (target, request) in targets.into_iter().zip(requests) {
            let subscriber = StreamSubscriber::new(
                target,
                request,
                self.transport.clone(),
                self.handler.clone(),
                self.accumulator.clone(),
                self.redial,
            );
            self.tracker.spawn(subscriber.run(self.cancel.clone()));
        }
    }
}
