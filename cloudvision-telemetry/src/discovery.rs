//! Device discovery through the CloudVision inventory API
//!
//! The inventory endpoint streams newline-delimited JSON records, one per
//! device. Only devices currently streaming telemetry are kept.

use std::collections::HashMap;
use std::future::Future;

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::DiscoveryError;

/// Streaming status value for devices we subscribe to.
pub const STREAMING_STATUS_ACTIVE: &str = "STREAMING_STATUS_ACTIVE";

/// Source of currently-streaming devices.
///
/// Returns a mapping from device FQDN to device id (the gNMI target).
pub trait DeviceDiscovery: Send + Sync + 'static {
    fn discover(
        &self,
    ) -> impl Future<Output = Result<HashMap<String, String>, DiscoveryError>> + Send;
}

/// One record of the inventory listing.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InventoryRecord {
    result: InventoryResult,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct InventoryResult {
    value: DeviceValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeviceValue {
    key: DeviceKey,
    fqdn: String,
    hostname: String,
    streaming_status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeviceKey {
    device_id: String,
}

/// Parse an inventory listing into FQDN -> device id for streaming devices.
///
/// Lines that are not valid records are skipped.
pub fn parse_inventory(body: &str) -> HashMap<String, String> {
    let mut devices = HashMap::new();

    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let record: InventoryRecord = match serde_json::from_str(line) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "Skipping unparsable inventory record");
                continue;
            }
        };

        let device = record.result.value;
        if device.streaming_status == STREAMING_STATUS_ACTIVE && !device.key.device_id.is_empty() {
            debug!(
                fqdn = %device.fqdn,
                hostname = %device.hostname,
                device_id = %device.key.device_id,
                "Streaming device"
            );
            devices.insert(device.fqdn, device.key.device_id);
        }
    }

    devices
}

/// HTTP client for the CloudVision inventory API.
#[derive(Debug, Clone)]
pub struct InventoryClient {
    http: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl InventoryClient {
    /// Create a client for the CloudVision instance at `address`.
    pub fn new(address: &str, token: Option<&str>) -> Result<Self, DiscoveryError> {
        // CloudVision commonly runs with a self-signed certificate.
        let http = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(DiscoveryError::Client)?;

        Ok(Self {
            http,
            url: inventory_url(address),
            token: token.map(str::to_string),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn inventory_url(address: &str) -> String {
    format!("https://{}/api/resources/inventory/v1/Device/all", address)
}

impl DeviceDiscovery for InventoryClient {
    async fn discover(&self) -> Result<HashMap<String, String>, DiscoveryError> {
        let request_error = |source| DiscoveryError::Request {
            url: self.url.clone(),
            source,
        };

        let mut request = self
            .http
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "application/json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let body = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(request_error)?
            .text()
            .await
            .map_err(request_error)?;

        let devices = parse_inventory(&body);
        info!(count = devices.len(), "Discovered streaming devices");
        Ok(devices)
    }
}

/// Known devices: target id -> FQDN.
///
/// Written by the discovery task, read by every decoder.
#[derive(Debug, Default)]
pub struct DeviceMap {
    devices: RwLock<HashMap<String, String>>,
}

impl DeviceMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.devices.write().clear();
    }

    /// FQDN of a target, if known.
    pub fn fqdn(&self, target: &str) -> Option<String> {
        self.devices.read().get(target).cloned()
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Record discovered devices (FQDN -> target) and return the targets not seen before, sorted.
    ///
    /// Known targets are left untouched, including ones missing from `discovered`.
    pub fn merge(&self, discovered: &HashMap<String, String>) -> Vec<String> {
        let mut devices = self.devices.write();
        let mut added = Vec::new();

        for (fqdn, target) in discovered {
            if !devices.contains_key(target) {
                devices.insert(target.clone(), fqdn.clone());
                added.push(target.clone());
            }
        }

        added.sort();
        added
    }
}
