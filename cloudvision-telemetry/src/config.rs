//! Collector configuration

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cloudvision_common::{Format, KEY_PREFIX, LoggingConfig, ZenohConfig};

use crate::error::{ConfigError, Result};
use crate::gnmi;

/// Top-level configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// CloudVision connection and subscriptions
    pub cloudvision: CloudVisionSettings,

    /// Where grouped measurements are flushed to
    #[serde(default)]
    pub output: OutputConfig,

    /// Zenoh connection settings (used by the zenoh output)
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// CloudVision-specific settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudVisionSettings {
    /// CloudVision address (e.g., "cvp.example.com:443")
    pub address: String,

    /// Subscriptions requested for every streaming device
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionSpec>,

    /// gNMI encoding: "proto", "json", "json_ietf" or "bytes"
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Origin of the request prefix
    #[serde(default)]
    pub origin: String,

    /// Path of the request prefix
    #[serde(default)]
    pub prefix: String,

    /// Only send updates, skip the initial state dump
    #[serde(default)]
    pub updates_only: bool,

    /// CloudVision service account token
    #[serde(default)]
    pub token: Option<String>,

    /// Delay before redialing a failed stream, in milliseconds
    #[serde(default = "default_redial_ms")]
    pub redial_ms: u64,

    /// How often the inventory is polled for new devices, in milliseconds
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,

    /// Enable TLS on the gNMI connection
    #[serde(default)]
    pub enable_tls: bool,

    /// TLS client settings
    #[serde(default)]
    pub tls: TlsConfig,

    /// Additional measurement aliases: measurement name -> path
    #[serde(default)]
    pub aliases: HashMap<String, String>,

    /// Measurement name used when no alias or prefix applies
    #[serde(default = "default_measurement")]
    pub measurement: String,
}

/// TLS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    /// Path to CA certificate file
    #[serde(default)]
    pub ca_cert: Option<String>,

    /// Path to client certificate file
    #[serde(default)]
    pub client_cert: Option<String>,

    /// Path to client key file
    #[serde(default)]
    pub client_key: Option<String>,

    /// Override the server name used for certificate verification
    #[serde(default)]
    pub server_name: Option<String>,

    /// Skip certificate verification (not recommended for production)
    #[serde(default)]
    pub insecure_skip_verify: bool,
}

impl TlsConfig {
    /// Whether a client identity is configured.
    pub fn has_client_cert(&self) -> bool {
        self.client_cert.is_some() || self.client_key.is_some()
    }
}

/// A configured subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    /// Measurement name for updates under this path
    #[serde(default)]
    pub name: String,

    /// Path origin (e.g., "openconfig")
    #[serde(default)]
    pub origin: String,

    /// XPath-like path to subscribe to
    pub path: String,

    /// "on_change", "sample" or "target_defined"
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Sample interval in milliseconds (for SAMPLE mode)
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Suppress redundant updates
    #[serde(default)]
    pub suppress_redundant: bool,

    /// Heartbeat interval in milliseconds
    #[serde(default)]
    pub heartbeat_interval_ms: u64,

    /// Only feed the lookup table, used to annotate other measurements
    #[serde(default)]
    pub tag_only: bool,
}

/// Subscription mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionMode {
    /// Stream updates as they occur
    OnChange,

    /// Sample at fixed intervals
    Sample,

    /// Target determines update timing
    TargetDefined,
}

impl FromStr for SubscriptionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "on_change" => Ok(SubscriptionMode::OnChange),
            "sample" => Ok(SubscriptionMode::Sample),
            "target_defined" => Ok(SubscriptionMode::TargetDefined),
            _ => Err(ConfigError::InvalidSubscriptionMode(s.to_string())),
        }
    }
}

impl SubscriptionMode {
    /// Convert to gNMI proto mode value
    pub fn to_proto(self) -> i32 {
        match self {
            SubscriptionMode::OnChange => gnmi::SubscriptionMode::OnChange as i32,
            SubscriptionMode::Sample => gnmi::SubscriptionMode::Sample as i32,
            SubscriptionMode::TargetDefined => gnmi::SubscriptionMode::TargetDefined as i32,
        }
    }
}

/// gNMI encoding requested from CloudVision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Proto,
    Json,
    JsonIetf,
    Bytes,
}

impl FromStr for Encoding {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "proto" => Ok(Encoding::Proto),
            "json" => Ok(Encoding::Json),
            "json_ietf" => Ok(Encoding::JsonIetf),
            "bytes" => Ok(Encoding::Bytes),
            _ => Err(ConfigError::UnsupportedEncoding(s.to_string())),
        }
    }
}

impl Encoding {
    /// Convert to gNMI proto encoding value
    pub fn to_proto(self) -> i32 {
        match self {
            Encoding::Json => gnmi::Encoding::Json as i32,
            Encoding::Bytes => gnmi::Encoding::Bytes as i32,
            Encoding::Proto => gnmi::Encoding::Proto as i32,
            Encoding::JsonIetf => gnmi::Encoding::JsonIetf as i32,
        }
    }
}

/// Output settings for the collector binary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Output kind
    #[serde(default)]
    pub kind: OutputKind,

    /// Flush interval in milliseconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Key expression prefix for the zenoh output
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Payload format for the zenoh output
    #[serde(default)]
    pub serialization: Format,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: OutputKind::default(),
            flush_interval_ms: default_flush_interval(),
            key_prefix: default_key_prefix(),
            serialization: Format::default(),
        }
    }
}

/// Output kind
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// InfluxDB line protocol on stdout
    #[default]
    Stdout,

    /// Publish to Zenoh
    Zenoh,
}

fn default_encoding() -> String {
    "proto".to_string()
}

fn default_redial_ms() -> u64 {
    10_000
}

fn default_discovery_interval_ms() -> u64 {
    15_000
}

fn default_measurement() -> String {
    "arista_cloudvision_telemetry".to_string()
}

fn default_mode() -> String {
    "target_defined".to_string()
}

fn default_sample_interval() -> u64 {
    10_000 // 10 seconds
}

fn default_flush_interval() -> u64 {
    10_000
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

impl CollectorConfig {
    /// Load and validate configuration from a JSON5 file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = cloudvision_common::load_config(path)?;
        config.cloudvision.validate()?;
        Ok(config)
    }
}

impl CloudVisionSettings {
    /// Settings with defaults for everything but the address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            subscriptions: Vec::new(),
            encoding: default_encoding(),
            origin: String::new(),
            prefix: String::new(),
            updates_only: false,
            token: None,
            redial_ms: default_redial_ms(),
            discovery_interval_ms: default_discovery_interval_ms(),
            enable_tls: false,
            tls: TlsConfig::default(),
            aliases: HashMap::new(),
            measurement: default_measurement(),
        }
    }

    /// Delay between redial attempts.
    pub fn redial(&self) -> std::result::Result<Duration, ConfigError> {
        if self.redial_ms == 0 {
            return Err(ConfigError::InvalidRedial);
        }
        Ok(Duration::from_millis(self.redial_ms))
    }

    /// Interval between inventory polls.
    pub fn discovery_interval(&self) -> std::result::Result<Duration, ConfigError> {
        if self.discovery_interval_ms == 0 {
            return Err(ConfigError::InvalidDiscoveryInterval);
        }
        Ok(Duration::from_millis(self.discovery_interval_ms))
    }

    /// Configured token, ignoring empty strings.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref().filter(|t| !t.is_empty())
    }

    /// Names registered in the lookup table.
    pub fn tag_only_names(&self) -> impl Iterator<Item = &str> {
        self.subscriptions
            .iter()
            .filter(|s| s.tag_only)
            .map(|s| s.name.as_str())
    }

    /// Check the settings that do not depend on discovered targets.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.redial()?;
        self.discovery_interval()?;
        self.encoding.parse::<Encoding>()?;

        if self.token().is_some() && self.tls.has_client_cert() {
            return Err(ConfigError::TokenWithClientCert);
        }

        for sub in &self.subscriptions {
            sub.mode.parse::<SubscriptionMode>()?;
            if sub.tag_only && sub.name.is_empty() {
                return Err(ConfigError::TagOnlyWithoutName(sub.path.clone()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_config() {
        let json = r#"{
            cloudvision: {
                address: "cvp.example.com:443",
                token: "secret",
                encoding: "json",
                subscriptions: [
                    {
                        name: "ifcounters",
                        origin: "openconfig",
                        path: "/interfaces/interface/state/counters",
                        mode: "sample",
                        sample_interval_ms: 5000,
                    },
                    {
                        name: "ifdesc",
                        path: "/interfaces/interface/state/description",
                        mode: "on_change",
                        tag_only: true,
                    },
                ],
            },
            output: { kind: "zenoh", serialization: "cbor" },
        }"#;

        let config: CollectorConfig = json5::from_str(json).unwrap();
        let cv = &config.cloudvision;
        assert_eq!(cv.address, "cvp.example.com:443");
        assert_eq!(cv.subscriptions.len(), 2);
        assert_eq!(cv.subscriptions[0].sample_interval_ms, 5000);
        assert_eq!(cv.redial().unwrap(), Duration::from_secs(10));
        assert_eq!(cv.discovery_interval().unwrap(), Duration::from_secs(15));
        assert_eq!(cv.tag_only_names().collect::<Vec<_>>(), vec!["ifdesc"]);
        assert_eq!(config.output.kind, OutputKind::Zenoh);
        assert_eq!(config.output.serialization, Format::Cbor);
        assert!(cv.validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let cv = CloudVisionSettings::new("cvp");
        assert_eq!(cv.encoding, "proto");
        assert_eq!(cv.measurement, "arista_cloudvision_telemetry");
        assert!(cv.token().is_none());

        let output = OutputConfig::default();
        assert_eq!(output.kind, OutputKind::Stdout);
        assert_eq!(output.key_prefix, KEY_PREFIX);
    }

    #[test]
    fn test_subscription_modes() {
        assert_eq!(
            "SAMPLE".parse::<SubscriptionMode>().unwrap(),
            SubscriptionMode::Sample
        );
        assert_eq!(
            "on_change".parse::<SubscriptionMode>().unwrap(),
            SubscriptionMode::OnChange
        );
        assert_eq!(
            "target-defined".parse::<SubscriptionMode>().unwrap(),
            SubscriptionMode::TargetDefined
        );
        assert!(matches!(
            "poll".parse::<SubscriptionMode>(),
            Err(ConfigError::InvalidSubscriptionMode(_))
        ));
    }

    #[test]
    fn test_encoding_to_proto() {
        assert_eq!("json".parse::<Encoding>().unwrap().to_proto(), 0);
        assert_eq!("bytes".parse::<Encoding>().unwrap().to_proto(), 1);
        assert_eq!("proto".parse::<Encoding>().unwrap().to_proto(), 2);
        assert_eq!("json_ietf".parse::<Encoding>().unwrap().to_proto(), 4);
        assert_eq!("json-ietf".parse::<Encoding>().unwrap(), Encoding::JsonIetf);
        assert!(matches!(
            "ascii".parse::<Encoding>(),
            Err(ConfigError::UnsupportedEncoding(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_redial() {
        let mut cv = CloudVisionSettings::new("cvp");
        cv.redial_ms = 0;
        assert!(matches!(cv.validate(), Err(ConfigError::InvalidRedial)));
    }

    #[test]
    fn test_validate_rejects_token_with_client_cert() {
        let mut cv = CloudVisionSettings::new("cvp");
        cv.token = Some("secret".to_string());
        cv.tls.client_cert = Some("client.pem".to_string());
        assert!(matches!(
            cv.validate(),
            Err(ConfigError::TokenWithClientCert)
        ));
    }

    #[test]
    fn test_validate_rejects_unnamed_tag_only() {
        let mut cv = CloudVisionSettings::new("cvp");
        cv.subscriptions.push(SubscriptionSpec {
            name: String::new(),
            origin: String::new(),
            path: "/interfaces/interface/state/description".to_string(),
            mode: "on_change".to_string(),
            sample_interval_ms: 0,
            suppress_redundant: false,
            heartbeat_interval_ms: 0,
            tag_only: true,
        });
        assert!(matches!(
            cv.validate(),
            Err(ConfigError::TagOnlyWithoutName(_))
        ));
    }
}
