//! Error types for the CloudVision collector.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level collector error.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration. Fatal to `Collector::start` and request planning.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Malformed gNMI path string.
    #[error(transparent)]
    Path(#[from] PathError),

    /// Dial, send or receive failure on a subscription stream.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A single update record could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The inventory listing could not be fetched.
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    /// Shared library error (config files, Zenoh, serialization).
    #[error(transparent)]
    Common(#[from] cloudvision_common::Error),
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("redial duration must be positive")]
    InvalidRedial,

    #[error("discovery interval must be positive")]
    InvalidDiscoveryInterval,

    #[error("unsupported encoding {0}")]
    UnsupportedEncoding(String),

    #[error("invalid subscription mode {0}")]
    InvalidSubscriptionMode(String),

    #[error("token authentication cannot be combined with TLS client certificates")]
    TokenWithClientCert,

    #[error("tag-only subscription on {0} needs a name")]
    TagOnlyWithoutName(String),

    #[error("token is not a valid metadata value")]
    InvalidToken,

    #[error("TLS configuration error: {0}")]
    Tls(String),
}

/// Path parsing errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path does not start with a '/': {0}")]
    MissingLeadingSlash(String),

    #[error("invalid gNMI path {path}: {reason} in {fragment:?}")]
    Syntax {
        path: String,
        fragment: String,
        reason: &'static str,
    },
}

/// Errors on the gNMI transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {address}: {source}")]
    Endpoint {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to dial {address}: {source}")]
    Dial {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },

    #[error("failed to setup subscription: {0}")]
    Subscribe(tonic::Status),

    #[error("aborted gNMI subscription: {0}")]
    Receive(tonic::Status),
}

/// Errors decoding a single update.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to parse JSON value at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("discarded empty value at {0}")]
    MissingValue(String),

    #[error("invalid empty path: {0:?}")]
    EmptyFieldKey(String),
}

/// Errors fetching the device inventory.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot build inventory client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("inventory request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}
