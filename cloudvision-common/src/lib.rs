//! CloudVision telemetry common library
//!
//! Shared types and utilities for the CloudVision gNMI collector:
//!
//! - [`measurement`] - Measurement data model (`Measurement`, `FieldValue`, `Tags`)
//! - [`serialization`] - JSON/CBOR payload encoding
//! - [`config`] - Configuration loading (JSON5 format)
//! - [`session`] - Zenoh session management
//! - [`keyexpr`] - Key expressions measurements are published on
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod keyexpr;
pub mod measurement;
pub mod serialization;
pub mod session;

pub use config::{LogFormat, LoggingConfig, ZenohConfig, ZenohMode, load_config, parse_config};
pub use error::{Error, Result};
pub use keyexpr::{KEY_PREFIX, KeyExprBuilder, sanitize_chunk};
pub use measurement::{FieldValue, Measurement, Tags};
pub use serialization::{Format, encode};
pub use session::connect;

/// Install the global tracing subscriber.
///
/// Output goes to stderr so stdout stays free for line protocol. `RUST_LOG`
/// overrides `config.level` when set.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (text, json) = match config.format {
        LogFormat::Text => (Some(fmt::layer().with_writer(std::io::stderr)), None),
        LogFormat::Json => (
            None,
            Some(fmt::layer().json().with_writer(std::io::stderr)),
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
        .map_err(|e| Error::Config(format!("tracing already initialized: {}", e)))
}
