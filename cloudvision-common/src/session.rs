use zenoh::Session;

use crate::config::ZenohConfig;
use crate::error::{Error, Result};

/// `(key, json5 value)` pairs inserted into the Zenoh config.
fn config_entries(config: &ZenohConfig) -> Result<Vec<(&'static str, String)>> {
    let mut entries = vec![("mode", serde_json::to_string(config.mode.as_str())?)];

    for (key, endpoints) in [
        ("connect/endpoints", &config.connect),
        ("listen/endpoints", &config.listen),
    ] {
        if !endpoints.is_empty() {
            entries.push((key, serde_json::to_string(endpoints)?));
        }
    }
    Ok(entries)
}

/// Open the Zenoh session used for publishing measurements.
pub async fn connect(config: &ZenohConfig) -> Result<Session> {
    let mut zenoh_config = zenoh::Config::default();

    for (key, value) in config_entries(config)? {
        zenoh_config
            .insert_json5(key, &value)
            .map_err(|e| Error::Config(format!("zenoh {}: {}", key, e)))?;
    }

    tracing::info!(
        mode = %config.mode,
        connect = ?config.connect,
        listen = ?config.listen,
        "Opening Zenoh session"
    );

    let session = zenoh::open(zenoh_config).await?;
    tracing::info!(zid = %session.zid(), "Zenoh session open");

    Ok(session)
}
