/// Default key expression prefix for published measurements.
pub const KEY_PREFIX: &str = "cloudvision/telemetry";

/// Builder for the Zenoh key expressions measurements are published on.
///
/// Key expressions follow the pattern:
/// `<prefix>/<host>/<measurement>`
#[derive(Debug, Clone)]
pub struct KeyExprBuilder {
    prefix: String,
}

impl Default for KeyExprBuilder {
    fn default() -> Self {
        Self::new(KEY_PREFIX)
    }
}

impl KeyExprBuilder {
    /// Create a builder with a custom prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
        }
    }

    /// The configured prefix.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build the key expression for a measurement from a host.
    ///
    /// # Example
    /// ```
    /// use cloudvision_common::keyexpr::KeyExprBuilder;
    ///
    /// let builder = KeyExprBuilder::new("cloudvision/telemetry");
    /// let key = builder.build("leaf1.example.com", "interfaces");
    /// assert_eq!(key, "cloudvision/telemetry/leaf1.example.com/interfaces");
    /// ```
    pub fn build(&self, host: &str, measurement: &str) -> String {
        format!(
            "{}/{}/{}",
            self.prefix,
            sanitize_chunk(host),
            sanitize_chunk(measurement)
        )
    }
}

/// Make a string usable as a single key expression chunk.
///
/// Separators and wildcard characters are replaced with `_`; an empty
/// string becomes `_` since empty chunks are invalid.
pub fn sanitize_chunk(chunk: &str) -> String {
    if chunk.is_empty() {
        return "_".to_string();
    }

    chunk
        .chars()
        .map(|c| match c {
            '/' | '*' | '$' | '?' | '#' | ' ' => '_',
            other => other,
        })
        .collect()
}
