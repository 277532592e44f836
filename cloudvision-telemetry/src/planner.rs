//! Subscribe request planning
//!
//! Builds one STREAM request per target, each carrying every configured
//! subscription resolved against that target.

use crate::config::{CloudVisionSettings, Encoding, SubscriptionMode, SubscriptionSpec};
use crate::error::Result;
use crate::gnmi::{self, SubscribeRequest, SubscriptionList};
use crate::path;

/// Request-wide settings shared by every target.
#[derive(Debug, Clone, Copy)]
pub struct RequestOptions<'a> {
    pub prefix_origin: &'a str,
    pub prefix_path: &'a str,
    pub encoding: &'a str,
    pub updates_only: bool,
}

impl<'a> From<&'a CloudVisionSettings> for RequestOptions<'a> {
    fn from(settings: &'a CloudVisionSettings) -> Self {
        Self {
            prefix_origin: &settings.origin,
            prefix_path: &settings.prefix,
            encoding: &settings.encoding,
            updates_only: settings.updates_only,
        }
    }
}

/// Build one subscribe request per target.
///
/// The output has one entry per target, in target order. Request `j`
/// carries the subscriptions for `targets[j]` in configuration order.
/// Calling with no targets still validates paths, modes and encoding.
pub fn build(
    specs: &[SubscriptionSpec],
    targets: &[String],
    options: RequestOptions<'_>,
) -> Result<Vec<SubscribeRequest>> {
    let mut per_target: Vec<Vec<gnmi::Subscription>> = targets
        .iter()
        .map(|_| Vec::with_capacity(specs.len()))
        .collect();

    for spec in specs {
        let paths = path::parse(&spec.origin, &spec.path, targets)?;
        let mode: SubscriptionMode = spec.mode.parse()?;

        for (subscriptions, path) in per_target.iter_mut().zip(paths) {
            subscriptions.push(gnmi::Subscription {
                path: Some(path),
                mode: mode.to_proto(),
                sample_interval: millis_to_nanos(spec.sample_interval_ms),
                suppress_redundant: spec.suppress_redundant,
                heartbeat_interval: millis_to_nanos(spec.heartbeat_interval_ms),
            });
        }
    }

    let prefixes = path::parse(options.prefix_origin, options.prefix_path, targets)?;
    let encoding: Encoding = options.encoding.parse()?;

    Ok(prefixes
        .into_iter()
        .zip(per_target)
        .map(|(prefix, subscription)| SubscribeRequest {
            request: Some(gnmi::subscribe_request::Request::Subscribe(
                SubscriptionList {
                    prefix: Some(prefix),
                    subscription,
                    mode: gnmi::subscription_list::Mode::Stream as i32,
                    encoding: encoding.to_proto(),
                    updates_only: options.updates_only,
                    ..Default::default()
                },
            )),
        })
        .collect())
}

/// gNMI intervals are nanoseconds. Huge values clamp to `u64::MAX`.
fn millis_to_nanos(ms: u64) -> u64 {
    ms.saturating_mul(1_000_000)
}

/// Target a request was built for.
pub fn request_target(request: &SubscribeRequest) -> Option<&str> {
    match &request.request {
        Some(gnmi::subscribe_request::Request::Subscribe(list)) => {
            list.prefix.as_ref().map(|p| p.target.as_str())
        }
        _ => None,
    }
}
