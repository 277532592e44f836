//! Streaming telemetry collector for Arista CloudVision
//!
//! Discovers streaming devices through the CloudVision inventory API, opens
//! one gNMI subscription per device and turns the updates into grouped,
//! tagged measurements handed to an [`Accumulator`].

pub mod collector;
pub mod config;
pub mod discovery;
pub mod error;
pub mod flatten;
pub mod grouper;
pub mod handler;
pub mod lookup;
pub mod output;
pub mod path;
pub mod planner;
pub mod sink;
pub mod subscriber;
pub mod transport;

// Include the generated protobuf code
pub mod gnmi {
    tonic::include_proto!("gnmi");
}

pub use collector::Collector;
pub use config::{CloudVisionSettings, CollectorConfig, SubscriptionSpec};
pub use discovery::{DeviceDiscovery, DeviceMap, InventoryClient};
pub use error::{Error, Result};
pub use handler::ResponseHandler;
pub use sink::{Accumulator, ChannelAccumulator, MemoryAccumulator};
pub use subscriber::StreamSubscriber;
