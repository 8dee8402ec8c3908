//! `kitting-middleware` – message plumbing between the competition world and
//! the fulfillment pipeline.
//!
//! # Modules
//!
//! - [`bus`] – topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.
//! - [`services`] – the request/response seams the pipeline calls out to:
//!   competition start, material location, transform lookup, and pose IK.
//! - [`ros_bridge`] – [`RosBridge`]: turns rosbridge JSON topic messages
//!   (orders, logical cameras, `/tf`) into bus events.
//! - [`rosbridge_client`] – [`RosbridgeClient`]: a rosbridge v2 WebSocket
//!   client that feeds subscriptions into [`RosBridge`] and implements the
//!   outbound RPC services.

pub mod bus;
pub mod ros_bridge;
pub mod rosbridge_client;
pub mod services;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use ros_bridge::RosBridge;
pub use rosbridge_client::RosbridgeClient;
pub use services::{
    CompetitionControl, InverseKinematicsService, MaterialLocationService, PoseIkResponse,
    RawJointSolution, TransformProvider, TriggerResponse,
};
