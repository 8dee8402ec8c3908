//! `kitting-runtime` – the fulfillment engine.
//!
//! Turns incoming orders into IK-feasible approach poses, one product at a
//! time, newest work first.
//!
//! # Modules
//!
//! - [`fulfillment`] – [`FulfillmentDriver`][fulfillment::FulfillmentDriver]:
//!   the order → shipment → product state machine that drives the
//!   locate → resolve → transform → solve pipeline and reports every product.
//! - [`start_handshake`] – [`StartHandshake`][start_handshake::StartHandshake]:
//!   triggers the competition, retrying while the service is unreachable.
//! - [`locator`] / [`kinematics`] – thin wrappers over the material-location
//!   and IK services that normalise their failures.
//! - [`context`] / [`order_queue`] – the state shared between bus delivery and
//!   the driver.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber, with optional OTLP span export when
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` is set.

pub mod context;
pub mod fulfillment;
pub mod kinematics;
pub mod locator;
pub mod order_queue;
pub mod start_handshake;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use context::FulfillmentContext;
pub use fulfillment::{
    DriverState, FulfillmentConfig, FulfillmentDriver, FulfillmentServices, StepOutcome,
};
pub use order_queue::OrderQueue;
pub use start_handshake::{HandshakeOutcome, StartHandshake};
pub use telemetry::{TracerProviderGuard, init_tracing};
