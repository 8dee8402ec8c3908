//! `kitting-perception` – where is the part, and where is it relative to the
//! arm?
//!
//! # Modules
//!
//! - [`sensor_store`] – [`SensorStateStore`][sensor_store::SensorStateStore]:
//!   latest snapshot per logical camera, last-write-wins, lock-free reads.
//! - [`resolver`] – [`PoseResolver`][resolver::PoseResolver]: maps a storage
//!   unit onto its camera and finds the first detection of the wanted type.
//! - [`transform`] – [`TfTree`][transform::TfTree] and
//!   [`TfBuffer`][transform::TfBuffer]: a bidirectional frame graph fed by
//!   `/tf`, with time-bounded lookups.
//! - [`frame_stage`] – [`FrameTransformStage`][frame_stage::FrameTransformStage]:
//!   camera-frame pose → robot-base approach pose.

pub mod frame_stage;
pub mod resolver;
pub mod sensor_store;
pub mod transform;
