//! Request/response seams to the outside world.
//!
//! The fulfillment pipeline never talks to a transport directly; it calls
//! these traits. [`RosbridgeClient`][crate::rosbridge_client::RosbridgeClient]
//! implements the RPC ones over a WebSocket, the transform buffer in
//! `kitting-perception` implements [`TransformProvider`], and tests plug in
//! scripted mocks.
//!
//! Every method reports "could not reach the service" as
//! [`KitError::Transport`]; callers decide how to reclassify it.

use std::time::Duration;

use async_trait::async_trait;
use kitting_types::{JointSolution, KitError, Pose, StorageUnit, Transform};
use serde::{Deserialize, Serialize};

/// Response of a `std_srvs/Trigger` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

/// Response of the `pose_ik` service.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoseIkResponse {
    pub num_sols: i32,
    #[serde(default)]
    pub joint_solutions: Vec<RawJointSolution>,
}

/// One solution as sent on the wire. The angle count is only checked when
/// converting to [`JointSolution`].
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawJointSolution {
    pub joint_angles: Vec<f64>,
}

impl RawJointSolution {
    /// Returns `None` when the wire message carries fewer than six angles.
    pub fn to_solution(&self) -> Option<JointSolution> {
        let angles = self.joint_angles.get(..kitting_types::JOINT_COUNT)?;
        let mut joint_angles = [0.0; kitting_types::JOINT_COUNT];
        joint_angles.copy_from_slice(angles);
        Some(JointSolution { joint_angles })
    }
}

/// The start-competition trigger.
#[async_trait]
pub trait CompetitionControl: Send + Sync {
    async fn start_competition(&self) -> Result<TriggerResponse, KitError>;
}

/// Asks where a material type may be stored.
#[async_trait]
pub trait MaterialLocationService: Send + Sync {
    async fn material_locations(&self, material_type: &str)
    -> Result<Vec<StorageUnit>, KitError>;
}

/// Looks up the latest transform that maps points in `source_frame` into
/// `target_frame`, waiting at most `timeout` for it to become available.
#[async_trait]
pub trait TransformProvider: Send + Sync {
    async fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        timeout: Duration,
    ) -> Result<Transform, KitError>;
}

/// The inverse-kinematics solver.
#[async_trait]
pub trait InverseKinematicsService: Send + Sync {
    async fn pose_ik(&self, part_pose: &Pose) -> Result<PoseIkResponse, KitError>;
}
