//! Camera-frame pose → robot-base pose, lifted to a pre-grasp standoff.

use std::sync::Arc;
use std::time::Duration;

use kitting_middleware::TransformProvider;
use kitting_types::{KitError, Point, Pose};
use tracing::debug;

use crate::transform::apply_transform;

pub const DEFAULT_ROBOT_BASE_FRAME: &str = "arm1_base_link";
pub const DEFAULT_STANDOFF_M: f64 = 0.10;
pub const DEFAULT_TRANSFORM_TIMEOUT: Duration = Duration::from_secs(10);

/// Frame id of the logical camera observing `unit_id`.
pub fn sensor_frame_for(unit_id: &str) -> String {
    format!("logical_camera_{unit_id}_frame")
}

pub struct FrameTransformStage {
    provider: Arc<dyn TransformProvider>,
    robot_base_frame: String,
    standoff: f64,
    timeout: Duration,
}

impl FrameTransformStage {
    pub fn new(provider: Arc<dyn TransformProvider>) -> Self {
        Self {
            provider,
            robot_base_frame: DEFAULT_ROBOT_BASE_FRAME.to_string(),
            standoff: DEFAULT_STANDOFF_M,
            timeout: DEFAULT_TRANSFORM_TIMEOUT,
        }
    }

    pub fn with_robot_base_frame(mut self, frame: impl Into<String>) -> Self {
        self.robot_base_frame = frame.into();
        self
    }

    pub fn with_standoff(mut self, metres: f64) -> Self {
        self.standoff = metres;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn robot_base_frame(&self) -> &str {
        &self.robot_base_frame
    }

    /// Express `pose` (seen by the camera over `unit_id`) in the robot base
    /// frame and raise it by the standoff along base z. Orientation is
    /// carried through the transform unchanged otherwise.
    ///
    /// # Errors
    ///
    /// [`KitError::TransformTimeout`] when no transform became available
    /// within the configured timeout.
    pub async fn transform(&self, pose: &Pose, unit_id: &str) -> Result<Pose, KitError> {
        let source = sensor_frame_for(unit_id);
        let t = self
            .provider
            .lookup_transform(&self.robot_base_frame, &source, self.timeout)
            .await?;

        let mut target = apply_transform(&t, pose);
        target.position = target.position.add(Point::new(0.0, 0.0, self.standoff));
        debug!(unit = unit_id, frame = %self.robot_base_frame, pose = %target, "part pose in base frame");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::TfBuffer;
    use kitting_types::{Quaternion, Transform};

    fn buffer_with(source: &str, translation: Point) -> Arc<TfBuffer> {
        let buffer = Arc::new(TfBuffer::new());
        buffer.insert_all(&[Transform {
            source_frame: source.to_string(),
            target_frame: DEFAULT_ROBOT_BASE_FRAME.to_string(),
            translation,
            rotation: Quaternion::identity(),
        }]);
        buffer
    }

    #[test]
    fn sensor_frame_naming() {
        assert_eq!(sensor_frame_for("bin3"), "logical_camera_bin3_frame");
        assert_eq!(sensor_frame_for("agv1"), "logical_camera_agv1_frame");
    }

    #[tokio::test]
    async fn identity_transform_adds_standoff() {
        let buffer = buffer_with("logical_camera_bin3_frame", Point::default());
        let stage = FrameTransformStage::new(buffer);
        let out = stage.transform(&Pose::default(), "bin3").await.unwrap();
        assert_eq!(out.position.x, 0.0);
        assert_eq!(out.position.y, 0.0);
        assert!((out.position.z - 0.10).abs() < 1e-12);
        assert_eq!(out.orientation, Quaternion::identity());
    }

    #[tokio::test]
    async fn translation_applied_before_standoff() {
        let buffer = buffer_with("logical_camera_agv2_frame", Point::new(-0.5, 1.0, 0.2));
        let stage = FrameTransformStage::new(buffer).with_standoff(0.25);
        let pose = Pose::new(Point::new(0.1, 0.0, 0.0), Quaternion::identity());
        let out = stage.transform(&pose, "agv2").await.unwrap();
        assert!((out.position.x + 0.4).abs() < 1e-12);
        assert!((out.position.y - 1.0).abs() < 1e-12);
        assert!((out.position.z - 0.45).abs() < 1e-12);
    }

    #[tokio::test]
    async fn missing_frame_times_out() {
        let stage = FrameTransformStage::new(Arc::new(TfBuffer::new()))
            .with_timeout(Duration::from_millis(20));
        let err = stage.transform(&Pose::default(), "bin1").await.unwrap_err();
        assert!(matches!(
            err,
            KitError::TransformTimeout { ref target_frame, .. } if target_frame == "arm1_base_link"
        ));
    }

    #[tokio::test]
    async fn configured_base_frame_is_the_lookup_target() {
        let stage = FrameTransformStage::new(Arc::new(TfBuffer::new()))
            .with_robot_base_frame("arm2_base_link")
            .with_timeout(Duration::from_millis(20));
        assert_eq!(stage.robot_base_frame(), "arm2_base_link");
        let err = stage.transform(&Pose::default(), "bin1").await.unwrap_err();
        assert!(matches!(
            err,
            KitError::TransformTimeout { ref target_frame, .. } if target_frame == "arm2_base_link"
        ));
    }
}
