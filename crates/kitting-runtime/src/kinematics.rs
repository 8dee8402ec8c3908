//! Approach pose → joint configurations via the IK service.

use std::sync::Arc;

use kitting_middleware::InverseKinematicsService;
use kitting_types::{JointSolutionSet, KitError, Pose};
use tracing::warn;

pub struct KinematicsNegotiator {
    service: Arc<dyn InverseKinematicsService>,
}

impl KinematicsNegotiator {
    pub fn new(service: Arc<dyn InverseKinematicsService>) -> Self {
        Self { service }
    }

    /// One IK request, no retry.
    ///
    /// `num_sols` is trusted only up to the number of solutions actually
    /// returned.
    ///
    /// # Errors
    ///
    /// * [`KitError::ServiceError`] – the call failed, or a returned solution
    ///   carries fewer than six joint angles.
    /// * [`KitError::NoSolution`] – the service answered with zero solutions.
    pub async fn solve(&self, target: &Pose) -> Result<JointSolutionSet, KitError> {
        let response = self
            .service
            .pose_ik(target)
            .await
            .map_err(|e| KitError::ServiceError(e.to_string()))?;

        let claimed = usize::try_from(response.num_sols).unwrap_or(0);
        let returned = response.joint_solutions.len();
        if claimed > returned {
            warn!(claimed, returned, "IK reported more solutions than it sent");
        }
        let count = claimed.min(returned);
        if count == 0 {
            return Err(KitError::NoSolution);
        }

        let solutions = response.joint_solutions[..count]
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                raw.to_solution().ok_or_else(|| {
                    KitError::ServiceError(format!(
                        "solution {i} has {} joint angles",
                        raw.joint_angles.len()
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(JointSolutionSet { solutions })
    }
}
