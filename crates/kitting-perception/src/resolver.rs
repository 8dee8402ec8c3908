//! Storage unit + product type → part pose in the camera frame.
//!
//! A storage unit id is classified by prefix (`bin*`, `agv*`, `quality*`)
//! onto its camera. The camera's latest snapshot is scanned in stored order
//! and the first detection of the requested type wins; ties are not broken by
//! distance or confidence.

use kitting_types::{KitError, Pose, SensorId};

use crate::sensor_store::SensorStateStore;

/// A located part, still in the camera frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPose {
    pub sensor: SensorId,
    pub pose: Pose,
}

pub struct PoseResolver<'a> {
    store: &'a SensorStateStore,
}

impl<'a> PoseResolver<'a> {
    pub fn new(store: &'a SensorStateStore) -> Self {
        Self { store }
    }

    /// # Errors
    ///
    /// * [`KitError::UnknownStorageUnit`] / [`KitError::IndexOutOfRange`] –
    ///   `unit_id` does not name a camera slot.
    /// * [`KitError::NoSensorData`] – the camera has not reported anything
    ///   yet, or its last image was empty.
    /// * [`KitError::NotFound`] – no detection of `part_type`.
    pub fn resolve(&self, unit_id: &str, part_type: &str) -> Result<ResolvedPose, KitError> {
        let sensor = SensorId::from_storage_unit(unit_id)?;

        let snapshot = self
            .store
            .get(sensor)
            .filter(|s| !s.detections.is_empty())
            .ok_or_else(|| KitError::NoSensorData(unit_id.to_string()))?;

        snapshot
            .detections
            .iter()
            .find(|d| d.part_type == part_type)
            .map(|d| ResolvedPose {
                sensor,
                pose: d.pose,
            })
            .ok_or_else(|| KitError::NotFound {
                part_type: part_type.to_string(),
                unit_id: unit_id.to_string(),
            })
    }
}
