//! Latest-snapshot store for the logical cameras.
//!
//! One [`ArcSwapOption`] cell per camera slot. A writer swaps in a complete
//! [`SensorSnapshot`]; a reader loads an `Arc` to whichever snapshot was
//! current at that instant, so a half-written update can never be observed
//! and readers never block the bus delivery path.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use kitting_types::{SensorClass, SensorId, SensorSnapshot};

/// Fixed pools of camera slots: 6 bins, 2 AGVs, 2 quality stations.
pub struct SensorStateStore {
    bins: Vec<ArcSwapOption<SensorSnapshot>>,
    agvs: Vec<ArcSwapOption<SensorSnapshot>>,
    quality: Vec<ArcSwapOption<SensorSnapshot>>,
}

fn pool(class: SensorClass) -> Vec<ArcSwapOption<SensorSnapshot>> {
    (0..class.pool_size()).map(|_| ArcSwapOption::empty()).collect()
}

impl SensorStateStore {
    pub fn new() -> Self {
        Self {
            bins: pool(SensorClass::Bin),
            agvs: pool(SensorClass::Agv),
            quality: pool(SensorClass::Quality),
        }
    }

    /// Replace the snapshot of `snapshot.sensor` unconditionally. A sensor
    /// with no slot in its pool is dropped.
    pub fn update(&self, snapshot: SensorSnapshot) {
        if let Some(slot) = self.slot(snapshot.sensor) {
            slot.store(Some(Arc::new(snapshot)));
        }
    }

    /// The latest snapshot for `sensor`, or `None` before the first update.
    pub fn get(&self, sensor: SensorId) -> Option<Arc<SensorSnapshot>> {
        self.slot(sensor).and_then(|slot| slot.load_full())
    }

    /// Number of cameras that have reported at least once.
    pub fn observed(&self) -> usize {
        SensorId::all()
            .filter(|s| self.slot(*s).is_some_and(|slot| slot.load().is_some()))
            .count()
    }

    fn slot(&self, sensor: SensorId) -> Option<&ArcSwapOption<SensorSnapshot>> {
        let pool = match sensor.class() {
            SensorClass::Bin => &self.bins,
            SensorClass::Agv => &self.agvs,
            SensorClass::Quality => &self.quality,
        };
        pool.get(sensor.index())
    }
}

impl Default for SensorStateStore {
    fn default() -> Self {
        Self::new()
    }
}
