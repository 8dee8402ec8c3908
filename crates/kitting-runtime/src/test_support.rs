//! Scripted in-process stand-ins for the external services.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use kitting_middleware::{
    CompetitionControl, InverseKinematicsService, MaterialLocationService, PoseIkResponse,
    RawJointSolution, TransformProvider, TriggerResponse,
};
use kitting_types::{KitError, Pose, Quaternion, StorageUnit, Transform};

fn transport(service: &str) -> KitError {
    KitError::Transport {
        service: service.to_string(),
        details: "connection refused".to_string(),
    }
}

/// `n` solutions with angles `0.0, 0.5, … 2.5`.
pub fn ik_response(n: usize) -> PoseIkResponse {
    PoseIkResponse {
        num_sols: i32::try_from(n).unwrap(),
        joint_solutions: (0..n)
            .map(|_| RawJointSolution {
                joint_angles: (0..6).map(|j| j as f64 * 0.5).collect(),
            })
            .collect(),
    }
}

// ── start competition ───────────────────────────────────────────────────────

pub struct MockControl {
    script: Mutex<VecDeque<Result<TriggerResponse, KitError>>>,
    calls: AtomicUsize,
}

impl MockControl {
    /// Answers with `script` in order, then with success forever.
    pub fn scripted(script: Vec<Result<TriggerResponse, KitError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn down() -> Result<TriggerResponse, KitError> {
        Err(transport("/ariac/start_competition"))
    }

    pub fn answer(success: bool, message: &str) -> Result<TriggerResponse, KitError> {
        Ok(TriggerResponse {
            success,
            message: message.to_string(),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompetitionControl for MockControl {
    async fn start_competition(&self) -> Result<TriggerResponse, KitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::answer(true, "competition started"))
    }
}

// ── material locations ──────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockLocations {
    units: HashMap<String, Vec<StorageUnit>>,
    failing: bool,
    calls: AtomicUsize,
}

impl MockLocations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, product_type: &str, units: &[&str]) -> Self {
        self.units.insert(
            product_type.to_string(),
            units.iter().map(|u| StorageUnit::new(*u)).collect(),
        );
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MaterialLocationService for MockLocations {
    async fn material_locations(&self, material_type: &str) -> Result<Vec<StorageUnit>, KitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(transport("/ariac/material_locations"));
        }
        Ok(self.units.get(material_type).cloned().unwrap_or_default())
    }
}

// ── transforms ──────────────────────────────────────────────────────────────

/// Identity for every frame pair unless told to time out.
#[derive(Default)]
pub struct MockTransforms {
    failing: bool,
    calls: AtomicUsize,
    sources: Mutex<Vec<String>>,
}

impl MockTransforms {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn timing_out() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransformProvider for MockTransforms {
    async fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        timeout: Duration,
    ) -> Result<Transform, KitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().push(source_frame.to_string());
        if self.failing {
            return Err(KitError::TransformTimeout {
                source_frame: source_frame.to_string(),
                target_frame: target_frame.to_string(),
                waited_ms: u64::try_from(timeout.as_millis()).unwrap(),
            });
        }
        Ok(Transform {
            source_frame: source_frame.to_string(),
            target_frame: target_frame.to_string(),
            translation: Default::default(),
            rotation: Quaternion::identity(),
        })
    }
}

// ── inverse kinematics ──────────────────────────────────────────────────────

pub struct MockIk {
    response: Result<PoseIkResponse, KitError>,
    calls: AtomicUsize,
    poses: Mutex<Vec<Pose>>,
}

impl MockIk {
    pub fn answering(response: PoseIkResponse) -> Self {
        Self {
            response: Ok(response),
            calls: AtomicUsize::new(0),
            poses: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            response: Err(transport("pose_ik")),
            calls: AtomicUsize::new(0),
            poses: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn poses(&self) -> Vec<Pose> {
        self.poses.lock().unwrap().clone()
    }
}

#[async_trait]
impl InverseKinematicsService for MockIk {
    async fn pose_ik(&self, part_pose: &Pose) -> Result<PoseIkResponse, KitError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.poses.lock().unwrap().push(*part_pose);
        self.response.clone()
    }
}
