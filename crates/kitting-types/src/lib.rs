//! `kitting-types` – shared vocabulary of the kitting stack.
//!
//! Geometry primitives, the order / shipment / product hierarchy, sensor
//! snapshots, IK solutions, the bus [`Event`] envelope, and the global
//! [`KitError`] taxonomy.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Geometry
// ─────────────────────────────────────────────────────────────────────────────

/// A point (or translation) in 3-D space, metres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// A rotation quaternion in ROS field order (x, y, z, w).
///
/// Upstream producers are trusted to send unit quaternions; nothing here
/// normalises or validates them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Quaternion {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }

    /// Hamilton product `self * rhs` (apply `rhs` first, then `self`).
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }

    /// Conjugate, which is the inverse of a unit quaternion.
    pub fn conjugate(self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Rotate `p` by this quaternion: p' = q * p * q*.
    pub fn rotate(self, p: Point) -> Point {
        let pure = Self::new(p.x, p.y, p.z, 0.0);
        let r = self.mul(pure).mul(self.conjugate());
        Point::new(r.x, r.y, r.z)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

/// Position plus orientation of a rigid body.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

impl Pose {
    pub fn new(position: Point, orientation: Quaternion) -> Self {
        Self {
            position,
            orientation,
        }
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "position (x: {:.2}, y: {:.2}, z: {:.2}) orientation (x: {:.2}, y: {:.2}, z: {:.2}, w: {:.2})",
            self.position.x,
            self.position.y,
            self.position.z,
            self.orientation.x,
            self.orientation.y,
            self.orientation.z,
            self.orientation.w,
        )
    }
}

/// Rigid transform that maps points expressed in `source_frame` into
/// `target_frame`: rotate by `rotation`, then add `translation`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub source_frame: String,
    pub target_frame: String,
    pub translation: Point,
    pub rotation: Quaternion,
}

// ─────────────────────────────────────────────────────────────────────────────
// Sensors
// ─────────────────────────────────────────────────────────────────────────────

/// One part seen by a logical camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "type")]
    pub part_type: String,
    pub pose: Pose,
}

/// The three families of fixed cameras, each backed by a fixed-size pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SensorClass {
    Bin,
    Agv,
    Quality,
}

impl SensorClass {
    pub const ALL: [SensorClass; 3] = [SensorClass::Bin, SensorClass::Agv, SensorClass::Quality];

    /// Storage-unit id prefix that selects this class.
    pub fn prefix(self) -> &'static str {
        match self {
            SensorClass::Bin => "bin",
            SensorClass::Agv => "agv",
            SensorClass::Quality => "quality",
        }
    }

    /// Number of physical cameras of this class.
    pub fn pool_size(self) -> usize {
        match self {
            SensorClass::Bin => 6,
            SensorClass::Agv => 2,
            SensorClass::Quality => 2,
        }
    }
}

/// A specific camera: its class plus a zero-based slot in the class pool.
///
/// Deserialization goes through [`SensorId::new`], so an out-of-range slot
/// is rejected rather than carried into the pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawSensorId")]
pub struct SensorId {
    class: SensorClass,
    index: usize,
}

#[derive(Deserialize)]
struct RawSensorId {
    class: SensorClass,
    index: usize,
}

impl TryFrom<RawSensorId> for SensorId {
    type Error = KitError;

    fn try_from(raw: RawSensorId) -> Result<Self, Self::Error> {
        SensorId::new(raw.class, raw.index).ok_or_else(|| KitError::IndexOutOfRange {
            unit_id: format!("{}{}", raw.class.prefix(), raw.index.saturating_add(1)),
            pool_size: raw.class.pool_size(),
        })
    }
}

impl SensorId {
    /// Returns `None` when `index` is outside the pool of `class`.
    pub fn new(class: SensorClass, index: usize) -> Option<Self> {
        (index < class.pool_size()).then_some(Self { class, index })
    }

    /// Classify a storage unit id (`"bin3"`, `"agv1"`, `"quality2"`) and map
    /// its 1-indexed numeric suffix onto the camera pool.
    ///
    /// # Errors
    ///
    /// [`KitError::UnknownStorageUnit`] for an unrecognised prefix or a
    /// non-numeric suffix, [`KitError::IndexOutOfRange`] when the suffix
    /// falls outside the pool.
    pub fn from_storage_unit(unit_id: &str) -> Result<Self, KitError> {
        let (class, suffix) = SensorClass::ALL
            .iter()
            .find_map(|c| unit_id.strip_prefix(c.prefix()).map(|s| (*c, s)))
            .ok_or_else(|| KitError::UnknownStorageUnit(unit_id.to_string()))?;

        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_digit()) {
            return Err(KitError::UnknownStorageUnit(unit_id.to_string()));
        }
        let out_of_range = || KitError::IndexOutOfRange {
            unit_id: unit_id.to_string(),
            pool_size: class.pool_size(),
        };
        let ordinal: usize = suffix.parse().map_err(|_| out_of_range())?;
        ordinal
            .checked_sub(1)
            .and_then(|index| Self::new(class, index))
            .ok_or_else(out_of_range)
    }

    /// Every camera of every class, in class then slot order.
    pub fn all() -> impl Iterator<Item = SensorId> {
        SensorClass::ALL
            .into_iter()
            .flat_map(|class| (0..class.pool_size()).map(move |index| SensorId { class, index }))
    }

    pub fn class(self) -> SensorClass {
        self.class
    }

    /// Zero-based slot in the class pool.
    pub fn index(self) -> usize {
        self.index
    }

    /// The storage unit id this camera watches, e.g. `"bin3"`.
    pub fn unit_id(self) -> String {
        format!("{}{}", self.class.prefix(), self.index + 1)
    }
}

impl fmt::Display for SensorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.class.prefix(), self.index + 1)
    }
}

/// The full detection list last reported by one camera. Replaced wholesale on
/// every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    pub sensor: SensorId,
    pub detections: Vec<Detection>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Orders
// ─────────────────────────────────────────────────────────────────────────────

/// Storage unit id reserved for the conveyor belt.
pub const BELT_UNIT_ID: &str = "belt";

/// A location the material-location service says may hold a part.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageUnit {
    pub unit_id: String,
}

impl StorageUnit {
    pub fn new(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
        }
    }

    /// Conveyor parts are never resolved through the stationary cameras.
    pub fn is_belt(&self) -> bool {
        self.unit_id == BELT_UNIT_ID
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(rename = "type")]
    pub part_type: String,
}

/// A kit destined for one AGV. `products` is drained from the back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shipment {
    pub shipment_type: String,
    pub agv_id: String,
    #[serde(default)]
    pub products: Vec<Product>,
}

/// A customer order. `shipments` is drained from the back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub shipments: Vec<Shipment>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Kinematics
// ─────────────────────────────────────────────────────────────────────────────

/// Number of joints on the arm.
pub const JOINT_COUNT: usize = 6;

/// One feasible joint configuration, radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JointSolution {
    pub joint_angles: [f64; JOINT_COUNT],
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct JointSolutionSet {
    pub solutions: Vec<JointSolution>,
}

impl JointSolutionSet {
    pub fn count(&self) -> usize {
        self.solutions.len()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fulfillment reports
// ─────────────────────────────────────────────────────────────────────────────

/// What happened for one storage-unit candidate of a product.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CandidateResult {
    /// Belt candidates never reach the camera pipeline.
    SkippedBelt,
    /// The resolved approach pose and the IK answer.
    Solved {
        target_pose: Pose,
        solutions: JointSolutionSet,
    },
    Failed(KitError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateReport {
    pub unit_id: String,
    pub result: CandidateResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProductOutcome {
    /// The material-location call failed; no candidate was examined.
    LocatorFailed(KitError),
    Candidates(Vec<CandidateReport>),
}

/// Summary of one product's pass through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductReport {
    pub order_id: String,
    pub shipment_type: String,
    pub part_type: String,
    pub outcome: ProductOutcome,
}

impl ProductReport {
    /// Number of candidates that produced at least one joint solution.
    pub fn solved_candidates(&self) -> usize {
        match &self.outcome {
            ProductOutcome::LocatorFailed(_) => 0,
            ProductOutcome::Candidates(c) => c
                .iter()
                .filter(|r| matches!(r.result, CandidateResult::Solved { .. }))
                .count(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bus events
// ─────────────────────────────────────────────────────────────────────────────

/// Envelope for everything routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "kitting-middleware::rosbridge/ariac/orders"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    OrderReceived(Order),
    SensorSnapshot(SensorSnapshot),
    TransformUpdate(Vec<Transform>),
    ProductProcessed(ProductReport),
    CompetitionStarted { message: String },
    Fault { component: String, message: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// How loudly a failure should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// A normal negative outcome (part not there, arm cannot reach it).
    Expected,
    /// The location service or a message named something we cannot map.
    Malformed,
    /// An external dependency is down or too slow.
    Fault,
}

/// Every failure the pipeline can report. None of them aborts the driver.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum KitError {
    #[error("Transport failure calling {service}: {details}")]
    Transport { service: String, details: String },

    #[error("Material location service unavailable: {0}")]
    LocationServiceUnavailable(String),

    #[error("Unknown storage unit: {0}")]
    UnknownStorageUnit(String),

    #[error("Storage unit {unit_id} is outside the camera pool of size {pool_size}")]
    IndexOutOfRange { unit_id: String, pool_size: usize },

    #[error("No sensor data received for storage unit {0}")]
    NoSensorData(String),

    #[error("Product type {part_type} not found in {unit_id}")]
    NotFound { part_type: String, unit_id: String },

    #[error("Transform from {source_frame} to {target_frame} unavailable after {waited_ms} ms")]
    TransformTimeout {
        source_frame: String,
        target_frame: String,
        waited_ms: u64,
    },

    #[error("IK service found no solution")]
    NoSolution,

    #[error("IK service error: {0}")]
    ServiceError(String),

    #[error("Middleware channel error: {0}")]
    Channel(String),

    #[error("Parsing error: {0}")]
    Parsing(String),
}

impl KitError {
    pub fn severity(&self) -> Severity {
        match self {
            KitError::NotFound { .. } | KitError::NoSolution | KitError::NoSensorData(_) => {
                Severity::Expected
            }
            KitError::UnknownStorageUnit(_)
            | KitError::IndexOutOfRange { .. }
            | KitError::Parsing(_) => Severity::Malformed,
            KitError::Transport { .. }
            | KitError::LocationServiceUnavailable(_)
            | KitError::TransformTimeout { .. }
            | KitError::ServiceError(_)
            | KitError::Channel(_) => Severity::Fault,
        }
    }
}
