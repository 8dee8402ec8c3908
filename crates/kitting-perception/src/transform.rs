//! Transform tree and time-bounded transform buffer.
//!
//! [`TfTree`] keeps an undirected graph of named reference frames: every
//! parent → child edge from `/tf` is stored together with its inverse, so a
//! lookup can walk up to a common ancestor and back down. Only the latest
//! value of each edge is kept.
//!
//! [`TfBuffer`] wraps a tree for concurrent use. Writers insert whole
//! `/tf` batches; readers can wait for a chain to become complete, bounded
//! by a timeout.
//!
//! # Example
//!
//! ```rust
//! use kitting_perception::transform::TfTree;
//! use kitting_types::{Point, Quaternion, Transform};
//!
//! let mut tf = TfTree::new();
//! // arm base sits 1 m along world x; the camera 0.5 m further.
//! tf.insert(&Transform {
//!     source_frame: "arm1_base_link".into(),
//!     target_frame: "world".into(),
//!     translation: Point::new(1.0, 0.0, 0.0),
//!     rotation: Quaternion::identity(),
//! });
//! tf.insert(&Transform {
//!     source_frame: "logical_camera_bin1_frame".into(),
//!     target_frame: "world".into(),
//!     translation: Point::new(1.5, 0.0, 0.0),
//!     rotation: Quaternion::identity(),
//! });
//!
//! let t = tf.lookup("arm1_base_link", "logical_camera_bin1_frame").unwrap();
//! assert!((t.translation.x - 0.5).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::pin::pin;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use kitting_middleware::{TopicReceiver, TransformProvider};
use kitting_types::{EventPayload, KitError, Point, Pose, Quaternion, Transform};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body transform: rotate by `rotation`, then add `translation`.
///
/// As an edge `A → B` it is T_A_B: it maps points expressed in B into A.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform3D {
    pub translation: Point,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Point, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Point::default(), Quaternion::identity())
    }

    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        Self::new(translated, self.rotation.mul(other.rotation))
    }

    /// T_A_B → T_B_A.
    pub fn inverse(self) -> Self {
        let inv = self.rotation.conjugate();
        Self::new(inv.rotate(self.translation).neg(), inv)
    }

    /// Express `pose` (given in the source frame) in the target frame.
    pub fn apply(self, pose: &Pose) -> Pose {
        Pose::new(
            self.translation.add(self.rotation.rotate(pose.position)),
            self.rotation.mul(pose.orientation),
        )
    }
}

impl From<&Transform> for Transform3D {
    fn from(t: &Transform) -> Self {
        Self::new(t.translation, t.rotation)
    }
}

/// Apply `transform` to `pose`, yielding the pose in `transform.target_frame`.
pub fn apply_transform(transform: &Transform, pose: &Pose) -> Pose {
    Transform3D::from(transform).apply(pose)
}

// ────────────────────────────────────────────────────────────────────────────
// TfTree
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct TfTree {
    /// `edges[a][b]` = T_a_b
    edges: HashMap<String, HashMap<String, Transform3D>>,
}

impl TfTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the edge described by `t` and its inverse.
    pub fn insert(&mut self, t: &Transform) {
        let forward = Transform3D::from(t);
        self.edges
            .entry(t.target_frame.clone())
            .or_default()
            .insert(t.source_frame.clone(), forward);
        self.edges
            .entry(t.source_frame.clone())
            .or_default()
            .insert(t.target_frame.clone(), forward.inverse());
    }

    pub fn frame_count(&self) -> usize {
        self.edges.len()
    }

    /// The transform mapping points in `source_frame` into `target_frame`,
    /// or `None` when the frames are not connected.
    pub fn lookup(&self, target_frame: &str, source_frame: &str) -> Option<Transform> {
        self.chain(target_frame, source_frame).map(|t| Transform {
            source_frame: source_frame.to_string(),
            target_frame: target_frame.to_string(),
            translation: t.translation,
            rotation: t.rotation,
        })
    }

    fn chain(&self, from: &str, to: &str) -> Option<Transform3D> {
        if from == to {
            return Some(Transform3D::identity());
        }

        // BFS; each queue item carries T_from_current.
        let mut queue: VecDeque<(&str, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<&str> = HashSet::new();
        queue.push_back((from, Transform3D::identity()));
        visited.insert(from);

        while let Some((current, accumulated)) = queue.pop_front() {
            let Some(neighbours) = self.edges.get(current) else {
                continue;
            };
            for (next, edge) in neighbours {
                if !visited.insert(next.as_str()) {
                    continue;
                }
                let composed = accumulated.compose(*edge);
                if next == to {
                    return Some(composed);
                }
                queue.push_back((next.as_str(), composed));
            }
        }
        None
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfBuffer
// ────────────────────────────────────────────────────────────────────────────

/// Thread-safe [`TfTree`] with waiting lookups.
#[derive(Default)]
pub struct TfBuffer {
    tree: RwLock<TfTree>,
    updated: Notify,
}

impl TfBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a batch of edges and wake every waiter. Returns the number of
    /// frames known afterwards.
    pub fn insert_all(&self, transforms: &[Transform]) -> usize {
        let frames = {
            let mut tree = self.tree.write().unwrap_or_else(PoisonError::into_inner);
            for t in transforms {
                tree.insert(t);
            }
            tree.frame_count()
        };
        self.updated.notify_waiters();
        frames
    }

    pub fn lookup(&self, target_frame: &str, source_frame: &str) -> Option<Transform> {
        self.tree
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .lookup(target_frame, source_frame)
    }

    /// Latest available transform `source_frame` → `target_frame`, waiting up
    /// to `timeout` for the chain to appear.
    ///
    /// # Errors
    ///
    /// [`KitError::TransformTimeout`] once `timeout` has elapsed.
    pub async fn wait_for(
        &self,
        target_frame: &str,
        source_frame: &str,
        timeout: Duration,
    ) -> Result<Transform, KitError> {
        let started = Instant::now();
        let deadline = started + timeout;
        loop {
            // Register interest before checking so an insert between the
            // check and the await is not missed.
            let mut notified = pin!(self.updated.notified());
            notified.as_mut().enable();

            if let Some(t) = self.lookup(target_frame, source_frame) {
                return Ok(t);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(KitError::TransformTimeout {
                    source_frame: source_frame.to_string(),
                    target_frame: target_frame.to_string(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
        }
    }

    /// Feed every `TransformUpdate` arriving on `rx` into this buffer until
    /// the bus closes.
    pub fn spawn_listener(self: Arc<Self>, mut rx: TopicReceiver) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let EventPayload::TransformUpdate(transforms) = event.payload {
                            let frames = self.insert_all(&transforms);
                            debug!(edges = transforms.len(), frames, "tf update");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged_by = n, "tf listener lagged; keeping latest edges");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[async_trait]
impl TransformProvider for TfBuffer {
    async fn lookup_transform(
        &self,
        target_frame: &str,
        source_frame: &str,
        timeout: Duration,
    ) -> Result<Transform, KitError> {
        self.wait_for(target_frame, source_frame, timeout).await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use kitting_middleware::{EventBus, Topic};
    use kitting_types::Event;
    use std::f64::consts::FRAC_1_SQRT_2;

    fn edge(parent: &str, child: &str, translation: Point, rotation: Quaternion) -> Transform {
        Transform {
            source_frame: child.to_string(),
            target_frame: parent.to_string(),
            translation,
            rotation,
        }
    }

    fn yaw90() -> Quaternion {
        Quaternion::new(0.0, 0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2)
    }

    #[test]
    fn identity_apply_is_noop() {
        let p = Pose::new(Point::new(1.0, 2.0, 3.0), yaw90());
        assert_eq!(Transform3D::identity().apply(&p), p);
    }

    #[test]
    fn inverse_composes_to_identity() {
        let t = Transform3D::new(Point::new(1.0, -2.0, 0.5), yaw90());
        let id = t.compose(t.inverse());
        assert!(id.translation.x.abs() < 1e-9);
        assert!(id.translation.y.abs() < 1e-9);
        assert!(id.translation.z.abs() < 1e-9);
        assert!((id.rotation.w.abs() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn apply_rotates_then_translates() {
        let t = edge("base", "cam", Point::new(0.0, 0.0, 1.0), yaw90());
        let p = Pose::new(Point::new(1.0, 0.0, 0.0), Quaternion::identity());
        let out = apply_transform(&t, &p);
        assert!(out.position.x.abs() < 1e-9);
        assert!((out.position.y - 1.0).abs() < 1e-9);
        assert!((out.position.z - 1.0).abs() < 1e-9);
        assert!((out.orientation.z - FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn lookup_same_frame_returns_identity() {
        let tf = TfTree::new();
        let t = tf.lookup("world", "world").unwrap();
        assert_eq!(t.translation, Point::default());
        assert_eq!(t.rotation, Quaternion::identity());
    }

    #[test]
    fn lookup_direct_edge_both_directions() {
        let mut tf = TfTree::new();
        tf.insert(&edge("world", "base", Point::new(1.0, 0.0, 0.0), Quaternion::identity()));

        let down = tf.lookup("world", "base").unwrap();
        assert!((down.translation.x - 1.0).abs() < 1e-9);
        let up = tf.lookup("base", "world").unwrap();
        assert!((up.translation.x + 1.0).abs() < 1e-9);
        assert_eq!(up.source_frame, "world");
        assert_eq!(up.target_frame, "base");
    }

    #[test]
    fn lookup_through_common_ancestor() {
        // base is rotated 90° about z at world x=1; camera hangs 2 m above
        // world (2, 0). In base coordinates the camera is at x=0, y=-1.
        let mut tf = TfTree::new();
        tf.insert(&edge("world", "base", Point::new(1.0, 0.0, 0.0), yaw90()));
        tf.insert(&edge("world", "cam", Point::new(2.0, 0.0, 2.0), Quaternion::identity()));

        let t = tf.lookup("base", "cam").unwrap();
        assert!(t.translation.x.abs() < 1e-9, "x={}", t.translation.x);
        assert!((t.translation.y + 1.0).abs() < 1e-9, "y={}", t.translation.y);
        assert!((t.translation.z - 2.0).abs() < 1e-9);
    }

    #[test]
    fn lookup_disconnected_returns_none() {
        let mut tf = TfTree::new();
        tf.insert(&edge("world", "base", Point::new(1.0, 0.0, 0.0), Quaternion::identity()));
        assert!(tf.lookup("world", "ghost_frame").is_none());
        assert_eq!(tf.frame_count(), 2);
    }

    #[test]
    fn insert_overrides_previous_edge() {
        let mut tf = TfTree::new();
        tf.insert(&edge("world", "sensor", Point::new(1.0, 0.0, 0.0), Quaternion::identity()));
        tf.insert(&edge("world", "sensor", Point::new(5.0, 0.0, 0.0), Quaternion::identity()));
        let t = tf.lookup("world", "sensor").unwrap();
        assert!((t.translation.x - 5.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn wait_for_returns_immediately_when_available() {
        let buffer = TfBuffer::new();
        buffer.insert_all(&[edge("a", "b", Point::new(0.0, 0.0, 1.0), Quaternion::identity())]);
        let t = buffer.wait_for("a", "b", Duration::from_millis(10)).await.unwrap();
        assert_eq!(t.translation.z, 1.0);
    }

    #[tokio::test]
    async fn wait_for_times_out() {
        let buffer = TfBuffer::new();
        let err = buffer
            .wait_for("arm1_base_link", "logical_camera_bin1_frame", Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KitError::TransformTimeout { ref source_frame, .. } if source_frame == "logical_camera_bin1_frame"
        ));
    }

    #[test]
    fn insert_all_reports_known_frames() {
        let buffer = TfBuffer::new();
        let identity = Quaternion::identity();
        assert_eq!(buffer.insert_all(&[edge("a", "b", Point::default(), identity)]), 2);
        assert_eq!(
            buffer.insert_all(&[
                edge("b", "c", Point::default(), identity),
                edge("a", "b", Point::new(1.0, 0.0, 0.0), identity),
            ]),
            3
        );
    }

    #[tokio::test]
    async fn wait_for_wakes_on_late_insert() {
        let buffer = Arc::new(TfBuffer::new());
        let writer = Arc::clone(&buffer);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.insert_all(&[edge("a", "b", Point::new(3.0, 0.0, 0.0), Quaternion::identity())]);
        });
        let t = buffer.wait_for("a", "b", Duration::from_secs(5)).await.unwrap();
        assert_eq!(t.translation.x, 3.0);
    }

    #[tokio::test]
    async fn listener_feeds_buffer_from_bus() {
        let bus = EventBus::default();
        let buffer = Arc::new(TfBuffer::new());
        let _handle = Arc::clone(&buffer).spawn_listener(bus.subscribe_to(Topic::Transforms));

        bus.publish_to(
            Topic::Transforms,
            Event::new(
                "test",
                EventPayload::TransformUpdate(vec![edge(
                    "world",
                    "cam",
                    Point::new(0.0, 1.0, 0.0),
                    Quaternion::identity(),
                )]),
            ),
        )
        .unwrap();

        let t = buffer
            .lookup_transform("world", "cam", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(t.translation.y, 1.0);
    }
}
