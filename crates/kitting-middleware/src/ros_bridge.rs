//! Inbound ROS topic translation.
//!
//! [`RosBridge`] takes the `msg` body of a rosbridge `publish` frame, decodes
//! it according to the topic it arrived on, and publishes the result onto the
//! internal [`EventBus`]:
//!
//! | ROS topic | Message type | Bus topic / payload |
//! |---|---|---|
//! | `/ariac/orders` | `osrf_gear/Order` | [`Topic::Orders`] / `OrderReceived` |
//! | `/ariac/logical_camera_bin{1..6}` | `osrf_gear/LogicalCameraImage` | [`Topic::LogicalCameras`] / `SensorSnapshot` |
//! | `/ariac/logical_camera_agv{1..2}` | `osrf_gear/LogicalCameraImage` | same |
//! | `/ariac/quality_control_sensor_{1..2}` | `osrf_gear/LogicalCameraImage` | same |
//! | `/tf`, `/tf_static` | `tf2_msgs/TFMessage` | [`Topic::Transforms`] / `TransformUpdate` |
//!
//! The bridge does not care whether anyone listens: a publish with no
//! subscribers is reported as `Ok(0)`.

use kitting_types::{
    Detection, Event, EventPayload, KitError, Order, Point, Quaternion, SensorClass, SensorId,
    SensorSnapshot, Transform,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::bus::{EventBus, Topic};

pub const ORDERS_TOPIC: &str = "/ariac/orders";
pub const TF_TOPIC: &str = "/tf";
pub const TF_STATIC_TOPIC: &str = "/tf_static";

/// Maximum number of models accepted in one logical camera image.
///
/// Larger payloads are rejected rather than copied into the sensor store.
pub const MAX_DETECTIONS: usize = 1024;

const SOURCE_PREFIX: &str = "kitting-middleware::rosbridge";

/// ROS topic carrying the images of `sensor`.
pub fn camera_topic(sensor: SensorId) -> String {
    let n = sensor.index() + 1;
    match sensor.class() {
        SensorClass::Bin => format!("/ariac/logical_camera_bin{n}"),
        SensorClass::Agv => format!("/ariac/logical_camera_agv{n}"),
        SensorClass::Quality => format!("/ariac/quality_control_sensor_{n}"),
    }
}

/// Inverse of [`camera_topic`].
pub fn sensor_for_topic(topic: &str) -> Option<SensorId> {
    SensorId::all().find(|s| camera_topic(*s) == topic)
}

/// Every topic the pipeline needs a subscription for.
pub fn subscribed_topics() -> Vec<String> {
    let mut topics = vec![
        ORDERS_TOPIC.to_string(),
        TF_TOPIC.to_string(),
        TF_STATIC_TOPIC.to_string(),
    ];
    topics.extend(SensorId::all().map(camera_topic));
    topics
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct LogicalCameraImage {
    #[serde(default)]
    models: Vec<Detection>,
}

#[derive(Deserialize)]
struct TfMessage {
    #[serde(default)]
    transforms: Vec<TransformStamped>,
}

#[derive(Deserialize)]
struct TransformStamped {
    header: Header,
    child_frame_id: String,
    transform: WireTransform,
}

#[derive(Deserialize)]
struct Header {
    frame_id: String,
}

#[derive(Deserialize)]
struct WireTransform {
    translation: Point,
    rotation: Quaternion,
}

/// ROS frame ids may carry a leading slash; the transform tree does not.
fn strip_frame(frame: &str) -> String {
    frame.trim_start_matches('/').to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// RosBridge
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RosBridge {
    bus: EventBus,
}

impl RosBridge {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }

    /// Decode `msg` according to `topic` and publish it.
    ///
    /// # Errors
    ///
    /// [`KitError::Parsing`] for unknown topics or malformed bodies.
    pub fn route(&self, topic: &str, msg: &Value) -> Result<usize, KitError> {
        if topic == ORDERS_TOPIC {
            return self.ingest_order(msg);
        }
        if topic == TF_TOPIC || topic == TF_STATIC_TOPIC {
            return self.ingest_tf(topic, msg);
        }
        match sensor_for_topic(topic) {
            Some(sensor) => self.ingest_logical_camera(sensor, msg),
            None => Err(KitError::Parsing(format!("no route for topic '{topic}'"))),
        }
    }

    /// Ingest an `osrf_gear/Order`.
    pub fn ingest_order(&self, msg: &Value) -> Result<usize, KitError> {
        let order: Order = serde_json::from_value(msg.clone())
            .map_err(|e| KitError::Parsing(format!("order: {e}")))?;
        debug!(order_id = %order.order_id, shipments = order.shipments.len(), "order received");
        self.publish(
            Topic::Orders,
            format!("{SOURCE_PREFIX}{ORDERS_TOPIC}"),
            EventPayload::OrderReceived(order),
        )
    }

    /// Ingest an `osrf_gear/LogicalCameraImage` for `sensor`.
    pub fn ingest_logical_camera(&self, sensor: SensorId, msg: &Value) -> Result<usize, KitError> {
        let image: LogicalCameraImage = serde_json::from_value(msg.clone())
            .map_err(|e| KitError::Parsing(format!("logical camera {sensor}: {e}")))?;
        if image.models.len() > MAX_DETECTIONS {
            return Err(KitError::Parsing(format!(
                "logical camera {sensor} reported {} models, exceeding the limit of {MAX_DETECTIONS}",
                image.models.len(),
            )));
        }
        self.publish(
            Topic::LogicalCameras,
            format!("{SOURCE_PREFIX}{}", camera_topic(sensor)),
            EventPayload::SensorSnapshot(SensorSnapshot {
                sensor,
                detections: image.models,
            }),
        )
    }

    /// Ingest a `tf2_msgs/TFMessage`.
    pub fn ingest_tf(&self, topic: &str, msg: &Value) -> Result<usize, KitError> {
        let tf: TfMessage = serde_json::from_value(msg.clone())
            .map_err(|e| KitError::Parsing(format!("{topic}: {e}")))?;
        let transforms: Vec<Transform> = tf
            .transforms
            .into_iter()
            .map(|t| Transform {
                source_frame: strip_frame(&t.child_frame_id),
                target_frame: strip_frame(&t.header.frame_id),
                translation: t.transform.translation,
                rotation: t.transform.rotation,
            })
            .collect();
        self.publish(
            Topic::Transforms,
            format!("{SOURCE_PREFIX}{topic}"),
            EventPayload::TransformUpdate(transforms),
        )
    }

    fn publish(&self, topic: Topic, source: String, payload: EventPayload) -> Result<usize, KitError> {
        match self.bus.publish_to(topic, Event::new(source, payload)) {
            Ok(n) => Ok(n),
            // Nobody listening yet is normal during startup.
            Err(KitError::Channel(_)) => Ok(0),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn camera_topics_follow_ariac_naming() {
        let bin3 = SensorId::from_storage_unit("bin3").unwrap();
        assert_eq!(camera_topic(bin3), "/ariac/logical_camera_bin3");
        let q1 = SensorId::from_storage_unit("quality1").unwrap();
        assert_eq!(camera_topic(q1), "/ariac/quality_control_sensor_1");
        assert_eq!(sensor_for_topic("/ariac/logical_camera_agv2"), SensorId::from_storage_unit("agv2").ok());
        assert!(sensor_for_topic("/ariac/logical_camera_bin9").is_none());
    }

    #[test]
    fn subscribed_topics_cover_all_feeds() {
        let topics = subscribed_topics();
        assert_eq!(topics.len(), 13);
        assert!(topics.contains(&ORDERS_TOPIC.to_string()));
        assert!(topics.contains(&"/ariac/quality_control_sensor_2".to_string()));
    }

    #[test]
    fn order_is_published_on_orders_topic() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Orders);
        let bridge = RosBridge::new(bus);

        let msg = json!({
            "order_id": "order_0",
            "shipments": [{"shipment_type": "s0", "agv_id": "agv1", "products": [{"type": "piston_rod_part"}]}]
        });
        assert_eq!(bridge.route(ORDERS_TOPIC, &msg)?, 1);

        let event = rx.try_recv()?;
        assert_eq!(event.source, "kitting-middleware::rosbridge/ariac/orders");
        match event.payload {
            EventPayload::OrderReceived(order) => {
                assert_eq!(order.shipments[0].products[0].part_type, "piston_rod_part");
            }
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn logical_camera_becomes_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::LogicalCameras);
        let bridge = RosBridge::new(bus);

        let msg = json!({
            "models": [{
                "type": "gear_part",
                "pose": {
                    "position": {"x": 0.1, "y": 0.2, "z": 0.3},
                    "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
                }
            }],
            "pose": {
                "position": {"x": 0.0, "y": 0.0, "z": 0.0},
                "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
            }
        });
        bridge.route("/ariac/logical_camera_bin3", &msg)?;

        match rx.try_recv()?.payload {
            EventPayload::SensorSnapshot(snapshot) => {
                assert_eq!(snapshot.sensor.to_string(), "bin3");
                assert_eq!(snapshot.detections.len(), 1);
                assert_eq!(snapshot.detections[0].pose.position.z, 0.3);
            }
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn tf_message_maps_child_to_source_frame() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_to(Topic::Transforms);
        let bridge = RosBridge::new(bus);

        let msg = json!({
            "transforms": [{
                "header": {"frame_id": "/world", "stamp": {"secs": 0, "nsecs": 0}},
                "child_frame_id": "logical_camera_bin3_frame",
                "transform": {
                    "translation": {"x": 1.0, "y": 0.0, "z": 0.0},
                    "rotation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
                }
            }]
        });
        bridge.route(TF_STATIC_TOPIC, &msg)?;

        match rx.try_recv()?.payload {
            EventPayload::TransformUpdate(transforms) => {
                assert_eq!(transforms[0].target_frame, "world");
                assert_eq!(transforms[0].source_frame, "logical_camera_bin3_frame");
            }
            other => panic!("unexpected payload {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn malformed_order_is_parsing_error() {
        let bridge = RosBridge::new(EventBus::default());
        let result = bridge.route(ORDERS_TOPIC, &json!({"shipments": 3}));
        assert!(matches!(result, Err(KitError::Parsing(_))));
    }

    #[test]
    fn unknown_topic_is_parsing_error() {
        let bridge = RosBridge::new(EventBus::default());
        assert!(matches!(
            bridge.route("/ariac/unknown", &json!({})),
            Err(KitError::Parsing(_))
        ));
    }

    #[test]
    fn publish_without_listeners_is_ok_zero() -> Result<(), Box<dyn std::error::Error>> {
        let bridge = RosBridge::new(EventBus::default());
        let n = bridge.route(ORDERS_TOPIC, &json!({"order_id": "order_1"}))?;
        assert_eq!(n, 0);
        Ok(())
    }

    #[test]
    fn oversized_camera_image_is_rejected() {
        let bridge = RosBridge::new(EventBus::default());
        let model = json!({
            "type": "gear_part",
            "pose": {
                "position": {"x": 0.0, "y": 0.0, "z": 0.0},
                "orientation": {"x": 0.0, "y": 0.0, "z": 0.0, "w": 1.0}
            }
        });
        let models: Vec<Value> = std::iter::repeat_n(model, MAX_DETECTIONS + 1).collect();
        let result = bridge.route("/ariac/logical_camera_bin1", &json!({ "models": models }));
        assert!(matches!(result, Err(KitError::Parsing(_))));
    }
}
