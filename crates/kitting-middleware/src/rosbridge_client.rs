//! rosbridge v2 WebSocket client.
//!
//! One connection carries both directions:
//!
//! * **Inbound** – `{"op":"publish","topic":..,"msg":..}` frames for every
//!   subscribed topic are handed to [`RosBridge::route`], which puts them on
//!   the [`EventBus`][crate::bus::EventBus]. A reader task does this
//!   continuously, so topic delivery keeps flowing while the driver waits on
//!   a service call.
//!
//! * **Outbound** – `call_service` frames carry a unique id; the matching
//!   `service_response` is routed back to the waiting caller. A response with
//!   `"result": false` means the ROS service call itself failed and is
//!   reported as [`KitError::Transport`], exactly like an unreachable service.
//!
//! The client implements [`CompetitionControl`], [`MaterialLocationService`]
//! and [`InverseKinematicsService`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use kitting_types::{KitError, Pose, StorageUnit};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ros_bridge::{RosBridge, subscribed_topics};
use crate::services::{
    CompetitionControl, InverseKinematicsService, MaterialLocationService, PoseIkResponse,
    TriggerResponse,
};

pub const START_COMPETITION_SERVICE: &str = "/ariac/start_competition";
pub const MATERIAL_LOCATIONS_SERVICE: &str = "/ariac/material_locations";
pub const POSE_IK_SERVICE: &str = "pose_ik";

/// What came back for one `call_service`.
#[derive(Debug)]
struct ServiceReply {
    result: bool,
    values: Value,
}

type PendingCalls = Arc<Mutex<HashMap<String, oneshot::Sender<ServiceReply>>>>;

/// A connected rosbridge session.
pub struct RosbridgeClient {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingCalls,
    call_timeout: Duration,
}

impl RosbridgeClient {
    /// Open the WebSocket at `url` and start the reader and writer tasks.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// [`KitError::Transport`] when the connection cannot be established.
    pub async fn connect(
        url: &str,
        bridge: RosBridge,
        call_timeout: Duration,
    ) -> Result<Self, KitError> {
        let (ws_stream, _) = connect_async(url).await.map_err(|e| KitError::Transport {
            service: "rosbridge".to_string(),
            details: format!("connect to {url}: {e}"),
        })?;
        info!(url, "connected to rosbridge");

        let (mut ws_tx, mut ws_rx) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if let Err(e) = ws_tx.send(msg).await {
                    error!(error = %e, "rosbridge write failed");
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            loop {
                match ws_rx.next().await {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&bridge, &reader_pending, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        error!(error = %e, "rosbridge read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            warn!("rosbridge connection closed; failing outstanding service calls");
            // Dropping the senders wakes every waiter with a transport error.
            lock(&reader_pending).clear();
        });

        Ok(Self {
            outbound,
            pending,
            call_timeout,
        })
    }

    /// Subscribe to `topic`.
    pub fn subscribe(&self, topic: &str) -> Result<(), KitError> {
        self.send(build_subscribe_frame(topic))
    }

    /// Subscribe to orders, `/tf`, `/tf_static`, and all ten cameras.
    pub fn subscribe_all(&self) -> Result<(), KitError> {
        for topic in subscribed_topics() {
            self.subscribe(&topic)?;
        }
        Ok(())
    }

    /// Call `service` with `args` and return the response `values`.
    ///
    /// # Errors
    ///
    /// [`KitError::Transport`] when the frame cannot be sent, the call times
    /// out, the connection drops, or the service reports `result: false`.
    pub async fn call_service(&self, service: &str, args: Value) -> Result<Value, KitError> {
        let id = format!("call_service:{service}:{}", Uuid::new_v4());
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id.clone(), tx);

        if let Err(e) = self.send(build_call_frame(&id, service, &args)) {
            lock(&self.pending).remove(&id);
            return Err(e);
        }
        debug!(service, id = %id, "service call sent");

        let transport = |details: String| KitError::Transport {
            service: service.to_string(),
            details,
        };
        let reply = match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => return Err(transport("connection closed".to_string())),
            Err(_) => {
                lock(&self.pending).remove(&id);
                return Err(transport(format!(
                    "no response within {} ms",
                    self.call_timeout.as_millis()
                )));
            }
        };
        if !reply.result {
            return Err(transport(format!("service call failed: {}", reply.values)));
        }
        Ok(reply.values)
    }

    fn send(&self, frame: String) -> Result<(), KitError> {
        self.outbound
            .send(Message::Text(frame.into()))
            .map_err(|_| KitError::Channel("rosbridge writer task has stopped".to_string()))
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

fn build_subscribe_frame(topic: &str) -> String {
    json!({ "op": "subscribe", "topic": topic }).to_string()
}

fn build_call_frame(id: &str, service: &str, args: &Value) -> String {
    json!({ "op": "call_service", "id": id, "service": service, "args": args }).to_string()
}

/// Dispatch one inbound text frame. Malformed frames are logged and dropped.
fn handle_frame(bridge: &RosBridge, pending: &PendingCalls, text: &str) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!(error = %e, "dropping non-JSON rosbridge frame");
            return;
        }
    };

    match frame.get("op").and_then(Value::as_str) {
        Some("publish") => {
            let topic = frame.get("topic").and_then(Value::as_str).unwrap_or("");
            let msg = frame.get("msg").cloned().unwrap_or(Value::Null);
            if let Err(e) = bridge.route(topic, &msg) {
                warn!(topic, error = %e, "dropping rosbridge message");
            }
        }
        Some("service_response") => {
            let Some(id) = frame.get("id").and_then(Value::as_str) else {
                warn!("service_response without id");
                return;
            };
            let reply = ServiceReply {
                result: frame.get("result").and_then(Value::as_bool).unwrap_or(false),
                values: frame.get("values").cloned().unwrap_or(Value::Null),
            };
            match lock(pending).remove(id) {
                Some(tx) => {
                    let _ = tx.send(reply);
                }
                None => debug!(id, "late or unknown service_response"),
            }
        }
        Some("status") => {
            let level = frame.get("level").and_then(Value::as_str).unwrap_or("");
            let msg = frame.get("msg").and_then(Value::as_str).unwrap_or("");
            warn!(level, msg, "rosbridge status");
        }
        other => debug!(op = ?other, "ignoring rosbridge frame"),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(service: &str, values: Value) -> Result<T, KitError> {
    serde_json::from_value(values)
        .map_err(|e| KitError::Parsing(format!("{service} response: {e}")))
}

#[derive(Deserialize)]
struct MaterialLocationsResponse {
    #[serde(default)]
    storage_units: Vec<StorageUnit>,
}

#[async_trait]
impl CompetitionControl for RosbridgeClient {
    async fn start_competition(&self) -> Result<TriggerResponse, KitError> {
        let values = self.call_service(START_COMPETITION_SERVICE, json!({})).await?;
        decode(START_COMPETITION_SERVICE, values)
    }
}

#[async_trait]
impl MaterialLocationService for RosbridgeClient {
    async fn material_locations(
        &self,
        material_type: &str,
    ) -> Result<Vec<StorageUnit>, KitError> {
        let values = self
            .call_service(
                MATERIAL_LOCATIONS_SERVICE,
                json!({ "material_type": material_type }),
            )
            .await?;
        let response: MaterialLocationsResponse = decode(MATERIAL_LOCATIONS_SERVICE, values)?;
        Ok(response.storage_units)
    }
}

#[async_trait]
impl InverseKinematicsService for RosbridgeClient {
    async fn pose_ik(&self, part_pose: &Pose) -> Result<PoseIkResponse, KitError> {
        let values = self
            .call_service(POSE_IK_SERVICE, json!({ "part_pose": part_pose }))
            .await?;
        decode(POSE_IK_SERVICE, values)
    }
}
