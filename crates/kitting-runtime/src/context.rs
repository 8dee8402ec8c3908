//! State shared between bus delivery and the fulfillment driver.

use kitting_perception::sensor_store::SensorStateStore;
use kitting_types::{Event, EventPayload};
use tracing::{debug, info};

use crate::order_queue::OrderQueue;

/// Camera snapshots and pending orders. Both halves synchronise internally,
/// so the context is shared by `Arc` rather than guarded as a whole.
#[derive(Default)]
pub struct FulfillmentContext {
    sensors: SensorStateStore,
    orders: OrderQueue,
}

impl FulfillmentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sensors(&self) -> &SensorStateStore {
        &self.sensors
    }

    pub fn orders(&self) -> &OrderQueue {
        &self.orders
    }

    /// Apply one inbound bus event. Returns `false` for payloads the context
    /// does not track.
    pub fn ingest(&self, event: Event) -> bool {
        match event.payload {
            EventPayload::OrderReceived(order) => {
                info!(
                    order_id = %order.order_id,
                    shipments = order.shipments.len(),
                    "order received"
                );
                self.orders.enqueue(order);
                true
            }
            EventPayload::SensorSnapshot(snapshot) => {
                debug!(
                    sensor = %snapshot.sensor,
                    detections = snapshot.detections.len(),
                    "camera snapshot"
                );
                self.sensors.update(snapshot);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kitting_types::{Detection, Order, Pose, SensorId, SensorSnapshot};

    #[test]
    fn ingest_routes_orders_and_snapshots() {
        let ctx = FulfillmentContext::new();
        let order = Order {
            order_id: "order_0".into(),
            shipments: vec![],
        };
        assert!(ctx.ingest(Event::new("test", EventPayload::OrderReceived(order))));

        let sensor = SensorId::from_storage_unit("agv1").unwrap();
        let snapshot = SensorSnapshot {
            sensor,
            detections: vec![Detection {
                part_type: "gear_part".into(),
                pose: Pose::default(),
            }],
        };
        assert!(ctx.ingest(Event::new("test", EventPayload::SensorSnapshot(snapshot))));

        assert_eq!(ctx.orders().len(), 1);
        assert_eq!(ctx.sensors().get(sensor).unwrap().detections.len(), 1);
    }

    #[test]
    fn ingest_ignores_other_payloads() {
        let ctx = FulfillmentContext::new();
        let event = Event::new(
            "test",
            EventPayload::CompetitionStarted {
                message: "go".into(),
            },
        );
        assert!(!ctx.ingest(event));
        assert!(ctx.orders().is_empty());
    }
}
