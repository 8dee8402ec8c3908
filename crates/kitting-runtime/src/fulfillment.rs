//! [`FulfillmentDriver`] – the order → shipment → product state machine.
//!
//! Each call to [`FulfillmentDriver::step`] performs exactly one transition:
//!
//! 1. **Idle** – take the newest order out of the [`OrderQueue`].
//! 2. **ProcessingOrder** – descend into the order's newest shipment, or
//!    finish the order once it has none left.
//! 3. **ProcessingShipment** – descend into the newest product, or pop the
//!    shipment once it is empty.
//! 4. **ProcessingProduct** – run locate → resolve → transform → solve for
//!    every non-belt candidate, then pop the product whatever happened.
//!
//! Failures never leave the step: each one is logged at the level its
//! [`Severity`] calls for, recorded in the [`ProductReport`], and the driver
//! moves on. Every report is also published on [`Topic::Fulfillment`].
//!
//! Inbound orders and camera snapshots are drained from the bus before every
//! step; the in-flight order lives outside the queue, so orders arriving
//! meanwhile wait their turn.
//!
//! [`OrderQueue`]: crate::order_queue::OrderQueue

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kitting_middleware::{
    CompetitionControl, EventBus, InverseKinematicsService, MaterialLocationService, Topic,
    TopicReceiver, TransformProvider,
};
use kitting_perception::frame_stage::{
    DEFAULT_ROBOT_BASE_FRAME, DEFAULT_STANDOFF_M, DEFAULT_TRANSFORM_TIMEOUT, FrameTransformStage,
};
use kitting_perception::resolver::PoseResolver;
use kitting_types::{
    CandidateReport, CandidateResult, Event, EventPayload, JointSolutionSet, KitError, Order,
    Pose, ProductOutcome, ProductReport, Severity,
};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::context::FulfillmentContext;
use crate::kinematics::KinematicsNegotiator;
use crate::locator::MaterialLocator;
use crate::start_handshake::{DEFAULT_BACKOFF, DEFAULT_MAX_RETRIES, HandshakeOutcome, StartHandshake};

const SOURCE: &str = "kitting-runtime::fulfillment";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FulfillmentConfig {
    pub robot_base_frame: String,
    /// Vertical clearance added above each resolved part, metres.
    pub standoff_m: f64,
    pub transform_timeout: Duration,
    /// Sleep between polls of an empty order queue.
    pub poll_interval: Duration,
    pub start_max_retries: u32,
    pub start_backoff: Duration,
    /// Pause after the start handshake before the first poll.
    pub startup_grace: Duration,
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            robot_base_frame: DEFAULT_ROBOT_BASE_FRAME.to_string(),
            standoff_m: DEFAULT_STANDOFF_M,
            transform_timeout: DEFAULT_TRANSFORM_TIMEOUT,
            poll_interval: Duration::from_secs(1),
            start_max_retries: DEFAULT_MAX_RETRIES,
            start_backoff: DEFAULT_BACKOFF,
            startup_grace: Duration::from_secs(1),
        }
    }
}

impl FulfillmentConfig {
    pub fn handshake(&self) -> StartHandshake {
        StartHandshake::new(self.start_max_retries, self.start_backoff)
    }
}

/// The outbound services the pipeline depends on.
#[derive(Clone)]
pub struct FulfillmentServices {
    pub locations: Arc<dyn MaterialLocationService>,
    pub transforms: Arc<dyn TransformProvider>,
    pub kinematics: Arc<dyn InverseKinematicsService>,
}

// ─────────────────────────────────────────────────────────────────────────────
// State machine
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    AwaitingStart,
    Idle,
    ProcessingOrder,
    ProcessingShipment,
    ProcessingProduct,
}

/// What a single [`FulfillmentDriver::step`] did.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    NotStarted,
    Idle,
    OrderStarted { order_id: String },
    ShipmentStarted { shipment_type: String },
    ProductStarted { part_type: String },
    ProductProcessed(ProductReport),
    ShipmentCompleted { shipment_type: String },
    OrderCompleted { order_id: String },
}

pub struct FulfillmentDriver {
    config: FulfillmentConfig,
    ctx: Arc<FulfillmentContext>,
    locator: MaterialLocator,
    frames: FrameTransformStage,
    kinematics: KinematicsNegotiator,
    bus: EventBus,
    inbound: Vec<TopicReceiver>,
    state: DriverState,
    current: Option<Order>,
}

impl FulfillmentDriver {
    /// Build a driver that consumes orders and camera snapshots from `bus`.
    /// Subscriptions are taken here, so nothing published after construction
    /// is missed.
    pub fn new(
        config: FulfillmentConfig,
        ctx: Arc<FulfillmentContext>,
        services: FulfillmentServices,
        bus: EventBus,
    ) -> Self {
        let frames = FrameTransformStage::new(services.transforms)
            .with_robot_base_frame(config.robot_base_frame.clone())
            .with_standoff(config.standoff_m)
            .with_timeout(config.transform_timeout);
        let inbound = vec![
            bus.subscribe_to(Topic::Orders),
            bus.subscribe_to(Topic::LogicalCameras),
        ];
        Self {
            locator: MaterialLocator::new(services.locations),
            kinematics: KinematicsNegotiator::new(services.kinematics),
            frames,
            ctx,
            bus,
            inbound,
            state: DriverState::AwaitingStart,
            current: None,
            config,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Orders waiting in the queue, excluding the one in flight.
    pub fn pending_orders(&self) -> usize {
        self.ctx.orders().len()
    }

    pub fn context(&self) -> &Arc<FulfillmentContext> {
        &self.ctx
    }

    /// Run the start handshake, wait out the startup grace period and open
    /// the gate to order processing, whatever the handshake's outcome.
    pub async fn start(&mut self, control: &dyn CompetitionControl) -> HandshakeOutcome {
        let outcome = self.config.handshake().run(control, &self.bus).await;
        if !self.config.startup_grace.is_zero() {
            tokio::time::sleep(self.config.startup_grace).await;
        }
        self.release();
        outcome
    }

    /// Open the gate without a handshake.
    pub fn release(&mut self) {
        if self.state == DriverState::AwaitingStart {
            info!(
                cameras_reporting = self.ctx.sensors().observed(),
                pending = ?self.ctx.orders().order_ids(),
                "fulfillment driver released"
            );
            self.state = DriverState::Idle;
        }
    }

    /// Loop [`step`][Self::step] until `shutdown` is set, sleeping
    /// `poll_interval` whenever there is nothing to do.
    pub async fn run(&mut self, shutdown: Arc<AtomicBool>) {
        info!(
            poll_ms = u64::try_from(self.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
            base_frame = self.frames.robot_base_frame(),
            "fulfillment driver running"
        );
        while !shutdown.load(Ordering::Acquire) {
            match self.step().await {
                StepOutcome::Idle | StepOutcome::NotStarted => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                _ => tokio::task::yield_now().await,
            }
        }
        info!("fulfillment driver stopped");
    }

    /// Perform one state transition.
    pub async fn step(&mut self) -> StepOutcome {
        self.drain_bus_events();

        match self.state {
            DriverState::AwaitingStart => StepOutcome::NotStarted,
            DriverState::Idle => self.step_idle(),
            DriverState::ProcessingOrder => self.step_order(),
            DriverState::ProcessingShipment => self.step_shipment(),
            DriverState::ProcessingProduct => self.step_product().await,
        }
    }

    fn step_idle(&mut self) -> StepOutcome {
        match self.ctx.orders().pop_latest() {
            Some(order) => {
                info!(order_id = %order.order_id, shipments = order.shipments.len(), "processing order");
                let order_id = order.order_id.clone();
                self.current = Some(order);
                self.state = DriverState::ProcessingOrder;
                StepOutcome::OrderStarted { order_id }
            }
            None => StepOutcome::Idle,
        }
    }

    fn step_order(&mut self) -> StepOutcome {
        let Some(order) = self.current.as_ref() else {
            return self.reset();
        };
        match order.shipments.last() {
            Some(shipment) => {
                info!(
                    order_id = %order.order_id,
                    shipment_type = %shipment.shipment_type,
                    agv_id = %shipment.agv_id,
                    products = shipment.products.len(),
                    "processing shipment"
                );
                let shipment_type = shipment.shipment_type.clone();
                self.state = DriverState::ProcessingShipment;
                StepOutcome::ShipmentStarted { shipment_type }
            }
            None => {
                let order_id = order.order_id.clone();
                info!(order_id = %order_id, "order complete");
                self.current = None;
                self.state = DriverState::Idle;
                StepOutcome::OrderCompleted { order_id }
            }
        }
    }

    fn step_shipment(&mut self) -> StepOutcome {
        let Some(order) = self.current.as_mut() else {
            return self.reset();
        };
        let Some(shipment) = order.shipments.last() else {
            self.state = DriverState::ProcessingOrder;
            return self.step_order();
        };
        match shipment.products.last() {
            Some(product) => {
                let part_type = product.part_type.clone();
                self.state = DriverState::ProcessingProduct;
                StepOutcome::ProductStarted { part_type }
            }
            None => {
                let shipment_type = shipment.shipment_type.clone();
                order.shipments.pop();
                debug!(shipment_type = %shipment_type, "shipment complete");
                self.state = DriverState::ProcessingOrder;
                StepOutcome::ShipmentCompleted { shipment_type }
            }
        }
    }

    async fn step_product(&mut self) -> StepOutcome {
        let Some((order_id, shipment_type, part_type)) = self.current.as_ref().and_then(|o| {
            let shipment = o.shipments.last()?;
            let product = shipment.products.last()?;
            Some((
                o.order_id.clone(),
                shipment.shipment_type.clone(),
                product.part_type.clone(),
            ))
        }) else {
            self.state = DriverState::ProcessingShipment;
            return self.step_shipment();
        };

        let outcome = self.process_product(&part_type).await;

        // Popped exactly once, whatever the pipeline reported.
        if let Some(shipment) = self.current.as_mut().and_then(|o| o.shipments.last_mut()) {
            shipment.products.pop();
        }
        self.state = DriverState::ProcessingShipment;

        let report = ProductReport {
            order_id,
            shipment_type,
            part_type,
            outcome,
        };
        self.publish_report(&report);
        StepOutcome::ProductProcessed(report)
    }

    async fn process_product(&self, part_type: &str) -> ProductOutcome {
        let units = match self.locator.locate(part_type).await {
            Ok(units) => units,
            Err(e) => {
                log_failure(&e, part_type, None);
                return ProductOutcome::LocatorFailed(e);
            }
        };

        let mut candidates = Vec::with_capacity(units.len());
        for unit in units {
            let result = if unit.is_belt() {
                debug!(product_type = part_type, "skipping belt candidate");
                CandidateResult::SkippedBelt
            } else {
                match self.solve_candidate(&unit.unit_id, part_type).await {
                    Ok((target_pose, solutions)) => {
                        log_solutions(part_type, &unit.unit_id, &target_pose, &solutions);
                        CandidateResult::Solved {
                            target_pose,
                            solutions,
                        }
                    }
                    Err(e) => {
                        log_failure(&e, part_type, Some(&unit.unit_id));
                        CandidateResult::Failed(e)
                    }
                }
            };
            candidates.push(CandidateReport {
                unit_id: unit.unit_id,
                result,
            });
        }
        ProductOutcome::Candidates(candidates)
    }

    async fn solve_candidate(
        &self,
        unit_id: &str,
        part_type: &str,
    ) -> Result<(Pose, JointSolutionSet), KitError> {
        let resolved = PoseResolver::new(self.ctx.sensors()).resolve(unit_id, part_type)?;
        debug!(unit_id, product_type = part_type, pose = %resolved.pose, "part located in camera frame");
        let target = self.frames.transform(&resolved.pose, unit_id).await?;
        let solutions = self.kinematics.solve(&target).await?;
        Ok((target, solutions))
    }

    fn publish_report(&self, report: &ProductReport) {
        let event = Event::new(SOURCE, EventPayload::ProductProcessed(report.clone()));
        if let Err(e) = self.bus.publish_to(Topic::Fulfillment, event) {
            debug!(error = %e, "no fulfillment listeners");
        }
    }

    fn reset(&mut self) -> StepOutcome {
        warn!(state = ?self.state, "no order in flight; returning to idle");
        self.current = None;
        self.state = DriverState::Idle;
        StepOutcome::Idle
    }

    /// Non-blocking drain of pending inbound bus events into the context.
    fn drain_bus_events(&mut self) {
        for rx in &mut self.inbound {
            loop {
                match rx.try_recv() {
                    Ok(event) => {
                        self.ctx.ingest(event);
                    }
                    Err(broadcast::error::TryRecvError::Empty) => break,
                    Err(broadcast::error::TryRecvError::Lagged(n)) => {
                        warn!(topic = ?rx.topic(), skipped = n, "driver lagged behind bus");
                    }
                    Err(broadcast::error::TryRecvError::Closed) => break,
                }
            }
        }
    }
}

fn log_failure(err: &KitError, part_type: &str, unit_id: Option<&str>) {
    let unit_id = unit_id.unwrap_or("-");
    match err.severity() {
        Severity::Expected => info!(product_type = part_type, unit_id, "{err}"),
        Severity::Malformed => warn!(product_type = part_type, unit_id, "{err}"),
        Severity::Fault => error!(product_type = part_type, unit_id, "{err}"),
    }
}

fn log_solutions(part_type: &str, unit_id: &str, target: &Pose, solutions: &JointSolutionSet) {
    info!(
        product_type = part_type,
        unit_id,
        target = %target,
        count = solutions.count(),
        "IK solutions found"
    );
    for (i, s) in solutions.solutions.iter().enumerate() {
        let [j0, j1, j2, j3, j4, j5] = s.joint_angles;
        info!(solution = i, j0, j1, j2, j3, j4, j5, "joint angles");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
