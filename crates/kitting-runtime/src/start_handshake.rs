//! Competition start trigger with transport-level retry.
//!
//! Only transport failures are retried. An answer of `success: false` is a
//! decision by the simulator and ends the handshake immediately. Whatever the
//! outcome, the driver is released afterwards.

use std::time::Duration;

use kitting_middleware::{CompetitionControl, EventBus, Topic};
use kitting_types::{Event, EventPayload};
use tracing::{error, info, warn};

pub const DEFAULT_MAX_RETRIES: u32 = 125;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(4);

const SOURCE: &str = "kitting-runtime::start_handshake";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Started { message: String, attempts: u32 },
    Rejected { message: String, attempts: u32 },
    RetriesExhausted { attempts: u32 },
}

impl HandshakeOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            HandshakeOutcome::Started { attempts, .. }
            | HandshakeOutcome::Rejected { attempts, .. }
            | HandshakeOutcome::RetriesExhausted { attempts } => *attempts,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StartHandshake {
    max_retries: u32,
    backoff: Duration,
}

impl Default for StartHandshake {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF)
    }
}

impl StartHandshake {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Call the start service once, then up to `max_retries` more times while
    /// it cannot be reached, sleeping `backoff` between attempts.
    ///
    /// On success a `CompetitionStarted` alert is published on `bus`.
    pub async fn run(&self, control: &dyn CompetitionControl, bus: &EventBus) -> HandshakeOutcome {
        let mut attempts = 0;
        loop {
            attempts += 1;
            match control.start_competition().await {
                Ok(response) if response.success => {
                    info!(attempts, message = %response.message, "competition started");
                    let event = Event::new(
                        SOURCE,
                        EventPayload::CompetitionStarted {
                            message: response.message.clone(),
                        },
                    );
                    let _ = bus.publish_to(Topic::SystemAlerts, event);
                    return HandshakeOutcome::Started {
                        message: response.message,
                        attempts,
                    };
                }
                Ok(response) => {
                    warn!(attempts, message = %response.message, "start competition rejected");
                    return HandshakeOutcome::Rejected {
                        message: response.message,
                        attempts,
                    };
                }
                Err(e) if attempts <= self.max_retries => {
                    warn!(
                        attempt = attempts,
                        max_retries = self.max_retries,
                        error = %e,
                        "start competition unreachable, retrying in {:?}",
                        self.backoff
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => {
                    error!(attempts, error = %e, "start competition retries exhausted");
                    return HandshakeOutcome::RetriesExhausted { attempts };
                }
            }
        }
    }
}
