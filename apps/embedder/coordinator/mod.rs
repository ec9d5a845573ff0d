//! Shutdown coordination across the processes sharing one bus.
//!
//! Each process runs two listeners: the data loop on `new_embedding`, which
//! only observes, and the shutdown loop on `shutdown`. On any shutdown
//! message the shutdown loop cancels the data loop, waits until it has
//! unsubscribed, cancels itself and raises the process termination request:
//! an in-process [`Trigger`] and, when enabled, SIGINT on the process.
//! A process that initiates shutdown publishes the token and also cancels
//! its own loops directly, so it does not wait on the round trip.

mod signal;
mod subscription;

pub use signal::{Trigger, interrupt_process};
pub use subscription::{LoopControl, LoopOutcome, LoopState};

use crate::bus::{Channel, NotificationBus, SHUTDOWN_TOKEN};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use subscription::{MessageHandler, run_subscription};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const OBSERVED_CAPACITY: usize = 256;

pub struct ShutdownCoordinator {
    bus: Arc<dyn NotificationBus>,
    poll_timeout: Duration,
    observed: broadcast::Sender<String>,
    interrupt_process: bool,
}

impl ShutdownCoordinator {
    pub fn new(bus: Arc<dyn NotificationBus>, poll_timeout: Duration) -> Self {
        let (observed, _) = broadcast::channel(OBSERVED_CAPACITY);
        Self {
            bus,
            poll_timeout,
            observed,
            interrupt_process: false,
        }
    }

    /// Also raise SIGINT on this process when a shutdown message arrives.
    /// The host must have a SIGINT handler installed, or the default action
    /// kills the process outright.
    pub fn with_process_interrupt(mut self, enabled: bool) -> Self {
        self.interrupt_process = enabled;
        self
    }

    /// Ids the data loop receives from now on.
    pub fn observe(&self) -> broadcast::Receiver<String> {
        self.observed.subscribe()
    }

    /// Spawns both listeners. They run until shutdown or a bus failure.
    pub fn start(&self) -> Listeners {
        let termination = Trigger::new();

        let (data, data_state) = LoopControl::new();
        let data_task = tokio::spawn(run_subscription(
            Arc::clone(&self.bus),
            Channel::NewEmbedding,
            self.poll_timeout,
            data.cancellation().clone(),
            data_state,
            DataObserver {
                forward: self.observed.clone(),
            },
        ));

        let (shutdown, shutdown_state) = LoopControl::new();
        let shutdown_task = tokio::spawn(run_subscription(
            Arc::clone(&self.bus),
            Channel::Shutdown,
            self.poll_timeout,
            shutdown.cancellation().clone(),
            shutdown_state,
            ShutdownHandler {
                data: data.clone(),
                own: shutdown.clone(),
                termination: termination.clone(),
                interrupt_process: self.interrupt_process,
            },
        ));

        info!(
            poll_timeout_ms = self.poll_timeout.as_millis() as u64,
            "Listeners started"
        );

        Listeners {
            bus: Arc::clone(&self.bus),
            data,
            shutdown,
            data_task,
            shutdown_task,
            termination,
        }
    }
}

/// Final outcome of both listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub data: LoopOutcome,
    pub shutdown: LoopOutcome,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.data == LoopOutcome::Cancelled && self.shutdown == LoopOutcome::Cancelled
    }
}

/// Owner of the two running listeners.
pub struct Listeners {
    bus: Arc<dyn NotificationBus>,
    data: LoopControl,
    shutdown: LoopControl,
    data_task: JoinHandle<LoopOutcome>,
    shutdown_task: JoinHandle<LoopOutcome>,
    termination: Trigger,
}

impl Listeners {
    /// Raised by the shutdown loop when a shutdown message arrives.
    pub fn termination(&self) -> Trigger {
        self.termination.clone()
    }

    pub fn data_loop(&self) -> &LoopControl {
        &self.data
    }

    pub fn shutdown_loop(&self) -> &LoopControl {
        &self.shutdown
    }

    /// Resolves once both loops are listening (or already stopped).
    pub async fn listening(&self) {
        self.data.listening().await;
        self.shutdown.listening().await;
    }

    /// Process-initiated shutdown: broadcast the token to every peer, then
    /// stop the local loops without waiting for the broadcast to come back.
    pub async fn initiate_shutdown(self) -> ShutdownReport {
        info!("Initiating shutdown");
        if let Err(e) = self.bus.publish(Channel::Shutdown, SHUTDOWN_TOKEN).await {
            warn!(error = %e, "Failed to broadcast shutdown, stopping local listeners only");
        }

        self.data.cancel();
        self.data.unsubscribed().await;
        self.shutdown.cancel();

        self.join().await
    }

    /// Waits for both loop tasks to finish.
    pub async fn join(self) -> ShutdownReport {
        let data = flatten(self.data_task.await);
        let shutdown = flatten(self.shutdown_task.await);

        info!(data = ?data, shutdown = ?shutdown, "Listeners stopped");
        ShutdownReport { data, shutdown }
    }
}

fn flatten(result: Result<LoopOutcome, tokio::task::JoinError>) -> LoopOutcome {
    result.unwrap_or_else(|e| LoopOutcome::Errored(format!("listener task failed: {e}")))
}

struct DataObserver {
    forward: broadcast::Sender<String>,
}

#[async_trait]
impl MessageHandler for DataObserver {
    async fn on_message(&mut self, payload: String) {
        if payload.trim().is_empty() {
            warn!("Ignoring empty new_embedding payload");
            return;
        }
        info!(post_id = %payload, "Received new post_id");
        // Nobody observing is fine.
        let _ = self.forward.send(payload);
    }
}

struct ShutdownHandler {
    data: LoopControl,
    own: LoopControl,
    termination: Trigger,
    interrupt_process: bool,
}

#[async_trait]
impl MessageHandler for ShutdownHandler {
    async fn on_message(&mut self, payload: String) {
        info!(token = %payload, "Shutdown message received");

        self.data.cancel();
        self.data.unsubscribed().await;
        self.own.cancel();

        if !self.termination.fire() {
            return;
        }
        info!("Process termination requested");

        if self.interrupt_process {
            match interrupt_process() {
                Ok(()) => info!("SIGINT raised"),
                Err(e) => warn!(error = %e, "Failed to raise SIGINT"),
            }
        }
    }
}
