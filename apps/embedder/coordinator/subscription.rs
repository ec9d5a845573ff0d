use super::signal::Trigger;
use crate::bus::{Channel, NotificationBus, Received, Subscription};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, warn};

/// Lifecycle of one subscription loop.
///
/// `Starting -> Subscribed -> Listening -> (Cancelled | Errored) -> Unsubscribed`.
/// A loop whose subscribe call fails goes `Starting -> Errored -> Unsubscribed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Subscribed,
    Listening,
    Cancelled,
    Errored,
    Unsubscribed,
}

impl LoopState {
    /// The loop has stopped listening and will not receive again.
    pub fn is_stopping(&self) -> bool {
        matches!(
            self,
            LoopState::Cancelled | LoopState::Errored | LoopState::Unsubscribed
        )
    }
}

/// How a loop ended. Cancellation is the clean path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopOutcome {
    Cancelled,
    Errored(String),
}

#[async_trait]
pub(crate) trait MessageHandler: Send {
    async fn on_message(&mut self, payload: String);
}

/// Cancellation and state view of a running loop, shared with whoever needs
/// to stop it or wait for it.
#[derive(Clone, Debug)]
pub struct LoopControl {
    cancel: Trigger,
    state: watch::Receiver<LoopState>,
}

impl LoopControl {
    pub(crate) fn new() -> (Self, watch::Sender<LoopState>) {
        let (tx, rx) = watch::channel(LoopState::Starting);
        (
            Self {
                cancel: Trigger::new(),
                state: rx,
            },
            tx,
        )
    }

    pub fn cancel(&self) {
        if self.cancel.fire() {
            debug!("Loop cancellation requested");
        }
    }

    pub fn cancellation(&self) -> &Trigger {
        &self.cancel
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Resolves once the loop reached `Listening` or already stopped.
    pub async fn listening(&self) {
        self.wait_for(|s| *s == LoopState::Listening || s.is_stopping())
            .await;
    }

    /// Resolves once the loop released its subscription. Also resolves if
    /// the loop task died without reporting it.
    pub async fn unsubscribed(&self) {
        self.wait_for(|s| *s == LoopState::Unsubscribed).await;
    }

    async fn wait_for(&self, predicate: impl FnMut(&LoopState) -> bool) {
        let mut state = self.state.clone();
        let _ = state.wait_for(predicate).await;
    }
}

/// Subscribes to `channel` and feeds each message to `handler` until
/// `control` is cancelled or the bus fails. Whatever the exit path, the
/// subscription is released before this returns.
pub(crate) async fn run_subscription<H: MessageHandler>(
    bus: Arc<dyn NotificationBus>,
    channel: Channel,
    poll_timeout: Duration,
    cancel: Trigger,
    state: watch::Sender<LoopState>,
    mut handler: H,
) -> LoopOutcome {
    let set_state = |next: LoopState| {
        debug!(channel = %channel, state = ?next, "Subscription loop state");
        state.send_replace(next);
    };

    let mut subscription = match bus.subscribe(channel).await {
        Ok(subscription) => subscription,
        Err(e) => {
            error!(channel = %channel, error = %e, "Subscribe failed, listener not started");
            set_state(LoopState::Errored);
            set_state(LoopState::Unsubscribed);
            return LoopOutcome::Errored(e.to_string());
        }
    };
    set_state(LoopState::Subscribed);

    set_state(LoopState::Listening);
    let outcome = listen(subscription.as_mut(), poll_timeout, &cancel, &mut handler).await;

    set_state(match outcome {
        LoopOutcome::Cancelled => LoopState::Cancelled,
        LoopOutcome::Errored(_) => LoopState::Errored,
    });

    if let Err(e) = subscription.unsubscribe().await {
        warn!(channel = %channel, error = %e, "Unsubscribe failed");
    }
    set_state(LoopState::Unsubscribed);

    outcome
}

async fn listen<H: MessageHandler>(
    subscription: &mut dyn Subscription,
    poll_timeout: Duration,
    cancel: &Trigger,
    handler: &mut H,
) -> LoopOutcome {
    let channel = subscription.channel();

    loop {
        if cancel.is_fired() {
            return LoopOutcome::Cancelled;
        }

        let received = tokio::select! {
            biased;
            _ = cancel.fired() => return LoopOutcome::Cancelled,
            received = subscription.receive(poll_timeout) => received,
        };

        match received {
            Ok(Received::Timeout) => {}
            Ok(Received::Message(payload)) => handler.on_message(payload).await,
            Err(e) if !e.is_terminal_for_listener() => {
                warn!(channel = %channel, error = %e, "Ignoring malformed message");
            }
            Err(e) => {
                error!(channel = %channel, error = %e, "Listener stopped on bus failure");
                return LoopOutcome::Errored(e.to_string());
            }
        }
    }
}
