#![cfg(unix)]

use embedder::bus::{Channel, MemoryBus, NotificationBus, SHUTDOWN_TOKEN};
use embedder::coordinator::{ShutdownCoordinator, interrupt_process};
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};

const POLL: Duration = Duration::from_millis(200);

#[tokio::test]
#[serial]
async fn test_interrupt_process_delivers_sigint() {
    let mut interrupts = signal(SignalKind::interrupt()).unwrap();

    interrupt_process().unwrap();

    tokio::time::timeout(POLL, interrupts.recv())
        .await
        .expect("SIGINT should be delivered")
        .expect("signal stream should stay open");
}

#[tokio::test]
#[serial]
async fn test_shutdown_message_raises_sigint_after_unsubscribe() {
    let mut interrupts = signal(SignalKind::interrupt()).unwrap();
    let bus = MemoryBus::new();
    let listeners = ShutdownCoordinator::new(Arc::new(bus.clone()), POLL)
        .with_process_interrupt(true)
        .start();
    listeners.listening().await;
    let termination = listeners.termination();

    bus.publish(Channel::Shutdown, SHUTDOWN_TOKEN).await.unwrap();
    tokio::time::timeout(POLL * 2, interrupts.recv())
        .await
        .expect("SIGINT should follow the shutdown message")
        .expect("signal stream should stay open");

    assert!(termination.is_fired());
    assert_eq!(bus.active_subscriptions(Channel::NewEmbedding), 0);
    assert!(listeners.join().await.is_clean());
    assert_eq!(bus.active_subscriptions(Channel::Shutdown), 0);
}

#[tokio::test]
#[serial]
async fn test_no_sigint_unless_enabled() {
    let mut interrupts = signal(SignalKind::interrupt()).unwrap();
    let bus = MemoryBus::new();
    let listeners = ShutdownCoordinator::new(Arc::new(bus.clone()), POLL).start();
    listeners.listening().await;
    let termination = listeners.termination();

    bus.publish(Channel::Shutdown, SHUTDOWN_TOKEN).await.unwrap();
    tokio::time::timeout(POLL * 2, termination.fired())
        .await
        .expect("termination should be requested");
    assert!(listeners.join().await.is_clean());

    assert!(
        tokio::time::timeout(Duration::from_millis(50), interrupts.recv())
            .await
            .is_err()
    );
}
