use std::sync::Arc;
use tokio::sync::watch;

/// One-shot, idempotent flag that any number of tasks can raise and await.
///
/// Used both as the cancellation signal of a subscription loop and as the
/// termination request a shutdown loop raises towards the hosting process.
#[derive(Clone, Debug)]
pub struct Trigger {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for Trigger {
    fn default() -> Self {
        Self::new()
    }
}

impl Trigger {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raises the flag. Returns `true` only for the call that raised it.
    pub fn fire(&self) -> bool {
        !self.tx.send_replace(true)
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the flag is raised, immediately if it already is.
    pub async fn fired(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

/// Sends SIGINT to this process, the request a terminal Ctrl+C makes.
#[cfg(unix)]
pub fn interrupt_process() -> std::io::Result<()> {
    let pid = std::process::id() as libc::pid_t;
    if unsafe { libc::kill(pid, libc::SIGINT) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
pub fn interrupt_process() -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "raising SIGINT needs a unix host",
    ))
}
