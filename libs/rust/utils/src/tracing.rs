use futures::{Future, FutureExt};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format of the stdout log layer, selected through `LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn from_env() -> Self {
        match std::env::var("LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

pub fn setup_tracing() {
    setup_tracing_with(LogFormat::from_env());
}

pub fn setup_tracing_with(format: LogFormat) {
    let filter_layer = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hyper_util=off,reqwest=off"));

    // A second call (tests, embedded use) keeps the first subscriber.
    let result = match format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter_layer)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter_layer)
            .with(
                fmt::layer()
                    .with_line_number(true)
                    .compact()
                    .with_writer(std::io::stdout),
            )
            .try_init(),
    };

    if let Err(e) = result {
        eprintln!("tracing subscriber already installed: {e}");
    }
}

/// Installs tracing, then drives `future` to completion. Panics inside the
/// future are logged with a backtrace instead of unwinding past `main`.
pub async fn run_with_tracing<F, Fut>(future: F) -> anyhow::Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    setup_tracing();

    match std::panic::AssertUnwindSafe(future()).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, error_chain = ?e, "Service exited with error");
            Err(e)
        }
        Err(panic) => {
            let message = capture_panic_details(panic);
            Err(anyhow::anyhow!("service panicked: {message}"))
        }
    }
}

fn capture_panic_details(e: Box<dyn std::any::Any + Send>) -> String {
    let backtrace = backtrace::Backtrace::new();
    if let Some(s) = e.downcast_ref::<&str>() {
        error!(panic_message = *s, backtrace = ?backtrace, "Panic occurred with message");
        s.to_string()
    } else if let Some(s) = e.downcast_ref::<String>() {
        error!(panic_message = s, backtrace = ?backtrace, "Panic occurred with message");
        s.clone()
    } else {
        error!(backtrace = ?backtrace, "Panic occurred but the payload is not a string");
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_with_tracing_reports_panics_as_errors() {
        let result = run_with_tracing(|| async {
            panic!("boom");
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[tokio::test]
    async fn run_with_tracing_passes_through_errors() {
        let result = run_with_tracing(|| async { Err(anyhow::anyhow!("store down")) }).await;
        assert_eq!(result.unwrap_err().to_string(), "store down");
    }

    #[tokio::test]
    async fn run_with_tracing_ok() {
        assert!(run_with_tracing(|| async { Ok(()) }).await.is_ok());
    }
}
