//! Graceful shutdown support for the gateway.
//!
//! Once shutdown is triggered the listener stops accepting connections and
//! in-flight requests get a drain window to finish. Requests still running
//! when the window closes are cancelled through their request token, which
//! aborts their upstream calls and releases their connections.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Configuration for graceful shutdown behavior.
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// How long in-flight requests may keep running after shutdown starts
    /// (default: 30 seconds)
    pub drain_timeout: Duration,
    /// Whether to handle OS signals (SIGTERM, SIGINT) automatically (default: true)
    pub handle_signals: bool,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            handle_signals: true,
        }
    }
}

/// Create a future that completes on SIGTERM or SIGINT (Ctrl+C).
#[cfg(unix)]
pub async fn signal_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to install signal handlers");
                return std::future::pending().await;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT (Ctrl+C)"),
    }
}

/// Create a future that completes on Ctrl+C.
#[cfg(not(unix))]
pub async fn signal_shutdown() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C"),
        Err(e) => {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    }
}

/// Serve `app` until `trigger` completes (or an OS signal arrives, when
/// enabled), then drain.
///
/// `in_flight` is the parent of every request's cancellation token; it is
/// cancelled if requests outlive the drain window.
pub async fn run_with_graceful_shutdown<F>(
    listener: tokio::net::TcpListener,
    app: axum::Router,
    config: ShutdownConfig,
    in_flight: CancellationToken,
    trigger: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let stop = CancellationToken::new();

    let stop_on_signal = stop.clone();
    let handle_signals = config.handle_signals;
    let signal_task = tokio::spawn(async move {
        if handle_signals {
            tokio::select! {
                _ = trigger => {}
                _ = signal_shutdown() => {}
            }
        } else {
            trigger.await;
        }
        info!("Initiating graceful shutdown");
        stop_on_signal.cancel();
    });

    let stop_watch = stop.clone();
    let drain_timeout = config.drain_timeout;
    let drain_task = tokio::spawn(async move {
        stop_watch.cancelled().await;
        tokio::time::sleep(drain_timeout).await;
        warn!(
            timeout = ?drain_timeout,
            "Drain timeout reached, cancelling in-flight requests"
        );
        in_flight.cancel();
    });

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(stop.cancelled_owned())
        .await;

    signal_task.abort();
    drain_task.abort();
    info!("Graceful shutdown complete");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Router};
    use tokio::sync::oneshot;

    async fn listener() -> tokio::net::TcpListener {
        tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port")
    }

    #[test]
    fn test_default_config() {
        let config = ShutdownConfig::default();
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert!(config.handle_signals);
    }

    #[tokio::test]
    async fn test_trigger_stops_server() {
        let (tx, rx) = oneshot::channel::<()>();
        let in_flight = CancellationToken::new();
        let config = ShutdownConfig {
            drain_timeout: Duration::from_secs(5),
            handle_signals: false,
        };

        let server = tokio::spawn(run_with_graceful_shutdown(
            listener().await,
            Router::new().route("/", get(|| async { "ok" })),
            config,
            in_flight.clone(),
            async move {
                let _ = rx.await;
            },
        ));

        tx.send(()).expect("server is waiting");
        let result = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .expect("server stops promptly")
            .expect("server task completes");
        assert!(result.is_ok());
        assert!(!in_flight.is_cancelled());
    }

    #[tokio::test]
    async fn test_slow_requests_are_cancelled_after_drain() {
        let listener = listener().await;
        let addr = listener.local_addr().expect("local addr");
        let in_flight = CancellationToken::new();
        let request_token = in_flight.child_token();

        let app = Router::new().route(
            "/",
            get(move || {
                let token = request_token.clone();
                async move {
                    token.cancelled().await;
                    "cancelled"
                }
            }),
        );

        let (tx, rx) = oneshot::channel::<()>();
        let server = tokio::spawn(run_with_graceful_shutdown(
            listener,
            app,
            ShutdownConfig {
                drain_timeout: Duration::from_millis(50),
                handle_signals: false,
            },
            in_flight.clone(),
            async move {
                let _ = rx.await;
            },
        ));

        let client = tokio::spawn(async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await.expect("connect");
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            stream
                .write_all(b"GET / HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
                .await
                .expect("write request");
            let mut response = Vec::new();
            let _ = stream.read_to_end(&mut response).await;
            String::from_utf8_lossy(&response).into_owned()
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).expect("server is waiting");

        let response = tokio::time::timeout(Duration::from_secs(5), client)
            .await
            .expect("request finishes")
            .expect("client task completes");
        assert!(response.ends_with("cancelled"));
        assert!(in_flight.is_cancelled());

        let _ = tokio::time::timeout(Duration::from_secs(5), server).await;
    }
}
