//! Listener startup and lifecycle.
//!
//! A node serves two HTTP listeners side by side: the public surface and the
//! cache-serving surface peers fetch derivatives from. Both stop together.

mod lifecycle;
mod shutdown;

use std::future::IntoFuture;
use std::io;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use self::lifecycle::serve_with_shutdown;
pub use self::shutdown::shutdown_signal;
use crate::TRACING_TARGET_SERVER_STARTUP;
use crate::config::ServerConfig;

/// Binds both listeners and serves them until `shutdown` is cancelled.
///
/// # Errors
///
/// Returns an error if either address cannot be bound or a listener fails
/// while serving.
pub async fn serve(
    public: Router,
    cache: Router,
    config: &ServerConfig,
    cache_port: u16,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let public_listener = bind(config.server_addr(), "public").await?;
    let cache_listener = bind(config.addr_with_port(cache_port), "cache").await?;

    serve_with_shutdown(config, || async move {
        let public_shutdown = shutdown.clone();
        let public = axum::serve(public_listener, public)
            .with_graceful_shutdown(async move { public_shutdown.cancelled().await });
        let cache = axum::serve(cache_listener, cache)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });

        tokio::try_join!(public.into_future(), cache.into_future()).map(|_| ())
    })
    .await
}

async fn bind(addr: SocketAddr, listener: &'static str) -> io::Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(bound) => {
            tracing::info!(
                target: TRACING_TARGET_SERVER_STARTUP,
                listener,
                addr = %addr,
                "Listener bound"
            );
            Ok(bound)
        }
        Err(err) => {
            tracing::error!(
                target: TRACING_TARGET_SERVER_STARTUP,
                listener,
                addr = %addr,
                error = %err,
                "Failed to bind listener"
            );
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    use axum::routing::get;

    use super::*;

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let config = ServerConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            ..ServerConfig::default()
        };

        let err = serve(
            Router::new(),
            Router::new(),
            &config,
            0,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    }

    #[tokio::test]
    async fn stops_when_cancelled() {
        let config = ServerConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            ..ServerConfig::default()
        };
        let token = CancellationToken::new();
        let public = Router::new().route("/ping", get(|| async { "pong" }));

        let running = tokio::spawn({
            let token = token.clone();
            async move { serve(public, Router::new(), &config, 0, token).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
