//! HTTP server implementation.

use std::future::Future;
use std::net::SocketAddr;

use axum::Router;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::{GateError, Result};

/// HTTP server for the gate.
pub struct HttpServer {
    /// Bound listener
    listener: TcpListener,
    /// Application routes
    router: Router,
}

impl HttpServer {
    /// Bind `addr` and prepare to serve `router`.
    ///
    /// Binding happens eagerly so that port 0 can be resolved through
    /// [`local_addr`](Self::local_addr) before serving.
    pub async fn bind(addr: SocketAddr, router: Router) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, router })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until the process is killed.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve with graceful shutdown.
    ///
    /// In-flight requests are drained once `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        info!(addr = %addr, "Starting HTTP server");

        let service = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(self.listener, service)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GateError::Io(e)
            })
    }
}
