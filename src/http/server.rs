use crate::app::EdgeKit;
use crate::error::{Error, Result};
use hyper::service::{make_service_fn, service_fn};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

pub struct Server {
    app: Arc<EdgeKit>,
}

impl Server {
    pub fn new(app: EdgeKit) -> Self {
        Self { app: Arc::new(app) }
    }

    /// Bind, serve until a termination signal, then drain in-flight
    /// requests and release the app's process-wide caches.
    pub async fn serve(self, addr: &str) -> Result<()> {
        let addr: SocketAddr = addr
            .parse()
            .map_err(|e| Error::config(format!("invalid listen address {}: {}", addr, e)))?;

        let app = Arc::clone(&self.app);
        let make_svc = make_service_fn(move |_conn| {
            let app = Arc::clone(&app);
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_one(Arc::clone(&app), req)))
            }
        });

        log::info!("edgekit server listening on {}", addr);
        let served = hyper::Server::bind(&addr)
            .serve(make_svc)
            .with_graceful_shutdown(shutdown_signal())
            .await;

        // Connections are drained at this point. Drop the sandbox module
        // cache and cached renders so a supervised restart comes up cold
        // instead of replaying stale state.
        self.app.shutdown();

        served.map_err(Error::Http)
    }
}

/// One request through the app, with routing failures that escaped the
/// error pages downgraded to a plain 500 so hyper never sees an error.
async fn serve_one(
    app: Arc<EdgeKit>,
    req: hyper::Request<hyper::Body>,
) -> std::result::Result<hyper::Response<hyper::Body>, Infallible> {
    let response = match app.handle_request(req).await {
        Ok(response) => response,
        Err(e) => {
            log::error!("request handling error: {}", e);
            crate::http::Response::internal_error()
        }
    };
    Ok(response.into_hyper())
}

/// Resolves when the process is asked to stop: Ctrl+C everywhere, plus
/// SIGTERM on unix.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            // No signal source left; stay up until killed.
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                interrupt.await;
                log::info!("received Ctrl+C, draining connections");
                return;
            }
        };

        tokio::select! {
            _ = interrupt => log::info!("received Ctrl+C, draining connections"),
            _ = sigterm.recv() => log::info!("received SIGTERM, draining connections"),
        }
    }

    #[cfg(not(unix))]
    {
        interrupt.await;
        log::info!("received Ctrl+C, draining connections");
    }
}
