//! Hello-world HTTP/1.1 listener.

use crate::engine::EventEngine;
use crate::util::ShutdownSignal;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, instrument, warn};

const GREETING: &[u8] = b"Hello, world";

/// Listener that greets every request.
///
/// Each served request posts a bookkeeping callback onto the event loop, so
/// requests in flight during a shutdown keep the loop busy until they finish.
pub struct HelloServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    engine: Arc<dyn EventEngine>,
    shutdown: ShutdownSignal,
    served: Arc<AtomicU64>,
}

impl HelloServer {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, engine: Arc<dyn EventEngine>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        info!(listen = %local_addr, "http server bound");

        Ok(Self {
            listener,
            local_addr,
            engine,
            shutdown: ShutdownSignal::new(),
            served: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle that makes [`run`](Self::run) stop accepting connections.
    pub fn stopper(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Shared count of requests recorded on the event loop.
    pub fn served(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.served)
    }

    /// Accept connections until stopped.
    ///
    /// Open connections are asked to finish their current request and close.
    #[instrument(skip_all, fields(listen = %self.local_addr))]
    pub async fn run(self) {
        let mut stop = self.shutdown.subscribe();
        if self.shutdown.is_triggered() {
            info!("http server stopped before accepting");
            return;
        }

        info!("http server accepting connections");

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => self.handle_connection(stream, addr),
                        Err(e) => error!(error = %e, "failed to accept connection"),
                    }
                }

                _ = stop.recv() => {
                    info!("http server no longer accepting connections");
                    break;
                }
            }
        }
    }

    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let engine = Arc::clone(&self.engine);
        let served = Arc::clone(&self.served);
        let mut stop = self.shutdown.subscribe();

        tokio::spawn(async move {
            let service = service_fn(move |req| {
                let engine = Arc::clone(&engine);
                let served = Arc::clone(&served);
                async move { greet(req, engine, served).await }
            });

            let conn = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                _ = stop.recv() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };

            match result {
                Ok(()) => debug!(client = %client_addr, "connection closed"),
                Err(e) => warn!(client = %client_addr, error = %e, "connection failed"),
            }
        });
    }
}

async fn greet(
    req: Request<Incoming>,
    engine: Arc<dyn EventEngine>,
    served: Arc<AtomicU64>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();

    engine.add_callback(Box::new(move || {
        let total = served.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(path = %path, total, "request served");
    }));

    Ok(Response::new(Full::new(Bytes::from_static(GREETING))))
}
