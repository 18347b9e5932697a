//! Mock server lifecycle.
//!
//! `MockServer::start` binds the listener before returning, so a client may
//! connect as soon as the handle exists. Each connection runs on its own task
//! and shares the registry and capture queue with the handle.

use crate::capture::{capture_channel, CaptureReceiver, CaptureSender};
use crate::config::Configuration;
use crate::handler::handle_request;
use crate::registry::ResponseRegistry;
use crate::types::{display_addr, CaptureError, RequestData, ServerError};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

/// State shared between the handle and the connection tasks
pub(crate) struct ServerState {
    /// Host as configured, stamped on every capture
    pub(crate) host: String,
    /// Port actually bound
    pub(crate) port: u16,
    pub(crate) registry: ResponseRegistry,
}

/// A running mock server
pub struct MockServer {
    config: Arc<Configuration>,
    state: Arc<ServerState>,
    address: SocketAddr,
    captures: CaptureReceiver,
    shutdown_tx: broadcast::Sender<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MockServer {
    /// Validate `config`, bind its address and start serving in the background.
    pub async fn start(config: Configuration) -> Result<Self, ServerError> {
        config.validate()?;

        let bind_addr = display_addr(&config.host, config.port);
        let listener = TcpListener::bind((config.host.as_str(), config.port))
            .await
            .map_err(|e| ServerError::Bind(bind_addr.clone(), e))?;
        let address = listener
            .local_addr()
            .map_err(|e| ServerError::Bind(bind_addr, e))?;

        let state = Arc::new(ServerState {
            host: config.host.clone(),
            port: address.port(),
            registry: ResponseRegistry::new(&config.responses, &config.default_mode),
        });

        let (capture_tx, captures) = capture_channel(config.channel_size, config.capture_timeout);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        info!(
            "Mock server listening on {} ({} modes, active mode '{}', channel size {})",
            address,
            config.responses.len(),
            config.default_mode,
            config.channel_size
        );

        let task = tokio::spawn(serve(
            listener,
            Arc::clone(&state),
            capture_tx,
            shutdown_rx,
            config.shutdown_timeout,
        ));

        Ok(Self {
            config: Arc::new(config),
            state,
            address,
            captures,
            shutdown_tx,
            task: Mutex::new(Some(task)),
        })
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn host(&self) -> &str {
        &self.state.host
    }

    pub fn port(&self) -> u16 {
        self.state.port
    }

    /// URL of `path` on this server, using the configured host.
    pub fn url(&self, path: &str) -> String {
        format!(
            "http://{}{}",
            display_addr(&self.state.host, self.state.port),
            path
        )
    }

    /// Switch the stub table used for requests that start matching from now on.
    pub fn set_mode(&self, mode: &str) {
        self.state.registry.set_mode(mode);
    }

    pub fn mode(&self) -> String {
        self.state.registry.mode().to_string()
    }

    pub fn modes(&self) -> Vec<String> {
        self.state.registry.modes()
    }

    /// Pop the oldest captured request, waiting at most
    /// `min(per_item_timeout, overall_timeout)`.
    pub async fn wait_for_request(
        &self,
        per_item_timeout: Duration,
        overall_timeout: Duration,
    ) -> Result<RequestData, CaptureError> {
        self.captures.wait(per_item_timeout, overall_timeout).await
    }

    pub fn try_next_request(&self) -> Option<RequestData> {
        self.captures.try_next()
    }

    pub fn pending_requests(&self) -> usize {
        self.captures.pending()
    }

    /// Captures discarded because the queue stayed full.
    pub fn dropped_captures(&self) -> u64 {
        self.captures.dropped()
    }

    /// Stop accepting, let open connections finish within the shutdown
    /// timeout, and release the socket. Calling it again does nothing.
    pub async fn close(&self) {
        let _ = self.shutdown_tx.send(());

        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        if let Err(e) = task.await {
            if !e.is_cancelled() {
                error!("Mock server task on {} failed: {}", self.address, e);
            }
        }
        info!("Mock server on {} closed", self.address);
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Pop one captured request from `server`.
pub async fn wait_for_server_request(
    server: &MockServer,
    per_item_timeout: Duration,
    overall_timeout: Duration,
) -> Result<RequestData, CaptureError> {
    server
        .wait_for_request(per_item_timeout, overall_timeout)
        .await
}

async fn serve(
    listener: TcpListener,
    state: Arc<ServerState>,
    captures: CaptureSender,
    mut shutdown_rx: broadcast::Receiver<()>,
    shutdown_timeout: Duration,
) {
    let port = state.port;
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let state = Arc::clone(&state);
                        let captures = captures.clone();
                        let conn_shutdown = shutdown_rx.resubscribe();
                        connections.spawn(serve_connection(stream, addr, state, captures, conn_shutdown));
                    }
                    Err(e) => {
                        error!("Accept error on port {}: {}", port, e);
                    }
                }
            }
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        error!("Connection task on port {} panicked: {}", port, e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Mock server on port {} shutting down", port);
                break;
            }
        }
    }

    drop(listener);
    drop(captures);

    let drained = tokio::time::timeout(shutdown_timeout, async {
        while connections.join_next().await.is_some() {}
    })
    .await;

    if drained.is_err() {
        warn!(
            "{} connections on port {} still open after {:?}, aborting",
            connections.len(),
            port,
            shutdown_timeout
        );
        connections.abort_all();
    }
}

async fn serve_connection(
    stream: tokio::net::TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
    captures: CaptureSender,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let port = state.port;
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let state = Arc::clone(&state);
        let captures = captures.clone();
        async move { handle_request(req, state, captures, addr).await }
    });

    let conn = http1::Builder::new().serve_connection(io, service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        _ = shutdown_rx.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        debug!("Connection error on port {} from {}: {}", port, addr, e);
    }
}
