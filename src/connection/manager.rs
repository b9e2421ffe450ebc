//! Connection Manager Implementation

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::{http, Message};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::connection::{ConnectionHandle, ConnectionRegistry, ConnectionState, Group};
use crate::metrics::Metrics;
use crate::relay::{RelayEngine, RelayMode};
use crate::Result;

/// Manages WebSocket listeners and the lifecycle of accepted connections.
///
/// Owns one listener and registry per group; when the configured input and
/// output ports coincide, a single listener and a single registry serve both
/// roles. That decision is made here, once, before any connection is accepted.
pub struct ConnectionManager {
    config: Arc<Config>,
    mode: RelayMode,
    source_registry: Arc<ConnectionRegistry>,
    target_registry: Arc<ConnectionRegistry>,
    relay: Arc<RelayEngine>,
    metrics: Arc<Metrics>,
    listener_in: Option<TcpListener>,
    listener_out: Option<TcpListener>,
    active_connections: Arc<AtomicUsize>,
    shutdown_flag: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ConnectionManager {
    /// Create a new ConnectionManager
    pub fn new(config: Arc<Config>, metrics: Arc<Metrics>) -> Self {
        let mode = RelayMode::resolve(config.server.port_in, config.server.port_out);

        let source_registry = Arc::new(ConnectionRegistry::new(Group::Source));
        let target_registry = match mode {
            // One registry serves both roles; the second is never created
            RelayMode::SharedGroup => Arc::clone(&source_registry),
            RelayMode::SeparateGroups => Arc::new(ConnectionRegistry::new(Group::Target)),
        };

        let relay = Arc::new(RelayEngine::new(
            mode,
            Arc::clone(&target_registry),
            Arc::clone(&metrics),
        ));
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            mode,
            source_registry,
            target_registry,
            relay,
            metrics,
            listener_in: None,
            listener_out: None,
            active_connections: Arc::new(AtomicUsize::new(0)),
            shutdown_flag: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    pub fn mode(&self) -> RelayMode {
        self.mode
    }

    /// Registry holding source-group connections
    pub fn source_registry(&self) -> &Arc<ConnectionRegistry> {
        &self.source_registry
    }

    /// Registry holding target-group connections (the source registry in
    /// shared-group mode)
    pub fn target_registry(&self) -> &Arc<ConnectionRegistry> {
        &self.target_registry
    }

    /// Bind all configured listening endpoints.
    ///
    /// Any bind failure here is fatal: the process must not start without
    /// its listeners.
    pub async fn bind(&mut self) -> Result<()> {
        let host = self.config.server.bind_host;

        let in_addr = SocketAddr::new(host, self.config.server.port_in);
        info!("Binding source listener to {}", in_addr);
        let listener_in = TcpListener::bind(in_addr)
            .await
            .with_context(|| format!("Failed to bind source listener to {}", in_addr))?;
        info!("Source listener bound to {}", listener_in.local_addr()?);
        self.listener_in = Some(listener_in);

        if self.mode == RelayMode::SeparateGroups {
            let out_addr = SocketAddr::new(host, self.config.server.port_out);
            info!("Binding target listener to {}", out_addr);
            let listener_out = TcpListener::bind(out_addr)
                .await
                .with_context(|| format!("Failed to bind target listener to {}", out_addr))?;
            info!("Target listener bound to {}", listener_out.local_addr()?);
            self.listener_out = Some(listener_out);
        }

        Ok(())
    }

    /// Local address of the source listener, once bound
    pub fn source_addr(&self) -> Option<SocketAddr> {
        self.listener_in
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Local address of the target listener, once bound. None in
    /// shared-group mode, where the source listener serves both roles.
    pub fn target_addr(&self) -> Option<SocketAddr> {
        self.listener_out
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
    }

    /// Run the acceptance loops over already-bound listeners
    pub async fn run(&mut self) -> Result<()> {
        let listener_in = self
            .listener_in
            .take()
            .ok_or_else(|| anyhow::anyhow!("Source listener not bound"))?;
        let listener_out = self.listener_out.take();

        match listener_out {
            Some(listener_out) => {
                tokio::try_join!(
                    self.accept_loop(
                        listener_in,
                        Group::Source,
                        Arc::clone(&self.source_registry),
                        Some(Arc::clone(&self.relay)),
                    ),
                    self.accept_loop(
                        listener_out,
                        Group::Target,
                        Arc::clone(&self.target_registry),
                        None,
                    ),
                )?;
            }
            None => {
                self.accept_loop(
                    listener_in,
                    Group::Source,
                    Arc::clone(&self.source_registry),
                    Some(Arc::clone(&self.relay)),
                )
                .await?;
            }
        }

        Ok(())
    }

    /// Acceptance loop for one listener
    async fn accept_loop(
        &self,
        listener: TcpListener,
        group: Group,
        registry: Arc<ConnectionRegistry>,
        relay: Option<Arc<RelayEngine>>,
    ) -> Result<()> {
        info!("Starting {} connection acceptance loop", group);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            if self.shutdown_flag.load(Ordering::Relaxed) {
                info!("Shutdown flag set, stopping {} connection acceptance", group);
                break;
            }

            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            debug!("Accepted TCP connection from {} on {} listener", addr, group);

                            if self.shutdown_flag.load(Ordering::Relaxed) {
                                debug!("Rejecting connection from {} due to shutdown", addr);
                                continue;
                            }

                            let registry = Arc::clone(&registry);
                            let relay = relay.clone();
                            let metrics = Arc::clone(&self.metrics);
                            let active_connections = Arc::clone(&self.active_connections);
                            let handshake_timeout = self.config.server.handshake_timeout;

                            tokio::spawn(async move {
                                active_connections.fetch_add(1, Ordering::Relaxed);

                                if let Err(e) = Self::handle_connection(
                                    stream, addr, group, registry, relay, metrics,
                                    handshake_timeout,
                                )
                                .await
                                {
                                    warn!("Connection from {} ended with error: {:#}", addr, e);
                                }

                                active_connections.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            // Continue accepting connections even if one fails
                            error!("Error accepting {} connection: {}", group, e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Received shutdown signal, stopping {} connection acceptance", group);
                    self.shutdown_flag.store(true, Ordering::Relaxed);
                    break;
                }
            }
        }

        info!("{} connection acceptance loop stopped", group);
        Ok(())
    }

    /// Handle a single connection from handshake to disconnect
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        group: Group,
        registry: Arc<ConnectionRegistry>,
        relay: Option<Arc<RelayEngine>>,
        metrics: Arc<Metrics>,
        handshake_timeout: Duration,
    ) -> Result<()> {
        // Upgrades are served on the root path only
        let check_path = |request: &Request, response: Response| {
            if request.uri().path() == "/" {
                Ok(response)
            } else {
                let mut rejection = ErrorResponse::new(None);
                *rejection.status_mut() = http::StatusCode::NOT_FOUND;
                Err(rejection)
            }
        };

        let ws_stream = match timeout(
            handshake_timeout,
            tokio_tungstenite::accept_hdr_async(stream, check_path),
        )
        .await
        {
            Ok(Ok(ws_stream)) => ws_stream,
            Ok(Err(e)) => {
                return Err(anyhow::anyhow!(
                    "WebSocket handshake with {} failed: {}",
                    addr,
                    e
                ));
            }
            Err(_) => {
                return Err(anyhow::anyhow!(
                    "WebSocket handshake with {} timed out after {:?}",
                    addr,
                    handshake_timeout
                ));
            }
        };

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let handle = Arc::new(ConnectionHandle::new(
            Uuid::new_v4(),
            addr,
            group,
            outbound_tx,
        ));
        handle.set_state(ConnectionState::Open);
        registry.add(Arc::clone(&handle)).await;
        metrics.connection_opened();

        info!("{} client connected: {} ({})", group, addr, handle.id());
        let start_time = Instant::now();

        // Writer task: sole owner of the sink half, drains the outbound
        // queue in FIFO order.
        let writer_id = handle.id();
        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = ws_sink.send(message).await {
                    debug!("Write to connection {} failed: {}", writer_id, e);
                    break;
                }
            }
        });

        // Read loop: events from a single connection are processed to
        // completion in arrival order.
        while let Some(event) = ws_source.next().await {
            match event {
                Ok(message @ Message::Text(_)) | Ok(message @ Message::Binary(_)) => {
                    if let Some(relay) = &relay {
                        debug!(
                            "Received message from {} ({} bytes)",
                            addr,
                            message.len()
                        );
                        relay.relay(&handle, message).await;
                    }
                }
                Ok(Message::Ping(payload)) => {
                    let _ = handle.send(Message::Pong(payload));
                }
                Ok(Message::Close(_)) => {
                    debug!("{} client {} sent close frame", group, addr);
                    handle.set_state(ConnectionState::Closing);
                    break;
                }
                Ok(_) => {
                    // Pong and raw frames carry no relay semantics
                }
                Err(e) => {
                    warn!("{} client error for {}: {}", group, addr, e);
                    break;
                }
            }
        }

        // Synchronous cleanup: the registry reflects only connections whose
        // channel has not yet signaled close or error.
        handle.set_state(ConnectionState::Closed);
        registry.remove(&handle.id()).await;
        metrics.connection_closed();
        writer.abort();

        info!(
            "{} client disconnected: {} after {:?}",
            group,
            addr,
            start_time.elapsed()
        );

        Ok(())
    }

    /// Get the number of active connections
    pub fn get_active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Initiate graceful shutdown
    pub fn initiate_shutdown(&self) {
        info!("Initiating graceful shutdown of connection manager");
        self.shutdown_flag.store(true, Ordering::Relaxed);

        if self.shutdown_tx.send(()).is_err() {
            debug!("No acceptance loops were listening for shutdown");
        }
    }

    /// Get a shutdown receiver for external components
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown_flag.load(Ordering::Relaxed)
    }

    /// Best-effort drain: wait for open connections to close on their own.
    ///
    /// Open client connections are never force-closed; process exit
    /// terminates whatever remains after the timeout.
    pub async fn wait_for_connections_to_close(&self) -> Result<()> {
        let shutdown_timeout = self.config.server.shutdown_timeout;
        let start_time = Instant::now();

        info!(
            "Waiting for {} active connections to close (timeout: {:?})",
            self.get_active_connections(),
            shutdown_timeout
        );

        while self.get_active_connections() > 0 && start_time.elapsed() < shutdown_timeout {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let remaining = self.get_active_connections();
        let elapsed = start_time.elapsed();

        if remaining == 0 {
            info!("All connections closed gracefully in {:?}", elapsed);
        } else {
            warn!(
                "Shutdown timeout reached after {:?} with {} connections still active",
                elapsed, remaining
            );
        }

        Ok(())
    }

    /// Gracefully shutdown the connection manager
    pub async fn shutdown(&self) -> Result<()> {
        self.initiate_shutdown();
        self.wait_for_connections_to_close().await
    }
}
