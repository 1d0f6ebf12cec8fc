//! TCP (optionally TLS) server exposing a [`BrokerServer`].
//!
//! Listens on the configured host and port, accepts connections, and decodes
//! framed JSON-RPC requests into broker calls. Each connection runs in its
//! own task and handles requests sequentially.
//!
//! # Shutdown
//!
//! The accept loop and idle connections stop when the [`ShutdownController`]
//! fires. A request already being handled runs to completion first.

use super::action::Action;
use super::broker::{BrokerServer, TicketPolicy};
use super::location::Location;
use super::protocol::{
    expect_message, method, read_frame, write_message, DoActionParams, DoGetHeader, DoGetParams,
    DoPutParams, FlightRequest, FlightResponse, GetFlightInfoParams, ListFlightsParams,
    StreamFrame,
};
use super::shutdown::ShutdownController;
use super::tls::{self, TlsSettings};
use crate::config::BrokerConfig;
use crate::error::{FlightError, Result};
use crate::store::DatasetStore;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Runtime options for [`FlightServer::start`].
#[derive(Debug, Clone)]
pub struct BrokerOptions {
    pub host: String,
    /// `0` picks a free port.
    pub port: u16,
    pub tls: Option<TlsSettings>,
    pub shutdown_grace: Duration,
    pub ticket_policy: TicketPolicy,
    pub max_connections: usize,
    pub batch_rows: usize,
}

impl Default for BrokerOptions {
    fn default() -> Self {
        Self {
            host: BrokerConfig::DEFAULT_HOST.to_string(),
            port: BrokerConfig::DEFAULT_PORT,
            tls: None,
            shutdown_grace: BrokerConfig::SHUTDOWN_GRACE,
            ticket_policy: TicketPolicy::default(),
            max_connections: BrokerConfig::MAX_CONNECTIONS,
            batch_rows: BrokerConfig::BATCH_ROWS,
        }
    }
}

impl BrokerOptions {
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tls(mut self, tls: TlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn with_ticket_policy(mut self, policy: TicketPolicy) -> Self {
        self.ticket_policy = policy;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows;
        self
    }
}

/// Handle to a running broker. Dropping it stops the server.
pub struct FlightServerHandle {
    addr: SocketAddr,
    location: Location,
    broker: Arc<BrokerServer>,
    shutdown: ShutdownController,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl FlightServerHandle {
    /// The socket address actually bound.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The location advertised in flight endpoints.
    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn broker(&self) -> &Arc<BrokerServer> {
        &self.broker
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    /// Stop accepting connections and close idle ones now.
    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }

    /// Wait until the accept loop has exited.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!("Flight server task failed: {}", e);
                }
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task_handle
            .as_ref()
            .map(|h| h.is_finished())
            .unwrap_or(true)
    }
}

impl Drop for FlightServerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// Flight server that accepts broker connections.
pub struct FlightServer;

impl FlightServer {
    /// Bind, then start serving `store` in background tasks.
    ///
    /// The advertised location uses the configured host and the port actually
    /// bound, with a `grpc+tls` scheme when TLS is configured.
    pub async fn start(store: Arc<DatasetStore>, options: BrokerOptions) -> Result<FlightServerHandle> {
        let acceptor = options.tls.as_ref().map(tls::server_acceptor).transpose()?;

        let listener = TcpListener::bind((options.host.as_str(), options.port))
            .await
            .map_err(|e| FlightError::Transport {
                message: format!("failed to bind {}:{}", options.host, options.port),
                source: Some(e),
            })?;
        let addr = listener.local_addr()?;

        let location = if acceptor.is_some() {
            Location::for_tls(options.host.clone(), addr.port())
        } else {
            Location::for_tcp(options.host.clone(), addr.port())
        };

        let shutdown = ShutdownController::new(options.shutdown_grace);
        let broker = Arc::new(
            BrokerServer::new(store, location.clone(), shutdown.clone())
                .with_ticket_policy(options.ticket_policy)
                .with_batch_rows(options.batch_rows),
        );

        info!("Serving on {}", location);

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            acceptor,
            broker.clone(),
            shutdown.clone(),
            options.max_connections,
        ));

        Ok(FlightServerHandle {
            addr,
            location,
            broker,
            shutdown,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        acceptor: Option<TlsAcceptor>,
        broker: Arc<BrokerServer>,
        shutdown: ShutdownController,
        max_connections: usize,
    ) {
        let active_connections = Arc::new(AtomicUsize::new(0));

        loop {
            tokio::select! {
                _ = shutdown.wait() => {
                    info!("Flight server shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= max_connections {
                                warn!(
                                    "Rejecting connection from {}: at max capacity ({})",
                                    peer_addr, max_connections
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let broker = broker.clone();
                            let acceptor = acceptor.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = shutdown.subscribe();

                            tokio::spawn(async move {
                                debug!("Connection from {}", peer_addr);
                                let result = match acceptor {
                                    Some(acceptor) => match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            Self::handle_connection(tls_stream, &broker, &mut conn_shutdown).await
                                        }
                                        Err(e) => {
                                            warn!("TLS handshake with {} failed: {}", peer_addr, e);
                                            Ok(())
                                        }
                                    },
                                    None => Self::handle_connection(stream, &broker, &mut conn_shutdown).await,
                                };
                                if let Err(e) = result {
                                    debug!("Connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection<S>(
        stream: S,
        broker: &BrokerServer,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (mut reader, mut writer) = tokio::io::split(stream);

        loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result? {
                        Some(f) => f,
                        None => return Ok(()), // Clean disconnect
                    }
                }
                _ = shutdown_rx.wait_for(|stopped| *stopped) => {
                    return Ok(());
                }
            };

            let request: FlightRequest = match serde_json::from_slice(&frame) {
                Ok(req) => req,
                Err(e) => {
                    let response = FlightResponse::error(None, -32700, format!("Parse error: {}", e));
                    write_message(&mut writer, &response).await?;
                    continue;
                }
            };

            if request.jsonrpc != "2.0" {
                let response = FlightResponse::error(
                    request.id,
                    -32600,
                    "Invalid Request: expected jsonrpc 2.0".to_string(),
                );
                write_message(&mut writer, &response).await?;
                continue;
            }

            if !Self::dispatch(broker, request, &mut reader, &mut writer).await? {
                return Ok(());
            }
        }
    }

    /// Handle one request. Returns `false` when the connection must close
    /// because the inbound stream can no longer be resynchronized.
    async fn dispatch<R, W>(
        broker: &BrokerServer,
        request: FlightRequest,
        reader: &mut R,
        writer: &mut W,
    ) -> Result<bool>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let id = request.id;
        let params = request.params.unwrap_or_else(|| json!({}));
        debug!("Dispatching {}", request.method);

        match request.method.as_str() {
            method::LIST_FLIGHTS => {
                let params: ListFlightsParams = match parse_params(params) {
                    Ok(p) => p,
                    Err(e) => return reply_error(writer, id, &e).await,
                };
                write_message(writer, &FlightResponse::success(id, json!({}))).await?;
                for info in broker.list_flights(&params.criteria) {
                    write_message(writer, &StreamFrame::Info(info)).await?;
                }
                write_message(writer, &StreamFrame::End).await?;
            }
            method::GET_FLIGHT_INFO => {
                let result = parse_params::<GetFlightInfoParams>(params)
                    .and_then(|p| broker.get_flight_info(&p.descriptor))
                    .and_then(|info| Ok(serde_json::to_value(info)?));
                match result {
                    Ok(value) => write_message(writer, &FlightResponse::success(id, value)).await?,
                    Err(e) => return reply_error(writer, id, &e).await,
                }
            }
            method::DO_PUT => {
                // The client streams batches right behind the request, so any
                // failure leaves unread frames and the connection must close.
                let params: DoPutParams = match parse_params(params) {
                    Ok(p) => p,
                    Err(e) => {
                        reply_error(writer, id, &e).await?;
                        return Ok(false);
                    }
                };
                let result = broker
                    .do_put(&params.descriptor, params.schema, inbound_batches(reader))
                    .await;
                match result {
                    Ok(()) => write_message(writer, &FlightResponse::success(id, json!({}))).await?,
                    Err(e) => {
                        reply_error(writer, id, &e).await?;
                        return Ok(false);
                    }
                }
            }
            method::DO_GET => {
                let result = parse_params::<DoGetParams>(params).and_then(|p| broker.do_get(&p.ticket));
                match result {
                    Ok(Some(stream)) => {
                        let header = serde_json::to_value(DoGetHeader {
                            schema: stream.schema().clone(),
                        })?;
                        write_message(writer, &FlightResponse::success(id, header)).await?;
                        for batch in stream {
                            write_message(writer, &StreamFrame::Batch(batch)).await?;
                        }
                        write_message(writer, &StreamFrame::End).await?;
                    }
                    Ok(None) => {
                        write_message(writer, &FlightResponse::success(id, Value::Null)).await?
                    }
                    Err(e) => return reply_error(writer, id, &e).await,
                }
            }
            method::LIST_ACTIONS => {
                let actions = serde_json::to_value(broker.list_actions())?;
                write_message(writer, &FlightResponse::success(id, actions)).await?;
            }
            method::DO_ACTION => {
                let result = parse_params::<DoActionParams>(params)
                    .and_then(|p| broker.do_action(&Action::from(&p.action)));
                match result {
                    Ok(results) => {
                        write_message(writer, &FlightResponse::success(id, json!({}))).await?;
                        for result in results {
                            write_message(writer, &StreamFrame::Result(result)).await?;
                        }
                        write_message(writer, &StreamFrame::End).await?;
                    }
                    Err(e) => return reply_error(writer, id, &e).await,
                }
            }
            other => {
                return reply_error(writer, id, &FlightError::UnknownMethod(other.to_string())).await;
            }
        }

        Ok(true)
    }
}

fn parse_params<T: DeserializeOwned>(params: Value) -> Result<T> {
    serde_json::from_value(params).map_err(|e| FlightError::validation("params", e.to_string()))
}

async fn reply_error<W>(writer: &mut W, id: Option<Value>, err: &FlightError) -> Result<bool>
where
    W: AsyncWrite + Unpin + Send,
{
    match err {
        FlightError::NotFound { .. } => debug!("{}", err),
        _ => warn!("Request failed: {}", err),
    }
    write_message(writer, &FlightResponse::from_error(id, err)).await?;
    Ok(true)
}

/// Batches sent by a `do_put` client, up to the `end` frame.
fn inbound_batches<R>(
    reader: &mut R,
) -> impl futures::Stream<Item = Result<crate::dataset::RecordBatch>> + '_
where
    R: AsyncRead + Unpin + Send,
{
    futures::stream::unfold(Some(reader), |reader| async move {
        let reader = reader?;
        match expect_message::<_, StreamFrame>(reader).await {
            Ok(StreamFrame::Batch(batch)) => Some((Ok(batch), Some(reader))),
            Ok(StreamFrame::End) => None,
            Ok(_) => Some((
                Err(FlightError::transport("unexpected frame in put stream")),
                None,
            )),
            Err(e) => Some((Err(e), None)),
        }
    })
}
