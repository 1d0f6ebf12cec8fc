//! Client for talking to a flight broker.
//!
//! A [`FlightClient`] holds one connection and serializes calls over it with a
//! tokio `Mutex`, so it can be shared between tasks. Typed broker errors come
//! back as the same [`FlightError`] variants the broker raised.

use super::location::Location;
use super::protocol::{
    expect_message, method, write_message, ActionRequest, ActionResult, ActionType, Criteria,
    DoActionParams, DoGetHeader, DoGetParams, DoPutParams, FlightInfo, FlightRequest,
    FlightResponse, GetFlightInfoParams, ListFlightsParams, StreamFrame,
};
use super::tls::{self, ClientTlsSettings};
use crate::config::BrokerConfig;
use crate::dataset::{Dataset, DatasetBuilder, RecordBatch, Schema};
use crate::descriptor::{Descriptor, Ticket};
use crate::error::{FlightError, Result};
use rustls::pki_types::ServerName;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::debug;

/// Any duplex byte stream the client can run over.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

type Halves = (
    ReadHalf<Box<dyn Connection>>,
    WriteHalf<Box<dyn Connection>>,
);

/// Connection to a single broker.
pub struct FlightClient {
    stream: Mutex<Halves>,
    location: Location,
    next_id: AtomicU64,
}

impl std::fmt::Debug for FlightClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlightClient")
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

impl FlightClient {
    /// Connect over plain TCP, or TLS when `location` says so.
    ///
    /// TLS locations need `tls` settings carrying the root bundle.
    pub async fn connect(location: &Location, tls: Option<&ClientTlsSettings>) -> Result<Self> {
        let tcp = tokio::time::timeout(
            BrokerConfig::CONNECT_TIMEOUT,
            TcpStream::connect((location.host(), location.port())),
        )
        .await
        .map_err(|_| FlightError::transport(format!("timed out connecting to {}", location)))?
        .map_err(|e| FlightError::Transport {
            message: format!("failed to connect to {}", location),
            source: Some(e),
        })?;

        let connection: Box<dyn Connection> = if location.is_tls() {
            let settings = tls.ok_or_else(|| FlightError::Config {
                key: "root_certificates".to_string(),
                message: format!("{} requires TLS settings", location),
            })?;
            let connector = tls::client_connector(settings)?;
            let server_name =
                ServerName::try_from(location.host().to_string()).map_err(|e| FlightError::Tls {
                    message: e.to_string(),
                })?;
            let stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| FlightError::Tls {
                    message: format!("handshake with {} failed: {}", location, e),
                })?;
            Box::new(stream)
        } else {
            Box::new(tcp)
        };

        debug!("Connected to {}", location);

        Ok(Self {
            stream: Mutex::new(tokio::io::split(connection)),
            location: location.clone(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    fn request<P: Serialize>(&self, method: &str, params: P) -> Result<FlightRequest> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(FlightRequest::new(method, serde_json::to_value(params)?, id))
    }

    async fn read_response<R>(reader: &mut R) -> Result<Value>
    where
        R: AsyncRead + Unpin + Send,
    {
        let response: FlightResponse = expect_message(reader).await?;
        response.into_result()
    }

    /// Read frames until `end`, keeping those `pick` accepts.
    async fn read_stream<R, T>(reader: &mut R, pick: impl Fn(StreamFrame) -> Option<T>) -> Result<Vec<T>>
    where
        R: AsyncRead + Unpin + Send,
    {
        let mut items = Vec::new();
        loop {
            match expect_message::<_, StreamFrame>(reader).await? {
                StreamFrame::End => return Ok(items),
                frame => match pick(frame) {
                    Some(item) => items.push(item),
                    None => return Err(FlightError::transport("unexpected frame in response stream")),
                },
            }
        }
    }

    /// Unary call: one request, one result value.
    async fn call<P: Serialize>(&self, method: &str, params: P) -> Result<Value> {
        let request = self.request(method, params)?;
        let mut guard = self.stream.lock().await;
        let (reader, writer) = &mut *guard;
        write_message(writer, &request).await?;
        Self::read_response(reader).await
    }

    pub async fn list_flights(&self, criteria: Criteria) -> Result<Vec<FlightInfo>> {
        let request = self.request(method::LIST_FLIGHTS, ListFlightsParams { criteria })?;
        let mut guard = self.stream.lock().await;
        let (reader, writer) = &mut *guard;
        write_message(writer, &request).await?;
        Self::read_response(reader).await?;
        Self::read_stream(reader, |frame| match frame {
            StreamFrame::Info(info) => Some(info),
            _ => None,
        })
        .await
    }

    pub async fn get_flight_info(&self, descriptor: &Descriptor) -> Result<FlightInfo> {
        let value = self
            .call(
                method::GET_FLIGHT_INFO,
                GetFlightInfoParams {
                    descriptor: descriptor.clone(),
                },
            )
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Upload `dataset` under `descriptor`, replacing what was there.
    pub async fn do_put(&self, descriptor: &Descriptor, dataset: &Dataset) -> Result<()> {
        self.do_put_batches(
            descriptor,
            dataset.schema().clone(),
            dataset.batches(BrokerConfig::BATCH_ROWS),
        )
        .await
    }

    /// Upload a batch sequence under `descriptor`.
    pub async fn do_put_batches<I>(&self, descriptor: &Descriptor, schema: Schema, batches: I) -> Result<()>
    where
        I: IntoIterator<Item = RecordBatch>,
    {
        let request = self.request(
            method::DO_PUT,
            DoPutParams {
                descriptor: descriptor.clone(),
                schema,
            },
        )?;
        let mut guard = self.stream.lock().await;
        let (reader, writer) = &mut *guard;

        let sent = async {
            write_message(writer, &request).await?;
            for batch in batches {
                write_message(writer, &StreamFrame::Batch(batch)).await?;
            }
            write_message(writer, &StreamFrame::End).await
        }
        .await;

        match sent {
            Ok(()) => Self::read_response(reader).await.map(|_| ()),
            // A rejected upload is closed by the broker mid-stream; its
            // error response is usually already buffered.
            Err(e) if e.is_transport() => match Self::read_response(reader).await {
                Err(remote) if !remote.is_transport() => Err(remote),
                _ => Err(e),
            },
            Err(e) => Err(e),
        }
    }

    /// Fetch the dataset behind `ticket`; `None` when the broker has nothing for it.
    pub async fn do_get(&self, ticket: &Ticket) -> Result<Option<Dataset>> {
        let request = self.request(
            method::DO_GET,
            DoGetParams {
                ticket: ticket.clone(),
            },
        )?;
        let mut guard = self.stream.lock().await;
        let (reader, writer) = &mut *guard;
        write_message(writer, &request).await?;

        let header = Self::read_response(reader).await?;
        if header.is_null() {
            return Ok(None);
        }
        let header: DoGetHeader = serde_json::from_value(header)?;

        let mut builder = DatasetBuilder::new(header.schema);
        loop {
            match expect_message::<_, StreamFrame>(reader).await? {
                StreamFrame::Batch(batch) => builder.push(batch)?,
                StreamFrame::End => break,
                _ => return Err(FlightError::transport("unexpected frame in get stream")),
            }
        }
        Ok(Some(builder.finish()))
    }

    pub async fn list_actions(&self) -> Result<Vec<ActionType>> {
        let value = self.call(method::LIST_ACTIONS, serde_json::json!({})).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn do_action(&self, action: ActionRequest) -> Result<Vec<ActionResult>> {
        let request = self.request(method::DO_ACTION, DoActionParams { action })?;
        let mut guard = self.stream.lock().await;
        let (reader, writer) = &mut *guard;
        write_message(writer, &request).await?;
        Self::read_response(reader).await?;
        Self::read_stream(reader, |frame| match frame {
            StreamFrame::Result(result) => Some(result),
            _ => None,
        })
        .await
    }
}
