//! Flight wire protocol types and framing.
//!
//! Every message is a length-prefixed frame holding UTF-8 JSON:
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```
//!
//! Unary methods exchange one [`FlightRequest`] for one [`FlightResponse`].
//! Streaming methods follow their request or response with [`StreamFrame`]s
//! terminated by [`StreamFrame::End`]:
//!
//! - `do_put`: request, then `Batch`* `End` from the client, then the response.
//! - `do_get`: request, response carrying the schema, then `Batch`* `End`.
//!   A `null` result means the ticket resolved to nothing and no frames follow.
//! - `list_flights`: request, response, then `Info`* `End`.
//! - `do_action`: request, response, then `Result`* `End`.

use super::location::Location;
use crate::config::BrokerConfig;
use crate::dataset::{RecordBatch, Schema};
use crate::descriptor::{Descriptor, Ticket};
use crate::error::{FlightError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Method names understood by the broker.
pub mod method {
    pub const LIST_FLIGHTS: &str = "list_flights";
    pub const GET_FLIGHT_INFO: &str = "get_flight_info";
    pub const DO_PUT: &str = "do_put";
    pub const DO_GET: &str = "do_get";
    pub const LIST_ACTIONS: &str = "list_actions";
    pub const DO_ACTION: &str = "do_action";
}

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    pub id: Option<Value>,
}

impl FlightRequest {
    pub fn new(method: impl Into<String>, params: Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.into(),
            params: Some(params),
            id: Some(Value::Number(id.into())),
        }
    }
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightResponse {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    pub id: Option<Value>,
}

impl FlightResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: String) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(ErrorBody {
                code,
                message,
                data: None,
            }),
            id,
        }
    }

    /// Error response carrying the structured data of a [`FlightError`].
    pub fn from_error(id: Option<Value>, err: &FlightError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(ErrorBody {
                code: err.to_rpc_error_code(),
                message: err.to_string(),
                data: err.to_rpc_error_data(),
            }),
            id,
        }
    }

    /// Unwrap the result, converting an error body back into a [`FlightError`].
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(FlightError::from_rpc_error(
                err.code,
                err.message,
                err.data.as_ref(),
            )),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A frame inside a streaming exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum StreamFrame {
    Batch(RecordBatch),
    Info(FlightInfo),
    Result(ActionResult),
    End,
}

/// One place a dataset can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightEndpoint {
    pub ticket: Ticket,
    pub locations: Vec<Location>,
}

/// Metadata describing a stored dataset and how to retrieve it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlightInfo {
    pub schema: Schema,
    pub descriptor: Descriptor,
    pub endpoints: Vec<FlightEndpoint>,
    pub total_records: u64,
    pub total_bytes: u64,
}

impl FlightInfo {
    pub fn num_columns(&self) -> usize {
        self.schema.len()
    }

    /// Ticket of the first endpoint, if any.
    pub fn ticket(&self) -> Option<&Ticket> {
        self.endpoints.first().map(|e| &e.ticket)
    }
}

/// Filter for `list_flights`. Accepted but not applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Criteria {
    #[serde(default, with = "hex::serde")]
    pub expression: Vec<u8>,
}

/// Name and description of an advertised action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionType {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

impl ActionType {
    pub fn new(kind: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            description: description.into(),
        }
    }
}

/// An action request as it travels on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, with = "hex::serde")]
    pub body: Vec<u8>,
}

impl ActionRequest {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            body: Vec::new(),
        }
    }
}

/// One opaque result of an action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    #[serde(with = "hex::serde")]
    pub body: Vec<u8>,
}

impl ActionResult {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into() }
    }
}

// Method parameter payloads

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListFlightsParams {
    #[serde(default)]
    pub criteria: Criteria,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetFlightInfoParams {
    pub descriptor: Descriptor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoPutParams {
    pub descriptor: Descriptor,
    pub schema: Schema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoGetParams {
    pub ticket: Ticket,
}

/// Header returned by a successful `do_get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoGetHeader {
    pub schema: Schema,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoActionParams {
    pub action: ActionRequest,
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > BrokerConfig::MAX_FRAME_SIZE {
        return Err(FlightError::Validation {
            field: "frame".to_string(),
            message: format!(
                "frame size {} exceeds maximum {}",
                len,
                BrokerConfig::MAX_FRAME_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len as usize <= BrokerConfig::MAX_FRAME_SIZE)
        .ok_or_else(|| {
            FlightError::validation(
                "frame",
                format!("frame size {} exceeds maximum", payload.len()),
            )
        })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Serialize `message` as JSON and write it as one frame.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = serde_json::to_vec(message)?;
    write_frame(writer, &bytes).await
}

/// Read one frame and deserialize it. `None` on clean EOF.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    match read_frame(reader).await? {
        Some(frame) => Ok(Some(serde_json::from_slice(&frame)?)),
        None => Ok(None),
    }
}

/// Read a frame that must be present; EOF is a transport error.
pub async fn expect_message<R, T>(reader: &mut R) -> Result<T>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    read_message(reader)
        .await?
        .ok_or_else(|| FlightError::transport("connection closed mid-stream"))
}
