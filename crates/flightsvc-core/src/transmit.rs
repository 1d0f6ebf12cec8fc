//! Dataset transmission to named destinations.
//!
//! `LOCAL` hands the payload straight back. `REMOTE` resolves the destination
//! to a broker location through `FLIGHT_URL_<DESTINATION>` and uploads the
//! dataset there under a command descriptor named after the table.

use crate::config::TransmitConfig;
use crate::dataset::Dataset;
use crate::descriptor::Descriptor;
use crate::error::{FlightError, Result};
use crate::flight::{ClientTlsSettings, FlightClient, Location};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How a payload is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitMethod {
    /// Same-process hand-off; also accepted as `REST`.
    Local,
    /// Upload to a remote broker; also accepted as `FLIGHT`.
    Remote,
}

impl FromStr for TransmitMethod {
    type Err = FlightError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LOCAL" | "REST" => Ok(TransmitMethod::Local),
            "REMOTE" | "FLIGHT" => Ok(TransmitMethod::Remote),
            other => Err(FlightError::InvalidMethod {
                method: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for TransmitMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransmitMethod::Local => f.write_str("LOCAL"),
            TransmitMethod::Remote => f.write_str("REMOTE"),
        }
    }
}

/// A dataset addressed to a destination.
#[derive(Debug, Clone)]
pub struct TransmitPayload {
    pub destination: String,
    pub table_name: String,
    /// Caller-defined metadata carried alongside the table.
    pub table_metadata: serde_json::Value,
    pub dataset: Arc<Dataset>,
}

impl TransmitPayload {
    pub fn new(
        destination: impl Into<String>,
        table_name: impl Into<String>,
        dataset: impl Into<Arc<Dataset>>,
    ) -> Self {
        Self {
            destination: destination.into(),
            table_name: table_name.into(),
            table_metadata: serde_json::Value::Null,
            dataset: dataset.into(),
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.table_metadata = metadata;
        self
    }
}

/// Measurements of one remote transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferReport {
    pub destination: String,
    pub endpoint: Location,
    pub rows: usize,
    pub columns: usize,
    /// Estimated bytes on the wire.
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn megabytes(&self) -> f64 {
        self.bytes as f64 / 1024.0 / 1024.0
    }
}

/// Result of [`TransmissionDispatcher::transmit`].
#[derive(Debug, Clone)]
pub enum TransmitOutcome {
    Local(TransmitPayload),
    Remote(TransferReport),
}

/// Where destination endpoints are looked up.
pub trait EndpointSource: Send + Sync {
    fn endpoint(&self, key: &str) -> Option<String>;
}

/// Endpoints from process environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvEndpoints;

impl EndpointSource for EnvEndpoints {
    fn endpoint(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl EndpointSource for HashMap<String, String> {
    fn endpoint(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Pushes a dataset to a broker.
#[async_trait::async_trait]
pub trait DatasetWriter: Send + Sync {
    async fn write(&self, endpoint: &Location, descriptor: &Descriptor, dataset: &Dataset) -> Result<()>;
}

/// [`DatasetWriter`] that uploads with a [`FlightClient`].
#[derive(Debug, Clone, Default)]
pub struct FlightWriter {
    tls: Option<ClientTlsSettings>,
}

impl FlightWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tls(mut self, tls: ClientTlsSettings) -> Self {
        self.tls = Some(tls);
        self
    }
}

#[async_trait::async_trait]
impl DatasetWriter for FlightWriter {
    async fn write(&self, endpoint: &Location, descriptor: &Descriptor, dataset: &Dataset) -> Result<()> {
        let client = FlightClient::connect(endpoint, self.tls.as_ref()).await?;
        client.do_put(descriptor, dataset).await
    }
}

/// Routes payloads by transmit method.
pub struct TransmissionDispatcher {
    endpoints: Box<dyn EndpointSource>,
    writer: Arc<dyn DatasetWriter>,
}

impl fmt::Debug for TransmissionDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransmissionDispatcher").finish_non_exhaustive()
    }
}

impl Default for TransmissionDispatcher {
    fn default() -> Self {
        Self::new(EnvEndpoints, Arc::new(FlightWriter::new()))
    }
}

impl TransmissionDispatcher {
    pub fn new(endpoints: impl EndpointSource + 'static, writer: Arc<dyn DatasetWriter>) -> Self {
        Self {
            endpoints: Box::new(endpoints),
            writer,
        }
    }

    /// Name of the setting holding the endpoint for `destination`.
    pub fn endpoint_key(destination: &str) -> String {
        format!(
            "{}{}",
            TransmitConfig::ENDPOINT_ENV_PREFIX,
            destination.to_uppercase()
        )
    }

    /// Resolve `destination` to a location without any network I/O.
    pub fn resolve(&self, destination: &str) -> Result<Location> {
        let key = Self::endpoint_key(destination);
        let value = self.endpoints.endpoint(&key).ok_or_else(|| FlightError::Config {
            key: key.clone(),
            message: format!("Invalid destination, please define {}", key),
        })?;
        Location::parse(&value)
    }

    /// Parse `method` and deliver `payload`.
    pub async fn transmit(&self, method: &str, payload: TransmitPayload) -> Result<TransmitOutcome> {
        let method = method.parse::<TransmitMethod>()?;
        self.transmit_with(method, payload).await
    }

    pub async fn transmit_with(&self, method: TransmitMethod, payload: TransmitPayload) -> Result<TransmitOutcome> {
        match method {
            TransmitMethod::Local => Ok(TransmitOutcome::Local(payload)),
            TransmitMethod::Remote => self.transmit_remote(payload).await.map(TransmitOutcome::Remote),
        }
    }

    async fn transmit_remote(&self, payload: TransmitPayload) -> Result<TransferReport> {
        let endpoint = self.resolve(&payload.destination)?;
        let descriptor = Descriptor::for_command(payload.table_name.as_bytes());
        let dataset = payload.dataset;
        debug!("Transmitting {} to {}", payload.table_name, endpoint);

        let start = Instant::now();
        self.writer.write(&endpoint, &descriptor, &dataset).await?;
        let elapsed = start.elapsed();

        let report = TransferReport {
            destination: payload.destination,
            endpoint,
            rows: dataset.num_rows(),
            columns: dataset.num_columns(),
            bytes: dataset.encoded_size(),
            elapsed,
        };
        info!(
            "table of: {} rows, {} cols, {:.5} MB transmitted in {:.2} seconds",
            report.rows,
            report.columns,
            report.megabytes(),
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::synthetic;
    use std::sync::Mutex;

    /// Records every write instead of connecting anywhere.
    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<(Location, Descriptor, usize)>>,
    }

    #[async_trait::async_trait]
    impl DatasetWriter for RecordingWriter {
        async fn write(&self, endpoint: &Location, descriptor: &Descriptor, dataset: &Dataset) -> Result<()> {
            self.writes
                .lock()
                .unwrap()
                .push((endpoint.clone(), descriptor.clone(), dataset.num_rows()));
            Ok(())
        }
    }

    fn payload(destination: &str) -> TransmitPayload {
        TransmitPayload::new(destination, "stock_prices", synthetic::stock_prices().unwrap())
            .with_metadata(serde_json::json!({"select_fields": [], "filters": {}}))
    }

    fn dispatcher(endpoints: &[(&str, &str)]) -> (TransmissionDispatcher, Arc<RecordingWriter>) {
        let map: HashMap<String, String> = endpoints
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let writer = Arc::new(RecordingWriter::default());
        (TransmissionDispatcher::new(map, writer.clone()), writer)
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("LOCAL".parse::<TransmitMethod>().unwrap(), TransmitMethod::Local);
        assert_eq!("REST".parse::<TransmitMethod>().unwrap(), TransmitMethod::Local);
        assert_eq!("FLIGHT".parse::<TransmitMethod>().unwrap(), TransmitMethod::Remote);
        match "CARRIER_PIGEON".parse::<TransmitMethod>() {
            Err(FlightError::InvalidMethod { method }) => assert_eq!(method, "CARRIER_PIGEON"),
            other => panic!("Expected InvalidMethod, got: {:?}", other),
        }
    }

    #[test]
    fn test_endpoint_key() {
        assert_eq!(TransmissionDispatcher::endpoint_key("overlay"), "FLIGHT_URL_OVERLAY");
    }

    #[tokio::test]
    async fn test_local_returns_payload_unchanged() {
        let (dispatcher, writer) = dispatcher(&[]);
        let sent = payload("overlay");

        match dispatcher.transmit("LOCAL", sent.clone()).await.unwrap() {
            TransmitOutcome::Local(back) => {
                assert!(Arc::ptr_eq(&back.dataset, &sent.dataset));
                assert_eq!(back.table_metadata, sent.table_metadata);
            }
            other => panic!("Expected Local, got: {:?}", other),
        }
        assert!(writer.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_method_fails_before_anything_else() {
        let (dispatcher, writer) = dispatcher(&[]);
        let err = dispatcher.transmit("FTP", payload("overlay")).await.unwrap_err();
        assert!(matches!(err, FlightError::InvalidMethod { .. }));
        assert!(writer.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_config_error_without_io() {
        let (dispatcher, writer) = dispatcher(&[("FLIGHT_URL_OTHER", "grpc://h:1")]);
        let err = dispatcher.transmit("REMOTE", payload("overlay")).await.unwrap_err();

        match err {
            FlightError::Config { key, .. } => assert_eq!(key, "FLIGHT_URL_OVERLAY"),
            other => panic!("Expected Config, got: {:?}", other),
        }
        assert!(writer.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_rejected_without_io() {
        let (dispatcher, writer) = dispatcher(&[("FLIGHT_URL_OVERLAY", "not a url")]);
        let err = dispatcher.transmit("REMOTE", payload("overlay")).await.unwrap_err();
        assert!(matches!(err, FlightError::InvalidLocation { .. }));
        assert!(writer.writes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remote_writes_under_table_name() {
        let (dispatcher, writer) = dispatcher(&[("FLIGHT_URL_OVERLAY", "grpc+tcp://overlay:5005")]);

        let report = match dispatcher.transmit("FLIGHT", payload("overlay")).await.unwrap() {
            TransmitOutcome::Remote(report) => report,
            other => panic!("Expected Remote, got: {:?}", other),
        };
        assert_eq!(report.rows, 3);
        assert_eq!(report.columns, 3);
        assert!(report.bytes > 0);
        assert_eq!(report.endpoint, Location::for_tcp("overlay", 5005));

        let writes = writer.writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1, Descriptor::for_command("stock_prices"));
    }
}
