//! Flightsvc Core - descriptor-addressed columnar dataset broker.
//!
//! Producers publish datasets under a [`Descriptor`]; consumers discover them
//! with `list_flights` / `get_flight_info` and fetch them by [`Ticket`].
//! The broker keeps everything in an in-memory [`DatasetStore`] and can
//! announce itself to a ZooKeeper registry on a best-effort basis.
//!
//! # Example
//!
//! ```rust,ignore
//! use flightsvc_core::{BrokerOptions, DatasetStore, Descriptor, FlightClient, FlightServer};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> flightsvc_core::Result<()> {
//!     let handle = FlightServer::start(
//!         Arc::new(DatasetStore::new()),
//!         BrokerOptions::default().with_port(0),
//!     )
//!     .await?;
//!
//!     let client = FlightClient::connect(handle.location(), None).await?;
//!     let stocks = flightsvc_core::dataset::synthetic::stock_prices()?;
//!     client.do_put(&Descriptor::for_command("stocks"), &stocks).await?;
//!
//!     for info in client.list_flights(Default::default()).await? {
//!         println!("{} rows", info.total_records);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dataset;
pub mod descriptor;
pub mod error;
pub mod flight;
pub mod registry;
pub mod store;
pub mod transmit;

pub use dataset::{Column, DataType, Dataset, DatasetBuilder, Field, RecordBatch, Schema};
pub use descriptor::{Descriptor, DescriptorKey, DescriptorType, Ticket};
pub use error::{FlightError, Result};
pub use flight::{
    Action, ActionRequest, ActionResult, ActionType, BrokerOptions, BrokerServer,
    ClientTlsSettings, Criteria, FlightClient, FlightEndpoint, FlightInfo, FlightServer,
    FlightServerHandle, Location, ShutdownController, TicketPolicy, TlsSettings,
};
pub use registry::{RegistryClient, RetryPolicy};
pub use store::{DatasetStore, StoreEntry};
pub use transmit::{
    TransferReport, TransmissionDispatcher, TransmitMethod, TransmitOutcome, TransmitPayload,
};
