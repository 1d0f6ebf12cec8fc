//! Flight protocol: broker operations, wire format, server and client.

pub mod action;
pub mod broker;
pub mod client;
pub mod location;
pub mod protocol;
pub mod server;
pub mod shutdown;
pub mod tls;

pub use action::Action;
pub use broker::{BrokerServer, DatasetStream, TicketPolicy};
pub use client::FlightClient;
pub use location::{Location, Scheme};
pub use protocol::{
    ActionRequest, ActionResult, ActionType, Criteria, FlightEndpoint, FlightInfo, StreamFrame,
};
pub use server::{BrokerOptions, FlightServer, FlightServerHandle};
pub use shutdown::ShutdownController;
pub use tls::{ClientTlsSettings, TlsSettings};
