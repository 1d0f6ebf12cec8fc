//! Flightsvc load-test client.
//!
//! `roundtrip` pushes a synthetic table, lists and fetches it back with
//! timings; `transmit` goes through the transmission dispatcher using
//! `FLIGHT_URL_<DEST>` from the environment; `action` invokes a broker action.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flightsvc_core::config::BrokerConfig;
use flightsvc_core::dataset::synthetic;
use flightsvc_core::{
    ActionRequest, ClientTlsSettings, Criteria, Dataset, Descriptor, FlightClient, Location,
    TransmissionDispatcher, TransmitOutcome, TransmitPayload,
};
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flightsvc-client")]
#[command(about = "Load-test client for the flightsvc broker")]
struct Args {
    /// Broker host
    #[arg(long, default_value = BrokerConfig::DEFAULT_HOST, global = true)]
    host: String,

    /// Broker port
    #[arg(short, long, default_value_t = BrokerConfig::DEFAULT_PORT, global = true)]
    port: u16,

    /// Connect over TLS, trusting this CA bundle
    #[arg(long, value_name = "FILE", global = true)]
    tls_roots: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Put a synthetic table, list flights, then fetch it by every ticket
    Roundtrip {
        /// Command descriptor to publish under
        #[arg(long, default_value = "get_test_data")]
        command: String,
        /// Renamed copies of every column to append
        #[arg(long, default_value_t = 10)]
        copies: usize,
        /// Times to double the row count
        #[arg(long, default_value_t = 10)]
        doublings: u32,
    },
    /// Push a synthetic table to a named destination
    Transmit {
        destination: String,
        table_name: String,
        /// LOCAL, REMOTE (or their aliases REST, FLIGHT)
        #[arg(long, default_value = "REMOTE")]
        method: String,
        #[arg(long, default_value_t = 10)]
        copies: usize,
        #[arg(long, default_value_t = 0)]
        doublings: u32,
    },
    /// Invoke a broker action such as `shutdown`
    Action {
        name: String,
    },
}

impl Args {
    fn location(&self) -> Location {
        if self.tls_roots.is_some() {
            Location::for_tls(self.host.clone(), self.port)
        } else {
            Location::for_tcp(self.host.clone(), self.port)
        }
    }

    async fn connect(&self) -> Result<FlightClient> {
        let location = self.location();
        let tls = self.tls_roots.as_ref().map(ClientTlsSettings::new);
        FlightClient::connect(&location, tls.as_ref())
            .await
            .with_context(|| format!("failed to connect to {}", location))
    }
}

fn sample_table(copies: usize, doublings: u32) -> Result<Dataset> {
    let table = synthetic::duplicate_columns(&synthetic::stock_prices()?, copies)?;
    Ok(synthetic::generate_rows(&table, doublings)?)
}

fn megabytes(dataset: &Dataset) -> f64 {
    dataset.encoded_size() as f64 / 1024.0 / 1024.0
}

async fn roundtrip(client: &FlightClient, command: &str, table: Dataset) -> Result<()> {
    let descriptor = Descriptor::for_command(command);
    let size_mb = megabytes(&table);

    let tic = Instant::now();
    client.do_put(&descriptor, &table).await?;
    info!(
        "table of: {} rows, {} cols, {:.5} MB sent in {:.2} seconds",
        table.num_rows(),
        table.num_columns(),
        size_mb,
        tic.elapsed().as_secs_f64()
    );
    drop(table);

    for flight in client.list_flights(Criteria::default()).await? {
        info!(
            "flights currently available: {}, columns: {:?}",
            flight.descriptor.key(),
            flight.schema.names()
        );
    }

    let flight_info = client.get_flight_info(&descriptor).await?;
    let tic = Instant::now();
    let mut fetched = None;
    for endpoint in &flight_info.endpoints {
        fetched = client.do_get(&endpoint.ticket).await?;
    }
    let table = fetched.context("broker returned no data for the published ticket")?;
    info!(
        "table of: {} rows, {} cols, {:.5} MB retrieved in {:.2} seconds",
        table.num_rows(),
        table.num_columns(),
        size_mb,
        tic.elapsed().as_secs_f64()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    flightsvc_rpc::init_logging(args.debug);

    match &args.command {
        Command::Roundtrip {
            command,
            copies,
            doublings,
        } => {
            let table = sample_table(*copies, *doublings)?;
            let client = args.connect().await?;
            roundtrip(&client, command, table).await?;
        }
        Command::Transmit {
            destination,
            table_name,
            method,
            copies,
            doublings,
        } => {
            let table = sample_table(*copies, *doublings)?;
            let payload = TransmitPayload::new(destination.as_str(), table_name.as_str(), table);
            match TransmissionDispatcher::default().transmit(method, payload).await? {
                TransmitOutcome::Local(payload) => {
                    info!(
                        "kept {} locally: {} rows",
                        payload.table_name,
                        payload.dataset.num_rows()
                    );
                }
                TransmitOutcome::Remote(report) => {
                    info!("delivered to {} ({})", report.destination, report.endpoint);
                }
            }
        }
        Command::Action { name } => {
            let client = args.connect().await?;
            for result in client.do_action(ActionRequest::new(name.as_str())).await? {
                println!("{}", String::from_utf8_lossy(&result.body));
            }
        }
    }

    Ok(())
}
