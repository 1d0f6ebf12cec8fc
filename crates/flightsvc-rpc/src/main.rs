//! Flightsvc broker - serves descriptor-addressed datasets.
//!
//! Prints `FLIGHT_PORT=<port>` on stdout once listening, announces itself to
//! the registry in the background and runs until ctrl-c or a `shutdown`
//! action.

use anyhow::Result;
use clap::Parser;
use flightsvc_core::config::BrokerConfig;
use flightsvc_core::{BrokerOptions, DatasetStore, FlightServer, RegistryClient, TlsSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "flightsvc-broker")]
#[command(about = "Descriptor-addressed dataset broker")]
struct Args {
    /// Host to bind to and advertise
    #[arg(long, default_value = BrokerConfig::DEFAULT_HOST)]
    host: String,

    /// Port to listen on (0 = auto-assign)
    #[arg(short, long, default_value_t = BrokerConfig::DEFAULT_PORT)]
    port: u16,

    /// Serve over TLS with this certificate chain and private key
    #[arg(long, num_args = 2, value_names = ["CERTFILE", "KEYFILE"])]
    tls: Option<Vec<PathBuf>>,

    /// Require client certificates (mutual TLS)
    #[arg(long, requires = "tls")]
    verify_client: bool,

    /// CA bundle used to verify client certificates
    #[arg(long, value_name = "FILE")]
    root_certificates: Option<PathBuf>,

    /// Comma-separated registry addresses (host:port,...)
    #[arg(long)]
    registry: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Args {
    fn tls_settings(&self) -> Option<TlsSettings> {
        let paths = self.tls.as_ref()?;
        let (cert, key) = (paths.first()?, paths.get(1)?);
        let mut settings = TlsSettings::new(cert, key);
        if self.verify_client {
            settings.verify_client = true;
        }
        if let Some(roots) = &self.root_certificates {
            settings.root_certificates = Some(roots.clone());
        }
        Some(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    flightsvc_rpc::init_logging(args.debug);

    info!("Starting flightsvc broker");

    let mut options = BrokerOptions::default()
        .with_host(args.host.clone())
        .with_port(args.port);
    if let Some(tls) = args.tls_settings() {
        options = options.with_tls(tls);
    }

    let store = Arc::new(DatasetStore::new());
    let mut handle = FlightServer::start(store, options).await?;

    // Read by process supervisors and the integration tests
    println!("FLIGHT_PORT={}", handle.port());

    // Held until exit so the ephemeral registration outlives the connect task
    let registry = args.registry.as_deref().map(|addresses| {
        let registry = Arc::new(RegistryClient::new(addresses));
        registry.clone().spawn_connect(handle.location().clone());
        registry
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Shutdown signal received, exiting");
        }
        _ = handle.wait() => {
            info!("Broker stopped");
        }
    }

    drop(registry);
    Ok(())
}
