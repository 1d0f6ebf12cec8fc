//! Integration tests for the flightsvc-broker binary.
//!
//! These spawn the real binary on an auto-assigned port and drive it with
//! the library client.

use flightsvc_core::dataset::synthetic;
use flightsvc_core::{ActionRequest, Criteria, Descriptor, FlightClient, Location};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;

struct BrokerProcess {
    child: tokio::process::Child,
    port: u16,
    stdout_drain: Option<tokio::task::JoinHandle<()>>,
}

impl BrokerProcess {
    fn location(&self) -> Location {
        Location::for_tcp("127.0.0.1", self.port)
    }
}

impl Drop for BrokerProcess {
    fn drop(&mut self) {
        if let Some(drain) = self.stdout_drain.take() {
            drain.abort();
        }
        let _ = self.child.start_kill();
    }
}

fn broker_binary() -> Result<PathBuf, String> {
    std::env::var("CARGO_BIN_EXE_flightsvc-broker")
        .map(PathBuf::from)
        .map_err(|_| "CARGO_BIN_EXE_flightsvc-broker not set".to_string())
}

/// Start the broker binary and wait for its `FLIGHT_PORT=` line.
async fn start_broker(extra_args: &[&str]) -> Result<BrokerProcess, String> {
    let mut child = tokio::process::Command::new(broker_binary()?)
        .arg("--host")
        .arg("127.0.0.1")
        .arg("--port")
        .arg("0")
        .args(extra_args)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| format!("failed to spawn flightsvc-broker: {e}"))?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| "failed to capture stdout".to_string())?;
    let mut lines = tokio::io::BufReader::new(stdout).lines();

    let mut discovered_port = None;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(250), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                if let Some(value) = line.strip_prefix("FLIGHT_PORT=") {
                    let parsed = value
                        .trim()
                        .parse::<u16>()
                        .map_err(|e| format!("invalid FLIGHT_PORT value '{value}': {e}"))?;
                    discovered_port = Some(parsed);
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(err)) => return Err(format!("failed to read broker stdout: {err}")),
            Err(_) => continue,
        }
    }

    let port = discovered_port.ok_or_else(|| "FLIGHT_PORT line not emitted".to_string())?;
    let stdout_drain =
        tokio::spawn(async move { while let Ok(Some(_)) = lines.next_line().await {} });

    Ok(BrokerProcess {
        child,
        port,
        stdout_drain: Some(stdout_drain),
    })
}

#[tokio::test]
async fn test_binary_serves_put_and_get() {
    let broker = start_broker(&[]).await.expect("broker should start");
    let client = FlightClient::connect(&broker.location(), None).await.unwrap();

    let table = synthetic::duplicate_columns(&synthetic::stock_prices().unwrap(), 1).unwrap();
    client
        .do_put(&Descriptor::for_command("get_test_data"), &table)
        .await
        .unwrap();

    let flights = client.list_flights(Criteria::default()).await.unwrap();
    assert_eq!(flights.len(), 1);
    assert_eq!(flights[0].num_columns(), 6);

    let fetched = client.do_get(flights[0].ticket().unwrap()).await.unwrap();
    assert_eq!(fetched, Some(table));
}

#[tokio::test]
async fn test_binary_exits_after_shutdown_action() {
    let mut broker = start_broker(&[]).await.expect("broker should start");
    let client = FlightClient::connect(&broker.location(), None).await.unwrap();

    let results = client.do_action(ActionRequest::new("shutdown")).await.unwrap();
    assert_eq!(results[0].body, b"Shutdown!".to_vec());

    let status = tokio::time::timeout(Duration::from_secs(10), broker.child.wait())
        .await
        .expect("broker should exit after the grace period")
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn test_binary_serves_with_unreachable_registry() {
    let broker = start_broker(&["--registry", "127.0.0.1:1"])
        .await
        .expect("broker should start");
    let client = FlightClient::connect(&broker.location(), None).await.unwrap();

    assert_eq!(client.list_actions().await.unwrap().len(), 2);
    assert!(client.list_flights(Criteria::default()).await.unwrap().is_empty());
}
