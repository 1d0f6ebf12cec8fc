//! Best-effort broker registration with a coordination service.
//!
//! [`RegistryClient::connect`] tries to open a session and publish the
//! broker's location as an ephemeral node. It never fails: errors are logged
//! and the broker keeps serving without a registration. There is no
//! reconnection after the attempts are used up.

use super::retry::{retry_async, RetryPolicy};
use super::zookeeper::ZkSession;
use crate::config::RegistryConfig;
use crate::error::{FlightError, Result};
use crate::flight::Location;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Opens sessions against a coordination service.
#[async_trait::async_trait]
pub trait Coordinator: Send + Sync {
    /// Establish a session with the first reachable host.
    ///
    /// `timeout` is the budget for the whole host list.
    async fn connect(&self, hosts: &[String], timeout: Duration) -> Result<Box<dyn RegistrySession>>;
}

/// An open session able to publish the broker's location.
#[async_trait::async_trait]
pub trait RegistrySession: Send + Sync + fmt::Debug {
    /// Publish `data` at `path` for the lifetime of the session.
    async fn register(&self, path: &str, data: &[u8]) -> Result<()>;
}

/// ZooKeeper-backed [`Coordinator`].
#[derive(Debug, Clone)]
pub struct ZkCoordinator {
    session_timeout: Duration,
}

impl Default for ZkCoordinator {
    fn default() -> Self {
        Self {
            session_timeout: RegistryConfig::SESSION_TIMEOUT,
        }
    }
}

impl ZkCoordinator {
    pub fn new(session_timeout: Duration) -> Self {
        Self { session_timeout }
    }
}

#[async_trait::async_trait]
impl Coordinator for ZkCoordinator {
    async fn connect(&self, hosts: &[String], timeout: Duration) -> Result<Box<dyn RegistrySession>> {
        // Each host gets an equal share so one hung host cannot starve the rest
        let per_host = timeout / u32::try_from(hosts.len().max(1)).unwrap_or(u32::MAX);
        let mut last_error = None;
        for host in hosts {
            let attempt = tokio::time::timeout(per_host, ZkSession::connect(host, self.session_timeout))
                .await
                .unwrap_or_else(|_| {
                    Err(FlightError::RegistryTimeout {
                        hosts: host.clone(),
                        timeout: per_host,
                    })
                });
            match attempt {
                Ok(session) => return Ok(Box::new(session)),
                Err(e) => {
                    debug!("Registry host {} unavailable: {}", host, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| FlightError::RegistryUnavailable {
            hosts: String::new(),
            message: "no registry hosts configured".to_string(),
        }))
    }
}

#[async_trait::async_trait]
impl RegistrySession for ZkSession {
    async fn register(&self, path: &str, data: &[u8]) -> Result<()> {
        self.create_ephemeral(path, data).await
    }
}

/// The write-once result of a successful registration.
#[derive(Debug)]
pub struct RegistryRegistration {
    pub location: Location,
    pub path: String,
    session: Box<dyn RegistrySession>,
}

impl RegistryRegistration {
    pub fn session(&self) -> &dyn RegistrySession {
        self.session.as_ref()
    }
}

/// Registers one broker location with the coordination service.
pub struct RegistryClient {
    hosts: Vec<String>,
    coordinator: Arc<dyn Coordinator>,
    retry: RetryPolicy,
    connect_timeout: Duration,
    registration: OnceLock<RegistryRegistration>,
}

impl fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClient")
            .field("hosts", &self.hosts)
            .field("retry", &self.retry)
            .field("connect_timeout", &self.connect_timeout)
            .field("registered", &self.is_registered())
            .finish()
    }
}

impl RegistryClient {
    /// Client for a comma-separated `host:port` list, backed by ZooKeeper.
    pub fn new(addresses: &str) -> Self {
        Self::with_hosts(Self::parse_hosts(addresses))
    }

    pub fn with_hosts(hosts: Vec<String>) -> Self {
        Self {
            hosts,
            coordinator: Arc::new(ZkCoordinator::default()),
            retry: RetryPolicy::default(),
            connect_timeout: RegistryConfig::CONNECT_TIMEOUT,
            registration: OnceLock::new(),
        }
    }

    pub fn with_coordinator(mut self, coordinator: Arc<dyn Coordinator>) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bound on each session-establishment attempt.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn parse_hosts(addresses: &str) -> Vec<String> {
        addresses
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// Node path under which `location` is published.
    pub fn node_path(location: &Location) -> String {
        format!("{}/{}", RegistryConfig::ROOT_PATH, location.authority())
    }

    /// Worst-case time [`connect`](Self::connect) can take.
    pub fn time_bound(&self) -> Duration {
        self.connect_timeout
            .saturating_mul(self.retry.max_attempts)
            .saturating_add(self.retry.max_total_delay())
    }

    pub fn is_registered(&self) -> bool {
        self.registration.get().is_some()
    }

    pub fn registration(&self) -> Option<&RegistryRegistration> {
        self.registration.get()
    }

    /// Register `location`. Failures are logged, never returned.
    pub async fn connect(&self, location: &Location) {
        if self.is_registered() {
            warn!("Registry connect called again; keeping the first registration");
            return;
        }

        let hosts = self.hosts.join(",");
        info!("connecting to registry: {}", hosts);

        let path = Self::node_path(location);
        let data = location.uri();
        let (path_ref, data_ref, hosts_ref) = (&path, &data, &hosts);

        let (result, stats) = retry_async(
            &self.retry,
            |attempt| async move {
                debug!("Registry attempt {} against {}", attempt + 1, hosts_ref);
                let establish = async {
                    let session = self
                        .coordinator
                        .connect(&self.hosts, self.connect_timeout)
                        .await?;
                    session.register(path_ref, data_ref.as_bytes()).await?;
                    Ok::<_, FlightError>(session)
                };
                tokio::time::timeout(self.connect_timeout, establish)
                    .await
                    .map_err(|_| FlightError::RegistryTimeout {
                        hosts: hosts_ref.clone(),
                        timeout: self.connect_timeout,
                    })?
            },
            |_: &FlightError| true,
        )
        .await;

        match result {
            Ok(session) => {
                info!("registered {} at {}", location, path);
                let registration = RegistryRegistration {
                    location: location.clone(),
                    path,
                    session,
                };
                if self.registration.set(registration).is_err() {
                    warn!("Concurrent registry connect; keeping the first registration");
                }
            }
            Err(FlightError::RegistryTimeout { timeout, .. }) => {
                error!(
                    "Registry connection timeout ({:?} per attempt, {} attempts)",
                    timeout, stats.attempts
                );
            }
            Err(e) => {
                error!(
                    error = ?e,
                    attempts = stats.attempts,
                    "Failed to connect to registry: {}", e
                );
            }
        }
    }

    /// Run [`connect`](Self::connect) on its own task so serving is never delayed.
    pub fn spawn_connect(self: Arc<Self>, location: Location) -> JoinHandle<()> {
        tokio::spawn(async move { self.connect(&location).await })
    }
}
