//! Centralized configuration for the flight broker.
//!
//! Constants for the serving loop, the registry client and remote
//! transmission. Runtime overrides go through the builder types that consume
//! these defaults (`BrokerOptions`, `RetryPolicy`).

use std::time::Duration;

/// Broker serving configuration.
pub struct BrokerConfig;

impl BrokerConfig {
    pub const DEFAULT_HOST: &'static str = "localhost";
    pub const DEFAULT_PORT: u16 = 5005;

    /// Delay between acknowledging a shutdown action and stopping the loop.
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

    pub const MAX_FRAME_SIZE: usize = 256 * 1024 * 1024; // 256MB
    pub const MAX_CONNECTIONS: usize = 256;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum rows per streamed record batch.
    pub const BATCH_ROWS: usize = 65_536;
}

/// Registry (coordination service) configuration.
pub struct RegistryConfig;

impl RegistryConfig {
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const BASE_DELAY: Duration = Duration::from_millis(500);
    pub const MAX_DELAY: Duration = Duration::from_secs(10);

    /// Timeout for establishing a single session, separate from the retry loop.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Session timeout negotiated with the coordination service.
    pub const SESSION_TIMEOUT: Duration = Duration::from_secs(10);

    /// Parent node under which broker locations are registered.
    pub const ROOT_PATH: &'static str = "/flightsvc/brokers";

    pub const MAX_PACKET_SIZE: usize = 4 * 1024 * 1024; // 4MB
}

/// Remote transmission configuration.
pub struct TransmitConfig;

impl TransmitConfig {
    /// Environment prefix for destination endpoints (`FLIGHT_URL_<DEST>`).
    pub const ENDPOINT_ENV_PREFIX: &'static str = "FLIGHT_URL_";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_are_reasonable() {
        assert!(BrokerConfig::SHUTDOWN_GRACE > Duration::ZERO);
        assert!(RegistryConfig::BASE_DELAY < RegistryConfig::MAX_DELAY);
        assert!(RegistryConfig::MAX_ATTEMPTS >= 1);
    }
}
