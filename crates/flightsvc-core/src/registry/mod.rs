//! Service registry: publishes broker locations to ZooKeeper.

mod client;
pub mod retry;
pub mod zookeeper;

pub use client::{Coordinator, RegistryClient, RegistryRegistration, RegistrySession, ZkCoordinator};
pub use retry::{retry_async, RetryPolicy, RetryStats};
pub use zookeeper::{CreateMode, ZkSession};
