//! The broker's operation set, independent of the transport.
//!
//! [`BrokerServer`] answers list/info/put/get/action against a shared
//! [`DatasetStore`]. The network layer in [`super::server`] decodes requests
//! and calls into it; tests can drive it directly.

use super::action::Action;
use super::location::Location;
use super::protocol::{ActionResult, ActionType, Criteria, FlightEndpoint, FlightInfo};
use super::shutdown::ShutdownController;
use crate::config::BrokerConfig;
use crate::dataset::{Dataset, DatasetBuilder, RecordBatch, Schema};
use crate::descriptor::{Descriptor, DescriptorKey, Ticket};
use crate::error::{FlightError, Result};
use crate::store::{DatasetStore, StoreEntry};
use futures::{Stream, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How `do_get` treats tickets that do not decode to a key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TicketPolicy {
    /// Undecodable tickets look exactly like a lookup miss.
    #[default]
    Lenient,
    /// Undecodable tickets fail with [`FlightError::InvalidTicket`].
    Strict,
}

/// Descriptor-addressed dataset broker.
#[derive(Debug)]
pub struct BrokerServer {
    store: Arc<DatasetStore>,
    location: Location,
    shutdown: ShutdownController,
    ticket_policy: TicketPolicy,
    batch_rows: usize,
}

impl BrokerServer {
    pub fn new(store: Arc<DatasetStore>, location: Location, shutdown: ShutdownController) -> Self {
        Self {
            store,
            location,
            shutdown,
            ticket_policy: TicketPolicy::default(),
            batch_rows: BrokerConfig::BATCH_ROWS,
        }
    }

    pub fn with_ticket_policy(mut self, policy: TicketPolicy) -> Self {
        self.ticket_policy = policy;
        self
    }

    pub fn with_batch_rows(mut self, rows: usize) -> Self {
        self.batch_rows = rows.max(1);
        self
    }

    pub fn store(&self) -> &Arc<DatasetStore> {
        &self.store
    }

    pub fn location(&self) -> &Location {
        &self.location
    }

    pub fn shutdown_controller(&self) -> &ShutdownController {
        &self.shutdown
    }

    fn flight_info(&self, key: &DescriptorKey, entry: &StoreEntry) -> FlightInfo {
        FlightInfo {
            schema: entry.dataset.schema().clone(),
            descriptor: key.to_descriptor(),
            endpoints: vec![FlightEndpoint {
                ticket: Ticket::for_key(key),
                locations: vec![self.location.clone()],
            }],
            total_records: entry.total_records,
            total_bytes: entry.total_bytes,
        }
    }

    /// Summaries of every stored dataset. The criteria are not applied.
    pub fn list_flights(&self, _criteria: &Criteria) -> impl Iterator<Item = FlightInfo> + '_ {
        self.store
            .list()
            .map(move |(key, entry)| self.flight_info(&key, &entry))
    }

    pub fn get_flight_info(&self, descriptor: &Descriptor) -> Result<FlightInfo> {
        let key = descriptor.key();
        self.store
            .entry(&key)
            .map(|entry| self.flight_info(&key, &entry))
            .ok_or_else(|| FlightError::NotFound {
                key: key.to_string(),
            })
    }

    /// Materialize an inbound batch stream and store it under `descriptor`.
    ///
    /// Nothing is stored unless every batch is received and valid.
    pub async fn do_put<S>(&self, descriptor: &Descriptor, schema: Schema, batches: S) -> Result<()>
    where
        S: Stream<Item = Result<RecordBatch>>,
    {
        let key = descriptor.key();
        let mut builder = DatasetBuilder::new(schema);
        let mut batches = std::pin::pin!(batches);

        while let Some(batch) = batches.next().await {
            if let Err(e) = batch.and_then(|b| builder.push(b)) {
                warn!("Discarding put for {}: {}", key, e);
                return Err(e);
            }
        }

        self.store.put(key, builder.finish());
        Ok(())
    }

    /// Resolve a ticket to a batch stream. `None` when nothing matches.
    pub fn do_get(&self, ticket: &Ticket) -> Result<Option<DatasetStream>> {
        let key = match ticket.decode_key() {
            Ok(key) => key,
            Err(e) => {
                debug!("Undecodable ticket: {}", e);
                return match self.ticket_policy {
                    TicketPolicy::Lenient => Ok(None),
                    TicketPolicy::Strict => Err(e),
                };
            }
        };

        Ok(self
            .store
            .entry(&key)
            .map(|entry| DatasetStream::new(entry.dataset, self.batch_rows)))
    }

    pub fn list_actions(&self) -> Vec<ActionType> {
        Action::advertised()
    }

    pub fn do_action(&self, action: &Action) -> Result<Vec<ActionResult>> {
        match action {
            Action::Clear => Err(FlightError::NotImplemented {
                action: Action::CLEAR.to_string(),
            }),
            Action::Healthcheck => Ok(Vec::new()),
            Action::Shutdown => {
                let ack = ActionResult::new(b"Shutdown!".to_vec());
                if !self.shutdown.schedule() {
                    info!("Shutdown already requested");
                }
                Ok(vec![ack])
            }
            Action::Unknown(name) => Err(FlightError::UnknownAction { name: name.clone() }),
        }
    }
}

/// Record batches of a stored dataset, produced on demand.
#[derive(Debug)]
pub struct DatasetStream {
    dataset: Arc<Dataset>,
    offset: usize,
    batch_rows: usize,
}

impl DatasetStream {
    fn new(dataset: Arc<Dataset>, batch_rows: usize) -> Self {
        Self {
            dataset,
            offset: 0,
            batch_rows: batch_rows.max(1),
        }
    }

    pub fn schema(&self) -> &Schema {
        self.dataset.schema()
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }
}

impl Iterator for DatasetStream {
    type Item = RecordBatch;

    fn next(&mut self) -> Option<RecordBatch> {
        if self.offset >= self.dataset.num_rows() {
            return None;
        }
        let batch = RecordBatch {
            columns: self
                .dataset
                .columns()
                .iter()
                .map(|c| c.slice(self.offset, self.batch_rows))
                .collect(),
        };
        self.offset += self.batch_rows;
        Some(batch)
    }
}
