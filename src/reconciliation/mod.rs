// Copyright 2023 Proof Market Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
//! The marketplace -> ledger direction of the relay: a timer-driven loop
//! that polls the marketplace service for state the ledger does not know
//! about yet and issues the corresponding transactions. Two phases per
//! tick, each guarded by its own `updatedOn`-keyed checkpoint:
//!
//! - producers that picked up work but are not recorded on the ledger yet
//!   (`setProducer`), and
//! - completed proofs that still need settling (`closeOrder`).
//!
//! The marketplace service is the source of truth for "needs settlement":
//! a failed submission is retried only for as long as the service keeps
//! surfacing the record past the cursor.

use std::cmp;
use std::sync::Arc;

use ethers::types::{Bytes, U256};
use ethers::utils::parse_units;
use futures::future;

use crate::context::RelayerContext;
use crate::error::Result;
use crate::ledger::{OrderStatus, ProofMarketEndpoint, RevertKind};
use crate::market::{MarketplaceClient, QueryFilter, WorkRecord};
use crate::store::HistoryStore;
use crate::SignerClient;

mod price_relay;
#[doc(hidden)]
pub use price_relay::*;

/// Checkpoint stream of the producer-assignment phase.
pub const PENDING_ASSIGNMENT_STREAM: &str = "pending-producer-assignment";
/// Checkpoint stream of the settlement phase.
pub const COMPLETED_PROOFS_STREAM: &str = "completed-proofs";

/// The reconciliation loop over one ledger contract and one marketplace
/// service account.
pub struct Reconciler<S: HistoryStore> {
    market: MarketplaceClient,
    contract: ProofMarketEndpoint<SignerClient>,
    store: Arc<S>,
    sender: String,
}

impl<S: HistoryStore> Reconciler<S> {
    /// Builds the reconciler from the relayer context.
    pub fn new(ctx: &RelayerContext, store: Arc<S>) -> Result<Self> {
        let client = Arc::new(ctx.signer_client()?);
        let contract = ProofMarketEndpoint::new(
            ctx.config.ledger.contract_address,
            client,
        );
        Ok(Self {
            market: ctx.market_client()?,
            contract,
            store,
            sender: ctx.config.market.username.clone(),
        })
    }

    /// Runs the loop forever on the configured interval. A failing phase
    /// aborts that phase's batch, never the process; the next tick starts
    /// fresh.
    pub async fn run(&self, ctx: &RelayerContext) -> Result<()> {
        let mut ticker =
            tokio::time::interval(ctx.config.reconciliation.tick_interval());
        loop {
            ticker.tick().await;
            tracing::event!(
                target: crate::probe::TARGET,
                tracing::Level::TRACE,
                kind = %crate::probe::Kind::Reconcile,
            );
            if let Err(e) = self.assign_producers().await {
                tracing::error!("Producer assignment pass failed: {}", e);
            }
            if let Err(e) = self.settle_completed().await {
                tracing::error!("Settlement pass failed: {}", e);
            }
        }
    }

    /// Finds orders a producer has picked up that the ledger still shows
    /// without one, and records the producer on the ledger.
    #[tracing::instrument(skip(self))]
    async fn assign_producers(&self) -> Result<()> {
        let cursor = self.store.get_last_cursor(PENDING_ASSIGNMENT_STREAM)?;
        let filters = [
            QueryFilter::eq("sender", self.sender.clone()),
            QueryFilter::eq("status", "processing"),
            QueryFilter::gt("updatedOn", cursor),
        ];
        let records = self.market.list_requests(&filters).await?;
        if records.is_empty() {
            return Ok(());
        }
        tracing::debug!(
            "{} request(s) pending producer assignment",
            records.len()
        );
        for record in &records {
            if let Err(e) = self.assign_producer(record).await {
                tracing::error!(
                    order_id = record.id,
                    "Failed to assign producer: {}",
                    e
                );
            }
        }
        let max_seen = max_updated_on(cursor, &records);
        self.store
            .set_last_cursor(PENDING_ASSIGNMENT_STREAM, max_seen)?;
        Ok(())
    }

    async fn assign_producer(&self, record: &WorkRecord) -> Result<()> {
        let producer_name = match record.producer.as_deref() {
            Some(name) => name,
            None => {
                tracing::warn!(
                    order_id = record.id,
                    "Processing request carries no producer yet; skipping",
                );
                return Ok(());
            }
        };
        let order_id = U256::from(record.id);
        let (_, _, _, _, status) =
            self.contract.get_order(order_id).call().await?;
        if OrderStatus::from(status) != OrderStatus::Open {
            // expected race: the order moved on through another path
            // between our query and now.
            tracing::debug!(
                order_id = record.id,
                status = ?OrderStatus::from(status),
                "Order is not open on the ledger; skipping assignment",
            );
            return Ok(());
        }
        let directory_entry = self.market.producer(producer_name).await?;
        let producer_address = match directory_entry.eth_address {
            Some(address) => address,
            None => {
                tracing::warn!(
                    order_id = record.id,
                    producer = producer_name,
                    "Producer has no on-chain address; skipping",
                );
                return Ok(());
            }
        };
        let call = self.contract.set_producer(order_id, producer_address);
        let result = match call.send().await {
            Ok(pending) => {
                pending.await?;
                tracing::info!(
                    order_id = record.id,
                    producer = producer_name,
                    "Producer assigned on the ledger",
                );
                tracing::event!(
                    target: crate::probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %crate::probe::Kind::RelayTx,
                    method = "setProducer",
                    order_id = record.id,
                );
                Ok(())
            }
            Err(e) => match RevertKind::classify(&e) {
                RevertKind::NotOpen => {
                    tracing::debug!(
                        order_id = record.id,
                        "Order is not open; assignment skipped",
                    );
                    Ok(())
                }
                RevertKind::Unknown => Err(e.into()),
                kind => {
                    // a domain rejection is terminal for this item only.
                    tracing::warn!(
                        order_id = record.id,
                        ?kind,
                        "Ledger rejected setProducer: {}",
                        e
                    );
                    Ok(())
                }
            },
        };
        result
    }

    /// Finds completed proofs newer than the checkpoint and settles them
    /// onto the ledger, all-settle, then advances the cursor to the newest
    /// `updatedOn` seen.
    #[tracing::instrument(skip(self))]
    async fn settle_completed(&self) -> Result<()> {
        let cursor = self.store.get_last_cursor(COMPLETED_PROOFS_STREAM)?;
        let filters = [
            QueryFilter::eq("sender", self.sender.clone()),
            QueryFilter::eq("status", "completed"),
            QueryFilter::gt("updatedOn", cursor),
        ];
        let records = self.market.list_requests(&filters).await?;
        if records.is_empty() {
            return Ok(());
        }
        tracing::debug!("{} completed request(s) to settle", records.len());
        let outcomes = future::join_all(
            records.iter().map(|record| self.settle_order(record)),
        )
        .await;
        for (record, outcome) in records.iter().zip(outcomes) {
            if let Err(e) = outcome {
                tracing::error!(
                    order_id = record.id,
                    "Failed to settle order: {}",
                    e
                );
            }
        }
        // every submission has settled (success or failure); the service
        // keeps re-surfacing anything that still needs settlement.
        let max_seen = max_updated_on(cursor, &records);
        self.store
            .set_last_cursor(COMPLETED_PROOFS_STREAM, max_seen)?;
        Ok(())
    }

    async fn settle_order(&self, record: &WorkRecord) -> Result<()> {
        let order_id = U256::from(record.id);
        let (_, _, _, _, status) =
            self.contract.get_order(order_id).call().await?;
        if OrderStatus::from(status) == OrderStatus::Closed {
            // a previous tick already settled this one and the close has
            // confirmed since; nothing to do.
            tracing::debug!(
                order_id = record.id,
                "Order already closed on the ledger; skipping",
            );
            return Ok(());
        }
        let proof_key = match record.proof_key.as_deref() {
            Some(key) => key,
            None => {
                tracing::warn!(
                    order_id = record.id,
                    "Completed request carries no proof key; skipping",
                );
                return Ok(());
            }
        };
        let cost = match record.cost {
            Some(cost) => cost,
            None => {
                tracing::warn!(
                    order_id = record.id,
                    "Completed request carries no cost; skipping",
                );
                return Ok(());
            }
        };
        let proof = self.market.proof(proof_key).await?;
        let blob = proof_blob(&proof.proof)?;
        let final_price: U256 = parse_units(cost.to_string(), 18)?.into();
        let call = self.contract.close_order(
            order_id,
            vec![Bytes::from(blob)],
            final_price,
        );
        let result = match call.send().await {
            Ok(pending) => {
                pending.await?;
                tracing::info!(
                    order_id = record.id,
                    producer = %proof.sender,
                    "Order settled on the ledger",
                );
                tracing::event!(
                    target: crate::probe::TARGET,
                    tracing::Level::DEBUG,
                    kind = %crate::probe::Kind::RelayTx,
                    method = "closeOrder",
                    order_id = record.id,
                );
                Ok(())
            }
            Err(e) => match RevertKind::classify(&e) {
                RevertKind::NotOpen => {
                    tracing::debug!(
                        order_id = record.id,
                        "Order is not open; settlement skipped",
                    );
                    Ok(())
                }
                RevertKind::Unknown => Err(e.into()),
                kind => {
                    tracing::warn!(
                        order_id = record.id,
                        ?kind,
                        "Ledger rejected closeOrder: {}",
                        e
                    );
                    Ok(())
                }
            },
        };
        result
    }
}

/// The newest `updatedOn` across a batch, never earlier than the current
/// cursor.
fn max_updated_on(cursor: u64, records: &[WorkRecord]) -> u64 {
    records
        .iter()
        .map(|record| record.updated_on)
        .fold(cursor, cmp::max)
}

/// Decodes the opaque proof blob: hex when `0x`-prefixed, raw bytes
/// otherwise.
fn proof_blob(proof: &str) -> Result<Vec<u8>> {
    match proof.strip_prefix("0x") {
        Some(hexed) => Ok(hex::decode(hexed)?),
        None => Ok(proof.as_bytes().to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::RequestStatus;

    fn record(id: u64, updated_on: u64) -> WorkRecord {
        WorkRecord {
            id,
            status: RequestStatus::Completed,
            producer: None,
            cost: Some(10.0),
            proof_key: Some(format!("pk{}", id)),
            updated_on,
            statement_key: None,
            sender: None,
        }
    }

    #[test]
    fn cursor_advances_to_the_newest_update() {
        let records = vec![record(1, 5), record(2, 11), record(3, 7)];
        assert_eq!(max_updated_on(3, &records), 11);
    }

    #[test]
    fn cursor_never_regresses_on_stale_batches() {
        let records = vec![record(1, 5)];
        assert_eq!(max_updated_on(20, &records), 20);
        assert_eq!(max_updated_on(20, &[]), 20);
    }

    #[test]
    fn proof_blobs_decode_hex_or_pass_through() {
        assert_eq!(proof_blob("0xdeadbeef").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(proof_blob("raw-proof").unwrap(), b"raw-proof".to_vec());
        assert!(proof_blob("0xnot-hex").is_err());
    }
}
