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
#![warn(missing_docs)]
//! # Ledger Events Watcher Module
//!
//! A module that listens for events on the proof market ledger.
//!
//! ## Overview
//!
//! The watcher subscribes to new-block notifications over WebSocket and
//! forwards them through a bounded channel to a single dispatcher. For each
//! notification, the dispatcher fetches the events every registered handler
//! is interested in from that handler's checkpoint up to the notified head,
//! invokes the handler per event in ledger order, and persists the cursor
//! only after a fully-handled range. A handler failure leaves the cursor
//! untouched, so the same range is re-fetched and re-delivered
//! (at-least-once); handlers are idempotent against the marketplace
//! service. The [`EventWatcher::run`] supervisor re-establishes a dropped
//! subscription after a fixed delay, resuming from the persisted
//! checkpoints, and never gives up.
use std::cmp;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::{Backoff, Constant};
use ethers::contract::{Contract, LogMeta};
use ethers::providers::Middleware;
use futures::prelude::*;
use tokio::sync::mpsc;

use crate::context::RelayerContext;
use crate::error::{Error, Result};
use crate::ledger::{ProofMarketEndpointEvents, WatchableContract};
use crate::store::{HistoryStore, StreamKey};
use crate::HttpClient;

/// A module for forwarding created orders to the marketplace service.
mod order_created_handler;
#[doc(hidden)]
pub use order_created_handler::*;

/// A module for reflecting closed orders onto the marketplace service.
mod order_closed_handler;
#[doc(hidden)]
pub use order_closed_handler::*;

/// Checkpoint stream of the order-created pipeline.
pub const ORDER_CREATED_STREAM: &str = "OrderCreated";
/// Checkpoint stream of the order-closed pipeline.
pub const ORDER_CLOSED_STREAM: &str = "OrderClosed";

/// How many block notifications may queue up before the subscription
/// producer is paused (back-pressure on the dispatcher).
const BLOCK_NOTIFICATIONS_CAPACITY: usize = 512;

/// Connection state of the supervisor owning the live subscription. Held
/// per watcher task, so streams reconnect independently of each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Subscription active, notifications flowing.
    Connected,
    /// Subscription torn down; waiting out the backoff delay.
    Reconnecting,
}

/// A handler for one named event stream, with its own checkpoint cursor.
#[async_trait::async_trait]
pub trait EventHandler {
    /// The storage backend this handler checkpoints into.
    type Store: HistoryStore;

    /// The checkpoint stream this handler advances.
    fn stream(&self) -> StreamKey;

    /// Handles a single decoded event. Returning an error leaves the whole
    /// range un-checkpointed, so the event will be re-delivered.
    async fn handle_event(
        &self,
        store: Arc<Self::Store>,
        event: ProofMarketEndpointEvents,
        log: LogMeta,
    ) -> Result<()>;
}

/// A helper type to box any [`EventHandler`] over a given store.
pub type EventHandlerFor<S> = Box<dyn EventHandler<Store = S> + Send + Sync>;

/// Splits the half-open range `(cursor, head]` into query ranges of at most
/// `step` blocks each.
fn query_ranges(cursor: u64, head: u64, step: u64) -> Vec<(u64, u64)> {
    let mut ranges = Vec::new();
    let mut from = cursor;
    while from < head {
        let to = cmp::min(from.saturating_add(step), head);
        ranges.push((from + 1, to));
        from = to;
    }
    ranges
}

/// A trait for watching events from the proof market contract.
#[async_trait::async_trait]
pub trait EventWatcher {
    /// A helper tag used to identify the event watcher in the logs.
    const TAG: &'static str;
    /// The storage backend the registered handlers checkpoint into.
    type Store: HistoryStore + 'static;
    /// The watched contract.
    type Contract: Deref<Target = Contract<HttpClient>>
        + WatchableContract
        + Send
        + Sync;

    /// Returns a task that should be running in the background that will
    /// watch events. Reconnects forever on subscription loss, with a fixed
    /// delay, resuming from the persisted checkpoints (never from "now").
    #[tracing::instrument(
        skip_all,
        fields(
            address = %contract.address(),
            tag = %Self::TAG,
        ),
    )]
    async fn run(
        &self,
        ctx: &RelayerContext,
        store: Arc<Self::Store>,
        contract: Self::Contract,
        handlers: Vec<EventHandlerFor<Self::Store>>,
    ) -> Result<()> {
        let mut backoff = Constant::new(ctx.config.ledger.reconnect_delay());
        let mut state = ConnectionState::Connected;
        loop {
            tracing::trace!(state = ?state, "Watching ledger events");
            let error =
                match self.watch(ctx, &store, &contract, &handlers).await {
                    Ok(()) => return Ok(()),
                    Err(e) => e,
                };
            // this loop is the sole owner of the subscription, so at most
            // one reconnect attempt is ever in flight; error signals land
            // here sequentially instead of spawning parallel attempts.
            state = ConnectionState::Reconnecting;
            tracing::error!(
                state = ?state,
                "Connection error: {}; trying to reconnect ...",
                error
            );
            tracing::event!(
                target: crate::probe::TARGET,
                tracing::Level::DEBUG,
                kind = %crate::probe::Kind::Reconnect,
                tag = %Self::TAG,
            );
            let delay = backoff
                .next_backoff()
                .unwrap_or_else(|| ctx.config.ledger.reconnect_delay());
            tokio::time::sleep(delay).await;
            state = ConnectionState::Connected;
        }
    }

    /// One subscription lifetime: connect, catch up from the checkpoints,
    /// then dispatch live notifications until the connection drops.
    async fn watch(
        &self,
        ctx: &RelayerContext,
        store: &Arc<Self::Store>,
        contract: &Self::Contract,
        handlers: &[EventHandlerFor<Self::Store>],
    ) -> Result<()> {
        let ws = ctx.ws_provider().await?;
        let (notifications, mut block_rx) =
            mpsc::channel::<u64>(BLOCK_NOTIFICATIONS_CAPACITY);
        // the producer only forwards block heights into the bounded
        // channel; all dispatching happens on the single consumer below,
        // so slow handlers exert back-pressure on the subscription.
        let producer = tokio::spawn(async move {
            let mut blocks = match ws.subscribe_blocks().await {
                Ok(stream) => stream,
                Err(e) => {
                    tracing::error!(
                        "Failed to subscribe to new blocks: {}",
                        e
                    );
                    return;
                }
            };
            while let Some(block) = blocks.next().await {
                let number = match block.number {
                    Some(number) => number,
                    None => continue,
                };
                if notifications.send(number.as_u64()).await.is_err() {
                    // consumer gone; drop the subscription.
                    break;
                }
            }
        });
        let outcome = async {
            // the subscription only says the chain moved; where we resume
            // from is decided by the persisted checkpoints.
            let head = contract.client().get_block_number().await?.as_u64();
            self.dispatch(store, contract, handlers, head).await?;
            while let Some(block_number) = block_rx.recv().await {
                tracing::trace!("Latest block number: #{}", block_number);
                self.dispatch(store, contract, handlers, block_number)
                    .await?;
            }
            // the block stream ended without an error; resubscribe.
            Err(Error::SubscriptionClosed)
        }
        .await;
        producer.abort();
        outcome
    }

    /// Advances every registered handler's stream from its checkpoint up to
    /// `head`, persisting the cursor after each fully-handled range.
    async fn dispatch(
        &self,
        store: &Arc<Self::Store>,
        contract: &Self::Contract,
        handlers: &[EventHandlerFor<Self::Store>],
        head: u64,
    ) -> Result<()> {
        for handler in handlers {
            let stream = handler.stream();
            let saved = store.get_last_cursor(stream.clone())?;
            // a stream that has never been checkpointed starts at the
            // contract deployment, not at genesis.
            let cursor = cmp::max(saved, contract.deployed_at());
            let step = contract.max_blocks_per_step();
            // saves the last time we printed sync progress.
            let mut instant = Instant::now();
            for (from, to) in query_ranges(cursor, head, step) {
                tracing::trace!("Reading from #{} to #{}", from, to);
                let events_filter = contract
                    .event_with_filter::<ProofMarketEndpointEvents>(
                        Default::default(),
                    )
                    .from_block(from)
                    .to_block(to);
                let mut found_events =
                    events_filter.query_with_meta().await?;
                // ledger-native ordering: ascending block, then log index.
                found_events
                    .sort_by_key(|(_, log)| (log.block_number, log.log_index));
                tracing::trace!("Found #{} events", found_events.len());
                for (event, log) in found_events {
                    let result = handler
                        .handle_event(store.clone(), event, log)
                        .await;
                    if let Err(e) = result {
                        tracing::error!(
                            stream = %stream,
                            "Error while handling event: {}",
                            e
                        );
                        tracing::warn!("Restarting event watcher ...");
                        // the range is not checkpointed; the next dispatch
                        // re-fetches and re-delivers it.
                        return Err(e);
                    }
                }
                // move forward.
                store.set_last_cursor(stream.clone(), to)?;
                tracing::trace!("Last saved cursor for {}: #{}", stream, to);

                if contract.print_progress_interval()
                    != Duration::from_millis(0)
                    && instant.elapsed() > contract.print_progress_interval()
                {
                    let sync_progress = (to as f64 / head as f64) * 100.0;
                    tracing::info!(
                        "🔄 {} #{} of #{} ({:.4}%)",
                        stream,
                        to,
                        head,
                        sync_progress
                    );
                    tracing::event!(
                        target: crate::probe::TARGET,
                        tracing::Level::TRACE,
                        kind = %crate::probe::Kind::Sync,
                        stream = %stream,
                        block = %to,
                        head = %head,
                    );
                    instant = Instant::now();
                }
            }
        }
        Ok(())
    }
}

/// The ledger events watcher of the relayer: dispatches the registered
/// outbound handlers under the reconnect supervisor of
/// [`EventWatcher::run`].
#[derive(Debug, Clone, Default)]
pub struct LedgerEventWatcher;

#[async_trait::async_trait]
impl EventWatcher for LedgerEventWatcher {
    const TAG: &'static str = "Ledger Events Watcher";

    type Store = crate::store::file::FileStore;

    type Contract =
        crate::ledger::ProofMarketContractWrapper<HttpClient>;
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::ledger::ProofMarketContractWrapper;
    use crate::store::file::FileStore;

    fn test_config() -> crate::config::RelayerConfig {
        serde_json::from_value(serde_json::json!({
            "ledger": {
                "http-endpoint": "http://localhost:8545",
                "ws-endpoint": "ws://localhost:8546",
                "chain-id": 31337,
                "contract-address":
                    "0x5fbdb2315678afecb367f032d93f642f64180aa3",
                "private-key":
                    "0x0000000000000000000000000000000000000000000000000000000000000001",
            },
            "market": {
                "url": "http://localhost:8080",
                "username": "relayer",
                "password": "relayer",
            },
        }))
        .unwrap()
    }

    fn setup_logger() -> Result<()> {
        let log_level = tracing::Level::TRACE;
        let env_filter = tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(
                format!("proof_market_relayer={}", log_level)
                    .parse()
                    .map_err(|_| Error::Generic("bad log directive"))?,
            );
        tracing_subscriber::fmt()
            .with_target(true)
            .without_time()
            .with_max_level(log_level)
            .with_env_filter(env_filter)
            .with_test_writer()
            .compact()
            .init();
        Ok(())
    }

    #[tokio::test]
    #[ignore = "needs a running ledger node and marketplace service"]
    async fn ledger_events_watcher_should_work() -> Result<()> {
        setup_logger()?;
        let ctx = RelayerContext::new(test_config());
        let store = Arc::new(FileStore::temporary()?);
        let client = Arc::new(ctx.evm_provider()?);
        let wrapper = ProofMarketContractWrapper::new(
            ctx.config.ledger.clone(),
            client,
        );
        let market = ctx.market_client()?;
        let handlers: Vec<EventHandlerFor<FileStore>> = vec![
            Box::new(OrderCreatedHandler::new(market.clone())),
            Box::new(OrderClosedHandler::new(market)),
        ];
        let watcher = LedgerEventWatcher;
        watcher.run(&ctx, store, wrapper, handlers).await?;
        Ok(())
    }

    #[test]
    fn ranges_chunk_by_step() {
        assert_eq!(query_ranges(0, 250, 100), vec![(1, 100), (101, 200), (201, 250)]);
        assert_eq!(query_ranges(100, 150, 100), vec![(101, 150)]);
        assert_eq!(query_ranges(0, 1, 100), vec![(1, 1)]);
    }

    #[test]
    fn caught_up_streams_produce_no_ranges() {
        assert!(query_ranges(250, 250, 100).is_empty());
        // a cursor ahead of the head is left alone; it never goes backwards.
        assert!(query_ranges(300, 250, 100).is_empty());
    }
}
