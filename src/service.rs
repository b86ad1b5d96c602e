//! Starts every background service of the relayer: the ledger events
//! watcher with its outbound handlers, the reconciliation loop, and
//! (when enabled) the price relay. Each task is raced against the shared
//! shutdown signal.

use std::sync::Arc;

use crate::context::RelayerContext;
use crate::error::Result;
use crate::events_watcher::{
    EventHandlerFor, EventWatcher, LedgerEventWatcher, OrderClosedHandler,
    OrderCreatedHandler,
};
use crate::ledger::ProofMarketContractWrapper;
use crate::reconciliation::{PriceRelay, Reconciler};
use crate::store::file::FileStore;

type Store = FileStore;

/// Starts all background services.
///
/// This does not block, will fire the services on background tasks.
pub async fn ignite(ctx: &RelayerContext, store: Arc<Store>) -> Result<()> {
    tracing::debug!(
        contract = %ctx.config.ledger.contract_address,
        "Starting the background services",
    );
    start_ledger_events_watcher(ctx, store.clone())?;
    start_reconciliation(ctx, store)?;
    start_price_relay(ctx)?;
    Ok(())
}

fn start_ledger_events_watcher(
    ctx: &RelayerContext,
    store: Arc<Store>,
) -> Result<()> {
    // check first if we should start the events watcher at all.
    if !ctx.config.ledger.events_watcher.enabled {
        tracing::warn!(
            "Ledger events watcher is disabled for ({}).",
            ctx.config.ledger.contract_address,
        );
        return Ok(());
    }
    let client = Arc::new(ctx.evm_provider()?);
    let wrapper =
        ProofMarketContractWrapper::new(ctx.config.ledger.clone(), client);
    let market = ctx.market_client()?;
    let handlers: Vec<EventHandlerFor<Store>> = vec![
        Box::new(OrderCreatedHandler::new(market.clone())),
        Box::new(OrderClosedHandler::new(market)),
    ];
    let contract_address = ctx.config.ledger.contract_address;
    let mut shutdown_signal = ctx.shutdown_signal();
    let ctx = ctx.clone();
    let task = async move {
        tracing::debug!(
            "Ledger events watcher for ({}) Started.",
            contract_address,
        );
        let watcher = LedgerEventWatcher;
        let events = watcher.run(&ctx, store, wrapper, handlers);
        tokio::select! {
            _ = events => {
                tracing::warn!(
                    "Ledger events watcher stopped for ({})",
                    contract_address,
                );
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!(
                    "Stopping ledger events watcher for ({})",
                    contract_address,
                );
            },
        }
    };
    // kick off the watcher.
    tokio::task::spawn(task);
    Ok(())
}

fn start_reconciliation(ctx: &RelayerContext, store: Arc<Store>) -> Result<()> {
    if !ctx.config.reconciliation.enabled {
        tracing::warn!("Reconciliation loop is disabled.");
        return Ok(());
    }
    let reconciler = Reconciler::new(ctx, store)?;
    let mut shutdown_signal = ctx.shutdown_signal();
    let ctx = ctx.clone();
    let task = async move {
        tracing::debug!("Reconciliation loop Started.");
        tokio::select! {
            _ = reconciler.run(&ctx) => {
                tracing::warn!("Reconciliation loop stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping reconciliation loop");
            },
        }
    };
    tokio::task::spawn(task);
    Ok(())
}

fn start_price_relay(ctx: &RelayerContext) -> Result<()> {
    if !ctx.config.price_relay.enabled {
        tracing::debug!("Price relay is disabled.");
        return Ok(());
    }
    let price_relay = PriceRelay::new(ctx)?;
    let mut shutdown_signal = ctx.shutdown_signal();
    let ctx = ctx.clone();
    let task = async move {
        tracing::debug!("Price relay Started.");
        tokio::select! {
            _ = price_relay.run(&ctx) => {
                tracing::warn!("Price relay stopped");
            },
            _ = shutdown_signal.recv() => {
                tracing::trace!("Stopping price relay");
            },
        }
    };
    tokio::task::spawn(task);
    Ok(())
}
