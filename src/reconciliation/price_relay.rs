use std::sync::Arc;

use ethers::types::U256;
use ethers::utils::parse_units;

use crate::context::RelayerContext;
use crate::error::{Error, Result};
use crate::ledger::{ProofMarketEndpoint, RevertKind, StatementStatus};
use crate::market::{MarketplaceClient, StatementBook};
use crate::SignerClient;

/// Pushes the marketplace order book snapshot onto the ledger's statement
/// price tables. Stateless: every tick reads the current top of book and
/// overwrites, so there is no cursor to keep.
pub struct PriceRelay {
    market: MarketplaceClient,
    contract: ProofMarketEndpoint<SignerClient>,
}

impl PriceRelay {
    /// Builds the price relay from the relayer context.
    pub fn new(ctx: &RelayerContext) -> Result<Self> {
        let client = Arc::new(ctx.signer_client()?);
        let contract = ProofMarketEndpoint::new(
            ctx.config.ledger.contract_address,
            client,
        );
        Ok(Self {
            market: ctx.market_client()?,
            contract,
        })
    }

    /// Runs the relay forever on the configured interval.
    pub async fn run(&self, ctx: &RelayerContext) -> Result<()> {
        let mut ticker =
            tokio::time::interval(ctx.config.price_relay.tick_interval());
        loop {
            ticker.tick().await;
            if let Err(e) = self.relay_prices().await {
                tracing::error!("Price relay pass failed: {}", e);
            }
        }
    }

    #[tracing::instrument(skip(self))]
    async fn relay_prices(&self) -> Result<()> {
        let books = self.market.order_book_top().await?;
        for book in &books {
            if let Err(e) = self.relay_statement_price(book).await {
                tracing::error!(
                    statement = %book.statement_key,
                    "Failed to update statement price: {}",
                    e
                );
            }
        }
        Ok(())
    }

    async fn relay_statement_price(&self, book: &StatementBook) -> Result<()> {
        let statement_id = U256::from_dec_str(&book.statement_key)
            .map_err(|_| Error::Generic("unparseable statement key"))?;
        match self.contract.get_statement(statement_id).call().await {
            Ok((_, _, status)) => {
                if StatementStatus::from(status) != StatementStatus::Active {
                    tracing::debug!(
                        statement = %book.statement_key,
                        "Statement is inactive; skipping price update",
                    );
                    return Ok(());
                }
            }
            Err(e) if RevertKind::classify(&e) == RevertKind::DoesNotExist => {
                tracing::debug!(
                    statement = %book.statement_key,
                    "Statement unknown to the ledger; skipping price update",
                );
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
        let bids = ladder(&book.bids)?;
        let asks = ladder(&book.asks)?;
        tracing::debug!(
            statement = %book.statement_key,
            name = %book.name,
            bids = bids.len(),
            asks = asks.len(),
            "Relaying statement price",
        );
        self.contract
            .update_statement_price(statement_id, bids, asks)
            .send()
            .await?
            .await?;
        tracing::info!(
            statement = %book.statement_key,
            "Statement price updated",
        );
        Ok(())
    }
}

/// Converts one side of the book into the fixed-point ladder the contract
/// expects.
fn ladder(entries: &[crate::market::BookEntry]) -> Result<Vec<U256>> {
    entries
        .iter()
        .map(|entry| Ok(parse_units(entry.cost.to_string(), 18)?.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::BookEntry;

    #[test]
    fn ladders_are_fixed_point() {
        let side = vec![BookEntry { cost: 10.0 }, BookEntry { cost: 0.5 }];
        let ladder = ladder(&side).unwrap();
        assert_eq!(ladder[0], U256::from(10u64) * U256::exp10(18));
        assert_eq!(ladder[1], U256::exp10(17) * U256::from(5u64));
    }
}
