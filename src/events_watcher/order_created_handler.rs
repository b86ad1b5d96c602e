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

use std::sync::Arc;

use ethers::contract::LogMeta;
use ethers::types::U256;
use ethers::utils::format_units;

use crate::error::{Error, Result};
use crate::ledger::ProofMarketEndpointEvents;
use crate::market::{MarketplaceClient, WorkSubmission};
use crate::store::file::FileStore;
use crate::store::StreamKey;

use super::{EventHandler, ORDER_CREATED_STREAM};

/// Forwards `OrderCreated` events to the marketplace service as new work
/// requests. The service keys work records on the order id, so a
/// re-delivered event results in a harmless overwrite, not a second order.
pub struct OrderCreatedHandler {
    market: MarketplaceClient,
}

impl OrderCreatedHandler {
    /// Creates the handler over the given marketplace client.
    pub fn new(market: MarketplaceClient) -> Self {
        Self { market }
    }
}

#[async_trait::async_trait]
impl EventHandler for OrderCreatedHandler {
    type Store = FileStore;

    fn stream(&self) -> StreamKey {
        StreamKey::from(ORDER_CREATED_STREAM)
    }

    #[tracing::instrument(skip_all)]
    async fn handle_event(
        &self,
        _store: Arc<Self::Store>,
        event: ProofMarketEndpointEvents,
        log: LogMeta,
    ) -> Result<()> {
        let event = match event {
            ProofMarketEndpointEvents::OrderCreatedFilter(inner) => inner,
            _ => return Ok(()),
        };
        tracing::debug!(
            order_id = %event.id,
            statement_id = %event.statement_id,
            buyer = %event.buyer,
            block_number = %log.block_number,
            "Order created",
        );
        // the ledger price is an 18-decimals fixed-point integer; the
        // service talks in whole tokens.
        let cost = format_units(event.price, 18)?
            .parse::<f64>()
            .map_err(|_| Error::Generic("unparseable order price"))?;
        let submission = WorkSubmission {
            cost,
            statement_key: event.statement_id.to_string(),
            input: serialize_public_inputs(&event.public_inputs),
        };
        let response = self.market.submit_request(&submission).await?;
        tracing::info!(
            order_id = %event.id,
            "Work request submitted successfully: {}",
            response
        );
        tracing::event!(
            target: crate::probe::TARGET,
            tracing::Level::DEBUG,
            kind = %crate::probe::Kind::OrderSubmission,
            order_id = %event.id,
            statement_id = %event.statement_id,
        );
        Ok(())
    }
}

/// Renders the public inputs as nested decimal JSON arrays, e.g.
/// `[[1,2,3]]`, the format the marketplace service ingests.
fn serialize_public_inputs(inputs: &[Vec<U256>]) -> String {
    let rows: Vec<String> = inputs
        .iter()
        .map(|row| {
            let values: Vec<String> =
                row.iter().map(|v| v.to_string()).collect();
            format!("[{}]", values.join(","))
        })
        .collect();
    format!("[{}]", rows.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_inputs_render_as_nested_arrays() {
        let inputs = vec![vec![
            U256::from(1u64),
            U256::from(2u64),
            U256::from(3u64),
        ]];
        assert_eq!(serialize_public_inputs(&inputs), "[[1,2,3]]");
    }

    #[test]
    fn empty_public_inputs_render_as_empty_array() {
        assert_eq!(serialize_public_inputs(&[]), "[]");
        assert_eq!(serialize_public_inputs(&[vec![]]), "[[]]");
    }

    #[test]
    fn large_inputs_stay_decimal() {
        let inputs = vec![vec![U256::MAX]];
        assert_eq!(
            serialize_public_inputs(&inputs),
            format!("[[{}]]", U256::MAX)
        );
    }
}
