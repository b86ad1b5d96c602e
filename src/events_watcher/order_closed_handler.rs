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

use crate::error::Result;
use crate::ledger::ProofMarketEndpointEvents;
use crate::market::{MarketplaceClient, RequestStatus};
use crate::store::file::FileStore;
use crate::store::StreamKey;

use super::{EventHandler, ORDER_CLOSED_STREAM};

/// Reflects `OrderClosed` events onto the marketplace service by moving the
/// matching work record to `closed`. Re-delivery just patches the record to
/// the status it already has.
pub struct OrderClosedHandler {
    market: MarketplaceClient,
}

impl OrderClosedHandler {
    /// Creates the handler over the given marketplace client.
    pub fn new(market: MarketplaceClient) -> Self {
        Self { market }
    }
}

#[async_trait::async_trait]
impl EventHandler for OrderClosedHandler {
    type Store = FileStore;

    fn stream(&self) -> StreamKey {
        StreamKey::from(ORDER_CLOSED_STREAM)
    }

    #[tracing::instrument(skip_all)]
    async fn handle_event(
        &self,
        _store: Arc<Self::Store>,
        event: ProofMarketEndpointEvents,
        log: LogMeta,
    ) -> Result<()> {
        let event = match event {
            ProofMarketEndpointEvents::OrderClosedFilter(inner) => inner,
            _ => return Ok(()),
        };
        let order_id = event.order_id.as_u64();
        tracing::debug!(
            order_id,
            block_number = %log.block_number,
            "Order closed",
        );
        self.market
            .update_request_status(order_id, RequestStatus::Closed)
            .await?;
        tracing::info!(order_id, "Marketplace request marked closed");
        Ok(())
    }
}
