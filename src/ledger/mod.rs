//! Typed access to the proof market endpoint contract: generated bindings
//! for the surface the relayer consumes, a thin wrapper carrying the chain
//! configuration, and a classifier turning revert reason strings into a
//! structured kind callers can `match` on.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use ethers::contract::{abigen, Contract, ContractError};
use ethers::providers::Middleware;

use crate::config::LedgerConfig;

abigen!(
    ProofMarketEndpoint,
    r#"[
        event OrderCreated(uint256 indexed id, uint256 statementId, uint256[][] publicInputs, uint256 price, address buyer)
        event OrderClosed(uint256 indexed orderId)
        function getStatement(uint256 id) external view returns (uint256, address, uint8)
        function getOrder(uint256 id) external view returns (uint256, uint256, address, address, uint8)
        function setProducer(uint256 orderId, address producerAddress) external
        function closeOrder(uint256 orderId, bytes[] proofs, uint256 finalPrice) external
        function updateStatementPrice(uint256 statementId, uint256[] bids, uint256[] asks) external
    ]"#
);

/// The lifecycle of an order as the ledger reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Created, no producer assigned yet.
    Open,
    /// A producer has been assigned and is working on the proof.
    Processing,
    /// A proof and a final price have been submitted.
    Closed,
    /// A status byte this relayer does not know about.
    Unknown,
}

impl From<u8> for OrderStatus {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::Open,
            1 => Self::Processing,
            2 => Self::Closed,
            _ => Self::Unknown,
        }
    }
}

/// The lifecycle of a statement as the ledger reports it. Statements are
/// never deleted, only flipped inactive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementStatus {
    /// Orders can be created against this statement.
    Active,
    /// Soft-removed.
    Inactive,
    /// A status byte this relayer does not know about.
    Unknown,
}

impl From<u8> for StatementStatus {
    fn from(raw: u8) -> Self {
        match raw {
            0 => Self::Active,
            1 => Self::Inactive,
            _ => Self::Unknown,
        }
    }
}

/// Structured classification of a ledger revert reason, so callers `match`
/// on the outcome instead of substring-searching error text at every call
/// site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevertKind {
    /// e.g. "Statement already exists".
    AlreadyExists,
    /// "Order is not open" - an expected race during reconciliation.
    NotOpen,
    /// e.g. "Statement does not exist".
    DoesNotExist,
    /// An AccessControl role check failed.
    Unauthorized,
    /// Anything else, including errors with no decodable reason.
    Unknown,
}

impl RevertKind {
    /// Classifies a bare revert reason string.
    pub fn from_reason(reason: &str) -> Self {
        let reason = reason.to_ascii_lowercase();
        if reason.contains("already exists") {
            Self::AlreadyExists
        } else if reason.contains("not open") {
            Self::NotOpen
        } else if reason.contains("does not exist") {
            Self::DoesNotExist
        } else if reason.contains("accesscontrol")
            || reason.contains("missing role")
        {
            Self::Unauthorized
        } else {
            Self::Unknown
        }
    }

    /// Classifies a contract error by its decoded revert reason, if any.
    pub fn classify<M: Middleware>(err: &ContractError<M>) -> Self {
        err.decode_revert::<String>()
            .map(|reason| Self::from_reason(&reason))
            .unwrap_or(Self::Unknown)
    }
}

/// A watchable contract is a contract the events watcher can poll.
pub trait WatchableContract: Send + Sync {
    /// The block number where this contract is deployed.
    fn deployed_at(&self) -> u64;

    /// How many blocks to fetch events from at one request.
    fn max_blocks_per_step(&self) -> u64;

    /// The frequency of printing the sync progress.
    fn print_progress_interval(&self) -> Duration;
}

/// The proof market endpoint contract together with its chain
/// configuration.
pub struct ProofMarketContractWrapper<M: Middleware> {
    /// The ledger configuration this contract was built from.
    pub config: LedgerConfig,
    /// The generated contract bindings.
    pub contract: ProofMarketEndpoint<M>,
}

impl<M: Middleware> ProofMarketContractWrapper<M> {
    /// Creates a new wrapper over the configured contract address.
    pub fn new(config: LedgerConfig, client: Arc<M>) -> Self {
        Self {
            contract: ProofMarketEndpoint::new(
                config.contract_address,
                client,
            ),
            config,
        }
    }
}

impl<M: Middleware> Deref for ProofMarketContractWrapper<M> {
    type Target = Contract<M>;

    fn deref(&self) -> &Self::Target {
        &self.contract
    }
}

impl<M: Middleware> WatchableContract for ProofMarketContractWrapper<M> {
    fn deployed_at(&self) -> u64 {
        self.config.deployed_at
    }

    fn max_blocks_per_step(&self) -> u64 {
        self.config.events_watcher.max_blocks_per_step
    }

    fn print_progress_interval(&self) -> Duration {
        Duration::from_millis(
            self.config.events_watcher.print_progress_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_the_reason_corpus() {
        assert_eq!(
            RevertKind::from_reason("Statement already exists"),
            RevertKind::AlreadyExists
        );
        assert_eq!(
            RevertKind::from_reason("Statement does not exist"),
            RevertKind::DoesNotExist
        );
        assert_eq!(
            RevertKind::from_reason("Order is not open"),
            RevertKind::NotOpen
        );
        assert_eq!(
            RevertKind::from_reason(
                "AccessControl: account 0xdead is missing role 0x0"
            ),
            RevertKind::Unauthorized
        );
        assert_eq!(
            RevertKind::from_reason("execution reverted"),
            RevertKind::Unknown
        );
    }

    #[test]
    fn status_bytes_decode() {
        assert_eq!(OrderStatus::from(0), OrderStatus::Open);
        assert_eq!(OrderStatus::from(1), OrderStatus::Processing);
        assert_eq!(OrderStatus::from(2), OrderStatus::Closed);
        assert_eq!(OrderStatus::from(9), OrderStatus::Unknown);
        assert_eq!(StatementStatus::from(0), StatementStatus::Active);
        assert_eq!(StatementStatus::from(1), StatementStatus::Inactive);
    }
}
