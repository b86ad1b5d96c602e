#![deny(unsafe_code)]
//! # Proof Market Relayer
//!
//! An unattended daemon that keeps the proof market ledger contract and the
//! off-chain marketplace service consistent with each other:
//!
//! - ledger events (orders created, orders closed) are forwarded to the
//!   marketplace service by checkpointed event watchers, and
//! - marketplace progress (producers picking up work, completed proofs) is
//!   reconciled back onto the ledger by a timer-driven loop.
//!
//! Both pipelines persist their progress in small per-stream cursor files,
//! so a crash or an RPC disconnect never loses or duplicates work.

use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Provider, Ws};
use ethers::signers::LocalWallet;

pub mod config;
pub mod context;
pub mod error;
pub mod events_watcher;
pub mod ledger;
pub mod market;
pub mod probe;
pub mod reconciliation;
pub mod service;
pub mod store;

/// Http client for quick request/response calls against the ledger node.
pub type HttpClient = Provider<Http>;
/// WebSocket client used for the live block subscription.
pub type WsClient = Provider<Ws>;
/// Client used to submit relayer transactions to the ledger.
pub type SignerClient = SignerMiddleware<HttpClient, LocalWallet>;
