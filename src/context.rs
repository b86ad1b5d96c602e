use std::time::Duration;

use ethers::providers::{Provider, Ws};
use ethers::signers::{LocalWallet, Signer};
use tokio::sync::broadcast;

use crate::config;
use crate::error::Result;
use crate::market::MarketplaceClient;
use crate::{HttpClient, SignerClient, WsClient};

/// The context the background services of the relayer run inside of: the
/// loaded configuration plus the shared shutdown signal.
#[derive(Clone)]
pub struct RelayerContext {
    /// The loaded configuration.
    pub config: config::RelayerConfig,
    /// Broadcasts a shutdown signal to all active connections.
    ///
    /// The initial `shutdown` trigger is provided by the `main` caller. When
    /// a background task is spawned, it is passed a broadcast receiver
    /// handle. When a graceful shutdown is initiated, a `()` value is sent
    /// via the broadcast::Sender. Each active task receives it, reaches a
    /// safe terminal state, and completes.
    notify_shutdown: broadcast::Sender<()>,
}

impl RelayerContext {
    /// Creates a new context from the given configuration.
    pub fn new(config: config::RelayerConfig) -> Self {
        let (notify_shutdown, _) = broadcast::channel(2);
        Self {
            config,
            notify_shutdown,
        }
    }

    /// A new receiver handle for the shutdown broadcast.
    pub fn shutdown_signal(&self) -> Shutdown {
        Shutdown::new(self.notify_shutdown.subscribe())
    }

    /// Broadcast the shutdown signal to every background task.
    pub fn shutdown(&self) {
        let _ = self.notify_shutdown.send(());
    }

    /// A quick request/response client against the ledger node.
    pub fn evm_provider(&self) -> Result<HttpClient> {
        let provider =
            Provider::try_from(self.config.ledger.http_endpoint.as_str())?
                .interval(Duration::from_millis(5u64));
        Ok(provider)
    }

    /// A long-lived WebSocket client for the block subscription.
    pub async fn ws_provider(&self) -> Result<WsClient> {
        let provider =
            Provider::<Ws>::connect(self.config.ledger.ws_endpoint.as_str())
                .await?;
        Ok(provider)
    }

    /// The relayer wallet on the configured chain.
    pub fn wallet(&self) -> Result<LocalWallet> {
        let key = &self.config.ledger.private_key;
        let wallet = LocalWallet::from_bytes(key.as_bytes())?
            .with_chain_id(self.config.ledger.chain_id);
        Ok(wallet)
    }

    /// A client that signs and submits relayer transactions.
    pub fn signer_client(&self) -> Result<SignerClient> {
        let provider = self.evm_provider()?;
        let wallet = self.wallet()?;
        Ok(SignerClient::new(provider, wallet))
    }

    /// A client for the marketplace service REST API.
    pub fn market_client(&self) -> Result<MarketplaceClient> {
        MarketplaceClient::new(self.config.market.clone())
    }
}

/// Listens for the shutdown signal.
///
/// Shutdown is signalled using a `broadcast::Receiver`. Only a single value
/// is ever sent. Once a value has been sent via the broadcast channel, the
/// task should shutdown.
///
/// The `Shutdown` struct listens for the signal and tracks that the signal
/// has been received. Callers may query for whether the shutdown signal has
/// been received or not.
#[derive(Debug)]
pub struct Shutdown {
    /// `true` if the shutdown signal has been received
    shutdown: bool,

    /// The receive half of the channel used to listen for shutdown.
    notify: broadcast::Receiver<()>,
}

impl Shutdown {
    /// Create a new `Shutdown` backed by the given `broadcast::Receiver`.
    pub fn new(notify: broadcast::Receiver<()>) -> Shutdown {
        Shutdown {
            shutdown: false,
            notify,
        }
    }

    /// Receive the shutdown notice, waiting if necessary.
    pub async fn recv(&mut self) {
        // If the shutdown signal has already been received, then return
        // immediately.
        if self.shutdown {
            return;
        }

        // Cannot receive a "lag error" as only one value is ever sent.
        let _ = self.notify.recv().await;

        // Remember that the signal has been received.
        self.shutdown = true;
    }
}
