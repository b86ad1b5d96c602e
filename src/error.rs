use crate::{HttpClient, SignerClient};

/// An enum of all possible errors that could be encountered during the
/// execution of the relayer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An Io error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// JSON Error occurred.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// Config loading error.
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    /// Error while parsing the config files.
    #[error("Config parse error: {}", _0)]
    ParseConfig(#[from] serde_path_to_error::Error<config::ConfigError>),
    /// Error while iterating over a glob pattern.
    #[error(transparent)]
    GlobPattern(#[from] glob::PatternError),
    /// Error while parsing a URL.
    #[error(transparent)]
    Url(#[from] url::ParseError),
    /// Error while talking to the marketplace service.
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    /// Error in Http Provider (ethers client).
    #[error(transparent)]
    EthersProvider(#[from] ethers::providers::ProviderError),
    /// Error while constructing the relayer wallet.
    #[error(transparent)]
    EthersWallet(#[from] ethers::signers::WalletError),
    /// Smart contract error over the read-only client.
    #[error(transparent)]
    EthersContract(#[from] ethers::contract::ContractError<HttpClient>),
    /// Smart contract error over the signing client.
    #[error(transparent)]
    EthersSignerContract(#[from] ethers::contract::ContractError<SignerClient>),
    /// Fixed-point unit conversion error.
    #[error(transparent)]
    Conversion(#[from] ethers::utils::ConversionError),
    /// Hex decoding error.
    #[error(transparent)]
    Hex(#[from] hex::FromHexError),
    /// The live block subscription ended; the supervisor should reconnect.
    #[error("Block subscription closed")]
    SubscriptionClosed,
    /// Generic error.
    #[error("{}", _0)]
    Generic(&'static str),
}

/// A type alias for the result of the relayer, that uses the `Error` enum.
pub type Result<T> = std::result::Result<T, Error>;
