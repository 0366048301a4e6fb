use std::time::Duration;
use thiserror::Error;

/// Errors produced by the per-chain RPC layer.
///
/// Callers can distinguish timeouts from transport failures from node-side
/// JSON-RPC errors; retry policy lives in the callers, not here.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Jsonrpc { code: i64, message: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("chain id {0} is not in the network registry")]
    UnknownChain(u64),

    #[error("no usable rpc endpoint for chain id {0}")]
    NoProvider(u64),
}

impl RpcError {
    /// Maps an ethers provider error onto the taxonomy, preserving the
    /// node-side error code when one is present.
    pub fn from_provider(err: ethers::providers::ProviderError) -> Self {
        use ethers::providers::RpcError as _;
        if let Some(jsonrpc) = err.as_error_response() {
            Self::Jsonrpc {
                code: jsonrpc.code,
                message: jsonrpc.message.clone(),
            }
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Failure reasons for a single price-discovery tier.
///
/// `NoPool` and `MalformedPrice` are defined "no price via this tier"
/// outcomes that advance the fallback chain; they are not transport errors.
#[derive(Debug, Error)]
pub enum PriceLookupError {
    #[error("no pool for the pair at any known fee tier")]
    NoPool,

    #[error("pool price out of sane bounds: {0}")]
    MalformedPrice(f64),

    #[error("price api: {0}")]
    Api(String),

    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Top-level engine errors. A refresh only fails outright when every
/// configured chain's fetch failed; partial data is not an error.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("all {0} configured chains failed to fetch")]
    AllChainsFailed(usize),

    #[error("no chains configured in the network registry")]
    NoChainsConfigured,
}
