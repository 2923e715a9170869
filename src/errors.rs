use alloy_primitives::{Address, U256};
use ethers::contract::ContractError;
use ethers::providers::{Middleware, MiddlewareError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid range: {0}")]
    InvalidRange(String),

    #[error("Invalid tick spacing: {0}")]
    InvalidSpacing(i32),

    #[error("Insufficient balance of {token}: required {required}, available {available}")]
    InsufficientBalance {
        token: Address,
        required: U256,
        available: U256,
    },

    #[error(
        "Allowance insufficient for {token} (spender {spender}): required {required}, current {current}"
    )]
    AllowanceInsufficient {
        token: Address,
        spender: Address,
        required: U256,
        current: U256,
    },

    #[error("Price out of bounds: {0}")]
    PriceOutOfBounds(String),

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("Transaction rejected: {0}")]
    TransactionRejected(String),

    #[error("Timed out waiting for {confirmations} confirmation(s) of {tx}")]
    TransactionTimeout { tx: String, confirmations: usize },

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Post-condition failed: {0}")]
    PostConditionFailed(String),

    #[error("Sequence cancelled before submission")]
    Cancelled,

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("ABI error: {0}")]
    Abi(String),

    #[error("Unit conversion error: {0}")]
    UnitParse(String),

    #[error("Serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Math error: {0}")]
    Math(#[from] uniswap_v3_math::error::UniswapV3MathError),
}

impl AppError {
    /// Whether the failure may clear up on its own and is worth retrying.
    ///
    /// Only confirmation timeouts and transport-level outages qualify;
    /// reverts, rejections and validation failures are final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AppError::TransactionTimeout { .. }
                | AppError::ProviderUnavailable(_)
                | AppError::Provider(_)
        )
    }
}

impl From<ethers::abi::Error> for AppError {
    fn from(e: ethers::abi::Error) -> Self {
        AppError::Abi(e.to_string())
    }
}

impl From<ethers::abi::ParseError> for AppError {
    fn from(e: ethers::abi::ParseError) -> Self {
        AppError::Abi(e.to_string())
    }
}

/// Map a middleware failure onto the retry taxonomy.
///
/// A JSON-RPC error response is the node refusing the request: a revert when
/// execution failed, a rejection otherwise. No response at all is an outage.
pub fn classify_middleware_error<E: MiddlewareError>(e: E) -> AppError {
    match e.as_error_response() {
        Some(rpc) if rpc.is_revert() => AppError::TransactionReverted(rpc.message.clone()),
        Some(rpc) => AppError::TransactionRejected(rpc.message.clone()),
        None => AppError::ProviderUnavailable(e.to_string()),
    }
}

impl<M: Middleware> From<ContractError<M>> for AppError {
    fn from(e: ContractError<M>) -> Self {
        if e.is_revert() {
            return AppError::TransactionReverted(e.to_string());
        }
        match e {
            ContractError::MiddlewareError { e } => classify_middleware_error(e),
            ContractError::ProviderError { e } => classify_middleware_error(e),
            other => AppError::Abi(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_timeouts_and_outages_are_transient() {
        assert!(
            AppError::TransactionTimeout {
                tx: "0xabc".into(),
                confirmations: 1
            }
            .is_transient()
        );
        assert!(AppError::ProviderUnavailable("connection reset".into()).is_transient());
        assert!(!AppError::TransactionReverted("STF".into()).is_transient());
        assert!(!AppError::InvalidRange("bps".into()).is_transient());
        assert!(!AppError::Cancelled.is_transient());
    }

    #[test]
    fn transport_failures_classify_as_outages() {
        let err = ethers::providers::ProviderError::CustomError("connection reset".into());
        assert!(matches!(
            classify_middleware_error(err),
            AppError::ProviderUnavailable(_)
        ));
    }
}
