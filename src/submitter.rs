//! Calldata encoding and transaction submission over `ethers`.

use crate::errors::{AppError, Result, classify_middleware_error};
use crate::interfaces::{Receipt, TransactionSubmitter, TxHandle};
use crate::orchestrator::{Action, ActionStep, Amount};
use crate::utils::{to_ethers_address, to_ethers_u256};
use alloy_primitives::{Address, B256, U256};
use ethers::{
    abi::{Token, parse_abi},
    providers::{Middleware, PendingTransaction},
    types::{Bytes, H256, I256, TransactionRequest},
};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ERC20_APPROVE: &str = "function approve(address spender, uint256 amount) returns (bool)";
const WETH_DEPOSIT: &str = "function deposit() payable";
const POOL_DEPOSIT: &str =
    "function deposit(address asset, uint256 amount, address onBehalfOf, uint16 referralCode)";
const POOL_BORROW: &str = "function borrow(address asset, uint256 amount, uint256 interestRateMode, uint16 referralCode, address onBehalfOf)";
const POOL_REPAY: &str = "function repay(address asset, uint256 amount, uint256 rateMode, address onBehalfOf) returns (uint256)";
const ROUTER_EXACT_INPUT_SINGLE: &str = "function exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160)) payable returns (uint256)";
const MANAGER_MINT: &str = "function mint((address,address,uint24,int24,int24,uint256,uint256,uint256,uint256,address,uint256)) payable returns (uint256, uint128, uint256, uint256)";

/// A contract call ready to be wrapped into a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedCall {
    pub to: Address,
    pub data: Vec<u8>,
    /// Native currency attached to the call.
    pub value: U256,
}

fn address(a: Address) -> Token {
    Token::Address(to_ethers_address(a))
}

fn uint(v: U256) -> Token {
    Token::Uint(to_ethers_u256(v))
}

fn small_uint(v: u64) -> Token {
    Token::Uint(ethers::types::U256::from(v))
}

fn int24(tick: i32) -> Token {
    Token::Int(I256::from(tick).into_raw())
}

fn resolved(amount: &Amount, what: &str) -> Result<Token> {
    amount.fixed().map(uint).ok_or_else(|| {
        AppError::InvalidRange(format!("{what} amount {amount:?} is resolved at execution time"))
    })
}

fn encode_call(signature: &str, tokens: &[Token]) -> Result<Vec<u8>> {
    let abi = parse_abi(&[signature])?;
    let function = abi
        .functions()
        .next()
        .ok_or_else(|| AppError::Abi(format!("no function in `{signature}`")))?;
    Ok(function.encode_input(tokens)?)
}

/// Encode `action` into its target, calldata and attached value.
pub fn encode_action(action: &Action) -> Result<EncodedCall> {
    let (to, data, value) = match action {
        Action::Approve {
            token,
            spender,
            amount,
        } => (
            *token,
            encode_call(ERC20_APPROVE, &[address(*spender), resolved(amount, "approve")?])?,
            U256::ZERO,
        ),
        Action::WrapNative { weth, amount } => (*weth, encode_call(WETH_DEPOSIT, &[])?, *amount),
        Action::Swap { router, plan } => {
            let params = Token::Tuple(vec![
                address(plan.token_in),
                address(plan.token_out),
                small_uint(plan.fee.into()),
                address(plan.recipient),
                small_uint(plan.deadline),
                uint(plan.amount_in),
                uint(plan.amount_out_minimum),
                uint(plan.sqrt_price_limit_x96),
            ]);
            (
                *router,
                encode_call(ROUTER_EXACT_INPUT_SINGLE, &[params])?,
                U256::ZERO,
            )
        }
        Action::Deposit {
            lending_pool,
            asset,
            amount,
            on_behalf_of,
            referral_code,
        } => (
            *lending_pool,
            encode_call(
                POOL_DEPOSIT,
                &[
                    address(*asset),
                    resolved(amount, "deposit")?,
                    address(*on_behalf_of),
                    small_uint((*referral_code).into()),
                ],
            )?,
            U256::ZERO,
        ),
        Action::Borrow {
            lending_pool,
            asset,
            amount,
            rate_mode,
            referral_code,
            on_behalf_of,
        } => (
            *lending_pool,
            encode_call(
                POOL_BORROW,
                &[
                    address(*asset),
                    resolved(amount, "borrow")?,
                    small_uint(*rate_mode as u64),
                    small_uint((*referral_code).into()),
                    address(*on_behalf_of),
                ],
            )?,
            U256::ZERO,
        ),
        Action::AddLiquidity {
            position_manager,
            plan,
        } => {
            let params = Token::Tuple(vec![
                address(plan.token0),
                address(plan.token1),
                small_uint(plan.fee.into()),
                int24(plan.tick_lower),
                int24(plan.tick_upper),
                uint(plan.amount0_desired),
                uint(plan.amount1_desired),
                uint(plan.amount0_min),
                uint(plan.amount1_min),
                address(plan.recipient),
                small_uint(plan.deadline),
            ]);
            (
                *position_manager,
                encode_call(MANAGER_MINT, &[params])?,
                U256::ZERO,
            )
        }
        Action::AddSizedLiquidity { sizing, .. } => {
            return Err(AppError::InvalidRange(format!(
                "position in {} is sized at execution time",
                sizing.pool.address
            )));
        }
        Action::Repay {
            lending_pool,
            asset,
            amount,
            rate_mode,
            on_behalf_of,
        } => (
            *lending_pool,
            encode_call(
                POOL_REPAY,
                &[
                    address(*asset),
                    resolved(amount, "repay")?,
                    small_uint(*rate_mode as u64),
                    address(*on_behalf_of),
                ],
            )?,
            U256::ZERO,
        ),
    };
    Ok(EncodedCall { to, data, value })
}

/// Sends encoded actions through a signing middleware.
///
/// Nonces are left to the middleware. When sequences run concurrently from
/// one wallet, stack a `NonceManagerMiddleware` over the signer so sends
/// do not reuse the node's pending nonce.
#[derive(Clone)]
pub struct EthersSubmitter<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> EthersSubmitter<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }
}

impl<M: Middleware + 'static> TransactionSubmitter for EthersSubmitter<M> {
    async fn submit(&self, step: &ActionStep) -> Result<TxHandle> {
        let call = encode_action(&step.action)?;
        let tx = TransactionRequest::new()
            .to(to_ethers_address(call.to))
            .data(Bytes::from(call.data))
            .value(to_ethers_u256(call.value));
        let pending = self
            .client
            .send_transaction(tx, None)
            .await
            .map_err(classify_middleware_error)?;
        let handle = TxHandle(B256::from(pending.tx_hash().0));
        info!(kind = step.kind(), to = %call.to, tx = %handle, "[TX] submitted");
        Ok(handle)
    }

    async fn await_finality(&self, handle: &TxHandle, confirmations: usize) -> Result<Receipt> {
        debug!(tx = %handle, confirmations, "[TX] waiting for confirmations");
        let receipt = PendingTransaction::new(H256::from(handle.0.0), self.client.provider())
            .confirmations(confirmations)
            .await
            .map_err(classify_middleware_error)?;
        let Some(receipt) = receipt else {
            warn!(tx = %handle, "[TX] transaction dropped from mempool");
            return Err(AppError::TransactionRejected(format!(
                "{handle} dropped before inclusion"
            )));
        };
        Ok(Receipt {
            tx_hash: handle.0,
            block_number: receipt.block_number.map(|b| b.as_u64()).unwrap_or_default(),
            success: receipt.status.map(|s| s.as_u64()) == Some(1),
        })
    }
}
