//! Builders for the multi-step interactions the crate automates.
//!
//! Each builder resolves protocol addresses from an explicit
//! [`NetworkConfig`] and returns an [`ActionSequence`] ready for the
//! orchestrator. Nothing here touches the chain.

use crate::config::NetworkConfig;
use crate::errors::{AppError, Result};
use crate::models::{PositionSizing, SwapPlan};
use crate::orchestrator::{ActionSequence, ActionStep, Amount, InterestRateMode};
use alloy_primitives::{Address, U256};
use tracing::debug;

/// Collateral to supply and debt to take against it.
#[derive(Debug, Clone)]
pub struct DepositBorrow {
    /// Symbol of the collateral token, e.g. "WETH".
    pub collateral: String,
    pub collateral_amount: U256,
    /// Wrap native currency into the collateral first (WETH only).
    pub wrap_native: bool,
    /// Symbol of the token to borrow, e.g. "DAI".
    pub debt: String,
    /// Fixed, or sized from the account once the deposit is final
    /// (see [`borrow_capacity`]).
    pub borrow_amount: Amount,
    pub rate_mode: InterestRateMode,
}

fn require_positive(amount: impl Into<Amount>, what: &str) -> Result<()> {
    if amount.into().fixed().is_some_and(|amount| amount.is_zero()) {
        return Err(AppError::InvalidRange(format!("{what} must be positive")));
    }
    Ok(())
}

/// Borrow `10000 - safety_bps` bps of whatever the account can borrow of
/// `debt` when the borrow step runs, priced through the "`debt`/ETH" feed.
pub fn borrow_capacity(network: &NetworkConfig, debt: &str, safety_bps: u32) -> Result<Amount> {
    let token = network.token(debt)?;
    let price_feed = network.price_feed(&format!("{}/ETH", token.symbol))?;
    Ok(Amount::BorrowCapacity {
        price_feed,
        asset_decimals: token.decimals,
        safety_bps,
    })
}

/// [wrap] → approve collateral → deposit → borrow.
pub fn deposit_and_borrow(
    network: &NetworkConfig,
    lending_pool: Address,
    owner: Address,
    params: &DepositBorrow,
) -> Result<ActionSequence> {
    let mut sequence = ActionSequence::new("deposit-and-borrow", owner);
    push_deposit_and_borrow(&mut sequence, network, lending_pool, owner, params)?;
    Ok(sequence)
}

/// Same as [`deposit_and_borrow`], then approve the debt token and repay
/// `repay_amount` of it. `Amount::Balance` repays whatever is held then.
pub fn borrow_and_repay(
    network: &NetworkConfig,
    lending_pool: Address,
    owner: Address,
    params: &DepositBorrow,
    repay_amount: Amount,
) -> Result<ActionSequence> {
    require_positive(repay_amount, "repay amount")?;
    let debt = network.token(&params.debt)?.address;

    let mut sequence = ActionSequence::new("borrow-and-repay", owner);
    push_deposit_and_borrow(&mut sequence, network, lending_pool, owner, params)?;
    sequence.push(ActionStep::approve(owner, debt, lending_pool, repay_amount));
    sequence.push(ActionStep::repay(
        owner,
        lending_pool,
        debt,
        repay_amount,
        params.rate_mode,
    ));
    Ok(sequence)
}

fn push_deposit_and_borrow(
    sequence: &mut ActionSequence,
    network: &NetworkConfig,
    lending_pool: Address,
    owner: Address,
    params: &DepositBorrow,
) -> Result<()> {
    require_positive(params.collateral_amount, "collateral amount")?;
    require_positive(params.borrow_amount, "borrow amount")?;
    let collateral = network.token(&params.collateral)?;
    let debt = network.token(&params.debt)?;

    if params.wrap_native {
        let weth = network.token("WETH")?;
        if weth.address != collateral.address {
            return Err(AppError::Configuration(format!(
                "cannot wrap native currency into {}",
                collateral.symbol
            )));
        }
        sequence.push(ActionStep::wrap_native(
            owner,
            weth.address,
            params.collateral_amount,
        ));
    }

    sequence.push(ActionStep::approve(
        owner,
        collateral.address,
        lending_pool,
        params.collateral_amount,
    ));
    sequence.push(ActionStep::deposit(
        owner,
        lending_pool,
        collateral.address,
        params.collateral_amount,
    ));
    sequence.push(ActionStep::borrow(
        owner,
        lending_pool,
        debt.address,
        params.borrow_amount,
        params.rate_mode,
    ));
    debug!(
        network = %network.name,
        collateral = %collateral.symbol,
        debt = %debt.symbol,
        steps = sequence.len(),
        "[FLOW] deposit and borrow"
    );
    Ok(())
}

/// approve → swap → approve token0/token1 → mint.
///
/// The swap is fixed up front; the position is sized from the balances the
/// swap leaves behind, committing at most `sizing.max_amount0` /
/// `max_amount1`. The swap output must be one of the pool's tokens.
pub fn swap_and_add_liquidity(
    network: &NetworkConfig,
    owner: Address,
    swap: SwapPlan,
    sizing: PositionSizing,
) -> Result<ActionSequence> {
    let router = network.swap_router()?;
    let manager = network.position_manager()?;
    if !sizing.pool.contains(swap.token_out) {
        return Err(AppError::Configuration(format!(
            "swap output {} is not a token of pool {}",
            swap.token_out, sizing.pool.address
        )));
    }
    if sizing.max_amount0.is_zero() && sizing.max_amount1.is_zero() {
        return Err(AppError::InvalidRange(
            "position allows no capital on either side".into(),
        ));
    }

    let mut sequence = ActionSequence::new("swap-and-add-liquidity", owner)
        .then(ActionStep::approve(owner, swap.token_in, router, swap.amount_in))
        .then(ActionStep::swap(router, swap));
    for (token, amount) in [
        (sizing.pool.token0, sizing.max_amount0),
        (sizing.pool.token1, sizing.max_amount1),
    ] {
        if !amount.is_zero() {
            sequence.push(ActionStep::approve(owner, token, manager, amount));
        }
    }
    sequence.push(ActionStep::add_sized_liquidity(manager, sizing));
    debug!(
        network = %network.name,
        pool = %sizing.pool.address,
        steps = sequence.len(),
        "[FLOW] swap and add liquidity"
    );
    Ok(sequence)
}
