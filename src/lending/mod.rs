//! Lending pool reads and borrow sizing.

use crate::errors::{AppError, Result};
use alloy_primitives::{Address, U256};
use std::future::Future;
use std::sync::Arc;
use uniswap_v3_math::full_math::mul_div;

pub mod client;

pub use client::AaveLendingView;

/// Share of borrowing capacity held back by default (5%).
pub const DEFAULT_BORROW_SAFETY_BPS: u32 = 500;

const BPS_DENOMINATOR: u32 = 10_000;

/// Snapshot of a user's lending position, all values in wei of ETH except
/// the ratios (`ltv` and `current_liquidation_threshold` in bps, health
/// factor scaled by 1e18).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LendingAccountData {
    pub total_collateral_eth: U256,
    pub total_debt_eth: U256,
    pub available_borrows_eth: U256,
    pub current_liquidation_threshold: U256,
    pub ltv: U256,
    pub health_factor: U256,
}

impl LendingAccountData {
    /// How much of an asset can be borrowed right now, see [`compute_borrow_amount`].
    pub fn borrowable(&self, asset_price_eth: U256, asset_decimals: u8, safety_bps: u32) -> Result<U256> {
        compute_borrow_amount(
            self.available_borrows_eth,
            asset_price_eth,
            asset_decimals,
            safety_bps,
        )
    }
}

pub trait LendingView: Send + Sync {
    fn account_data(&self, owner: Address) -> impl Future<Output = Result<LendingAccountData>> + Send;

    /// Price of one whole unit of the asset in wei, read from `feed`.
    fn asset_price_eth(&self, feed: Address) -> impl Future<Output = Result<U256>> + Send;
}

impl<T: LendingView> LendingView for Arc<T> {
    fn account_data(&self, owner: Address) -> impl Future<Output = Result<LendingAccountData>> + Send {
        (**self).account_data(owner)
    }

    fn asset_price_eth(&self, feed: Address) -> impl Future<Output = Result<U256>> + Send {
        (**self).asset_price_eth(feed)
    }
}

/// Asset base units that fit into `available_borrows_eth` after holding back
/// `safety_bps`.
///
/// `asset_price_eth` is the wei price of one whole asset unit.
pub fn compute_borrow_amount(
    available_borrows_eth: U256,
    asset_price_eth: U256,
    asset_decimals: u8,
    safety_bps: u32,
) -> Result<U256> {
    if asset_price_eth.is_zero() {
        return Err(AppError::InvalidRange("asset price must be positive".into()));
    }
    if safety_bps > BPS_DENOMINATOR {
        return Err(AppError::InvalidRange(format!(
            "safety margin {safety_bps} bps exceeds {BPS_DENOMINATOR}"
        )));
    }
    let usable = mul_div(
        available_borrows_eth,
        U256::from(BPS_DENOMINATOR - safety_bps),
        U256::from(BPS_DENOMINATOR),
    )?;
    let unit = U256::from(10u64).pow(U256::from(asset_decimals));
    Ok(mul_div(usable, unit, asset_price_eth)?)
}
