//! Shared data structures used throughout the crate.
//!
//! All amounts are integer base units of the respective token.

use crate::dex::state::PoolKey;
use crate::dex::tick_math::{
    nearest_usable_tick, price_to_sqrt_price_x96, sqrt_price_x96_to_tick, usable_tick_bounds,
};
use crate::errors::{AppError, Result};
use alloy_primitives::{Address, U256};

/// Direction of a swap relative to the pool's canonical token order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapDirection {
    /// token0 in → token1 out → price DOWN → √P decreases
    Token0ToToken1,
    /// token1 in → token0 out → price UP → √P increases
    Token1ToToken0,
}

impl SwapDirection {
    pub fn zero_for_one(self) -> bool {
        matches!(self, SwapDirection::Token0ToToken1)
    }
}

/// Validated tick window of a liquidity position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickRange {
    pub tick_lower: i32,
    pub tick_upper: i32,
}

impl TickRange {
    /// Both bounds must be multiples of `spacing`, ordered, and inside the
    /// protocol tick bounds.
    pub fn new(tick_lower: i32, tick_upper: i32, spacing: i32) -> Result<Self> {
        let (min_usable, max_usable) = usable_tick_bounds(spacing)?;
        if tick_lower >= tick_upper {
            return Err(AppError::InvalidRange(format!(
                "tick_lower {tick_lower} must be below tick_upper {tick_upper}"
            )));
        }
        if tick_lower % spacing != 0 || tick_upper % spacing != 0 {
            return Err(AppError::InvalidRange(format!(
                "ticks [{tick_lower}, {tick_upper}] are not multiples of spacing {spacing}"
            )));
        }
        if tick_lower < min_usable || tick_upper > max_usable {
            return Err(AppError::InvalidRange(format!(
                "ticks [{tick_lower}, {tick_upper}] exceed [{min_usable}, {max_usable}]"
            )));
        }
        Ok(Self {
            tick_lower,
            tick_upper,
        })
    }
}

/// Price window (token1 per token0, raw units) for a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceBound {
    pub lower_price: f64,
    pub upper_price: f64,
}

impl PriceBound {
    /// Bounds given in reverse order are swapped.
    pub fn new(a: f64, b: f64) -> Result<Self> {
        if a == b {
            return Err(AppError::InvalidRange(format!("empty price window at {a}")));
        }
        let (lower_price, upper_price) = if a < b { (a, b) } else { (b, a) };
        Ok(Self {
            lower_price,
            upper_price,
        })
    }

    /// Snap both prices to usable ticks for `spacing`.
    pub fn to_tick_range(&self, spacing: i32) -> Result<TickRange> {
        let lower = sqrt_price_x96_to_tick(price_to_sqrt_price_x96(self.lower_price)?)?;
        let upper = sqrt_price_x96_to_tick(price_to_sqrt_price_x96(self.upper_price)?)?;
        TickRange::new(
            nearest_usable_tick(lower, spacing)?,
            nearest_usable_tick(upper, spacing)?,
            spacing,
        )
    }
}

/// Token amounts for minting a position at a given price.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MintAmounts {
    pub amount0: U256,
    pub amount1: U256,
}

/// Everything needed to mint one liquidity position.
///
/// Built once per liquidity-add request and consumed by a single
/// `Action::AddLiquidity` step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionPlan {
    pub token0: Address,
    pub token1: Address,
    pub fee: u32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub amount0_desired: U256,
    pub amount1_desired: U256,
    pub amount0_min: U256,
    pub amount1_min: U256,
    pub recipient: Address,
    /// Unix timestamp in seconds.
    pub deadline: u64,
}

/// A position whose amounts are sized from the sender's balances and the
/// pool's state at execution time, after the steps before it are final.
///
/// At most `max_amount0` / `max_amount1` of each token is committed; these
/// are also the amounts approved to the position manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionSizing {
    pub pool: PoolKey,
    pub range: TickRange,
    pub slippage_bps: u32,
    pub recipient: Address,
    pub max_amount0: U256,
    pub max_amount1: U256,
}

/// Parameters of a single-hop exact-input swap (`exactInputSingle`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapPlan {
    pub token_in: Address,
    pub token_out: Address,
    pub fee: u32,
    pub amount_in: U256,
    pub amount_out_minimum: U256,
    /// Zero means no limit.
    pub sqrt_price_limit_x96: U256,
    pub recipient: Address,
    /// Unix timestamp in seconds.
    pub deadline: u64,
}
