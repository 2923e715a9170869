//! Sizing of concentrated-liquidity positions.

use crate::config::OrchestratorSettings;
use crate::dex::state::PoolState;
use crate::dex::tick_math::{nearest_usable_tick, usable_tick_bounds};
use crate::errors::{AppError, Result};
use crate::models::{MintAmounts, PositionPlan, TickRange};
use crate::utils::unix_now;
use alloy_primitives::{Address, U256};
use std::time::Duration;
use uniswap_v3_math::full_math::mul_div;
use uniswap_v3_math::tick_math::{MAX_TICK, MIN_TICK, get_sqrt_ratio_at_tick};

const BPS_DENOMINATOR: u64 = 10_000;

fn q96() -> U256 {
    U256::from(1u64) << 96
}

/// Symmetric window of `width_in_spacings` spacings on each side of the
/// current tick, with both bounds snapped to usable ticks.
pub fn compute_tick_range(
    current_tick: i32,
    spacing: i32,
    width_in_spacings: i32,
) -> Result<TickRange> {
    if width_in_spacings <= 0 {
        return Err(AppError::InvalidRange(format!(
            "width must be at least one spacing, got {width_in_spacings}"
        )));
    }
    let center = nearest_usable_tick(current_tick, spacing)? as i64;
    let offset = spacing as i64 * width_in_spacings as i64;
    let clamp = |t: i64| t.clamp(MIN_TICK as i64, MAX_TICK as i64) as i32;
    let lower = nearest_usable_tick(clamp(center - offset), spacing)?;
    let upper = nearest_usable_tick(clamp(center + offset), spacing)?;
    TickRange::new(lower, upper, spacing)
}

/// `desired × (1 − slippage_bps / 10000)`, truncated toward zero.
pub fn compute_amount_mins(desired: U256, slippage_bps: u32) -> Result<U256> {
    if slippage_bps as u64 > BPS_DENOMINATOR {
        return Err(AppError::InvalidRange(format!(
            "slippage {slippage_bps} bps outside [0, {BPS_DENOMINATOR}]"
        )));
    }
    let keep = U256::from(BPS_DENOMINATOR - slippage_bps as u64);
    Ok(mul_div(desired, keep, U256::from(BPS_DENOMINATOR))?)
}

/// Split the available capital the way a position over `range` absorbs it at
/// the pool's current price.
///
/// In range, the binding token limits the liquidity and the other amount is
/// scaled down to match. Below the range the position is all token0, above it
/// all token1; the other amount is then exactly zero. Amounts never exceed
/// what is available.
pub fn compute_mint_amounts(
    range: &TickRange,
    pool: &PoolState,
    amount0_available: U256,
    amount1_available: U256,
) -> Result<MintAmounts> {
    let sqrt_price = pool.sqrt_price_x96;
    let sqrt_lower = get_sqrt_ratio_at_tick(range.tick_lower)?;
    let sqrt_upper = get_sqrt_ratio_at_tick(range.tick_upper)?;

    if sqrt_price <= sqrt_lower {
        return Ok(MintAmounts {
            amount0: amount0_available,
            amount1: U256::ZERO,
        });
    }
    if sqrt_price >= sqrt_upper {
        return Ok(MintAmounts {
            amount0: U256::ZERO,
            amount1: amount1_available,
        });
    }

    let liquidity0 = liquidity_for_amount0(sqrt_price, sqrt_upper, amount0_available)?;
    let liquidity1 = liquidity_for_amount1(sqrt_lower, sqrt_price, amount1_available)?;
    let liquidity = liquidity0.min(liquidity1);

    Ok(MintAmounts {
        amount0: amount0_for_liquidity(sqrt_price, sqrt_upper, liquidity)?,
        amount1: amount1_for_liquidity(sqrt_lower, sqrt_price, liquidity)?,
    })
}

// L = amount0 · (√a·√b / Q96) / (√b − √a)
fn liquidity_for_amount0(sqrt_a: U256, sqrt_b: U256, amount0: U256) -> Result<U256> {
    let intermediate = mul_div(sqrt_a, sqrt_b, q96())?;
    Ok(mul_div(amount0, intermediate, sqrt_b - sqrt_a)?)
}

// L = amount1 · Q96 / (√b − √a)
fn liquidity_for_amount1(sqrt_a: U256, sqrt_b: U256, amount1: U256) -> Result<U256> {
    Ok(mul_div(amount1, q96(), sqrt_b - sqrt_a)?)
}

// amount0 = L · (√b − √a) / √b · Q96 / √a
fn amount0_for_liquidity(sqrt_a: U256, sqrt_b: U256, liquidity: U256) -> Result<U256> {
    let scaled = mul_div(liquidity, sqrt_b - sqrt_a, sqrt_b)?;
    Ok(mul_div(scaled, q96(), sqrt_a)?)
}

// amount1 = L · (√b − √a) / Q96
fn amount1_for_liquidity(sqrt_a: U256, sqrt_b: U256, liquidity: U256) -> Result<U256> {
    Ok(mul_div(liquidity, sqrt_b - sqrt_a, q96())?)
}

/// Builds immutable [`PositionPlan`]s from a pool snapshot.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    ttl: Duration,
}

impl Default for PositionSizer {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

impl From<&OrchestratorSettings> for PositionSizer {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self::new(settings.deadline_ttl)
    }
}

impl PositionSizer {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn build_plan(
        &self,
        pool: &PoolState,
        range: TickRange,
        amount0_available: U256,
        amount1_available: U256,
        slippage_bps: u32,
        recipient: Address,
    ) -> Result<PositionPlan> {
        self.build_plan_at(
            pool,
            range,
            amount0_available,
            amount1_available,
            slippage_bps,
            recipient,
            unix_now(),
        )
    }

    /// Like [`Self::build_plan`] with an explicit clock.
    #[allow(clippy::too_many_arguments)]
    pub fn build_plan_at(
        &self,
        pool: &PoolState,
        range: TickRange,
        amount0_available: U256,
        amount1_available: U256,
        slippage_bps: u32,
        recipient: Address,
        now: u64,
    ) -> Result<PositionPlan> {
        usable_tick_bounds(pool.tick_spacing)?;
        if range.tick_lower % pool.tick_spacing != 0 || range.tick_upper % pool.tick_spacing != 0
        {
            return Err(AppError::InvalidRange(format!(
                "range [{}, {}] does not match pool spacing {}",
                range.tick_lower, range.tick_upper, pool.tick_spacing
            )));
        }
        let amounts = compute_mint_amounts(&range, pool, amount0_available, amount1_available)?;
        if amounts.amount0.is_zero() && amounts.amount1.is_zero() {
            return Err(AppError::InvalidRange(
                "position would receive no capital".into(),
            ));
        }

        Ok(PositionPlan {
            token0: pool.key.token0,
            token1: pool.key.token1,
            fee: pool.fee_tier(),
            tick_lower: range.tick_lower,
            tick_upper: range.tick_upper,
            amount0_desired: amounts.amount0,
            amount1_desired: amounts.amount1,
            amount0_min: compute_amount_mins(amounts.amount0, slippage_bps)?,
            amount1_min: compute_amount_mins(amounts.amount1, slippage_bps)?,
            recipient,
            deadline: now + self.ttl.as_secs(),
        })
    }
}
