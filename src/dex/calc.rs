use crate::dex::state::PoolState;
use crate::errors::Result;
use crate::models::SwapDirection;
use alloy_primitives::U256;
use uniswap_v3_math::full_math::mul_div;

const FEE_DENOMINATOR: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapQuote {
    pub amount_in: U256,
    pub amount_out: U256,
    pub sqrt_price_after_x96: U256,
}

/// Estimate the output of an exact-input swap using V3 math (single tick only).
///
/// The whole input is assumed to trade against the current in-range
/// liquidity, so the estimate is accurate while the swap stays inside the
/// current tick and optimistic once it would cross one. Callers turn it into a
/// minimum via slippage tolerance, never use it as-is.
pub fn quote_exact_input(
    pool: &PoolState,
    direction: SwapDirection,
    amount_in: U256,
) -> Result<SwapQuote> {
    let sqrt_price = pool.sqrt_price_x96;
    if pool.liquidity == 0 || amount_in.is_zero() || sqrt_price.is_zero() {
        return Ok(SwapQuote {
            amount_in,
            amount_out: U256::ZERO,
            sqrt_price_after_x96: sqrt_price,
        });
    }

    let q96 = U256::from(1u64) << 96;
    let liquidity = U256::from(pool.liquidity);
    let fee_kept = U256::from(FEE_DENOMINATOR - pool.fee_tier() as u64);
    let amount_less_fee = mul_div(amount_in, fee_kept, U256::from(FEE_DENOMINATOR))?;

    let (amount_out, sqrt_price_after_x96) = match direction {
        // token0 in, price DOWN: √P' = L·√P / (L + Δx·√P)
        SwapDirection::Token0ToToken1 => {
            let denominator = liquidity + mul_div(amount_less_fee, sqrt_price, q96)?;
            let sqrt_next = mul_div(liquidity, sqrt_price, denominator)?;
            let amount1_out = mul_div(liquidity, sqrt_price - sqrt_next, q96)?;
            (amount1_out, sqrt_next)
        }
        // token1 in, price UP: √P' = √P + Δy / L
        SwapDirection::Token1ToToken0 => {
            let sqrt_next = sqrt_price + mul_div(amount_less_fee, q96, liquidity)?;
            let scaled = mul_div(liquidity, sqrt_next - sqrt_price, sqrt_next)?;
            let amount0_out = mul_div(scaled, q96, sqrt_price)?;
            (amount0_out, sqrt_next)
        }
    };

    Ok(SwapQuote {
        amount_in,
        amount_out,
        sqrt_price_after_x96,
    })
}
