//! Conversions between price, Q64.96 sqrt price and tick index.
//!
//! Exact tick → sqrt-ratio values come from `uniswap_v3_math`; everything that
//! starts from a floating point price goes through f64 and is accurate to
//! within one tick.

use crate::errors::{AppError, Result};
use alloy_primitives::U256;
use uniswap_v3_math::tick_math::get_sqrt_ratio_at_tick;

pub use uniswap_v3_math::tick_math::{MAX_TICK, MIN_TICK};

/// 2^96 as f64 (exactly representable).
const Q96_F64: f64 = 79_228_162_514_264_337_593_543_950_336.0;

/// Price (token1 per token0, raw units) at `tick`: 1.0001^tick.
pub fn tick_to_price(tick: i32) -> f64 {
    1.0001f64.powf(tick as f64)
}

/// Map a raw price (token1 per token0, base units) to its Q64.96 sqrt price.
///
/// Fails with `PriceOutOfBounds` when the price is not a positive finite
/// number or its tick would fall outside `[MIN_TICK, MAX_TICK]`.
pub fn price_to_sqrt_price_x96(price: f64) -> Result<U256> {
    if !price.is_finite() || price <= 0.0 {
        return Err(AppError::PriceOutOfBounds(format!(
            "price must be positive and finite, got {price}"
        )));
    }
    // half a tick of slack absorbs float error at the extremes
    let exact_tick = price.ln() / 1.0001f64.ln();
    if exact_tick < MIN_TICK as f64 - 0.5 || exact_tick > MAX_TICK as f64 + 0.5 {
        return Err(AppError::PriceOutOfBounds(format!(
            "price {price} maps to tick {exact_tick:.2}, outside [{MIN_TICK}, {MAX_TICK}]"
        )));
    }

    let sqrt_price_x96 = f64_to_u256(price.sqrt() * Q96_F64)?;
    let min = get_sqrt_ratio_at_tick(MIN_TICK)?;
    let max = get_sqrt_ratio_at_tick(MAX_TICK)?;
    Ok(sqrt_price_x96.clamp(min, max))
}

/// Same as [`price_to_sqrt_price_x96`] for a price quoted in whole tokens
/// (e.g. 1800.0 USDC per WETH), adjusting for token decimals.
pub fn human_price_to_sqrt_price_x96(price: f64, decimals0: u8, decimals1: u8) -> Result<U256> {
    let raw = price * 10f64.powi(decimals1 as i32 - decimals0 as i32);
    price_to_sqrt_price_x96(raw)
}

/// Raw price (token1 per token0) encoded by a Q64.96 sqrt price.
pub fn sqrt_price_x96_to_price(sqrt_price_x96: U256) -> f64 {
    let sqrt = q96_to_f64(sqrt_price_x96);
    sqrt * sqrt
}

/// Greatest tick whose sqrt ratio is `<= sqrt_price_x96`, found by binary
/// search over the monotonic tick → sqrt ratio mapping.
///
/// Inputs outside the representable range clamp to `MIN_TICK` / `MAX_TICK`.
pub fn sqrt_price_x96_to_tick(sqrt_price_x96: U256) -> Result<i32> {
    let mut lo = MIN_TICK;
    let mut hi = MAX_TICK;
    if sqrt_price_x96 <= get_sqrt_ratio_at_tick(lo)? {
        return Ok(lo);
    }
    if sqrt_price_x96 >= get_sqrt_ratio_at_tick(hi)? {
        return Ok(hi);
    }
    // ratio(lo) < sqrt < ratio(hi)
    while hi - lo > 1 {
        let mid = lo + (hi - lo) / 2;
        if get_sqrt_ratio_at_tick(mid)? <= sqrt_price_x96 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Ok(lo)
}

/// Smallest and largest multiples of `spacing` inside the protocol bounds.
pub fn usable_tick_bounds(spacing: i32) -> Result<(i32, i32)> {
    if spacing <= 0 {
        return Err(AppError::InvalidSpacing(spacing));
    }
    let max = (MAX_TICK / spacing) * spacing;
    Ok((-max, max))
}

/// Round `tick` to the nearest multiple of `spacing`.
///
/// An exact midpoint rounds toward zero. The result is clamped to the usable
/// bounds for `spacing`, so it is always a valid initializable tick.
pub fn nearest_usable_tick(tick: i32, spacing: i32) -> Result<i32> {
    let (min_usable, max_usable) = usable_tick_bounds(spacing)?;
    let t = tick as i64;
    let s = spacing as i64;
    let lower = t.div_euclid(s) * s;
    let twice_rem = (t - lower) * 2;
    let rounded = if twice_rem < s {
        lower
    } else if twice_rem > s {
        lower + s
    } else if t >= 0 {
        lower
    } else {
        lower + s
    };
    Ok(rounded.clamp(min_usable as i64, max_usable as i64) as i32)
}

// ---------- helper functions ----------

pub(crate) fn q96_to_f64(q96: U256) -> f64 {
    // via the decimal string to keep all 256 bits in range of f64
    let int_val = q96.to_string().parse::<f64>().unwrap_or(0.0);
    int_val / Q96_F64
}

fn f64_to_u256(value: f64) -> Result<U256> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::PriceOutOfBounds(format!("cannot encode {value}")));
    }
    U256::from_str_radix(&format!("{value:.0}"), 10)
        .map_err(|e| AppError::PriceOutOfBounds(format!("cannot encode {value}: {e}")))
}
