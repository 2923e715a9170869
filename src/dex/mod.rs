//! Concentrated-liquidity pool math, planning and state reads.

pub mod calc;
pub mod client;
pub mod position;
pub mod state;
pub mod swap;
pub mod tick_math;

pub use calc::{SwapQuote, quote_exact_input};
pub use client::Dex;
pub use position::{PositionSizer, compute_amount_mins, compute_mint_amounts, compute_tick_range};
pub use state::{PoolKey, PoolState};
pub use swap::{SwapPlanner, SwapRequest, direction_for};
pub use tick_math::{
    nearest_usable_tick, price_to_sqrt_price_x96, sqrt_price_x96_to_price, sqrt_price_x96_to_tick,
    tick_to_price,
};
