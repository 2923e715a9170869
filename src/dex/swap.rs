//! Planning of single-hop exact-input swaps.

use crate::config::OrchestratorSettings;
use crate::dex::calc::quote_exact_input;
use crate::dex::position::compute_amount_mins;
use crate::dex::state::{PoolKey, PoolState};
use crate::errors::{AppError, Result};
use crate::models::{SwapDirection, SwapPlan};
use crate::utils::unix_now;
use alloy_primitives::{Address, U256};
use std::time::Duration;
use tracing::debug;

/// Caller intent for an `exactInputSingle` swap.
///
/// `slippage_bps` is required; there is no zero-slippage default.
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub direction: SwapDirection,
    pub amount_in: U256,
    /// Expected output from an external quote; the single-tick estimate is
    /// used when absent.
    pub expected_out: Option<U256>,
    pub slippage_bps: u32,
    pub recipient: Address,
    pub sqrt_price_limit_x96: Option<U256>,
}

/// Direction that sells `token_in` into `pool`.
pub fn direction_for(pool: &PoolKey, token_in: Address) -> Result<SwapDirection> {
    if token_in == pool.token0 {
        Ok(SwapDirection::Token0ToToken1)
    } else if token_in == pool.token1 {
        Ok(SwapDirection::Token1ToToken0)
    } else {
        Err(AppError::Configuration(format!(
            "token {token_in} is not traded by pool {}",
            pool.address
        )))
    }
}

#[derive(Debug, Clone)]
pub struct SwapPlanner {
    ttl: Duration,
}

impl Default for SwapPlanner {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

impl From<&OrchestratorSettings> for SwapPlanner {
    fn from(settings: &OrchestratorSettings) -> Self {
        Self::new(settings.deadline_ttl)
    }
}

impl SwapPlanner {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }

    pub fn plan_exact_input_single(
        &self,
        pool: &PoolState,
        request: &SwapRequest,
    ) -> Result<SwapPlan> {
        self.plan_exact_input_single_at(pool, request, unix_now())
    }

    /// Like [`Self::plan_exact_input_single`] with an explicit clock.
    pub fn plan_exact_input_single_at(
        &self,
        pool: &PoolState,
        request: &SwapRequest,
        now: u64,
    ) -> Result<SwapPlan> {
        if request.amount_in.is_zero() {
            return Err(AppError::InvalidRange("swap amount_in must be positive".into()));
        }

        // token order always follows the pool, not the caller
        let (token_in, token_out) = match request.direction {
            SwapDirection::Token0ToToken1 => (pool.key.token0, pool.key.token1),
            SwapDirection::Token1ToToken0 => (pool.key.token1, pool.key.token0),
        };

        let sqrt_price_limit_x96 = match request.sqrt_price_limit_x96 {
            Some(limit) => {
                check_price_limit(pool, request.direction, limit)?;
                limit
            }
            None => U256::ZERO,
        };

        let expected_out = match request.expected_out {
            Some(out) => out,
            None => quote_exact_input(pool, request.direction, request.amount_in)?.amount_out,
        };
        let amount_out_minimum = compute_amount_mins(expected_out, request.slippage_bps)?;

        debug!(
            %token_in,
            %token_out,
            amount_in = %request.amount_in,
            %expected_out,
            %amount_out_minimum,
            "[DEX] planned exactInputSingle"
        );

        Ok(SwapPlan {
            token_in,
            token_out,
            fee: pool.fee_tier(),
            amount_in: request.amount_in,
            amount_out_minimum,
            sqrt_price_limit_x96,
            recipient: request.recipient,
            deadline: now + self.ttl.as_secs(),
        })
    }
}

fn check_price_limit(pool: &PoolState, direction: SwapDirection, limit: U256) -> Result<()> {
    let on_correct_side = match direction {
        SwapDirection::Token0ToToken1 => limit < pool.sqrt_price_x96,
        SwapDirection::Token1ToToken0 => limit > pool.sqrt_price_x96,
    };
    if on_correct_side {
        Ok(())
    } else {
        Err(AppError::InvalidRange(format!(
            "sqrt price limit {limit} is on the wrong side of {} for {direction:?}",
            pool.sqrt_price_x96
        )))
    }
}
