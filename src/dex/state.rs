use crate::errors::{AppError, Result};
use alloy_primitives::{Address, U256};

/// Immutable identity of a pool: address, tokens in canonical order and fee tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub address: Address,
    /// Lower of the two token addresses.
    pub token0: Address,
    /// Higher of the two token addresses.
    pub token1: Address,
    /// Fee tier in hundredths of a bip (3000 = 0.30%).
    pub fee: u32,
}

impl PoolKey {
    /// Build a key, putting the tokens into the pool's canonical order
    /// regardless of the order they were given in.
    pub fn new(address: Address, token_a: Address, token_b: Address, fee: u32) -> Result<Self> {
        if token_a == token_b {
            return Err(AppError::Configuration(format!(
                "pool {address} has identical tokens {token_a}"
            )));
        }
        let (token0, token1) = if token_a < token_b {
            (token_a, token_b)
        } else {
            (token_b, token_a)
        };
        Ok(Self {
            address,
            token0,
            token1,
            fee,
        })
    }

    pub fn contains(&self, token: Address) -> bool {
        token == self.token0 || token == self.token1
    }
}

/// Minimal immutable snapshot of a concentrated-liquidity pool needed for
/// position sizing and swap planning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolState {
    pub key: PoolKey,
    /// Current tick index (`slot0.tick`).
    pub tick_current: i32,
    /// Tick granularity enforced by the fee tier; always positive.
    pub tick_spacing: i32,
    /// Current sqrt(price1/price0) in Q96 (`slot0.sqrtPriceX96`).
    pub sqrt_price_x96: U256,
    /// Current in-range liquidity L (`liquidity()`), raw uint128 value.
    pub liquidity: u128,
}

impl PoolState {
    pub fn new(
        key: PoolKey,
        tick_current: i32,
        tick_spacing: i32,
        sqrt_price_x96: U256,
        liquidity: u128,
    ) -> Result<Self> {
        if tick_spacing <= 0 {
            return Err(AppError::InvalidSpacing(tick_spacing));
        }
        Ok(Self {
            key,
            tick_current,
            tick_spacing,
            sqrt_price_x96,
            liquidity,
        })
    }

    pub fn fee_tier(&self) -> u32 {
        self.key.fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_key_orders_tokens_canonically() {
        let low = Address::repeat_byte(0x01);
        let high = Address::repeat_byte(0x02);
        let key = PoolKey::new(Address::repeat_byte(0xaa), high, low, 3000).unwrap();
        assert_eq!(key.token0, low);
        assert_eq!(key.token1, high);
        assert!(key.contains(high));
        assert!(!key.contains(Address::ZERO));
    }

    #[test]
    fn pool_key_rejects_identical_tokens() {
        let t = Address::repeat_byte(0x01);
        assert!(PoolKey::new(Address::ZERO, t, t, 500).is_err());
    }

    #[test]
    fn pool_state_requires_positive_spacing() {
        let key = PoolKey::new(
            Address::ZERO,
            Address::repeat_byte(1),
            Address::repeat_byte(2),
            3000,
        )
        .unwrap();
        let err = PoolState::new(key, 0, 0, U256::from(1u64) << 96, 0).unwrap_err();
        assert!(matches!(err, AppError::InvalidSpacing(0)));
    }
}
