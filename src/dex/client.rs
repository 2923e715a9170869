use crate::dex::state::{PoolKey, PoolState};
use crate::errors::{AppError, Result};
use crate::interfaces::PoolStateReader;
use crate::utils::{from_ethers_address, from_ethers_u256, to_ethers_address};
use alloy_primitives::Address;
use ethers::{
    contract::abigen,
    providers::{Http, Middleware, Provider},
};
use std::sync::Arc;
use tracing::debug;

abigen!(
    UniswapV3Pool,
    r"[
        function slot0() view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
        function liquidity() view returns (uint128)
        function fee() view returns (uint24)
        function tickSpacing() view returns (int24)
        function token0() view returns (address)
        function token1() view returns (address)
    ]",
);

/// Reads Uniswap V3 pool snapshots over JSON-RPC.
#[derive(Clone)]
pub struct Dex<M> {
    client: Arc<M>,
}

impl Dex<Provider<Http>> {
    pub fn connect(rpc_url: &str) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .map_err(|e| AppError::Configuration(format!("invalid rpc url {rpc_url}: {e}")))?;
        Ok(Self::new(Arc::new(provider)))
    }
}

impl<M: Middleware + 'static> Dex<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }

    /// Build a `PoolState` snapshot for sizing and planning (single tick only).
    pub async fn get_pool_state(&self, pool_addr: Address) -> Result<PoolState> {
        let pool = UniswapV3Pool::new(to_ethers_address(pool_addr), self.client.clone());
        let (sqrt_price_x96, tick, _, _, _, _fee_protocol, _unlocked) =
            pool.slot_0().call().await?;
        let liquidity = pool.liquidity().call().await?;
        let fee = pool.fee().call().await?;
        let tick_spacing = pool.tick_spacing().call().await?;
        let token0 = pool.token_0().call().await?;
        let token1 = pool.token_1().call().await?;

        let key = PoolKey::new(
            pool_addr,
            from_ethers_address(token0),
            from_ethers_address(token1),
            fee,
        )?;
        let state = PoolState::new(
            key,
            tick,
            tick_spacing,
            from_ethers_u256(sqrt_price_x96),
            liquidity,
        )?;
        debug!(
            pool = %pool_addr,
            tick,
            tick_spacing,
            liquidity,
            "[DEX] pool state"
        );
        Ok(state)
    }
}

impl<M: Middleware + 'static> PoolStateReader for Dex<M> {
    async fn read(&self, pool: Address) -> Result<PoolState> {
        self.get_pool_state(pool).await
    }
}
