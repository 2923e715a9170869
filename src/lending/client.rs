use super::{LendingAccountData, LendingView};
use crate::errors::{AppError, Result};
use crate::utils::{from_ethers_address, from_ethers_u256, to_ethers_address};
use alloy_primitives::{Address, U256};
use ethers::{contract::abigen, providers::Middleware};
use std::sync::Arc;
use tracing::{debug, info};

abigen!(
    LendingPoolAddressesProvider,
    r"[
        function getLendingPool() view returns (address)
    ]";

    LendingPool,
    r"[
        function getUserAccountData(address user) view returns (uint256 totalCollateralETH, uint256 totalDebtETH, uint256 availableBorrowsETH, uint256 currentLiquidationThreshold, uint256 ltv, uint256 healthFactor)
    ]";

    AggregatorV3,
    r"[
        function latestRoundData() view returns (uint80 roundId, int256 answer, uint256 startedAt, uint256 updatedAt, uint80 answeredInRound)
    ]";
);

/// Reads account data and price feeds from an Aave v2 style deployment.
pub struct AaveLendingView<M> {
    client: Arc<M>,
    pool: LendingPool<M>,
}

impl<M: Middleware + 'static> AaveLendingView<M> {
    /// Resolve the lending pool through its addresses provider.
    pub async fn connect(client: Arc<M>, addresses_provider: Address) -> Result<Self> {
        let provider =
            LendingPoolAddressesProvider::new(to_ethers_address(addresses_provider), client.clone());
        let pool_addr = provider.get_lending_pool().call().await?;
        info!(pool = %from_ethers_address(pool_addr), "[LENDING] resolved lending pool");
        let pool = LendingPool::new(pool_addr, client.clone());
        Ok(Self { client, pool })
    }

    pub fn lending_pool(&self) -> Address {
        from_ethers_address(self.pool.address())
    }
}

impl<M: Middleware + 'static> LendingView for AaveLendingView<M> {
    async fn account_data(&self, owner: Address) -> Result<LendingAccountData> {
        let (collateral, debt, available, threshold, ltv, health) = self
            .pool
            .get_user_account_data(to_ethers_address(owner))
            .call()
            .await?;
        let data = LendingAccountData {
            total_collateral_eth: from_ethers_u256(collateral),
            total_debt_eth: from_ethers_u256(debt),
            available_borrows_eth: from_ethers_u256(available),
            current_liquidation_threshold: from_ethers_u256(threshold),
            ltv: from_ethers_u256(ltv),
            health_factor: from_ethers_u256(health),
        };
        debug!(
            %owner,
            collateral = %data.total_collateral_eth,
            debt = %data.total_debt_eth,
            available = %data.available_borrows_eth,
            "[LENDING] account data"
        );
        Ok(data)
    }

    async fn asset_price_eth(&self, feed: Address) -> Result<U256> {
        let aggregator = AggregatorV3::new(to_ethers_address(feed), self.client.clone());
        let (_, answer, _, _, _) = aggregator.latest_round_data().call().await?;
        if answer.is_negative() || answer.is_zero() {
            return Err(AppError::PriceOutOfBounds(format!(
                "feed {feed} answered {answer}"
            )));
        }
        Ok(from_ethers_u256(answer.into_raw()))
    }
}
