//! ERC20 balances, allowances and approvals over `ethers`.

use crate::errors::Result;
use crate::interfaces::{TokenLedger, TxHandle};
use crate::utils::{from_ethers_u256, to_ethers_address, to_ethers_u256};
use alloy_primitives::{Address, B256, U256};
use ethers::{contract::abigen, providers::Middleware};
use std::sync::Arc;
use tracing::{debug, info};

abigen!(
    Erc20,
    r"[
        function balanceOf(address owner) view returns (uint256)
        function allowance(address owner, address spender) view returns (uint256)
        function approve(address spender, uint256 amount) returns (bool)
    ]",
);

/// Token ledger backed by live chain state. Approvals are signed by `client`.
#[derive(Clone)]
pub struct Erc20Ledger<M> {
    client: Arc<M>,
}

impl<M: Middleware + 'static> Erc20Ledger<M> {
    pub fn new(client: Arc<M>) -> Self {
        Self { client }
    }

    fn token(&self, token: Address) -> Erc20<M> {
        Erc20::new(to_ethers_address(token), self.client.clone())
    }
}

impl<M: Middleware + 'static> TokenLedger for Erc20Ledger<M> {
    async fn balance_of(&self, owner: Address, token: Address) -> Result<U256> {
        let raw = self
            .token(token)
            .balance_of(to_ethers_address(owner))
            .call()
            .await?;
        Ok(from_ethers_u256(raw))
    }

    async fn allowance(&self, owner: Address, spender: Address, token: Address) -> Result<U256> {
        let raw = self
            .token(token)
            .allowance(to_ethers_address(owner), to_ethers_address(spender))
            .call()
            .await?;
        let allowance = from_ethers_u256(raw);
        debug!(%owner, %spender, %token, %allowance, "[LEDGER] allowance");
        Ok(allowance)
    }

    async fn approve(&self, spender: Address, token: Address, amount: U256) -> Result<TxHandle> {
        let call = self
            .token(token)
            .approve(to_ethers_address(spender), to_ethers_u256(amount));
        let pending = call.send().await?;
        let handle = TxHandle(B256::from(pending.tx_hash().0));
        info!(%token, %spender, %amount, tx = %handle, "[LEDGER] approve sent");
        Ok(handle)
    }
}
