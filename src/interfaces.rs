//! Seams to the outside world: pool reads, token ledger, transaction submission.
//!
//! The core only talks to these traits; `ethers`-backed implementations live
//! in `dex::client`, `ledger`, `submitter` and `lending`.

use crate::dex::state::PoolState;
use crate::errors::Result;
use crate::orchestrator::ActionStep;
use alloy_primitives::{Address, B256, U256};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Reference to a submitted transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxHandle(pub B256);

impl fmt::Display for TxHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of a transaction that reached the requested confirmation depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    /// `false` when the transaction was mined but reverted.
    pub success: bool,
}

pub trait PoolStateReader: Send + Sync {
    fn read(&self, pool: Address) -> impl Future<Output = Result<PoolState>> + Send;
}

pub trait TokenLedger: Send + Sync {
    fn balance_of(&self, owner: Address, token: Address)
    -> impl Future<Output = Result<U256>> + Send;

    fn allowance(
        &self,
        owner: Address,
        spender: Address,
        token: Address,
    ) -> impl Future<Output = Result<U256>> + Send;

    /// Submit an ERC20 approval from the ledger's signer.
    fn approve(
        &self,
        spender: Address,
        token: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHandle>> + Send;
}

pub trait TransactionSubmitter: Send + Sync {
    /// Encode and broadcast the action behind `step`.
    fn submit(&self, step: &ActionStep) -> impl Future<Output = Result<TxHandle>> + Send;

    /// Wait until `handle` has `confirmations` confirmations.
    fn await_finality(
        &self,
        handle: &TxHandle,
        confirmations: usize,
    ) -> impl Future<Output = Result<Receipt>> + Send;
}

impl<T: PoolStateReader> PoolStateReader for Arc<T> {
    fn read(&self, pool: Address) -> impl Future<Output = Result<PoolState>> + Send {
        (**self).read(pool)
    }
}

impl<T: TokenLedger> TokenLedger for Arc<T> {
    fn balance_of(
        &self,
        owner: Address,
        token: Address,
    ) -> impl Future<Output = Result<U256>> + Send {
        (**self).balance_of(owner, token)
    }

    fn allowance(
        &self,
        owner: Address,
        spender: Address,
        token: Address,
    ) -> impl Future<Output = Result<U256>> + Send {
        (**self).allowance(owner, spender, token)
    }

    fn approve(
        &self,
        spender: Address,
        token: Address,
        amount: U256,
    ) -> impl Future<Output = Result<TxHandle>> + Send {
        (**self).approve(spender, token, amount)
    }
}

impl<T: TransactionSubmitter> TransactionSubmitter for Arc<T> {
    fn submit(&self, step: &ActionStep) -> impl Future<Output = Result<TxHandle>> + Send {
        (**self).submit(step)
    }

    fn await_finality(
        &self,
        handle: &TxHandle,
        confirmations: usize,
    ) -> impl Future<Output = Result<Receipt>> + Send {
        (**self).await_finality(handle, confirmations)
    }
}
