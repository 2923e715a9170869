//! Executes `ActionSequence`s step by step against the ledger and chain.

use super::retry::RetryPolicy;
use super::sequence::{ActionSequence, SequenceReport};
use super::step::{Action, ActionStep, Amount, PostCondition};
use crate::config::OrchestratorSettings;
use crate::dex::position::PositionSizer;
use crate::dex::state::PoolState;
use crate::errors::{AppError, Result};
use crate::interfaces::{PoolStateReader, Receipt, TokenLedger, TransactionSubmitter, TxHandle};
use crate::lending::{LendingAccountData, LendingView};
use crate::models::PositionSizing;
use alloy_primitives::{Address, U256};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

enum StepOutcome {
    Skipped,
    Confirmed(Receipt),
}

/// Stand-in for a lending view or pool reader the orchestrator was built
/// without. Resolving a deferred amount that needs it is a configuration error.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

impl LendingView for Unconfigured {
    async fn account_data(&self, _owner: Address) -> Result<LendingAccountData> {
        Err(AppError::Configuration(
            "borrow capacity needs a lending view, see ActionOrchestrator::with_lending".into(),
        ))
    }

    async fn asset_price_eth(&self, _feed: Address) -> Result<U256> {
        Err(AppError::Configuration(
            "asset price needs a lending view, see ActionOrchestrator::with_lending".into(),
        ))
    }
}

impl PoolStateReader for Unconfigured {
    async fn read(&self, pool: Address) -> Result<PoolState> {
        Err(AppError::Configuration(format!(
            "sizing a position in {pool} needs a pool reader, see ActionOrchestrator::with_pools"
        )))
    }
}

/// Runs action sequences: resolve → approve → execute → confirm → verify,
/// one step at a time, halting at the first fatal failure.
///
/// Every sequence must be owned by `signer`, the wallet behind both the
/// ledger's approvals and the submitter.
pub struct ActionOrchestrator<L, S, V = Unconfigured, R = Unconfigured> {
    signer: Address,
    ledger: L,
    submitter: S,
    lending: V,
    pools: R,
    sizer: PositionSizer,
    confirmations: usize,
    confirmation_timeout: Duration,
    retry: RetryPolicy,
    cancel: Option<watch::Receiver<bool>>,
}

impl<L: TokenLedger, S: TransactionSubmitter> ActionOrchestrator<L, S> {
    pub fn new(signer: Address, ledger: L, submitter: S, settings: &OrchestratorSettings) -> Self {
        Self {
            signer,
            ledger,
            submitter,
            lending: Unconfigured,
            pools: Unconfigured,
            sizer: PositionSizer::from(settings),
            confirmations: settings.confirmations,
            confirmation_timeout: settings.confirmation_timeout,
            retry: RetryPolicy::from(settings),
            cancel: None,
        }
    }
}

impl<L, S, V, R> ActionOrchestrator<L, S, V, R> {
    /// Lending reads used to size `Amount::BorrowCapacity` borrows.
    pub fn with_lending<V2: LendingView>(self, lending: V2) -> ActionOrchestrator<L, S, V2, R> {
        ActionOrchestrator {
            signer: self.signer,
            ledger: self.ledger,
            submitter: self.submitter,
            lending,
            pools: self.pools,
            sizer: self.sizer,
            confirmations: self.confirmations,
            confirmation_timeout: self.confirmation_timeout,
            retry: self.retry,
            cancel: self.cancel,
        }
    }

    /// Pool reads used to size positions added from balances.
    pub fn with_pools<R2: PoolStateReader>(self, pools: R2) -> ActionOrchestrator<L, S, V, R2> {
        ActionOrchestrator {
            signer: self.signer,
            ledger: self.ledger,
            submitter: self.submitter,
            lending: self.lending,
            pools,
            sizer: self.sizer,
            confirmations: self.confirmations,
            confirmation_timeout: self.confirmation_timeout,
            retry: self.retry,
            cancel: self.cancel,
        }
    }

    /// Stop before the next submission once `true` is sent on the channel.
    /// Steps already submitted run to their outcome.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn signer(&self) -> Address {
        self.signer
    }
}

impl<L, S, V, R> ActionOrchestrator<L, S, V, R>
where
    L: TokenLedger,
    S: TransactionSubmitter,
    V: LendingView,
    R: PoolStateReader,
{
    /// Run independent sequences concurrently; each keeps its own state.
    ///
    /// All of them send from the same signer, so transactions can be in
    /// flight together. The submitter's middleware must hand out nonces
    /// locally, e.g. ethers' `NonceManagerMiddleware`, or concurrent sends
    /// collide on the node's pending nonce.
    pub async fn execute_all(&self, sequences: Vec<ActionSequence>) -> Vec<SequenceReport> {
        futures::future::join_all(sequences.into_iter().map(|seq| self.execute(seq))).await
    }

    pub async fn execute(&self, mut sequence: ActionSequence) -> SequenceReport {
        let label = sequence.label().to_string();
        let owner = sequence.owner();
        info!(%label, steps = sequence.len(), %owner, "[ORCH] executing sequence");

        if sequence.is_empty() {
            return sequence.complete();
        }
        if owner != self.signer {
            let cause = AppError::Configuration(format!(
                "sequence owner {owner} is not the signing wallet {}",
                self.signer
            ));
            return halt(sequence, 0, cause);
        }
        if let Err((index, cause)) = self.preflight(owner, sequence.steps()).await {
            return halt(sequence, index, cause);
        }

        for index in 0..sequence.len() {
            sequence.begin(index);
            let mut step = sequence.steps()[index].clone();
            if step.is_deferred() {
                step = match self.resolve(owner, &step).await {
                    Ok(resolved) => resolved,
                    Err(cause) => return halt(sequence, index, cause),
                };
                debug!(%label, index, action = ?step.action, "[ORCH] resolved deferred amounts");
                sequence.replace_step(index, step.clone());
            }
            match self.execute_step(owner, &step, index).await {
                Ok(StepOutcome::Skipped) => sequence.skip(index),
                Ok(StepOutcome::Confirmed(receipt)) => {
                    info!(
                        %label,
                        index,
                        kind = step.kind(),
                        tx = %receipt.tx_hash,
                        block = receipt.block_number,
                        "[ORCH] step confirmed"
                    );
                    sequence.confirm(index, receipt);
                }
                Err(cause) => return halt(sequence, index, cause),
            }
        }

        info!(%label, "[ORCH] sequence completed");
        sequence.complete()
    }

    async fn execute_step(
        &self,
        owner: Address,
        step: &ActionStep,
        index: usize,
    ) -> Result<StepOutcome> {
        if let Action::Approve {
            token,
            spender,
            amount: Amount::Fixed(amount),
        } = step.action
        {
            let current = self.allowance(owner, spender, token).await?;
            if current >= amount {
                info!(index, %token, %spender, %current, "[ORCH] allowance already sufficient, skipping approve");
                return Ok(StepOutcome::Skipped);
            }
        }

        self.check_requirements(owner, step).await?;
        let before = self.snapshot(&step.post_conditions).await?;

        let handle = self.submit(step).await?;
        debug!(index, kind = step.kind(), tx = %handle, "[ORCH] submitted, awaiting finality");

        let receipt = self.await_finality(&handle).await?;
        if !receipt.success {
            return Err(AppError::TransactionReverted(format!(
                "{} {} reverted in block {}",
                step.kind(),
                receipt.tx_hash,
                receipt.block_number
            )));
        }

        self.verify(&step.post_conditions, &before).await?;
        Ok(StepOutcome::Confirmed(receipt))
    }

    // ---------- validation ----------

    /// Whole-sequence check against current balances and allowances, before
    /// anything is sent.
    ///
    /// Spending of a token is summed across steps. Tokens an earlier step
    /// produces (wrap, borrow, swap output) and allowances an earlier approve
    /// grants are left to the per-step check at execution time.
    async fn preflight(
        &self,
        owner: Address,
        steps: &[ActionStep],
    ) -> std::result::Result<(), (usize, AppError)> {
        let mut produced: HashSet<Address> = HashSet::new();
        let mut approved: HashSet<(Address, Address)> = HashSet::new();
        let mut spent: HashMap<Address, U256> = HashMap::new();

        for (index, step) in steps.iter().enumerate() {
            for req in step.requirements() {
                if !produced.contains(&req.token) {
                    let total = spent.entry(req.token).or_default();
                    *total = total.saturating_add(req.amount);
                    let available = self
                        .balance(owner, req.token)
                        .await
                        .map_err(|e| (index, e))?;
                    if available < *total {
                        return Err((
                            index,
                            AppError::InsufficientBalance {
                                token: req.token,
                                required: *total,
                                available,
                            },
                        ));
                    }
                }
                if !approved.contains(&(req.token, req.spender)) {
                    let current = self
                        .allowance(owner, req.spender, req.token)
                        .await
                        .map_err(|e| (index, e))?;
                    if current < req.amount {
                        return Err((
                            index,
                            AppError::AllowanceInsufficient {
                                token: req.token,
                                spender: req.spender,
                                required: req.amount,
                                current,
                            },
                        ));
                    }
                }
            }
            if let Action::Approve { token, spender, .. } = step.action {
                approved.insert((token, spender));
            }
            if let Some(token) = step.produces() {
                produced.insert(token);
            }
        }
        Ok(())
    }

    /// Fresh balance and allowance checks right before sending a spending step.
    async fn check_requirements(&self, owner: Address, step: &ActionStep) -> Result<()> {
        for req in step.requirements() {
            let available = self.balance(owner, req.token).await?;
            if available < req.amount {
                return Err(AppError::InsufficientBalance {
                    token: req.token,
                    required: req.amount,
                    available,
                });
            }
            let current = self.allowance(owner, req.spender, req.token).await?;
            if current < req.amount {
                return Err(AppError::AllowanceInsufficient {
                    token: req.token,
                    spender: req.spender,
                    required: req.amount,
                    current,
                });
            }
        }
        Ok(())
    }

    /// Balances the post-conditions are measured against.
    async fn snapshot(&self, conditions: &[PostCondition]) -> Result<Vec<Option<U256>>> {
        let mut before = Vec::with_capacity(conditions.len());
        for condition in conditions {
            before.push(match condition {
                PostCondition::BalanceIncreased { holder, token, .. }
                | PostCondition::BalanceDecreased { holder, token, .. } => {
                    Some(self.balance(*holder, *token).await?)
                }
                PostCondition::AllowanceAtLeast { .. } => None,
            });
        }
        Ok(before)
    }

    async fn verify(&self, conditions: &[PostCondition], before: &[Option<U256>]) -> Result<()> {
        for (condition, before) in conditions.iter().zip(before) {
            match (condition, before) {
                (
                    PostCondition::AllowanceAtLeast {
                        owner,
                        spender,
                        token,
                        amount,
                    },
                    _,
                ) => {
                    let current = self.allowance(*owner, *spender, *token).await?;
                    if current < *amount {
                        return Err(AppError::AllowanceInsufficient {
                            token: *token,
                            spender: *spender,
                            required: *amount,
                            current,
                        });
                    }
                }
                (
                    PostCondition::BalanceIncreased {
                        holder,
                        token,
                        at_least,
                    },
                    Some(before),
                ) => {
                    let after = self.balance(*holder, *token).await?;
                    let gained = after.saturating_sub(*before);
                    if gained < *at_least {
                        return Err(AppError::PostConditionFailed(format!(
                            "{holder} gained {gained} of {token}, expected at least {at_least}"
                        )));
                    }
                }
                (
                    PostCondition::BalanceDecreased {
                        holder,
                        token,
                        at_most,
                    },
                    Some(before),
                ) => {
                    let after = self.balance(*holder, *token).await?;
                    let spent = before.saturating_sub(after);
                    if spent > *at_most {
                        return Err(AppError::PostConditionFailed(format!(
                            "{holder} spent {spent} of {token}, expected at most {at_most}"
                        )));
                    }
                }
                (condition, None) => {
                    warn!(?condition, "[ORCH] no baseline for post-condition, skipping");
                }
            }
        }
        Ok(())
    }

    // ---------- deferred amounts ----------

    /// Rebuild a deferred step with amounts read from the chain now that every
    /// step before it is final.
    async fn resolve(&self, owner: Address, step: &ActionStep) -> Result<ActionStep> {
        match &step.action {
            Action::Approve {
                token,
                spender,
                amount,
            } => {
                let amount = self.resolve_amount(owner, *token, *amount).await?;
                Ok(ActionStep::approve(owner, *token, *spender, amount))
            }
            Action::Deposit {
                lending_pool,
                asset,
                amount,
                ..
            } => {
                let amount = self.resolve_nonzero(owner, *asset, *amount, "deposit").await?;
                Ok(ActionStep::deposit(owner, *lending_pool, *asset, amount))
            }
            Action::Borrow {
                lending_pool,
                asset,
                amount,
                rate_mode,
                ..
            } => {
                let amount = self.resolve_nonzero(owner, *asset, *amount, "borrow").await?;
                Ok(ActionStep::borrow(owner, *lending_pool, *asset, amount, *rate_mode))
            }
            Action::Repay {
                lending_pool,
                asset,
                amount,
                rate_mode,
                ..
            } => {
                let amount = self.resolve_nonzero(owner, *asset, *amount, "repay").await?;
                Ok(ActionStep::repay(owner, *lending_pool, *asset, amount, *rate_mode))
            }
            Action::AddSizedLiquidity {
                position_manager,
                sizing,
            } => self.size_position(owner, *position_manager, sizing).await,
            Action::WrapNative { .. } | Action::Swap { .. } | Action::AddLiquidity { .. } => {
                Ok(step.clone())
            }
        }
    }

    async fn resolve_amount(&self, owner: Address, token: Address, amount: Amount) -> Result<U256> {
        match amount {
            Amount::Fixed(amount) => Ok(amount),
            Amount::Balance => self.balance(owner, token).await,
            Amount::BorrowCapacity {
                price_feed,
                asset_decimals,
                safety_bps,
            } => {
                let lending = &self.lending;
                let account = self
                    .retry
                    .run("account data", move || async move {
                        lending.account_data(owner).await
                    })
                    .await?;
                let price = self
                    .retry
                    .run("asset price", move || async move {
                        lending.asset_price_eth(price_feed).await
                    })
                    .await?;
                let amount = account.borrowable(price, asset_decimals, safety_bps)?;
                info!(
                    %token,
                    available_eth = %account.available_borrows_eth,
                    %price,
                    %amount,
                    "[ORCH] sized borrow from account data"
                );
                Ok(amount)
            }
        }
    }

    async fn resolve_nonzero(
        &self,
        owner: Address,
        token: Address,
        amount: Amount,
        kind: &str,
    ) -> Result<U256> {
        let resolved = self.resolve_amount(owner, token, amount).await?;
        if resolved.is_zero() {
            return Err(AppError::InvalidRange(format!(
                "{kind} of {token} resolved to zero"
            )));
        }
        Ok(resolved)
    }

    async fn size_position(
        &self,
        owner: Address,
        position_manager: Address,
        sizing: &PositionSizing,
    ) -> Result<ActionStep> {
        let pools = &self.pools;
        let address = sizing.pool.address;
        let pool = self
            .retry
            .run("pool state", move || async move { pools.read(address).await })
            .await?;
        if pool.key.token0 != sizing.pool.token0 || pool.key.token1 != sizing.pool.token1 {
            return Err(AppError::Configuration(format!(
                "pool {address} holds {}/{}, expected {}/{}",
                pool.key.token0, pool.key.token1, sizing.pool.token0, sizing.pool.token1
            )));
        }
        let amount0 = self.balance(owner, pool.key.token0).await?.min(sizing.max_amount0);
        let amount1 = self.balance(owner, pool.key.token1).await?.min(sizing.max_amount1);
        let plan = self.sizer.build_plan(
            &pool,
            sizing.range,
            amount0,
            amount1,
            sizing.slippage_bps,
            sizing.recipient,
        )?;
        info!(
            pool = %address,
            tick = pool.tick_current,
            amount0 = %plan.amount0_desired,
            amount1 = %plan.amount1_desired,
            "[ORCH] sized position from balances"
        );
        Ok(ActionStep::add_liquidity(owner, position_manager, plan))
    }

    // ---------- chain interaction ----------

    fn ensure_not_cancelled(&self) -> Result<()> {
        match &self.cancel {
            Some(rx) if *rx.borrow() => Err(AppError::Cancelled),
            _ => Ok(()),
        }
    }

    async fn submit(&self, step: &ActionStep) -> Result<TxHandle> {
        let ledger = &self.ledger;
        let submitter = &self.submitter;
        self.retry
            .run("submit", move || async move {
                // past this point the action is irrevocable
                self.ensure_not_cancelled()?;
                match step.action {
                    Action::Approve {
                        token,
                        spender,
                        amount: Amount::Fixed(amount),
                    } => ledger.approve(spender, token, amount).await,
                    Action::Approve { token, .. } => Err(AppError::InvalidRange(format!(
                        "approval of {token} has no resolved amount"
                    ))),
                    _ => submitter.submit(step).await,
                }
            })
            .await
    }

    async fn await_finality(&self, handle: &TxHandle) -> Result<Receipt> {
        let submitter = &self.submitter;
        let confirmations = self.confirmations;
        let timeout = self.confirmation_timeout;
        // a timed out wait is retried on the same handle, never resubmitted
        self.retry
            .run("confirmation", move || async move {
                match tokio::time::timeout(timeout, submitter.await_finality(handle, confirmations))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(AppError::TransactionTimeout {
                        tx: handle.to_string(),
                        confirmations,
                    }),
                }
            })
            .await
    }

    async fn balance(&self, owner: Address, token: Address) -> Result<U256> {
        let ledger = &self.ledger;
        self.retry
            .run("balance", move || async move { ledger.balance_of(owner, token).await })
            .await
    }

    async fn allowance(&self, owner: Address, spender: Address, token: Address) -> Result<U256> {
        let ledger = &self.ledger;
        self.retry
            .run("allowance", move || async move {
                ledger.allowance(owner, spender, token).await
            })
            .await
    }
}

fn halt(sequence: ActionSequence, index: usize, cause: AppError) -> SequenceReport {
    error!(
        label = %sequence.label(),
        index,
        kind = sequence.steps()[index].kind(),
        error = %cause,
        "[ORCH] step failed, halting sequence"
    );
    sequence.fail(index, cause)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::state::PoolKey;
    use crate::models::{SwapPlan, TickRange};
    use crate::orchestrator::sequence::{SequenceState, StepStatus};
    use crate::orchestrator::step::InterestRateMode;
    use alloy_primitives::B256;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    const OWNER: Address = Address::repeat_byte(0x0a);
    const WETH: Address = Address::repeat_byte(0x01);
    const DAI: Address = Address::repeat_byte(0x02);
    const POOL: Address = Address::repeat_byte(0x50);
    const ROUTER: Address = Address::repeat_byte(0x60);
    const MANAGER: Address = Address::repeat_byte(0x70);
    const DAI_FEED: Address = Address::repeat_byte(0x80);

    /// In-memory ERC20 ledger that records every approval it sends.
    #[derive(Default)]
    struct SpyLedger {
        balances: Mutex<HashMap<(Address, Address), U256>>,
        allowances: Mutex<HashMap<(Address, Address, Address), U256>>,
        approvals: Mutex<Vec<(Address, Address, U256)>>,
        nonce: AtomicUsize,
    }

    impl SpyLedger {
        fn set_balance(&self, owner: Address, token: Address, amount: U256) {
            self.balances.lock().unwrap().insert((owner, token), amount);
        }

        fn set_allowance(&self, owner: Address, spender: Address, token: Address, amount: U256) {
            self.allowances
                .lock()
                .unwrap()
                .insert((owner, spender, token), amount);
        }

        fn adjust(&self, owner: Address, token: Address, delta: i128) {
            let mut balances = self.balances.lock().unwrap();
            let entry = balances.entry((owner, token)).or_insert(U256::ZERO);
            let magnitude = U256::from(delta.unsigned_abs());
            *entry = if delta >= 0 {
                *entry + magnitude
            } else {
                entry.saturating_sub(magnitude)
            };
        }

        fn approval_count(&self) -> usize {
            self.approvals.lock().unwrap().len()
        }

        fn next_handle(&self) -> TxHandle {
            let n = self.nonce.fetch_add(1, Ordering::SeqCst) as u8;
            TxHandle(B256::repeat_byte(n.wrapping_add(1)))
        }
    }

    impl TokenLedger for SpyLedger {
        async fn balance_of(&self, owner: Address, token: Address) -> Result<U256> {
            Ok(self
                .balances
                .lock()
                .unwrap()
                .get(&(owner, token))
                .copied()
                .unwrap_or_default())
        }

        async fn allowance(&self, owner: Address, spender: Address, token: Address) -> Result<U256> {
            Ok(self
                .allowances
                .lock()
                .unwrap()
                .get(&(owner, spender, token))
                .copied()
                .unwrap_or_default())
        }

        async fn approve(&self, spender: Address, token: Address, amount: U256) -> Result<TxHandle> {
            self.approvals.lock().unwrap().push((spender, token, amount));
            self.set_allowance(OWNER, spender, token, amount);
            Ok(self.next_handle())
        }
    }

    #[derive(Debug, Clone, Copy)]
    enum Script {
        Succeed,
        Revert,
        /// Confirmation wait never resolves.
        Hang,
        /// Submission fails at the transport level.
        Unavailable,
    }

    /// Submitter that applies each action to the spy ledger and follows a
    /// per-submission script (default: succeed).
    struct ScriptedSubmitter {
        ledger: Arc<SpyLedger>,
        script: Mutex<VecDeque<Script>>,
        pending: Mutex<HashMap<TxHandle, Script>>,
        submitted: Mutex<Vec<&'static str>>,
        finality_calls: AtomicUsize,
    }

    impl ScriptedSubmitter {
        fn new(ledger: Arc<SpyLedger>, script: Vec<Script>) -> Self {
            Self {
                ledger,
                script: Mutex::new(script.into()),
                pending: Mutex::new(HashMap::new()),
                submitted: Mutex::new(Vec::new()),
                finality_calls: AtomicUsize::new(0),
            }
        }

        fn submitted(&self) -> Vec<&'static str> {
            self.submitted.lock().unwrap().clone()
        }

        fn apply(&self, step: &ActionStep) {
            let as_i128 = |v: U256| v.to::<u128>() as i128;
            match &step.action {
                Action::Swap { plan, .. } => {
                    self.ledger.adjust(OWNER, plan.token_in, -as_i128(plan.amount_in));
                    self.ledger
                        .adjust(plan.recipient, plan.token_out, as_i128(plan.amount_out_minimum));
                }
                Action::Deposit {
                    lending_pool,
                    asset,
                    amount,
                    ..
                } => {
                    let amount = as_i128(amount.fixed().unwrap());
                    self.ledger.adjust(OWNER, *asset, -amount);
                    self.ledger.adjust(*lending_pool, *asset, amount);
                }
                Action::Repay { asset, amount, .. } => {
                    self.ledger
                        .adjust(OWNER, *asset, -as_i128(amount.fixed().unwrap()));
                }
                Action::Borrow { asset, amount, .. } => {
                    self.ledger
                        .adjust(OWNER, *asset, as_i128(amount.fixed().unwrap()));
                }
                Action::WrapNative { weth, amount } => {
                    self.ledger.adjust(OWNER, *weth, as_i128(*amount));
                }
                Action::AddLiquidity { plan, .. } => {
                    self.ledger.adjust(OWNER, plan.token0, -as_i128(plan.amount0_desired));
                    self.ledger.adjust(OWNER, plan.token1, -as_i128(plan.amount1_desired));
                }
                Action::Approve { .. } | Action::AddSizedLiquidity { .. } => {}
            }
        }
    }

    impl TransactionSubmitter for ScriptedSubmitter {
        async fn submit(&self, step: &ActionStep) -> Result<TxHandle> {
            let script = self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Script::Succeed);
            if let Script::Unavailable = script {
                return Err(AppError::ProviderUnavailable("connection refused".into()));
            }
            self.submitted.lock().unwrap().push(step.kind());
            if let Script::Succeed = script {
                self.apply(step);
            }
            let handle = self.ledger.next_handle();
            self.pending.lock().unwrap().insert(handle, script);
            Ok(handle)
        }

        async fn await_finality(&self, handle: &TxHandle, _confirmations: usize) -> Result<Receipt> {
            self.finality_calls.fetch_add(1, Ordering::SeqCst);
            let script = self
                .pending
                .lock()
                .unwrap()
                .get(handle)
                .copied()
                .unwrap_or(Script::Succeed);
            if let Script::Hang = script {
                std::future::pending::<()>().await;
            }
            Ok(Receipt {
                tx_hash: handle.0,
                block_number: 100,
                success: !matches!(script, Script::Revert),
            })
        }
    }

    /// Lending pool that lends 80% of the WETH it holds, priced 1:1 in ETH.
    struct SpyLending {
        ledger: Arc<SpyLedger>,
        price: U256,
        reads: AtomicUsize,
    }

    impl LendingView for SpyLending {
        async fn account_data(&self, _owner: Address) -> Result<LendingAccountData> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            let collateral = self.ledger.balance_of(POOL, WETH).await?;
            Ok(LendingAccountData {
                total_collateral_eth: collateral,
                available_borrows_eth: collateral * U256::from(8u64) / U256::from(10u64),
                ..Default::default()
            })
        }

        async fn asset_price_eth(&self, _feed: Address) -> Result<U256> {
            Ok(self.price)
        }
    }

    struct FixedPool(PoolState);

    impl PoolStateReader for FixedPool {
        async fn read(&self, _pool: Address) -> Result<PoolState> {
            Ok(self.0.clone())
        }
    }

    fn settings() -> OrchestratorSettings {
        OrchestratorSettings {
            confirmation_timeout: Duration::from_millis(20),
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..OrchestratorSettings::default()
        }
    }

    fn eth(n: u64) -> U256 {
        U256::from(n) * U256::from(1_000_000_000_000_000_000u64)
    }

    fn setup(
        script: Vec<Script>,
    ) -> (
        Arc<SpyLedger>,
        Arc<ScriptedSubmitter>,
        ActionOrchestrator<Arc<SpyLedger>, Arc<ScriptedSubmitter>>,
    ) {
        let ledger = Arc::new(SpyLedger::default());
        let submitter = Arc::new(ScriptedSubmitter::new(ledger.clone(), script));
        let orchestrator = ActionOrchestrator::new(OWNER, ledger.clone(), submitter.clone(), &settings());
        (ledger, submitter, orchestrator)
    }

    fn deposit_and_borrow() -> ActionSequence {
        ActionSequence::new("deposit-borrow", OWNER)
            .then(ActionStep::approve(OWNER, WETH, POOL, eth(15)))
            .then(ActionStep::deposit(OWNER, POOL, WETH, eth(15)))
            .then(ActionStep::borrow(
                OWNER,
                POOL,
                DAI,
                eth(100),
                InterestRateMode::Stable,
            ))
    }

    #[tokio::test]
    async fn sequence_runs_every_step_in_order() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(20));

        let report = orchestrator.execute(deposit_and_borrow()).await;

        assert!(report.is_completed(), "{:?}", report.failure);
        assert_eq!(report.completed_steps(), vec![0, 1, 2]);
        assert_eq!(report.receipts().len(), 3);
        assert_eq!(ledger.approval_count(), 1);
        assert_eq!(submitter.submitted(), vec!["deposit", "borrow"]);
        assert_eq!(ledger.balance_of(OWNER, WETH).await.unwrap(), eth(5));
        assert_eq!(ledger.balance_of(OWNER, DAI).await.unwrap(), eth(100));
    }

    #[tokio::test]
    async fn revert_halts_sequence_and_reports_partial_state() {
        // approve goes through the ledger, so the first scripted submission is the deposit
        let (ledger, submitter, orchestrator) = setup(vec![Script::Revert]);
        ledger.set_balance(OWNER, WETH, eth(20));

        let report = orchestrator.execute(deposit_and_borrow()).await;

        assert_eq!(report.state, SequenceState::Failed(1));
        assert!(matches!(report.status(0), Some(StepStatus::Confirmed(_))));
        assert_eq!(report.status(1), Some(&StepStatus::Failed));
        assert_eq!(report.status(2), Some(&StepStatus::Pending));
        assert_eq!(submitter.submitted(), vec!["deposit"]);
        // approve wait plus a single deposit wait; reverts are not retried
        assert_eq!(submitter.finality_calls.load(Ordering::SeqCst), 2);

        let failure = report.into_result().unwrap_err();
        assert_eq!(failure.index, 1);
        assert_eq!(failure.kind, "deposit");
        assert_eq!(failure.completed, vec![0]);
        assert!(matches!(failure.cause, AppError::TransactionReverted(_)));
    }

    #[tokio::test]
    async fn approve_with_sufficient_allowance_sends_nothing() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_allowance(OWNER, POOL, WETH, eth(50));

        let seq = ActionSequence::new("approve", OWNER).then(ActionStep::approve(
            OWNER,
            WETH,
            POOL,
            eth(15),
        ));
        let report = orchestrator.execute(seq).await;

        assert!(report.is_completed());
        assert_eq!(report.status(0), Some(&StepStatus::Skipped));
        assert_eq!(ledger.approval_count(), 0);
        assert!(submitter.submitted().is_empty());
        assert_eq!(submitter.finality_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn insufficient_balance_fails_before_submission() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(1));

        let report = orchestrator.execute(deposit_and_borrow()).await;

        // caught up front: the approve ahead of the deposit is never sent
        assert_eq!(report.state, SequenceState::Failed(1));
        assert_eq!(report.status(0), Some(&StepStatus::Pending));
        assert_eq!(ledger.approval_count(), 0);
        assert!(submitter.submitted().is_empty());
        let failure = report.into_result().unwrap_err();
        assert!(failure.completed.is_empty());
        assert!(matches!(
            failure.cause,
            AppError::InsufficientBalance { token, .. } if token == WETH
        ));
    }

    #[tokio::test]
    async fn spending_is_summed_across_steps() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(15));
        ledger.set_allowance(OWNER, POOL, WETH, eth(100));

        let seq = ActionSequence::new("double-deposit", OWNER)
            .then(ActionStep::deposit(OWNER, POOL, WETH, eth(10)))
            .then(ActionStep::deposit(OWNER, POOL, WETH, eth(10)));
        let report = orchestrator.execute(seq).await;

        assert_eq!(report.state, SequenceState::Failed(1));
        assert!(submitter.submitted().is_empty());
        assert!(matches!(
            report.into_result().unwrap_err().cause,
            AppError::InsufficientBalance { required, available, .. }
                if required == eth(20) && available == eth(15)
        ));
    }

    #[tokio::test]
    async fn tokens_from_earlier_steps_pass_the_upfront_check() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(20));

        // no DAI yet: the borrow provides it, the approve covers the repay
        let seq = deposit_and_borrow()
            .then(ActionStep::approve(OWNER, DAI, POOL, eth(40)))
            .then(ActionStep::repay(
                OWNER,
                POOL,
                DAI,
                eth(40),
                InterestRateMode::Stable,
            ));
        let report = orchestrator.execute(seq).await;

        assert!(report.is_completed(), "{:?}", report.failure);
        assert_eq!(submitter.submitted(), vec!["deposit", "borrow", "repay"]);
        assert_eq!(ledger.balance_of(OWNER, DAI).await.unwrap(), eth(60));
    }

    #[tokio::test]
    async fn missing_allowance_fails_before_submission() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(20));

        let seq = ActionSequence::new("no-approve", OWNER)
            .then(ActionStep::deposit(OWNER, POOL, WETH, eth(15)));
        let report = orchestrator.execute(seq).await;

        assert!(submitter.submitted().is_empty());
        let failure = report.into_result().unwrap_err();
        assert!(matches!(
            failure.cause,
            AppError::AllowanceInsufficient { spender, .. } if spender == POOL
        ));
    }

    #[tokio::test]
    async fn confirmation_timeout_is_retried_then_escalated() {
        let (ledger, submitter, orchestrator) = setup(vec![Script::Hang]);
        ledger.set_balance(OWNER, WETH, eth(20));

        let report = orchestrator.execute(deposit_and_borrow()).await;

        // one submission, three bounded waits on the same handle
        assert_eq!(submitter.submitted(), vec!["deposit"]);
        assert_eq!(submitter.finality_calls.load(Ordering::SeqCst), 1 + 3);
        let failure = report.into_result().unwrap_err();
        assert_eq!(failure.index, 1);
        assert!(matches!(failure.cause, AppError::TransactionTimeout { .. }));
    }

    #[tokio::test]
    async fn transient_submission_failure_recovers() {
        let (ledger, submitter, orchestrator) = setup(vec![Script::Unavailable, Script::Succeed]);
        ledger.set_balance(OWNER, WETH, eth(20));

        let report = orchestrator.execute(deposit_and_borrow()).await;

        assert!(report.is_completed(), "{:?}", report.failure);
        assert_eq!(submitter.submitted(), vec!["deposit", "borrow"]);
    }

    #[tokio::test]
    async fn failed_post_condition_is_fatal() {
        let (ledger, _submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(20));
        ledger.set_allowance(OWNER, ROUTER, WETH, eth(20));

        // the scripted swap credits only amount_out_minimum, less than demanded
        let plan = SwapPlan {
            token_in: WETH,
            token_out: DAI,
            fee: 3000,
            amount_in: eth(1),
            amount_out_minimum: eth(2),
            sqrt_price_limit_x96: U256::ZERO,
            recipient: OWNER,
            deadline: 0,
        };
        let mut step = ActionStep::swap(ROUTER, plan);
        step.post_conditions = vec![PostCondition::BalanceIncreased {
            holder: OWNER,
            token: DAI,
            at_least: eth(3),
        }];
        let report = orchestrator
            .execute(ActionSequence::new("swap", OWNER).then(step))
            .await;

        let failure = report.into_result().unwrap_err();
        assert!(matches!(failure.cause, AppError::PostConditionFailed(_)));
    }

    #[tokio::test]
    async fn cancellation_stops_before_submission() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(20));
        let (tx, rx) = watch::channel(false);
        let orchestrator = orchestrator.with_cancellation(rx);
        tx.send(true).unwrap();

        let report = orchestrator.execute(deposit_and_borrow()).await;

        assert_eq!(report.state, SequenceState::Failed(0));
        assert_eq!(ledger.approval_count(), 0);
        assert!(submitter.submitted().is_empty());
        assert!(matches!(
            report.into_result().unwrap_err().cause,
            AppError::Cancelled
        ));
    }

    #[tokio::test]
    async fn independent_sequences_run_side_by_side() {
        let (ledger, _submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(20));

        let router = ActionSequence::new("router-approval", OWNER)
            .then(ActionStep::approve(OWNER, WETH, ROUTER, eth(5)));

        let reports = orchestrator
            .execute_all(vec![deposit_and_borrow(), router])
            .await;

        assert_eq!(reports.len(), 2);
        assert!(reports[0].is_completed(), "{:?}", reports[0].failure);
        assert!(reports[1].is_completed(), "{:?}", reports[1].failure);
        assert_eq!(ledger.approval_count(), 2);
    }

    #[tokio::test]
    async fn sequence_for_another_wallet_is_rejected() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        let other = Address::repeat_byte(0x0b);
        ledger.set_balance(other, WETH, eth(20));

        let seq = ActionSequence::new("foreign", other)
            .then(ActionStep::approve(other, WETH, POOL, eth(1)))
            .then(ActionStep::deposit(other, POOL, WETH, eth(1)));
        let report = orchestrator.execute(seq).await;

        assert_eq!(report.state, SequenceState::Failed(0));
        assert_eq!(ledger.approval_count(), 0);
        assert!(submitter.submitted().is_empty());
        assert!(matches!(
            report.into_result().unwrap_err().cause,
            AppError::Configuration(_)
        ));
    }

    #[tokio::test]
    async fn empty_sequence_completes_without_reads() {
        let (_ledger, submitter, orchestrator) = setup(vec![]);
        let report = orchestrator
            .execute(ActionSequence::new("empty", Address::repeat_byte(0x0b)))
            .await;
        assert!(report.is_completed());
        assert_eq!(submitter.finality_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn borrow_capacity_is_read_after_the_deposit() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(10));
        let lending = Arc::new(SpyLending {
            ledger: ledger.clone(),
            // DAI at 0.0005 ETH
            price: U256::from(500_000_000_000_000u64),
            reads: AtomicUsize::new(0),
        });
        let orchestrator = orchestrator.with_lending(lending.clone());

        let seq = ActionSequence::new("deposit-borrow-max", OWNER)
            .then(ActionStep::approve(OWNER, WETH, POOL, eth(10)))
            .then(ActionStep::deposit(OWNER, POOL, WETH, eth(10)))
            .then(ActionStep::borrow(
                OWNER,
                POOL,
                DAI,
                Amount::BorrowCapacity {
                    price_feed: DAI_FEED,
                    asset_decimals: 18,
                    safety_bps: 500,
                },
                InterestRateMode::Variable,
            ));
        let report = orchestrator.execute(seq).await;

        assert!(report.is_completed(), "{:?}", report.failure);
        assert_eq!(lending.reads.load(Ordering::SeqCst), 1);
        assert_eq!(submitter.submitted(), vec!["deposit", "borrow"]);
        // 8 ETH available after the deposit, 95% of it at 0.0005 ETH per DAI
        assert_eq!(ledger.balance_of(OWNER, DAI).await.unwrap(), eth(15_200));
        let borrow = &report.steps[2].0;
        assert!(!borrow.is_deferred());
        assert!(matches!(
            borrow.action,
            Action::Borrow { amount: Amount::Fixed(amount), .. } if amount == eth(15_200)
        ));
        assert_eq!(borrow.post_conditions.len(), 1);
    }

    #[tokio::test]
    async fn borrow_capacity_without_lending_view_fails_at_that_step() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(10));

        let seq = ActionSequence::new("deposit-borrow-max", OWNER)
            .then(ActionStep::approve(OWNER, WETH, POOL, eth(10)))
            .then(ActionStep::deposit(OWNER, POOL, WETH, eth(10)))
            .then(ActionStep::borrow(
                OWNER,
                POOL,
                DAI,
                Amount::BorrowCapacity {
                    price_feed: DAI_FEED,
                    asset_decimals: 18,
                    safety_bps: 500,
                },
                InterestRateMode::Variable,
            ));
        let report = orchestrator.execute(seq).await;

        assert_eq!(report.state, SequenceState::Failed(2));
        assert_eq!(submitter.submitted(), vec!["deposit"]);
        let failure = report.into_result().unwrap_err();
        assert_eq!(failure.completed, vec![0, 1]);
        assert!(matches!(failure.cause, AppError::Configuration(_)));
    }

    #[tokio::test]
    async fn repay_of_whole_balance_uses_the_balance_at_that_point() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(20));

        let seq = deposit_and_borrow()
            .then(ActionStep::approve(OWNER, DAI, POOL, eth(500)))
            .then(ActionStep::repay(
                OWNER,
                POOL,
                DAI,
                Amount::Balance,
                InterestRateMode::Stable,
            ));
        let report = orchestrator.execute(seq).await;

        assert!(report.is_completed(), "{:?}", report.failure);
        assert_eq!(submitter.submitted(), vec!["deposit", "borrow", "repay"]);
        assert_eq!(ledger.balance_of(OWNER, DAI).await.unwrap(), U256::ZERO);
        assert!(matches!(
            report.steps[4].0.action,
            Action::Repay { amount: Amount::Fixed(amount), .. } if amount == eth(100)
        ));
    }

    #[tokio::test]
    async fn position_is_sized_from_balances_at_execution() {
        let (ledger, submitter, orchestrator) = setup(vec![]);
        ledger.set_balance(OWNER, WETH, eth(3));
        ledger.set_balance(OWNER, DAI, eth(10));
        let key = PoolKey::new(Address::repeat_byte(0xaa), DAI, WETH, 3000).unwrap();
        let pool = PoolState::new(key, 0, 60, U256::from(1u64) << 96, 1_000_000_000_000).unwrap();
        let orchestrator = orchestrator.with_pools(FixedPool(pool));

        let sizing = PositionSizing {
            pool: key,
            range: TickRange::new(-600, 600, 60).unwrap(),
            slippage_bps: 50,
            recipient: OWNER,
            max_amount0: eth(5),
            max_amount1: eth(5),
        };
        let seq = ActionSequence::new("lp", OWNER)
            .then(ActionStep::approve(OWNER, WETH, MANAGER, eth(5)))
            .then(ActionStep::approve(OWNER, DAI, MANAGER, eth(5)))
            .then(ActionStep::add_sized_liquidity(MANAGER, sizing));
        let report = orchestrator.execute(seq).await;

        assert!(report.is_completed(), "{:?}", report.failure);
        assert_eq!(submitter.submitted(), vec!["add-liquidity"]);
        let Action::AddLiquidity { plan, .. } = &report.steps[2].0.action else {
            panic!("position step was not resolved: {:?}", report.steps[2].0.action);
        };
        // WETH binds at 3 of the 5 allowed; DAI follows at price 1
        assert_eq!(plan.token0, WETH);
        assert!(plan.amount0_desired > U256::ZERO && plan.amount0_desired <= eth(3));
        assert!(plan.amount1_desired <= eth(5));
        assert!(plan.amount0_min < plan.amount0_desired);
        assert_eq!(
            ledger.balance_of(OWNER, WETH).await.unwrap(),
            eth(3) - plan.amount0_desired
        );
    }
}
