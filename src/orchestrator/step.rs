use crate::models::{PositionPlan, PositionSizing, SwapPlan};
use alloy_primitives::{Address, U256};

/// Aave interest rate mode for borrow and repay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestRateMode {
    Stable = 1,
    Variable = 2,
}

/// Token amount of a step. Anything but `Fixed` is resolved by the
/// orchestrator right before the step is sent, from fresh chain reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Amount {
    Fixed(U256),
    /// The sender's whole balance of the step's token.
    Balance,
    /// Share of the lending pool's available borrows, converted into the
    /// asset through `price_feed` (wei per whole asset unit).
    BorrowCapacity {
        price_feed: Address,
        asset_decimals: u8,
        safety_bps: u32,
    },
}

impl Amount {
    pub fn fixed(&self) -> Option<U256> {
        match self {
            Amount::Fixed(amount) => Some(*amount),
            _ => None,
        }
    }
}

impl From<U256> for Amount {
    fn from(amount: U256) -> Self {
        Amount::Fixed(amount)
    }
}

/// One on-chain action with its target contract and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// ERC20 `approve(spender, amount)` on `token`.
    Approve {
        token: Address,
        spender: Address,
        amount: Amount,
    },
    /// WETH `deposit()` with `amount` of native currency attached.
    WrapNative { weth: Address, amount: U256 },
    /// `SwapRouter.exactInputSingle`.
    Swap { router: Address, plan: SwapPlan },
    /// `LendingPool.deposit`.
    Deposit {
        lending_pool: Address,
        asset: Address,
        amount: Amount,
        on_behalf_of: Address,
        referral_code: u16,
    },
    /// `LendingPool.borrow`. Funds go to the sender.
    Borrow {
        lending_pool: Address,
        asset: Address,
        amount: Amount,
        rate_mode: InterestRateMode,
        referral_code: u16,
        on_behalf_of: Address,
    },
    /// `NonfungiblePositionManager.mint`.
    AddLiquidity {
        position_manager: Address,
        plan: PositionPlan,
    },
    /// `NonfungiblePositionManager.mint`, planned once earlier steps are final.
    AddSizedLiquidity {
        position_manager: Address,
        sizing: PositionSizing,
    },
    /// `LendingPool.repay`.
    Repay {
        lending_pool: Address,
        asset: Address,
        amount: Amount,
        rate_mode: InterestRateMode,
        on_behalf_of: Address,
    },
}

/// What the ledger must show once the action is final.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCondition {
    AllowanceAtLeast {
        owner: Address,
        spender: Address,
        token: Address,
        amount: U256,
    },
    BalanceIncreased {
        holder: Address,
        token: Address,
        at_least: U256,
    },
    BalanceDecreased {
        holder: Address,
        token: Address,
        at_most: U256,
    },
}

/// Funds the sender must hold and have approved before an action is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requirement {
    pub token: Address,
    pub spender: Address,
    pub amount: U256,
}

/// An action plus the ledger changes expected from it.
///
/// Steps with a deferred amount carry no post-conditions until they are
/// resolved; resolving rebuilds them through the same constructors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionStep {
    pub action: Action,
    pub post_conditions: Vec<PostCondition>,
}

impl ActionStep {
    pub fn approve(
        owner: Address,
        token: Address,
        spender: Address,
        amount: impl Into<Amount>,
    ) -> Self {
        let amount = amount.into();
        let post_conditions = amount
            .fixed()
            .map(|amount| PostCondition::AllowanceAtLeast {
                owner,
                spender,
                token,
                amount,
            })
            .into_iter()
            .collect();
        Self {
            action: Action::Approve {
                token,
                spender,
                amount,
            },
            post_conditions,
        }
    }

    pub fn wrap_native(owner: Address, weth: Address, amount: U256) -> Self {
        Self {
            action: Action::WrapNative { weth, amount },
            post_conditions: vec![PostCondition::BalanceIncreased {
                holder: owner,
                token: weth,
                at_least: amount,
            }],
        }
    }

    pub fn swap(router: Address, plan: SwapPlan) -> Self {
        let post_conditions = vec![PostCondition::BalanceIncreased {
            holder: plan.recipient,
            token: plan.token_out,
            at_least: plan.amount_out_minimum,
        }];
        Self {
            action: Action::Swap { router, plan },
            post_conditions,
        }
    }

    pub fn deposit(
        owner: Address,
        lending_pool: Address,
        asset: Address,
        amount: impl Into<Amount>,
    ) -> Self {
        let amount = amount.into();
        Self {
            action: Action::Deposit {
                lending_pool,
                asset,
                amount,
                on_behalf_of: owner,
                referral_code: 0,
            },
            post_conditions: spent(owner, asset, amount),
        }
    }

    pub fn borrow(
        owner: Address,
        lending_pool: Address,
        asset: Address,
        amount: impl Into<Amount>,
        rate_mode: InterestRateMode,
    ) -> Self {
        let amount = amount.into();
        let post_conditions = amount
            .fixed()
            .map(|at_least| PostCondition::BalanceIncreased {
                holder: owner,
                token: asset,
                at_least,
            })
            .into_iter()
            .collect();
        Self {
            action: Action::Borrow {
                lending_pool,
                asset,
                amount,
                rate_mode,
                referral_code: 0,
                on_behalf_of: owner,
            },
            post_conditions,
        }
    }

    pub fn add_liquidity(owner: Address, position_manager: Address, plan: PositionPlan) -> Self {
        let post_conditions = vec![
            PostCondition::BalanceDecreased {
                holder: owner,
                token: plan.token0,
                at_most: plan.amount0_desired,
            },
            PostCondition::BalanceDecreased {
                holder: owner,
                token: plan.token1,
                at_most: plan.amount1_desired,
            },
        ];
        Self {
            action: Action::AddLiquidity {
                position_manager,
                plan,
            },
            post_conditions,
        }
    }

    pub fn add_sized_liquidity(position_manager: Address, sizing: PositionSizing) -> Self {
        Self {
            action: Action::AddSizedLiquidity {
                position_manager,
                sizing,
            },
            post_conditions: vec![],
        }
    }

    pub fn repay(
        owner: Address,
        lending_pool: Address,
        asset: Address,
        amount: impl Into<Amount>,
        rate_mode: InterestRateMode,
    ) -> Self {
        let amount = amount.into();
        Self {
            action: Action::Repay {
                lending_pool,
                asset,
                amount,
                rate_mode,
                on_behalf_of: owner,
            },
            post_conditions: spent(owner, asset, amount),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self.action {
            Action::Approve { .. } => "approve",
            Action::WrapNative { .. } => "wrap",
            Action::Swap { .. } => "swap",
            Action::Deposit { .. } => "deposit",
            Action::Borrow { .. } => "borrow",
            Action::AddLiquidity { .. } | Action::AddSizedLiquidity { .. } => "add-liquidity",
            Action::Repay { .. } => "repay",
        }
    }

    /// Contract the action is sent to.
    pub fn target(&self) -> Address {
        match &self.action {
            Action::Approve { token, .. } => *token,
            Action::WrapNative { weth, .. } => *weth,
            Action::Swap { router, .. } => *router,
            Action::Deposit { lending_pool, .. }
            | Action::Borrow { lending_pool, .. }
            | Action::Repay { lending_pool, .. } => *lending_pool,
            Action::AddLiquidity {
                position_manager, ..
            }
            | Action::AddSizedLiquidity {
                position_manager, ..
            } => *position_manager,
        }
    }

    /// Whether an amount in this step is only known at execution time.
    pub fn is_deferred(&self) -> bool {
        match &self.action {
            Action::Approve { amount, .. }
            | Action::Deposit { amount, .. }
            | Action::Borrow { amount, .. }
            | Action::Repay { amount, .. } => amount.fixed().is_none(),
            Action::AddSizedLiquidity { .. } => true,
            Action::WrapNative { .. } | Action::Swap { .. } | Action::AddLiquidity { .. } => false,
        }
    }

    /// Token the step adds to the sender's balance, if any.
    pub fn produces(&self) -> Option<Address> {
        match &self.action {
            Action::WrapNative { weth, .. } => Some(*weth),
            Action::Borrow { asset, .. } => Some(*asset),
            Action::Swap { plan, .. } => Some(plan.token_out),
            _ => None,
        }
    }

    /// Token balances and allowances the sender needs for this action.
    ///
    /// Deferred amounts contribute nothing until resolved.
    pub fn requirements(&self) -> Vec<Requirement> {
        match &self.action {
            Action::Approve { .. }
            | Action::WrapNative { .. }
            | Action::Borrow { .. }
            | Action::AddSizedLiquidity { .. } => vec![],
            Action::Swap { router, plan } => vec![Requirement {
                token: plan.token_in,
                spender: *router,
                amount: plan.amount_in,
            }],
            Action::Deposit {
                lending_pool,
                asset,
                amount,
                ..
            }
            | Action::Repay {
                lending_pool,
                asset,
                amount,
                ..
            } => amount
                .fixed()
                .map(|amount| Requirement {
                    token: *asset,
                    spender: *lending_pool,
                    amount,
                })
                .into_iter()
                .collect(),
            Action::AddLiquidity {
                position_manager,
                plan,
            } => [
                (plan.token0, plan.amount0_desired),
                (plan.token1, plan.amount1_desired),
            ]
            .into_iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(token, amount)| Requirement {
                token,
                spender: *position_manager,
                amount,
            })
            .collect(),
        }
    }
}

fn spent(owner: Address, asset: Address, amount: Amount) -> Vec<PostCondition> {
    amount
        .fixed()
        .map(|at_most| PostCondition::BalanceDecreased {
            holder: owner,
            token: asset,
            at_most,
        })
        .into_iter()
        .collect()
}
