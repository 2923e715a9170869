use super::step::ActionStep;
use crate::errors::AppError;
use crate::interfaces::Receipt;
use alloy_primitives::Address;
use thiserror::Error;

/// Where a sequence is in its lifecycle. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Pending,
    Executing(usize),
    Confirmed(usize),
    Completed,
    Failed(usize),
}

impl SequenceState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequenceState::Completed | SequenceState::Failed(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Executing,
    /// Nothing was sent because the ledger already satisfied the step.
    Skipped,
    Confirmed(Receipt),
    Failed,
}

impl StepStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, StepStatus::Skipped | StepStatus::Confirmed(_))
    }
}

/// Ordered list of dependent steps sent from one wallet.
///
/// Executed strictly in order by the orchestrator and consumed in the process.
#[derive(Debug, Clone)]
pub struct ActionSequence {
    label: String,
    owner: Address,
    steps: Vec<ActionStep>,
    statuses: Vec<StepStatus>,
    state: SequenceState,
}

impl ActionSequence {
    pub fn new(label: impl Into<String>, owner: Address) -> Self {
        Self {
            label: label.into(),
            owner,
            steps: Vec::new(),
            statuses: Vec::new(),
            state: SequenceState::Pending,
        }
    }

    pub fn then(mut self, step: ActionStep) -> Self {
        self.push(step);
        self
    }

    pub fn push(&mut self, step: ActionStep) {
        self.steps.push(step);
        self.statuses.push(StepStatus::Pending);
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn owner(&self) -> Address {
        self.owner
    }

    pub fn steps(&self) -> &[ActionStep] {
        &self.steps
    }

    pub fn state(&self) -> SequenceState {
        self.state
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    // ---------- transitions, driven by the orchestrator ----------

    pub(crate) fn begin(&mut self, index: usize) {
        debug_assert!(match self.state {
            SequenceState::Pending => index == 0,
            SequenceState::Confirmed(prev) => index == prev + 1,
            _ => false,
        });
        self.statuses[index] = StepStatus::Executing;
        self.state = SequenceState::Executing(index);
    }

    /// Swap in the step with its deferred amounts resolved.
    pub(crate) fn replace_step(&mut self, index: usize, step: ActionStep) {
        self.steps[index] = step;
    }

    pub(crate) fn skip(&mut self, index: usize) {
        self.statuses[index] = StepStatus::Skipped;
        self.state = SequenceState::Confirmed(index);
    }

    pub(crate) fn confirm(&mut self, index: usize, receipt: Receipt) {
        self.statuses[index] = StepStatus::Confirmed(receipt);
        self.state = SequenceState::Confirmed(index);
    }

    pub(crate) fn complete(mut self) -> SequenceReport {
        self.state = SequenceState::Completed;
        self.into_report(None)
    }

    pub(crate) fn fail(mut self, index: usize, cause: AppError) -> SequenceReport {
        self.statuses[index] = StepStatus::Failed;
        self.state = SequenceState::Failed(index);
        let failure = SequenceFailure {
            label: self.label.clone(),
            index,
            kind: self.steps[index].kind(),
            completed: self.done_indices(),
            cause,
        };
        self.into_report(Some(failure))
    }

    fn done_indices(&self) -> Vec<usize> {
        self.statuses
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_done())
            .map(|(i, _)| i)
            .collect()
    }

    fn into_report(self, failure: Option<SequenceFailure>) -> SequenceReport {
        SequenceReport {
            label: self.label,
            state: self.state,
            steps: self.steps.into_iter().zip(self.statuses).collect(),
            failure,
        }
    }
}

/// A sequence that stopped at a fatal error.
///
/// Steps before `index` stay final on chain; they are listed in `completed`
/// for manual reconciliation.
#[derive(Debug, Error)]
#[error("sequence '{label}' failed at step {index} ({kind}) after {completed:?}: {cause}")]
pub struct SequenceFailure {
    pub label: String,
    pub index: usize,
    pub kind: &'static str,
    pub completed: Vec<usize>,
    #[source]
    pub cause: AppError,
}

/// Final outcome of running one sequence.
#[derive(Debug)]
pub struct SequenceReport {
    pub label: String,
    pub state: SequenceState,
    pub steps: Vec<(ActionStep, StepStatus)>,
    pub failure: Option<SequenceFailure>,
}

impl SequenceReport {
    pub fn is_completed(&self) -> bool {
        self.state == SequenceState::Completed
    }

    /// Indices of steps that are final on chain (or were no-ops).
    pub fn completed_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, (_, status))| status.is_done())
            .map(|(i, _)| i)
            .collect()
    }

    pub fn receipts(&self) -> Vec<&Receipt> {
        self.steps
            .iter()
            .filter_map(|(_, status)| match status {
                StepStatus::Confirmed(receipt) => Some(receipt),
                _ => None,
            })
            .collect()
    }

    pub fn status(&self, index: usize) -> Option<&StepStatus> {
        self.steps.get(index).map(|(_, status)| status)
    }

    pub fn into_result(self) -> Result<Vec<(ActionStep, StepStatus)>, SequenceFailure> {
        match self.failure {
            Some(failure) => Err(failure),
            None => Ok(self.steps),
        }
    }
}
