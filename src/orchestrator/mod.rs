//! Ordered execution of dependent on-chain actions.

pub mod executor;
pub mod retry;
pub mod sequence;
pub mod step;

pub use executor::{ActionOrchestrator, Unconfigured};
pub use retry::RetryPolicy;
pub use sequence::{ActionSequence, SequenceFailure, SequenceReport, SequenceState, StepStatus};
pub use step::{Action, ActionStep, Amount, InterestRateMode, PostCondition, Requirement};
