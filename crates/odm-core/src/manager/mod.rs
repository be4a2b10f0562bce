//! Strategy cascade manager: drives one plan item from probe through
//! strategies to verification and atomic commit, emitting one history
//! record per attempt.

mod run;
mod state;

pub use run::{run_item, first_strategy_decision, DryRunDecision, ItemOutcome, ManagerCtx};
pub use state::{advance, Event, ManagerState};
