//! Query Strategies
//!
//! Decides which PIDs the poll loop requests. SHARED polls the union of
//! every surface's selection so one loop serves all consumers. INDIVIDUAL
//! polls only what the visible surface needs, plus the always-on
//! diagnostic PID when enabled, and is re-resolved on every surface
//! switch.

mod query;
mod selections;
mod strategy;

pub use query::{Query, QueryStrategyType};
pub use selections::{PidSelections, SELECTION_KEY_PREFIX};
pub use strategy::{
    strategy_for, IndividualQueryStrategy, QuerySettings, QueryStrategy, SharedQueryStrategy,
};
