//! Active query

use obd_protocol::PidId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// How the active PID set is chosen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStrategyType {
    #[default]
    Shared,
    Individual,
}

/// PID set polled by the orchestrator on each cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub strategy: QueryStrategyType,
    pub pid_ids: BTreeSet<PidId>,
}

impl Query {
    pub fn new(strategy: QueryStrategyType, pid_ids: impl IntoIterator<Item = PidId>) -> Self {
        Self {
            strategy,
            pid_ids: pid_ids.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pid_ids.is_empty()
    }

    pub fn contains(&self, id: PidId) -> bool {
        self.pid_ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.pid_ids.len()
    }
}
