//! SHARED and INDIVIDUAL strategies

use crate::query::{Query, QueryStrategyType};
use crate::selections::PidSelections;
use obd_protocol::{ids, PidId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Computes the PID set to poll
pub trait QueryStrategy: Send + Sync {
    fn strategy_type(&self) -> QueryStrategyType;

    fn resolve(&self, selections: &PidSelections, active_surface: &str) -> BTreeSet<PidId>;

    fn build(&self, selections: &PidSelections, active_surface: &str) -> Query {
        let pid_ids = self.resolve(selections, active_surface);
        debug!(
            "Resolved {:?} query for '{}': {:?}",
            self.strategy_type(),
            active_surface,
            pid_ids
        );
        Query {
            strategy: self.strategy_type(),
            pid_ids,
        }
    }
}

/// Union of every surface's selection, independent of what is on screen
#[derive(Debug, Clone, Copy, Default)]
pub struct SharedQueryStrategy;

impl QueryStrategy for SharedQueryStrategy {
    fn strategy_type(&self) -> QueryStrategyType {
        QueryStrategyType::Shared
    }

    fn resolve(&self, selections: &PidSelections, _active_surface: &str) -> BTreeSet<PidId> {
        selections.union()
    }
}

/// Only the visible surface's selection, plus the always-on PID
#[derive(Debug, Clone, Copy, Default)]
pub struct IndividualQueryStrategy {
    always_on: Option<PidId>,
}

impl IndividualQueryStrategy {
    pub fn new(always_on: Option<PidId>) -> Self {
        Self { always_on }
    }
}

impl QueryStrategy for IndividualQueryStrategy {
    fn strategy_type(&self) -> QueryStrategyType {
        QueryStrategyType::Individual
    }

    fn resolve(&self, selections: &PidSelections, active_surface: &str) -> BTreeSet<PidId> {
        let mut pid_ids = selections
            .surface(active_surface)
            .cloned()
            .unwrap_or_default();
        pid_ids.extend(self.always_on);
        pid_ids
    }
}

/// Query configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerySettings {
    pub strategy: QueryStrategyType,
    /// Surface currently on screen
    pub active_surface: String,
    /// Default selection per surface, overridden by persisted selections
    pub surfaces: BTreeMap<String, Vec<PidId>>,
    /// Poll the dynamic selector PID in INDIVIDUAL mode
    pub dynamic_selector_enabled: bool,
}

impl Default for QuerySettings {
    fn default() -> Self {
        let mut surfaces = BTreeMap::new();
        surfaces.insert(
            "gauge".to_string(),
            vec![ids::ENGINE_RPM, ids::VEHICLE_SPEED, ids::COOLANT_TEMP, ids::ENGINE_LOAD],
        );
        surfaces.insert(
            "graph".to_string(),
            vec![ids::ENGINE_RPM, ids::MAF, ids::INTAKE_MANIFOLD_PRESSURE],
        );
        surfaces.insert(
            "drag_racing".to_string(),
            vec![ids::VEHICLE_SPEED, ids::ENGINE_RPM],
        );
        Self {
            strategy: QueryStrategyType::Shared,
            active_surface: "gauge".to_string(),
            surfaces,
            dynamic_selector_enabled: false,
        }
    }
}

impl QuerySettings {
    pub fn selections(&self) -> PidSelections {
        self.surfaces
            .iter()
            .fold(PidSelections::new(), |acc, (name, ids)| {
                acc.with_surface(name, ids.iter().copied())
            })
    }

    pub fn surface_names(&self) -> Vec<&str> {
        self.surfaces.keys().map(String::as_str).collect()
    }
}

/// Strategy object for the configured mode
pub fn strategy_for(settings: &QuerySettings) -> Box<dyn QueryStrategy> {
    match settings.strategy {
        QueryStrategyType::Shared => Box::new(SharedQueryStrategy),
        QueryStrategyType::Individual => Box::new(IndividualQueryStrategy::new(
            settings
                .dynamic_selector_enabled
                .then_some(ids::DYNAMIC_SELECTOR),
        )),
    }
}
