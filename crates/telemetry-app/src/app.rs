//! Wiring of the acquisition components

use crate::settings::{Settings, SettingsError};
use adapter_connection::ConnectionFactory;
use drag_racing::{DragRacingEvent, DragRacingMetricsProcessor, DragRacingRegistry};
use metrics_pipeline::{
    DebugMetricsGenerator, MetricsAggregator, MetricsPipeline, VehicleStatusEvent,
    VehicleStatusProcessor,
};
use obd_lifecycle::{ConnectionLifecycle, LifecycleError};
use obd_protocol::{ElmDecoder, PidRegistry, RegistryError};
use query_strategy::{strategy_for, PidSelections, Query};
use std::fmt::Debug;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use storage::{JsonFileStore, KeyValueStore, StorageError};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("PID registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Cannot read {path}: {message}")]
    Read { path: String, message: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error("Metrics exporter error: {0}")]
    Metrics(String),

    #[error("No surface named '{0}'")]
    UnknownSurface(String),
}

/// Running acquisition stack
pub struct App {
    settings: Settings,
    store: Arc<dyn KeyValueStore>,
    lifecycle: ConnectionLifecycle,
    aggregator: MetricsAggregator,
    drag_racing: DragRacingRegistry,
    vehicle_status: broadcast::Sender<VehicleStatusEvent>,
    drag_racing_events: broadcast::Sender<DragRacingEvent>,
    active_surface: Mutex<String>,
}

fn load_registry(path: Option<&Path>) -> Result<PidRegistry, AppError> {
    let Some(path) = path else {
        return Ok(PidRegistry::standard());
    };
    let document = std::fs::read_to_string(path).map_err(|e| AppError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    let registry = PidRegistry::from_json(&document)?;
    info!("Loaded {} PIDs from {}", registry.len(), path.display());
    Ok(registry)
}

impl App {
    pub fn build(settings: Settings) -> Result<Self, AppError> {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&settings.storage.path)?);
        let registry = Arc::new(load_registry(settings.pids.registry_path.as_deref())?);

        // Registration order is delivery order
        let pipeline = MetricsPipeline::new();
        let aggregator = MetricsAggregator::new();
        pipeline.register(aggregator.clone());

        let status = VehicleStatusProcessor::new();
        let vehicle_status = status.events();
        pipeline.register(status);

        let drag_racing = DragRacingRegistry::load(Arc::clone(&store))?;
        let drag = DragRacingMetricsProcessor::new(settings.drag_racing.clone(), drag_racing.clone());
        let drag_racing_events = drag.events();
        pipeline.register(drag);

        let mut lifecycle_config = settings.connection.lifecycle();
        if settings.debug.generator_enabled {
            let generator = settings.debug.generator();
            // The adapter must not feed a second source for the same PIDs
            lifecycle_config.synthesized_pids = generator.pids.clone();
            pipeline.register(DebugMetricsGenerator::new(generator));
        }

        let factory: Arc<dyn ConnectionFactory> = Arc::new(settings.connection.transport());
        let lifecycle = ConnectionLifecycle::new(
            lifecycle_config,
            factory,
            registry,
            Arc::new(ElmDecoder),
            pipeline,
        );
        info!(
            "Pipeline ready: {:?} over {} connection",
            lifecycle.pipeline().processor_names(),
            settings.connection.kind
        );

        let active_surface = Mutex::new(settings.query.active_surface.clone());
        Ok(Self {
            settings,
            store,
            lifecycle,
            aggregator,
            drag_racing,
            vehicle_status,
            drag_racing_events,
            active_surface,
        })
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }

    pub fn aggregator(&self) -> &MetricsAggregator {
        &self.aggregator
    }

    pub fn drag_racing(&self) -> &DragRacingRegistry {
        &self.drag_racing
    }

    pub fn subscribe_vehicle_status(&self) -> broadcast::Receiver<VehicleStatusEvent> {
        self.vehicle_status.subscribe()
    }

    pub fn subscribe_drag_racing(&self) -> broadcast::Receiver<DragRacingEvent> {
        self.drag_racing_events.subscribe()
    }

    /// Configured selections with persisted ones layered on top
    pub fn selections(&self) -> Result<PidSelections, AppError> {
        let query = &self.settings.query;
        let mut selections = query.selections();
        let stored = PidSelections::load(self.store.as_ref(), &query.surface_names())?;
        for (name, ids) in stored.surfaces() {
            selections.set_surface(name, ids.iter().copied());
        }
        Ok(selections)
    }

    pub fn active_surface(&self) -> String {
        self.active_surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Query for the active surface under the configured strategy
    pub fn initial_query(&self) -> Result<Query, AppError> {
        let surface = self.active_surface();
        Ok(strategy_for(&self.settings.query).build(&self.selections()?, &surface))
    }

    /// Make `name` the visible surface and re-issue the query for it.
    /// Returns whether the running connection picked up the new query; when
    /// not connected the surface still applies from the next `start`.
    pub fn switch_surface(&self, name: &str) -> Result<bool, AppError> {
        if !self.settings.query.surfaces.contains_key(name) {
            return Err(AppError::UnknownSurface(name.to_string()));
        }
        let query = strategy_for(&self.settings.query).build(&self.selections()?, name);

        let mut active = self.active_surface.lock().unwrap_or_else(PoisonError::into_inner);
        info!("Switching surface '{}' -> '{}'", active, name);
        *active = name.to_string();
        Ok(self.lifecycle.update_query(query)?)
    }

    /// Poll until `shutdown` resolves, then stop and summarize the trip
    pub async fn run_until<F>(&self, shutdown: F) -> Result<(), AppError>
    where
        F: Future<Output = ()>,
    {
        let loggers = [
            log_events("lifecycle", self.lifecycle.subscribe()),
            log_events("vehicle status", self.subscribe_vehicle_status()),
            log_events("drag racing", self.subscribe_drag_racing()),
        ];

        self.lifecycle.start(self.initial_query()?).await;
        shutdown.await;
        info!("Shutting down");
        let stopped = self.lifecycle.stop().await;
        loggers.iter().for_each(JoinHandle::abort);
        stopped?;

        let trips = &self.settings.trips;
        let summary = self.aggregator.trip_summary();
        if summary.should_record(trips.record_short_trips, trips.min_trip_secs) {
            let record = serde_json::to_string(&summary).unwrap_or_default();
            info!("Trip {} finished after {}s: {}", summary.trip_id, summary.duration_secs, record);
        } else {
            info!("Discarding short trip {} ({}s)", summary.trip_id, summary.duration_secs);
        }
        Ok(())
    }
}

fn log_events<E>(category: &'static str, mut rx: broadcast::Receiver<E>) -> JoinHandle<()>
where
    E: Debug + Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => info!("{} event: {:?}", category, event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("Missed {} {} events", missed, category)
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("{} events closed", category);
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use adapter_connection::ConnectionKind;
    use obd_lifecycle::ConnectionState;
    use obd_protocol::{ids, Metric};
    use query_strategy::QueryStrategyType;
    use std::time::Duration;

    fn mock_settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.connection.kind = ConnectionKind::Mock;
        settings.storage.path = dir.join("store.json");
        settings
    }

    #[test]
    fn test_persisted_selection_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        let settings = mock_settings(dir.path());
        {
            let store = JsonFileStore::open(&settings.storage.path).unwrap();
            PidSelections::new()
                .with_surface("gauge", [ids::MAF])
                .save(&store)
                .unwrap();
        }

        let app = App::build(settings).unwrap();
        let selections = app.selections().unwrap();
        assert_eq!(selections.surface("gauge").unwrap().len(), 1);
        // SHARED: union of every surface
        let query = app.initial_query().unwrap();
        assert!(query.contains(ids::MAF));
        assert!(query.contains(ids::VEHICLE_SPEED));
    }

    #[test]
    fn test_custom_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pids.json");
        std::fs::write(
            &path,
            r#"[{"id": 13, "mode": "01", "pid": "0C", "min": 0, "max": 16383.75,
                 "value_type": "int", "unit": "rpm", "description": "Engine speed"}]"#,
        )
        .unwrap();

        let registry = load_registry(Some(&path)).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(matches!(
            load_registry(Some(&dir.path().join("missing.json"))),
            Err(AppError::Read { .. })
        ));
    }

    #[tokio::test]
    async fn test_runs_against_mock_adapter() {
        let dir = tempfile::tempdir().unwrap();
        let app = App::build(mock_settings(dir.path())).unwrap();
        let mut state = app.lifecycle().watch_state();

        let aggregator = app.aggregator().clone();
        app.run_until(async move {
            tokio::time::timeout(Duration::from_secs(10), async {
                while aggregator.get(ids::ENGINE_RPM).is_none() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("no RPM metrics");
        })
        .await
        .unwrap();

        assert_eq!(*state.borrow_and_update(), ConnectionState::Stopped);
        assert!(app.aggregator().get(ids::ENGINE_RPM).unwrap().sample_count >= 1);
    }

    async fn wait_for_state(app: &App, target: ConnectionState) {
        let mut rx = app.lifecycle().watch_state();
        tokio::time::timeout(Duration::from_secs(30), async {
            while *rx.borrow_and_update() != target {
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap_or_else(|_| panic!("never reached {:?}", target));
    }

    fn recorded(app: &App) -> Arc<Mutex<Vec<Metric>>> {
        let metrics = Arc::new(Mutex::new(Vec::new()));
        let sink = metrics.clone();
        app.lifecycle()
            .pipeline()
            .observe(move |m| sink.lock().unwrap().push(m.clone()));
        metrics
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition never held");
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_pids_have_one_source() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = mock_settings(dir.path());
        settings.connection.poll_interval_ms = 10;
        settings.debug.generator_enabled = true;
        settings.debug.interval_ms = 10;

        let app = App::build(settings).unwrap();
        let metrics = recorded(&app);
        app.lifecycle().start(app.initial_query().unwrap()).await;
        wait_for_state(&app, ConnectionState::Connected).await;

        let seen = metrics.clone();
        wait_until(|| {
            let seen = seen.lock().unwrap();
            let speeds = seen.iter().filter(|m| m.pid_id == ids::VEHICLE_SPEED).count();
            speeds >= 5 && seen.iter().any(|m| m.pid_id == ids::ENGINE_LOAD)
        })
        .await;
        app.lifecycle().stop().await.unwrap();

        let metrics = metrics.lock().unwrap();
        // Generated samples carry no adapter reply
        for metric in metrics.iter().filter(|m| m.pid_id == ids::VEHICLE_SPEED) {
            assert!(metric.raw_response.is_empty());
        }
        assert!(metrics
            .iter()
            .filter(|m| m.pid_id == ids::ENGINE_LOAD)
            .all(|m| !m.raw_response.is_empty()));
        // One clock for both sources
        assert!(metrics.windows(2).all(|w| w[0].timestamp_ms <= w[1].timestamp_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_surface_reissues_individual_query() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = mock_settings(dir.path());
        settings.connection.poll_interval_ms = 10;
        settings.query.strategy = QueryStrategyType::Individual;

        let app = App::build(settings).unwrap();
        let metrics = recorded(&app);
        assert!(!app.initial_query().unwrap().contains(ids::MAF));

        app.lifecycle().start(app.initial_query().unwrap()).await;
        wait_for_state(&app, ConnectionState::Connected).await;

        assert!(matches!(
            app.switch_surface("nowhere"),
            Err(AppError::UnknownSurface(_))
        ));
        assert!(app.switch_surface("graph").unwrap());
        assert_eq!(app.active_surface(), "graph");
        assert_eq!(
            app.lifecycle().current_query(),
            Query::new(
                QueryStrategyType::Individual,
                [ids::ENGINE_RPM, ids::MAF, ids::INTAKE_MANIFOLD_PRESSURE]
            )
        );

        let seen = metrics.clone();
        wait_until(|| seen.lock().unwrap().iter().any(|m| m.pid_id == ids::MAF)).await;
        app.lifecycle().stop().await.unwrap();

        // Stopped: the switch is remembered for the next start
        assert!(!app.switch_surface("gauge").unwrap());
        assert!(!app.initial_query().unwrap().contains(ids::MAF));
    }
}
