//! Connection lifecycle orchestrator

use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::state::{ConnectionState, LifecycleEvent};
use crate::worker::{self, WorkerHandle};
use adapter_connection::ConnectionFactory;
use metrics_pipeline::MetricsPipeline;
use obd_protocol::{MetricDecoder, PidRegistry};
use query_strategy::Query;
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info, warn};

pub(crate) struct Inner {
    pub config: LifecycleConfig,
    pub factory: Arc<dyn ConnectionFactory>,
    pub registry: Arc<PidRegistry>,
    pub decoder: Arc<dyn MetricDecoder>,
    pub pipeline: MetricsPipeline,
    pub query: watch::Sender<Query>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<LifecycleEvent>,
    /// Serializes start/stop transitions
    worker: Mutex<Option<WorkerHandle>>,
}

impl Inner {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            info!("Connection state: {} -> {}", previous, state);
        }
    }

    /// Move from `from` to `to` unless another transition got there first
    pub fn advance(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let advanced = self.state.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        });
        if advanced {
            info!("Connection state: {} -> {}", from, to);
        }
        advanced
    }

    pub fn publish(&self, event: LifecycleEvent) {
        debug!("Lifecycle event: {:?}", event);
        // Nobody listening is fine
        let _ = self.events.send(event);
    }
}

/// Handle on the orchestrator. Cheap to clone; every method may be called
/// from any task while the poll loop runs.
#[derive(Clone)]
pub struct ConnectionLifecycle {
    inner: Arc<Inner>,
}

impl ConnectionLifecycle {
    pub fn new(
        config: LifecycleConfig,
        factory: Arc<dyn ConnectionFactory>,
        registry: Arc<PidRegistry>,
        decoder: Arc<dyn MetricDecoder>,
        pipeline: MetricsPipeline,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (query, _) = watch::channel(Query::default());
        let (events, _) = broadcast::channel(64);

        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                registry,
                decoder,
                pipeline,
                query,
                state,
                events,
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Current state, replayed to late subscribers
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.inner.events.subscribe()
    }

    pub fn pipeline(&self) -> &MetricsPipeline {
        &self.inner.pipeline
    }

    pub fn current_query(&self) -> Query {
        self.inner.query.borrow().clone()
    }

    /// Connect and start polling `query`. A no-op while already connecting
    /// or connected.
    pub async fn start(&self, query: Query) {
        let mut worker = self.inner.worker.lock().await;

        let state = self.inner.state();
        if state.is_active() {
            info!("Ignoring start(): already {}", state);
            return;
        }
        if let Some(finished) = worker.take() {
            // Worker that ended on its own, e.g. after an error
            if let Err(e) = finished.task.await {
                warn!("Previous worker ended abnormally: {}", e);
            }
        }

        info!("Starting connection with {} PIDs", query.len());
        self.inner.query.send_replace(query);
        self.inner.set_state(ConnectionState::Connecting);
        self.inner.publish(LifecycleEvent::Connecting);
        *worker = Some(worker::spawn(Arc::clone(&self.inner)));
    }

    /// Stop polling and close the connection. Returns once the connection is
    /// closed and every processor has seen `on_stopped`.
    pub async fn stop(&self) -> Result<(), LifecycleError> {
        let mut worker = self.inner.worker.lock().await;

        let Some(handle) = worker.take() else {
            debug!("Ignoring stop(): not running");
            return Ok(());
        };
        if self.inner.state().is_active() {
            self.inner.set_state(ConnectionState::Stopping);
        }

        // Err only when the worker already exited
        let _ = handle.stop.send(true);
        let joined = handle.task.await;

        if self.inner.state() == ConnectionState::Stopping {
            // Worker exited before it saw the request
            self.inner.set_state(ConnectionState::Stopped);
            self.inner.publish(LifecycleEvent::Stopped);
        }
        joined.map_err(|e| {
            error!("Connection worker failed: {}", e);
            LifecycleError::Worker(e.to_string())
        })
    }

    /// Replace the polled PID set. Applies from the next poll cycle; ignored
    /// unless connected.
    pub fn update_query(&self, query: Query) -> Result<bool, LifecycleError> {
        let state = self.inner.state();
        if state != ConnectionState::Connected {
            debug!("Ignoring query update while {}", state);
            return Ok(false);
        }
        if let Some(unknown) = query.pid_ids.iter().find(|id| !self.inner.registry.contains(**id)) {
            return Err(LifecycleError::UnknownPid(*unknown));
        }

        info!("Query updated: {:?} {:?}", query.strategy, query.pid_ids);
        self.inner.query.send_replace(query);
        Ok(true)
    }
}
