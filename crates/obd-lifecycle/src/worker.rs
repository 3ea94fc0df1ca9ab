//! Connection worker: connect, initialize, poll, recover

use crate::lifecycle::Inner;
use crate::state::{ConnectionState, LifecycleEvent};
use adapter_connection::{transact, AdapterConnection, ConnectionError};
use obd_protocol::{PidDefinition, VehicleCapabilities};
use query_strategy::Query;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub(crate) struct WorkerHandle {
    pub stop: watch::Sender<bool>,
    pub task: JoinHandle<()>,
}

pub(crate) fn spawn(inner: Arc<Inner>) -> WorkerHandle {
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(run(inner, StopSignal(stop_rx)));
    WorkerHandle { stop, task }
}

/// Why the worker is leaving
enum Exit {
    Stopped,
    Failed(ConnectionError),
}

struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    /// Resolves once a stop was requested. Cancel safe.
    async fn requested(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                return;
            }
        }
    }

    async fn pause(&mut self, duration: Duration) -> Result<(), Exit> {
        tokio::select! {
            biased;
            _ = self.requested() => Err(Exit::Stopped),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}

async fn run(inner: Arc<Inner>, mut stop: StopSignal) {
    let query_rx = inner.query.subscribe();
    let mut session = Session {
        inner,
        query_rx,
        connection: None,
        capabilities: VehicleCapabilities::default(),
        running: false,
    };
    let exit = session.drive(&mut stop).await;
    session.finish(exit).await;
}

struct Session {
    inner: Arc<Inner>,
    query_rx: watch::Receiver<Query>,
    connection: Option<Box<dyn AdapterConnection>>,
    capabilities: VehicleCapabilities,
    /// Processors have seen `on_running`
    running: bool,
}

impl Session {
    async fn drive(&mut self, stop: &mut StopSignal) -> Exit {
        if let Err(exit) = self.establish(stop, false).await {
            return exit;
        }

        info!(
            "Connected to {} ({} supported PIDs)",
            self.capabilities.adapter.as_deref().unwrap_or("unknown adapter"),
            self.capabilities.supported_pids.len()
        );
        if !self
            .inner
            .advance(ConnectionState::Connecting, ConnectionState::Connected)
        {
            debug!("Stop requested while connecting");
            return Exit::Stopped;
        }
        self.running = true;
        self.inner.publish(LifecycleEvent::Connected);
        self.inner.pipeline.on_running(&self.capabilities);

        loop {
            match self.poll_cycle(stop).await {
                Ok(()) => {}
                Err(Exit::Failed(err)) if err.is_recoverable() => {
                    warn!("Connection lost: {}", err);
                    if let Err(exit) = self.establish(stop, true).await {
                        return exit;
                    }
                }
                Err(exit) => return exit,
            }
        }
    }

    /// Open and initialize the channel within the retry budget
    async fn establish(&mut self, stop: &mut StopSignal, mut reconnecting: bool) -> Result<(), Exit> {
        let mut failures = 0u32;
        loop {
            let attempt = tokio::select! {
                biased;
                _ = stop.requested() => return Err(Exit::Stopped),
                result = self.open(reconnecting) => result,
            };
            let err = match attempt {
                Ok(capabilities) => {
                    self.capabilities = capabilities;
                    return Ok(());
                }
                Err(err) if !err.is_recoverable() => return Err(Exit::Failed(err)),
                Err(err) => err,
            };

            failures += 1;
            let policy = self.inner.config.retry_policy(self.kind());
            if failures > policy.max_retries {
                error!("Giving up after {} retries: {}", policy.max_retries, err);
                return Err(Exit::Failed(err));
            }
            let delay = policy.delay(failures);
            warn!(
                "Connection attempt failed: {}; retry {}/{} in {:?}",
                err, failures, policy.max_retries, delay
            );
            stop.pause(delay).await?;
            reconnecting = true;
        }
    }

    fn kind(&self) -> adapter_connection::ConnectionKind {
        self.connection
            .as_ref()
            .map(|c| c.kind())
            .unwrap_or(self.inner.config.kind)
    }

    async fn open(&mut self, reconnecting: bool) -> Result<VehicleCapabilities, ConnectionError> {
        if reconnecting {
            metrics::counter!("obd_reconnects_total").increment(1);
        }

        let fresh = self.connection.is_none();
        if fresh {
            self.connection = Some(self.inner.factory.create()?);
        }
        let connection = self.channel()?;
        let result = if reconnecting && !fresh {
            connection.reconnect().await
        } else {
            connection.connect().await
        };

        match result {
            Err(ConnectionError::HardResetRequired) => {
                info!("Rebuilding {} transport", self.kind());
                if let Some(mut old) = self.connection.take() {
                    old.close().await;
                }
                self.connection = Some(self.inner.factory.create()?);
                self.channel()?.connect().await?;
            }
            other => other?,
        }

        self.initialize().await
    }

    fn channel(&mut self) -> Result<&mut (dyn AdapterConnection + 'static), ConnectionError> {
        self.connection.as_deref_mut().ok_or(ConnectionError::Closed)
    }

    /// Run the init sequence and read the vehicle's supported PIDs
    async fn initialize(&mut self) -> Result<VehicleCapabilities, ConnectionError> {
        let commands = self.inner.config.init_commands();
        let connection = self.channel()?;

        let mut adapter = None;
        for command in &commands {
            let reply = transact(connection, command).await?;
            let text = reply.as_deref().map(reply_text);
            debug!("{} -> {:?}", command, text);
            if command.eq_ignore_ascii_case("ATZ") {
                adapter = text.filter(|t| !t.is_empty());
            }
        }

        let capabilities = match transact(connection, "0100").await? {
            Some(raw) => VehicleCapabilities::from_supported_pids_reply(&raw).unwrap_or_else(|e| {
                warn!("Capability query failed, polling every PID: {}", e);
                VehicleCapabilities::default()
            }),
            None => VehicleCapabilities::default(),
        };
        Ok(match adapter {
            Some(adapter) => capabilities.with_adapter(adapter),
            None => capabilities,
        })
    }

    /// Definitions to poll this cycle
    fn scheduled(&mut self) -> Vec<PidDefinition> {
        let query = self.query_rx.borrow_and_update().clone();
        query
            .pid_ids
            .iter()
            .filter_map(|id| {
                let definition = self.inner.registry.get(*id);
                if definition.is_none() {
                    debug!("PID {} not in registry, skipped", id);
                }
                definition
            })
            .filter(|definition| !self.inner.config.synthesized_pids.contains(&definition.id))
            .filter(|definition| self.capabilities.supports(definition))
            .cloned()
            .collect()
    }

    async fn poll_cycle(&mut self, stop: &mut StopSignal) -> Result<(), Exit> {
        let definitions = self.scheduled();
        if definitions.is_empty() {
            return stop.pause(Duration::from_millis(self.inner.config.idle_interval_ms)).await;
        }

        for definition in &definitions {
            let result = tokio::select! {
                biased;
                _ = stop.requested() => return Err(Exit::Stopped),
                result = self.poll(definition) => result,
            };
            result.map_err(Exit::Failed)?;
        }

        match self.inner.config.poll_interval_ms {
            0 => Ok(()),
            ms => stop.pause(Duration::from_millis(ms)).await,
        }
    }

    async fn poll(&mut self, definition: &PidDefinition) -> Result<(), ConnectionError> {
        let connection = self.connection.as_deref_mut().ok_or(ConnectionError::Closed)?;
        let Some(raw) = transact(connection, &definition.command()).await? else {
            debug!("No reply for PID {}, dropped", definition.id);
            return Ok(());
        };

        let timestamp_ms = self.inner.pipeline.session_ms();
        match self.inner.decoder.decode(definition, &raw, timestamp_ms) {
            Ok(metric) => {
                metrics::counter!("obd_metrics_decoded_total").increment(1);
                self.inner.pipeline.post_value(&metric);
            }
            Err(e) => {
                metrics::counter!("obd_decode_errors_total").increment(1);
                debug!("Dropped reply for PID {}: {}", definition.id, e);
            }
        }
        Ok(())
    }

    /// Close the channel, then notify processors, then publish the outcome
    async fn finish(&mut self, exit: Exit) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        if self.running {
            self.inner.pipeline.on_stopped();
        }

        match exit {
            Exit::Stopped => {
                self.inner.set_state(ConnectionState::Stopped);
                self.inner.publish(LifecycleEvent::Stopped);
            }
            Exit::Failed(err) => {
                error!("Connection failed: {}", err);
                self.inner.set_state(ConnectionState::Error);
                self.inner.publish(LifecycleEvent::for_failure(&err));
            }
        }
    }
}

/// Printable reply body without the prompt and line breaks
fn reply_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .split(|c: char| c == '\r' || c == '\n' || c == '>')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_text() {
        assert_eq!(reply_text(b"ATZ\r\rELM327 v1.5\r\r>"), "ATZ ELM327 v1.5");
        assert_eq!(reply_text(b"\r\r>"), "");
    }
}
