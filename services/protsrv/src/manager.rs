//! Protection manager
//!
//! Owns the gateway session and replays the startup sequence after every
//! recoverable gateway error:
//!
//! 1. connect and register the device list (when configured)
//! 2. read the scope's tags and classify them against the topology descriptor
//! 3. set every infeed-limit actuator to the start value
//! 4. subscribe measurements into the aggregator and command flags into the
//!    command channel
//! 5. start (or resume) the evaluator if protection is requested
//!
//! While connected it probes the session and executes commands raised by
//! the `UPDATE_REQUEST_TOPOLOGY` and `RUN_ONLINE_GRID_PROTECTION` flags.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use errors::GridResult;
use grid_aggregator::MeasurementAggregator;
use grid_model::{load_device_file, Topology, TopologyClassifier, TopologyDescriptor};

use crate::config::{ProtsrvConfig, TagConventions};
use crate::evaluator::{EvaluatorSettings, EvaluatorState, FaultEvaluator};
use crate::gateway::{write_all, ControlGateway, DataCallback, DataChange, SubscriptionHandle};

/// Commands raised by status flag changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerCommand {
    UpdateTopology,
    SetProtection(bool),
}

type CommandSender = mpsc::UnboundedSender<ManagerCommand>;

pub struct ProtectionManager {
    config: ProtsrvConfig,
    gateway: Arc<dyn ControlGateway>,
    aggregator: Arc<MeasurementAggregator>,
    evaluator: Arc<FaultEvaluator>,
    topology: RwLock<Arc<Topology>>,
    subscriptions: Mutex<Vec<SubscriptionHandle>>,
    /// Last value of the RUN flag; survives reconnects
    protection_requested: AtomicBool,
    startups: AtomicU64,
}

impl ProtectionManager {
    pub fn new(config: ProtsrvConfig, gateway: Arc<dyn ControlGateway>) -> Self {
        let aggregator = Arc::new(MeasurementAggregator::new(
            config.protection.aggregator_config(),
        ));
        let evaluator = Arc::new(FaultEvaluator::new(
            EvaluatorSettings::from_config(&config),
            Arc::clone(&aggregator),
            Arc::clone(&gateway),
        ));
        Self {
            config,
            gateway,
            aggregator,
            evaluator,
            topology: RwLock::new(Arc::new(Topology::default())),
            subscriptions: Mutex::new(Vec::new()),
            protection_requested: AtomicBool::new(true),
            startups: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ProtsrvConfig {
        &self.config
    }

    pub fn aggregator(&self) -> Arc<MeasurementAggregator> {
        Arc::clone(&self.aggregator)
    }

    pub fn evaluator(&self) -> Arc<FaultEvaluator> {
        Arc::clone(&self.evaluator)
    }

    /// Topology of the current session
    pub fn topology(&self) -> Arc<Topology> {
        Arc::clone(&self.topology.read())
    }

    /// Number of startup sequences attempted
    pub fn startups(&self) -> u64 {
        self.startups.load(Ordering::Relaxed)
    }

    pub fn protection_requested(&self) -> bool {
        self.protection_requested.load(Ordering::Acquire)
    }

    /// Run until `shutdown` fires or a non-recoverable error occurs
    pub async fn run(&self, shutdown: CancellationToken) -> GridResult<()> {
        let result = loop {
            if shutdown.is_cancelled() {
                break Ok(());
            }

            let (tx, mut rx) = mpsc::unbounded_channel();
            let outcome = match self.startup(&tx).await {
                Ok(()) => self.supervise(&tx, &mut rx, &shutdown).await,
                Err(e) => Err(e),
            };
            self.teardown().await;

            match outcome {
                Ok(()) => break Ok(()),
                Err(e) if e.is_recoverable() => {
                    warn!(
                        "Gateway session lost: {}, reconnecting in {:?}",
                        e,
                        self.config.gateway.reconnect_delay()
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break Ok(()),
                        _ = tokio::time::sleep(self.config.gateway.reconnect_delay()) => {},
                    }
                },
                Err(e) => {
                    error!("Protection aborted: {}", e);
                    break Err(e);
                },
            }
        };

        self.evaluator.terminate().await;
        info!("Protection manager stopped");
        result
    }

    async fn startup(&self, commands: &CommandSender) -> GridResult<()> {
        let attempt = self.startups.fetch_add(1, Ordering::Relaxed) + 1;
        let scope = self.config.service.scope.as_str();
        info!(endpoint = self.gateway.endpoint(), attempt, "Starting protection session");

        self.gateway.connect().await?;

        if let Some(path) = &self.config.service.device_path {
            let devices = load_device_file(path)?;
            let created = self.gateway.register_tags(scope, &devices).await?;
            info!(scope, devices = devices.len(), created, "Devices registered");
        }

        let topology = self.load_topology().await?;

        let limits = topology.controls_with_marker(&self.config.tags.limit_ctrl);
        if limits.is_empty() {
            warn!("No infeed-limit actuators in topology");
        } else {
            let written =
                write_all(self.gateway.as_ref(), &limits, self.config.tags.limit_start_value).await?;
            info!(
                written,
                limit = self.config.tags.limit_start_value,
                "Infeed limit set to start value"
            );
        }

        self.subscribe_all(&topology, commands).await?;

        if self.protection_requested() {
            self.enable_protection().await?;
        } else {
            info!("Protection not requested, evaluator stays idle");
        }
        Ok(())
    }

    async fn supervise(
        &self,
        commands: &CommandSender,
        rx: &mut mpsc::UnboundedReceiver<ManagerCommand>,
        shutdown: &CancellationToken,
    ) -> GridResult<()> {
        let mut ticker = tokio::time::interval(self.config.gateway.supervision_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    return Ok(());
                },
                _ = ticker.tick() => self.gateway.ping().await?,
                Some(command) = rx.recv() => self.handle_command(command, commands).await?,
            }
        }
    }

    async fn handle_command(&self, command: ManagerCommand, commands: &CommandSender) -> GridResult<()> {
        debug!(?command, "Command received");
        match command {
            ManagerCommand::UpdateTopology => self.reload_topology(commands).await,
            ManagerCommand::SetProtection(true) => {
                self.protection_requested.store(true, Ordering::Release);
                self.enable_protection().await
            },
            ManagerCommand::SetProtection(false) => {
                self.protection_requested.store(false, Ordering::Release);
                self.disable_protection().await
            },
        }
    }

    async fn enable_protection(&self) -> GridResult<()> {
        match self.evaluator.state() {
            EvaluatorState::Stopped => self.evaluator.start().await,
            EvaluatorState::Paused => self.evaluator.resume().await,
            EvaluatorState::Running => Ok(()),
        }
    }

    async fn disable_protection(&self) -> GridResult<()> {
        if self.evaluator.state() == EvaluatorState::Running {
            self.evaluator.pause().await?;
        }
        Ok(())
    }

    /// Read the scope's tags and classify them; installs the result
    async fn load_topology(&self) -> GridResult<Arc<Topology>> {
        let known = self.gateway.read_tags(&self.config.service.scope).await?;
        let descriptor = TopologyDescriptor::from_file(&self.config.service.topology_path)?;
        let topology = Arc::new(TopologyClassifier::classify(&descriptor, &known));

        self.aggregator.set_topology(&topology);
        self.evaluator.bind_topology(&topology);
        *self.topology.write() = Arc::clone(&topology);
        Ok(topology)
    }

    async fn reload_topology(&self, commands: &CommandSender) -> GridResult<()> {
        info!("Topology update requested");
        self.disable_protection().await?;
        self.unsubscribe_all().await;

        let topology = match self.load_topology().await {
            Ok(topology) => topology,
            Err(e) if e.is_recoverable() => return Err(e),
            Err(e) => {
                error!("Topology reload failed, keeping previous topology: {}", e);
                self.topology()
            },
        };
        self.subscribe_all(&topology, commands).await?;

        let flags = topology.status_with_marker(&self.config.tags.update_request_topology);
        write_all(self.gateway.as_ref(), &flags, 0.0).await?;

        if self.protection_requested() {
            self.enable_protection().await?;
        }
        info!(grid_id = %topology.grid_id, "Topology updated");
        Ok(())
    }

    async fn subscribe_all(&self, topology: &Topology, commands: &CommandSender) -> GridResult<()> {
        let scope = self.config.service.scope.as_str();
        let gateway = &self.config.gateway;

        let measurements = topology.measurement_tags();
        if !measurements.is_empty() {
            let aggregator = Arc::clone(&self.aggregator);
            let callback: DataCallback = Arc::new(move |change: DataChange| {
                aggregator.ingest(&change.tag, change.timestamp, change.value.as_f64());
            });
            let handle = self
                .gateway
                .subscribe(scope, &measurements, gateway.measurement_interval_ms, callback)
                .await?;
            self.subscriptions.lock().push(handle);
        }

        let tags = &self.config.tags;
        let flags: Vec<_> = topology
            .status
            .iter()
            .filter(|t| {
                t.name.contains(tags.update_request_topology.as_str())
                    || t.name.contains(tags.run_online_grid_protection.as_str())
            })
            .cloned()
            .collect();
        if !flags.is_empty() {
            let callback = command_callback(tags.clone(), commands.clone());
            let handle = self
                .gateway
                .subscribe(scope, &flags, gateway.status_interval_ms, callback)
                .await?;
            self.subscriptions.lock().push(handle);
        }

        debug!(
            measurements = measurements.len(),
            flags = flags.len(),
            "Subscriptions created"
        );
        Ok(())
    }

    async fn unsubscribe_all(&self) {
        let handles: Vec<_> = self.subscriptions.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = self.gateway.unsubscribe(handle).await {
                debug!(%handle, "Unsubscribe failed: {}", e);
            }
        }
    }

    /// Best-effort cleanup after a session ends
    async fn teardown(&self) {
        if let Err(e) = self.disable_protection().await {
            debug!("Could not report protection offline: {}", e);
        }
        self.unsubscribe_all().await;
        if let Err(e) = self.gateway.disconnect().await {
            debug!("Disconnect failed: {}", e);
        }
    }
}

/// Translate command flag changes into [`ManagerCommand`]s
fn command_callback(tags: TagConventions, commands: CommandSender) -> DataCallback {
    Arc::new(move |change: DataChange| {
        let value = change.value.as_f64().round() as i64;
        let command = if change.tag.contains(tags.update_request_topology.as_str()) {
            (value == 1).then_some(ManagerCommand::UpdateTopology)
        } else if change.tag.contains(tags.run_online_grid_protection.as_str()) {
            Some(ManagerCommand::SetProtection(value != 0))
        } else {
            None
        };
        if let Some(command) = command {
            if commands.send(command).is_err() {
                debug!(?command, "Session ended, command dropped");
            }
        }
    })
}
