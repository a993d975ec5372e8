//! Reader controller: one physical connector, many logical readers.
//!
//! A [`ReaderController`] owns a connector exclusively and keeps it
//! connected exactly while at least one tag operation or port observation is
//! defined, or while a one-shot port execution needs it. Requests are
//! serialized per kind on three workers:
//!
//! ```text
//!                      ┌──────────────┐
//! execute_tag_op ─────►│ tag worker   │──┐
//!                      └──────────────┘  │
//!                      ┌──────────────┐  │   ┌───────────┐
//! execute_port_op ────►│ port worker  │──┼──►│ connector │
//!                      └──────────────┘  │   └─────┬─────┘
//!                      ┌──────────────┐  │         │ driver threads
//! try_reconnect ──────►│ reconnect    │──┘         ▼
//!                      └──────────────┘   QueuedCallbackHandler
//! define/undefine ───► registry lock ───► connector   │
//!                                                     ▼
//!                                         operators / executors ─► callers
//! ```
//!
//! Lock order is registry lock, then connector lock. Executors never take the
//! registry lock and release the connector lock before waiting for a result.
//!
//! # Examples
//!
//! ```
//! use readerlink_controller::{ControllerConfig, ReaderController};
//! use readerlink_core::{Tag, TagOperation};
//! use readerlink_hardware::AnyConnector;
//! use readerlink_hardware::mock::MockConnector;
//!
//! # #[tokio::main]
//! # async fn main() -> readerlink_controller::Result<()> {
//! let (connector, _handle) = MockConnector::new();
//! let (controller, _events) = ReaderController::new(
//!     "Reader1",
//!     AnyConnector::Mock(connector),
//!     ControllerConfig::default(),
//! );
//!
//! let id = controller.next_id();
//! controller
//!     .define_tag_operation(id, "Dock", TagOperation::default(), |tag: Tag, _: &str| -> anyhow::Result<()> {
//!         println!("{:?}", tag.epc_hex());
//!         Ok(())
//!     })
//!     .await?;
//! assert!(controller.is_connected());
//!
//! controller.undefine_tag_operation(id, "Dock").await?;
//! assert!(!controller.is_connected());
//!
//! controller.dispose().await;
//! # Ok(())
//! # }
//! ```

use crate::callback::QueuedCallbackHandler;
use crate::caller::{Caller, SharedCaller};
use crate::config::ControllerConfig;
use crate::error::{ControllerError, Result};
use crate::event::ControllerEvent;
use crate::optimizer::{merge_results, split_on_epc_change};
use crate::receiver::{
    PortExecutor, PortObservator, ReceiverContext, ReceiverIndex, SharedErrorState, TagExecutor,
    TagOperator, lock,
};
use crate::worker::SerialWorker;
use readerlink_core::{
    Message, MessageKind, OperationResult, Port, PortObservation, PortOperation, Tag, TagOperation,
};
use readerlink_hardware::{
    AnyConnector, Capability, Connector, ConnectorCallback, ConnectorError, ReaderConfiguration,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Handle on a reader controller.
///
/// Cloning is cheap; all clones drive the same connector.
#[derive(Clone)]
pub struct ReaderController {
    inner: Arc<ControllerInner>,
}

/// Operators and observators by id, plus running port executions.
#[derive(Default)]
struct Registry {
    operators: HashMap<u32, Arc<TagOperator>>,
    observators: HashMap<u32, Arc<PortObservator>>,
    transient: usize,
}

impl Registry {
    /// Whether nothing needs the connection.
    fn is_idle(&self) -> bool {
        self.operators.is_empty() && self.observators.is_empty() && self.transient == 0
    }
}

pub(crate) struct ControllerInner {
    name: Arc<str>,
    connector: Arc<tokio::sync::Mutex<AnyConnector>>,
    index: Arc<ReceiverIndex>,
    handler: Arc<QueuedCallbackHandler>,
    registry: tokio::sync::Mutex<Registry>,
    connected: AtomicBool,
    reconnecting: AtomicBool,
    next_id: AtomicU32,
    config: Mutex<ControllerConfig>,
    properties: Mutex<HashMap<String, String>>,
    tag_worker: SerialWorker,
    port_worker: SerialWorker,
    reconnect_worker: SerialWorker,
    events: mpsc::UnboundedSender<ControllerEvent>,
    disposed: AtomicBool,
}

impl ReaderController {
    /// Create a controller around `connector`.
    ///
    /// Returns the controller and the receiving end of its monitoring
    /// channel. The connector is not connected until the first definition.
    /// Must be called from within a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        mut connector: AnyConnector,
        config: ControllerConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let name: Arc<str> = Arc::from(name.into());
        let (events, events_rx) = mpsc::unbounded_channel();
        let index = Arc::new(ReceiverIndex::default());

        let inner = Arc::new_cyclic(|weak| {
            let handler = Arc::new(QueuedCallbackHandler::new(
                index.clone(),
                weak.clone(),
                events.clone(),
                config.reader_cycle_duration,
            ));
            let callback: Arc<dyn ConnectorCallback> = handler.clone();
            connector.set_callback(callback);

            ControllerInner {
                name: name.clone(),
                connector: Arc::new(tokio::sync::Mutex::new(connector)),
                index,
                handler,
                registry: tokio::sync::Mutex::new(Registry::default()),
                connected: AtomicBool::new(false),
                reconnecting: AtomicBool::new(false),
                next_id: AtomicU32::new(1),
                properties: Mutex::new(config.to_properties()),
                config: Mutex::new(config),
                tag_worker: SerialWorker::spawn("tag"),
                port_worker: SerialWorker::spawn("port"),
                reconnect_worker: SerialWorker::spawn("reconnect"),
                events,
                disposed: AtomicBool::new(false),
            }
        });

        debug!("Created reader controller {}", name);
        (Self { inner }, events_rx)
    }

    /// Controller name, passed to every caller.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Next operation id. Never zero, unique within this controller.
    pub fn next_id(&self) -> u32 {
        self.inner.next_id()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// The callback handler registered with the connector.
    pub fn callback(&self) -> Arc<QueuedCallbackHandler> {
        self.inner.handler.clone()
    }

    /// Connect the connector unless already connected.
    ///
    /// # Errors
    ///
    /// Returns the connector error; retrying is up to the caller.
    pub async fn connect(&self) -> Result<()> {
        self.inner.ensure_live()?;
        let registry = self.inner.registry.lock().await;
        self.inner.connect_locked(&registry).await?;
        Ok(())
    }

    /// Disconnect, unless an operation or observation is still defined.
    ///
    /// Connector errors are logged.
    pub async fn disconnect(&self) {
        let registry = self.inner.registry.lock().await;
        self.inner.disconnect_locked(&registry).await;
    }

    /// Start reconnecting in the background.
    ///
    /// Returns `false` if a reconnection is already in progress or the
    /// controller is disposed.
    pub fn try_reconnect(&self) -> bool {
        self.inner.try_reconnect()
    }

    /// Subscribe the logical reader `name` to the tag operation `id`.
    ///
    /// The first subscription defines the operation on the connector,
    /// connecting first if needed. Later subscriptions to the same id share
    /// the existing definition and `operation` is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::OperationIdInUse`] if `id` belongs to a
    /// port observation or a running execution, otherwise the connector
    /// error of a failed connect or definition.
    pub async fn define_tag_operation(
        &self,
        id: u32,
        name: &str,
        operation: TagOperation,
        caller: impl Caller<Tag> + 'static,
    ) -> Result<()> {
        self.inner.ensure_live()?;
        let caller: SharedCaller<Tag> = Arc::new(caller);
        let mut registry = self.inner.registry.lock().await;

        if let Some(operator) = registry.operators.get(&id) {
            operator.add_caller(name, caller);
            debug!("{} joined tag operation {} on {}", name, id, self.inner.name);
            return Ok(());
        }
        self.inner.claim_id(id)?;

        self.inner.connect_locked(&registry).await?;
        let tid_tracking = lock(&self.inner.config).tid_tracking;
        match TagOperator::define(id, operation, tid_tracking, self.inner.context()).await {
            Ok(operator) => {
                operator.add_caller(name, caller);
                registry.operators.insert(id, operator);
                Ok(())
            }
            Err(e) => {
                self.inner.disconnect_locked(&registry).await;
                Err(e)
            }
        }
    }

    /// Unsubscribe the logical reader `name` from the tag operation `id`.
    ///
    /// Removing the last subscriber undefines the operation and disconnects
    /// if nothing else is defined. Connector errors during undefinition are
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownOperation`] if `id` is not defined.
    pub async fn undefine_tag_operation(&self, id: u32, name: &str) -> Result<()> {
        let mut registry = self.inner.registry.lock().await;
        let operator = registry
            .operators
            .get(&id)
            .cloned()
            .ok_or(ControllerError::UnknownOperation(id))?;

        if operator.remove_caller(name) > 0 {
            debug!("{} left tag operation {} on {}", name, id, self.inner.name);
            return Ok(());
        }

        registry.operators.remove(&id);
        if let Err(e) = operator.dispose().await {
            warn!("Failed to undefine tag operation {} on {}: {}", id, self.inner.name, e);
        }
        self.inner.disconnect_locked(&registry).await;
        Ok(())
    }

    /// Start delivering tags of the operation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownOperation`] if `id` is not defined.
    pub async fn enable_tag_operation(&self, id: u32) -> Result<()> {
        let registry = self.inner.registry.lock().await;
        let operator = registry
            .operators
            .get(&id)
            .ok_or(ControllerError::UnknownOperation(id))?;
        operator.enable().await;
        Ok(())
    }

    /// Stop delivering tags of the operation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownOperation`] if `id` is not defined.
    pub async fn disable_tag_operation(&self, id: u32) -> Result<()> {
        let registry = self.inner.registry.lock().await;
        let operator = registry
            .operators
            .get(&id)
            .ok_or(ControllerError::UnknownOperation(id))?;
        operator.disable().await;
        Ok(())
    }

    /// Subscribe the logical reader `name` to the port observation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::OperationIdInUse`] if `id` belongs to a
    /// tag operation or a running execution, otherwise the connector error of
    /// a failed connect or definition.
    pub async fn define_port_observation(
        &self,
        id: u32,
        name: &str,
        observation: PortObservation,
        caller: impl Caller<Port> + 'static,
    ) -> Result<()> {
        self.inner.ensure_live()?;
        let caller: SharedCaller<Port> = Arc::new(caller);
        let mut registry = self.inner.registry.lock().await;

        if let Some(observator) = registry.observators.get(&id) {
            observator.add_caller(name, caller);
            debug!("{} joined port observation {} on {}", name, id, self.inner.name);
            return Ok(());
        }
        self.inner.claim_id(id)?;

        self.inner.connect_locked(&registry).await?;
        match PortObservator::define(id, observation, self.inner.context()).await {
            Ok(observator) => {
                observator.add_caller(name, caller);
                registry.observators.insert(id, observator);
                Ok(())
            }
            Err(e) => {
                self.inner.disconnect_locked(&registry).await;
                Err(e)
            }
        }
    }

    /// Unsubscribe the logical reader `name` from the port observation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownOperation`] if `id` is not defined.
    pub async fn undefine_port_observation(&self, id: u32, name: &str) -> Result<()> {
        let mut registry = self.inner.registry.lock().await;
        let observator = registry
            .observators
            .get(&id)
            .cloned()
            .ok_or(ControllerError::UnknownOperation(id))?;

        if observator.remove_caller(name) > 0 {
            return Ok(());
        }

        registry.observators.remove(&id);
        if let Err(e) = observator.dispose().await {
            warn!("Failed to undefine port observation {} on {}: {}", id, self.inner.name, e);
        }
        self.inner.disconnect_locked(&registry).await;
        Ok(())
    }

    /// Start delivering events of the port observation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownOperation`] if `id` is not defined.
    pub async fn enable_port_observation(&self, id: u32) -> Result<()> {
        let registry = self.inner.registry.lock().await;
        let observator = registry
            .observators
            .get(&id)
            .ok_or(ControllerError::UnknownOperation(id))?;
        observator.enable().await;
        Ok(())
    }

    /// Stop delivering events of the port observation `id`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownOperation`] if `id` is not defined.
    pub async fn disable_port_observation(&self, id: u32) -> Result<()> {
        let registry = self.inner.registry.lock().await;
        let observator = registry
            .observators
            .get(&id)
            .ok_or(ControllerError::UnknownOperation(id))?;
        observator.disable().await;
        Ok(())
    }

    /// Subscribers of the tag operation `id`, by logical reader name.
    pub async fn tag_operation_callers(&self, id: u32) -> Option<Vec<String>> {
        let registry = self.inner.registry.lock().await;
        registry.operators.get(&id).map(|operator| operator.caller_names())
    }

    /// Number of defined tag operations and port observations.
    pub async fn defined_count(&self) -> usize {
        let registry = self.inner.registry.lock().await;
        registry.operators.len() + registry.observators.len()
    }

    /// Execute a tag operation once on behalf of the logical reader `name`.
    ///
    /// The job runs on the tag worker after every earlier tag execution.
    /// `caller` is invoked exactly once with one result per operation id:
    /// the real result, an empty result when not connected, or faults after
    /// a timeout or driver failure. When the connector loses track of tags
    /// whose EPC was written, the operation is split at every EPC change and
    /// `caller` receives the merged result of all parts.
    ///
    /// Returns once `caller` has been invoked.
    ///
    /// # Errors
    ///
    /// Returns an error only if the controller is disposed before the job
    /// runs.
    pub async fn execute_tag_operation(
        &self,
        name: &str,
        operation: TagOperation,
        caller: impl Caller<Tag> + 'static,
    ) -> Result<()> {
        self.inner.ensure_live()?;
        let caller: SharedCaller<Tag> = Arc::new(caller);
        let job = self
            .inner
            .clone()
            .run_tag_execution(name.to_string(), operation, caller);
        self.inner.tag_worker.run(job).await
    }

    /// Execute a port operation once.
    ///
    /// Connects for the duration of the execution and disconnects afterwards
    /// unless something else is defined. `caller` is invoked exactly once.
    ///
    /// # Errors
    ///
    /// Returns the connector error if connecting failed; `caller` then
    /// received an empty result.
    pub async fn execute_port_operation(
        &self,
        operation: PortOperation,
        caller: impl Caller<Port> + 'static,
    ) -> Result<()> {
        self.inner.ensure_live()?;
        let caller: SharedCaller<Port> = Arc::new(caller);
        let job = self.inner.clone().run_port_execution(operation, caller);
        self.inner.port_worker.run(job).await?
    }

    /// Read the reader configuration, connecting for the query if needed.
    ///
    /// # Errors
    ///
    /// Returns the connector error of a failed connect or query.
    pub async fn get_config(&self) -> Result<ReaderConfiguration> {
        self.inner.ensure_live()?;
        let registry = self.inner.registry.lock().await;
        self.inner.connect_locked(&registry).await?;
        let config = self.inner.connector.lock().await.get_config().await;
        self.inner.disconnect_locked(&registry).await;
        Ok(config?)
    }

    /// Query a connector capability by name, such as `"LostEPCOnWrite"`.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::UnknownCapability`] for an unknown name and
    /// the connector error if the query failed.
    pub async fn get_capability(&self, capability: &str) -> Result<bool> {
        let capability: Capability = capability
            .parse()
            .map_err(|_| ControllerError::UnknownCapability(capability.to_string()))?;
        Ok(self.inner.connector.lock().await.get_capability(capability).await?)
    }

    /// Apply a property map.
    ///
    /// `Controller.` keys update the controller configuration, all others are
    /// handed to the connector. Nothing changes if either side rejects the
    /// map.
    ///
    /// # Errors
    ///
    /// Returns the validation error of the first rejected property, or the
    /// connector error.
    pub async fn set_properties(&self, properties: &HashMap<String, String>) -> Result<()> {
        self.inner.ensure_live()?;
        let current = self.config();
        let (config, passthrough) = current.with_properties(properties)?;

        if !passthrough.is_empty() {
            self.inner
                .connector
                .lock()
                .await
                .set_properties(&passthrough)
                .await?;
        }

        let mut stored = lock(&self.inner.properties);
        stored.extend(passthrough);
        stored.extend(config.to_properties());
        *lock(&self.inner.config) = config;
        debug!("Applied {} properties to {}", properties.len(), self.inner.name);
        Ok(())
    }

    /// Every property applied so far, including the controller's own.
    pub fn properties(&self) -> HashMap<String, String> {
        lock(&self.inner.properties).clone()
    }

    /// Current controller configuration.
    pub fn config(&self) -> ControllerConfig {
        self.inner.config()
    }

    /// Tear the controller down.
    ///
    /// Stops the workers, undefines every operation and observation,
    /// disposes the connector and the callback handler. Failures are logged
    /// and never stop the remaining steps. Calling it again does nothing.
    pub async fn dispose(&self) {
        let inner = &self.inner;
        if inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("Disposing reader controller {}", inner.name);

        inner.tag_worker.shutdown().await;
        inner.port_worker.shutdown().await;
        inner.reconnect_worker.shutdown().await;

        {
            let mut registry = inner.registry.lock().await;
            for (id, operator) in registry.operators.drain() {
                if let Err(e) = operator.dispose().await {
                    warn!("Failed to undefine tag operation {} on {}: {}", id, inner.name, e);
                }
            }
            for (id, observator) in registry.observators.drain() {
                if let Err(e) = observator.dispose().await {
                    warn!("Failed to undefine port observation {} on {}: {}", id, inner.name, e);
                }
            }
            registry.transient = 0;
        }

        if let Err(e) = inner.connector.lock().await.dispose().await {
            warn!("Failed to dispose connector of {}: {}", inner.name, e);
        }
        inner.connected.store(false, Ordering::Release);
        inner.reconnecting.store(false, Ordering::Release);
        inner.handler.dispose().await;
    }
}

impl std::fmt::Debug for ReaderController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReaderController")
            .field("name", &self.inner.name)
            .field("connected", &self.is_connected())
            .field("reconnecting", &self.is_reconnecting())
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl ControllerInner {
    fn next_id(&self) -> u32 {
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Check that `id` is free and keep the counter from handing it out.
    fn claim_id(&self, id: u32) -> Result<()> {
        if self.index.contains(id) {
            return Err(ControllerError::OperationIdInUse(id));
        }
        if let Some(next) = id.checked_add(1) {
            self.next_id.fetch_max(next, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Next id not registered by any receiver.
    fn execution_id(&self) -> u32 {
        loop {
            let id = self.next_id();
            if !self.index.contains(id) {
                return id;
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(ControllerError::Disposed(self.name.to_string()));
        }
        Ok(())
    }

    fn config(&self) -> ControllerConfig {
        lock(&self.config).clone()
    }

    fn context(&self) -> ReceiverContext {
        ReceiverContext {
            controller: self.name.clone(),
            connector: self.connector.clone(),
            index: self.index.clone(),
        }
    }

    fn emit(&self, event: ControllerEvent) {
        if self.events.send(event).is_err() {
            trace!("No monitor listening on {}", self.name);
        }
    }

    /// Connect unless connected. Takes the registry to prove it is locked.
    async fn connect_locked(&self, _registry: &Registry) -> readerlink_hardware::Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        match self.connector.lock().await.connect().await {
            Ok(()) => {
                self.connected.store(true, Ordering::Release);
                info!("Connected {}", self.name);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to connect {}: {}", self.name, e);
                Err(e)
            }
        }
    }

    /// Disconnect if connected and nothing needs the connection.
    async fn disconnect_locked(&self, registry: &Registry) {
        if !registry.is_idle() || !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        match self.connector.lock().await.disconnect().await {
            Ok(()) => info!("Disconnected {}", self.name),
            Err(e) => warn!("Failed to disconnect {}: {}", self.name, e),
        }
    }

    /// Handle a message reported by the connector.
    pub(crate) fn on_message(self: &Arc<Self>, message: Message) {
        match message.kind {
            MessageKind::ConnectionLost if self.is_connected() => {
                warn!("{} lost its connection: {}", self.name, message.text);
                self.try_reconnect();
            }
            MessageKind::ConnectionLost => {
                debug!("{} reported a lost connection while disconnected", self.name);
            }
            MessageKind::Info => info!("{}: {}", self.name, message.text),
            MessageKind::Warning => warn!("{}: {}", self.name, message.text),
            MessageKind::Error => error!("{}: {}", self.name, message.text),
        }
    }

    /// Log an error returned by an executor, reconnecting if the connection
    /// is gone.
    fn report(self: &Arc<Self>, error: ConnectorError) {
        warn!("Execution on {} failed: {}", self.name, error);
        if error.is_connection_lost() {
            self.try_reconnect();
        }
    }

    fn try_reconnect(self: &Arc<Self>) -> bool {
        if self.is_disposed() {
            return false;
        }
        if self.reconnecting.swap(true, Ordering::AcqRel) {
            debug!("{} is already reconnecting", self.name);
            return false;
        }

        match self.reconnect_worker.submit(self.clone().reconnect()) {
            Ok(_) => true,
            Err(e) => {
                self.reconnecting.store(false, Ordering::Release);
                warn!("Cannot reconnect {}: {}", self.name, e);
                false
            }
        }
    }

    async fn reconnect(self: Arc<Self>) {
        {
            let _registry = self.registry.lock().await;
            if self.connected.swap(false, Ordering::AcqRel)
                && let Err(e) = self.connector.lock().await.disconnect().await
            {
                debug!("Disconnect before reconnecting {} failed: {}", self.name, e);
            }
        }

        let mut failure_reported = false;
        loop {
            let delay = self.config().reconnect_delay;
            tokio::time::sleep(delay).await;

            let registry = self.registry.lock().await;
            if self.is_connected() {
                debug!("{} was connected meanwhile", self.name);
                break;
            }
            if registry.is_idle() {
                debug!("Nothing defined on {}, giving up reconnection", self.name);
                break;
            }

            match self.connector.lock().await.connect().await {
                Ok(()) => {
                    self.connected.store(true, Ordering::Release);
                    info!("Reconnected {}", self.name);
                    if failure_reported {
                        self.emit(ControllerEvent::Reconnected {
                            reader: self.name.to_string(),
                        });
                    }
                    break;
                }
                Err(e) if !failure_reported => {
                    warn!("Failed to reconnect {}: {}", self.name, e);
                    self.emit(ControllerEvent::ConnectionFailed {
                        reader: self.name.to_string(),
                        error: e.to_string(),
                    });
                    failure_reported = true;
                }
                Err(e) => {
                    debug!("Reconnecting {} failed again: {}", self.name, e);
                }
            }
        }

        self.reconnecting.store(false, Ordering::Release);
    }

    async fn capability(&self, capability: Capability) -> bool {
        match self.connector.lock().await.get_capability(capability).await {
            Ok(supported) => supported,
            Err(e) => {
                debug!("Capability {} of {} unknown: {}", capability, self.name, e);
                false
            }
        }
    }

    async fn run_tag_execution(
        self: Arc<Self>,
        name: String,
        operation: TagOperation,
        caller: SharedCaller<Tag>,
    ) {
        let split = self.is_connected() && self.capability(Capability::LostEpcOnWrite).await;
        if !split {
            trace!("Executing tag operation for {} on {}", name, self.name);
            let executor = TagExecutor::new(
                self.execution_id(),
                operation,
                caller,
                SharedErrorState::new(),
                self.context(),
            );
            self.execute_tag_part(&executor).await;
            return;
        }

        let parts = split_on_epc_change(&operation);
        debug!(
            "Executing tag operation for {} on {} in {} parts",
            name,
            self.name,
            parts.len()
        );

        let collector = Arc::new(SplitCollector::new(operation, caller, self.name.clone()));
        let error_state = SharedErrorState::new();
        for part in parts {
            let executor = TagExecutor::new(
                self.execution_id(),
                part,
                collector.part_caller(),
                error_state.clone(),
                self.context(),
            );
            self.execute_tag_part(&executor).await;
        }
        collector.finish();
    }

    async fn execute_tag_part(self: &Arc<Self>, executor: &TagExecutor) {
        let config = self.config();
        let executed = executor
            .execute(
                self.is_connected(),
                config.execute_timeout,
                config.optimize_write_operations,
            )
            .await;
        if let Err(e) = executed {
            self.report(e);
        }
    }

    async fn run_port_execution(
        self: Arc<Self>,
        operation: PortOperation,
        caller: SharedCaller<Port>,
    ) -> Result<()> {
        {
            let mut registry = self.registry.lock().await;
            if let Err(e) = self.connect_locked(&registry).await {
                if let Err(e) = caller.invoke(Port::completed_empty(), &self.name) {
                    warn!("Caller of port execution on {} failed: {}", self.name, e);
                }
                return Err(e.into());
            }
            registry.transient += 1;
        }

        let executor = PortExecutor::new(self.execution_id(), operation, caller, self.context());
        if let Err(e) = executor.execute(self.config().execute_timeout).await {
            self.report(e);
        }
        drop(executor);

        let mut registry = self.registry.lock().await;
        registry.transient = registry.transient.saturating_sub(1);
        self.disconnect_locked(&registry).await;
        Ok(())
    }
}

/// Collects the results of a split tag operation for its single caller.
///
/// The caller is invoked once, from [`finish`](Self::finish) or on drop if
/// the execution was cancelled. Ids without a part result get a fault.
struct SplitCollector {
    operation: TagOperation,
    parts: Mutex<Vec<Tag>>,
    caller: Mutex<Option<SharedCaller<Tag>>>,
    controller: Arc<str>,
}

impl SplitCollector {
    fn new(operation: TagOperation, caller: SharedCaller<Tag>, controller: Arc<str>) -> Self {
        Self {
            operation,
            parts: Mutex::new(Vec::new()),
            caller: Mutex::new(Some(caller)),
            controller,
        }
    }

    fn part_caller(self: &Arc<Self>) -> SharedCaller<Tag> {
        let collector = self.clone();
        Arc::new(move |tag: Tag, _: &str| -> anyhow::Result<()> {
            lock(&collector.parts).push(tag);
            Ok(())
        })
    }

    fn finish(&self) {
        let Some(caller) = lock(&self.caller).take() else {
            return;
        };
        let parts = std::mem::take(&mut *lock(&self.parts));
        let mut merged = merge_results(parts);
        for op in &self.operation.operations {
            merged
                .results
                .entry(op.id().to_string())
                .or_insert_with(|| OperationResult::fault(op));
        }
        if let Err(e) = caller.invoke(merged, &self.controller) {
            warn!("Caller of split execution on {} failed: {}", self.controller, e);
        }
    }
}

impl Drop for SplitCollector {
    fn drop(&mut self) {
        self.finish();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readerlink_hardware::mock::MockConnector;

    fn controller() -> ReaderController {
        let (connector, _handle) = MockConnector::new();
        ReaderController::new("Reader1", AnyConnector::Mock(connector), ControllerConfig::default()).0
    }

    #[tokio::test]
    async fn test_next_id_skips_zero() {
        let controller = controller();
        controller.inner.next_id.store(u32::MAX, Ordering::Relaxed);

        assert_eq!(controller.next_id(), u32::MAX);
        assert_eq!(controller.next_id(), 1);
    }

    #[tokio::test]
    async fn test_defined_ids_are_not_handed_out_again() {
        let controller = controller();
        controller.inner.claim_id(40).unwrap();
        assert_eq!(controller.next_id(), 41);

        // Claiming a lower id leaves the counter alone
        controller.inner.claim_id(7).unwrap();
        assert_eq!(controller.next_id(), 42);

        controller.inner.claim_id(u32::MAX).unwrap();
        assert_eq!(controller.next_id(), 43);
    }

    #[tokio::test]
    async fn test_registry_idle_tracks_transient_use() {
        let mut registry = Registry::default();
        assert!(registry.is_idle());
        registry.transient = 1;
        assert!(!registry.is_idle());
    }

    #[tokio::test]
    async fn test_split_collector_fills_missing_ids() {
        use readerlink_core::{Field, MemoryBank, Operation};

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let caller: SharedCaller<Tag> = Arc::new(move |tag: Tag, _: &str| -> anyhow::Result<()> {
            sink.lock().unwrap().push(tag);
            Ok(())
        });
        let read_tid = Operation::read("a", Field::new(MemoryBank::Tid, 0, 32).unwrap());
        let read_user = Operation::read("b", Field::new(MemoryBank::User, 0, 16).unwrap());
        let operation = TagOperation::new(vec![], vec![read_tid.clone(), read_user]);

        let collector = Arc::new(SplitCollector::new(operation, caller, Arc::from("Reader1")));
        let part = collector.part_caller();
        part.invoke(
            Tag::new(vec![0x01]).with_result("a", OperationResult::success(&read_tid)),
            "Reader1",
        )
        .unwrap();
        drop(part);
        drop(collector);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].results["a"].is_success());
        assert!(!seen[0].results["b"].is_success());
    }

    #[tokio::test]
    async fn test_disposed_controller_rejects_requests() {
        let controller = controller();
        controller.dispose().await;
        controller.dispose().await;

        let result = controller
            .define_tag_operation(1, "Dock", TagOperation::default(), |_: Tag, _: &str| -> anyhow::Result<()> {
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(ControllerError::Disposed(_))));
        assert!(!controller.try_reconnect());
    }
}
