//! Mock connector implementation for testing and development.
//!
//! This module provides an in-memory driver that can be scripted through a
//! handle: it records every call it receives, can refuse connections, can
//! answer executions from its own thread, stay silent or fail, and can push
//! arbitrary notifications through the registered callback.

use crate::{
    ConnectorError, Result,
    traits::{Capability, Connector, ConnectorCallback},
    types::ReaderConfiguration,
};
use readerlink_core::{
    Message, OperationResult, Pin, Port, PortObservation, PortOp, PortOperation, PortResult,
    ReaderEvent, ResultState, Tag, TagOperation,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// EPC reported when neither the filter nor the handle provides one.
const DEFAULT_EPC: [u8; 12] = [
    0x30, 0x08, 0x33, 0xB2, 0xDD, 0xD9, 0x01, 0x40, 0x00, 0x00, 0x00, 0x01,
];

/// How the mock reacts to `execute_*` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
    /// Accept and report a result from a driver thread.
    #[default]
    Respond,

    /// Accept and never report anything.
    Silent,

    /// Reject with a validation error.
    Reject,

    /// Fail with an implementation error.
    Fail,

    /// Fail with a disconnected error and drop the connection.
    Disconnect,
}

/// A call received by the mock connector.
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Connect,
    Disconnect,
    SetProperties(HashMap<String, String>),
    DefineTagOperation { id: u32, operation: TagOperation },
    UndefineTagOperation(u32),
    EnableTagOperation(u32),
    DisableTagOperation(u32),
    ExecuteTagOperation { id: u32, operation: TagOperation },
    AbortTagOperation(u32),
    DefinePortObservation { id: u32, observation: PortObservation },
    UndefinePortObservation(u32),
    EnablePortObservation(u32),
    DisablePortObservation(u32),
    ExecutePortOperation { id: u32, operation: PortOperation },
    Dispose,
}

#[derive(Default)]
struct MockState {
    connected: bool,
    disposed: bool,
    connect_failures: usize,
    fail_defines: bool,
    fail_enables: bool,
    tag_execution: ExecutionMode,
    port_execution: ExecutionMode,
    capabilities: HashSet<Capability>,
    result_states: HashMap<String, ResultState>,
    identity: Option<Tag>,
    calls: Vec<MockCall>,
    callback: Option<Arc<dyn ConnectorCallback>>,
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Mock connector for testing and development.
///
/// # Examples
///
/// ```
/// use readerlink_hardware::mock::{MockCall, MockConnector};
/// use readerlink_hardware::traits::Connector;
///
/// #[tokio::main]
/// async fn main() -> readerlink_hardware::Result<()> {
///     let (mut connector, handle) = MockConnector::new();
///
///     handle.fail_next_connects(1);
///     assert!(connector.connect().await.is_err());
///
///     connector.connect().await?;
///     assert!(handle.is_connected());
///     assert_eq!(handle.calls(), vec![MockCall::Connect, MockCall::Connect]);
///
///     Ok(())
/// }
/// ```
pub struct MockConnector {
    /// Device name
    name: String,

    /// State shared with the handle
    state: Arc<Mutex<MockState>>,
}

impl MockConnector {
    /// Create a new mock connector with the default name.
    ///
    /// Returns a tuple of (MockConnector, MockConnectorHandle) where the
    /// handle scripts the connector and inspects the calls it received.
    pub fn new() -> (Self, MockConnectorHandle) {
        Self::with_name("Mock Reader")
    }

    /// Create a new mock connector with a custom name.
    pub fn with_name(name: impl Into<String>) -> (Self, MockConnectorHandle) {
        let name = name.into();
        let state = Arc::new(Mutex::new(MockState::default()));

        let connector = Self {
            name: name.clone(),
            state: state.clone(),
        };
        let handle = MockConnectorHandle { name, state };

        (connector, handle)
    }

    fn record(&self, call: MockCall) -> MutexGuard<'_, MockState> {
        let mut state = lock(&self.state);
        state.calls.push(call);
        state
    }

    fn require_connected(&self, state: &MockState) -> Result<()> {
        if state.connected {
            Ok(())
        } else {
            Err(ConnectorError::validation(format!(
                "{} is not connected",
                self.name
            )))
        }
    }

    fn check_execution(&self, state: &mut MockState, mode: ExecutionMode) -> Result<()> {
        self.require_connected(state)?;
        match mode {
            ExecutionMode::Respond | ExecutionMode::Silent => Ok(()),
            ExecutionMode::Reject => Err(ConnectorError::validation("Execution rejected")),
            ExecutionMode::Fail => Err(ConnectorError::implementation("Execution failed")),
            ExecutionMode::Disconnect => {
                state.connected = false;
                Err(ConnectorError::disconnected(self.name.clone()))
            }
        }
    }

    fn tag_response(state: &MockState, operation: &TagOperation) -> Tag {
        let mut tag = Tag::from_filter(&operation.filter);
        if tag.epc.is_none() {
            tag = state
                .identity
                .clone()
                .unwrap_or_else(|| Tag::new(DEFAULT_EPC.to_vec()));
        }

        for op in &operation.operations {
            let result_state = state
                .result_states
                .get(op.id())
                .copied()
                .unwrap_or(ResultState::Success);

            let result = match op {
                _ if result_state != ResultState::Success => {
                    OperationResult::with_state(op, result_state)
                }
                readerlink_core::Operation::Read { field, .. } => OperationResult::Read {
                    state: ResultState::Success,
                    data: vec![0; usize::from(field.words()) * 2],
                },
                _ => {
                    tag.apply(op);
                    OperationResult::success(op)
                }
            };
            tag.results.insert(op.id().to_string(), result);
        }
        tag
    }

    fn port_response(state: &MockState, operation: &PortOperation) -> Port {
        let mut port = Port::completed_empty();
        port.completed = false;

        for op in &operation.operations {
            let result = match state.result_states.get(op.id()) {
                Some(&result_state) if result_state != ResultState::Success => PortResult {
                    state: result_state,
                    value: None,
                },
                _ => match op {
                    PortOp::Read { .. } => PortResult::success(Some(0)),
                    PortOp::Write { state, .. } => PortResult::success(Some(*state)),
                },
            };
            port.results.insert(op.id().to_string(), result);
        }
        port
    }
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Connector for MockConnector {
    async fn connect(&mut self) -> Result<()> {
        let mut state = self.record(MockCall::Connect);
        if state.disposed {
            return Err(ConnectorError::validation("Connector disposed"));
        }
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(ConnectorError::implementation(format!(
                "Connection to {} refused",
                self.name
            )));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let mut state = self.record(MockCall::Disconnect);
        state.connected = false;
        Ok(())
    }

    async fn set_properties(&mut self, properties: &HashMap<String, String>) -> Result<()> {
        self.record(MockCall::SetProperties(properties.clone()));
        Ok(())
    }

    fn set_callback(&mut self, callback: Arc<dyn ConnectorCallback>) {
        lock(&self.state).callback = Some(callback);
    }

    async fn get_capability(&self, capability: Capability) -> Result<bool> {
        Ok(lock(&self.state).capabilities.contains(&capability))
    }

    async fn get_config(&self) -> Result<ReaderConfiguration> {
        let state = lock(&self.state);
        self.require_connected(&state)?;
        Ok(ReaderConfiguration::new(self.name.clone())
            .with_firmware_version(readerlink_core::VERSION)
            .with_antennas(vec![1, 2])
            .with_pins(vec![Pin::input(1), Pin::output(1)]))
    }

    async fn define_tag_operation(&mut self, id: u32, operation: &TagOperation) -> Result<()> {
        let state = self.record(MockCall::DefineTagOperation {
            id,
            operation: operation.clone(),
        });
        self.require_connected(&state)?;
        if state.fail_defines {
            return Err(ConnectorError::implementation(format!(
                "Definition of tag operation {} rejected",
                id
            )));
        }
        Ok(())
    }

    async fn undefine_tag_operation(&mut self, id: u32) -> Result<()> {
        let state = self.record(MockCall::UndefineTagOperation(id));
        self.require_connected(&state)
    }

    async fn enable_tag_operation(&mut self, id: u32) -> Result<()> {
        let state = self.record(MockCall::EnableTagOperation(id));
        self.require_connected(&state)?;
        if state.fail_enables {
            return Err(ConnectorError::implementation("Enable failed"));
        }
        Ok(())
    }

    async fn disable_tag_operation(&mut self, id: u32) -> Result<()> {
        let state = self.record(MockCall::DisableTagOperation(id));
        self.require_connected(&state)
    }

    async fn execute_tag_operation(&mut self, id: u32, operation: &TagOperation) -> Result<()> {
        let mut state = self.record(MockCall::ExecuteTagOperation {
            id,
            operation: operation.clone(),
        });
        let mode = state.tag_execution;
        self.check_execution(&mut state, mode)?;

        if mode == ExecutionMode::Respond
            && let Some(callback) = state.callback.clone()
        {
            let tag = Self::tag_response(&state, operation);
            std::thread::spawn(move || callback.notify_tag(id, tag));
        }
        Ok(())
    }

    async fn abort_tag_operation(&mut self, id: u32) -> Result<()> {
        self.record(MockCall::AbortTagOperation(id));
        Ok(())
    }

    async fn define_port_observation(
        &mut self,
        id: u32,
        observation: &PortObservation,
    ) -> Result<()> {
        let state = self.record(MockCall::DefinePortObservation {
            id,
            observation: observation.clone(),
        });
        self.require_connected(&state)?;
        if state.fail_defines {
            return Err(ConnectorError::implementation(format!(
                "Definition of port observation {} rejected",
                id
            )));
        }
        Ok(())
    }

    async fn undefine_port_observation(&mut self, id: u32) -> Result<()> {
        let state = self.record(MockCall::UndefinePortObservation(id));
        self.require_connected(&state)
    }

    async fn enable_port_observation(&mut self, id: u32) -> Result<()> {
        let state = self.record(MockCall::EnablePortObservation(id));
        self.require_connected(&state)?;
        if state.fail_enables {
            return Err(ConnectorError::implementation("Enable failed"));
        }
        Ok(())
    }

    async fn disable_port_observation(&mut self, id: u32) -> Result<()> {
        let state = self.record(MockCall::DisablePortObservation(id));
        self.require_connected(&state)
    }

    async fn execute_port_operation(&mut self, id: u32, operation: &PortOperation) -> Result<()> {
        let mut state = self.record(MockCall::ExecutePortOperation {
            id,
            operation: operation.clone(),
        });
        let mode = state.port_execution;
        self.check_execution(&mut state, mode)?;

        if mode == ExecutionMode::Respond
            && let Some(callback) = state.callback.clone()
        {
            let port = Self::port_response(&state, operation);
            std::thread::spawn(move || callback.notify_port(id, port));
        }
        Ok(())
    }

    async fn dispose(&mut self) -> Result<()> {
        let mut state = self.record(MockCall::Dispose);
        state.disposed = true;
        state.connected = false;
        state.callback = None;
        Ok(())
    }
}

/// Handle for scripting a mock connector and inspecting its calls.
///
/// Notifications sent through the handle are delivered from a separate OS
/// thread, the way real drivers call back from their own threads. The call
/// returns once the callback has returned.
///
/// # Examples
///
/// ```
/// use readerlink_hardware::mock::{ExecutionMode, MockConnector};
/// use readerlink_hardware::Capability;
///
/// let (_connector, handle) = MockConnector::new();
///
/// handle.set_tag_execution(ExecutionMode::Silent);
/// handle.set_capability(Capability::LostEpcOnWrite, true);
/// assert!(handle.calls().is_empty());
/// ```
#[derive(Clone)]
pub struct MockConnectorHandle {
    /// Device name
    name: String,

    /// State shared with the connector
    state: Arc<Mutex<MockState>>,
}

impl MockConnectorHandle {
    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the connector is connected.
    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    /// Check if the connector was disposed.
    pub fn is_disposed(&self) -> bool {
        lock(&self.state).disposed
    }

    /// Make the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: usize) {
        lock(&self.state).connect_failures = count;
    }

    /// Make definitions fail.
    pub fn fail_defines(&self, fail: bool) {
        lock(&self.state).fail_defines = fail;
    }

    /// Make enabling fail.
    pub fn fail_enables(&self, fail: bool) {
        lock(&self.state).fail_enables = fail;
    }

    /// Set how tag executions are handled.
    pub fn set_tag_execution(&self, mode: ExecutionMode) {
        lock(&self.state).tag_execution = mode;
    }

    /// Set how port executions are handled.
    pub fn set_port_execution(&self, mode: ExecutionMode) {
        lock(&self.state).port_execution = mode;
    }

    /// Report a capability as present or absent.
    pub fn set_capability(&self, capability: Capability, enabled: bool) {
        let mut state = lock(&self.state);
        if enabled {
            state.capabilities.insert(capability);
        } else {
            state.capabilities.remove(&capability);
        }
    }

    /// Report `state` for every operation with the given id.
    pub fn set_result_state(&self, operation_id: impl Into<String>, state: ResultState) {
        lock(&self.state)
            .result_states
            .insert(operation_id.into(), state);
    }

    /// Tag reported by executions whose filter does not determine an EPC.
    pub fn set_identity(&self, tag: Tag) {
        lock(&self.state).identity = Some(tag);
    }

    /// All calls received so far.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of calls matching `predicate`.
    pub fn count_calls(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| predicate(c)).count()
    }

    /// Forget the recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    fn callback(&self) -> Result<Arc<dyn ConnectorCallback>> {
        lock(&self.state)
            .callback
            .clone()
            .ok_or_else(|| ConnectorError::validation("No callback registered"))
    }

    fn from_driver_thread<T: Send + 'static>(
        &self,
        notify: impl FnOnce(Arc<dyn ConnectorCallback>) -> T + Send + 'static,
    ) -> Result<T> {
        let callback = self.callback()?;
        std::thread::spawn(move || notify(callback))
            .join()
            .map_err(|_| ConnectorError::implementation("Driver thread panicked"))
    }

    /// Report a tag for operation `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if no callback is registered.
    pub fn emit_tag(&self, id: u32, tag: Tag) -> Result<()> {
        self.from_driver_thread(move |callback| callback.notify_tag(id, tag))
    }

    /// Report a port event for observation `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if no callback is registered.
    pub fn emit_port(&self, id: u32, port: Port) -> Result<()> {
        self.from_driver_thread(move |callback| callback.notify_port(id, port))
    }

    /// Send a message to the controller.
    ///
    /// # Errors
    ///
    /// Returns an error if no callback is registered.
    pub fn emit_message(&self, message: Message) -> Result<()> {
        self.from_driver_thread(move |callback| callback.notify_message(message))
    }

    /// Raise a reader event.
    ///
    /// # Errors
    ///
    /// Returns an error if no callback is registered.
    pub fn emit_event(&self, event: ReaderEvent) -> Result<()> {
        self.from_driver_thread(move |callback| callback.notify_event(event))
    }

    /// Drop the connection and tell the controller about it.
    ///
    /// # Errors
    ///
    /// Returns an error if no callback is registered.
    pub fn drop_connection(&self) -> Result<()> {
        lock(&self.state).connected = false;
        self.emit_message(Message::connection_lost(format!(
            "Connection to {} lost",
            self.name
        )))
    }

    /// Reserve a network port through the callback.
    ///
    /// # Errors
    ///
    /// Returns an error if no callback is registered or the pool is empty.
    pub fn request_network_port(&self) -> Result<u16> {
        self.from_driver_thread(|callback| callback.network_port())?
    }

    /// Release a network port through the callback.
    ///
    /// # Errors
    ///
    /// Returns an error if no callback is registered.
    pub fn release_network_port(&self, port: u16) -> Result<()> {
        self.from_driver_thread(move |callback| callback.reset_network_port(port))
    }

    /// Reader cycle duration reported by the callback.
    ///
    /// # Errors
    ///
    /// Returns an error if no callback is registered.
    pub fn reader_cycle_duration(&self) -> Result<Duration> {
        Ok(self.callback()?.reader_cycle_duration())
    }
}

impl std::fmt::Debug for MockConnectorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnectorHandle")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
