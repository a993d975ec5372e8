//! One-shot executions: tag executors and port executors.
//!
//! An executor registers itself, asks the connector to execute and waits for
//! the result notification with a timeout. Whatever happens, its caller is
//! invoked exactly once with one result per requested operation id, and its
//! registration is removed exactly once.
//!
//! ```text
//! execute() ──► connector.execute_*(id) ──► wait (timeout)
//!                        │                      ▲
//!                        └─► driver thread ─► receive() ─► caller
//! ```

use super::{Receiver, ReceiverContext, Registration, lock};
use crate::caller::SharedCaller;
use crate::optimizer::optimize_writes;
use readerlink_core::{OperationResult, Port, PortOperation, PortResult, Tag, TagOperation};
use readerlink_hardware::{Connector, ConnectorError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Error flag shared by the executors of one split tag operation.
///
/// Executors of a split run one after another, so the flag has a single
/// writer at a time. Once set, the remaining parts are answered with faults
/// without reaching the connector; a fully successful result clears it.
#[derive(Debug, Clone, Default)]
pub struct SharedErrorState(Arc<Mutex<bool>>);

impl SharedErrorState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        *lock(&self.0)
    }

    pub(crate) fn set(&self) {
        *lock(&self.0) = true;
    }

    pub(crate) fn clear(&self) {
        *lock(&self.0) = false;
    }
}

/// Executes one tag operation once.
pub struct TagExecutor {
    id: u32,
    operation: TagOperation,
    caller: Mutex<Option<SharedCaller<Tag>>>,
    completion: Mutex<Option<oneshot::Sender<()>>>,
    synthetic: Mutex<BTreeMap<String, OperationResult>>,
    error_state: SharedErrorState,
    context: ReceiverContext,
    registration: Registration,
}

impl TagExecutor {
    pub(crate) fn new(
        id: u32,
        operation: TagOperation,
        caller: SharedCaller<Tag>,
        error_state: SharedErrorState,
        context: ReceiverContext,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            operation,
            caller: Mutex::new(Some(caller)),
            completion: Mutex::new(None),
            synthetic: Mutex::new(BTreeMap::new()),
            error_state,
            registration: Registration::new(
                context.index.clone(),
                id,
                Receiver::TagExecutor(weak.clone()),
            ),
            context,
        })
    }

    /// Execution id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Run the execution and deliver its result.
    ///
    /// Timeouts and driver failures are answered with fault results; only
    /// driver failures other than validation errors are returned, so the
    /// controller can report them.
    pub(crate) async fn execute(
        &self,
        connected: bool,
        timeout: Duration,
        optimize: bool,
    ) -> Result<()> {
        let outcome = self.run(connected, timeout, optimize).await;
        self.registration.remove();
        outcome
    }

    async fn run(&self, connected: bool, timeout: Duration, optimize: bool) -> Result<()> {
        if !connected {
            debug!("Not connected, answering execution {} with an empty result", self.id);
            self.deliver(Tag::completed_empty());
            return Ok(());
        }
        if self.error_state.is_set() {
            debug!("Execution {} skipped after a failed sibling", self.id);
            self.deliver(self.fault_tag());
            return Ok(());
        }

        if !self.registration.is_registered() {
            self.error_state.set();
            self.deliver(self.fault_tag());
            return Err(id_in_use(self.id));
        }

        let operation = if optimize {
            let (optimized, synthetic) = optimize_writes(&self.operation);
            *lock(&self.synthetic) = synthetic;
            optimized
        } else {
            self.operation.clone()
        };

        let (completion, completed) = oneshot::channel();
        *lock(&self.completion) = Some(completion);

        let started = self
            .context
            .connector
            .lock()
            .await
            .execute_tag_operation(self.id, &operation)
            .await;

        match started {
            Err(e) if e.is_validation() => {
                debug!("Execution {} rejected: {}", self.id, e);
                self.deliver(Tag::completed_empty());
                Ok(())
            }
            Err(e) => {
                self.error_state.set();
                self.deliver(self.fault_tag());
                Err(e)
            }
            Ok(()) => {
                if !matches!(tokio::time::timeout(timeout, completed).await, Ok(Ok(()))) {
                    warn!(
                        "Execution {} on {} timed out after {}ms",
                        self.id,
                        self.context.controller,
                        timeout.as_millis()
                    );
                    self.error_state.set();
                    self.registration.remove();
                    self.abort().await;
                    self.deliver(self.fault_tag());
                }
                Ok(())
            }
        }
    }

    async fn abort(&self) {
        let aborted = self
            .context
            .connector
            .lock()
            .await
            .abort_tag_operation(self.id)
            .await;
        if let Err(e) = aborted {
            warn!("Failed to abort execution {}: {}", self.id, e);
        }
    }

    pub(crate) fn receive(&self, mut tag: Tag) {
        let mut reported = std::mem::take(&mut tag.results);
        let synthetic = std::mem::take(&mut *lock(&self.synthetic));
        tag.apply_filter(&self.operation.filter);

        for op in &self.operation.operations {
            let result = reported
                .remove(op.id())
                .or_else(|| synthetic.get(op.id()).cloned())
                .unwrap_or_else(|| OperationResult::fault(op));

            if result.is_success() {
                tag.apply(op);
            }
            tag.results.insert(op.id().to_string(), result);
        }

        if tag.results.values().all(OperationResult::is_success) {
            self.error_state.clear();
        } else {
            self.error_state.set();
        }

        self.deliver(tag);
        if let Some(completion) = lock(&self.completion).take() {
            let _ = completion.send(());
        }
    }

    /// A result answering every requested id with a fault.
    fn fault_tag(&self) -> Tag {
        let mut tag = Tag::from_filter(&self.operation.filter);
        for op in &self.operation.operations {
            tag.results
                .insert(op.id().to_string(), OperationResult::fault(op));
        }
        tag
    }

    fn deliver(&self, mut tag: Tag) {
        let Some(caller) = lock(&self.caller).take() else {
            return;
        };
        tag.completed = true;
        if let Err(e) = caller.invoke(tag, &self.context.controller) {
            warn!("Caller of execution {} failed: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for TagExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagExecutor")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("error_state", &self.error_state)
            .finish_non_exhaustive()
    }
}

impl Drop for TagExecutor {
    fn drop(&mut self) {
        // Cancelled before a result was delivered
        let fault = self.fault_tag();
        self.deliver(fault);
    }
}

/// Executes one port operation once.
pub struct PortExecutor {
    id: u32,
    operation: PortOperation,
    caller: Mutex<Option<SharedCaller<Port>>>,
    completion: Mutex<Option<oneshot::Sender<()>>>,
    context: ReceiverContext,
    registration: Registration,
}

impl PortExecutor {
    pub(crate) fn new(
        id: u32,
        operation: PortOperation,
        caller: SharedCaller<Port>,
        context: ReceiverContext,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            id,
            operation,
            caller: Mutex::new(Some(caller)),
            completion: Mutex::new(None),
            registration: Registration::new(
                context.index.clone(),
                id,
                Receiver::PortExecutor(weak.clone()),
            ),
            context,
        })
    }

    /// Execution id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Run the execution and deliver its result.
    ///
    /// A connector failure is answered with an empty result and returned.
    pub(crate) async fn execute(&self, timeout: Duration) -> Result<()> {
        if !self.registration.is_registered() {
            self.deliver(Port::completed_empty());
            return Err(id_in_use(self.id));
        }

        let (completion, completed) = oneshot::channel();
        *lock(&self.completion) = Some(completion);

        let started = self
            .context
            .connector
            .lock()
            .await
            .execute_port_operation(self.id, &self.operation)
            .await;

        let outcome = match started {
            Err(e) => {
                self.deliver(Port::completed_empty());
                Err(e)
            }
            Ok(()) => {
                if !matches!(tokio::time::timeout(timeout, completed).await, Ok(Ok(()))) {
                    warn!(
                        "Port execution {} on {} timed out after {}ms",
                        self.id,
                        self.context.controller,
                        timeout.as_millis()
                    );
                    self.registration.remove();
                    self.deliver(self.fault_port());
                }
                Ok(())
            }
        };
        self.registration.remove();
        outcome
    }

    pub(crate) fn receive(&self, mut port: Port) {
        let mut reported = std::mem::take(&mut port.results);
        for op in &self.operation.operations {
            let result = reported
                .remove(op.id())
                .unwrap_or_else(PortResult::fault);
            port.results.insert(op.id().to_string(), result);
        }

        self.deliver(port);
        if let Some(completion) = lock(&self.completion).take() {
            let _ = completion.send(());
        }
    }

    fn fault_port(&self) -> Port {
        let mut port = Port::completed_empty();
        for op in &self.operation.operations {
            port.results.insert(op.id().to_string(), PortResult::fault());
        }
        port
    }

    fn deliver(&self, mut port: Port) {
        let Some(caller) = lock(&self.caller).take() else {
            return;
        };
        port.completed = true;
        if let Err(e) = caller.invoke(port, &self.context.controller) {
            warn!("Caller of port execution {} failed: {}", self.id, e);
        }
    }
}

impl std::fmt::Debug for PortExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortExecutor")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .finish_non_exhaustive()
    }
}

impl Drop for PortExecutor {
    fn drop(&mut self) {
        let fault = self.fault_port();
        self.deliver(fault);
    }
}

fn id_in_use(id: u32) -> ConnectorError {
    ConnectorError::implementation(format!("Execution id {} is already in use", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::ReceiverIndex;
    use readerlink_core::{
        Field, Filter, MemoryBank, Operation, Pin, PortOp, ResultState,
    };
    use readerlink_hardware::AnyConnector;
    use readerlink_hardware::mock::{ExecutionMode, MockCall, MockConnector, MockConnectorHandle};

    fn context() -> (ReceiverContext, MockConnectorHandle) {
        let (connector, handle) = MockConnector::new();
        let context = ReceiverContext {
            controller: Arc::from("Reader1"),
            connector: Arc::new(tokio::sync::Mutex::new(AnyConnector::Mock(connector))),
            index: Arc::new(ReceiverIndex::default()),
        };
        (context, handle)
    }

    async fn connected_context() -> (ReceiverContext, MockConnectorHandle) {
        let (context, handle) = context();
        context.connector.lock().await.connect().await.unwrap();
        (context, handle)
    }

    fn recording<T: Send + 'static>() -> (SharedCaller<T>, Arc<Mutex<Vec<T>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let caller: SharedCaller<T> = Arc::new(move |value: T, _: &str| -> anyhow::Result<()> {
            sink.lock().unwrap().push(value);
            Ok(())
        });
        (caller, seen)
    }

    fn user_write(id: &str, offset: u16, length: u16) -> Operation {
        let data = vec![0x55; usize::from(length).div_ceil(8)];
        Operation::write(id, Field::new(MemoryBank::User, offset, length).unwrap(), data).unwrap()
    }

    #[tokio::test]
    async fn test_not_connected_delivers_empty_result() {
        let (context, handle) = context();
        let (caller, seen) = recording();
        let executor = TagExecutor::new(
            1,
            TagOperation::new(vec![], vec![user_write("w", 0, 16)]),
            caller,
            SharedErrorState::new(),
            context.clone(),
        );

        executor.execute(false, Duration::from_secs(1), true).await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].completed);
        assert!(seen[0].results.is_empty());
        assert!(handle.calls().is_empty());
        assert_eq!(context.index.len(), 0);
    }

    #[tokio::test]
    async fn test_error_state_skips_connector() {
        let (context, handle) = connected_context().await;
        let (caller, seen) = recording();
        let error_state = SharedErrorState::new();
        error_state.set();

        let executor = TagExecutor::new(
            1,
            TagOperation::new(vec![], vec![user_write("w", 0, 16)]),
            caller,
            error_state,
            context,
        );
        executor.execute(true, Duration::from_secs(1), true).await.unwrap();

        assert_eq!(seen.lock().unwrap()[0].results["w"].state(), ResultState::MiscErrorTotal);
        assert_eq!(
            handle.count_calls(|c| matches!(c, MockCall::ExecuteTagOperation { .. })),
            0
        );
    }

    #[tokio::test]
    async fn test_receive_merges_synthetic_results() {
        let (context, handle) = connected_context().await;
        let (caller, seen) = recording();
        let operation = TagOperation::new(
            vec![],
            vec![user_write("a", 16, 16), user_write("b", 0, 64)],
        );
        handle.set_tag_execution(ExecutionMode::Silent);
        let executor = TagExecutor::new(7, operation, caller, SharedErrorState::new(), context);

        let running = tokio::spawn({
            let executor = executor.clone();
            async move { executor.execute(true, Duration::from_secs(2), true).await }
        });
        while handle.count_calls(|c| matches!(c, MockCall::ExecuteTagOperation { .. })) == 0 {
            tokio::task::yield_now().await;
        }

        // Only the covering write is reported by the driver
        executor.receive(Tag::new(vec![0x01]).with_result(
            "b",
            OperationResult::Write {
                state: ResultState::Success,
                words_written: 4,
            },
        ));
        running.await.unwrap().unwrap();

        let sent = handle.calls().into_iter().find_map(|c| match c {
            MockCall::ExecuteTagOperation { operation, .. } => Some(operation),
            _ => None,
        });
        assert_eq!(sent.unwrap().operation_ids().collect::<Vec<_>>(), vec!["b"]);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].results["a"].is_success());
        assert!(seen[0].results["b"].is_success());
    }

    #[tokio::test]
    async fn test_receive_restores_filter_identity_and_applies_writes() {
        let (context, _handle) = connected_context().await;
        let (caller, seen) = recording();
        let epc = Field::new(MemoryBank::Epc, 32, 16).unwrap();
        let operation = TagOperation::new(
            vec![Filter::equals(MemoryBank::Epc, 32, vec![0x11, 0x11]).unwrap()],
            vec![Operation::write("w", epc, vec![0x22, 0x22]).unwrap()],
        );
        let error_state = SharedErrorState::new();
        let executor = TagExecutor::new(2, operation, caller, error_state.clone(), context);

        // Driver reports the tag under its new EPC
        let reported = Tag::new(vec![0x22, 0x22]).with_result(
            "w",
            OperationResult::Write {
                state: ResultState::Success,
                words_written: 1,
            },
        );
        executor.receive(reported);

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].epc, Some(vec![0x22, 0x22]));
        assert!(!error_state.is_set());
    }

    #[tokio::test]
    async fn test_missing_result_is_fault_and_sets_error_state() {
        let (context, _handle) = connected_context().await;
        let (caller, seen) = recording();
        let operation = TagOperation::new(vec![], vec![user_write("w", 0, 16)]);
        let error_state = SharedErrorState::new();
        let executor = TagExecutor::new(2, operation, caller, error_state.clone(), context);

        executor.receive(Tag::new(vec![0x01, 0x02]));

        assert_eq!(seen.lock().unwrap()[0].results["w"], OperationResult::fault(&user_write("w", 0, 16)));
        assert!(error_state.is_set());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_faults_every_id_and_aborts() {
        let (context, handle) = connected_context().await;
        handle.set_tag_execution(ExecutionMode::Silent);
        let (caller, seen) = recording();
        let operation = TagOperation::new(
            vec![],
            vec![
                user_write("w1", 0, 16),
                Operation::read("r", Field::new(MemoryBank::Tid, 0, 32).unwrap()),
            ],
        );
        let error_state = SharedErrorState::new();
        let executor = TagExecutor::new(4, operation, caller, error_state.clone(), context.clone());

        let started = tokio::time::Instant::now();
        executor.execute(true, Duration::from_millis(3000), true).await.unwrap();
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(3000));
        assert!(elapsed < Duration::from_millis(3100));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(
            seen[0]
                .results
                .values()
                .all(|r| r.state() == ResultState::MiscErrorTotal)
        );
        assert_eq!(seen[0].results.len(), 2);
        assert!(error_state.is_set());
        assert_eq!(handle.count_calls(|c| matches!(c, MockCall::AbortTagOperation(4))), 1);
        assert_eq!(context.index.len(), 0);
    }

    #[tokio::test]
    async fn test_validation_error_delivers_empty_result() {
        let (context, handle) = connected_context().await;
        handle.set_tag_execution(ExecutionMode::Reject);
        let (caller, seen) = recording();
        let executor = TagExecutor::new(
            1,
            TagOperation::new(vec![], vec![user_write("w", 0, 16)]),
            caller,
            SharedErrorState::new(),
            context,
        );

        executor.execute(true, Duration::from_secs(1), true).await.unwrap();
        assert!(seen.lock().unwrap()[0].results.is_empty());
    }

    #[tokio::test]
    async fn test_driver_failure_is_returned() {
        let (context, handle) = connected_context().await;
        handle.set_tag_execution(ExecutionMode::Disconnect);
        let (caller, seen) = recording();
        let error_state = SharedErrorState::new();
        let executor = TagExecutor::new(
            1,
            TagOperation::new(vec![], vec![user_write("w", 0, 16)]),
            caller,
            error_state.clone(),
            context,
        );

        let error = executor.execute(true, Duration::from_secs(1), true).await.unwrap_err();
        assert!(error.is_connection_lost());
        assert!(error_state.is_set());
        assert!(!seen.lock().unwrap()[0].results["w"].is_success());
    }

    #[tokio::test]
    async fn test_dropped_executor_still_answers() {
        let (context, _handle) = context();
        let (caller, seen) = recording();
        let executor = TagExecutor::new(
            1,
            TagOperation::new(vec![], vec![user_write("w", 0, 16)]),
            caller,
            SharedErrorState::new(),
            context.clone(),
        );

        drop(executor);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(context.index.len(), 0);
    }

    #[tokio::test]
    async fn test_occupied_id_faults_without_driver_call() {
        let (context, handle) = connected_context().await;
        assert!(context.index.add(4, Receiver::TagOperator(std::sync::Weak::new())));
        let (caller, seen) = recording();
        let executor = TagExecutor::new(
            4,
            TagOperation::new(vec![], vec![user_write("w", 0, 16)]),
            caller,
            SharedErrorState::new(),
            context.clone(),
        );

        let result = executor.execute(true, Duration::from_secs(1), true).await;

        assert!(result.is_err());
        assert_eq!(seen.lock().unwrap()[0].results["w"].state(), ResultState::MiscErrorTotal);
        assert!(handle.calls().iter().all(|c| !matches!(c, MockCall::ExecuteTagOperation { .. })));
        drop(executor);
        assert!(matches!(context.index.get(4), Some(Receiver::TagOperator(_))));
    }

    #[tokio::test]
    async fn test_port_execution_fills_missing_results() {
        let (context, _handle) = connected_context().await;
        let (caller, seen) = recording();
        let operation = PortOperation::new(vec![
            PortOp::Write {
                id: "out".to_string(),
                pin: Pin::output(1),
                state: 1,
            },
            PortOp::Read {
                id: "in".to_string(),
                pin: Pin::input(1),
            },
        ]);
        let executor = PortExecutor::new(3, operation, caller, context);

        executor.receive(Port::completed_empty().with_result("out", PortResult::success(Some(1))));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].results["out"], PortResult::success(Some(1)));
        assert_eq!(seen[0].results["in"], PortResult::fault());
    }

    #[tokio::test]
    async fn test_port_execution_failure_delivers_empty_port() {
        let (context, handle) = connected_context().await;
        handle.set_port_execution(ExecutionMode::Fail);
        let (caller, seen) = recording();
        let executor = PortExecutor::new(3, PortOperation::default(), caller, context.clone());

        assert!(executor.execute(Duration::from_secs(1)).await.is_err());
        let seen = seen.lock().unwrap();
        assert!(seen[0].completed);
        assert!(seen[0].results.is_empty());
        assert_eq!(context.index.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_port_execution_timeout() {
        let (context, handle) = connected_context().await;
        handle.set_port_execution(ExecutionMode::Silent);
        let (caller, seen) = recording();
        let operation = PortOperation::new(vec![PortOp::Read {
            id: "in".to_string(),
            pin: Pin::input(1),
        }]);
        let executor = PortExecutor::new(3, operation, caller, context);

        executor.execute(Duration::from_millis(500)).await.unwrap();
        assert_eq!(seen.lock().unwrap()[0].results["in"], PortResult::fault());
    }
}
