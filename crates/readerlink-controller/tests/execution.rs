//! One-shot tag and port executions.

mod common;

use common::{READER, channel_caller, controller, controller_with, recv, tid_read, user_write};
use readerlink_controller::{ControllerConfig, ControllerError};
use readerlink_core::{
    OperationResult, Pin, Port, PortObservation, PortOp, PortOperation, ResultState, Tag,
    TagOperation,
};
use readerlink_hardware::Capability;
use readerlink_hardware::mock::{ExecutionMode, MockCall};
use std::collections::HashMap;
use std::time::Duration;

fn executed_ids(calls: &[MockCall]) -> Vec<Vec<String>> {
    calls
        .iter()
        .filter_map(|call| match call {
            MockCall::ExecuteTagOperation { operation, .. } => Some(
                operation
                    .operation_ids()
                    .map(str::to_string)
                    .collect::<Vec<_>>(),
            ),
            _ => None,
        })
        .collect()
}

fn gate_write(state: u8) -> PortOperation {
    PortOperation::new(vec![PortOp::Write {
        id: "gate".to_string(),
        pin: Pin::output(1),
        state,
    }])
}

#[tokio::test]
async fn test_execute_delivers_driver_result() {
    let fixture = controller();
    let controller = &fixture.controller;
    controller.connect().await.unwrap();

    let (caller, mut seen) = channel_caller::<Tag>();
    let operation = TagOperation::new(vec![], vec![tid_read("tid")]);
    controller
        .execute_tag_operation(READER, operation, caller)
        .await
        .unwrap();

    let tag = recv(&mut seen).await;
    assert!(tag.completed);
    assert!(tag.epc.is_some());
    assert!(matches!(
        &tag.results["tid"],
        OperationResult::Read { state: ResultState::Success, data } if data.len() == 4
    ));
}

#[tokio::test]
async fn test_execute_while_disconnected_is_empty() {
    let fixture = controller();
    let (caller, mut seen) = channel_caller::<Tag>();

    fixture
        .controller
        .execute_tag_operation(READER, TagOperation::new(vec![], vec![tid_read("tid")]), caller)
        .await
        .unwrap();

    let tag = recv(&mut seen).await;
    assert!(tag.completed);
    assert!(tag.epc.is_none());
    assert!(tag.results.is_empty());
    assert_eq!(
        fixture
            .handle
            .count_calls(|c| matches!(c, MockCall::ExecuteTagOperation { .. })),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_silent_driver_times_out_with_faults() {
    let fixture = controller_with(
        ControllerConfig::default().with_execute_timeout(Duration::from_millis(3000)),
    );
    let controller = &fixture.controller;
    controller.connect().await.unwrap();
    fixture.handle.set_tag_execution(ExecutionMode::Silent);

    let (caller, mut seen) = channel_caller::<Tag>();
    let operation = TagOperation::new(vec![], vec![tid_read("tid"), user_write("user", 0, 16)]);

    let started = tokio::time::Instant::now();
    controller
        .execute_tag_operation(READER, operation, caller)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(elapsed >= Duration::from_millis(3000));
    assert!(elapsed < Duration::from_millis(3100));

    let tag = seen.recv().await.unwrap();
    assert_eq!(tag.results.len(), 2);
    assert!(
        tag.results
            .values()
            .all(|r| r.state() == ResultState::MiscErrorTotal)
    );
    assert_eq!(
        fixture
            .handle
            .count_calls(|c| matches!(c, MockCall::AbortTagOperation(_))),
        1
    );
}

#[tokio::test]
async fn test_covered_write_is_not_sent() {
    let fixture = controller();
    let controller = &fixture.controller;
    controller.connect().await.unwrap();

    let (caller, mut seen) = channel_caller::<Tag>();
    let operation = TagOperation::new(
        vec![],
        vec![user_write("a", 0, 16), user_write("b", 0, 32)],
    );
    controller
        .execute_tag_operation(READER, operation, caller)
        .await
        .unwrap();

    let tag = recv(&mut seen).await;
    assert_eq!(executed_ids(&fixture.handle.calls()), vec![vec!["b".to_string()]]);
    assert!(tag.results["a"].is_success());
    assert!(tag.results["b"].is_success());
}

#[tokio::test]
async fn test_optimization_can_be_switched_off() {
    let fixture = controller();
    let controller = &fixture.controller;
    controller.connect().await.unwrap();
    controller
        .set_properties(&HashMap::from([(
            "Controller.OptimizeWriteOperations".to_string(),
            "false".to_string(),
        )]))
        .await
        .unwrap();

    let (caller, mut seen) = channel_caller::<Tag>();
    let operation = TagOperation::new(
        vec![],
        vec![user_write("a", 0, 16), user_write("b", 0, 32)],
    );
    controller
        .execute_tag_operation(READER, operation, caller)
        .await
        .unwrap();

    recv(&mut seen).await;
    assert_eq!(
        executed_ids(&fixture.handle.calls()),
        vec![vec!["a".to_string(), "b".to_string()]]
    );
}

#[tokio::test]
async fn test_epc_write_is_split_when_driver_loses_track() {
    let fixture = controller();
    let controller = &fixture.controller;
    fixture.handle.set_capability(Capability::LostEpcOnWrite, true);
    controller.connect().await.unwrap();

    let (caller, mut seen) = channel_caller::<Tag>();
    let operation = TagOperation::new(
        common::epc_filter(vec![0x11, 0x11]),
        vec![common::epc_write("epc", vec![0x22, 0x22]), tid_read("tid")],
    );
    controller
        .execute_tag_operation(READER, operation, caller)
        .await
        .unwrap();

    assert_eq!(
        executed_ids(&fixture.handle.calls()),
        vec![vec!["epc".to_string()], vec!["tid".to_string()]]
    );

    let tag = recv(&mut seen).await;
    assert_eq!(tag.epc, Some(vec![0x22, 0x22]));
    assert!(tag.results["epc"].is_success());
    assert!(tag.results["tid"].is_success());
    common::assert_silent(&mut seen).await;
}

#[tokio::test]
async fn test_failed_part_stops_the_split() {
    let fixture = controller();
    let controller = &fixture.controller;
    fixture.handle.set_capability(Capability::LostEpcOnWrite, true);
    fixture.handle.set_result_state("epc", ResultState::MemoryLocked);
    controller.connect().await.unwrap();

    let (caller, mut seen) = channel_caller::<Tag>();
    let operation = TagOperation::new(
        common::epc_filter(vec![0x11, 0x11]),
        vec![common::epc_write("epc", vec![0x22, 0x22]), tid_read("tid")],
    );
    controller
        .execute_tag_operation(READER, operation, caller)
        .await
        .unwrap();

    let tag = recv(&mut seen).await;
    assert_eq!(tag.results["epc"].state(), ResultState::MemoryLocked);
    assert_eq!(tag.results["tid"].state(), ResultState::MiscErrorTotal);
    assert_eq!(executed_ids(&fixture.handle.calls()).len(), 1);
}

#[tokio::test]
async fn test_driver_failure_yields_faults_and_reconnects() {
    let fixture = controller_with(
        ControllerConfig::default().with_reconnect_delay(Duration::from_millis(10)),
    );
    let controller = &fixture.controller;
    controller
        .define_tag_operation(
            controller.next_id(),
            "Dock",
            TagOperation::default(),
            common::ignore,
        )
        .await
        .unwrap();
    fixture.handle.set_tag_execution(ExecutionMode::Disconnect);

    let (caller, mut seen) = channel_caller::<Tag>();
    controller
        .execute_tag_operation(READER, TagOperation::new(vec![], vec![tid_read("tid")]), caller)
        .await
        .unwrap();

    let tag = recv(&mut seen).await;
    assert_eq!(tag.results["tid"].state(), ResultState::MiscErrorTotal);

    let handle = fixture.handle.clone();
    common::wait_until(move || handle.count_calls(|c| *c == MockCall::Connect) == 2).await;
    common::wait_until(|| !controller.is_reconnecting()).await;
    assert!(controller.is_connected());
}

#[tokio::test]
async fn test_rejected_execution_is_empty() {
    let fixture = controller();
    let controller = &fixture.controller;
    controller.connect().await.unwrap();
    fixture.handle.set_tag_execution(ExecutionMode::Reject);

    let (caller, mut seen) = channel_caller::<Tag>();
    controller
        .execute_tag_operation(READER, TagOperation::new(vec![], vec![tid_read("tid")]), caller)
        .await
        .unwrap();

    let tag = recv(&mut seen).await;
    assert!(tag.completed);
    assert!(tag.results.is_empty());
    assert!(!controller.is_reconnecting());
}

#[tokio::test]
async fn test_failing_caller_does_not_stall_the_worker() {
    let fixture = controller();
    let controller = &fixture.controller;
    controller.connect().await.unwrap();

    controller
        .execute_tag_operation(
            READER,
            TagOperation::default(),
            |_: Tag, _: &str| -> anyhow::Result<()> { anyhow::bail!("subscriber unreachable") },
        )
        .await
        .unwrap();

    let (caller, mut seen) = channel_caller::<Tag>();
    controller
        .execute_tag_operation(READER, TagOperation::new(vec![], vec![tid_read("tid")]), caller)
        .await
        .unwrap();
    assert!(recv(&mut seen).await.results["tid"].is_success());
}

#[tokio::test]
async fn test_port_execution_connects_for_its_duration() {
    let fixture = controller();
    let controller = &fixture.controller;
    let (caller, mut seen) = channel_caller::<Port>();

    controller
        .execute_port_operation(gate_write(1), caller)
        .await
        .unwrap();

    let port = recv(&mut seen).await;
    assert!(port.completed);
    assert_eq!(port.results["gate"].state, ResultState::Success);
    assert_eq!(port.results["gate"].value, Some(1));
    assert!(!controller.is_connected());

    let calls: Vec<MockCall> = fixture
        .handle
        .calls()
        .into_iter()
        .filter(|c| !matches!(c, MockCall::SetProperties(_)))
        .collect();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0], MockCall::Connect);
    assert!(matches!(calls[1], MockCall::ExecutePortOperation { .. }));
    assert_eq!(calls[2], MockCall::Disconnect);
}

#[tokio::test]
async fn test_port_execution_keeps_defined_connection() {
    let fixture = controller();
    let controller = &fixture.controller;
    controller
        .define_port_observation(
            controller.next_id(),
            "Gate",
            PortObservation::new(vec![Pin::input(1)]),
            common::ignore,
        )
        .await
        .unwrap();

    let (caller, mut seen) = channel_caller::<Port>();
    controller
        .execute_port_operation(gate_write(0), caller)
        .await
        .unwrap();

    recv(&mut seen).await;
    assert!(controller.is_connected());
    assert_eq!(fixture.handle.count_calls(|c| *c == MockCall::Disconnect), 0);
}

#[tokio::test]
async fn test_port_execution_connect_failure() {
    let fixture = controller();
    fixture.handle.fail_next_connects(1);
    let (caller, mut seen) = channel_caller::<Port>();

    let result = fixture
        .controller
        .execute_port_operation(gate_write(1), caller)
        .await;

    assert!(matches!(result, Err(ControllerError::Connector(_))));
    let port = recv(&mut seen).await;
    assert!(port.completed);
    assert!(port.results.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_silent_port_execution_times_out() {
    let fixture = controller();
    fixture.handle.set_port_execution(ExecutionMode::Silent);
    let (caller, mut seen) = channel_caller::<Port>();

    fixture
        .controller
        .execute_port_operation(gate_write(1), caller)
        .await
        .unwrap();

    let port = seen.recv().await.unwrap();
    assert_eq!(port.results["gate"].state, ResultState::MiscErrorTotal);
    assert!(!fixture.controller.is_connected());
}

#[tokio::test]
async fn test_failed_port_execution_is_empty() {
    let fixture = controller();
    fixture.handle.set_port_execution(ExecutionMode::Fail);
    let (caller, mut seen) = channel_caller::<Port>();

    fixture
        .controller
        .execute_port_operation(gate_write(1), caller)
        .await
        .unwrap();

    let port = recv(&mut seen).await;
    assert!(port.completed);
    assert!(port.results.is_empty());
}
