//! Shared helpers for controller integration tests.
//!
//! Every test drives a [`ReaderController`] over a [`MockConnector`] and
//! observes results through channel-backed callers:
//!
//! - `controller*` build a controller and return the mock handle with it
//! - `channel_caller` turns results into an `UnboundedReceiver`
//! - `recv`/`wait_until` bound every wait so a broken test fails instead of
//!   hanging

#![allow(dead_code)]

use readerlink_controller::{ControllerConfig, ControllerEvent, ReaderController};
use readerlink_core::{Field, Filter, MemoryBank, Operation};
use readerlink_hardware::AnyConnector;
use readerlink_hardware::mock::{MockConnector, MockConnectorHandle};
use std::time::Duration;
use tokio::sync::mpsc;

/// Default bound for waiting on a result.
pub const WAIT: Duration = Duration::from_secs(2);

/// Controller name used throughout the tests.
pub const READER: &str = "Reader1";

/// Install a test-friendly subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct Fixture {
    pub controller: ReaderController,
    pub handle: MockConnectorHandle,
    pub events: mpsc::UnboundedReceiver<ControllerEvent>,
}

pub fn controller() -> Fixture {
    controller_with(ControllerConfig::default())
}

pub fn controller_with(config: ControllerConfig) -> Fixture {
    init_tracing();
    let (connector, handle) = MockConnector::new();
    let (controller, events) = ReaderController::new(READER, AnyConnector::Mock(connector), config);
    Fixture {
        controller,
        handle,
        events,
    }
}

/// A caller forwarding every result into a channel.
pub fn channel_caller<T: Send + 'static>() -> (
    impl Fn(T, &str) -> anyhow::Result<()> + Send + Sync + 'static,
    mpsc::UnboundedReceiver<T>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let caller = move |value: T, _: &str| -> anyhow::Result<()> {
        tx.send(value).map_err(|_| anyhow::anyhow!("test receiver dropped"))
    };
    (caller, rx)
}

/// A caller that ignores its results.
pub fn ignore<T>(_: T, _: &str) -> anyhow::Result<()> {
    Ok(())
}

/// Receive the next value or panic after [`WAIT`].
pub async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for a result")
        .expect("channel closed")
}

/// Assert that nothing arrives within a short window.
pub async fn assert_silent<T: std::fmt::Debug>(rx: &mut mpsc::UnboundedReceiver<T>) {
    if let Ok(Some(value)) = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await {
        panic!("unexpected delivery: {:?}", value);
    }
}

/// Poll `condition` until it holds or panic after [`WAIT`].
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

pub fn user_write(id: &str, offset: u16, length: u16) -> Operation {
    let data = vec![0x55; usize::from(length).div_ceil(8)];
    Operation::write(id, Field::new(MemoryBank::User, offset, length).unwrap(), data).unwrap()
}

pub fn epc_write(id: &str, epc: Vec<u8>) -> Operation {
    let length = (epc.len() * 8) as u16;
    Operation::write(id, Field::new(MemoryBank::Epc, 32, length).unwrap(), epc).unwrap()
}

pub fn tid_read(id: &str) -> Operation {
    Operation::read(id, Field::new(MemoryBank::Tid, 0, 32).unwrap())
}

pub fn epc_filter(epc: Vec<u8>) -> Vec<Filter> {
    vec![Filter::equals(MemoryBank::Epc, 32, epc).unwrap()]
}
