//! Driver-facing callback with queued delivery.
//!
//! Drivers call back from threads they own. [`QueuedCallbackHandler`] turns
//! those calls into two ordered pipelines, one for tags and one for ports,
//! each drained by its own task. A drain looks the id up in the receiver
//! index and hands the data over; ids without a live receiver are dropped,
//! which is the normal fate of results arriving after a timeout.
//!
//! ```text
//! driver thread ─► notify_tag ─► [tag queue] ─► tag drain ─► receiver
//! driver thread ─► notify_port ─► [port queue] ─► port drain ─► receiver
//! driver thread ─► notify_message ─► controller (synchronous)
//! driver thread ─► notify_event ─► monitoring channel (synchronous)
//! ```
//!
//! Tags are delivered in arrival order, ports as well; there is no ordering
//! between the two pipelines.

use crate::caller::Notify;
use crate::controller::ControllerInner;
use crate::event::ControllerEvent;
use crate::port_pool::PortPool;
use crate::receiver::{ReceiverIndex, lock};
use readerlink_core::{Message, Port, ReaderEvent, Tag};
use readerlink_hardware::{ConnectorCallback, ConnectorError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Callback registered with the connector of one controller.
pub struct QueuedCallbackHandler {
    index: Arc<ReceiverIndex>,
    tags: mpsc::UnboundedSender<Notify<Tag>>,
    ports: mpsc::UnboundedSender<Notify<Port>>,
    drains: Mutex<Vec<JoinHandle<()>>>,
    port_pool: Mutex<PortPool>,
    controller: Weak<ControllerInner>,
    events: mpsc::UnboundedSender<ControllerEvent>,
    reader_cycle_duration: Duration,
    disposed: AtomicBool,
}

impl QueuedCallbackHandler {
    /// Create the handler and spawn both drain tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub(crate) fn new(
        index: Arc<ReceiverIndex>,
        controller: Weak<ControllerInner>,
        events: mpsc::UnboundedSender<ControllerEvent>,
        reader_cycle_duration: Duration,
    ) -> Self {
        let (tags, tag_queue) = mpsc::unbounded_channel();
        let (ports, port_queue) = mpsc::unbounded_channel();

        let drains = vec![
            tokio::spawn(drain_tags(index.clone(), tag_queue)),
            tokio::spawn(drain_ports(index.clone(), port_queue)),
        ];

        Self {
            index,
            tags,
            ports,
            drains: Mutex::new(drains),
            port_pool: Mutex::new(PortPool::new()),
            controller,
            events,
            reader_cycle_duration,
            disposed: AtomicBool::new(false),
        }
    }

    /// Number of registered receivers.
    pub fn receiver_count(&self) -> usize {
        self.index.len()
    }

    /// Whether [`dispose`](Self::dispose) has run.
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Stop both drain tasks. Later notifications are dropped.
    pub(crate) async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drains: Vec<JoinHandle<()>> = lock(&self.drains).drain(..).collect();
        for drain in drains {
            drain.abort();
            let _ = drain.await;
        }
        debug!("Callback handler disposed");
    }
}

impl std::fmt::Debug for QueuedCallbackHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedCallbackHandler")
            .field("receivers", &self.index.len())
            .field("reader_cycle_duration", &self.reader_cycle_duration)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

impl ConnectorCallback for QueuedCallbackHandler {
    fn notify_tag(&self, id: u32, tag: Tag) {
        if self.is_disposed() || self.tags.send(Notify::new(id, tag)).is_err() {
            trace!("Handler disposed, dropping tag for {}", id);
        }
    }

    fn notify_port(&self, id: u32, port: Port) {
        if self.is_disposed() || self.ports.send(Notify::new(id, port)).is_err() {
            trace!("Handler disposed, dropping port event for {}", id);
        }
    }

    fn notify_message(&self, message: Message) {
        match self.controller.upgrade() {
            Some(controller) => controller.on_message(message),
            None => trace!("Controller gone, dropping message: {}", message),
        }
    }

    fn notify_event(&self, event: ReaderEvent) {
        if self.events.send(ControllerEvent::Reader(event)).is_err() {
            trace!("No monitor listening, dropping reader event");
        }
    }

    fn network_port(&self) -> Result<u16> {
        lock(&self.port_pool)
            .acquire()
            .map_err(|e| ConnectorError::implementation(e.to_string()))
    }

    fn reset_network_port(&self, port: u16) {
        if !lock(&self.port_pool).release(port) {
            debug!("Ignoring release of port {} outside the pool", port);
        }
    }

    fn reader_cycle_duration(&self) -> Duration {
        self.reader_cycle_duration
    }
}

async fn drain_tags(index: Arc<ReceiverIndex>, mut queue: mpsc::UnboundedReceiver<Notify<Tag>>) {
    while let Some(Notify { id, data }) = queue.recv().await {
        let delivered = index
            .get(id)
            .is_some_and(|receiver| receiver.receive_tag(data));
        if !delivered {
            trace!("No receiver for tag notification {}", id);
        }
    }
}

async fn drain_ports(index: Arc<ReceiverIndex>, mut queue: mpsc::UnboundedReceiver<Notify<Port>>) {
    while let Some(Notify { id, data }) = queue.recv().await {
        let delivered = index
            .get(id)
            .is_some_and(|receiver| receiver.receive_port(data));
        if !delivered {
            trace!("No receiver for port notification {}", id);
        }
    }
}
