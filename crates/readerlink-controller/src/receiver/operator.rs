//! Long-lived subscriptions: tag operators and port observators.

use super::{CallerSet, Receiver, ReceiverContext, Registration};
use crate::caller::SharedCaller;
use crate::error::ControllerError;
use readerlink_core::{Port, PortObservation, Tag, TagOperation};
use readerlink_hardware::{Connector, Result};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// A tag operation defined on the connector, delivering every reported tag
/// to the callers of all logical readers sharing it.
#[derive(Debug)]
pub struct TagOperator {
    id: u32,
    operation: TagOperation,
    callers: CallerSet<Tag>,
    tid_tracking: bool,
    context: ReceiverContext,
    registration: Registration,
}

impl TagOperator {
    /// Register a new operator and define its operation on the connector.
    ///
    /// A failed definition removes the registration again. An id already
    /// registered by another receiver is refused before the connector is
    /// called.
    pub(crate) async fn define(
        id: u32,
        operation: TagOperation,
        tid_tracking: bool,
        context: ReceiverContext,
    ) -> crate::Result<Arc<Self>> {
        let operator = Arc::new_cyclic(|weak| Self {
            id,
            operation,
            callers: CallerSet::new(),
            tid_tracking,
            registration: Registration::new(
                context.index.clone(),
                id,
                Receiver::TagOperator(weak.clone()),
            ),
            context,
        });
        if !operator.registration.is_registered() {
            return Err(ControllerError::OperationIdInUse(id));
        }

        let defined = operator
            .context
            .connector
            .lock()
            .await
            .define_tag_operation(id, &operator.operation)
            .await;

        if let Err(e) = defined {
            operator.registration.remove();
            return Err(e.into());
        }
        debug!("Defined tag operation {} on {}", id, operator.context.controller);
        Ok(operator)
    }

    /// Operation id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The operation defined on the connector.
    pub fn operation(&self) -> &TagOperation {
        &self.operation
    }

    /// Whether tags are currently delivered.
    pub fn is_active(&self) -> bool {
        self.callers.is_active()
    }

    /// Names of the logical readers subscribed.
    pub fn caller_names(&self) -> Vec<String> {
        self.callers.names()
    }

    pub(crate) fn add_caller(&self, name: &str, caller: SharedCaller<Tag>) {
        self.callers.insert(name, caller);
    }

    /// Remove the caller of `name`, returning how many remain.
    pub(crate) fn remove_caller(&self, name: &str) -> usize {
        self.callers.remove(name)
    }

    pub(crate) async fn enable(&self) {
        if self.callers.set_active(true) {
            return;
        }
        let enabled = self
            .context
            .connector
            .lock()
            .await
            .enable_tag_operation(self.id)
            .await;
        if let Err(e) = enabled {
            warn!("Failed to enable tag operation {}: {}", self.id, e);
        }
    }

    pub(crate) async fn disable(&self) {
        if !self.callers.set_active(false) {
            return;
        }
        let disabled = self
            .context
            .connector
            .lock()
            .await
            .disable_tag_operation(self.id)
            .await;
        if let Err(e) = disabled {
            warn!("Failed to disable tag operation {}: {}", self.id, e);
        }
    }

    pub(crate) fn receive(&self, tag: Tag) {
        if !self.callers.is_active() {
            trace!("Tag operation {} inactive, dropping tag", self.id);
            return;
        }
        if tag.epc.is_none() {
            trace!("Dropping tag without EPC for operation {}", self.id);
            return;
        }
        if self.tid_tracking && tag.tid.is_none() {
            trace!("Dropping tag without TID for operation {}", self.id);
            return;
        }
        self.callers.deliver(self.id, tag, &self.context.controller);
    }

    /// Undefine the operation on the connector, then unregister.
    ///
    /// The registration is removed even if the connector fails.
    pub(crate) async fn dispose(&self) -> Result<()> {
        self.callers.set_active(false);
        let undefined = self
            .context
            .connector
            .lock()
            .await
            .undefine_tag_operation(self.id)
            .await;
        self.registration.remove();
        undefined
    }
}

/// A port observation defined on the connector.
#[derive(Debug)]
pub struct PortObservator {
    id: u32,
    observation: PortObservation,
    callers: CallerSet<Port>,
    context: ReceiverContext,
    registration: Registration,
}

impl PortObservator {
    /// Register a new observator and define its observation on the
    /// connector.
    pub(crate) async fn define(
        id: u32,
        observation: PortObservation,
        context: ReceiverContext,
    ) -> crate::Result<Arc<Self>> {
        let observator = Arc::new_cyclic(|weak| Self {
            id,
            observation,
            callers: CallerSet::new(),
            registration: Registration::new(
                context.index.clone(),
                id,
                Receiver::PortObservator(weak.clone()),
            ),
            context,
        });
        if !observator.registration.is_registered() {
            return Err(ControllerError::OperationIdInUse(id));
        }

        let defined = observator
            .context
            .connector
            .lock()
            .await
            .define_port_observation(id, &observator.observation)
            .await;

        if let Err(e) = defined {
            observator.registration.remove();
            return Err(e.into());
        }
        debug!("Defined port observation {} on {}", id, observator.context.controller);
        Ok(observator)
    }

    /// Observation id.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// The observation defined on the connector.
    pub fn observation(&self) -> &PortObservation {
        &self.observation
    }

    /// Whether port events are currently delivered.
    pub fn is_active(&self) -> bool {
        self.callers.is_active()
    }

    /// Names of the logical readers subscribed.
    pub fn caller_names(&self) -> Vec<String> {
        self.callers.names()
    }

    pub(crate) fn add_caller(&self, name: &str, caller: SharedCaller<Port>) {
        self.callers.insert(name, caller);
    }

    pub(crate) fn remove_caller(&self, name: &str) -> usize {
        self.callers.remove(name)
    }

    pub(crate) async fn enable(&self) {
        if self.callers.set_active(true) {
            return;
        }
        let enabled = self
            .context
            .connector
            .lock()
            .await
            .enable_port_observation(self.id)
            .await;
        if let Err(e) = enabled {
            warn!("Failed to enable port observation {}: {}", self.id, e);
        }
    }

    pub(crate) async fn disable(&self) {
        if !self.callers.set_active(false) {
            return;
        }
        let disabled = self
            .context
            .connector
            .lock()
            .await
            .disable_port_observation(self.id)
            .await;
        if let Err(e) = disabled {
            warn!("Failed to disable port observation {}: {}", self.id, e);
        }
    }

    pub(crate) fn receive(&self, port: Port) {
        if !self.callers.is_active() {
            trace!("Port observation {} inactive, dropping event", self.id);
            return;
        }
        self.callers.deliver(self.id, port, &self.context.controller);
    }

    pub(crate) async fn dispose(&self) -> Result<()> {
        self.callers.set_active(false);
        let undefined = self
            .context
            .connector
            .lock()
            .await
            .undefine_port_observation(self.id)
            .await;
        self.registration.remove();
        undefined
    }
}
